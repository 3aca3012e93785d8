//! Resolution of the host name this instance advertises.

use crate::error::GatewayError;
use std::collections::HashMap;
use std::time::Duration;
use tracing::{info, warn};

/// Deployment marker that triggers a cloud metadata lookup.
pub const AWS_DEPLOYMENT: &str = "AWS_VPS";

/// Instance metadata endpoint returning the public IPv4 address.
pub const AWS_PUBLIC_IPV4_URL: &str = "http://169.254.169.254/latest/meta-data/public-ipv4";

const METADATA_TIMEOUT: Duration = Duration::from_secs(3);

/// Parses an `ip:host` mapping list separated by commas.
///
/// ```
/// let map = rtm_gateway::host::parse_iphost_map("1.2.3.4:rtm1.example.com, 5.6.7.8:rtm2.example.com").unwrap();
/// assert_eq!(map["5.6.7.8"], "rtm2.example.com");
/// ```
pub fn parse_iphost_map(pairs: &str) -> Result<HashMap<String, String>, GatewayError> {
    pairs.split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(|entry| match entry.split_once(':') {
            Some((ip, host)) if !ip.trim().is_empty() && !host.trim().is_empty() => {
                Ok((ip.trim().to_string(), host.trim().to_string()))
            }
            _ => Err(GatewayError::Config(format!(
                "invalid ip:host mapping entry '{entry}'"
            ))),
        })
        .collect()
}

/// Maps a discovered IP through the configured table; unmapped IPs pass through.
pub fn apply_iphost_map(ip: &str, map: &HashMap<String, String>) -> String {
    map.get(ip).cloned().unwrap_or_else(|| ip.to_string())
}

/// Resolves the advertised host once at startup.
///
/// For [`AWS_DEPLOYMENT`] the public IPv4 is fetched from the instance metadata
/// service and mapped through `iphost_map`; any other value is used verbatim.
pub async fn resolve_host(deployment_host: &str, iphost_map: &HashMap<String, String>) -> Result<String, GatewayError> {
    if deployment_host != AWS_DEPLOYMENT {
        return Ok(deployment_host.to_string());
    }

    let ip = fetch_public_ip(AWS_PUBLIC_IPV4_URL).await?;
    let host = apply_iphost_map(&ip, iphost_map);
    if host == ip {
        warn!("Public IP {} has no host mapping, advertising the IP", ip);
    }
    info!("Resolved deployment host {} (public IP {})", host, ip);
    Ok(host)
}

async fn fetch_public_ip(url: &str) -> Result<String, GatewayError> {
    let client = reqwest::Client::builder()
        .timeout(METADATA_TIMEOUT)
        .build()
        .map_err(|e| GatewayError::Network(format!("metadata client: {e}")))?;
    let response = client
        .get(url)
        .send()
        .await
        .and_then(|r| r.error_for_status())
        .map_err(|e| GatewayError::Network(format!("metadata lookup failed: {e}")))?;
    let body = response
        .text()
        .await
        .map_err(|e| GatewayError::Network(format!("metadata body unreadable: {e}")))?;

    let ip = body.trim();
    if ip.is_empty() {
        return Err(GatewayError::Network("metadata service returned no address".to_string()));
    }
    Ok(ip.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_iphost_map_rejects_bad_entries() {
        assert!(parse_iphost_map("").unwrap().is_empty());
        assert!(parse_iphost_map("1.2.3.4").is_err());
        assert!(parse_iphost_map("1.2.3.4:").is_err());
    }

    #[test]
    fn test_apply_iphost_map_falls_back_to_ip() {
        let map = parse_iphost_map("1.2.3.4:rtm1").unwrap();
        assert_eq!(apply_iphost_map("1.2.3.4", &map), "rtm1");
        assert_eq!(apply_iphost_map("9.9.9.9", &map), "9.9.9.9");
    }

    #[tokio::test]
    async fn test_plain_deployment_host_is_used_verbatim() {
        let host = resolve_host("rtm1.example.com", &HashMap::new()).await.unwrap();
        assert_eq!(host, "rtm1.example.com");
    }
}
