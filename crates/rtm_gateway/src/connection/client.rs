//! Authenticated session representation.

use super::socket::SocketHandle;
use crate::auth::{Claims, IdentityKey};
use std::time::SystemTime;

/// Mobile platform markers found in the token's user agent.
///
/// The markers are independent: a user agent naming both platforms counts
/// toward both.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct DevicePlatforms {
    pub ios: bool,
    pub android: bool,
}

impl DevicePlatforms {
    /// Looks for the `iOS`/`Android` markers mobile clients send.
    pub fn from_user_agent(user_agent: &str) -> Self {
        Self {
            ios: user_agent.contains("iOS"),
            android: user_agent.contains("Android"),
        }
    }
}

/// One authenticated session bound to one socket.
///
/// # Fields
///
/// * `identity` - `{user_id}_{finger_print}` of the claims
/// * `socket` - The socket the session arrived on
/// * `claims` - Verified token payload
/// * `platforms` - Platform markers derived from `claims.user_agent`
/// * `connected_at` - When the session was registered
#[derive(Debug, Clone)]
pub struct Connection {
    pub identity: IdentityKey,
    pub socket: SocketHandle,
    pub claims: Claims,
    pub platforms: DevicePlatforms,
    pub connected_at: SystemTime,
}

impl Connection {
    pub fn new(socket: SocketHandle, claims: Claims) -> Self {
        Self {
            identity: claims.identity(),
            platforms: DevicePlatforms::from_user_agent(&claims.user_agent),
            socket,
            claims,
            connected_at: SystemTime::now(),
        }
    }
}
