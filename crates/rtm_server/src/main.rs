#[tokio::main]
async fn main() {
    if let Err(e) = lib_rtm_server::init().await {
        eprintln!("rtm-server failed: {e}");
        std::process::exit(1);
    }
}
