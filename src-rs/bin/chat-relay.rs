use chat_relay_rs::api::server::RelayServer;
use chat_relay_rs::config::RelayConfig;
use chat_relay_rs::helpers::init_logging;
use tracing::{error, warn};

#[tokio::main]
async fn main() {
    let dotenv = dotenvy::dotenv();
    let config = RelayConfig::from_env();
    init_logging(&config.log_filter);
    if let Err(err) = dotenv {
        warn!(error = %err, "no .env file loaded");
    }

    let server = RelayServer::new(&config, None);
    if let Err(err) = server.start().await {
        error!(error = %err, "server error");
        std::process::exit(1);
    }
}
