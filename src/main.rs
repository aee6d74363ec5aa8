use tc_monitor_connector::{api, logging, ConnectorConfig};

#[tokio::main]
async fn main() {
    if let Err(e) = logging::init_logger("tc_monitor_connector") {
        eprintln!("{}", e);
    }

    let config = ConnectorConfig::from_env();
    if config.credentials.secret_id.is_empty() || config.credentials.secret_key.is_empty() {
        tracing::warn!("TC_SECRET_ID/TC_SECRET_KEY not set; API calls will fail authentication");
    }

    if let Err(e) = api::start_server(config).await {
        tracing::error!("{}", e);
        std::process::exit(1);
    }
}
