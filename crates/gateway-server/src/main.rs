//! Gateway server binary

use gateway_common::{init_tracing, AppConfig};

#[tokio::main]
async fn main() {
    init_tracing();

    let config = match AppConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            tracing::error!(error = %e, "Failed to load configuration");
            std::process::exit(1);
        }
    };

    tracing::info!(
        app = %config.app.name,
        env = ?config.app.env,
        "Starting gateway"
    );

    if let Err(e) = gateway_server::run(config).await {
        tracing::error!(error = %e, "Gateway exited with error");
        std::process::exit(1);
    }
}
