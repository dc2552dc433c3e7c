use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{error, info};
use crate::mqtt_service::MqttService;

/// Install the tracing subscriber; debug mode lowers the level to DEBUG.
pub fn init_logging(debug: bool) {
    let level = if debug {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };

    tracing_subscriber::fmt().with_max_level(level).init();
}

/// Start the shared publish connection of the MQTT service
pub fn start_mqtt_service(mqtt_service: Arc<MqttService>) -> JoinHandle<()> {
    tokio::spawn(async move {
        mqtt_service.start().await;
    })
}

/// Resolves once the process has been asked to terminate.
pub async fn handle_shutdown() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to handle termination signal: {:?}", e);
        // Without a signal handler there is nothing to wait for; keep serving.
        std::future::pending::<()>().await;
    }

    info!("HTTP bridge is shutting down...");
}
