use mqtt_http_bridge::config::Config;
use mqtt_http_bridge::mqtt_service::MqttService;
use mqtt_http_bridge::rest_server::{run_rest_server, AppState};
use mqtt_http_bridge::service_utils::{handle_shutdown, init_logging, start_mqtt_service};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::time::{timeout, Duration};
use tracing::{error, info, warn};

#[tokio::main]
async fn main() {
    // Load configuration
    let config = match Config::from_env() {
        Ok(cfg) => Arc::new(cfg),
        Err(e) => {
            init_logging(false);
            error!("Error loading configuration: {:?}", e);
            return;
        }
    };

    // Initialize logging
    init_logging(config.debug);

    let mqtt_service = match MqttService::new(&config) {
        Ok(service) => service,
        Err(e) => {
            error!("Failed to configure MQTT service: {}", e);
            return;
        }
    };

    // Shared publish connection
    let mqtt_task = start_mqtt_service(mqtt_service.clone());

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let state = AppState {
        config: config.clone(),
        broker: mqtt_service.clone(),
        shutdown: shutdown_rx,
    };

    let shutdown = async move {
        handle_shutdown().await;
        // Ends every open subscribe stream so graceful shutdown can finish
        let _ = shutdown_tx.send(true);
    };

    if let Err(e) = run_rest_server(state, shutdown).await {
        error!("HTTP server failed: {}", e);
    }

    mqtt_service.disconnect();
    if timeout(Duration::from_secs(2), mqtt_task).await.is_err() {
        warn!("MQTT service did not disconnect in time.");
    }

    info!("All services shut down successfully.");
}
