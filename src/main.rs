//! Perimeter Sentry
//!
//! Main entry point: wires the serial link, debouncer, pipeline
//! orchestrator, and stage clients, arms the system, and runs until ctrl-c.

use perimeter_sentry::alert::AlertClient;
use perimeter_sentry::capture::IpCameraCapture;
use perimeter_sentry::debouncer::{spawn_debouncer, Debouncer, EventSlot};
use perimeter_sentry::orchestrator::PipelineOrchestrator;
use perimeter_sentry::run_log::RunLogService;
use perimeter_sentry::serial_link::{SerialLink, SerialPortTransport};
use perimeter_sentry::state::{AppConfig, DebounceConfig, LinkConfig, PipelineConfig};
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> perimeter_sentry::Result<()> {
    // Load .env if present
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "perimeter_sentry=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting Perimeter Sentry v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let config = AppConfig::default();
    tracing::info!(
        serial_port = %config.serial_port,
        serial_baud = config.serial_baud,
        snapshot_url = %config.snapshot_url,
        verify_url = %config.verify_url,
        alert_url = %config.alert_url,
        "Configuration loaded"
    );

    let link_config = LinkConfig::default();
    let debounce_config = DebounceConfig::default();
    let pipeline_config = PipelineConfig::default();

    // Serial link -> debouncer -> event slot
    let transport = Arc::new(SerialPortTransport::new(
        config.serial_port.clone(),
        config.serial_baud,
    ));
    let (link, sensor_events, link_fatal) = SerialLink::new(transport, link_config);
    link.spawn();
    tracing::info!("SerialLink started");

    let slot = Arc::new(EventSlot::new());
    spawn_debouncer(
        Debouncer::new(debounce_config),
        sensor_events,
        slot.clone(),
    );
    tracing::info!("Debouncer started");

    // Stage clients
    let capture = Arc::new(IpCameraCapture::new(
        config.snapshot_url.clone(),
        pipeline_config.capture_timeout,
    ));
    let verifier = Arc::new(perimeter_sentry::verify::VerifyClient::new(
        config.verify_url.clone(),
        pipeline_config.verify_timeout,
    ));
    let alerter = Arc::new(
        AlertClient::new(
            config.alert_url.clone(),
            config.alert_voice_id.clone(),
            config.temp_dir.clone(),
            config.player_cmd.clone(),
            pipeline_config.alert_timeout,
        )
        .await?,
    );
    tracing::info!("Stage clients initialized");

    let run_log = Arc::new(RunLogService::default());

    // Orchestrator
    let (orchestrator, control, mut mode) = PipelineOrchestrator::new(
        capture,
        verifier,
        alerter,
        slot,
        run_log.clone(),
        link_fatal,
        pipeline_config,
        config.alert_text.clone(),
    );
    orchestrator.spawn();

    // Arm immediately; an external control surface may disarm later
    control.arm().await?;
    mode.changed().await.ok();
    tracing::info!(mode = ?*mode.borrow(), "System armed and watching");

    tokio::signal::ctrl_c().await?;
    tracing::info!(
        recorded_runs = run_log.count().await,
        "Shutdown signal received, exiting"
    );

    Ok(())
}
