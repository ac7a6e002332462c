//! rsock - Reactive-streams protocol server
//!
//! Runs an echo service: request-response replies with the request payload,
//! request-stream replays the request data once per unit of demand (capped).

use bytes::Bytes;
use rsock_protocol::FrameType;
use rsock_server::{Config, TcpServer};
use tracing_subscriber::EnvFilter;

/// Upper bound on responses sent for one REQUEST_STREAM.
const MAX_STREAM_RESPONSES: u32 = 1000;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // Load configuration (from file if RSOCK_CONFIG is set, then env overrides)
    let config = match Config::load() {
        Ok(c) => {
            if let Ok(path) = std::env::var("RSOCK_CONFIG") {
                tracing::info!("Loaded config from {}", path);
            }
            c
        }
        Err(e) => {
            // If a config file was explicitly specified, fail on error
            if std::env::var("RSOCK_CONFIG").is_ok() {
                tracing::error!("Failed to load config: {}", e);
                return Err(e.into());
            }
            tracing::warn!("Invalid environment overrides ({}), using defaults", e);
            Config::default()
        }
    };

    tracing::info!("Starting rsock server");
    tracing::info!("  Bind address: {}", config.network.bind_addr);
    tracing::info!("  Max connections: {}", config.network.max_connections);
    tracing::info!("  Max frame size: {} bytes", config.protocol.max_frame_size);

    let mut server = TcpServer::bind(config.server_config()).await?;
    let engine = server.engine_mut();

    engine.on_frame(FrameType::Setup, |frame| {
        if let Some(setup) = frame.setup() {
            tracing::debug!(
                "SETUP metadata={} data={} lifetime={:?}",
                setup.metadata_mime_type,
                setup.data_mime_type,
                setup.max_lifetime()
            );
        }
    })?;

    engine.on_request_response(|frame, response| {
        let data = frame.data().cloned();
        let metadata = frame.metadata().cloned();
        if let Err(e) = response.respond(data, metadata) {
            tracing::warn!("Failed to respond: {}", e);
        }
    })?;

    engine.on_request_stream(|frame, mut response| {
        let count = response.initial_n().clamp(1, MAX_STREAM_RESPONSES);
        let data = frame.data().cloned().unwrap_or_default();
        for i in 0..count {
            let metadata = Bytes::from(i.to_string());
            if let Err(e) = response.respond(i + 1 == count, Some(data.clone()), Some(metadata)) {
                tracing::warn!("Failed to respond on stream {}: {}", response.stream_id(), e);
                break;
            }
        }
    })?;

    engine.on_frame(FrameType::Cancel, |frame| {
        tracing::debug!("Stream {} cancelled by client", frame.stream_id());
    })?;

    let shutdown = server.shutdown_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Received Ctrl+C, shutting down...");
            shutdown.shutdown();
        }
    });

    let stats = server.run().await?;
    tracing::info!(
        "Server stopped ({} connections, {} frames received, {} dropped)",
        stats.connections_total,
        stats.frames_received,
        stats.frames_dropped
    );

    Ok(())
}
