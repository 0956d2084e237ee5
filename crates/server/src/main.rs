use anyhow::{Context, Result};
use tokio::net::TcpListener;
use tracing::{debug, info};
use tracing_bunyan_formatter::{BunyanFormattingLayer, JsonStorageLayer};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod config;
mod error;
mod routes;

use config::{LogFormat, ServerConfig};
use routes::AppState;
use slipscan_ocr::ReceiptPipeline;

const DEFAULT_LOG_FILTER: &str = "slipscan_server=info,slipscan_ocr=info,tower_http=info";

#[tokio::main]
async fn main() -> Result<()> {
    let config = ServerConfig::load()?;
    init_tracing(config.log_format);

    let extractor = config.extractor()?;
    info!(rules = extractor.rules().len(), "Field rules loaded");
    for rule in extractor.rules() {
        debug!(field = %rule.field, pattern = rule.pattern(), "Field rule");
    }

    let pipeline = ReceiptPipeline::new(config.backend(), extractor, config.pipeline_config());
    info!(
        engine = ?config.engine,
        language = %config.language,
        mode = ?config.segmentation_mode,
        max_upload_bytes = config.max_upload_bytes,
        scratch = %pipeline.config().scratch_root.display(),
        "OCR pipeline ready"
    );

    let app = routes::router(AppState::new(pipeline));
    let listener = TcpListener::bind(config.bind)
        .await
        .with_context(|| format!("binding {}", config.bind))?;
    info!("Server started on {}", config.bind);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    info!("Server stopped");
    Ok(())
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| DEFAULT_LOG_FILTER.into());
    let registry = tracing_subscriber::registry().with(filter);
    match format {
        LogFormat::Pretty => registry.with(tracing_subscriber::fmt::layer()).init(),
        LogFormat::Json => registry
            .with(JsonStorageLayer)
            .with(BunyanFormattingLayer::new("slipscan".into(), std::io::stdout))
            .init(),
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!("Failed to listen for shutdown signal: {e}");
    }
}
