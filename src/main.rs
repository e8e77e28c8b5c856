use color_eyre::{eyre::eyre, Result};
use std::path::PathBuf;
use std::sync::Arc;
use streamrelay::config::{self, RelayConfig};
use streamrelay::controller::SlotTable;
use streamrelay::dsu::DsuServerHandle;
use streamrelay::vban::{AudioFormat, EmitterSettings, RawPcmCapture, VbanEmitterHandle};
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[cfg(feature = "gilrs")]
use streamrelay::controller::collector::CollectorHandle;

#[tokio::main]
async fn main() -> Result<()> {
    setup()?;

    let config = load_config()?;
    let slots = SlotTable::new();

    #[cfg(feature = "gilrs")]
    let mut collector = match CollectorHandle::spawn(slots.clone()) {
        Ok(collector) => Some(collector),
        Err(e) => {
            tracing::warn!("Gamepad collector unavailable, serving empty slots: {}", e);
            None
        }
    };

    let mut dsu = if config.dsu.enabled {
        let server = DsuServerHandle::spawn(&config.dsu, Arc::new(slots.clone()))
            .await
            .map_err(|e| eyre!("Failed to start DSU server: {}", e))?;
        Some(server)
    } else {
        info!("DSU server disabled in config");
        None
    };

    let mut vban = if config.vban.enabled {
        Some(spawn_vban(&config).await?)
    } else {
        info!("VBAN emitter disabled in config");
        None
    };

    info!("Relays running, press Ctrl+C to stop");
    tokio::signal::ctrl_c().await?;
    info!("Shutdown requested");

    if let Some(vban) = vban.as_mut() {
        match vban.shutdown().await {
            Ok(stats) => info!(
                "VBAN emitter stopped: {} buffer(s), {} packet(s), {} send error(s)",
                stats.buffers_received, stats.packets_sent, stats.send_errors
            ),
            Err(e) => error!("VBAN emitter shutdown failed: {}", e),
        }
    }
    if let Some(dsu) = dsu.as_mut() {
        if let Err(e) = dsu.shutdown().await {
            error!("DSU server shutdown failed: {}", e);
        }
    }
    #[cfg(feature = "gilrs")]
    if let Some(collector) = collector.as_mut() {
        collector.shutdown();
    }

    Ok(())
}

fn setup() -> Result<()> {
    if std::env::var("RUST_LIB_BACKTRACE").is_err() {
        std::env::set_var("RUST_LIB_BACKTRACE", "0")
    }
    color_eyre::install()?;
    if std::env::var("RUST_LOG").is_err() {
        std::env::set_var("RUST_LOG", "info")
    }
    setup_logging_env();
    Ok(())
}

fn setup_logging_env() {
    FmtSubscriber::builder()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .pretty()
        .init();
}

/// Config path from the first argument, else the per-user default
fn load_config() -> Result<RelayConfig> {
    let path = match std::env::args_os().nth(1) {
        Some(path) => PathBuf::from(path),
        None => {
            let path = config::default_config_path()?;
            config::ensure_default_config(&path)?;
            path
        }
    };
    info!("Using config {}", path.display());
    Ok(RelayConfig::load(&path)?)
}

/// Streams raw PCM from stdin in the configured capture format
async fn spawn_vban(config: &RelayConfig) -> Result<VbanEmitterHandle> {
    let capture_config = &config.vban.capture;
    let format = AudioFormat {
        sample_rate: capture_config.sample_rate,
        encoding: capture_config.encoding,
        channels: capture_config.channels,
    };
    let capture = RawPcmCapture::new(std::io::stdin(), format, capture_config.buffer_samples);

    let emitter = VbanEmitterHandle::spawn(
        EmitterSettings::from_config(&config.vban),
        Box::new(capture),
    )
    .await
    .map_err(|e| eyre!("Failed to start VBAN emitter: {}", e))?;
    if let Some(addr) = emitter.local_addr() {
        info!("VBAN emitter sending from {}", addr);
    }
    Ok(emitter)
}
