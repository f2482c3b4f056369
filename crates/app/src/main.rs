use anyhow::Context;
use clap::Parser;
use miclock_app::AppConfig;
use miclock_audio::{DeviceLister, PulseGateway, PulseSubscribeWatcher};
use miclock_engine::EngineBuilder;
use miclock_foundation::clamp_unit;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "miclock", about = "Keeps the microphone input volume locked to a target")]
struct Cli {
    /// Path to a TOML config file (defaults to config/default.toml if present)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Override the target volume for this run (0.0..=1.0)
    #[arg(long)]
    target: Option<f32>,

    /// Override the poll interval in seconds for this run
    #[arg(long)]
    poll_interval: Option<f32>,

    /// List input devices and exit
    #[arg(long)]
    list_devices: bool,
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn list_devices() -> anyhow::Result<()> {
    let lister = DeviceLister::new();
    let devices = lister.enumerate();
    if devices.is_empty() {
        println!("no input devices found");
        return Ok(());
    }
    for device in devices {
        let marker = if device.is_default { "*" } else { " " };
        println!("{marker} {}", device.name);
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_logging();
    let cli = Cli::parse();

    if cli.list_devices {
        return list_devices();
    }

    let mut config = match &cli.config {
        Some(path) => AppConfig::from_path(path)
            .with_context(|| format!("failed to load config from {}", path.display()))?,
        None => AppConfig::load()?,
    };
    if let Some(target) = cli.target {
        config.lock.target_volume = clamp_unit(target);
    }
    if let Some(interval) = cli.poll_interval {
        config.lock.poll_interval_secs = interval;
    }
    let settings = config.lock.clone().sanitized();
    tracing::info!(
        target = settings.target_volume,
        epsilon = settings.epsilon,
        poll_interval_secs = settings.poll_interval_secs,
        "starting miclock"
    );

    let gateway = Arc::new(PulseGateway::new());
    let watcher = Box::new(PulseSubscribeWatcher::new());
    let engine = EngineBuilder::new(gateway, watcher)
        .settings(settings)
        .config(config.engine.engine_config())
        .spawn();

    // Status updates arrive on a channel from the worker; log them from a
    // plain thread so the async runtime is only driving signals and timers.
    let updates = engine.subscribe();
    let status_log = std::thread::spawn(move || {
        for status in updates.iter() {
            tracing::info!(
                state = ?status.state,
                device = status.active_device_name.as_deref().unwrap_or("-"),
                "status"
            );
            if let Some(error) = &status.last_error {
                tracing::warn!(hint = error.user_hint(), "last fault: {error}");
            }
        }
    });

    let metrics = engine.metrics();
    let mut summary_interval = tokio::time::interval(Duration::from_secs(30));
    summary_interval.tick().await; // the first tick fires immediately
    loop {
        tokio::select! {
            result = tokio::signal::ctrl_c() => {
                result.context("failed to listen for ctrl-c")?;
                tracing::info!("shutdown signal received");
                break;
            }
            _ = summary_interval.tick() => {
                tracing::info!("{}", metrics.summary());
            }
        }
    }

    engine.stop();
    drop(engine); // joins the worker and closes the status channel
    let _ = status_log.join();
    tracing::info!("miclock stopped");
    Ok(())
}
