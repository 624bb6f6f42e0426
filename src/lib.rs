pub mod cli;
pub mod client;
pub mod collectors;
pub mod config;
pub mod forwarder;
pub mod models;

mod utils;

use crate::cli::Options;
use crate::client::coap::CoapClient;
use crate::client::Transport;
use crate::collectors::{Dht22, ReplaySource, Sensor, Simulated};
use crate::config::{AppConfig, ConfigSource, Template, BUNDLED_TEMPLATE};
use crate::forwarder::{ExitReason, Forwarder, Summary};
use anyhow::{Context, Result};
use log::{error, info, warn};
use tokio::sync::watch;

pub fn config_source(options: &Options) -> ConfigSource {
    ConfigSource::new(&options.config_path).with_template(Template::Bundled(BUNDLED_TEMPLATE))
}

/// Creates the config file if needed and opens it in an editor.
pub fn edit_config(options: &Options) -> Result<()> {
    let source = config_source(options);
    source.ensure_exists().context("Failed to prepare config file")?;
    crate::config::editor::open(source.path())
}

pub async fn run(options: Options) -> Result<()> {
    info!("Starting application");

    match forward(options).await {
        Ok(summary) => {
            let reason = match summary.exit {
                ExitReason::Interrupted => "interrupted",
                ExitReason::Exhausted => "no more readings",
            };
            info!(
                "Stopped ({}): {} readings sent, {} skipped",
                reason, summary.published, summary.skipped
            );
        }
        Err(e) => {
            error!("Application error: {e:#}");
            // Print chain of error causes
            for cause in e.chain().skip(1) {
                error!("Caused by: {cause}");
            }
            return Err(e).context("Application failed to run");
        }
    }

    Ok(())
}

async fn forward(options: Options) -> Result<Summary> {
    let source = config_source(&options);
    let (config, mut transport) = forwarder::connect(&source, |config: &AppConfig| {
        CoapClient::open(
            config.custom.host.clone(),
            config.port(),
            config.coap.clone(),
        )
    })
    .await?;

    let sensor = match select_sensor(&options, &config) {
        Ok(sensor) => sensor,
        Err(e) => {
            transport.close().await;
            return Err(e);
        }
    };

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    spawn_signal_listener(shutdown_tx);

    Forwarder::new(
        transport,
        sensor,
        config.path(),
        config.sleep_interval(),
        shutdown_rx,
    )
    .verbose(options.verbose)
    .run()
    .await
}

fn select_sensor(options: &Options, config: &AppConfig) -> Result<Box<dyn Sensor>> {
    if let Some(path) = &options.replay {
        let replay = ReplaySource::from_path(path).context("Failed to open replay file")?;
        return Ok(Box::new(replay));
    }

    if options.simulate {
        warn!("Simulating the sensor, data sent is test data");
        return Ok(Box::new(Simulated::default()));
    }

    match Dht22::discover(config.gpio_pin(), &config.sensor) {
        Ok(sensor) => Ok(Box::new(sensor)),
        Err(e) => {
            warn!("{}; data sent is test data, not from the sensor", e);
            Ok(Box::new(Simulated::default()))
        }
    }
}

/// Flips the shutdown channel on SIGINT/SIGTERM. The loop does its own cleanup.
fn spawn_signal_listener(shutdown: watch::Sender<bool>) {
    tokio::spawn(async move {
        match wait_for_signal().await {
            Ok(name) => {
                info!("Interrupted by {}, stopping client", name);
                let _ = shutdown.send(true);
            }
            Err(e) => error!("Failed to listen for signals: {}", e),
        }
    });
}

#[cfg(unix)]
async fn wait_for_signal() -> std::io::Result<&'static str> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = signal(SignalKind::terminate())?;
    tokio::select! {
        result = tokio::signal::ctrl_c() => result.map(|_| "SIGINT"),
        _ = sigterm.recv() => Ok("SIGTERM"),
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() -> std::io::Result<&'static str> {
    tokio::signal::ctrl_c().await.map(|_| "Ctrl+C")
}
