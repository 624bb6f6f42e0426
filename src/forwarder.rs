use anyhow::{Context, Result};
use chrono::Local;
use log::{debug, info};
use std::future::Future;
use std::time::Duration;
use tokio::sync::watch;

use crate::client::{Transport, TransportError};
use crate::collectors::Sensor;
use crate::config::{AppConfig, ConfigSource};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitReason {
    /// Shutdown was requested (SIGINT/SIGTERM).
    Interrupted,
    /// The sensor has no more readings (end of a replay file).
    Exhausted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Summary {
    pub published: u64,
    pub skipped: u64,
    pub exit: ExitReason,
}

/// Loads the configuration, then opens the transport. Nothing is opened when
/// the configuration is missing or invalid.
pub async fn connect<T, F, Fut>(source: &ConfigSource, open: F) -> Result<(AppConfig, T)>
where
    F: FnOnce(&AppConfig) -> Fut,
    Fut: Future<Output = Result<T, TransportError>>,
{
    debug!("Loading configuration");
    let config = source.load().context("Failed to load configuration")?;
    let transport = open(&config).await.context("Failed to open transport")?;
    Ok((config, transport))
}

/// Resolves once `true` is sent. Never resolves if the sender goes away.
async fn cancelled(shutdown: &mut watch::Receiver<bool>) {
    loop {
        if *shutdown.borrow_and_update() {
            return;
        }
        if shutdown.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

/// The polling loop: acquire, transmit complete readings, sleep, repeat.
/// Owns the transport and closes it exactly once when the loop ends.
pub struct Forwarder<T: Transport> {
    transport: T,
    sensor: Box<dyn Sensor>,
    path: String,
    interval: Duration,
    verbose: bool,
    shutdown: watch::Receiver<bool>,
    published: u64,
    skipped: u64,
}

impl<T: Transport> Forwarder<T> {
    pub fn new(
        transport: T,
        sensor: Box<dyn Sensor>,
        path: String,
        interval: Duration,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            transport,
            sensor,
            path,
            interval,
            verbose: false,
            shutdown,
            published: 0,
            skipped: 0,
        }
    }

    pub fn verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    pub async fn run(mut self) -> Result<Summary> {
        info!(
            "Polling {} every {}s, publishing to {}",
            self.sensor.name(),
            self.interval.as_secs(),
            self.path
        );

        let outcome = self.poll_until_done().await;
        self.transport.close().await;

        let exit = outcome?;
        Ok(Summary {
            published: self.published,
            skipped: self.skipped,
            exit,
        })
    }

    async fn poll_until_done(&mut self) -> Result<ExitReason> {
        loop {
            if *self.shutdown.borrow() {
                return Ok(ExitReason::Interrupted);
            }

            let reading = tokio::select! {
                reading = self.sensor.acquire() => reading,
                _ = cancelled(&mut self.shutdown) => return Ok(ExitReason::Interrupted),
            };

            let Some(reading) = reading else {
                return Ok(ExitReason::Exhausted);
            };

            // Missing readings are expected: the sensor timing is not guaranteed.
            if reading.is_valid() {
                let payload = reading.to_json()?;
                let response = self
                    .transport
                    .publish(&self.path, payload.as_bytes())
                    .await
                    .context("Failed to publish reading")?;
                self.published += 1;

                if self.verbose {
                    info!(
                        "{} {} -> {}",
                        Local::now().format("%Y-%m-%d %H:%M:%S"),
                        reading,
                        response
                    );
                } else {
                    debug!("Sent {} -> {}", payload, response);
                }
            } else {
                self.skipped += 1;
                debug!("No complete reading, skipping ({})", reading);
            }

            tokio::select! {
                _ = tokio::time::sleep(self.interval) => {}
                _ = cancelled(&mut self.shutdown) => return Ok(ExitReason::Interrupted),
            }
        }
    }
}
