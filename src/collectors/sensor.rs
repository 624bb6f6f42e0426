use async_trait::async_trait;
use thiserror::Error;

use crate::models::SensorReading;

#[derive(Debug, Error)]
pub enum SensorError {
    #[error("No DHT22 device found under {0}")]
    DeviceNotFound(String),

    #[error("Failed to read replay file {path}: {source}")]
    ReplayFile {
        path: String,
        source: std::io::Error,
    },
}

/// Something that produces one reading per polling cycle.
#[async_trait]
pub trait Sensor: Send {
    /// Returns the next reading, possibly incomplete. `None` means the source
    /// is exhausted and polling should stop.
    async fn acquire(&mut self) -> Option<SensorReading>;

    /// Human-readable name for this source
    fn name(&self) -> &'static str;
}
