use async_trait::async_trait;
use log::{debug, info, warn};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use crate::collectors::sensor::{Sensor, SensorError};
use crate::config::SensorConfig;
use crate::models::SensorReading;
use crate::utils::sysfs;

pub const IIO_ROOT: &str = "/sys/bus/iio/devices";
const DRIVER: &str = "dht11";

/// DHT22/AM2302 read through the kernel `dht11` IIO driver.
#[derive(Debug)]
pub struct Dht22 {
    device: PathBuf,
    read_attempts: u32,
    retry_delay: Duration,
}

impl Dht22 {
    pub fn discover(gpio_pin: u32, config: &SensorConfig) -> Result<Self, SensorError> {
        Self::discover_in(Path::new(IIO_ROOT), gpio_pin, config)
    }

    /// Picks the `dht11` device bound to `gpio_pin`, or the first one found
    /// when none of them names its pin.
    pub fn discover_in(root: &Path, gpio_pin: u32, config: &SensorConfig) -> Result<Self, SensorError> {
        let candidates = sysfs::find_iio_devices(root, DRIVER);
        let suffix = format!("@{:x}", gpio_pin);

        let device = candidates
            .iter()
            .find(|dev| sysfs::of_node_name(dev).is_some_and(|n| n.ends_with(&suffix)))
            .or_else(|| candidates.first())
            .cloned()
            .ok_or_else(|| SensorError::DeviceNotFound(root.display().to_string()))?;

        info!("DHT22: using {} for GPIO {}", device.display(), gpio_pin);

        Ok(Self {
            device,
            read_attempts: config.read_attempts.max(1),
            retry_delay: config.retry_delay(),
        })
    }

    /// One sysfs read, moved onto the blocking pool. The driver holds the
    /// `read` until the sensor answers or times out.
    async fn read_blocking(&self) -> Option<SensorReading> {
        let device = self.device.clone();
        match tokio::task::spawn_blocking(move || read_once(&device)).await {
            Ok(reading) => reading,
            Err(e) => {
                warn!("DHT22: read task failed: {}", e);
                None
            }
        }
    }
}

fn read_once(device: &Path) -> Option<SensorReading> {
    let humidity = sysfs::read_milli(&device.join("in_humidityrelative_input"))?;
    let temperature = sysfs::read_milli(&device.join("in_temp_input"))?;
    Some(SensorReading::complete(humidity, temperature))
}

#[async_trait]
impl Sensor for Dht22 {
    async fn acquire(&mut self) -> Option<SensorReading> {
        let start = Instant::now();

        for attempt in 1..=self.read_attempts {
            if let Some(reading) = self.read_blocking().await {
                debug!(
                    "DHT22 read on attempt {} took: {} ms",
                    attempt,
                    start.elapsed().as_millis()
                );
                return Some(reading);
            }
            if attempt < self.read_attempts {
                tokio::time::sleep(self.retry_delay).await;
            }
        }

        warn!("DHT22: no data after {} attempts", self.read_attempts);
        Some(SensorReading::empty())
    }

    fn name(&self) -> &'static str {
        "DHT22"
    }
}
