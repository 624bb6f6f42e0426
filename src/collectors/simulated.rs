use async_trait::async_trait;

use crate::collectors::sensor::Sensor;
use crate::models::SensorReading;

/// Stand-in used when no DHT22 is attached: always 20% / 25°C.
#[derive(Debug, Clone)]
pub struct Simulated {
    reading: SensorReading,
}

impl Default for Simulated {
    fn default() -> Self {
        Self {
            reading: SensorReading::complete(20.0, 25.0),
        }
    }
}

#[async_trait]
impl Sensor for Simulated {
    async fn acquire(&mut self) -> Option<SensorReading> {
        Some(self.reading)
    }

    fn name(&self) -> &'static str {
        "simulated"
    }
}
