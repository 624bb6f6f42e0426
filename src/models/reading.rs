use serde::Serialize;
use std::fmt;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ReadingError {
    #[error("Reading is incomplete and cannot be sent")]
    Incomplete,

    #[error("JSON encoding failed: {0}")]
    Json(#[from] serde_json::Error),
}

/// One humidity/temperature sample. Either field may be missing when the
/// sensor could not be read; such readings are never transmitted.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct SensorReading {
    pub humidity: Option<f64>,
    pub temperature: Option<f64>,
}

#[derive(Serialize)]
struct Payload {
    humidity: f64,
    temperature: f64,
}

impl SensorReading {
    pub fn new(humidity: Option<f64>, temperature: Option<f64>) -> Self {
        Self {
            humidity,
            temperature,
        }
    }

    pub fn complete(humidity: f64, temperature: f64) -> Self {
        Self::new(Some(humidity), Some(temperature))
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn is_valid(&self) -> bool {
        self.humidity.is_some() && self.temperature.is_some()
    }

    /// Renders `{"humidity":..,"temperature":..}`. Refuses partial readings.
    pub fn to_json(&self) -> Result<String, ReadingError> {
        match (self.humidity, self.temperature) {
            (Some(humidity), Some(temperature)) => Ok(serde_json::to_string(&Payload {
                humidity,
                temperature,
            })?),
            _ => Err(ReadingError::Incomplete),
        }
    }
}

impl fmt::Display for SensorReading {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.humidity {
            Some(h) => write!(f, "Humidity={:.1}%", h)?,
            None => write!(f, "Humidity=n/a")?,
        }
        match self.temperature {
            Some(t) => write!(f, " Temp={:.1}*C", t),
            None => write!(f, " Temp=n/a"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;

    #[test]
    fn test_validity_requires_both_fields() {
        assert!(SensorReading::complete(20.0, 25.0).is_valid());
        assert!(!SensorReading::new(Some(20.0), None).is_valid());
        assert!(!SensorReading::new(None, Some(25.0)).is_valid());
        assert!(!SensorReading::empty().is_valid());
    }

    #[test]
    fn test_json_has_exactly_two_keys() {
        let json = SensorReading::complete(48.3, -2.5).to_json().unwrap();
        let value: Value = serde_json::from_str(&json).unwrap();
        let object = value.as_object().unwrap();

        assert_eq!(object.len(), 2);
        assert_eq!(object["humidity"].as_f64(), Some(48.3));
        assert_eq!(object["temperature"].as_f64(), Some(-2.5));
    }

    #[test]
    fn test_partial_reading_is_not_serialized() {
        let result = SensorReading::new(Some(55.0), None).to_json();
        assert!(matches!(result, Err(ReadingError::Incomplete)));
    }

    #[test]
    fn test_display_uses_one_decimal() {
        let reading = SensorReading::complete(41.26, 22.04);
        assert_eq!(reading.to_string(), "Humidity=41.3% Temp=22.0*C");
    }
}
