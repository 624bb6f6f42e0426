use async_trait::async_trait;
use log::{debug, info};
use std::fs;
use std::path::Path;
use std::time::Instant;

use crate::collectors::sensor::{Sensor, SensorError};
use crate::models::SensorReading;

/// Readings replayed from a `humidity,temperature` file, one per cycle.
#[derive(Debug)]
pub struct ReplaySource {
    rows: std::vec::IntoIter<SensorReading>,
}

impl ReplaySource {
    pub fn from_path(path: &Path) -> Result<Self, SensorError> {
        let start = Instant::now();
        let text = fs::read_to_string(path).map_err(|source| SensorError::ReplayFile {
            path: path.display().to_string(),
            source,
        })?;
        let source = Self::from_text(&text);
        info!(
            "Replaying {} rows from {}",
            source.rows.len(),
            path.display()
        );
        debug!("ReplaySource::from_path took: {} ms", start.elapsed().as_millis());
        Ok(source)
    }

    pub fn from_text(text: &str) -> Self {
        // Leading blank lines carry no readings.
        let mut lines = text.lines().skip_while(|line| line.trim().is_empty()).peekable();

        if lines.peek().is_some_and(|first| is_header(first)) {
            lines.next();
        }

        let rows: Vec<SensorReading> = lines.map(parse_row).collect();
        Self {
            rows: rows.into_iter(),
        }
    }
}

fn parse_field(field: &str) -> Option<f64> {
    field.trim().parse::<f64>().ok().filter(|v| v.is_finite())
}

/// The first row is a header when some field holds text that is not a
/// number. Empty fields only make a row partial.
fn is_header(line: &str) -> bool {
    line.split(',').map(str::trim).any(|field| {
        !field.is_empty() && field.parse::<f64>().is_err()
    })
}

fn parse_row(line: &str) -> SensorReading {
    let values: Vec<&str> = line.split(',').collect();
    if values.len() != 2 {
        return SensorReading::empty();
    }
    SensorReading::new(parse_field(values[0]), parse_field(values[1]))
}

#[async_trait]
impl Sensor for ReplaySource {
    async fn acquire(&mut self) -> Option<SensorReading> {
        self.rows.next()
    }

    fn name(&self) -> &'static str {
        "replay"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    async fn drain(mut source: ReplaySource) -> Vec<SensorReading> {
        let mut out = Vec::new();
        while let Some(reading) = source.acquire().await {
            out.push(reading);
        }
        out
    }

    #[tokio::test]
    async fn test_header_is_skipped() {
        let source = ReplaySource::from_text("humidity,temperature\n20.0,25.0\n41.5,19.25\n");

        let rows = drain(source).await;

        assert_eq!(
            rows,
            vec![
                SensorReading::complete(20.0, 25.0),
                SensorReading::complete(41.5, 19.25)
            ]
        );
    }

    #[tokio::test]
    async fn test_numeric_first_row_is_data() {
        let rows = drain(ReplaySource::from_text("20.0,25.0\r\n")).await;
        assert_eq!(rows, vec![SensorReading::complete(20.0, 25.0)]);
    }

    #[tokio::test]
    async fn test_header_after_blank_lines() {
        let rows = drain(ReplaySource::from_text("\n  \nhumidity,temperature\n20.0,25.0\n")).await;
        assert_eq!(rows, vec![SensorReading::complete(20.0, 25.0)]);
    }

    #[tokio::test]
    async fn test_partial_first_row_is_data() {
        let rows = drain(ReplaySource::from_text("20.0,\n30.0,22.0\n")).await;

        assert_eq!(rows.len(), 2);
        assert!(!rows[0].is_valid());
        assert_eq!(rows[1], SensorReading::complete(30.0, 22.0));
    }

    #[tokio::test]
    async fn test_missing_rows_do_not_stop_the_stream() {
        let rows = drain(ReplaySource::from_text("20.0,25.0\nNaN,NaN\n\nabc,1\n30,22\n")).await;

        assert_eq!(rows.len(), 5);
        assert!(rows[0].is_valid());
        assert!(!rows[1].is_valid());
        assert!(!rows[2].is_valid());
        assert!(!rows[3].is_valid());
        assert_eq!(rows[4], SensorReading::complete(30.0, 22.0));
    }

    #[tokio::test]
    async fn test_from_path() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(b"h,t\n55.5,18.0\n").unwrap();

        let rows = drain(ReplaySource::from_path(file.path()).unwrap()).await;

        assert_eq!(rows, vec![SensorReading::complete(55.5, 18.0)]);
    }

    #[test]
    fn test_unreadable_file() {
        let result = ReplaySource::from_path(Path::new("/nonexistent/readings.csv"));
        assert!(matches!(result, Err(SensorError::ReplayFile { .. })));
    }
}
