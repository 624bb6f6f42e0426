use config::{Config, File, FileFormat};
use log::{debug, info, LevelFilter};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

pub mod editor;

/// Template written to disk when no config file exists yet.
pub const BUNDLED_TEMPLATE: &str = include_str!("../../config.ini.example");

pub const DEFAULT_CONFIG_FILE: &str = "config.ini";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("No config file at {0} and no template to create it from")]
    Missing(PathBuf),

    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error("Failed to create {path} from template: {source}")]
    Seed {
        path: PathBuf,
        source: std::io::Error,
    },
}

fn default_read_attempts() -> u32 {
    15
}

fn default_retry_delay() -> u64 {
    2
}

fn default_ack_timeout() -> u64 {
    2
}

fn default_max_retransmit() -> u32 {
    4
}

fn default_log_level() -> String {
    "info".to_string()
}

/// The `[custom]` section: where to send readings and how often.
#[derive(Debug, Deserialize, Clone)]
pub struct DeviceConfig {
    #[serde(default)]
    pub device_auth_token: String,
    pub host: String,
    port: i64,
    gpio_pin: i64,
    sleep_interval: i64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

/// Retry policy of the live DHT22 driver.
#[derive(Debug, Deserialize, Clone)]
pub struct SensorConfig {
    #[serde(default = "default_read_attempts")]
    pub read_attempts: u32,
    #[serde(default = "default_retry_delay")]
    pub retry_delay: u64,
}

impl Default for SensorConfig {
    fn default() -> Self {
        Self {
            read_attempts: default_read_attempts(),
            retry_delay: default_retry_delay(),
        }
    }
}

impl SensorConfig {
    pub fn retry_delay(&self) -> Duration {
        Duration::from_secs(self.retry_delay)
    }
}

/// Confirmable message transmission parameters (RFC 7252 §4.8).
#[derive(Debug, Deserialize, Clone)]
pub struct CoapConfig {
    #[serde(default = "default_ack_timeout")]
    pub ack_timeout: u64,
    #[serde(default = "default_max_retransmit")]
    pub max_retransmit: u32,
}

impl Default for CoapConfig {
    fn default() -> Self {
        Self {
            ack_timeout: default_ack_timeout(),
            max_retransmit: default_max_retransmit(),
        }
    }
}

impl CoapConfig {
    pub fn ack_timeout(&self) -> Duration {
        Duration::from_secs(self.ack_timeout.max(1))
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub custom: DeviceConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub sensor: SensorConfig,
    #[serde(default)]
    pub coap: CoapConfig,
}

#[derive(Debug, Deserialize, Default)]
struct LoggingOnly {
    #[serde(default)]
    logging: LoggingConfig,
}

fn level_filter(level: &str) -> LevelFilter {
    match level.to_lowercase().as_str() {
        "trace" => LevelFilter::Trace,
        "debug" => LevelFilter::Debug,
        "info" => LevelFilter::Info,
        "warn" => LevelFilter::Warn,
        "error" => LevelFilter::Error,
        "off" => LevelFilter::Off,
        _ => LevelFilter::Info, // Default to Info if invalid
    }
}

fn read_ini(path: &Path) -> Result<Config, config::ConfigError> {
    Config::builder()
        .add_source(File::from(path).format(FileFormat::Ini))
        .build()
}

impl AppConfig {
    #[cfg(test)]
    fn get_log_level(&self) -> LevelFilter {
        level_filter(&self.logging.level)
    }

    /// Reads only `[logging] level`, so the logger can be set up before the
    /// rest of the file is validated.
    pub fn peek_log_level<P: AsRef<Path>>(path: P) -> LevelFilter {
        read_ini(path.as_ref())
            .and_then(|c| c.try_deserialize::<LoggingOnly>())
            .map(|l| level_filter(&l.logging.level))
            .unwrap_or(LevelFilter::Info)
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let config_path = path.as_ref();
        debug!("Loading configuration from {}", config_path.display());

        if !config_path.exists() {
            return Err(ConfigError::Missing(config_path.to_path_buf()));
        }

        let app_config: AppConfig = read_ini(config_path)
            .and_then(|c| c.try_deserialize())
            .map_err(|e| ConfigError::Invalid(format!("{}: {}", config_path.display(), e)))?;

        app_config.validate()?;
        Ok(app_config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.custom.device_auth_token.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "Device auth token not present, please update config.ini by running rpicoap --edit"
                    .to_string(),
            ));
        }
        if self.custom.host.trim().is_empty() {
            return Err(ConfigError::Invalid("host must not be empty".to_string()));
        }
        if !(1..=i64::from(u16::MAX)).contains(&self.custom.port) {
            return Err(ConfigError::Invalid(format!(
                "port {} must be between 1 and 65535",
                self.custom.port
            )));
        }
        if u32::try_from(self.custom.gpio_pin).is_err() {
            return Err(ConfigError::Invalid(format!(
                "gpio_pin {} must not be negative",
                self.custom.gpio_pin
            )));
        }
        Ok(())
    }

    #[cfg(test)]
    fn auth_token(&self) -> &str {
        &self.custom.device_auth_token
    }

    pub fn port(&self) -> u16 {
        // Range checked in `validate`.
        self.custom.port as u16
    }

    pub fn gpio_pin(&self) -> u32 {
        self.custom.gpio_pin as u32
    }

    /// Telemetry resource for this device on the platform.
    pub fn path(&self) -> String {
        format!("api/v1/{}/telemetry", self.custom.device_auth_token)
    }

    /// Never polls faster than once per second.
    pub fn sleep_interval(&self) -> Duration {
        Duration::from_secs(self.custom.sleep_interval.max(1) as u64)
    }
}

#[derive(Debug, Clone)]
pub enum Template {
    File(PathBuf),
    Bundled(&'static str),
}

/// Location of the persisted config file plus the template used to create it.
#[derive(Debug, Clone)]
pub struct ConfigSource {
    path: PathBuf,
    template: Option<Template>,
}

impl ConfigSource {
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        Self {
            path: path.into(),
            template: None,
        }
    }

    pub fn with_template(mut self, template: Template) -> Self {
        self.template = Some(template);
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Creates the config file from the template if it does not exist yet.
    /// Returns true when a new file was written.
    pub fn ensure_exists(&self) -> Result<bool, ConfigError> {
        if self.path.exists() {
            return Ok(false);
        }

        let seed_err = |source| ConfigError::Seed {
            path: self.path.clone(),
            source,
        };

        match &self.template {
            Some(Template::File(template)) if template.exists() => {
                fs::copy(template, &self.path).map_err(seed_err)?;
            }
            Some(Template::Bundled(contents)) => {
                fs::write(&self.path, contents).map_err(seed_err)?;
            }
            _ => return Err(ConfigError::Missing(self.path.clone())),
        }

        info!("Created config.ini at {}", self.path.display());
        Ok(true)
    }

    pub fn load(&self) -> Result<AppConfig, ConfigError> {
        self.ensure_exists()?;
        AppConfig::from_file(&self.path)
    }
}
