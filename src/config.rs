use crate::prelude::*;

use serde::Deserialize;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

#[derive(Clone, Debug, Deserialize)]
pub struct Config {
    pub device: Device,

    #[serde(default)]
    pub poll: Poll,

    #[serde(default)]
    pub classifier: Classifier,

    #[serde(default)]
    pub recording: Recording,

    #[serde(default = "Config::default_loglevel")]
    pub loglevel: String,

    /// Optional path to append one JSON line per successful poll
    pub datalog_file: Option<String>,
}

// Device {{{
#[derive(Clone, Debug, Deserialize)]
pub struct Device {
    pub host: String,
    pub port: u16,

    pub wake_settle_ms: Option<u64>,
    pub request_settle_ms: Option<u64>,
    pub read_timeout_ms: Option<u64>,
    pub connect_timeout_ms: Option<u64>,
    pub use_tcp_nodelay: Option<bool>,
}
impl Device {
    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Time the device needs after the wake-up frame before it answers.
    pub fn wake_settle_ms(&self) -> u64 {
        self.wake_settle_ms.unwrap_or(5000)
    }

    /// Settle time between the wake-up acknowledgement and the read request.
    pub fn request_settle_ms(&self) -> u64 {
        self.request_settle_ms.unwrap_or(1000)
    }

    pub fn read_timeout_ms(&self) -> u64 {
        self.read_timeout_ms.unwrap_or(10_000)
    }

    pub fn connect_timeout_ms(&self) -> u64 {
        self.connect_timeout_ms.unwrap_or(10_000)
    }

    pub fn use_tcp_nodelay(&self) -> bool {
        self.use_tcp_nodelay.unwrap_or(true)
    }
} // }}}

// Poll {{{
#[derive(Clone, Debug, Deserialize)]
pub struct Poll {
    #[serde(default = "Config::default_interval_ms")]
    pub interval_ms: u64,

    /// Keep the last `history` polls for the accumulated PRPD view
    #[serde(default)]
    pub accumulate: bool,

    #[serde(default = "Config::default_history")]
    pub history: usize,
}
impl Default for Poll {
    fn default() -> Self {
        Self {
            interval_ms: Config::default_interval_ms(),
            accumulate: false,
            history: Config::default_history(),
        }
    }
}
impl Poll {
    pub fn interval_ms(&self) -> u64 {
        self.interval_ms
    }

    pub fn accumulate(&self) -> bool {
        self.accumulate
    }

    pub fn history(&self) -> usize {
        self.history
    }
} // }}}

// Classifier {{{
#[derive(Clone, Debug, Deserialize)]
pub struct Classifier {
    #[serde(default = "Config::default_enabled")]
    pub enabled: bool,

    #[serde(default = "Config::default_classifier_url")]
    pub url: String,

    pub timeout_ms: Option<u64>,
}
impl Default for Classifier {
    fn default() -> Self {
        Self {
            enabled: Config::default_enabled(),
            url: Config::default_classifier_url(),
            timeout_ms: None,
        }
    }
}
impl Classifier {
    pub fn enabled(&self) -> bool {
        self.enabled
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn timeout_ms(&self) -> u64 {
        self.timeout_ms.unwrap_or(30_000)
    }
} // }}}

// Recording {{{
#[derive(Clone, Debug, Default, Deserialize)]
pub struct Recording {
    /// Start recording as soon as the monitor starts
    #[serde(default)]
    pub enabled: bool,

    /// Where recorded rows are exported at shutdown
    pub csv_file: Option<String>,
}
impl Recording {
    pub fn enabled(&self) -> bool {
        self.enabled
    }

    pub fn csv_file(&self) -> Option<&str> {
        self.csv_file.as_deref()
    }
} // }}}

pub struct ConfigWrapper {
    config: Arc<Mutex<Config>>,
}

impl Clone for ConfigWrapper {
    fn clone(&self) -> Self {
        Self {
            config: self.config.clone(),
        }
    }
}

impl ConfigWrapper {
    pub fn new(file: String) -> Result<Self> {
        let config = Config::new(file)?;
        Ok(Self::from_config(config))
    }

    pub fn from_config(config: Config) -> Self {
        Self {
            config: Arc::new(Mutex::new(config)),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Config> {
        self.config.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn device(&self) -> Device {
        self.lock().device.clone()
    }

    pub fn poll(&self) -> Poll {
        self.lock().poll.clone()
    }

    /// Refresh rate changes made at runtime.
    pub fn set_interval_ms(&self, interval_ms: u64) {
        self.lock().poll.interval_ms = interval_ms;
    }

    pub fn classifier(&self) -> Classifier {
        self.lock().classifier.clone()
    }

    pub fn recording(&self) -> Recording {
        self.lock().recording.clone()
    }

    pub fn loglevel(&self) -> String {
        self.lock().loglevel.clone()
    }

    pub fn datalog_file(&self) -> Option<String> {
        self.lock().datalog_file.clone()
    }

    pub fn log_summary(&self) {
        self.lock().log_summary();
    }
}

impl Config {
    pub fn new(file: String) -> Result<Self> {
        let content = std::fs::read_to_string(&file)
            .map_err(|err| anyhow!("config.rs:error reading {}: {}", file, err))?;

        Self::from_yaml(&content)
    }

    pub fn from_yaml(content: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Logged once the logger is up, which is after the config is read.
    pub fn log_summary(&self) {
        info!("Configuration loaded successfully:");
        info!("  Device:");
        info!("    Host: {}", self.device.host);
        info!("    Port: {}", self.device.port);
        info!("    Wake Settle: {}ms", self.device.wake_settle_ms());
        info!("    Request Settle: {}ms", self.device.request_settle_ms());
        info!("    Read Timeout: {}ms", self.device.read_timeout_ms());
        info!("    TCP NoDelay: {}", self.device.use_tcp_nodelay());
        info!("  Poll Interval: {}ms", self.poll.interval_ms);
        info!(
            "  Accumulated PRPD: {} (history {})",
            if self.poll.accumulate { "enabled" } else { "disabled" },
            self.poll.history
        );
        info!("  Classifier: {}", if self.classifier.enabled { "enabled" } else { "disabled" });
        if self.classifier.enabled {
            info!("    URL: {}", self.classifier.url);
        }
        info!("  Recording: {}", if self.recording.enabled { "enabled" } else { "disabled" });
        if let Some(csv_file) = &self.recording.csv_file {
            info!("    CSV File: {}", csv_file);
        }
        if let Some(datalog_file) = &self.datalog_file {
            info!("  Datalog File: {}", datalog_file);
        }
        info!("  Log Level: {}", self.loglevel);
    }

    fn validate(&self) -> Result<()> {
        if self.device.port == 0 {
            bail!("device.port must be between 1 and 65535");
        }
        if self.device.host.is_empty() {
            return Err(anyhow!("config.rs:Device host cannot be empty"));
        }
        if self.device.read_timeout_ms() == 0 {
            return Err(anyhow!("config.rs:Invalid read timeout: 0"));
        }
        if self.device.connect_timeout_ms() == 0 {
            return Err(anyhow!("config.rs:Invalid connect timeout: 0"));
        }

        if self.poll.interval_ms == 0 {
            bail!("poll.interval_ms must be greater than 0");
        }
        if self.poll.history == 0 {
            bail!("poll.history must be at least 1");
        }

        if self.classifier.enabled {
            if let Err(e) = url::Url::parse(&self.classifier.url) {
                return Err(anyhow!("config.rs:Invalid classifier URL: {}", e));
            }
        }

        if self.recording.enabled && self.recording.csv_file.is_none() {
            bail!("recording.csv_file is required when recording is enabled");
        }

        Ok(())
    }

    fn default_enabled() -> bool {
        true
    }

    fn default_loglevel() -> String {
        "info".to_string()
    }

    fn default_interval_ms() -> u64 {
        1000
    }

    fn default_history() -> usize {
        5
    }

    fn default_classifier_url() -> String {
        "http://127.0.0.1:9000/api/v1/predict".to_string()
    }
}
