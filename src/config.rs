use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::str::FromStr;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub intervals: IntervalsConfig,
    pub retention: RetentionConfig,
    pub paths: PathsConfig,
    pub logging: LoggingConfig,
    pub api: ApiConfig,
}

/// Remote collector. Empty url or `offline = true` disables delivery.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub url: String,
    pub contract_number: String,
    pub offline: bool,
    pub timeout_secs: u64,
    pub max_retries: u32,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            contract_number: String::new(),
            offline: true,
            timeout_secs: 30,
            max_retries: 10,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct IntervalsConfig {
    /// Seconds between samples.
    pub collection_secs: u64,
    /// How often closed hourly windows are rolled up.
    pub aggregation_secs: u64,
    /// How often pending aggregates are (re)sent.
    pub delivery_secs: u64,
}

impl Default for IntervalsConfig {
    fn default() -> Self {
        Self {
            collection_secs: 60,
            aggregation_secs: 3600,
            delivery_secs: 300,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetentionConfig {
    pub raw_days: u32,
    pub aggregate_days: u32,
    /// Only unsent aggregates newer than this are delivered.
    pub pending_days: u32,
    /// Optional cron expression for the sweep (e.g. "0 0 3 * * *" = 03:00 daily). Uses local time.
    pub cleanup_schedule: Option<String>,
    /// Sweep every N seconds when cleanup_schedule is not set.
    pub cleanup_interval_secs: u64,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            raw_days: 30,
            aggregate_days: 365,
            pending_days: 30,
            cleanup_schedule: None,
            cleanup_interval_secs: 86_400,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    pub database: String,
    pub log: Option<String>,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            database: "run/devmon.db".into(),
            log: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
        }
    }
}

/// Read-only HTTP reporting API.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub enabled: bool,
    pub host: String,
    pub port: u16,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            host: "127.0.0.1".into(),
            port: 8787,
        }
    }
}

/// Command-line overrides applied after the file is loaded.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub offline: bool,
    pub verbose: bool,
    pub log_level: Option<String>,
}

impl AppConfig {
    /// Loads the first config file found (explicit path, `DEVMON_CONFIG`, then the
    /// default locations). No file at all yields defaults.
    pub fn load(explicit: Option<&Path>, overrides: &Overrides) -> anyhow::Result<Self> {
        let path = match explicit {
            Some(p) => Some(p.to_path_buf()),
            None => Self::search_paths().into_iter().find(|p| p.is_file()),
        };
        let mut config = match path {
            Some(p) => {
                let s = std::fs::read_to_string(&p)
                    .map_err(|e| anyhow::anyhow!("config {}: {}", p.display(), e))?;
                toml::from_str(&s)
                    .map_err(|e| anyhow::anyhow!("config {}: {}", p.display(), e))?
            }
            None => AppConfig::default(),
        };
        config.apply(overrides);
        config.validate()?;
        Ok(config)
    }

    /// Parse and validate config from a string (e.g. for tests).
    pub fn load_from_str(s: &str) -> anyhow::Result<Self> {
        let config: AppConfig = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    pub fn search_paths() -> Vec<PathBuf> {
        let mut paths = Vec::new();
        if let Ok(p) = std::env::var("DEVMON_CONFIG") {
            paths.push(PathBuf::from(p));
        }
        paths.push(PathBuf::from("config.toml"));
        if let Ok(home) = std::env::var("HOME") {
            paths.push(Path::new(&home).join(".devmon").join("config.toml"));
        }
        paths.push(PathBuf::from("/etc/devmon/config.toml"));
        paths
    }

    pub fn apply(&mut self, overrides: &Overrides) {
        if overrides.offline {
            self.server.url.clear();
            self.server.contract_number.clear();
            self.server.offline = true;
        }
        if let Some(level) = &overrides.log_level {
            self.logging.level = level.to_lowercase();
        } else if overrides.verbose {
            self.logging.level = "debug".into();
        }
    }

    /// True when delivery is short-circuited.
    pub fn is_offline(&self) -> bool {
        self.server.offline || self.server.url.trim().is_empty()
    }

    fn validate(&self) -> anyhow::Result<()> {
        if !self.is_offline() {
            anyhow::ensure!(
                self.server.url.starts_with("http://") || self.server.url.starts_with("https://"),
                "server.url must be an http(s) URL, got {:?}",
                self.server.url
            );
        }
        anyhow::ensure!(
            self.server.timeout_secs > 0,
            "server.timeout_secs must be > 0, got {}",
            self.server.timeout_secs
        );
        anyhow::ensure!(
            self.server.max_retries > 0,
            "server.max_retries must be > 0, got {}",
            self.server.max_retries
        );
        anyhow::ensure!(
            self.intervals.collection_secs > 0,
            "intervals.collection_secs must be > 0, got {}",
            self.intervals.collection_secs
        );
        anyhow::ensure!(
            self.intervals.aggregation_secs > 0,
            "intervals.aggregation_secs must be > 0, got {}",
            self.intervals.aggregation_secs
        );
        anyhow::ensure!(
            self.intervals.delivery_secs > 0,
            "intervals.delivery_secs must be > 0, got {}",
            self.intervals.delivery_secs
        );
        anyhow::ensure!(
            self.retention.raw_days > 0,
            "retention.raw_days must be > 0, got {}",
            self.retention.raw_days
        );
        anyhow::ensure!(
            self.retention.aggregate_days > 0,
            "retention.aggregate_days must be > 0, got {}",
            self.retention.aggregate_days
        );
        anyhow::ensure!(
            self.retention.pending_days > 0,
            "retention.pending_days must be > 0, got {}",
            self.retention.pending_days
        );
        anyhow::ensure!(
            self.retention.cleanup_interval_secs > 0,
            "retention.cleanup_interval_secs must be > 0, got {}",
            self.retention.cleanup_interval_secs
        );
        if let Some(expr) = &self.retention.cleanup_schedule {
            anyhow::ensure!(
                cron::Schedule::from_str(expr).is_ok(),
                "retention.cleanup_schedule is not a valid cron expression: {:?}",
                expr
            );
        }
        anyhow::ensure!(
            !self.paths.database.is_empty(),
            "paths.database must be non-empty"
        );
        anyhow::ensure!(
            matches!(
                self.logging.level.to_lowercase().as_str(),
                "trace" | "debug" | "info" | "warn" | "warning" | "error" | "critical"
            ),
            "logging.level must be one of trace/debug/info/warn/error, got {:?}",
            self.logging.level
        );
        if self.api.enabled {
            anyhow::ensure!(
                self.api.port > 0,
                "api.port must be between 1 and 65535, got {}",
                self.api.port
            );
        }
        Ok(())
    }

    /// tracing filter directive for the configured level.
    pub fn log_directive(&self) -> &'static str {
        match self.logging.level.to_lowercase().as_str() {
            "trace" => "trace",
            "debug" => "debug",
            "warn" | "warning" => "warn",
            "error" | "critical" => "error",
            _ => "info",
        }
    }
}
