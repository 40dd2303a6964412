use clap::Parser;
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

use crate::services::query_analyzer::AnalysisConfig;
use crate::services::query_analyzer::aggregator::TimeGranularity;

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub logging: LoggingConfig,
    pub analysis: AnalysisConfig,
    pub cluster: ClusterConfig,
    pub sessions: SessionStoreConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Largest accepted request body in MiB
    pub body_limit_mb: usize,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub file: Option<String>,
}

/// Defaults for the Couchbase query service connection
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ClusterConfig {
    /// Query service base URL, e.g. `http://127.0.0.1:8093`
    pub query_url: String,
    pub username: String,
    pub password: String,
    #[serde(deserialize_with = "deserialize_duration_secs")]
    pub timeout_secs: u64,
    /// Statement run when a fetch request names none
    pub completed_requests_statement: String,
}

/// In-memory snapshot storage
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SessionStoreConfig {
    pub max_sessions: usize,
    #[serde(deserialize_with = "deserialize_duration_secs")]
    pub ttl_secs: u64,
}

/// Command line arguments
#[derive(Parser, Debug, Clone, Default)]
#[command(name = "cb-query-analyzer")]
#[command(version, about = "Couchbase completed-request analyzer")]
pub struct CommandLineArgs {
    /// Path to configuration file
    #[arg(long, value_name = "PATH")]
    pub config: Option<String>,

    /// Server host (overrides config file)
    #[arg(long, value_name = "HOST")]
    pub server_host: Option<String>,

    /// Server port (overrides config file)
    #[arg(long, value_name = "PORT")]
    pub server_port: Option<u16>,

    /// Logging level (overrides config file, e.g., "info,cb_query_analyzer=debug")
    #[arg(long, value_name = "LEVEL")]
    pub log_level: Option<String>,

    /// Time bucket granularity: minute, hour or day
    #[arg(long, value_name = "GRANULARITY")]
    pub time_granularity: Option<TimeGranularity>,

    /// Plan walk depth cap
    #[arg(long, value_name = "DEPTH")]
    pub max_plan_depth: Option<usize>,

    /// Query service base URL (overrides config file)
    #[arg(long, value_name = "URL")]
    pub query_url: Option<String>,

    /// Analyze this completed_requests dump offline instead of serving HTTP
    #[arg(long, value_name = "FILE")]
    pub requests: Option<PathBuf>,

    /// Index metadata JSON for offline analysis
    #[arg(long, value_name = "FILE", requires = "requests")]
    pub indexes: Option<PathBuf>,

    /// Schema inference JSON for offline analysis
    #[arg(long, value_name = "FILE", requires = "requests")]
    pub schema: Option<PathBuf>,

    /// Write the offline snapshot here instead of stdout
    #[arg(long, value_name = "FILE", requires = "requests")]
    pub output: Option<PathBuf>,
}

impl Config {
    /// Load configuration
    ///
    /// Priority from highest to lowest:
    /// 1. Command line arguments
    /// 2. Environment variables (prefixed with APP_, `.env` honored)
    /// 3. Configuration file (config.toml)
    /// 4. Default values
    pub fn load(cli_args: &CommandLineArgs) -> Result<Self, anyhow::Error> {
        let config_path = cli_args.config.clone().or_else(Self::find_config_file);
        let mut config = if let Some(config_path) = config_path {
            Self::from_toml(&config_path)?
        } else {
            tracing::warn!("Configuration file not found, using defaults");
            Config::default()
        };

        config.apply_env_overrides();
        config.apply_cli_overrides(cli_args);
        config.validate()?;

        Ok(config)
    }

    /// Apply environment variable overrides
    ///
    /// Supported environment variables:
    /// - APP_SERVER_HOST / APP_SERVER_PORT
    /// - APP_LOG_LEVEL
    /// - APP_TIME_GRANULARITY: minute, hour or day
    /// - APP_MAX_PLAN_DEPTH
    /// - APP_QUERY_URL / APP_QUERY_USERNAME / APP_QUERY_PASSWORD
    /// - APP_QUERY_TIMEOUT: seconds, or "30s", "2m"
    /// - APP_SESSION_TTL: seconds, or "1h"
    fn apply_env_overrides(&mut self) {
        if let Ok(host) = std::env::var("APP_SERVER_HOST") {
            self.server.host = host;
            tracing::info!("Override server.host from env: {}", self.server.host);
        }

        if let Ok(port) = std::env::var("APP_SERVER_PORT")
            && let Ok(port) = port.parse()
        {
            self.server.port = port;
            tracing::info!("Override server.port from env: {}", self.server.port);
        }

        if let Ok(level) = std::env::var("APP_LOG_LEVEL") {
            self.logging.level = level;
            tracing::info!("Override logging.level from env: {}", self.logging.level);
        }

        if let Ok(granularity) = std::env::var("APP_TIME_GRANULARITY") {
            match granularity.parse() {
                Ok(val) => {
                    self.analysis.time_granularity = val;
                    tracing::info!("Override analysis.time_granularity from env: {}", val);
                },
                Err(e) => tracing::warn!("Invalid APP_TIME_GRANULARITY '{}': {}", granularity, e),
            }
        }

        if let Ok(depth) = std::env::var("APP_MAX_PLAN_DEPTH")
            && let Ok(depth) = depth.parse()
        {
            self.analysis.max_plan_depth = depth;
            tracing::info!("Override analysis.max_plan_depth from env: {}", depth);
        }

        if let Ok(url) = std::env::var("APP_QUERY_URL") {
            self.cluster.query_url = url;
            tracing::info!("Override cluster.query_url from env: {}", self.cluster.query_url);
        }

        if let Ok(username) = std::env::var("APP_QUERY_USERNAME") {
            self.cluster.username = username;
            tracing::info!("Override cluster.username from env");
        }

        if let Ok(password) = std::env::var("APP_QUERY_PASSWORD") {
            self.cluster.password = password;
            tracing::info!("Override cluster.password from env");
        }

        if let Ok(timeout) = std::env::var("APP_QUERY_TIMEOUT") {
            match parse_duration_to_secs(&timeout) {
                Ok(val) => {
                    self.cluster.timeout_secs = val;
                    tracing::info!("Override cluster.timeout_secs from env: {}", val);
                },
                Err(e) => tracing::warn!(
                    "Invalid APP_QUERY_TIMEOUT '{}': {} (keep {})",
                    timeout,
                    e,
                    self.cluster.timeout_secs
                ),
            }
        }

        if let Ok(ttl) = std::env::var("APP_SESSION_TTL") {
            match parse_duration_to_secs(&ttl) {
                Ok(val) => {
                    self.sessions.ttl_secs = val;
                    tracing::info!("Override sessions.ttl_secs from env: {}", val);
                },
                Err(e) => tracing::warn!(
                    "Invalid APP_SESSION_TTL '{}': {} (keep {})",
                    ttl,
                    e,
                    self.sessions.ttl_secs
                ),
            }
        }
    }

    fn apply_cli_overrides(&mut self, args: &CommandLineArgs) {
        if let Some(host) = &args.server_host {
            self.server.host = host.clone();
            tracing::info!("Override server.host from CLI: {}", self.server.host);
        }

        if let Some(port) = args.server_port {
            self.server.port = port;
            tracing::info!("Override server.port from CLI: {}", self.server.port);
        }

        if let Some(level) = &args.log_level {
            self.logging.level = level.clone();
            tracing::info!("Override logging.level from CLI: {}", self.logging.level);
        }

        if let Some(granularity) = args.time_granularity {
            self.analysis.time_granularity = granularity;
            tracing::info!("Override analysis.time_granularity from CLI: {}", granularity);
        }

        if let Some(depth) = args.max_plan_depth {
            self.analysis.max_plan_depth = depth;
            tracing::info!("Override analysis.max_plan_depth from CLI: {}", depth);
        }

        if let Some(url) = &args.query_url {
            self.cluster.query_url = url.clone();
            tracing::info!("Override cluster.query_url from CLI: {}", self.cluster.query_url);
        }
    }

    pub fn validate(&self) -> Result<(), anyhow::Error> {
        if self.server.port == 0 {
            anyhow::bail!("Server port cannot be 0");
        }
        if self.server.body_limit_mb == 0 {
            anyhow::bail!("server.body_limit_mb must be > 0");
        }

        if let Err(e) = self.analysis.validate() {
            anyhow::bail!("Invalid analysis configuration: {}", e);
        }

        if !self.cluster.query_url.starts_with("http://")
            && !self.cluster.query_url.starts_with("https://")
        {
            anyhow::bail!("cluster.query_url must start with http:// or https://");
        }
        if self.cluster.timeout_secs == 0 {
            anyhow::bail!("cluster.timeout_secs must be > 0");
        }

        if self.sessions.max_sessions == 0 {
            anyhow::bail!("sessions.max_sessions must be > 0");
        }
        if self.sessions.ttl_secs == 0 {
            anyhow::bail!("sessions.ttl_secs must be > 0");
        }

        Ok(())
    }

    fn find_config_file() -> Option<String> {
        let possible_paths =
            ["conf/config.toml", "config.toml", "./conf/config.toml", "./config.toml"];

        for path in &possible_paths {
            if Path::new(path).exists() {
                return Some(path.to_string());
            }
        }
        None
    }

    fn from_toml(path: &str) -> Result<Self, anyhow::Error> {
        let content = fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, anyhow::Error> {
        let config: Config = toml::from_str(content)?;
        Ok(config)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { host: "0.0.0.0".to_string(), port: 8080, body_limit_mb: 256 }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info,cb_query_analyzer=debug".to_string(),
            file: Some("logs/cb-query-analyzer.log".to_string()),
        }
    }
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            query_url: "http://127.0.0.1:8093".to_string(),
            username: "Administrator".to_string(),
            password: String::new(),
            timeout_secs: 75,
            completed_requests_statement:
                "SELECT *, meta().plan FROM system:completed_requests".to_string(),
        }
    }
}

impl Default for SessionStoreConfig {
    fn default() -> Self {
        Self { max_sessions: 32, ttl_secs: 6 * 60 * 60 }
    }
}

// =========================
// Helpers for parsing values
// =========================

fn parse_duration_to_secs(input: &str) -> Result<u64, String> {
    if let Ok(val) = input.parse::<u64>() {
        return Ok(val);
    }

    let s = input.trim().to_lowercase();
    let (num_str, unit) = s.split_at(s.chars().take_while(|c| c.is_ascii_digit()).count());
    if num_str.is_empty() || unit.is_empty() {
        return Err("missing number or unit".into());
    }
    let n: u64 = num_str.parse().map_err(|_| "invalid number".to_string())?;
    match unit {
        "s" | "sec" | "secs" | "second" | "seconds" => Ok(n),
        "m" | "min" | "mins" | "minute" | "minutes" => Ok(n * 60),
        "h" | "hr" | "hour" | "hours" => Ok(n * 60 * 60),
        "d" | "day" | "days" => Ok(n * 60 * 60 * 24),
        _ => Err(format!("unsupported unit: {}", unit)),
    }
}

/// Accepts a number of seconds or a string like "30s", "5m", "1h"
fn deserialize_duration_secs<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: serde::Deserializer<'de>,
{
    struct Visitor;
    impl<'de> serde::de::Visitor<'de> for Visitor {
        type Value = u64;
        fn expecting(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
            write!(f, "a number of seconds or a string like '30s', '5m', '1h'")
        }
        fn visit_u64<E>(self, v: u64) -> Result<Self::Value, E> {
            Ok(v)
        }
        fn visit_i64<E>(self, v: i64) -> Result<Self::Value, E>
        where
            E: serde::de::Error,
        {
            if v >= 0 { Ok(v as u64) } else { Err(E::custom("negative not allowed")) }
        }
        fn visit_str<E>(self, v: &str) -> Result<Self::Value, E>
        where
            E: serde::de::Error,
        {
            parse_duration_to_secs(v).map_err(E::custom)
        }
    }
    deserializer.deserialize_any(Visitor)
}
