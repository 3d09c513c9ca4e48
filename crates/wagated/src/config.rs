//! Daemon configuration.
//!
//! Values are layered: built-in defaults, then an optional TOML file, then
//! environment variables, then CLI flags (applied by the binary). Every
//! section uses `#[serde(default)]`, so a file only needs the keys it
//! changes. Durations are humantime strings ("5s", "2m").

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use wagate_core::retry::humantime_serde;
use wagate_core::{DomainError, RetryPolicy};

/// Environment variables read by [`Config::apply_env`].
pub const ENV_PORT: &str = "PORT";
pub const ENV_HOST: &str = "HOST";
pub const ENV_ENVIRONMENT: &str = "WAGATE_ENV";
pub const ENV_AUTH_DIR: &str = "WAGATE_AUTH_DIR";
pub const ENV_WORKER_CMD: &str = "WAGATE_WORKER_CMD";

// ============================================================================
// Top Level
// ============================================================================

/// Complete daemon configuration.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub environment: Environment,
    pub auth: AuthConfig,
    pub reaper: ReaperConfig,
    pub retry: RetryPolicy,
    pub lifecycle: LifecycleConfig,
    pub worker: WorkerConfig,
    pub monitor: MonitorConfig,
}

impl Config {
    /// Loads the file at `path`, or defaults when no path is given.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        match path {
            Some(path) => {
                let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
                    path: path.to_path_buf(),
                    source: e,
                })?;
                Self::from_toml(&content)
            }
            None => Ok(Self::default()),
        }
    }

    /// Parses configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] for malformed TOML or unknown values.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    /// Applies environment overrides using `lookup` to read variables.
    ///
    /// Taking a lookup function keeps tests away from the process
    /// environment; the binary passes `|k| std::env::var(k).ok()`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidEnv`] for values that do not parse.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(port) = lookup(ENV_PORT) {
            self.server.port = port.trim().parse().map_err(|_| ConfigError::InvalidEnv {
                var: ENV_PORT,
                value: port.clone(),
                reason: "expected a port number",
            })?;
        }
        if let Some(host) = lookup(ENV_HOST).filter(|h| !h.trim().is_empty()) {
            self.server.host = host.trim().to_string();
        }
        if let Some(env) = lookup(ENV_ENVIRONMENT) {
            self.environment = Environment::parse(&env).ok_or(ConfigError::InvalidEnv {
                var: ENV_ENVIRONMENT,
                value: env.clone(),
                reason: "expected \"production\" or \"development\"",
            })?;
        }
        if let Some(dir) = lookup(ENV_AUTH_DIR).filter(|d| !d.trim().is_empty()) {
            self.auth.dir = PathBuf::from(dir.trim());
        }
        if let Some(cmd) = lookup(ENV_WORKER_CMD) {
            let mut parts = cmd.split_whitespace().map(str::to_string);
            let command = parts.next().ok_or(ConfigError::InvalidEnv {
                var: ENV_WORKER_CMD,
                value: cmd.clone(),
                reason: "expected a command",
            })?;
            self.worker.command = command;
            self.worker.args = parts.collect();
        }
        Ok(())
    }

    /// Checks values that would leave the daemon unable to recover.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] describing the first bad value.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.retry.validate()?;
        if self.lifecycle.init_timeout.is_zero() {
            return Err(
                DomainError::invalid("lifecycle.init_timeout", "0s", "a positive duration").into(),
            );
        }
        if self.lifecycle.watchdog_timeout.is_zero() {
            return Err(
                DomainError::invalid("lifecycle.watchdog_timeout", "0s", "a positive duration").into(),
            );
        }
        if self.worker.command.trim().is_empty() {
            return Err(DomainError::invalid("worker.command", "\"\"", "a command").into());
        }
        if self.auth.client_id.trim().is_empty() {
            return Err(DomainError::invalid("auth.client_id", "\"\"", "a non-empty id").into());
        }
        Ok(())
    }

    /// Whether orphaned browser processes are killed before attempts.
    ///
    /// Unset means "only in production", where the daemon owns the host.
    #[must_use]
    pub fn reaper_enabled(&self) -> bool {
        self.reaper
            .enabled
            .unwrap_or_else(|| self.environment.is_production())
    }

    /// `host:port` for the HTTP listener.
    #[must_use]
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}

// ============================================================================
// Sections
// ============================================================================

/// Deployment environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    Production,
    #[default]
    Development,
}

impl Environment {
    /// Accepts "production"/"prod" and "development"/"dev", any case.
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "production" | "prod" => Some(Self::Production),
            "development" | "dev" => Some(Self::Development),
            _ => None,
        }
    }

    pub fn is_production(self) -> bool {
        self == Self::Production
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Production => "production",
            Self::Development => "development",
        }
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// HTTP listener.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
        }
    }
}

/// Credential directory layout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Root of the persisted credentials.
    pub dir: PathBuf,
    /// Session id; the worker stores its bundle in `session-<client_id>`.
    pub client_id: String,
    /// Fewer entries than this in the session directory means a broken bundle.
    pub min_session_entries: usize,
    /// Sentinel file that purges never delete.
    pub keep_file: String,
    /// Operator-created file that forces a full purge on the next attempt.
    pub restart_marker: String,
    /// Where the latest login challenge is written.
    pub qr_file: String,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("./auth_data"),
            client_id: "whatsapp-bot".to_string(),
            min_session_entries: 1,
            keep_file: ".gitkeep".to_string(),
            restart_marker: "RESTART".to_string(),
            qr_file: "latest-qr.txt".to_string(),
        }
    }
}

/// Orphaned browser process cleanup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReaperConfig {
    /// `None` enables the reaper in production only.
    pub enabled: Option<bool>,
    /// Process name substrings to kill.
    pub process_names: Vec<String>,
    /// Upper bound on one sweep.
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
}

impl Default for ReaperConfig {
    fn default() -> Self {
        Self {
            enabled: None,
            process_names: vec!["chrome".to_string()],
            timeout: Duration::from_secs(10),
        }
    }
}

/// Timers of the initialization sequence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LifecycleConfig {
    /// Hard deadline for one connect call.
    #[serde(with = "humantime_serde")]
    pub init_timeout: Duration,
    /// Pause after reaping so killed processes release memory.
    #[serde(with = "humantime_serde")]
    pub settle_delay: Duration,
    /// Maximum time between `Authenticated` and `Ready`.
    #[serde(with = "humantime_serde")]
    pub watchdog_timeout: Duration,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            init_timeout: Duration::from_secs(300),
            settle_delay: Duration::from_secs(3),
            watchdog_timeout: Duration::from_secs(120),
        }
    }
}

/// The browser worker process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    pub command: String,
    pub args: Vec<String>,
    /// Flags handed to the browser (via `WAGATE_BROWSER_ARGS`).
    pub browser_args: Vec<String>,
    /// Browser binary; the worker's bundled one when unset.
    pub browser_executable: Option<PathBuf>,
    /// How long `shutdown` may take before the worker is killed.
    #[serde(with = "humantime_serde")]
    pub shutdown_grace: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        let browser_args = [
            "--no-sandbox",
            "--disable-setuid-sandbox",
            "--disable-dev-shm-usage",
            "--disable-accelerated-2d-canvas",
            "--no-first-run",
            "--disable-gpu",
            "--disable-extensions",
            "--disable-software-rasterizer",
            "--js-flags=--max-old-space-size=256",
        ];
        Self {
            command: "node".to_string(),
            args: vec!["worker/index.js".to_string()],
            browser_args: browser_args.iter().map(|s| (*s).to_string()).collect(),
            browser_executable: None,
            shutdown_grace: Duration::from_secs(5),
        }
    }
}

/// Resource sampling.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    #[serde(with = "humantime_serde")]
    pub interval: Duration,
    /// Combined daemon + worker resident memory that triggers a warning.
    pub memory_warn_mb: u64,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(60),
            memory_warn_mb: 768,
        }
    }
}

// ============================================================================
// Errors
// ============================================================================

/// Configuration error.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read configuration file {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse configuration: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid value for {var}={value:?}: {reason}")]
    InvalidEnv {
        var: &'static str,
        value: String,
        reason: &'static str,
    },

    #[error("configuration validation failed: {0}")]
    Invalid(#[from] DomainError),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.server.port, 3000);
        assert_eq!(config.environment, Environment::Development);
        assert_eq!(config.auth.keep_file, ".gitkeep");
        assert_eq!(config.lifecycle.init_timeout, Duration::from_secs(300));
        assert_eq!(config.retry.max_attempts, 5);
        assert!(!config.reaper_enabled());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = Config::from_toml(
            r#"
            environment = "production"

            [server]
            port = 8080

            [lifecycle]
            watchdog_timeout = "90s"

            [retry]
            max_attempts = 3
            "#,
        )
        .unwrap();

        assert_eq!(config.server.port, 8080);
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.lifecycle.watchdog_timeout, Duration::from_secs(90));
        assert_eq!(config.lifecycle.settle_delay, Duration::from_secs(3));
        assert_eq!(config.retry.max_attempts, 3);
        assert!(config.reaper_enabled());
    }

    #[test]
    fn test_env_overrides() {
        let mut config = Config::default();
        config
            .apply_env(env(&[
                ("PORT", "4100"),
                ("WAGATE_ENV", "PROD"),
                ("WAGATE_AUTH_DIR", "/var/lib/wagate"),
                ("WAGATE_WORKER_CMD", "bun run worker.ts --verbose"),
            ]))
            .unwrap();

        assert_eq!(config.server.port, 4100);
        assert!(config.environment.is_production());
        assert_eq!(config.auth.dir, PathBuf::from("/var/lib/wagate"));
        assert_eq!(config.worker.command, "bun");
        assert_eq!(config.worker.args, vec!["run", "worker.ts", "--verbose"]);
    }

    #[test]
    fn test_bad_env_value() {
        let mut config = Config::default();
        let err = config.apply_env(env(&[("PORT", "eighty")])).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidEnv { var: "PORT", .. }));
        assert_eq!(config.server.port, 3000);
    }

    #[test]
    fn test_validate_rejects_zero_budget() {
        let mut config = Config::default();
        config.retry.max_attempts = 0;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        let mut config = Config::default();
        config.lifecycle.watchdog_timeout = Duration::ZERO;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_reaper_explicit_override() {
        let mut config = Config::default();
        config.reaper.enabled = Some(true);
        assert!(config.reaper_enabled());
        config.environment = Environment::Production;
        config.reaper.enabled = Some(false);
        assert!(!config.reaper_enabled());
    }

    #[test]
    fn test_load_missing_file() {
        let err = Config::load(Some(Path::new("/nonexistent/wagate.toml"))).unwrap_err();
        assert!(err.to_string().contains("/nonexistent/wagate.toml"));
    }
}
