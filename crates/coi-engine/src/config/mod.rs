use std::env;
use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use crate::compliance::lifecycle::AutoApplyMode;
use crate::compliance::reminders::{ReminderSchedule, DEFAULT_MAX_ATTEMPTS};

/// Distinguishes runtime behavior for different stages of the service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppEnvironment {
    Development,
    Test,
    Production,
}

impl AppEnvironment {
    fn from_str(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "prod" | "production" => Self::Production,
            "test" | "ci" => Self::Test,
            _ => Self::Development,
        }
    }
}

/// Top-level configuration for the application.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub environment: AppEnvironment,
    pub server: ServerConfig,
    pub telemetry: TelemetryConfig,
    pub compliance: ComplianceConfig,
    pub scheduler: SchedulerConfig,
}

impl AppConfig {
    pub fn load() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let environment = AppEnvironment::from_str(
            &env::var("APP_ENV").unwrap_or_else(|_| "development".to_string()),
        );

        let host = env::var("APP_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
        let port = env::var("APP_PORT")
            .unwrap_or_else(|_| "3000".to_string())
            .parse::<u16>()
            .map_err(|_| ConfigError::InvalidPort)?;

        let log_level = env::var("APP_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());

        let auto_apply = match env::var("COI_AUTO_APPLY") {
            Ok(raw) => AutoApplyMode::parse(&raw).ok_or(ConfigError::InvalidAutoApply(raw))?,
            Err(_) => AutoApplyMode::default(),
        };

        let interval_secs = env::var("COI_SWEEP_INTERVAL_SECS")
            .unwrap_or_else(|_| "3600".to_string())
            .parse::<u64>()
            .ok()
            .filter(|secs| *secs > 0)
            .ok_or(ConfigError::InvalidSweepInterval)?;

        let thresholds = parse_thresholds(
            &env::var("COI_REMINDER_THRESHOLDS").unwrap_or_else(|_| "30,15,7".to_string()),
        )?;

        let max_attempts = match env::var("COI_REMINDER_MAX_ATTEMPTS") {
            Ok(raw) => raw
                .trim()
                .parse::<u32>()
                .ok()
                .filter(|attempts| *attempts > 0)
                .ok_or(ConfigError::InvalidMaxAttempts)?,
            Err(_) => DEFAULT_MAX_ATTEMPTS,
        };

        Ok(Self {
            environment,
            server: ServerConfig { host, port },
            telemetry: TelemetryConfig { log_level },
            compliance: ComplianceConfig { auto_apply },
            scheduler: SchedulerConfig {
                interval: Duration::from_secs(interval_secs),
                thresholds,
                max_attempts,
            },
        })
    }
}

/// Parse a comma-separated day list such as `30,15,7` into a descending, deduplicated set.
fn parse_thresholds(raw: &str) -> Result<Vec<u32>, ConfigError> {
    let mut thresholds = Vec::new();
    for part in raw.split(',').map(str::trim).filter(|part| !part.is_empty()) {
        match part.parse::<u32>() {
            Ok(days) if days > 0 => thresholds.push(days),
            _ => return Err(ConfigError::InvalidThresholds(raw.to_string())),
        }
    }

    if thresholds.is_empty() {
        return Err(ConfigError::InvalidThresholds(raw.to_string()));
    }

    thresholds.sort_unstable_by(|left, right| right.cmp(left));
    thresholds.dedup();
    Ok(thresholds)
}

/// Settings controlling the HTTP server binding.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl ServerConfig {
    pub fn socket_addr(&self) -> Result<SocketAddr, ConfigError> {
        if self.host.eq_ignore_ascii_case("localhost") {
            return Ok(SocketAddr::new(IpAddr::from([127, 0, 0, 1]), self.port));
        }

        let ip: IpAddr = self
            .host
            .parse()
            .map_err(|source| ConfigError::InvalidHost { source })?;

        Ok(SocketAddr::new(ip, self.port))
    }
}

/// Tracing and metrics controls.
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    pub log_level: String,
}

/// How evaluation verdicts are applied on submission.
#[derive(Debug, Clone, Copy)]
pub struct ComplianceConfig {
    pub auto_apply: AutoApplyMode,
}

/// Cadence and reminder settings for the background expiry jobs.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub interval: Duration,
    pub thresholds: Vec<u32>,
    pub max_attempts: u32,
}

impl SchedulerConfig {
    pub fn schedule(&self) -> ReminderSchedule {
        ReminderSchedule::new(self.thresholds.iter().copied(), self.max_attempts)
    }
}

#[derive(Debug)]
pub enum ConfigError {
    InvalidPort,
    InvalidHost { source: std::net::AddrParseError },
    InvalidAutoApply(String),
    InvalidSweepInterval,
    InvalidThresholds(String),
    InvalidMaxAttempts,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::InvalidPort => write!(f, "APP_PORT must be a valid u16"),
            ConfigError::InvalidHost { .. } => {
                write!(f, "APP_HOST must parse to an IPv4 or IPv6 address")
            }
            ConfigError::InvalidAutoApply(value) => write!(
                f,
                "COI_AUTO_APPLY '{value}' must be advisory, approve_passing, or approve_and_reject"
            ),
            ConfigError::InvalidSweepInterval => {
                write!(f, "COI_SWEEP_INTERVAL_SECS must be a positive number of seconds")
            }
            ConfigError::InvalidThresholds(value) => write!(
                f,
                "COI_REMINDER_THRESHOLDS '{value}' must list positive day counts, e.g. 30,15,7"
            ),
            ConfigError::InvalidMaxAttempts => {
                write!(f, "COI_REMINDER_MAX_ATTEMPTS must be a positive integer")
            }
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::InvalidHost { source } => Some(source),
            ConfigError::InvalidPort
            | ConfigError::InvalidAutoApply(_)
            | ConfigError::InvalidSweepInterval
            | ConfigError::InvalidThresholds(_)
            | ConfigError::InvalidMaxAttempts => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;
    use std::sync::{Mutex, OnceLock};

    fn env_guard() -> &'static Mutex<()> {
        static GUARD: OnceLock<Mutex<()>> = OnceLock::new();
        GUARD.get_or_init(|| Mutex::new(()))
    }

    fn reset_env() {
        env::remove_var("APP_ENV");
        env::remove_var("APP_HOST");
        env::remove_var("APP_PORT");
        env::remove_var("APP_LOG_LEVEL");
        env::remove_var("COI_AUTO_APPLY");
        env::remove_var("COI_SWEEP_INTERVAL_SECS");
        env::remove_var("COI_REMINDER_THRESHOLDS");
        env::remove_var("COI_REMINDER_MAX_ATTEMPTS");
    }

    #[test]
    fn load_uses_defaults_when_env_missing() {
        let _lock = env_guard().lock().expect("env mutex poisoned");
        reset_env();
        let config = AppConfig::load().expect("config loads with defaults");
        assert_eq!(config.environment, AppEnvironment::Development);
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.server.port, 3000);
        assert_eq!(config.telemetry.log_level, "info");
        assert_eq!(config.compliance.auto_apply, AutoApplyMode::Advisory);
        assert_eq!(config.scheduler.interval, Duration::from_secs(3600));
        assert_eq!(config.scheduler.thresholds, vec![30, 15, 7]);
        assert_eq!(config.scheduler.max_attempts, 3);
    }

    #[test]
    fn accepts_localhost_host() {
        let _lock = env_guard().lock().expect("env mutex poisoned");
        reset_env();
        env::set_var("APP_HOST", "localhost");
        let config = AppConfig::load().expect("config loads");
        let addr = config.server.socket_addr().expect("localhost resolves");
        assert_eq!(addr, SocketAddr::new(IpAddr::from([127, 0, 0, 1]), 3000));
    }

    #[test]
    fn reads_compliance_and_scheduler_overrides() {
        let _lock = env_guard().lock().expect("env mutex poisoned");
        reset_env();
        env::set_var("COI_AUTO_APPLY", "approve_passing");
        env::set_var("COI_SWEEP_INTERVAL_SECS", "120");
        env::set_var("COI_REMINDER_THRESHOLDS", "7, 60,30,7");
        env::set_var("COI_REMINDER_MAX_ATTEMPTS", "5");
        let config = AppConfig::load().expect("config loads");
        reset_env();

        assert_eq!(config.compliance.auto_apply, AutoApplyMode::ApprovePassing);
        assert_eq!(config.scheduler.interval, Duration::from_secs(120));
        assert_eq!(config.scheduler.thresholds, vec![60, 30, 7]);
        assert_eq!(config.scheduler.schedule().max_attempts(), 5);
    }

    #[test]
    fn rejects_zero_or_empty_thresholds() {
        let _lock = env_guard().lock().expect("env mutex poisoned");
        reset_env();
        for raw in ["30,0,7", "", " , ", "soon"] {
            env::set_var("COI_REMINDER_THRESHOLDS", raw);
            match AppConfig::load() {
                Err(ConfigError::InvalidThresholds(value)) => assert_eq!(value, raw),
                other => panic!("expected threshold error for {raw:?}, got {other:?}"),
            }
        }
        reset_env();
    }

    #[test]
    fn rejects_unknown_auto_apply_mode() {
        let _lock = env_guard().lock().expect("env mutex poisoned");
        reset_env();
        env::set_var("COI_AUTO_APPLY", "always");
        let result = AppConfig::load();
        reset_env();

        assert!(matches!(result, Err(ConfigError::InvalidAutoApply(value)) if value == "always"));
    }

    #[test]
    fn rejects_invalid_port() {
        let _lock = env_guard().lock().expect("env mutex poisoned");
        reset_env();
        env::set_var("APP_PORT", "not-a-port");
        let result = AppConfig::load();
        reset_env();

        assert!(matches!(result, Err(ConfigError::InvalidPort)));
    }
}
