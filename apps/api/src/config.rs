// Process configuration
//
// Settings come from the environment, with `.env` loaded first. Only the
// oracle API key is required; everything else has a default.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::agents::errors::{AgentError, AgentResult};
use crate::agents::messages::DEFAULT_MESSAGE_RETENTION;
use crate::agents::recovery::{RecoveryConfig, DEFAULT_MAX_ATTEMPTS};
use crate::agents::state::DEFAULT_STATE_TTL;

pub const DEFAULT_ORACLE_MODEL: &str = "claude-sonnet-4-20250514";
pub const DEFAULT_BIND_ADDR: &str = "0.0.0.0:3000";

/// Tunables handed to every run
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub recovery: RecoveryConfig,
    pub message_retention: Duration,
    pub state_ttl: Duration,
    pub command_timeout: Duration,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            recovery: RecoveryConfig::default(),
            message_retention: DEFAULT_MESSAGE_RETENTION,
            state_ttl: DEFAULT_STATE_TTL,
            command_timeout: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Settings {
    /// Absent means runs are kept in memory
    pub database_url: Option<String>,
    pub anthropic_api_key: String,
    pub oracle_model: String,
    pub bind_addr: SocketAddr,
    pub workspace_root: PathBuf,
    pub runtime: RuntimeConfig,
}

impl Settings {
    /// Load `.env`, then read settings from the process environment
    pub fn from_env() -> AgentResult<Self> {
        dotenv::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read settings through an arbitrary lookup function
    pub fn from_lookup<F>(lookup: F) -> AgentResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let anthropic_api_key = get("ANTHROPIC_API_KEY")
            .ok_or_else(|| AgentError::ConfigError("ANTHROPIC_API_KEY is not set".to_string()))?;

        let runtime = RuntimeConfig {
            recovery: RecoveryConfig {
                max_attempts: parse(&get, "MAX_RECOVERY_ATTEMPTS", DEFAULT_MAX_ATTEMPTS)?,
                backoff_unit: Duration::from_millis(parse(&get, "BACKOFF_UNIT_MS", 1000u64)?),
            },
            message_retention: Duration::from_secs(parse(
                &get,
                "MESSAGE_RETENTION_SECS",
                DEFAULT_MESSAGE_RETENTION.as_secs(),
            )?),
            state_ttl: Duration::from_secs(parse(&get, "STATE_TTL_SECS", DEFAULT_STATE_TTL.as_secs())?),
            command_timeout: Duration::from_secs(parse(&get, "COMMAND_TIMEOUT_SECS", 30u64)?),
        };

        if runtime.recovery.max_attempts == 0 {
            return Err(AgentError::ConfigError(
                "MAX_RECOVERY_ATTEMPTS must be at least 1".to_string(),
            ));
        }

        Ok(Self {
            database_url: get("DATABASE_URL"),
            anthropic_api_key,
            oracle_model: get("ORACLE_MODEL").unwrap_or_else(|| DEFAULT_ORACLE_MODEL.to_string()),
            bind_addr: parse(&get, "BIND_ADDR", SocketAddr::from(([0, 0, 0, 0], 3000)))?,
            workspace_root: get("WORKSPACE_ROOT")
                .map(PathBuf::from)
                .unwrap_or_else(|| std::env::temp_dir().join("crewline")),
            runtime,
        })
    }
}

fn parse<T, G>(get: &G, key: &str, default: T) -> AgentResult<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    G: Fn(&str) -> Option<String>,
{
    match get(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|e| AgentError::ConfigError(format!("invalid {key} '{raw}': {e}"))),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_apply_when_only_key_is_set() {
        let settings = Settings::from_lookup(lookup(&[("ANTHROPIC_API_KEY", "sk-test")])).unwrap();

        assert!(settings.database_url.is_none());
        assert_eq!(settings.oracle_model, DEFAULT_ORACLE_MODEL);
        assert_eq!(settings.bind_addr.to_string(), DEFAULT_BIND_ADDR);
        assert_eq!(settings.runtime.recovery.max_attempts, 3);
        assert_eq!(settings.runtime.recovery.backoff_unit, Duration::from_secs(1));
        assert_eq!(settings.runtime.message_retention, Duration::from_secs(86_400));
        assert_eq!(settings.runtime.state_ttl, Duration::from_secs(7_200));
        assert_eq!(settings.runtime.command_timeout, Duration::from_secs(30));
    }

    #[test]
    fn missing_api_key_is_config_error() {
        let err = Settings::from_lookup(lookup(&[])).unwrap_err();
        assert!(matches!(err, AgentError::ConfigError(_)));
    }

    #[test]
    fn overrides_are_parsed() {
        let settings = Settings::from_lookup(lookup(&[
            ("ANTHROPIC_API_KEY", "sk-test"),
            ("DATABASE_URL", "postgres://localhost/crewline"),
            ("BIND_ADDR", "127.0.0.1:8080"),
            ("MAX_RECOVERY_ATTEMPTS", "5"),
            ("BACKOFF_UNIT_MS", "10"),
        ]))
        .unwrap();

        assert_eq!(settings.database_url.as_deref(), Some("postgres://localhost/crewline"));
        assert_eq!(settings.bind_addr.port(), 8080);
        assert_eq!(settings.runtime.recovery.max_attempts, 5);
        assert_eq!(settings.runtime.recovery.backoff_unit, Duration::from_millis(10));
    }

    #[test]
    fn invalid_numbers_are_rejected() {
        let err = Settings::from_lookup(lookup(&[
            ("ANTHROPIC_API_KEY", "sk-test"),
            ("MAX_RECOVERY_ATTEMPTS", "many"),
        ]))
        .unwrap_err();
        assert!(err.to_string().contains("MAX_RECOVERY_ATTEMPTS"));

        let err = Settings::from_lookup(lookup(&[
            ("ANTHROPIC_API_KEY", "sk-test"),
            ("MAX_RECOVERY_ATTEMPTS", "0"),
        ]))
        .unwrap_err();
        assert!(matches!(err, AgentError::ConfigError(_)));
    }
}
