use secrecy::SecretString;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use tracing::Level;
use vpe_core::polling::{
    DEFAULT_CHAT_TIMEOUT, DEFAULT_FEEDBACK_TIMEOUT, DEFAULT_POLL_INTERVAL, PollPolicy,
};
use vpe_core::session::DEFAULT_MIN_TURNS;

/// How long a session may go unused before it is discarded.
pub const DEFAULT_SESSION_IDLE_TIMEOUT: Duration = Duration::from_secs(30 * 60);

/// A custom error type for configuration loading failures.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingVar(String),
    #[error("Invalid value for environment variable {0}: {1}")]
    InvalidValue(String, String),
}

/// Holds all configuration loaded from the environment at startup.
#[derive(Clone, Debug)]
pub struct Config {
    pub bind_address: SocketAddr,
    pub openai_api_key: SecretString,
    pub openai_api_base: String,
    pub log_level: Level,
    /// Optional JSON encounter directory replacing the built-in one.
    pub encounters_path: Option<PathBuf>,
    pub poll_interval: Duration,
    pub chat_timeout: Duration,
    pub feedback_timeout: Duration,
    pub min_turns_for_feedback: usize,
    pub session_idle_timeout: Duration,
}

fn parse_var<T: FromStr>(name: &str, default: T) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|e| ConfigError::InvalidValue(name.to_string(), e.to_string())),
        Err(_) => Ok(default),
    }
}

fn parse_secs(name: &str, default: Duration) -> Result<Duration, ConfigError> {
    let secs = parse_var(name, default.as_secs())?;
    if secs == 0 {
        return Err(ConfigError::InvalidValue(
            name.to_string(),
            "must be at least 1 second".to_string(),
        ));
    }
    Ok(Duration::from_secs(secs))
}

impl Config {
    /// Loads configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        // Only load from .env in non-test mode to avoid contamination
        if !cfg!(test) {
            dotenvy::dotenv().ok();
        }

        let bind_address_str =
            std::env::var("BIND_ADDRESS").unwrap_or_else(|_| "0.0.0.0:3000".to_string());
        let bind_address = bind_address_str
            .parse::<SocketAddr>()
            .map_err(|e| ConfigError::InvalidValue("BIND_ADDRESS".to_string(), e.to_string()))?;

        let openai_api_key = std::env::var("OPENAI_API_KEY")
            .ok()
            .filter(|key| !key.trim().is_empty())
            .map(SecretString::from)
            .ok_or_else(|| ConfigError::MissingVar("OPENAI_API_KEY".to_string()))?;
        let openai_api_base = std::env::var("OPENAI_API_BASE")
            .unwrap_or_else(|_| "https://api.openai.com/v1".to_string());

        let log_level_str = std::env::var("RUST_LOG").unwrap_or_else(|_| "INFO".to_string());
        let log_level = log_level_str.parse::<Level>().map_err(|_| {
            ConfigError::InvalidValue(
                "RUST_LOG".to_string(),
                format!("'{}' is not a valid log level", log_level_str),
            )
        })?;

        let encounters_path = std::env::var("ENCOUNTERS_PATH").ok().map(PathBuf::from);

        let poll_interval = parse_secs("POLL_INTERVAL_SECS", DEFAULT_POLL_INTERVAL)?;
        let chat_timeout = parse_secs("CHAT_TIMEOUT_SECS", DEFAULT_CHAT_TIMEOUT)?;
        let feedback_timeout = parse_secs("FEEDBACK_TIMEOUT_SECS", DEFAULT_FEEDBACK_TIMEOUT)?;
        let min_turns_for_feedback = parse_var("MIN_TURNS_FOR_FEEDBACK", DEFAULT_MIN_TURNS)?;
        let session_idle_timeout =
            parse_secs("SESSION_IDLE_TIMEOUT_SECS", DEFAULT_SESSION_IDLE_TIMEOUT)?;

        Ok(Self {
            bind_address,
            openai_api_key,
            openai_api_base,
            log_level,
            encounters_path,
            poll_interval,
            chat_timeout,
            feedback_timeout,
            min_turns_for_feedback,
            session_idle_timeout,
        })
    }

    pub fn chat_policy(&self) -> PollPolicy {
        PollPolicy::new(self.poll_interval, self.chat_timeout)
    }

    pub fn feedback_policy(&self) -> PollPolicy {
        PollPolicy::new(self.poll_interval, self.feedback_timeout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::ExposeSecret;
    use serial_test::serial;
    use std::env;

    fn clear_env_vars() {
        unsafe {
            env::remove_var("BIND_ADDRESS");
            env::remove_var("OPENAI_API_KEY");
            env::remove_var("OPENAI_API_BASE");
            env::remove_var("RUST_LOG");
            env::remove_var("ENCOUNTERS_PATH");
            env::remove_var("POLL_INTERVAL_SECS");
            env::remove_var("CHAT_TIMEOUT_SECS");
            env::remove_var("FEEDBACK_TIMEOUT_SECS");
            env::remove_var("MIN_TURNS_FOR_FEEDBACK");
            env::remove_var("SESSION_IDLE_TIMEOUT_SECS");
        }
    }

    fn set_minimal_env() {
        unsafe {
            env::set_var("OPENAI_API_KEY", "test-openai-key");
        }
    }

    #[test]
    fn test_config_error_display() {
        let missing_var = ConfigError::MissingVar("TEST_VAR".to_string());
        assert_eq!(
            format!("{}", missing_var),
            "Missing environment variable: TEST_VAR"
        );

        let invalid_value =
            ConfigError::InvalidValue("TEST_VAR".to_string(), "bad_value".to_string());
        assert_eq!(
            format!("{}", invalid_value),
            "Invalid value for environment variable TEST_VAR: bad_value"
        );
    }

    #[test]
    #[serial]
    fn test_config_from_env_defaults() {
        clear_env_vars();
        set_minimal_env();

        let config = Config::from_env().expect("Config should load successfully");

        assert_eq!(config.bind_address.to_string(), "0.0.0.0:3000");
        assert_eq!(config.openai_api_key.expose_secret(), "test-openai-key");
        assert_eq!(config.openai_api_base, "https://api.openai.com/v1");
        assert_eq!(config.log_level, Level::INFO);
        assert_eq!(config.encounters_path, None);
        assert_eq!(config.chat_policy(), PollPolicy::chat());
        assert_eq!(config.feedback_policy(), PollPolicy::feedback());
        assert_eq!(config.min_turns_for_feedback, 5);
        assert_eq!(config.session_idle_timeout, Duration::from_secs(1800));
    }

    #[test]
    #[serial]
    fn test_config_from_env_custom_values() {
        clear_env_vars();
        unsafe {
            env::set_var("BIND_ADDRESS", "127.0.0.1:8080");
            env::set_var("OPENAI_API_KEY", "custom-openai-key");
            env::set_var("OPENAI_API_BASE", "http://localhost:9999/v1");
            env::set_var("RUST_LOG", "debug");
            env::set_var("ENCOUNTERS_PATH", "/etc/vpe/encounters.json");
            env::set_var("POLL_INTERVAL_SECS", "1");
            env::set_var("CHAT_TIMEOUT_SECS", "30");
            env::set_var("FEEDBACK_TIMEOUT_SECS", "300");
            env::set_var("MIN_TURNS_FOR_FEEDBACK", "3");
            env::set_var("SESSION_IDLE_TIMEOUT_SECS", "600");
        }

        let config = Config::from_env().expect("Config should load successfully");

        assert_eq!(config.bind_address.to_string(), "127.0.0.1:8080");
        assert_eq!(config.openai_api_base, "http://localhost:9999/v1");
        assert_eq!(config.log_level, Level::DEBUG);
        assert_eq!(
            config.encounters_path,
            Some(PathBuf::from("/etc/vpe/encounters.json"))
        );
        assert_eq!(
            config.chat_policy(),
            PollPolicy::new(Duration::from_secs(1), Duration::from_secs(30))
        );
        assert_eq!(config.feedback_timeout, Duration::from_secs(300));
        assert_eq!(config.min_turns_for_feedback, 3);
        assert_eq!(config.session_idle_timeout, Duration::from_secs(600));
    }

    #[test]
    #[serial]
    fn test_config_missing_openai_key() {
        clear_env_vars();

        let err = Config::from_env().unwrap_err();
        match err {
            ConfigError::MissingVar(msg) => assert!(msg.contains("OPENAI_API_KEY")),
            _ => panic!("Expected MissingVar for OPENAI_API_KEY"),
        }
    }

    #[test]
    #[serial]
    fn test_config_blank_openai_key_is_missing() {
        clear_env_vars();
        unsafe {
            env::set_var("OPENAI_API_KEY", "   ");
        }

        assert!(matches!(
            Config::from_env().unwrap_err(),
            ConfigError::MissingVar(_)
        ));
    }

    #[test]
    #[serial]
    fn test_config_invalid_bind_address() {
        clear_env_vars();
        set_minimal_env();
        unsafe {
            env::set_var("BIND_ADDRESS", "not-a-valid-address");
        }

        let err = Config::from_env().unwrap_err();
        match err {
            ConfigError::InvalidValue(var, _) => assert_eq!(var, "BIND_ADDRESS"),
            _ => panic!("Expected InvalidValue for BIND_ADDRESS"),
        }
    }

    #[test]
    #[serial]
    fn test_config_invalid_log_level() {
        clear_env_vars();
        set_minimal_env();
        unsafe {
            env::set_var("RUST_LOG", "not-a-level");
        }

        let err = Config::from_env().unwrap_err();
        match err {
            ConfigError::InvalidValue(var, _) => assert_eq!(var, "RUST_LOG"),
            _ => panic!("Expected InvalidValue for RUST_LOG"),
        }
    }

    #[test]
    #[serial]
    fn test_config_rejects_zero_and_garbage_timeouts() {
        clear_env_vars();
        set_minimal_env();
        unsafe {
            env::set_var("CHAT_TIMEOUT_SECS", "0");
        }
        match Config::from_env().unwrap_err() {
            ConfigError::InvalidValue(var, _) => assert_eq!(var, "CHAT_TIMEOUT_SECS"),
            _ => panic!("Expected InvalidValue for CHAT_TIMEOUT_SECS"),
        }

        unsafe {
            env::remove_var("CHAT_TIMEOUT_SECS");
            env::set_var("FEEDBACK_TIMEOUT_SECS", "three minutes");
        }
        match Config::from_env().unwrap_err() {
            ConfigError::InvalidValue(var, _) => assert_eq!(var, "FEEDBACK_TIMEOUT_SECS"),
            _ => panic!("Expected InvalidValue for FEEDBACK_TIMEOUT_SECS"),
        }
    }
}
