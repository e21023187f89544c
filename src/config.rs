use std::{env, net::SocketAddr, str::FromStr};

use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerMode {
    Simple,
    Threaded,
}

impl FromStr for ServerMode {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "simple" => Ok(Self::Simple),
            "threaded" => Ok(Self::Threaded),
            _ => Err(ConfigError::InvalidMode),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub bind_addr: String,
    pub bind_port: u16,
    pub mode: ServerMode,
    pub detached_sessions: bool,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("RPC_BIND_PORT must be a valid u16")]
    InvalidPort,
    #[error("RPC_SERVER_MODE must be one of: simple, threaded")]
    InvalidMode,
    #[error("RPC_DETACHED_SESSIONS must be a boolean")]
    InvalidDetached,
    #[error("invalid bind address or port")]
    InvalidSocket,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        let bind_addr = env::var("RPC_BIND_ADDR").unwrap_or_else(|_| "127.0.0.1".to_string());
        let bind_port = env::var("RPC_BIND_PORT")
            .ok()
            .map(|value| value.parse::<u16>().map_err(|_| ConfigError::InvalidPort))
            .transpose()?
            .unwrap_or(9090);
        let mode = env::var("RPC_SERVER_MODE")
            .ok()
            .map(|value| value.parse::<ServerMode>())
            .transpose()?
            .unwrap_or(ServerMode::Threaded);
        let detached_sessions = env::var("RPC_DETACHED_SESSIONS")
            .ok()
            .map(|value| parse_bool(&value))
            .transpose()?
            .unwrap_or(true);

        let config = Self {
            bind_addr,
            bind_port,
            mode,
            detached_sessions,
        };

        let _ = config.bind_socket()?;
        Ok(config)
    }

    pub fn bind_socket(&self) -> Result<SocketAddr, ConfigError> {
        format!("{}:{}", self.bind_addr, self.bind_port)
            .parse::<SocketAddr>()
            .map_err(|_| ConfigError::InvalidSocket)
    }
}

fn parse_bool(value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" => Ok(true),
        "false" | "0" | "no" => Ok(false),
        _ => Err(ConfigError::InvalidDetached),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;

    // Tests below mutate process-wide environment variables.
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    fn clear_env() {
        env::remove_var("RPC_BIND_ADDR");
        env::remove_var("RPC_BIND_PORT");
        env::remove_var("RPC_SERVER_MODE");
        env::remove_var("RPC_DETACHED_SESSIONS");
    }

    #[test]
    fn parse_defaults() {
        let _guard = ENV_LOCK.lock().expect("env lock");
        clear_env();

        let config = Config::from_env().expect("config should parse");
        assert_eq!(config.bind_addr, "127.0.0.1");
        assert_eq!(config.bind_port, 9090);
        assert_eq!(config.mode, ServerMode::Threaded);
        assert!(config.detached_sessions);
    }

    #[test]
    fn parse_explicit_values() {
        let _guard = ENV_LOCK.lock().expect("env lock");
        clear_env();
        env::set_var("RPC_BIND_ADDR", "0.0.0.0");
        env::set_var("RPC_BIND_PORT", "7000");
        env::set_var("RPC_SERVER_MODE", " Simple ");
        env::set_var("RPC_DETACHED_SESSIONS", "0");

        let config = Config::from_env().expect("config should parse");
        assert_eq!(
            config.bind_socket().expect("socket"),
            "0.0.0.0:7000".parse().expect("valid socket")
        );
        assert_eq!(config.mode, ServerMode::Simple);
        assert!(!config.detached_sessions);
        clear_env();
    }

    #[test]
    fn invalid_port_fails() {
        let _guard = ENV_LOCK.lock().expect("env lock");
        clear_env();
        env::set_var("RPC_BIND_PORT", "70000");

        let err = Config::from_env().expect_err("expected invalid port error");
        assert!(matches!(err, ConfigError::InvalidPort));
        clear_env();
    }

    #[test]
    fn invalid_mode_fails() {
        let _guard = ENV_LOCK.lock().expect("env lock");
        clear_env();
        env::set_var("RPC_SERVER_MODE", "forking");

        let err = Config::from_env().expect_err("expected invalid mode error");
        assert!(matches!(err, ConfigError::InvalidMode));
        clear_env();
    }

    #[test]
    fn invalid_bind_addr_fails() {
        let _guard = ENV_LOCK.lock().expect("env lock");
        clear_env();
        env::set_var("RPC_BIND_ADDR", "not an address");

        let err = Config::from_env().expect_err("expected invalid socket error");
        assert!(matches!(err, ConfigError::InvalidSocket));
        clear_env();
    }

    #[test]
    fn detached_flag_accepts_common_spellings() {
        assert!(parse_bool("TRUE").expect("bool"));
        assert!(parse_bool("yes").expect("bool"));
        assert!(!parse_bool(" false ").expect("bool"));
        assert!(matches!(parse_bool("maybe"), Err(ConfigError::InvalidDetached)));
    }
}
