use std::env;

/// Broker configuration, read from the environment with sensible defaults.
#[derive(Debug, Clone)]
pub struct Config {
    pub bind_address: String,
    pub port: u16,
    pub heartbeat_interval_seconds: u64,
}

impl Config {
    pub fn from_env() -> Self {
        Self {
            bind_address: env::var("CAUSEWAY_BIND").unwrap_or_else(|_| "0.0.0.0".to_string()),
            port: env::var("CAUSEWAY_PORT")
                .ok()
                .and_then(|value| value.parse().ok())
                .unwrap_or(8080),
            heartbeat_interval_seconds: env::var("CAUSEWAY_HEARTBEAT_INTERVAL")
                .ok()
                .and_then(|value| value.parse().ok())
                .unwrap_or(30),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0".to_string(),
            port: 8080,
            heartbeat_interval_seconds: 30,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test_watchdog::timeout]
    fn defaults_match_from_env_without_overrides() {
        let defaults = Config::default();
        assert_eq!(defaults.bind_address, "0.0.0.0");
        assert_eq!(defaults.port, 8080);
        assert_eq!(defaults.heartbeat_interval_seconds, 30);
    }
}
