use std::time::Duration;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::device::constants::SCAN_TIMEOUT;
use crate::server::http::DEFAULT_PORT;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Config {
    pub http_port: u16,
    pub scan_timeout_secs: u64,
    // only report peripherals advertising one of these services; empty reports everything
    pub service_filter: Vec<Uuid>,
    // address or advertised name to connect to as soon as it is discovered
    pub auto_connect: Option<String>,
}

impl Config {
    pub fn scan_window(&self) -> Duration {
        Duration::from_secs(self.scan_timeout_secs)
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            http_port: DEFAULT_PORT,
            scan_timeout_secs: SCAN_TIMEOUT / 1000,
            service_filter: Vec::new(),
            auto_connect: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = Config::default();
        assert_eq!(config.http_port, 8080);
        assert_eq!(config.scan_window(), Duration::from_secs(10));
        assert!(config.service_filter.is_empty());
        assert_eq!(config.auto_connect, None);
    }

    #[test]
    fn missing_keys_take_defaults() {
        let config: Config = serde_json::from_str(r#"{"autoConnect": "ESP32"}"#).unwrap();
        assert_eq!(config, Config { auto_connect: Some("ESP32".to_string()), ..Config::default() });
    }

    #[test]
    fn camel_case_keys() {
        let config: Config = serde_json::from_str(
            r#"{"httpPort": 9000, "scanTimeoutSecs": 3, "serviceFilter": ["4fafc201-1fb5-459e-8fcc-c5c9c331914b"]}"#
        ).unwrap();
        assert_eq!(config.http_port, 9000);
        assert_eq!(config.scan_window(), Duration::from_secs(3));
        assert_eq!(config.service_filter, vec![Uuid::parse_str("4fafc201-1fb5-459e-8fcc-c5c9c331914b").unwrap()]);
    }
}
