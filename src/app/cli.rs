use clap::Parser;

use crate::config::types::Config;

/// Bridges an ESP32 bluetooth sensor to a local HTTP status endpoint.
#[derive(Parser, Debug, Clone, Default)]
#[command(version, about)]
pub struct Cli {
    /// Port of the HTTP status server (overrides the config file)
    #[arg(long)]
    pub port: Option<u16>,

    /// Length of a discovery scan in seconds (overrides the config file)
    #[arg(long, value_name = "SECONDS")]
    pub scan_timeout: Option<u64>,

    /// Connect to this address or advertised name as soon as it is discovered
    #[arg(long, value_name = "ADDRESS_OR_NAME")]
    pub connect: Option<String>,

    /// Log debug output
    #[arg(short, long)]
    pub verbose: bool,
}

impl Cli {
    pub fn log_level(&self) -> log::LevelFilter {
        if self.verbose { log::LevelFilter::Debug } else { log::LevelFilter::Info }
    }

    pub fn apply(&self, config: &mut Config) {
        if let Some(port) = self.port {
            config.http_port = port;
        }
        if let Some(scan_timeout) = self.scan_timeout {
            config.scan_timeout_secs = scan_timeout;
        }
        if let Some(target) = &self.connect {
            config.auto_connect = Some(target.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_override_the_config() {
        let cli = Cli::parse_from(["esp32-bridge", "--port", "9000", "--connect", "ESP32", "-v"]);
        let mut config = Config::default();
        cli.apply(&mut config);

        assert_eq!(config.http_port, 9000);
        assert_eq!(config.scan_timeout_secs, 10);
        assert_eq!(config.auto_connect.as_deref(), Some("ESP32"));
        assert_eq!(cli.log_level(), log::LevelFilter::Debug);
    }

    #[test]
    fn no_flags_keep_the_config() {
        let cli = Cli::parse_from(["esp32-bridge"]);
        let mut config = Config { scan_timeout_secs: 3, ..Config::default() };
        cli.apply(&mut config);

        assert_eq!(config, Config { scan_timeout_secs: 3, ..Config::default() });
        assert_eq!(cli.log_level(), log::LevelFilter::Info);
    }
}
