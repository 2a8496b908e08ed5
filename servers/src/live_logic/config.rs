use clap::Parser;
use lib_fleet::configs::StreamConfig;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

const DEFAULT_CONFIG_FILE: &str = "server_live.conf";

#[derive(Parser, Deserialize, Serialize, Debug, Clone, Default)]
#[clap(about = "Live fleet map server", version)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    #[clap(long, env = "FLEET_PORT", help = "Port to listen on for map clients.")]
    pub port: Option<u16>,

    #[clap(long, env = "FLEET_CONFIG_PATH", help = "Path to the JSON configuration file.")]
    pub config_path: Option<PathBuf>,

    #[clap(long, env = "FLEET_LOG_DIR", help = "Directory for log files.")]
    pub log_dir: Option<PathBuf>,

    #[clap(long, env = "FLEET_LOG_LEVEL", help = "Logging level (trace, debug, info, warn, error).")]
    pub log_level: Option<String>,

    #[clap(long, env = "FLEET_WS_URL", help = "Base URL of the device status push channel (http, https, ws or wss).")]
    pub ws_base_url: Option<String>,

    #[clap(long, env = "FLEET_API_URL", help = "Base URL of the fleet REST API.")]
    pub api_base_url: Option<String>,

    #[clap(long, env = "FLEET_API_TOKEN", help = "Bearer token for the fleet REST API.")]
    pub api_token: Option<String>,

    #[clap(long, env = "FLEET_MAX_RECONNECT_ATTEMPTS", help = "Reconnect attempts before the push channel gives up.")]
    pub max_reconnect_attempts: Option<u32>,

    #[clap(long, env = "FLEET_RECONNECT_BASE_DELAY_MS", help = "Base delay in milliseconds for push channel reconnects.")]
    pub reconnect_base_delay_ms: Option<u64>,

    #[clap(long, env = "FLEET_TRACKED_MODE", help = "Device mode recorded into trajectories.")]
    pub tracked_mode: Option<String>,

    #[clap(long, env = "FLEET_TRACKED_DEVICE", help = "Device whose trajectory is recorded from startup.")]
    pub tracked_device: Option<String>,

    #[clap(long, env = "FLEET_FANOUT_CAPACITY", help = "Per-subscriber buffer of the status fan-out.")]
    pub fanout_capacity: Option<usize>,
}

impl Config {
    // 'other' overrides 'self' for Some values
    fn merge(self, other: Config) -> Config {
        Config {
            port: other.port.or(self.port),
            config_path: other.config_path.or(self.config_path),
            log_dir: other.log_dir.or(self.log_dir),
            log_level: other.log_level.or(self.log_level),
            ws_base_url: other.ws_base_url.or(self.ws_base_url),
            api_base_url: other.api_base_url.or(self.api_base_url),
            api_token: other.api_token.or(self.api_token),
            max_reconnect_attempts: other.max_reconnect_attempts.or(self.max_reconnect_attempts),
            reconnect_base_delay_ms: other.reconnect_base_delay_ms.or(self.reconnect_base_delay_ms),
            tracked_mode: other.tracked_mode.or(self.tracked_mode),
            tracked_device: other.tracked_device.or(self.tracked_device),
            fanout_capacity: other.fanout_capacity.or(self.fanout_capacity),
        }
    }

    fn defaults() -> Config {
        let stream = StreamConfig::default();
        Config {
            port: Some(9010),
            log_dir: Some(PathBuf::from("./logs")),
            log_level: Some("info".to_string()),
            ws_base_url: Some(stream.ws_base_url),
            api_base_url: Some("http://localhost:8000/".to_string()),
            max_reconnect_attempts: Some(stream.max_reconnect_attempts),
            reconnect_base_delay_ms: Some(stream.reconnect_base_delay_ms),
            tracked_mode: Some(stream.tracked_mode),
            fanout_capacity: Some(stream.fanout_capacity),
            ..Default::default()
        }
    }

    pub fn port(&self) -> u16 {
        self.port.unwrap_or(9010)
    }

    pub fn log_dir(&self) -> PathBuf {
        self.log_dir.clone().unwrap_or_else(|| PathBuf::from("./logs"))
    }

    pub fn log_level(&self) -> &str {
        self.log_level.as_deref().unwrap_or("info")
    }

    /// The library-side view of the push channel settings.
    pub fn stream_config(&self) -> StreamConfig {
        let defaults = StreamConfig::default();
        StreamConfig {
            ws_base_url: self.ws_base_url.clone().unwrap_or(defaults.ws_base_url),
            max_reconnect_attempts: self.max_reconnect_attempts.unwrap_or(defaults.max_reconnect_attempts),
            reconnect_base_delay_ms: self.reconnect_base_delay_ms.unwrap_or(defaults.reconnect_base_delay_ms),
            tracked_mode: self.tracked_mode.clone().unwrap_or(defaults.tracked_mode),
            fanout_capacity: self.fanout_capacity.unwrap_or(defaults.fanout_capacity),
        }
    }
}

pub fn load_config() -> Config {
    // Parsed once; holds both CLI flags and env vars.
    let cli_args = Config::parse();
    resolve(cli_args)
}

/// defaults -> config file -> env/CLI
fn resolve(cli_args: Config) -> Config {
    let config_file_path = cli_args
        .config_path
        .clone()
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE));

    let mut current_config = Config::defaults();
    if let Some(file_config) = read_config_file(&config_file_path) {
        current_config = current_config.merge(file_config);
    }
    current_config.merge(cli_args)
}

fn read_config_file(path: &Path) -> Option<Config> {
    if !path.exists() {
        log::info!("Config file not found at {}. Using defaults and environment/CLI variables.", path.display());
        return None;
    }
    let config_str = match fs::read_to_string(path) {
        Ok(s) => s,
        Err(e) => {
            log::warn!("Failed to read config file {}: {}. Falling back to other sources.", path.display(), e);
            return None;
        }
    };
    match serde_json::from_str::<Config>(&config_str) {
        Ok(file_config) => Some(file_config),
        Err(e) => {
            log::warn!("Failed to parse config file {}: {}. Falling back to other sources.", path.display(), e);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn cli_overrides_file_overrides_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"port": 7000, "wsBaseUrl": "http://fleet.local:8000", "maxReconnectAttempts": 2}}"#).unwrap();

        let cli = Config {
            config_path: Some(file.path().to_path_buf()),
            port: Some(7100),
            ..Default::default()
        };
        let config = resolve(cli);

        assert_eq!(config.port(), 7100);
        assert_eq!(config.ws_base_url.as_deref(), Some("http://fleet.local:8000"));
        assert_eq!(config.log_level(), "info");

        let stream = config.stream_config();
        assert_eq!(stream.max_reconnect_attempts, 2);
        assert_eq!(stream.reconnect_base_delay_ms, 5000);
        assert_eq!(stream.endpoint().unwrap().as_str(), "ws://fleet.local:8000/ws/device-status/");
    }

    #[test]
    fn unreadable_file_falls_back_to_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "not json").unwrap();

        let config = resolve(Config {
            config_path: Some(file.path().to_path_buf()),
            ..Default::default()
        });

        assert_eq!(config.port(), 9010);
        assert_eq!(config.stream_config(), StreamConfig::default());
    }
}
