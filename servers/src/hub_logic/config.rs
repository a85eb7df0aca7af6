use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::Parser;
use lib_hub::HubSettings;
use serde::{Deserialize, Serialize};

pub const DEFAULT_CONFIG_PATH: &str = "server_hub.conf";

/// Raw configuration as it comes from one source. Every field is optional so
/// sources can be layered: defaults, then the JSON config file, then
/// environment variables and CLI flags.
#[derive(Parser, Deserialize, Serialize, Debug, Clone, Default, PartialEq)]
#[clap(about = "Real-time feed notification hub", version)]
#[serde(rename_all = "camelCase", default)]
pub struct Config {
    #[clap(long, env = "HUB_PORT", help = "Port to listen on for client connections.")]
    pub port: Option<u16>,

    #[clap(long, env = "HUB_CONFIG_PATH", help = "Path to the JSON configuration file.")]
    pub config_path: Option<PathBuf>,

    #[clap(long, env = "HUB_LOG_DIR", help = "Directory for log files.")]
    pub log_dir: Option<PathBuf>,

    #[clap(long, env = "HUB_LOG_LEVEL", help = "Logging level (trace, debug, info, warn, error).")]
    pub log_level: Option<String>,

    #[clap(long, env = "HUB_PING_INTERVAL_MS", help = "Heartbeat interval advertised to clients, in milliseconds.")]
    pub ping_interval_ms: Option<u64>,

    #[clap(long, env = "HUB_PING_GRACE_MS", help = "Extra time granted after the heartbeat interval, in milliseconds.")]
    pub ping_grace_ms: Option<u64>,

    #[clap(long, env = "HUB_POLL_INTERVAL_MS", help = "Interval between feed poll sweeps, in milliseconds.")]
    pub poll_interval_ms: Option<u64>,

    #[clap(long, env = "HUB_PROVIDER_URL", help = "Base URL of the Last.fm API.")]
    pub provider_url: Option<String>,

    #[clap(long, env = "HUB_PROVIDER_API_KEY", help = "Last.fm API key.")]
    pub provider_api_key: Option<String>,

    #[clap(long, env = "HUB_PROVIDER_TIMEOUT_SECS", help = "Timeout for one provider request, in seconds.")]
    pub provider_timeout_secs: Option<u64>,

    #[clap(long, env = "TLS_CERT_PATH", help = "Path to the TLS certificate file.")]
    pub tls_cert_path: Option<PathBuf>,

    #[clap(long, env = "TLS_KEY_PATH", help = "Path to the TLS private key file.")]
    pub tls_key_path: Option<PathBuf>,
}

/// Fully resolved settings of the `server_hub` process.
#[derive(Debug, Clone, PartialEq)]
pub struct ServerConfig {
    pub port: u16,
    pub log_dir: PathBuf,
    pub log_level: String,
    pub hub: HubSettings,
    pub provider_url: String,
    pub provider_api_key: String,
    pub provider_timeout: Duration,
    /// Certificate and key; plain HTTP when absent.
    pub tls: Option<(PathBuf, PathBuf)>,
    /// The config file that was merged in, if one was found.
    pub config_file: Option<PathBuf>,
}

impl Config {
    // 'other' overrides 'self' for Some values
    fn merge(self, other: Config) -> Config {
        Config {
            port: other.port.or(self.port),
            config_path: other.config_path.or(self.config_path),
            log_dir: other.log_dir.or(self.log_dir),
            log_level: other.log_level.or(self.log_level),
            ping_interval_ms: other.ping_interval_ms.or(self.ping_interval_ms),
            ping_grace_ms: other.ping_grace_ms.or(self.ping_grace_ms),
            poll_interval_ms: other.poll_interval_ms.or(self.poll_interval_ms),
            provider_url: other.provider_url.or(self.provider_url),
            provider_api_key: other.provider_api_key.or(self.provider_api_key),
            provider_timeout_secs: other.provider_timeout_secs.or(self.provider_timeout_secs),
            tls_cert_path: other.tls_cert_path.or(self.tls_cert_path),
            tls_key_path: other.tls_key_path.or(self.tls_key_path),
        }
    }

    pub fn defaults() -> Config {
        Config {
            port: Some(3000),
            log_dir: Some(PathBuf::from("./logs")),
            log_level: Some("info".to_string()),
            ping_interval_ms: Some(30_000),
            ping_grace_ms: Some(5_000),
            poll_interval_ms: Some(15_000),
            provider_url: Some("https://ws.audioscrobbler.com/".to_string()),
            provider_timeout_secs: Some(10),
            ..Default::default()
        }
    }

    fn resolve(self, config_file: Option<PathBuf>) -> Result<ServerConfig> {
        let api_key = self
            .provider_api_key
            .filter(|key| !key.trim().is_empty())
            .context("A Last.fm API key is required (--provider-api-key or HUB_PROVIDER_API_KEY)")?;

        let ping_interval_ms = self.ping_interval_ms.unwrap_or(30_000);
        let poll_interval_ms = self.poll_interval_ms.unwrap_or(15_000);
        if ping_interval_ms == 0 || poll_interval_ms == 0 {
            bail!("Ping and poll intervals must be greater than zero");
        }

        let tls = match (self.tls_cert_path, self.tls_key_path) {
            (Some(cert), Some(key)) => Some((cert, key)),
            (None, None) => None,
            _ => bail!("TLS needs both a certificate and a key path"),
        };

        Ok(ServerConfig {
            port: self.port.unwrap_or(3000),
            log_dir: self.log_dir.unwrap_or_else(|| PathBuf::from("./logs")),
            log_level: self.log_level.unwrap_or_else(|| "info".to_string()),
            hub: HubSettings {
                ping_interval: Duration::from_millis(ping_interval_ms),
                ping_grace: Duration::from_millis(self.ping_grace_ms.unwrap_or(5_000)),
                poll_interval: Duration::from_millis(poll_interval_ms),
            },
            provider_url: self
                .provider_url
                .unwrap_or_else(|| "https://ws.audioscrobbler.com/".to_string()),
            provider_api_key: api_key,
            provider_timeout: Duration::from_secs(self.provider_timeout_secs.unwrap_or(10)),
            tls,
            config_file,
        })
    }
}

/// Reads a JSON config file. `Ok(None)` when the file does not exist.
pub fn read_config_file(path: &Path) -> Result<Option<Config>> {
    if !path.exists() {
        return Ok(None);
    }
    let config_str = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    let config = serde_json::from_str::<Config>(&config_str)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
    Ok(Some(config))
}

/// Layers defaults, the config file and `cli` (which already includes the
/// environment) into the final settings.
pub fn build_config(cli: Config) -> Result<ServerConfig> {
    let config_file_path = cli
        .config_path
        .clone()
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH));

    let mut current_config = Config::defaults();
    let loaded = match read_config_file(&config_file_path)? {
        Some(file_config) => {
            current_config = current_config.merge(file_config);
            Some(config_file_path)
        }
        None => None,
    };

    current_config.merge(cli).resolve(loaded)
}

pub fn load_config() -> Result<ServerConfig> {
    build_config(Config::parse())
}
