use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use config::{Config, File as ConfigFile};
use relay_ingest::{AnnounceTarget, IngestConfig};
use relay_rpc::ServiceConfig;
use relay_types::{KeyId, PublicKey, Topic, WorkParams};

pub const DEFAULT_CONFIG_PATH: &str = "config/relay.toml";
pub const DEFAULT_TOPIC: &str = "0x12345678";
pub const DEFAULT_RECIPIENT_PUBLIC_KEY: &str = "0x0476a7fe325709fe6420b216d7fb3bea263b012f44bfd5a00a1c7e125f0cfe2b220d6d1a6e5f0ed87ef39953d4a19969cf7d100cd52546b0a970ae0956001b83ce";
pub const DEFAULT_KEY_ID: &str = "20b637d3d40cb74875765250e8ad693aceed234b500c02adec0e279f4daaf49a";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreMode {
    Memory,
    Ipfs,
}

impl FromStr for StoreMode {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_lowercase().as_str() {
            "memory" => Ok(StoreMode::Memory),
            "ipfs" => Ok(StoreMode::Ipfs),
            other => Err(anyhow!(
                "unknown store mode '{other}'; expected 'memory' or 'ipfs'"
            )),
        }
    }
}

impl fmt::Display for StoreMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let value = match self {
            StoreMode::Memory => "memory",
            StoreMode::Ipfs => "ipfs",
        };
        f.write_str(value)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelMode {
    Memory,
    Whisper,
}

impl FromStr for ChannelMode {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_lowercase().as_str() {
            "memory" => Ok(ChannelMode::Memory),
            "whisper" => Ok(ChannelMode::Whisper),
            other => Err(anyhow!(
                "unknown channel mode '{other}'; expected 'memory' or 'whisper'"
            )),
        }
    }
}

impl fmt::Display for ChannelMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let value = match self {
            ChannelMode::Memory => "memory",
            ChannelMode::Whisper => "whisper",
        };
        f.write_str(value)
    }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub config_path: Option<PathBuf>,

    // Content store
    pub store_mode: StoreMode,
    pub store_api_url: String,

    // Announcement channel
    pub channel_mode: ChannelMode,
    pub channel_rpc_url: String,
    pub topic: String,
    pub recipient_public_key: String,
    pub key_id: String,
    pub work_target: f64,
    pub work_time_secs: u32,
    pub ttl_secs: u32,

    // Ingest socket
    pub ingest_host: String,
    pub ingest_port: u16,
    pub poll_interval_ms: u64,

    // HTTP
    pub http_host: String,
    pub http_port: u16,
    pub allowed_origins: Vec<String>,
    pub client_timeout_secs: u64,

    // Observability
    pub log_level: String,
    pub log_format: String,
    pub prometheus_enabled: bool,
}

impl AppConfig {
    /// Load from an optional TOML file layered under `RELAY_*` environment variables.
    pub fn load(config_path_override: Option<&str>) -> Result<Self> {
        let resolved_path = if let Some(path) = config_path_override {
            let path = PathBuf::from(path);
            if !path.exists() {
                anyhow::bail!(
                    "Configuration file {} not found (specified via --config)",
                    path.display()
                );
            }
            Some(path)
        } else {
            let path = PathBuf::from(DEFAULT_CONFIG_PATH);
            if path.exists() {
                Some(path)
            } else {
                None
            }
        };

        let mut builder = Config::builder();
        if let Some(path) = &resolved_path {
            builder = builder.add_source(ConfigFile::from(path.as_path()));
        }
        builder = builder.add_source(config::Environment::with_prefix("RELAY"));

        let config = builder.build().context("failed to read configuration")?;
        let mut app_config = Self::from_config(&config)?;
        app_config.config_path = resolved_path;
        Ok(app_config)
    }

    /// Environment-style keys (`ingest_port`) win over file keys (`ingest.port`).
    pub fn from_config(config: &Config) -> Result<Self> {
        let store_mode = get_string_value(config, &["store_mode", "store.mode"])
            .unwrap_or_else(|| "memory".to_string())
            .parse()?;
        let channel_mode = get_string_value(config, &["channel_mode", "channel.mode"])
            .unwrap_or_else(|| "memory".to_string())
            .parse()?;

        let allowed_origins = get_string_value(
            config,
            &["http_allowed_origins", "http.allowed_origins"],
        )
        .unwrap_or_default()
        .split(',')
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .collect();

        Ok(Self {
            config_path: None,
            store_mode,
            store_api_url: get_string_value(config, &["store_api_url", "store.api_url"])
                .unwrap_or_else(|| "http://127.0.0.1:5001".to_string()),
            channel_mode,
            channel_rpc_url: get_string_value(config, &["channel_rpc_url", "channel.rpc_url"])
                .unwrap_or_else(|| "http://127.0.0.1:8454".to_string()),
            topic: get_string_value(config, &["channel_topic", "channel.topic"])
                .unwrap_or_else(|| DEFAULT_TOPIC.to_string()),
            recipient_public_key: get_string_value(
                config,
                &["channel_recipient_public_key", "channel.recipient_public_key"],
            )
            .unwrap_or_else(|| DEFAULT_RECIPIENT_PUBLIC_KEY.to_string()),
            key_id: get_string_value(config, &["channel_key_id", "channel.key_id"])
                .unwrap_or_else(|| DEFAULT_KEY_ID.to_string()),
            work_target: get_parsed_value(
                config,
                &["channel_work_target", "channel.work_target"],
                12.5,
            )?,
            work_time_secs: get_parsed_value(
                config,
                &["channel_work_time_secs", "channel.work_time_secs"],
                10,
            )?,
            ttl_secs: get_parsed_value(config, &["channel_ttl_secs", "channel.ttl_secs"], 60)?,
            ingest_host: get_string_value(config, &["ingest_host", "ingest.host"])
                .unwrap_or_else(|| "127.0.0.1".to_string()),
            ingest_port: get_parsed_value(config, &["ingest_port", "ingest.port"], 12345)?,
            poll_interval_ms: get_parsed_value(
                config,
                &["ingest_poll_interval_ms", "ingest.poll_interval_ms"],
                100,
            )?,
            http_host: get_string_value(config, &["http_host", "http.host"])
                .unwrap_or_else(|| "0.0.0.0".to_string()),
            http_port: get_parsed_value(config, &["http_port", "http.port"], 5007)?,
            allowed_origins,
            client_timeout_secs: get_parsed_value(
                config,
                &["http_client_timeout_secs", "http.client_timeout_secs"],
                30,
            )?,
            log_level: get_string_value(config, &["log_level", "log.level"])
                .unwrap_or_else(|| "info".to_string()),
            log_format: get_string_value(config, &["log_format", "log.format"])
                .unwrap_or_else(|| "pretty".to_string()),
            prometheus_enabled: get_bool_value(
                config,
                &["metrics_enabled", "metrics.enabled"],
                true,
            ),
        })
    }

    pub fn validate(&self) -> Result<()> {
        if self.ingest_port == 0 {
            anyhow::bail!("ingest.port must be greater than zero");
        }
        if self.http_port == 0 {
            anyhow::bail!("http.port must be greater than zero");
        }
        if self.poll_interval_ms == 0 {
            anyhow::bail!("ingest.poll_interval_ms must be greater than zero");
        }

        let ingest_ip = parse_host(&self.ingest_host, "ingest.host")?;
        let http_ip = parse_host(&self.http_host, "http.host")?;
        let overlapping_hosts =
            ingest_ip == http_ip || ingest_ip.is_unspecified() || http_ip.is_unspecified();
        if self.ingest_port == self.http_port && overlapping_hosts {
            anyhow::bail!(
                "ingest and HTTP listeners must not share {}:{}",
                self.http_host,
                self.http_port
            );
        }

        self.announce_target()?;
        self.key_id()?;
        Ok(())
    }

    pub fn ingest_config(&self) -> Result<IngestConfig> {
        Ok(IngestConfig {
            bind_addr: SocketAddr::new(
                parse_host(&self.ingest_host, "ingest.host")?,
                self.ingest_port,
            ),
            poll_interval: Duration::from_millis(self.poll_interval_ms),
        })
    }

    pub fn service_config(&self) -> Result<ServiceConfig> {
        Ok(ServiceConfig {
            bind_addr: SocketAddr::new(parse_host(&self.http_host, "http.host")?, self.http_port),
            allowed_origins: self.allowed_origins.clone(),
        })
    }

    pub fn announce_target(&self) -> Result<AnnounceTarget> {
        let work = WorkParams {
            target: self.work_target,
            time_secs: self.work_time_secs,
        };
        work.validate().context("invalid proof-of-work settings")?;

        Ok(AnnounceTarget {
            topic: self.topic()?,
            recipient_public_key: PublicKey::from_hex(&self.recipient_public_key)
                .context("invalid channel.recipient_public_key")?,
            work,
        })
    }

    pub fn topic(&self) -> Result<Topic> {
        Topic::from_hex(&self.topic).context("invalid channel.topic")
    }

    pub fn key_id(&self) -> Result<KeyId> {
        KeyId::parse(&self.key_id).context("invalid channel.key_id")
    }

    pub fn client_timeout(&self) -> Duration {
        Duration::from_secs(self.client_timeout_secs.max(1))
    }

    pub fn config_source(&self) -> String {
        self.config_path
            .as_deref()
            .map(Path::display)
            .map(|path| path.to_string())
            .unwrap_or_else(|| "defaults + environment".to_string())
    }
}

fn parse_host(host: &str, key: &str) -> Result<IpAddr> {
    host.trim()
        .parse()
        .with_context(|| format!("{key} must be an IP address, got '{host}'"))
}

fn get_string_value(config: &Config, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|key| {
        config
            .get_string(key)
            .ok()
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
    })
}

fn get_parsed_value<T>(config: &Config, keys: &[&str], default: T) -> Result<T>
where
    T: FromStr,
    T::Err: fmt::Display,
{
    match get_string_value(config, keys) {
        Some(raw) => raw
            .parse()
            .map_err(|err| anyhow!("invalid value '{raw}' for {}: {err}", keys[keys.len() - 1])),
        None => Ok(default),
    }
}

fn get_bool_value(config: &Config, keys: &[&str], default: bool) -> bool {
    for key in keys {
        if let Ok(value) = config.get_bool(key) {
            return value;
        }
        if let Ok(raw) = config.get_string(key) {
            if let Ok(parsed) = raw.trim().parse::<bool>() {
                return parsed;
            }
        }
    }
    default
}
