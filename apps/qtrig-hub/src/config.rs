use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use config::{ConfigError, File, FileFormat};

pub const DEFAULT_PORT: u16 = 5001;

#[derive(Debug, Parser)]
#[command(
    name = "qtrig-hub",
    author,
    version,
    about = "Relay hub between a QTrigdoppler controller and browser clients"
)]
pub struct Cli {
    /// Interface to bind the HTTP/WebSocket listener to.
    #[arg(long, env = "QTRIG_HUB_BIND", default_value = "0.0.0.0")]
    pub bind: String,

    /// Listen port. Falls back to `[remote_server] port` in the config file, then 5001.
    #[arg(long, env = "QTRIG_HUB_PORT")]
    pub port: Option<u16>,

    /// INI file shared with QTrigdoppler.
    #[arg(long, env = "QTRIG_HUB_CONFIG", default_value = "config.ini")]
    pub config: PathBuf,

    /// Log at debug level unless RUST_LOG says otherwise.
    #[arg(long, env = "QTRIG_HUB_DEBUG", default_value_t = false)]
    pub debug: bool,

    /// Static page served at `/`.
    #[arg(
        long,
        env = "QTRIG_HUB_WEB_CLIENT",
        default_value = "lib/web_api_client.html"
    )]
    pub web_client: PathBuf,

    /// Seconds without a controller heartbeat before it is reported as unreachable.
    #[arg(long, env = "QTRIG_HUB_LIVENESS_THRESHOLD_SECS", default_value_t = 30)]
    pub liveness_threshold_secs: u64,

    #[arg(long, env = "QTRIG_HUB_PING_INTERVAL_SECS", default_value_t = 25)]
    pub ping_interval_secs: u64,

    /// Connections silent for this long are closed.
    #[arg(long, env = "QTRIG_HUB_PING_TIMEOUT_SECS", default_value_t = 60)]
    pub ping_timeout_secs: u64,

    /// Outbound frames queued per connection before new ones are dropped.
    #[arg(long, env = "QTRIG_HUB_CLIENT_BUFFER", default_value_t = 256)]
    pub client_buffer: usize,

    #[arg(long, env = "QTRIG_HUB_SHUTDOWN_GRACE_SECS", default_value_t = 2)]
    pub shutdown_grace_secs: u64,
}

/// The `[remote_server]` section of QTrigdoppler's `config.ini`.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct IniSettings {
    pub port: Option<u16>,
    pub debug: Option<bool>,
}

impl IniSettings {
    /// A missing file yields empty settings; a malformed one is an error.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let source = config::Config::builder()
            .add_source(File::from(path).format(FileFormat::Ini).required(false))
            .build()?;
        Ok(Self {
            port: optional(source.get::<u16>("remote_server.port"))?,
            debug: optional(source.get::<bool>("remote_server.debug"))?,
        })
    }
}

fn optional<T>(value: Result<T, ConfigError>) -> Result<Option<T>, ConfigError> {
    match value {
        Ok(value) => Ok(Some(value)),
        Err(ConfigError::NotFound(_)) => Ok(None),
        Err(err) => Err(err),
    }
}

#[derive(Debug, Clone)]
pub struct HubConfig {
    pub listen_addr: SocketAddr,
    pub debug: bool,
    pub web_client: PathBuf,
    pub liveness_threshold: Duration,
    pub ping_interval: Duration,
    pub ping_timeout: Duration,
    pub client_buffer: usize,
    pub shutdown_grace: Duration,
}

impl HubConfig {
    /// Flags and environment win over the INI file, which wins over defaults.
    pub fn from_cli(cli: Cli, ini: IniSettings) -> Result<Self> {
        let ip: IpAddr = cli
            .bind
            .parse()
            .with_context(|| format!("invalid bind address: {}", cli.bind))?;
        let port = cli.port.or(ini.port).unwrap_or(DEFAULT_PORT);
        anyhow::ensure!(cli.client_buffer > 0, "client buffer must be greater than zero");
        anyhow::ensure!(cli.ping_interval_secs > 0, "ping interval must be greater than zero");

        Ok(Self {
            listen_addr: SocketAddr::new(ip, port),
            debug: cli.debug || ini.debug.unwrap_or(false),
            web_client: cli.web_client,
            liveness_threshold: Duration::from_secs(cli.liveness_threshold_secs),
            ping_interval: Duration::from_secs(cli.ping_interval_secs),
            ping_timeout: Duration::from_secs(cli.ping_timeout_secs),
            client_buffer: cli.client_buffer,
            shutdown_grace: Duration::from_secs(cli.shutdown_grace_secs),
        })
    }

    pub fn default_log_level(&self) -> &'static str {
        if self.debug {
            "debug"
        } else {
            "info"
        }
    }
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from(([0, 0, 0, 0], DEFAULT_PORT)),
            debug: false,
            web_client: PathBuf::from("lib/web_api_client.html"),
            liveness_threshold: crate::liveness::DEFAULT_LIVENESS_THRESHOLD,
            ping_interval: Duration::from_secs(25),
            ping_timeout: Duration::from_secs(60),
            client_buffer: 256,
            shutdown_grace: Duration::from_secs(2),
        }
    }
}
