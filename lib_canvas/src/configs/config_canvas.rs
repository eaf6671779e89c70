//! # Canvas Configuration
//!
//! Every setting is optional at each layer. Layers are merged field by field,
//! later layers winning:
//!
//! 1. built-in defaults
//! 2. the JSON config file (`--config-path`, default `server_canvas.json`)
//! 3. environment variables and command line arguments (clap reads both)
//!
//! The merged result is then resolved into [`CanvasSettings`], which has no
//! optional fields left except the ones that switch features on.

use std::{
    ffi::OsString,
    fs,
    net::{IpAddr, SocketAddr},
    path::{Path, PathBuf},
    time::Duration,
};

use clap::Parser;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Config file read when `--config-path` is not given.
pub const DEFAULT_CONFIG_FILE: &str = "server_canvas.json";

/// Errors while loading the configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error(transparent)]
    Cli(#[from] clap::Error),

    #[error("cannot read config file {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot parse config file {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("`{0}` is required (flag, environment or config file)")]
    Missing(&'static str),

    #[error("invalid bind host `{0}`")]
    Host(String),

    #[error("`{0}` must be greater than zero")]
    Zero(&'static str),
}

#[derive(Parser, Deserialize, Serialize, Debug, Clone, Default, PartialEq)]
#[clap(about = "Canvas gateway: pages, chunks and WebSocket channels", version)]
#[serde(rename_all = "camelCase")]
pub struct CanvasConfig {
    #[clap(long, env = "PORT", help = "Port to listen on.")]
    pub port: Option<u16>,

    #[clap(long, env = "CANVAS_HOST", help = "Address to bind to.")]
    pub host: Option<String>,

    #[clap(long, env = "CANVAS_CONFIG_PATH", help = "Path to the JSON configuration file.")]
    pub config_path: Option<PathBuf>,

    #[clap(long, env = "DATABASE_URL", help = "PostgreSQL connection URL.")]
    pub database_url: Option<String>,

    #[clap(long, env = "DISCORD_INVITE", help = "Target of the /discord redirect.")]
    pub discord_invite: Option<String>,

    #[clap(long, env = "CANVAS_PUBLIC_DIR", help = "Directory of static files.")]
    pub public_dir: Option<PathBuf>,

    #[clap(long, env = "CANVAS_TILES_DIR", help = "Directory served under /tiles.")]
    pub tiles_dir: Option<PathBuf>,

    #[clap(long, env = "CANVAS_CHUNKS_DIR", help = "Directory of chunk bitmaps.")]
    pub chunks_dir: Option<PathBuf>,

    #[clap(long, env = "CANVAS_ASSETS_PATH", help = "Path to the JSON asset manifest.")]
    pub assets_path: Option<PathBuf>,

    #[clap(long, env = "CANVAS_LOG_DIR", help = "Directory for log files.")]
    pub log_dir: Option<PathBuf>,

    #[clap(long, env = "CANVAS_LOG_LEVEL", help = "Logging level (trace, debug, info, warn, error).")]
    pub log_level: Option<String>,

    #[clap(long, env = "CANVAS_GC_INTERVAL_SECS", help = "Seconds between memory reclamation runs.")]
    pub gc_interval_secs: Option<u64>,

    #[clap(long, env = "CANVAS_RANKING_REFRESH_SECS", help = "Seconds between ranking updates (off when unset).")]
    pub ranking_refresh_secs: Option<u64>,

    #[clap(long, env = "CANVAS_FACTION_REFRESH_SECS", help = "Seconds between faction updates (off when unset).")]
    pub faction_refresh_secs: Option<u64>,

    #[clap(long, env = "CANVAS_BANS_CRON", help = "Cron expression for ban list reloads (off when unset).")]
    pub bans_cron: Option<String>,

    #[clap(long, env = "CANVAS_PAGE_MAX_AGE_SECS", help = "max-age of the cached HTML pages.")]
    pub page_max_age_secs: Option<u64>,
}

impl CanvasConfig {
    /// The built-in defaults layer.
    pub fn defaults() -> Self {
        Self {
            port: Some(8080),
            host: Some("0.0.0.0".to_string()),
            discord_invite: Some("https://discordapp.com/".to_string()),
            public_dir: Some(PathBuf::from("./public")),
            tiles_dir: Some(PathBuf::from("./tiles")),
            chunks_dir: Some(PathBuf::from("./chunks")),
            assets_path: Some(PathBuf::from("./assets.json")),
            log_dir: Some(PathBuf::from("./logs")),
            log_level: Some("info".to_string()),
            gc_interval_secs: Some(15 * 60),
            page_max_age_secs: Some(15 * 60),
            ..Default::default()
        }
    }

    /// Merges two layers; `Some` values in `other` override `self`.
    pub fn merge(self, other: CanvasConfig) -> CanvasConfig {
        CanvasConfig {
            port: other.port.or(self.port),
            host: other.host.or(self.host),
            config_path: other.config_path.or(self.config_path),
            database_url: other.database_url.or(self.database_url),
            discord_invite: other.discord_invite.or(self.discord_invite),
            public_dir: other.public_dir.or(self.public_dir),
            tiles_dir: other.tiles_dir.or(self.tiles_dir),
            chunks_dir: other.chunks_dir.or(self.chunks_dir),
            assets_path: other.assets_path.or(self.assets_path),
            log_dir: other.log_dir.or(self.log_dir),
            log_level: other.log_level.or(self.log_level),
            gc_interval_secs: other.gc_interval_secs.or(self.gc_interval_secs),
            ranking_refresh_secs: other.ranking_refresh_secs.or(self.ranking_refresh_secs),
            faction_refresh_secs: other.faction_refresh_secs.or(self.faction_refresh_secs),
            bans_cron: other.bans_cron.or(self.bans_cron),
            page_max_age_secs: other.page_max_age_secs.or(self.page_max_age_secs),
        }
    }

    /// Reads one JSON layer.
    pub fn from_json_file(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Turns a fully merged layer into settings.
    pub fn resolve(self) -> Result<CanvasSettings, ConfigError> {
        let host = self.host.unwrap_or_else(|| "0.0.0.0".to_string());
        let host: IpAddr = host.parse().map_err(|_| ConfigError::Host(host.clone()))?;

        let gc_interval_secs = self.gc_interval_secs.unwrap_or(15 * 60);
        if gc_interval_secs == 0 {
            return Err(ConfigError::Zero("gc_interval_secs"));
        }

        Ok(CanvasSettings {
            bind_addr: SocketAddr::new(host, self.port.unwrap_or(8080)),
            config_path: self.config_path,
            database_url: self.database_url.ok_or(ConfigError::Missing("database_url"))?,
            discord_invite: self.discord_invite.ok_or(ConfigError::Missing("discord_invite"))?,
            public_dir: self.public_dir.unwrap_or_else(|| PathBuf::from("./public")),
            tiles_dir: self.tiles_dir,
            chunks_dir: self.chunks_dir.unwrap_or_else(|| PathBuf::from("./chunks")),
            assets_path: self.assets_path.unwrap_or_else(|| PathBuf::from("./assets.json")),
            log_dir: self.log_dir.unwrap_or_else(|| PathBuf::from("./logs")),
            log_level: self.log_level.unwrap_or_else(|| "info".to_string()),
            gc_interval: Duration::from_secs(gc_interval_secs),
            ranking_refresh: self.ranking_refresh_secs.map(Duration::from_secs),
            faction_refresh: self.faction_refresh_secs.map(Duration::from_secs),
            bans_cron: self.bans_cron.filter(|expr| !expr.trim().is_empty()),
            page_max_age_secs: self.page_max_age_secs.unwrap_or(15 * 60),
        })
    }
}

/// # Canvas Settings
///
/// The resolved process configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct CanvasSettings {
    pub bind_addr: SocketAddr,
    /// The config file that was merged in, if any.
    pub config_path: Option<PathBuf>,
    pub database_url: String,
    pub discord_invite: String,
    pub public_dir: PathBuf,
    pub tiles_dir: Option<PathBuf>,
    pub chunks_dir: PathBuf,
    pub assets_path: PathBuf,
    pub log_dir: PathBuf,
    pub log_level: String,
    pub gc_interval: Duration,
    pub ranking_refresh: Option<Duration>,
    pub faction_refresh: Option<Duration>,
    pub bans_cron: Option<String>,
    pub page_max_age_secs: u64,
}

/// Loads the configuration from the process arguments and environment.
pub fn load_config() -> Result<CanvasSettings, ConfigError> {
    load_config_from(std::env::args_os())
}

/// Loads the configuration from `args` (first item is the program name).
///
/// A config file named with `--config-path` must exist. The default file is
/// optional.
pub fn load_config_from<I, T>(args: I) -> Result<CanvasSettings, ConfigError>
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    let cli = CanvasConfig::try_parse_from(args)?;

    let (file_path, explicit) = match &cli.config_path {
        Some(path) => (path.clone(), true),
        None => (PathBuf::from(DEFAULT_CONFIG_FILE), false),
    };

    let mut merged = CanvasConfig::defaults();
    let mut loaded_from = None;
    if explicit || file_path.exists() {
        merged = merged.merge(CanvasConfig::from_json_file(&file_path)?);
        loaded_from = Some(file_path);
    }
    merged = merged.merge(cli);
    merged.config_path = loaded_from;

    merged.resolve()
}
