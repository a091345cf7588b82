//! Resolved server configuration: CLI/env > TOML file > built-in default.
//! See `SPEC_FULL.md` §10.2.
//!
//! Adapted from the daemon's `config/mod.rs` `DaemonConfig`/`TomlConfig`
//! split and `default_data_dir()` platform dispatch. The daemon's
//! `ConfigWatcher`/`HotConfig` hot-reload machinery is intentionally not
//! ported: every field below requires a restart to change safely (see
//! `DESIGN.md`).

use std::path::{Path, PathBuf};

use serde::Deserialize;
use tracing::error;

const DEFAULT_LISTEN_ADDR: &str = "tcp://0.0.0.0:9000";
const DEFAULT_AUTH_TIMEOUT_SECS: u64 = 10;
const DEFAULT_HEARTBEAT_TIMEOUT_SECS: u64 = 90;

/// `{data_dir}/config.toml` — all fields are optional overrides.
#[derive(Deserialize, Default)]
struct TomlConfig {
    listen_addr: Option<String>,
    auth_timeout_secs: Option<u64>,
    heartbeat_timeout_secs: Option<u64>,
    /// 0 or unset disables the deadline, per `SPEC_FULL.md` §4.8.
    read_timeout_secs: Option<u64>,
    write_timeout_secs: Option<u64>,
    cert_file: Option<PathBuf>,
    key_file: Option<PathBuf>,
    log: Option<String>,
}

fn load_toml(data_dir: &Path) -> Option<TomlConfig> {
    let path = data_dir.join("config.toml");
    let contents = std::fs::read_to_string(&path).ok()?;
    match toml::from_str::<TomlConfig>(&contents) {
        Ok(cfg) => Some(cfg),
        Err(e) => {
            error!(path = %path.display(), err = %e, "failed to parse config.toml — using defaults");
            None
        }
    }
}

#[derive(Debug, Clone)]
pub struct CmConfig {
    pub listen_addr: String,
    pub auth_timeout_secs: u64,
    pub heartbeat_timeout_secs: u64,
    /// `0` disables the deadline, matching the TOML/CLI convention in
    /// `SPEC_FULL.md` §4.8.
    pub read_timeout_secs: u64,
    pub write_timeout_secs: u64,
    pub cert_file: Option<PathBuf>,
    pub key_file: Option<PathBuf>,
    pub log: String,
    pub data_dir: PathBuf,
}

impl CmConfig {
    /// Priority (highest to lowest): CLI/env — passed as `Some(value)` from
    /// clap — then the TOML file at `{data_dir}/config.toml`, then the
    /// built-in default.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        listen_addr: Option<String>,
        auth_timeout_secs: Option<u64>,
        heartbeat_timeout_secs: Option<u64>,
        read_timeout_secs: Option<u64>,
        write_timeout_secs: Option<u64>,
        cert_file: Option<PathBuf>,
        key_file: Option<PathBuf>,
        log: Option<String>,
        data_dir: Option<PathBuf>,
    ) -> Self {
        let data_dir = data_dir.unwrap_or_else(default_data_dir);
        let toml = load_toml(&data_dir).unwrap_or_default();

        CmConfig {
            listen_addr: listen_addr
                .or(toml.listen_addr)
                .unwrap_or_else(|| DEFAULT_LISTEN_ADDR.to_string()),
            auth_timeout_secs: auth_timeout_secs
                .or(toml.auth_timeout_secs)
                .unwrap_or(DEFAULT_AUTH_TIMEOUT_SECS),
            heartbeat_timeout_secs: heartbeat_timeout_secs
                .or(toml.heartbeat_timeout_secs)
                .unwrap_or(DEFAULT_HEARTBEAT_TIMEOUT_SECS),
            read_timeout_secs: read_timeout_secs.or(toml.read_timeout_secs).unwrap_or(0),
            write_timeout_secs: write_timeout_secs.or(toml.write_timeout_secs).unwrap_or(0),
            cert_file: cert_file.or(toml.cert_file),
            key_file: key_file.or(toml.key_file),
            log: log.or(toml.log).unwrap_or_else(|| "info".to_string()),
            data_dir,
        }
    }
}

fn default_data_dir() -> PathBuf {
    #[cfg(target_os = "macos")]
    {
        if let Ok(home) = std::env::var("HOME") {
            return PathBuf::from(home)
                .join("Library")
                .join("Application Support")
                .join("cm");
        }
    }
    #[cfg(target_os = "linux")]
    {
        if let Ok(xdg) = std::env::var("XDG_DATA_HOME") {
            return PathBuf::from(xdg).join("cm");
        }
        if let Ok(home) = std::env::var("HOME") {
            return PathBuf::from(home).join(".local").join("share").join("cm");
        }
    }
    #[cfg(target_os = "windows")]
    {
        if let Ok(appdata) = std::env::var("APPDATA") {
            return PathBuf::from(appdata).join("cm");
        }
    }
    PathBuf::from(".cm")
}
