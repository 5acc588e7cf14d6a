//! Configuration resolution for the launcher.
//!
//! Implements hierarchical config resolution, lowest priority first:
//! 1. Built-in defaults
//! 2. Global config (~/.config/joblaunch/settings.json)
//! 3. Explicit config file named by `--config` / `JOBLAUNCH_CONFIG`
//! 4. `JOBLAUNCH_*` environment variables
//! 5. CLI value flags (applied by the binary)
//!
//! `--config` only chooses which file forms layer 3. Its values sit below
//! the environment like any other file.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{Error, Result};

/// Port the remote agents listen on unless a hostfile entry says otherwise.
pub const DEFAULT_PORT: u16 = 25000;

/// Upper bound on a single inbound status line, in bytes.
pub const DEFAULT_RECV_BUFFER_SIZE: usize = 1024;

/// Largest instance count accepted for `-np`.
pub const DEFAULT_MAX_INSTANCES: u32 = 100;

/// Largest number of hosts a single session may address.
pub const DEFAULT_MAX_HOSTS: usize = 100;

/// Longest hostname accepted by the host registry, in bytes.
pub const DEFAULT_MAX_HOSTNAME_LEN: usize = 255;

/// Complete launcher configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LauncherConfig {
    /// Default remote agent port.
    pub port: u16,
    /// Maximum length of one inbound status line.
    pub recv_buffer_size: usize,
    /// Maximum accepted instance count.
    pub max_instances: u32,
    /// Host registry capacity.
    pub max_hosts: usize,
    /// Host registry hostname bound.
    pub max_hostname_len: usize,
    /// Per-host connect timeout (seconds).
    pub connect_timeout_secs: u64,
    /// Log level filter for the launcher crates.
    pub log_level: String,
}

impl Default for LauncherConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            recv_buffer_size: DEFAULT_RECV_BUFFER_SIZE,
            max_instances: DEFAULT_MAX_INSTANCES,
            max_hosts: DEFAULT_MAX_HOSTS,
            max_hostname_len: DEFAULT_MAX_HOSTNAME_LEN,
            connect_timeout_secs: 5,
            log_level: "info".to_string(),
        }
    }
}

impl LauncherConfig {
    /// Connect timeout as a `Duration`.
    pub const fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    /// Reject values the launcher cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.port == 0 {
            return Err(Error::Config("port must be non-zero".into()));
        }
        if self.recv_buffer_size == 0 {
            return Err(Error::Config("recv_buffer_size must be non-zero".into()));
        }
        if self.max_instances == 0 {
            return Err(Error::Config("max_instances must be non-zero".into()));
        }
        if self.max_hosts == 0 {
            return Err(Error::Config("max_hosts must be non-zero".into()));
        }
        if self.max_hostname_len == 0 {
            return Err(Error::Config("max_hostname_len must be non-zero".into()));
        }
        if self.connect_timeout_secs == 0 {
            return Err(Error::Config("connect_timeout_secs must be non-zero".into()));
        }
        Ok(())
    }
}

/// On-disk config layer; absent keys leave the lower layer untouched.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct ConfigFile {
    port: Option<u16>,
    recv_buffer_size: Option<usize>,
    max_instances: Option<u32>,
    max_hosts: Option<usize>,
    max_hostname_len: Option<usize>,
    connect_timeout_secs: Option<u64>,
    log_level: Option<String>,
}

/// Load configuration with hierarchical resolution.
///
/// `explicit` names a config file that must exist; the global file is only
/// read when present.
pub fn load_config(explicit: Option<&Path>) -> Result<LauncherConfig> {
    let global = global_config_path().filter(|path| path.exists());
    resolve_layers(global.as_deref(), explicit, |key| std::env::var(key).ok())
}

/// Stack the file and environment layers over the defaults, then validate.
fn resolve_layers<F>(
    global: Option<&Path>,
    explicit: Option<&Path>,
    env: F,
) -> Result<LauncherConfig>
where
    F: Fn(&str) -> Option<String>,
{
    let mut config = LauncherConfig::default();
    for path in [global, explicit].into_iter().flatten() {
        merge_config(&mut config, load_config_file(path)?);
    }
    apply_env_overrides(&mut config, env)?;
    config.validate()?;
    Ok(config)
}

/// Get the global config file path.
pub fn global_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join("joblaunch").join("settings.json"))
}

fn load_config_file(path: &Path) -> Result<ConfigFile> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        Error::Config(format!("Failed to read config file {}: {}", path.display(), e))
    })?;
    serde_json::from_str(&content).map_err(|e| {
        Error::Config(format!("Failed to parse config file {}: {}", path.display(), e))
    })
}

fn merge_config(base: &mut LauncherConfig, overlay: ConfigFile) {
    if let Some(port) = overlay.port {
        base.port = port;
    }
    if let Some(size) = overlay.recv_buffer_size {
        base.recv_buffer_size = size;
    }
    if let Some(max) = overlay.max_instances {
        base.max_instances = max;
    }
    if let Some(max) = overlay.max_hosts {
        base.max_hosts = max;
    }
    if let Some(len) = overlay.max_hostname_len {
        base.max_hostname_len = len;
    }
    if let Some(secs) = overlay.connect_timeout_secs {
        base.connect_timeout_secs = secs;
    }
    if let Some(level) = overlay.log_level {
        base.log_level = level;
    }
}

fn parse_env<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .parse()
        .map_err(|_| Error::Config(format!("Invalid value for {key}: {value:?}")))
}

fn apply_env_overrides<F>(config: &mut LauncherConfig, lookup: F) -> Result<()>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(val) = lookup("JOBLAUNCH_PORT") {
        config.port = parse_env("JOBLAUNCH_PORT", &val)?;
    }
    if let Some(val) = lookup("JOBLAUNCH_RECV_BUFFER_SIZE") {
        config.recv_buffer_size = parse_env("JOBLAUNCH_RECV_BUFFER_SIZE", &val)?;
    }
    if let Some(val) = lookup("JOBLAUNCH_MAX_INSTANCES") {
        config.max_instances = parse_env("JOBLAUNCH_MAX_INSTANCES", &val)?;
    }
    if let Some(val) = lookup("JOBLAUNCH_MAX_HOSTS") {
        config.max_hosts = parse_env("JOBLAUNCH_MAX_HOSTS", &val)?;
    }
    if let Some(val) = lookup("JOBLAUNCH_CONNECT_TIMEOUT_SECS") {
        config.connect_timeout_secs = parse_env("JOBLAUNCH_CONNECT_TIMEOUT_SECS", &val)?;
    }
    if let Some(val) = lookup("JOBLAUNCH_LOG_LEVEL") {
        config.log_level = val;
    }
    Ok(())
}
