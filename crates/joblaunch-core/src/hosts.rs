//! Host registry and hostfile ingestion.
//!
//! The registry keeps hosts in hostfile order. That order is the dispatch
//! order and the positional index used to correlate connection slots.

use std::fmt;
use std::path::Path;

use tracing::{debug, info};

use crate::config::LauncherConfig;
use crate::error::{Error, Result};

/// Opaque handle to one live transport connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// One target machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostEntry {
    hostname: String,
    port: u16,
    connection: Option<ConnectionId>,
}

impl HostEntry {
    pub fn hostname(&self) -> &str {
        &self.hostname
    }

    pub const fn port(&self) -> u16 {
        self.port
    }

    /// `host:port` form used for logging and connecting.
    pub fn address(&self) -> String {
        if self.hostname.contains(':') {
            format!("[{}]:{}", self.hostname, self.port)
        } else {
            format!("{}:{}", self.hostname, self.port)
        }
    }

    /// Live connection handle, if setup connected this host.
    pub const fn connection(&self) -> Option<ConnectionId> {
        self.connection
    }

    pub const fn is_connected(&self) -> bool {
        self.connection.is_some()
    }

    pub fn attach(&mut self, conn: ConnectionId) {
        self.connection = Some(conn);
    }

    /// Invalidate the connection handle, returning it if one was set.
    pub fn detach(&mut self) -> Option<ConnectionId> {
        self.connection.take()
    }
}

/// Errors from host registry operations.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("Host registry full ({max} hosts)")]
    CapacityExceeded { max: usize },

    #[error("Hostname is {len} bytes, longer than the {max}-byte limit")]
    HostnameTooLong { len: usize, max: usize },

    #[error("Invalid host entry {entry:?}: {reason}")]
    InvalidHostEntry { entry: String, reason: String },
}

/// Ordered, bounded collection of host entries.
#[derive(Debug, Clone)]
pub struct HostRegistry {
    entries: Vec<HostEntry>,
    max_hosts: usize,
    max_hostname_len: usize,
}

impl Default for HostRegistry {
    fn default() -> Self {
        Self::new(
            crate::config::DEFAULT_MAX_HOSTS,
            crate::config::DEFAULT_MAX_HOSTNAME_LEN,
        )
    }
}

impl HostRegistry {
    pub const fn new(max_hosts: usize, max_hostname_len: usize) -> Self {
        Self {
            entries: Vec::new(),
            max_hosts,
            max_hostname_len,
        }
    }

    /// Registry bounded by the limits in `config`.
    pub const fn from_config(config: &LauncherConfig) -> Self {
        Self::new(config.max_hosts, config.max_hostname_len)
    }

    /// Append a host. Oversized hostnames are rejected, never truncated.
    pub fn add(&mut self, hostname: &str, port: u16) -> std::result::Result<&HostEntry, RegistryError> {
        if self.entries.len() >= self.max_hosts {
            return Err(RegistryError::CapacityExceeded {
                max: self.max_hosts,
            });
        }
        if hostname.len() > self.max_hostname_len {
            return Err(RegistryError::HostnameTooLong {
                len: hostname.len(),
                max: self.max_hostname_len,
            });
        }
        if hostname.is_empty() {
            return Err(RegistryError::InvalidHostEntry {
                entry: hostname.to_string(),
                reason: "empty hostname".into(),
            });
        }
        if hostname.chars().any(char::is_whitespace) {
            return Err(RegistryError::InvalidHostEntry {
                entry: hostname.to_string(),
                reason: "hostname contains whitespace".into(),
            });
        }

        let index = self.entries.len();
        self.entries.push(HostEntry {
            hostname: hostname.to_string(),
            port,
            connection: None,
        });
        Ok(&self.entries[index])
    }

    pub fn count(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Hosts in insertion order.
    pub fn iter(&self) -> std::slice::Iter<'_, HostEntry> {
        self.entries.iter()
    }

    pub fn iter_mut(&mut self) -> std::slice::IterMut<'_, HostEntry> {
        self.entries.iter_mut()
    }

    pub fn get(&self, index: usize) -> Option<&HostEntry> {
        self.entries.get(index)
    }

    pub fn get_mut(&mut self, index: usize) -> Option<&mut HostEntry> {
        self.entries.get_mut(index)
    }

    /// Index of the host holding `conn`.
    pub fn position_of(&self, conn: ConnectionId) -> Option<usize> {
        self.entries
            .iter()
            .position(|entry| entry.connection == Some(conn))
    }

    /// Number of hosts with a live connection handle.
    pub fn connected_count(&self) -> usize {
        self.entries.iter().filter(|e| e.is_connected()).count()
    }

    /// Remove every entry, handing ownership to the caller.
    ///
    /// A second call returns an empty vector.
    pub fn release_all(&mut self) -> Vec<HostEntry> {
        std::mem::take(&mut self.entries)
    }
}

impl<'a> IntoIterator for &'a HostRegistry {
    type Item = &'a HostEntry;
    type IntoIter = std::slice::Iter<'a, HostEntry>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}

/// Split `host`, `host:port`, `[v6]:port` or a bare IPv6 literal.
fn split_host_port(entry: &str, default_port: u16) -> std::result::Result<(&str, u16), RegistryError> {
    let invalid = |reason: &str| RegistryError::InvalidHostEntry {
        entry: entry.to_string(),
        reason: reason.to_string(),
    };

    if let Some(rest) = entry.strip_prefix('[') {
        let (host, tail) = rest
            .split_once(']')
            .ok_or_else(|| invalid("unterminated '[' in address"))?;
        return match tail {
            "" => Ok((host, default_port)),
            _ => {
                let port = tail
                    .strip_prefix(':')
                    .ok_or_else(|| invalid("expected ':' after ']'"))?;
                let port = port.parse().map_err(|_| invalid("invalid port"))?;
                Ok((host, port))
            }
        };
    }

    match entry.split_once(':') {
        Some((host, port)) if !port.contains(':') => {
            let port = port.parse().map_err(|_| invalid("invalid port"))?;
            Ok((host, port))
        }
        // Bare hostname or IPv6 literal
        _ => Ok((entry, default_port)),
    }
}

/// Parse hostfile text into a registry.
///
/// Blank lines and `#` comments are skipped.
pub fn parse_hosts(content: &str, config: &LauncherConfig) -> Result<HostRegistry> {
    let mut registry = HostRegistry::from_config(config);

    for (index, raw) in content.lines().enumerate() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let line_no = index + 1;
        let (host, port) = split_host_port(line, config.port)
            .map_err(|source| Error::Registry { line: line_no, source })?;
        let entry = registry
            .add(host, port)
            .map_err(|source| Error::Registry { line: line_no, source })?;
        debug!(host = %entry.hostname(), port = entry.port(), line = line_no, "Registered host");
    }

    Ok(registry)
}

/// Read a hostfile from disk. An empty result is a configuration error.
pub fn load_hostfile(path: &Path, config: &LauncherConfig) -> Result<HostRegistry> {
    let content = std::fs::read_to_string(path).map_err(|source| Error::Hostfile {
        path: path.to_path_buf(),
        source,
    })?;
    let registry = parse_hosts(&content, config)?;
    if registry.is_empty() {
        return Err(Error::EmptyHostfile(path.to_path_buf()));
    }
    info!(path = %path.display(), hosts = registry.count(), "Loaded hostfile");
    Ok(registry)
}
