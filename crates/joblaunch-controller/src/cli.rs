//! Command-line arguments for the `launcher` binary.

use std::ffi::OsString;
use std::path::PathBuf;

use clap::Parser;

use joblaunch_core::LauncherConfig;

use crate::session::LaunchRequest;

#[derive(Parser, Debug)]
#[command(name = "launcher")]
#[command(
    version,
    about = "Launch an executable across remote hosts and wait for every host to report"
)]
pub struct Args {
    /// Number of instances each host should run
    #[arg(long = "np", value_name = "INSTANCE_COUNT")]
    pub instances: u32,

    /// File listing one host (`host` or `host:port`) per line
    #[arg(long = "hostfile", value_name = "PATH")]
    pub hostfile: PathBuf,

    /// Path of the executable on the remote hosts
    #[arg(value_name = "EXECUTABLE")]
    pub executable: String,

    /// Explicit config file (JSON), layered over the global config and under the environment
    #[arg(long, env = "JOBLAUNCH_CONFIG")]
    pub config: Option<PathBuf>,

    /// Default agent port for hostfile entries without one
    #[arg(long)]
    pub port: Option<u16>,

    /// Per-host connect timeout in seconds
    #[arg(long = "connect-timeout", value_name = "SECS")]
    pub connect_timeout: Option<u64>,

    /// Log level filter (e.g. "info", "debug", "warn")
    #[arg(long)]
    pub log_level: Option<String>,

    /// Output logs as JSON
    #[arg(long, env = "JOBLAUNCH_LOG_JSON")]
    pub log_json: bool,
}

impl Args {
    /// Parse from an argument list that may use single-dash long flags.
    pub fn try_parse_normalized<I, T>(args: I) -> Result<Self, clap::Error>
    where
        I: IntoIterator<Item = T>,
        T: Into<OsString>,
    {
        Self::try_parse_from(normalize_args(args))
    }

    /// Apply CLI overrides on top of the resolved config.
    pub fn apply_overrides(&self, config: &mut LauncherConfig) {
        if let Some(port) = self.port {
            config.port = port;
        }
        if let Some(secs) = self.connect_timeout {
            config.connect_timeout_secs = secs;
        }
        if let Some(level) = &self.log_level {
            config.log_level.clone_from(level);
        }
    }

    pub fn launch_request(&self) -> LaunchRequest {
        LaunchRequest::new(self.instances, self.executable.clone(), self.hostfile.clone())
    }
}

/// Rewrite `-np` and `-hostfile` to their double-dash forms.
///
/// Arguments after a bare `--` are left alone, as is the program name.
pub fn normalize_args<I, T>(args: I) -> Vec<OsString>
where
    I: IntoIterator<Item = T>,
    T: Into<OsString>,
{
    let mut positional_only = false;
    args.into_iter()
        .enumerate()
        .map(|(index, arg)| {
            let arg: OsString = arg.into();
            if index == 0 || positional_only {
                return arg;
            }
            if arg == "--" {
                positional_only = true;
                return arg;
            }
            match arg.to_str() {
                Some("-np") => "--np".into(),
                Some("-hostfile") => "--hostfile".into(),
                Some(s) if s.starts_with("-np=") || s.starts_with("-hostfile=") => {
                    format!("-{s}").into()
                }
                _ => arg,
            }
        })
        .collect()
}
