//! Logging bootstrap for the launcher binary.
//!
//! The launcher's stdout is its job output: every status report a host sends
//! back is echoed there, one line each, and callers may pipe or capture it.
//! Diagnostics therefore never touch stdout. They go to stderr, either as
//! human-readable lines or as JSON objects for log collectors.

use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Install the global subscriber, writing to stderr.
///
/// `RUST_LOG` wins over `default_filter` when it parses; an unparsable value
/// is reported once the subscriber is up and the default is used instead.
/// A second call leaves the first subscriber in place.
pub fn init_tracing(default_filter: &str, log_json: bool) {
    let rust_log = std::env::var("RUST_LOG").ok();
    let (filter, rejected) = build_filter(default_filter, rust_log.as_deref());

    let json = log_json.then(|| fmt::layer().json().with_writer(std::io::stderr));
    let text = (!log_json).then(|| fmt::layer().with_writer(std::io::stderr));
    let installed = tracing_subscriber::registry()
        .with(filter)
        .with(json)
        .with(text)
        .try_init()
        .is_ok();

    if let (true, Some(value)) = (installed, rejected) {
        tracing::warn!(
            rust_log = %value,
            fallback = default_filter,
            "Ignoring unparsable RUST_LOG"
        );
    }
}

/// Directive enabling `level` for the library crates and the binary.
pub fn default_filter(level: &str) -> String {
    format!("joblaunch_core={level},joblaunch_controller={level},launcher={level}")
}

/// Pick the `RUST_LOG` directives if they parse, else `default_filter`.
/// Also returns the rejected `RUST_LOG` value, if any.
fn build_filter<'a>(
    default_filter: &str,
    rust_log: Option<&'a str>,
) -> (EnvFilter, Option<&'a str>) {
    match rust_log.map(EnvFilter::try_new) {
        Some(Ok(filter)) => (filter, None),
        Some(Err(_)) => (EnvFilter::new(default_filter), rust_log),
        None => (EnvFilter::new(default_filter), None),
    }
}
