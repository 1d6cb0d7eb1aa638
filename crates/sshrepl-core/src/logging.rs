//! Logging setup.
//!
//! Server events are emitted with `tracing` and carry connection-scoped
//! fields (`peer`, `identity`, `method`, `channel`). This module installs the
//! subscriber that renders them, to stderr or an append-only file, as text
//! or one JSON object per line.

use std::fs::OpenOptions;
use std::path::Path;

use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, Registry, fmt};

use crate::{Error, Result};

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Text,
    /// One JSON object per event.
    Json,
}

/// Default filter for a `-v` count.
///
/// Our crates follow the count. russh is chatty at `debug` (every packet),
/// so it stays at `warn` until the highest verbosity.
fn filter_directives(verbosity: u8) -> String {
    let (ours, russh) = match verbosity {
        0 => ("error", "error"),
        1 => ("warn", "warn"),
        2 => ("info", "warn"),
        3 => ("debug", "warn"),
        _ => ("trace", "debug"),
    };
    format!("sshrepl_core={ours},sshrepl_server={ours},russh={russh},russh_keys={russh}")
}

/// Install the global subscriber.
///
/// `RUST_LOG` replaces the verbosity-derived filter when set. Fails if a
/// subscriber is already installed or the log file cannot be opened.
pub fn init_logging(verbosity: u8, log_file: Option<&Path>, format: LogFormat) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(filter_directives(verbosity)));

    let (writer, to_terminal) = match log_file {
        Some(path) => {
            let file = OpenOptions::new().create(true).append(true).open(path)?;
            (BoxMakeWriter::new(file), false)
        }
        None => (BoxMakeWriter::new(std::io::stderr), true),
    };

    let layer: Box<dyn Layer<Registry> + Send + Sync> = match format {
        LogFormat::Text => fmt::layer()
            .with_writer(writer)
            .with_ansi(to_terminal)
            .with_target(true)
            .with_file(verbosity >= 3)
            .with_line_number(verbosity >= 3)
            .boxed(),
        LogFormat::Json => fmt::layer()
            .json()
            .with_current_span(false)
            .with_writer(writer)
            .boxed(),
    };

    tracing_subscriber::registry()
        .with(layer)
        .with(filter)
        .try_init()
        .map_err(|e| Error::Io(std::io::Error::other(e.to_string())))
}

/// Debug-level text logging for tests. Later calls are no-ops.
pub fn init_test_logging() {
    let _ = init_logging(3, None, LogFormat::Text);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quiet_by_default() {
        assert_eq!(
            filter_directives(0),
            "sshrepl_core=error,sshrepl_server=error,russh=error,russh_keys=error"
        );
    }

    #[test]
    fn russh_held_back_until_trace() {
        assert!(filter_directives(3).contains("sshrepl_server=debug,russh=warn"));
        assert!(filter_directives(4).contains("sshrepl_core=trace"));
        assert!(filter_directives(9).contains("russh=debug"));
    }

    #[test]
    fn directives_parse() {
        for verbosity in 0..5 {
            assert!(EnvFilter::try_new(filter_directives(verbosity)).is_ok());
        }
    }

    #[test]
    fn repeated_test_init_is_harmless() {
        init_test_logging();
        init_test_logging();
    }
}
