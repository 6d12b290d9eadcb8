//! Structured logging setup
//!
//! Installs a `tracing` subscriber writing to stderr, as text or JSON Lines.
//! `RUST_LOG` overrides the verbosity derived from `-v`.

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::cli::LogFormat;
use crate::errors::PodtunnelError;

/// Filter directive for a `-v` count
///
/// 0 = warn, 1 = info, 2 = debug, 3+ = trace. kube and hyper stay one level
/// quieter so relay traffic is not drowned in transport noise.
pub fn filter_directive(verbosity: u8) -> String {
    let (ours, deps) = match verbosity {
        0 => ("warn", "error"),
        1 => ("info", "warn"),
        2 => ("debug", "info"),
        _ => ("trace", "debug"),
    };
    format!("podtunnel={},kube={},hyper={},{}", ours, deps, deps, deps)
}

/// Initialize the logging system
pub fn init_logging(verbosity: u8, format: LogFormat) -> Result<(), PodtunnelError> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(filter_directive(verbosity)));

    let result = match format {
        LogFormat::Text => tracing_subscriber::registry()
            .with(filter)
            .with(
                fmt::layer()
                    .with_writer(std::io::stderr)
                    .with_target(verbosity >= 2)
                    .with_file(verbosity >= 3)
                    .with_line_number(verbosity >= 3),
            )
            .try_init(),
        LogFormat::Json => tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .try_init(),
    };

    result.map_err(|e| PodtunnelError::Io(std::io::Error::other(e.to_string())))
}
