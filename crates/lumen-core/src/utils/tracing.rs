use chrono::Local;
use std::io;
use std::path::PathBuf;
use tracing_appender::rolling;
use tracing_subscriber::{
    EnvFilter,
    fmt::{self, format::FmtSpan},
    prelude::*,
};

const DEFAULT_FILTER: &str = "info";

/// Where log lines go.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogTarget {
    /// Standard output, for long-running services.
    Stdout,
    /// A timestamp-named file in the given directory, for interactive use
    /// where stdout carries the streamed reply.
    File(PathBuf),
}

impl LogTarget {
    /// `<data_dir>/lumen/logs`, falling back to stdout when no data directory exists.
    pub fn default_file() -> Self {
        match dirs::data_dir() {
            Some(dir) => LogTarget::File(dir.join("lumen").join("logs")),
            None => LogTarget::Stdout,
        }
    }
}

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER))
}

/// Initialize the global tracing subscriber. The filter comes from `RUST_LOG`
/// and defaults to `info`.
///
/// Returns an error if a global subscriber is already installed.
pub fn init_tracing(target: LogTarget) -> io::Result<()> {
    match target {
        LogTarget::File(log_dir) => {
            std::fs::create_dir_all(&log_dir)?;
            let file_name = format!("{}.log", Local::now().format("%Y%m%d_%H%M%S"));
            let file_appender = rolling::never(&log_dir, &file_name);

            tracing_subscriber::registry()
                .with(
                    fmt::Layer::new()
                        .with_writer(file_appender)
                        .with_ansi(false)
                        .with_span_events(FmtSpan::CLOSE)
                        .with_file(true)
                        .with_line_number(true),
                )
                .with(env_filter())
                .try_init()
                .map_err(io::Error::other)?;

            tracing::debug!(
                target: "lumen::utils::tracing",
                path = %log_dir.join(&file_name).display(),
                "Tracing initialized with file output"
            );
        }
        LogTarget::Stdout => {
            tracing_subscriber::registry()
                .with(fmt::Layer::default().with_ansi(true).with_target(true))
                .with(env_filter())
                .try_init()
                .map_err(io::Error::other)?;

            tracing::debug!(
                target: "lumen::utils::tracing",
                "Tracing initialized with stdout output"
            );
        }
    }

    Ok(())
}
