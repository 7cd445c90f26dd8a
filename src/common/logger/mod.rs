//! Process-wide `tracing` setup for the `dvdemux` binary.
//!
//! The library never installs a subscriber; embedders bring their own.

use std::{fs, path::Path};

use tracing_subscriber::{EnvFilter, fmt, prelude::*};

pub mod formatter;
pub mod writer;

pub use formatter::DemuxFormatter;
pub use writer::LineCappedFileWriter;

use crate::configs::LoggingConfig;

const DEFAULT_LEVEL: &str = "info";

/// Build the filter directive string from the logging config.
///
/// `RUST_LOG` still takes precedence when it is set.
pub fn filter_directives(config: &LoggingConfig) -> String {
    let level = config.level.as_deref().unwrap_or(DEFAULT_LEVEL);
    match config.filters.as_deref() {
        Some(filters) if !filters.is_empty() => format!("{},{}", level, filters),
        _ => level.to_string(),
    }
}

pub fn init(config: &LoggingConfig) {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(filter_directives(config)));

    let stdout_layer = fmt::layer()
        .event_format(DemuxFormatter::new(true))
        .with_ansi(true);

    let file_layer = config.file.as_ref().map(|file_config| {
        if let Some(parent) = Path::new(&file_config.path).parent() {
            if let Err(e) = fs::create_dir_all(parent) {
                eprintln!("Failed to create log directory: {}", e);
            }
        }

        fmt::layer()
            .with_writer(LineCappedFileWriter::new(
                file_config.path.clone(),
                file_config.max_lines,
            ))
            .event_format(DemuxFormatter::new(false))
            .with_ansi(false)
    });

    tracing_subscriber::registry()
        .with(env_filter)
        .with(stdout_layer)
        .with(file_layer)
        .init();
}
