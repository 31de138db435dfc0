//! File logging for stepwise
//!
//! stdout carries NDJSON events, so log lines only ever go to a daily file
//! under the user data directory. `STEPWISE_LOG` picks the filter when set.
//! Otherwise the filter follows the config's `output.verbose` flag, which is
//! only known after the config has been loaded, so it is applied through a
//! reload handle.
//!
//! ```bash
//! STEPWISE_LOG=debug stepwise run --language python
//! STEPWISE_LOG=stepwise_tracer=trace stepwise repl --command ./tracer
//! ```

use std::path::{Path, PathBuf};

use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, prelude::*, reload, EnvFilter, Registry};

use crate::error::{Error, Result};

/// Environment variable that overrides the log filter
pub const LOG_ENV: &str = "STEPWISE_LOG";

const LOG_FILE_PREFIX: &str = "stepwise.log";

/// Filter used when `STEPWISE_LOG` is unset.
///
/// The `stepwise` target prefix covers every crate in the workspace.
pub fn default_filter(verbose: bool) -> &'static str {
    if verbose {
        "stepwise=debug,warn"
    } else {
        "stepwise=info,warn"
    }
}

/// Where log files are written.
pub fn log_directory() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("stepwise")
        .join("logs")
}

/// Installed logger, kept so the filter can follow the loaded config.
pub struct LogHandle {
    directory: PathBuf,
    filter: reload::Handle<EnvFilter, Registry>,
    from_env: bool,
}

impl LogHandle {
    pub fn directory(&self) -> &Path {
        &self.directory
    }

    /// Switch between the quiet and verbose default filters.
    ///
    /// No-op when `STEPWISE_LOG` chose the filter.
    pub fn set_verbose(&self, verbose: bool) {
        if self.from_env {
            return;
        }

        match self
            .filter
            .reload(EnvFilter::new(default_filter(verbose)))
        {
            Ok(()) => tracing::debug!("Log filter set to {}", default_filter(verbose)),
            Err(e) => tracing::warn!("Failed to change log filter: {}", e),
        }
    }
}

/// Install the global file logger.
pub fn init() -> Result<LogHandle> {
    let directory = log_directory();
    std::fs::create_dir_all(&directory)?;

    let file_appender = RollingFileAppender::new(Rotation::DAILY, &directory, LOG_FILE_PREFIX);

    let (env_filter, from_env) = match EnvFilter::try_from_env(LOG_ENV) {
        Ok(filter) => (filter, true),
        Err(_) => (EnvFilter::new(default_filter(false)), false),
    };
    let (filter_layer, filter) = reload::Layer::new(env_filter);

    tracing_subscriber::registry()
        .with(filter_layer)
        .with(
            fmt::layer()
                .with_writer(file_appender)
                .with_ansi(false)
                .with_target(true)
                .with_file(true)
                .with_line_number(true)
                .with_timer(fmt::time::ChronoLocal::new(
                    "%Y-%m-%d %H:%M:%S%.3f".to_string(),
                )),
        )
        .try_init()
        .map_err(|e| Error::config(format!("Failed to install logger: {}", e)))?;

    tracing::info!(
        "stepwise {} logging to {}",
        env!("CARGO_PKG_VERSION"),
        directory.display()
    );

    Ok(LogHandle {
        directory,
        filter,
        from_env,
    })
}
