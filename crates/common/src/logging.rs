// MPDB - MicroPython Debugger
// Copyright (C) 2024 Zhuo Zhang and Wuqi Zhang
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! Logging configuration for MPDB components
//!
//! Console output goes to stderr so that command output on stdout stays clean
//! for piping (e.g. `mpdb heap > heap.dot`). File logging lands in a per-component
//! directory under the system temp folder with daily rotation. `RUST_LOG` always
//! takes precedence over the built-in defaults.

use eyre::Result;
use std::{env, fs, io, path::PathBuf, sync::Once};
use tracing::Level;
use tracing_appender::{non_blocking, rolling};
use tracing_subscriber::{
    fmt::{self, time::LocalTime},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter, Layer,
};

/// Default filter directive when `RUST_LOG` is not set.
///
/// The inspector is chatty at `info` while walking a heap, so the console
/// default is `warn`; file logs keep everything down to `debug`.
pub const DEFAULT_CONSOLE_DIRECTIVE: &str = "warn";

/// Default filter directive for the rolling log file.
pub const DEFAULT_FILE_DIRECTIVE: &str = "debug";

/// Initialize logging for an MPDB component
///
/// This function sets up:
/// - Console logging to stderr with timestamps and targets
/// - Optional file logging to a temporary directory with daily rotation
/// - Environment variable support for log levels (RUST_LOG)
///
/// # Arguments
/// * `component_name` - Name of the component (e.g., "mpdb")
/// * `enable_file_logging` - Whether to also write a rolling log file
///
/// # Examples
/// ```rust
/// use mpdb_common::logging;
///
/// fn main() -> eyre::Result<()> {
///     logging::init_logging("mpdb", false)?;
///     tracing::info!("Inspector started");
///     Ok(())
/// }
/// ```
pub fn init_logging(component_name: &str, enable_file_logging: bool) -> Result<()> {
    let console_layer = fmt::layer()
        .with_target(true)
        .with_file(false)
        .with_line_number(false)
        .with_timer(LocalTime::rfc_3339())
        .with_ansi(true)
        .with_writer(io::stderr)
        .with_filter(filter_for_console()?);

    if enable_file_logging {
        let log_dir = create_log_directory(component_name)?;

        let file_appender = rolling::daily(&log_dir, format!("{component_name}.log"));
        let (non_blocking_appender, guard) = non_blocking(file_appender);

        // The guard flushes on drop; the subscriber lives for the whole process.
        std::mem::forget(guard);

        let file_layer = fmt::layer()
            .with_target(true)
            .with_thread_ids(true)
            .with_file(true)
            .with_line_number(true)
            .with_timer(LocalTime::rfc_3339())
            .with_ansi(false)
            .with_writer(non_blocking_appender)
            .with_filter(filter_for_file()?);

        tracing_subscriber::registry()
            .with(console_layer)
            .with(file_layer)
            .try_init()
            .map_err(|e| eyre::eyre!("Failed to initialize tracing subscriber: {}", e))?;

        tracing::info!(
            component = component_name,
            log_dir = %log_dir.display(),
            "Logging initialized with console and file output"
        );
    } else {
        tracing_subscriber::registry()
            .with(console_layer)
            .try_init()
            .map_err(|e| eyre::eyre!("Failed to initialize tracing subscriber: {}", e))?;

        tracing::debug!(component = component_name, "Logging initialized with console output only");
    }

    log_environment_info(component_name);

    Ok(())
}

/// Create log directory in system temp folder
fn create_log_directory(component_name: &str) -> Result<PathBuf> {
    let log_dir = env::temp_dir().join("mpdb-logs").join(component_name);
    fs::create_dir_all(&log_dir)?;
    Ok(log_dir)
}

fn filter_or_default(default_directive: &str) -> Result<EnvFilter> {
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_directive))
        .map_err(|e| eyre::eyre!("Failed to create environment filter: {}", e))
}

/// Filter for console output
fn filter_for_console() -> Result<EnvFilter> {
    filter_or_default(DEFAULT_CONSOLE_DIRECTIVE)
}

/// Filter for file output - more verbose for post-mortem reading
fn filter_for_file() -> Result<EnvFilter> {
    filter_or_default(DEFAULT_FILE_DIRECTIVE)
}

fn log_environment_info(component_name: &str) {
    let rust_log = env::var("RUST_LOG").unwrap_or_else(|_| DEFAULT_CONSOLE_DIRECTIVE.to_string());
    let args: Vec<String> = env::args().collect();

    tracing::debug!(
        component = component_name,
        rust_log = %rust_log,
        args = ?args,
        "Environment information"
    );
}

/// Initialize simple logging (compact console output on stderr)
///
/// Useful for tests and small utilities that don't need file output.
///
/// # Arguments
/// * `level` - The default log level to use
pub fn init_simple_logging(level: Level) -> Result<()> {
    let env_filter = filter_or_default(level.as_str())?;

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_writer(io::stderr)
        .compact()
        .try_init()
        .map_err(|e| eyre::eyre!("Failed to initialize simple logging: {}", e))?;

    Ok(())
}

// Logging is set up at most once per test process.
static TEST_LOGGING_INIT: Once = Once::new();

/// Safe logging initialization for tests - can be called multiple times without crashing
///
/// Uses `std::sync::Once` so that only the first call installs a subscriber.
/// Defaults to INFO but respects RUST_LOG.
///
/// # Usage
/// ```rust
/// use mpdb_common::logging;
///
/// #[test]
/// fn my_test() {
///     logging::ensure_test_logging(None);
///     tracing::info!("This will work safely in any test!");
/// }
/// ```
pub fn ensure_test_logging(default_level: Option<Level>) {
    TEST_LOGGING_INIT.call_once(|| {
        let default_level = default_level.unwrap_or(Level::INFO);
        // A subscriber installed elsewhere is fine for tests.
        let _ = init_simple_logging(default_level);
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing::{debug, info, warn};

    #[test]
    fn test_logging_functions_work() {
        ensure_test_logging(None);

        info!("Test info message");
        warn!("Test warning message");
        debug!("Test debug message");
    }

    #[test]
    fn test_log_directory_creation() {
        let log_dir = create_log_directory("test-component").unwrap();
        assert!(log_dir.exists());
        assert!(log_dir.to_string_lossy().contains("mpdb-logs"));
        assert!(log_dir.to_string_lossy().contains("test-component"));
    }

    #[test]
    fn test_environment_filters() {
        let console_filter = filter_for_console().unwrap();
        let file_filter = filter_for_file().unwrap();

        assert!(!console_filter.to_string().is_empty());
        assert!(!file_filter.to_string().is_empty());
    }

    #[test]
    fn test_repeated_initialization_does_not_panic() {
        ensure_test_logging(None);

        // A subscriber is already installed, so both attempts are expected to fail gracefully.
        let first = init_logging("test-mpdb-1", false);
        let second = init_logging("test-mpdb-2", false);
        assert!(first.is_err() || second.is_err());

        info!("Test logging after repeated init attempts");
    }
}
