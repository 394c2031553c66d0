//! Tracing setup for processes embedding the scheduler.
//!
//! Installs a human-readable console layer and, when `[logging].file` is
//! set, a daily-rotated file layer (JSON when `[logging].json` is on). The
//! level comes from `RUST_LOG` when set, otherwise from `[logging].level`.

use entraflow_config::LoggingSection;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{EnvFilter, Layer, Registry};

use crate::error::{PipelineError, Result};

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

/// Install the global subscriber.
///
/// Returns the file writer's guard when a file layer is configured; keep it
/// alive for the life of the process or buffered lines are lost.
pub fn init_tracing(logging: &LoggingSection) -> Result<Option<WorkerGuard>> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => level_filter(&logging.level)?,
    };

    let mut layers: Vec<BoxedLayer> = Vec::new();
    let mut guard = None;

    if logging.console {
        let console = tracing_subscriber::fmt::layer().with_target(true);
        if logging.json {
            layers.push(console.json().boxed());
        } else {
            layers.push(console.boxed());
        }
    }

    if let Some(path) = &logging.file {
        let dir = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map(|p| p.to_path_buf())
            .unwrap_or_else(|| std::path::PathBuf::from("."));
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "entraflow.log".to_string());

        std::fs::create_dir_all(&dir).map_err(|e| {
            PipelineError::InitFailed(format!("cannot create log dir {}: {e}", dir.display()))
        })?;
        let appender = tracing_appender::rolling::daily(&dir, file_name);
        let (writer, file_guard) = tracing_appender::non_blocking(appender);
        guard = Some(file_guard);

        let file = tracing_subscriber::fmt::layer()
            .with_writer(writer)
            .with_ansi(false);
        if logging.json {
            layers.push(file.json().boxed());
        } else {
            layers.push(file.boxed());
        }
    }

    tracing_subscriber::registry()
        .with(layers)
        .with(filter)
        .try_init()
        .map_err(|e| PipelineError::InitFailed(e.to_string()))?;

    Ok(guard)
}

/// Filter for a configured level such as `"info"` or `"entraflow_pipeline=debug,warn"`.
pub fn level_filter(level: &str) -> Result<EnvFilter> {
    EnvFilter::try_new(level)
        .map_err(|e| PipelineError::InitFailed(format!("invalid log level '{level}': {e}")))
}
