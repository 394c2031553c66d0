//! Configuration system for the EntraFlow workflow scheduler.
//!
//! Provides TOML-based configuration with:
//! - Orchestrator behaviour (retry policy, critical steps, input binding mode,
//!   conditional gate)
//! - Run-state persistence and logging settings
//! - Declarative workflow descriptors (`[workflows.<name>]`)
//! - Config file layering (XDG user config + project-local overrides)
//!
//! There is no process-wide instance: callers load an [`EntraflowConfig`] and
//! pass it to whatever needs it.

pub mod discovery;
pub mod error;
pub mod types;

pub use discovery::{
    ConfigSource, LoadedConfig, apply_env_overrides, load_config, load_config_file,
    load_config_with_options, save_config, xdg_config_dir, xdg_config_path,
};
pub use error::{ConfigError, Result};
pub use types::*;
