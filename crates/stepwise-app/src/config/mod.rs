//! Configuration file parsing for stepwise
//!
//! Reads `stepwise.toml` from `--config`, `STEPWISE_CONFIG` or the user
//! config directory.

pub mod settings;
pub mod types;

pub use settings::{
    init_config_file, load_config, load_settings, load_settings_strict, resolve_config_path,
    CONFIG_ENV,
};
pub use types::*;
