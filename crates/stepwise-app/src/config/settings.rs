//! Settings loader for stepwise.toml

use super::types::Settings;
use stepwise_core::prelude::*;
use std::path::{Path, PathBuf};

/// Environment variable naming an alternate config file
pub const CONFIG_ENV: &str = "STEPWISE_CONFIG";

const CONFIG_DIR: &str = "stepwise";
const CONFIG_FILENAME: &str = "config.toml";

const DEFAULT_CONFIG: &str = r#"# stepwise configuration

[limits]
# Maximum number of step commands per run
steps = 1000
# Per-command time limit in milliseconds
timeout_ms = 5000
# Time a stopped tracer gets to exit before it is killed
shutdown_grace_ms = 500

[output]
verbose = false

# One table per language. `policy = "lenient"` skips stdout lines that are
# not result batches (startup banners and the like).
#
# [tracers.python]
# command = "python3 tracers/python/main.py"
# policy = "strict"
"#;

/// Where the config file is looked up, in order: the `--config` flag,
/// `STEPWISE_CONFIG`, then the user config directory.
pub fn resolve_config_path(explicit: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit {
        return Some(path.to_path_buf());
    }

    if let Ok(path) = std::env::var(CONFIG_ENV) {
        if !path.is_empty() {
            return Some(PathBuf::from(path));
        }
    }

    dirs::config_dir().map(|dir| dir.join(CONFIG_DIR).join(CONFIG_FILENAME))
}

/// Load settings from `config_path`, falling back to defaults.
///
/// A missing file is normal; an unreadable or invalid one is logged.
pub fn load_settings(config_path: &Path) -> Settings {
    if !config_path.exists() {
        debug!("No config file at {:?}, using defaults", config_path);
        return Settings::default();
    }

    match std::fs::read_to_string(config_path) {
        Ok(content) => match toml::from_str::<Settings>(&content) {
            Ok(settings) => match settings.validate() {
                Ok(()) => {
                    debug!("Loaded settings from {:?}", config_path);
                    settings
                }
                Err(e) => {
                    warn!("Ignoring {:?}: {}", config_path, e);
                    Settings::default()
                }
            },
            Err(e) => {
                warn!("Failed to parse {:?}: {}", config_path, e);
                Settings::default()
            }
        },
        Err(e) => {
            warn!("Failed to read {:?}: {}", config_path, e);
            Settings::default()
        }
    }
}

/// Load settings from a path the user named on the command line.
///
/// Unlike [`load_settings`], a missing or invalid file is an error.
pub fn load_settings_strict(config_path: &Path) -> Result<Settings> {
    if !config_path.exists() {
        return Err(Error::ConfigNotFound {
            path: config_path.to_path_buf(),
        });
    }

    let content = std::fs::read_to_string(config_path)
        .with_context(|| format!("Failed to read {:?}", config_path))?;
    let settings: Settings = toml::from_str(&content)
        .map_err(|e| Error::config(format!("Failed to parse {:?}: {}", config_path, e)))?;
    settings.validate()?;
    Ok(settings)
}

/// Resolve and load the config for this run.
pub fn load_config(explicit: Option<&Path>) -> Result<Settings> {
    if let Some(path) = explicit {
        return load_settings_strict(path);
    }

    Ok(resolve_config_path(None)
        .map(|path| load_settings(&path))
        .unwrap_or_default())
}

/// Write a commented default config to `config_path` unless one exists.
///
/// Returns `true` if a file was created.
pub fn init_config_file(config_path: &Path) -> Result<bool> {
    if config_path.exists() {
        debug!("Config already exists at {:?}", config_path);
        return Ok(false);
    }

    if let Some(parent) = config_path.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|e| Error::config(format!("Failed to create {:?}: {}", parent, e)))?;
    }

    std::fs::write(config_path, DEFAULT_CONFIG)
        .map_err(|e| Error::config(format!("Failed to write {:?}: {}", config_path, e)))?;
    info!("Created default config at {:?}", config_path);
    Ok(true)
}
