//! Locating the harness configuration file.
//!
//! An explicit `--config` path wins. Otherwise `config.toml` in the user's
//! config directory is used when it exists, and defaults plus `VERITY__*`
//! environment variables apply when it does not.

use std::path::{Path, PathBuf};

use anyhow::{bail, Result};
use directories::ProjectDirs;

/// Configuration file name.
const CONFIG_FILE: &str = "config.toml";

/// Get the config directory path.
fn config_dir() -> Result<PathBuf> {
    ProjectDirs::from("io", "verity", "verity")
        .map(|dirs| dirs.config_dir().to_path_buf())
        .ok_or_else(|| anyhow::anyhow!("Could not determine config directory"))
}

/// The file to load, if any.
pub fn config_path(explicit: Option<PathBuf>) -> Result<Option<PathBuf>> {
    match explicit {
        Some(path) => {
            if !path.exists() {
                bail!("Config file {} does not exist", path.display());
            }
            Ok(Some(path))
        }
        None => default_in(&config_dir()?),
    }
}

fn default_in(dir: &Path) -> Result<Option<PathBuf>> {
    let path = dir.join(CONFIG_FILE);
    Ok(path.exists().then_some(path))
}
