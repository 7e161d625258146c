//! Optional JSON configuration file, merged over the built-in defaults at
//! startup. The file shares its shape with the API's partial patch: every
//! field optional, absent fields leave the defaults alone.

use std::path::{Path, PathBuf};

use color_eyre::Result;
use color_eyre::eyre::eyre;
use recap_store::document::ConfigPatch;

pub const CONFIG_FILE_NAME: &str = "config.json";

/// Resolves the configuration file location.
///
/// An empty input means the default location under the user config dir.
/// A directory (existing, or a path that looks like one) gets the default
/// file name appended. `~` expands to the home directory.
pub fn resolve_config_path(input: &str) -> PathBuf {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return default_config_path();
    }
    let path = expand_user_home(trimmed);
    if path.is_dir() {
        return path.join(CONFIG_FILE_NAME);
    }
    if !path.exists() && path.extension().is_none() {
        return path.join(CONFIG_FILE_NAME);
    }
    path
}

fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .map_or_else(|| PathBuf::from("."), |dir| dir.join("recap"))
        .join(CONFIG_FILE_NAME)
}

pub fn expand_user_home(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~") {
        if let Some(home) = dirs::home_dir() {
            if rest.is_empty() {
                return home;
            }
            if let Some(stripped) = rest.strip_prefix('/') {
                return home.join(stripped);
            }
        }
    }
    PathBuf::from(path)
}

/// Loads the configuration file if it exists.
///
/// A missing file is not an error; an empty file reads as an empty patch.
///
/// # Errors
/// Returns an error for an unreadable file, a directory where a file was
/// expected, or malformed JSON.
pub fn load_config_file(path: &Path) -> Result<Option<ConfigPatch>> {
    if !path.exists() {
        return Ok(None);
    }
    if path.is_dir() {
        return Err(eyre!("configuration file path points at a directory: {}", path.display()));
    }
    let data = std::fs::read_to_string(path)?;
    if data.trim().is_empty() {
        return Ok(Some(ConfigPatch::default()));
    }
    let patch: ConfigPatch = serde_json::from_str(&data)?;
    Ok(Some(patch))
}
