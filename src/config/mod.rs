pub mod types;

use std::path::{Path, PathBuf};

use crate::error::{PesaError, Result};
use types::PesaConfig;

/// Load config from an explicit path, or the XDG path when none is given.
/// A missing file means defaults.
pub fn load_config(explicit: Option<&Path>) -> Result<PesaConfig> {
    let path = match explicit {
        Some(p) => p.to_path_buf(),
        None => config_path(),
    };

    let cfg = if path.is_file() {
        let raw = std::fs::read_to_string(&path).map_err(|e| PesaError::io(&path, e))?;
        toml::from_str(&raw)
            .map_err(|e| PesaError::Config(format!("{}: {}", path.display(), e)))?
    } else if explicit.is_some() {
        return Err(PesaError::Config(format!(
            "config file not found: {}",
            path.display()
        )));
    } else {
        PesaConfig::default()
    };

    cfg.validate()?;
    Ok(cfg)
}

/// Return XDG config dir (~/.config/pesa/)
pub fn config_dir() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("~/.config"))
        .join("pesa")
}

pub fn config_path() -> PathBuf {
    config_dir().join("config.toml")
}

/// Return XDG data dir (~/.local/share/pesa/)
pub fn data_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("~/.local/share"))
        .join("pesa")
}

/// Return XDG cache dir (~/.cache/pesa/), home of the legacy JSON cache.
pub fn cache_dir() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(|| PathBuf::from("~/.cache"))
        .join("pesa")
}

/// Return XDG state dir (~/.local/state/pesa/)
pub fn state_dir() -> PathBuf {
    dirs::state_dir()
        .or_else(dirs::data_local_dir)
        .unwrap_or_else(|| PathBuf::from("~/.local/state"))
        .join("pesa")
}
