use crate::error::{Error, Result};
use std::env;
use std::path::PathBuf;

/// Base berth config directory (~/.config/berth/ on Unix, %APPDATA%\berth on Windows).
/// `BERTH_CONFIG_DIR` overrides it.
pub fn berth() -> Result<PathBuf> {
    if let Ok(dir) = env::var("BERTH_CONFIG_DIR") {
        if !dir.trim().is_empty() {
            return Ok(PathBuf::from(shellexpand::tilde(&dir).to_string()));
        }
    }

    #[cfg(windows)]
    {
        let appdata = env::var("APPDATA").map_err(|_| {
            Error::internal_unexpected("APPDATA environment variable not set on Windows")
        })?;
        Ok(PathBuf::from(appdata).join("berth"))
    }

    #[cfg(not(windows))]
    {
        let home = env::var("HOME").map_err(|_| {
            Error::internal_unexpected("HOME environment variable not set on Unix-like system")
        })?;
        Ok(PathBuf::from(home).join(".config").join("berth"))
    }
}

/// Global berth.json config file path
pub fn berth_json() -> Result<PathBuf> {
    Ok(berth()?.join("berth.json"))
}

/// Projects directory
pub fn projects() -> Result<PathBuf> {
    Ok(berth()?.join("projects"))
}

/// Servers directory
pub fn servers() -> Result<PathBuf> {
    Ok(berth()?.join("servers"))
}

/// Deploy lock files
pub fn locks() -> Result<PathBuf> {
    Ok(berth()?.join("locks"))
}

pub fn project(id: &str) -> Result<PathBuf> {
    Ok(projects()?.join(format!("{}.json", id)))
}

pub fn server(id: &str) -> Result<PathBuf> {
    Ok(servers()?.join(format!("{}.json", id)))
}
