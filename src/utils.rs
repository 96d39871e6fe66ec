use std::{
    ffi::OsString,
    fs, io,
    path::{Path, PathBuf},
};

use once_cell::sync::Lazy;

const APP_DIR: &str = "temple-events";
const DATA_DIR_VAR: &str = "TEMPLE_DATA_DIR";

/// Cache and config live here. `TEMPLE_DATA_DIR` replaces the platform
/// data directory entirely.
static DATA_ROOT: Lazy<PathBuf> =
    Lazy::new(|| resolve_data_root(std::env::var_os(DATA_DIR_VAR), dirs::data_dir()));

fn resolve_data_root(override_dir: Option<OsString>, platform_dir: Option<PathBuf>) -> PathBuf {
    match override_dir.filter(|dir| !dir.is_empty()) {
        Some(dir) => PathBuf::from(dir),
        None => platform_dir
            .unwrap_or_else(|| PathBuf::from("."))
            .join(APP_DIR),
    }
}

pub fn database_path() -> PathBuf {
    DATA_ROOT.join("events-cache.sqlite")
}

pub fn config_path() -> PathBuf {
    DATA_ROOT.join("config.json")
}

/// Creates whatever directories are missing above `path`.
pub fn ensure_parent(path: &Path) -> io::Result<()> {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => fs::create_dir_all(parent),
        _ => Ok(()),
    }
}
