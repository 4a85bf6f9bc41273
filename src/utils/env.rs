//! Settings from the environment: process env first, then `.env` in the working directory.

use log::debug;
use std::path::{Path, PathBuf};

use super::config::EnvKeys;

fn non_empty(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

/// Value of `key` from the environment, loading `dir/.env` when the variable is unset.
pub fn env_value(dir: &Path, key: &str) -> Option<String> {
    if let Some(v) = non_empty(key) {
        return Some(v);
    }
    let env_path = dir.join(".env");
    if env_path.is_file() {
        if let Err(e) = dotenvy::from_path(&env_path) {
            debug!("{}: {}", env_path.display(), e);
        }
        return non_empty(key);
    }
    None
}

/// Profile database override (`SEEDSCAN_DB`).
pub fn env_db_path(dir: &Path) -> Option<PathBuf> {
    env_value(dir, EnvKeys::DB).map(PathBuf::from)
}

/// Remote oracle address override (`SEEDSCAN_REMOTE`).
pub fn env_remote(dir: &Path) -> Option<String> {
    env_value(dir, EnvKeys::REMOTE)
}
