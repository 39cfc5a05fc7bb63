//! Command implementations.

pub mod cloud;
pub mod container;
pub mod dump;

use std::path::{Path, PathBuf};

use anyhow::Context;
use dbb_config::DbbConfig;
use tracing::debug;

const CONFIG_FILE: &str = "config.yaml";

/// Load configuration and resolve the worker to operate on.
pub fn load_config(path: Option<&Path>, worker: Option<&str>) -> anyhow::Result<DbbConfig> {
    let path = match path {
        Some(path) => path.to_path_buf(),
        None => default_config_path(),
    };
    debug!(path = %path.display(), "loading configuration");

    DbbConfig::load(&path, worker)
        .with_context(|| format!("failed to load configuration from {}", path.display()))
}

/// `./config.yaml` if present, else `config.yaml` at the top of the tree the
/// executable is installed in (`<top>/bin/dbb`).
fn default_config_path() -> PathBuf {
    let local = PathBuf::from(CONFIG_FILE);
    if local.is_file() {
        return local;
    }

    std::env::current_exe()
        .ok()
        .and_then(|exe| install_top_dir(&exe))
        .map(|top| top.join(CONFIG_FILE))
        .unwrap_or(local)
}

fn install_top_dir(exe: &Path) -> Option<PathBuf> {
    exe.parent()?.parent().map(Path::to_path_buf)
}
