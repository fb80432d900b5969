use anyhow::Context;
use std::env;
use std::path::{Path, PathBuf};

fn home_dir() -> anyhow::Result<PathBuf> {
    // On Unix, HOME is standard; Windows gets USERPROFILE.
    let home = env::var_os("HOME")
        .or_else(|| env::var_os("USERPROFILE"))
        .context("HOME is not set")?;
    Ok(PathBuf::from(home))
}

fn ensure_dir(path: &Path) -> anyhow::Result<PathBuf> {
    std::fs::create_dir_all(path)
        .with_context(|| format!("failed to create directory: {}", path.display()))?;
    Ok(path.to_path_buf())
}

fn ag_home() -> Option<PathBuf> {
    env::var_os("AG_HOME").map(PathBuf::from)
}

/// Directory holding `config.toml`. Not created until something is written.
pub fn config_dir() -> anyhow::Result<PathBuf> {
    if let Some(base) = ag_home() {
        return Ok(base.join("config"));
    }

    if let Some(xdg) = env::var_os("XDG_CONFIG_HOME").map(PathBuf::from) {
        return Ok(xdg.join("ag"));
    }

    Ok(home_dir()?.join(".config").join("ag"))
}

pub fn config_path() -> anyhow::Result<PathBuf> {
    Ok(config_dir()?.join("config.toml"))
}

pub fn ensure_parent(path: &Path) -> anyhow::Result<PathBuf> {
    ensure_dir(path.parent().unwrap_or_else(|| Path::new(".")))
}
