//! OpenDAL Operator factory for the local record store and sync state

use anyhow::{Context, Result};
use opendal::Operator;
use std::path::{Path, PathBuf};

/// Build a filesystem-backed operator rooted at `root`, creating it if needed.
pub fn build_local_operator(root: &Path) -> Result<Operator> {
    let root = expand_tilde(root);
    std::fs::create_dir_all(&root)
        .with_context(|| format!("creating data dir {}", root.display()))?;

    // Writes land in a scratch dir first and are renamed into place, so a
    // crash never leaves a half-written queue or watermark behind.
    let scratch = root.join(".tmp");
    std::fs::create_dir_all(&scratch)
        .with_context(|| format!("creating scratch dir {}", scratch.display()))?;
    let builder = opendal::services::Fs::default()
        .root(&root.to_string_lossy())
        .atomic_write_dir(&scratch.to_string_lossy());

    let op = Operator::new(builder)
        .context("creating OpenDAL Fs operator")?
        .layer(opendal::layers::LoggingLayer::default())
        .finish();

    Ok(op)
}

/// Volatile operator for tests and dry runs.
pub fn memory_operator() -> Result<Operator> {
    Ok(Operator::new(opendal::services::Memory::default())
        .context("creating OpenDAL memory operator")?
        .finish())
}

/// Expand `~` in path to the user's home directory
pub fn expand_tilde(path: &Path) -> PathBuf {
    let s = path.to_string_lossy();
    match s.strip_prefix("~/") {
        Some(rest) => {
            let home = std::env::var("HOME").unwrap_or_default();
            PathBuf::from(home).join(rest)
        }
        None => path.to_path_buf(),
    }
}
