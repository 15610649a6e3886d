//! `reaper init`: create the `.reaper/` directory of a project.
//!
//! ```text
//! .reaper/
//! ├── reaper.toml      # Project configuration (defaults written on init)
//! ├── records.db       # Record store, created on first use
//! ├── ledger           # Submitted passes and run outcomes
//! ├── outbox.jsonl     # Completion notifications
//! ├── logs/            # Rolling log files
//! └── locks/           # Cross-process run locks
//! ```

use crate::reaper_config::{CONFIG_FILE, ReaperToml};
use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

/// The name of the reaper configuration directory.
pub const REAPER_DIR: &str = ".reaper";

#[derive(Debug)]
pub struct InitResult {
    pub reaper_dir: PathBuf,
    /// False if the directory already existed
    pub created: bool,
    /// Whether a default `reaper.toml` was written
    pub wrote_config: bool,
}

/// Initialize a reaper project in `project_dir`.
///
/// Re-running on an initialized project fills in missing pieces and never
/// overwrites an existing `reaper.toml`.
pub fn init_project(project_dir: &Path) -> Result<InitResult> {
    let reaper_dir = get_reaper_dir(project_dir);
    let created = !reaper_dir.exists();

    std::fs::create_dir_all(&reaper_dir)
        .with_context(|| format!("Failed to create directory: {}", reaper_dir.display()))?;

    for sub in ["logs", "locks"] {
        let dir = reaper_dir.join(sub);
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create {} directory: {}", sub, dir.display()))?;
    }

    let ledger = reaper_dir.join("ledger");
    if !ledger.exists() {
        std::fs::write(&ledger, "")
            .with_context(|| format!("Failed to create ledger: {}", ledger.display()))?;
    }

    let config_path = reaper_dir.join(CONFIG_FILE);
    let wrote_config = !config_path.exists();
    if wrote_config {
        ReaperToml::default().save(&config_path)?;
    }

    Ok(InitResult {
        reaper_dir,
        created,
        wrote_config,
    })
}

/// Check if a project is already initialized.
pub fn is_initialized(project_dir: &Path) -> bool {
    project_dir.join(REAPER_DIR).join(CONFIG_FILE).exists()
}

pub fn get_reaper_dir(project_dir: &Path) -> PathBuf {
    project_dir.join(REAPER_DIR)
}
