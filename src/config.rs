use anyhow::{Context, Result};
use std::path::PathBuf;

use crate::reaper_config::ReaperConfig;

/// Runtime configuration for reaper.
///
/// Resolves every path under `.reaper/` once so commands don't rebuild them,
/// and keeps the loaded `ReaperConfig` for engine settings.
#[derive(Debug, Clone)]
pub struct Config {
    pub project_dir: PathBuf,
    pub reaper_dir: PathBuf,
    pub config_file: PathBuf,
    pub store_path: PathBuf,
    pub ledger_file: PathBuf,
    pub outbox_file: PathBuf,
    pub log_dir: PathBuf,
    pub locks_dir: PathBuf,
    pub verbose: bool,
    pub yes: bool,
    reaper_config: ReaperConfig,
}

impl Config {
    pub fn new(
        project_dir: PathBuf,
        verbose: bool,
        yes: bool,
        loop_budget: Option<u32>,
        max_parallel: Option<usize>,
    ) -> Result<Self> {
        let reaper_config =
            ReaperConfig::with_cli_args(project_dir, verbose, yes, loop_budget, max_parallel)?;
        Ok(Self::from_reaper_config(reaper_config))
    }

    pub fn from_reaper_config(reaper_config: ReaperConfig) -> Self {
        let reaper_dir = reaper_config.reaper_dir.clone();
        Self {
            project_dir: reaper_config.project_dir.clone(),
            config_file: reaper_config.config_file(),
            store_path: reaper_config.store_path(),
            ledger_file: reaper_dir.join("ledger"),
            outbox_file: reaper_dir.join("outbox.jsonl"),
            log_dir: reaper_dir.join("logs"),
            locks_dir: reaper_dir.join("locks"),
            verbose: reaper_config.verbose,
            yes: reaper_config.yes,
            reaper_dir,
            reaper_config,
        }
    }

    pub fn reaper_config(&self) -> &ReaperConfig {
        &self.reaper_config
    }

    /// Lock file serializing chain sweeps across processes.
    pub fn chain_sweep_lock(&self) -> PathBuf {
        self.locks_dir.join("chain-sweep.lock")
    }

    pub fn ensure_directories(&self) -> Result<()> {
        std::fs::create_dir_all(&self.log_dir).context("Failed to create log directory")?;
        std::fs::create_dir_all(&self.locks_dir).context("Failed to create locks directory")?;
        if let Some(parent) = self.store_path.parent() {
            std::fs::create_dir_all(parent).context("Failed to create store directory")?;
        }
        Ok(())
    }
}
