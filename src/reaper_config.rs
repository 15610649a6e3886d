//! Project configuration read from `.reaper/reaper.toml`.
//!
//! Values are layered file → environment → CLI. Every section is optional and
//! falls back to the defaults below.
//!
//! # Configuration File Format
//!
//! ```toml
//! [engine]
//! loop_budget = 5
//! max_parallel = 8
//! chain_page_size = 500
//! delete_all_page_size = 1000
//! max_flat_candidates = 5000
//! preview_limit = 5000
//! queue_capacity = 64
//!
//! [store]
//! path = "records.db"
//!
//! [notify]
//! recipient = "ops@example.com"
//! outbox = true
//!
//! [logging]
//! level = "info"
//! format = "pretty"
//! file = false
//!
//! [[catalog.extra_types]]
//! id = "customrecord_asset"
//! display_name = "Asset Register"
//!
//! [[chains]]
//! name = "INV"
//!
//! [[chains.stages]]
//! category = "inventoryadjustment"
//! source = "transaction"
//! filter = { field = "type", value = "InvAdjst" }
//! ```

use crate::chain::{Chain, ChainRegistry};
use crate::engine::{DiscoveryLimits, EngineSettings};
use crate::store::RecordType;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const CONFIG_FILE: &str = "reaper.toml";

pub const ENV_LOOP_BUDGET: &str = "REAPER_LOOP_BUDGET";
pub const ENV_MAX_PARALLEL: &str = "REAPER_MAX_PARALLEL";
pub const ENV_NOTIFY_RECIPIENT: &str = "REAPER_NOTIFY_RECIPIENT";

/// Engine tunables.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineSection {
    /// Maximum passes per run
    #[serde(default = "default_loop_budget")]
    pub loop_budget: u32,
    /// Concurrent deletes per pass
    #[serde(default = "default_max_parallel")]
    pub max_parallel: usize,
    #[serde(default = "default_chain_page_size")]
    pub chain_page_size: usize,
    #[serde(default = "default_delete_all_page_size")]
    pub delete_all_page_size: usize,
    #[serde(default = "default_max_flat_candidates")]
    pub max_flat_candidates: usize,
    #[serde(default = "default_preview_limit")]
    pub preview_limit: usize,
    /// Pending pass jobs the local scheduler accepts
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
}

fn default_loop_budget() -> u32 {
    crate::engine::DEFAULT_LOOP_BUDGET
}

fn default_max_parallel() -> usize {
    8
}

fn default_chain_page_size() -> usize {
    DiscoveryLimits::default().chain_page_size
}

fn default_delete_all_page_size() -> usize {
    DiscoveryLimits::default().delete_all_page_size
}

fn default_max_flat_candidates() -> usize {
    DiscoveryLimits::default().max_flat_candidates
}

fn default_preview_limit() -> usize {
    5000
}

fn default_queue_capacity() -> usize {
    64
}

impl Default for EngineSection {
    fn default() -> Self {
        Self {
            loop_budget: default_loop_budget(),
            max_parallel: default_max_parallel(),
            chain_page_size: default_chain_page_size(),
            delete_all_page_size: default_delete_all_page_size(),
            max_flat_candidates: default_max_flat_candidates(),
            preview_limit: default_preview_limit(),
            queue_capacity: default_queue_capacity(),
        }
    }
}

/// Record store location.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreSection {
    /// SQLite database, relative paths resolve against `.reaper/`
    #[serde(default = "default_store_path")]
    pub path: PathBuf,
}

fn default_store_path() -> PathBuf {
    PathBuf::from("records.db")
}

impl Default for StoreSection {
    fn default() -> Self {
        Self {
            path: default_store_path(),
        }
    }
}

/// Completion notifications.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotifySection {
    /// Address of the run requester; no notification when unset
    #[serde(default)]
    pub recipient: Option<String>,
    /// Append notifications to `.reaper/outbox.jsonl` instead of only logging them
    #[serde(default = "default_true")]
    pub outbox: bool,
}

fn default_true() -> bool {
    true
}

impl Default for NotifySection {
    fn default() -> Self {
        Self {
            recipient: None,
            outbox: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

impl std::fmt::Display for LogFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LogFormat::Pretty => write!(f, "pretty"),
            LogFormat::Json => write!(f, "json"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggingSection {
    /// Default filter directive, overridden by `RUST_LOG`
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub format: LogFormat,
    /// Also write a daily rolling log under `.reaper/logs/`
    #[serde(default)]
    pub file: bool,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
            file: false,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogSection {
    /// Record types offered in addition to the built-in list
    #[serde(default)]
    pub extra_types: Vec<RecordType>,
}

/// Parsed `reaper.toml`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReaperToml {
    #[serde(default)]
    pub engine: EngineSection,
    #[serde(default)]
    pub store: StoreSection,
    #[serde(default)]
    pub notify: NotifySection,
    #[serde(default)]
    pub logging: LoggingSection,
    #[serde(default)]
    pub catalog: CatalogSection,
    /// Chains registered next to the built-in O2C and P2P chains
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub chains: Vec<Chain>,
}

impl ReaperToml {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        Self::parse(&content)
    }

    /// Parse configuration from a TOML string.
    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse reaper.toml")
    }

    /// Load `.reaper/reaper.toml`, or defaults when the file doesn't exist.
    pub fn load_or_default(reaper_dir: &Path) -> Result<Self> {
        let config_path = reaper_dir.join(CONFIG_FILE);
        if config_path.exists() {
            Self::load(&config_path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self).context("Failed to serialize reaper.toml")?;
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;
        Ok(())
    }

    /// Loop budget, with `REAPER_LOOP_BUDGET` taking precedence over the file.
    pub fn loop_budget(&self) -> u32 {
        env_parse(ENV_LOOP_BUDGET).unwrap_or(self.engine.loop_budget)
    }

    /// Parallelism, with `REAPER_MAX_PARALLEL` taking precedence over the file.
    pub fn max_parallel(&self) -> usize {
        env_parse(ENV_MAX_PARALLEL).unwrap_or(self.engine.max_parallel)
    }

    /// Notification recipient, falling back to `REAPER_NOTIFY_RECIPIENT`.
    pub fn notify_recipient(&self) -> Option<String> {
        self.notify
            .recipient
            .clone()
            .or_else(|| std::env::var(ENV_NOTIFY_RECIPIENT).ok())
            .filter(|r| !r.trim().is_empty())
    }

    /// Built-in chains plus `[[chains]]`.
    pub fn registry(&self) -> Result<ChainRegistry> {
        ChainRegistry::with_extra(self.chains.clone()).context("Invalid [[chains]] configuration")
    }

    pub fn discovery_limits(&self) -> DiscoveryLimits {
        DiscoveryLimits {
            chain_page_size: self.engine.chain_page_size,
            delete_all_page_size: self.engine.delete_all_page_size,
            max_flat_candidates: self.engine.max_flat_candidates,
        }
    }

    pub fn engine_settings(&self) -> EngineSettings {
        EngineSettings {
            loop_budget: self.loop_budget(),
            max_parallel: self.max_parallel(),
            limits: self.discovery_limits(),
            preview_limit: self.engine.preview_limit,
            notify_recipient: self.notify_recipient(),
            extra_record_types: self.catalog.extra_types.clone(),
        }
    }

    /// Validate the configuration and return warnings.
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();

        if self.engine.loop_budget == 0 {
            warnings.push("engine.loop_budget is 0: every run is capped at one pass".to_string());
        }
        if self.engine.max_parallel == 0 {
            warnings.push("engine.max_parallel is 0: deletes will run one at a time".to_string());
        }
        for (name, value) in [
            ("chain_page_size", self.engine.chain_page_size),
            ("delete_all_page_size", self.engine.delete_all_page_size),
            ("max_flat_candidates", self.engine.max_flat_candidates),
            ("preview_limit", self.engine.preview_limit),
            ("queue_capacity", self.engine.queue_capacity),
        ] {
            if value == 0 {
                warnings.push(format!("engine.{} must be greater than 0", name));
            }
        }

        if let Some(ref recipient) = self.notify.recipient
            && !recipient.contains('@')
        {
            warnings.push(format!(
                "notify.recipient '{}' does not look like an email address",
                recipient
            ));
        }

        if let Err(e) = ChainRegistry::with_extra(self.chains.clone()) {
            warnings.push(format!("Invalid chain configuration: {}", e));
        }

        for record_type in &self.catalog.extra_types {
            if !crate::chain::is_identifier(&record_type.id) {
                warnings.push(format!(
                    "catalog.extra_types id '{}' is not a valid identifier",
                    record_type.id
                ));
            }
        }

        warnings
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok()?.trim().parse().ok()
}

/// Loaded configuration together with CLI overrides.
#[derive(Debug, Clone)]
pub struct ReaperConfig {
    pub project_dir: PathBuf,
    pub reaper_dir: PathBuf,
    pub toml: ReaperToml,
    pub verbose: bool,
    pub yes: bool,
    pub cli_loop_budget: Option<u32>,
    pub cli_max_parallel: Option<usize>,
}

impl ReaperConfig {
    pub fn new(project_dir: PathBuf) -> Result<Self> {
        let project_dir = project_dir
            .canonicalize()
            .context("Failed to resolve project directory")?;
        let reaper_dir = crate::init::get_reaper_dir(&project_dir);
        let toml = ReaperToml::load_or_default(&reaper_dir)?;

        Ok(Self {
            project_dir,
            reaper_dir,
            toml,
            verbose: false,
            yes: false,
            cli_loop_budget: None,
            cli_max_parallel: None,
        })
    }

    /// Create a ReaperConfig with CLI overrides.
    pub fn with_cli_args(
        project_dir: PathBuf,
        verbose: bool,
        yes: bool,
        loop_budget: Option<u32>,
        max_parallel: Option<usize>,
    ) -> Result<Self> {
        let mut config = Self::new(project_dir)?;
        config.verbose = verbose;
        config.yes = yes;
        config.cli_loop_budget = loop_budget;
        config.cli_max_parallel = max_parallel;
        Ok(config)
    }

    /// Effective engine settings (CLI → env → file → default).
    pub fn engine_settings(&self) -> EngineSettings {
        let mut settings = self.toml.engine_settings();
        if let Some(budget) = self.cli_loop_budget {
            settings.loop_budget = budget;
        }
        if let Some(parallel) = self.cli_max_parallel {
            settings.max_parallel = parallel;
        }
        settings
    }

    pub fn registry(&self) -> Result<ChainRegistry> {
        self.toml.registry()
    }

    /// Database path, resolved against `.reaper/` when relative.
    pub fn store_path(&self) -> PathBuf {
        if self.toml.store.path.is_absolute() {
            self.toml.store.path.clone()
        } else {
            self.reaper_dir.join(&self.toml.store.path)
        }
    }

    pub fn config_file(&self) -> PathBuf {
        self.reaper_dir.join(CONFIG_FILE)
    }

    pub fn validate(&self) -> Vec<String> {
        self.toml.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::{Stage, StageFilter};
    use std::sync::Mutex;
    use tempfile::tempdir;

    static ENV_MUTEX: Mutex<()> = Mutex::new(());

    fn clear_env() {
        unsafe {
            std::env::remove_var(ENV_LOOP_BUDGET);
            std::env::remove_var(ENV_MAX_PARALLEL);
            std::env::remove_var(ENV_NOTIFY_RECIPIENT);
        }
    }

    #[test]
    fn test_empty_file_uses_defaults() {
        let toml = ReaperToml::parse("").unwrap();
        assert_eq!(toml, ReaperToml::default());
        assert_eq!(toml.engine.loop_budget, 5);
        assert_eq!(toml.engine.chain_page_size, 500);
        assert_eq!(toml.engine.delete_all_page_size, 1000);
        assert_eq!(toml.store.path, PathBuf::from("records.db"));
        assert_eq!(toml.logging.format, LogFormat::Pretty);
        assert!(toml.notify.outbox);
        assert!(toml.validate().is_empty());
    }

    #[test]
    fn test_parse_full_file() {
        let content = r#"
[engine]
loop_budget = 3
max_parallel = 2

[notify]
recipient = "ops@example.com"

[logging]
format = "json"
file = true

[[catalog.extra_types]]
id = "customrecord_asset"
display_name = "Asset Register"

[[chains]]
name = "INV"

[[chains.stages]]
category = "inventoryadjustment"
source = "transaction"
filter = { field = "type", value = "InvAdjst" }
"#;
        let toml = ReaperToml::parse(content).unwrap();
        assert_eq!(toml.engine.loop_budget, 3);
        assert_eq!(toml.engine.max_parallel, 2);
        assert_eq!(toml.engine.preview_limit, 5000);
        assert_eq!(toml.logging.format, LogFormat::Json);
        assert!(toml.logging.file);
        assert_eq!(toml.catalog.extra_types.len(), 1);

        let registry = toml.registry().unwrap();
        assert_eq!(registry.len(), 3);
        assert_eq!(
            registry.resolve("INV").unwrap().stages[0].filter,
            StageFilter::new("type", "InvAdjst")
        );
    }

    #[test]
    fn test_parse_rejects_bad_toml() {
        assert!(ReaperToml::parse("[engine\nloop_budget = ").is_err());
        assert!(ReaperToml::parse("[engine]\nloop_budget = \"five\"").is_err());
    }

    #[test]
    fn test_validate_reports_problems() {
        let mut toml = ReaperToml::default();
        toml.engine.loop_budget = 0;
        toml.engine.chain_page_size = 0;
        toml.notify.recipient = Some("nobody".to_string());
        toml.chains.push(Chain::new("O2C", vec![Stage::transaction("x", "X")]));

        let warnings = toml.validate();
        assert_eq!(warnings.len(), 4);
        assert!(warnings.iter().any(|w| w.contains("loop_budget")));
        assert!(warnings.iter().any(|w| w.contains("chain_page_size")));
        assert!(warnings.iter().any(|w| w.contains("nobody")));
        assert!(warnings.iter().any(|w| w.contains("O2C")));
    }

    #[test]
    fn test_env_overrides_file() {
        let _guard = ENV_MUTEX.lock().unwrap();
        clear_env();

        let toml = ReaperToml::parse("[engine]\nloop_budget = 3\nmax_parallel = 4").unwrap();
        assert_eq!(toml.loop_budget(), 3);
        assert_eq!(toml.max_parallel(), 4);
        assert_eq!(toml.notify_recipient(), None);

        unsafe {
            std::env::set_var(ENV_LOOP_BUDGET, "7");
            std::env::set_var(ENV_MAX_PARALLEL, "not-a-number");
            std::env::set_var(ENV_NOTIFY_RECIPIENT, "env@example.com");
        }
        assert_eq!(toml.loop_budget(), 7);
        assert_eq!(toml.max_parallel(), 4);
        assert_eq!(toml.notify_recipient().as_deref(), Some("env@example.com"));

        clear_env();
    }

    #[test]
    fn test_file_recipient_wins_over_env() {
        let _guard = ENV_MUTEX.lock().unwrap();
        clear_env();
        unsafe { std::env::set_var(ENV_NOTIFY_RECIPIENT, "env@example.com") };

        let toml = ReaperToml::parse("[notify]\nrecipient = \"file@example.com\"").unwrap();
        assert_eq!(toml.notify_recipient().as_deref(), Some("file@example.com"));

        clear_env();
    }

    #[test]
    fn test_save_and_load_or_default() {
        let dir = tempdir().unwrap();
        assert_eq!(
            ReaperToml::load_or_default(dir.path()).unwrap(),
            ReaperToml::default()
        );

        let mut toml = ReaperToml::default();
        toml.engine.loop_budget = 9;
        toml.save(&dir.path().join(CONFIG_FILE)).unwrap();

        let loaded = ReaperToml::load_or_default(dir.path()).unwrap();
        assert_eq!(loaded.engine.loop_budget, 9);
    }

    #[test]
    fn test_cli_overrides_everything() {
        let _guard = ENV_MUTEX.lock().unwrap();
        clear_env();
        unsafe { std::env::set_var(ENV_LOOP_BUDGET, "7") };

        let dir = tempdir().unwrap();
        let config =
            ReaperConfig::with_cli_args(dir.path().to_path_buf(), false, true, Some(2), Some(1))
                .unwrap();
        let settings = config.engine_settings();
        assert_eq!(settings.loop_budget, 2);
        assert_eq!(settings.max_parallel, 1);
        assert!(config.yes);
        assert_eq!(
            config.store_path(),
            config.reaper_dir.join("records.db")
        );

        clear_env();
    }
}
