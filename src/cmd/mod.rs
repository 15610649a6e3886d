//! CLI command implementations.
//!
//! Each submodule owns one or more related `Commands` variants:
//!
//! | Module          | Commands handled                     |
//! |-----------------|--------------------------------------|
//! | `run`           | `Run`                                |
//! | `catalog`       | `Chains`, `Types`, `Preview`         |
//! | `project`       | `Init`, `Seed`                       |
//! | `status`        | `Status`                             |
//! | `config`        | `Config`                             |

pub mod catalog;
pub mod config;
pub mod project;
pub mod run;
pub mod status;

pub use catalog::{cmd_chains, cmd_preview, cmd_types};
pub use config::cmd_config;
pub use project::{cmd_init, cmd_seed};
pub use run::{build_request, cmd_run};
pub use status::cmd_status;

use crate::Cli;
use anyhow::Result;
use reaper::config::Config;
use reaper::engine::{Engine, EngineParts};
use reaper::ledger::Ledger;
use reaper::notify::{LogNotifier, Notifier, OutboxNotifier};
use reaper::scheduler::{JobQueue, local_queue};
use reaper::store::StoreHandle;
use std::path::Path;
use std::sync::Arc;
use tracing_appender::non_blocking::WorkerGuard;

/// Install logging from `[logging]`, falling back to defaults when the
/// project has no readable configuration yet.
pub fn init_logging(cli: &Cli, project_dir: &Path) -> Result<Option<WorkerGuard>> {
    use reaper::init::get_reaper_dir;
    use reaper::reaper_config::ReaperToml;

    let reaper_dir = get_reaper_dir(project_dir);
    let settings = ReaperToml::load_or_default(&reaper_dir)
        .map(|toml| toml.logging)
        .unwrap_or_default();
    reaper::logging::init(&settings, Some(&reaper_dir.join("logs")), cli.verbose)
}

pub(crate) fn load_config(cli: &Cli, project_dir: &Path) -> Result<Config> {
    Config::new(
        project_dir.to_path_buf(),
        cli.verbose,
        cli.yes,
        cli.loop_budget,
        cli.max_parallel,
    )
}

/// Wire the engine to the project's store, ledger and outbox.
pub(crate) fn open_engine(config: &Config) -> Result<(Engine, JobQueue)> {
    config.ensure_directories()?;
    let reaper_config = config.reaper_config();
    let toml = &reaper_config.toml;

    let store = StoreHandle::open(&config.store_path)?;
    let (scheduler, queue) = local_queue(toml.engine.queue_capacity);
    let notifier: Arc<dyn Notifier> = if toml.notify.outbox {
        Arc::new(OutboxNotifier::new(config.outbox_file.clone()))
    } else {
        Arc::new(LogNotifier)
    };

    let parts = EngineParts {
        store: Arc::new(store),
        scheduler: Arc::new(scheduler),
        notifier,
        ledger: Arc::new(Ledger::open(config.ledger_file.clone())?),
        registry: Arc::new(reaper_config.registry()?),
    };
    Ok((Engine::new(parts, reaper_config.engine_settings()), queue))
}
