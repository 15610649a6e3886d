//! Project setup commands: `reaper init`, `reaper seed`.

use anyhow::{Result, bail};
use std::path::Path;

use crate::Cli;

pub fn cmd_init(project_dir: &Path) -> Result<()> {
    use reaper::init::{init_project, is_initialized};

    let was_initialized = is_initialized(project_dir);
    let result = init_project(project_dir)?;

    if result.created {
        println!(
            "Initialized reaper project at {}",
            result.reaper_dir.display()
        );
        println!();
        println!("Created directory structure:");
        println!("  .reaper/");
        println!("  ├── reaper.toml   # Configuration (use `reaper config show`)");
        println!("  ├── ledger        # Run history (use `reaper status`)");
        println!("  ├── logs/         # Log files");
        println!("  └── locks/        # Run locks");
        println!();
        println!("Next steps:");
        println!("  1. Run `reaper types` to list deletable record types");
        println!("  2. Run `reaper preview <TYPE>` to inspect records");
        println!("  3. Run `reaper run <CHAIN>` to sweep a chain");
    } else if was_initialized {
        println!(
            "Reaper project already initialized at {}",
            result.reaper_dir.display()
        );
        println!("Directory structure verified.");
    } else {
        println!(
            "Completed reaper initialization at {}",
            result.reaper_dir.display()
        );
    }

    Ok(())
}

pub fn cmd_seed(
    cli: &Cli,
    project_dir: &Path,
    chain: Option<&str>,
    per_stage: usize,
    record_type: Option<&str>,
    count: usize,
) -> Result<()> {
    use reaper::init::is_initialized;
    use reaper::store::{StoreHandle, StoredRecord};

    if !is_initialized(project_dir) {
        bail!("Not a reaper project. Run 'reaper init' first.");
    }
    let config = super::load_config(cli, project_dir)?;
    config.ensure_directories()?;
    let handle = StoreHandle::open(&config.store_path)?;
    let store = handle.lock_sync()?;

    let inserted = match (chain, record_type) {
        (Some(name), _) => {
            let registry = config.reaper_config().registry()?;
            store.seed_chain(registry.resolve(name)?, per_stage)?
        }
        (None, Some(category)) => {
            if !reaper::chain::is_identifier(category) {
                bail!("Invalid record type '{}'", category);
            }
            for n in 1..=count {
                store.insert_record(
                    &StoredRecord::of_type(category)
                        .with_label(&format!("{}-{}", category.to_uppercase(), n), "seeded"),
                )?;
            }
            count
        }
        (None, None) => bail!("Specify --chain <CHAIN> or --type <TYPE>"),
    };

    println!(
        "Seeded {} record(s) into {}",
        inserted,
        config.store_path.display()
    );
    Ok(())
}
