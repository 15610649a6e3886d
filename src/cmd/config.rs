//! Configuration view and validation commands: `reaper config`.

use anyhow::Result;

use super::super::ConfigCommands;

pub fn cmd_config(project_dir: &std::path::Path, command: Option<ConfigCommands>) -> Result<()> {
    use reaper::init::get_reaper_dir;
    use reaper::reaper_config::{CONFIG_FILE, ReaperConfig, ReaperToml};

    let reaper_dir = get_reaper_dir(project_dir);
    let config_path = reaper_dir.join(CONFIG_FILE);

    match command {
        None | Some(ConfigCommands::Show) => {
            println!();
            println!("Reaper Configuration");
            println!("====================");
            println!();

            let toml = if config_path.exists() {
                println!("Config file: {}", config_path.display());
                ReaperToml::load(&config_path)?
            } else {
                println!("No reaper.toml found at {}", config_path.display());
                println!("Using default configuration.");
                ReaperToml::default()
            };
            println!();

            println!("[engine]");
            println!("  loop_budget = {}", toml.engine.loop_budget);
            println!("  max_parallel = {}", toml.engine.max_parallel);
            println!("  chain_page_size = {}", toml.engine.chain_page_size);
            println!("  delete_all_page_size = {}", toml.engine.delete_all_page_size);
            println!("  max_flat_candidates = {}", toml.engine.max_flat_candidates);
            println!("  preview_limit = {}", toml.engine.preview_limit);
            println!("  queue_capacity = {}", toml.engine.queue_capacity);
            println!();

            println!("[store]");
            println!("  path = \"{}\"", toml.store.path.display());
            println!();

            println!("[notify]");
            if let Some(recipient) = &toml.notify.recipient {
                println!("  recipient = \"{}\"", recipient);
            }
            println!("  outbox = {}", toml.notify.outbox);
            println!();

            println!("[logging]");
            println!("  level = \"{}\"", toml.logging.level);
            println!("  format = \"{}\"", toml.logging.format);
            println!("  file = {}", toml.logging.file);
            println!();

            if !toml.catalog.extra_types.is_empty() {
                println!("[catalog]");
                for record_type in &toml.catalog.extra_types {
                    println!("  {} = \"{}\"", record_type.id, record_type.display_name);
                }
                println!();
            }

            if !toml.chains.is_empty() {
                println!("[[chains]]");
                for chain in &toml.chains {
                    println!("  {} ({} stages)", chain.name, chain.stages.len());
                }
                println!();
            }

            println!("Effective values (with env/CLI overrides):");
            let config = ReaperConfig::new(project_dir.to_path_buf())?;
            let settings = config.engine_settings();
            println!("  loop_budget = {}", settings.loop_budget);
            println!("  max_parallel = {}", settings.max_parallel);
            println!(
                "  notify_recipient = {}",
                settings.notify_recipient.as_deref().unwrap_or("(none)")
            );
            println!("  store = {}", config.store_path().display());
            println!();

            if !config_path.exists() {
                println!("Run 'reaper config init' to create a reaper.toml file.");
                println!();
            }
        }
        Some(ConfigCommands::Validate) => {
            println!();
            println!("Validating configuration...");
            println!();

            if !config_path.exists() {
                println!("No reaper.toml found. Using defaults (valid).");
                return Ok(());
            }

            let toml = ReaperToml::load(&config_path)?;
            let warnings = toml.validate();

            if warnings.is_empty() {
                println!("Configuration is valid.");
            } else {
                println!("Configuration warnings:");
                for warning in warnings {
                    println!("  - {}", warning);
                }
            }
            println!();
        }
        Some(ConfigCommands::Init) => {
            if config_path.exists() {
                println!("reaper.toml already exists at {}", config_path.display());
                println!("Delete it first if you want to recreate it.");
                return Ok(());
            }

            if !reaper_dir.exists() {
                std::fs::create_dir_all(&reaper_dir)?;
            }

            ReaperToml::default().save(&config_path)?;

            println!("Created reaper.toml at {}", config_path.display());
            println!();
            println!("You can now customize:");
            println!("  - [engine] loop_budget, max_parallel, page sizes");
            println!("  - [notify] recipient for completion notices");
            println!("  - [[chains]] for additional deletion chains");
            println!();
        }
    }

    Ok(())
}
