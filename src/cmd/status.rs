//! Run history: `reaper status`.

use anyhow::Result;
use console::style;
use std::path::Path;

pub fn cmd_status(project_dir: &Path, limit: usize) -> Result<()> {
    use reaper::init::{get_reaper_dir, is_initialized};
    use reaper::ledger::{Ledger, LedgerStatus, latest_per_run};
    use reaper::notify::OutboxNotifier;
    use reaper::reaper_config::ReaperToml;
    use reaper::store::SqliteStore;

    println!();
    println!("Reaper Status");
    println!("=============");
    println!();

    if !is_initialized(project_dir) {
        println!("Project: Not initialized");
        println!();
        println!("Run 'reaper init' to initialize the project.");
        println!();
        return Ok(());
    }

    let reaper_dir = get_reaper_dir(project_dir);
    let toml = ReaperToml::load_or_default(&reaper_dir)?;
    let store_path = if toml.store.path.is_absolute() {
        toml.store.path.clone()
    } else {
        reaper_dir.join(&toml.store.path)
    };

    println!("Project: Initialized");
    if store_path.exists() {
        let records = SqliteStore::new(&store_path)?.count(None)?;
        println!("Records: {} in {}", records, store_path.display());
    } else {
        println!("Records: store not created yet");
    }
    println!();

    let entries = Ledger::read(&reaper_dir.join("ledger"))?;
    let runs = latest_per_run(&entries);
    if runs.is_empty() {
        println!("No runs recorded.");
    } else {
        println!("Recent runs:");
        for entry in runs.iter().take(limit) {
            let status = match entry.status {
                LedgerStatus::Clean => style(entry.status.as_str()).green(),
                LedgerStatus::MaxLoops => style(entry.status.as_str()).yellow(),
                LedgerStatus::Halted => style(entry.status.as_str()).red(),
                LedgerStatus::Submitted => style(entry.status.as_str()).cyan(),
                LedgerStatus::Done => style(entry.status.as_str()).dim(),
            };
            println!(
                "  {}  {:<24} loop {:<3} {}  {}",
                entry.timestamp.format("%Y-%m-%d %H:%M:%S"),
                entry.target,
                entry.loop_index,
                status,
                style(entry.run_id).dim()
            );
        }
    }
    println!();

    let notifications = OutboxNotifier::read_all(&reaper_dir.join("outbox.jsonl"))?;
    if let Some(last) = notifications.last() {
        println!("Notifications sent: {}", notifications.len());
        println!(
            "Last: {} to {} ({})",
            last.subject,
            last.recipient,
            last.sent_at.format("%Y-%m-%d %H:%M:%S")
        );
        println!();
    }

    Ok(())
}
