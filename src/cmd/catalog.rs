//! Read-only listings: `reaper chains`, `reaper types`, `reaper preview`.

use anyhow::Result;
use console::style;
use std::path::Path;

use crate::Cli;

pub fn cmd_chains(cli: &Cli, project_dir: &Path) -> Result<()> {
    let config = super::load_config(cli, project_dir)?;
    let registry = config.reaper_config().registry()?;

    println!();
    for chain in registry.chains() {
        println!(
            "{} ({} stages)",
            style(&chain.name).bold().cyan(),
            chain.stages.len()
        );
        for (i, stage) in chain.stages.iter().enumerate() {
            println!(
                "  {:>2}. {:<28} {} where {}",
                i + 1,
                stage.category,
                style(&stage.source).dim(),
                stage.filter
            );
        }
        println!();
    }
    Ok(())
}

pub async fn cmd_types(cli: &Cli, project_dir: &Path) -> Result<()> {
    let config = super::load_config(cli, project_dir)?;
    let (engine, _queue) = super::open_engine(&config)?;

    let types = engine.list_eligible_record_types().await;
    println!();
    println!("{:<32} {}", style("TYPE").bold(), style("NAME").bold());
    for record_type in &types {
        println!("{:<32} {}", record_type.id, record_type.display_name);
    }
    println!();
    println!("{} record type(s)", types.len());
    Ok(())
}

pub async fn cmd_preview(
    cli: &Cli,
    project_dir: &Path,
    record_type: &str,
    limit: usize,
) -> Result<()> {
    let config = super::load_config(cli, project_dir)?;
    let (engine, _queue) = super::open_engine(&config)?;

    let previews = engine.preview_records(record_type).await?;
    if previews.is_empty() {
        println!("No {} records found.", record_type);
        return Ok(());
    }

    println!();
    for preview in previews.iter().take(limit) {
        println!("{:>8}  {}", style(preview.id).cyan(), preview.display_label);
    }
    if previews.len() > limit {
        println!(
            "{}",
            style(format!("... and {} more", previews.len() - limit)).dim()
        );
    }
    println!();
    Ok(())
}
