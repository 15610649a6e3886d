//! Deletion runs: `reaper run`.

use anyhow::{Context, Result, bail};
use std::fs::File;
use std::path::PathBuf;
use std::sync::Arc;

use crate::Cli;
use reaper::engine::{PassDisposition, PassReport, RunMode, RunRequest};
use reaper::ui::{RunUI, UiMode};

/// Turn the `run` arguments into a request. Exactly one target form must
/// be given; clap rejects conflicting combinations before this point.
pub fn build_request(
    chain: Option<&str>,
    delete_all: Option<&str>,
    record_type: Option<&str>,
    ids: &[i64],
) -> Result<RunRequest> {
    if let Some(category) = delete_all {
        return Ok(RunRequest::delete_all(category));
    }
    if !ids.is_empty() {
        let Some(category) = record_type else {
            bail!("--ids requires --type <TYPE>");
        };
        return Ok(RunRequest::explicit_ids(category, ids.to_vec()));
    }
    match chain {
        Some(chain) => Ok(RunRequest::chain_sweep(chain)),
        None => bail!("Specify a chain, --delete-all <TYPE>, or --type <TYPE> --ids <IDS>"),
    }
}

fn describe(request: &RunRequest) -> String {
    match request.mode {
        RunMode::ChainSweep => format!(
            "sweep every stage of chain {}",
            request.chain.as_deref().unwrap_or("?")
        ),
        RunMode::DeleteAll => format!(
            "delete ALL records of type {}",
            request.category.as_deref().unwrap_or("?")
        ),
        RunMode::ExplicitIds => format!(
            "delete {} {} record(s)",
            request.ids.as_ref().map(Vec::len).unwrap_or(0),
            request.category.as_deref().unwrap_or("?")
        ),
    }
}

/// Take the cross-process chain sweep lock. Held until the file is dropped.
fn acquire_sweep_lock(path: &std::path::Path) -> Result<File> {
    use fs2::FileExt;

    let file = File::create(path)
        .with_context(|| format!("Failed to open lock file {}", path.display()))?;
    if file.try_lock_exclusive().is_err() {
        bail!(
            "Another chain sweep is already running (lock held on {})",
            path.display()
        );
    }
    Ok(file)
}

pub async fn cmd_run(
    cli: &Cli,
    project_dir: PathBuf,
    request: RunRequest,
    ui_mode: &str,
) -> Result<()> {
    use dialoguer::Confirm;
    use reaper::init::is_initialized;

    if !is_initialized(&project_dir) {
        bail!("Not a reaper project. Run 'reaper init' first.");
    }
    let config = super::load_config(cli, &project_dir)?;
    let (engine, mut queue) = super::open_engine(&config)?;

    if !config.yes {
        let confirm = Confirm::new()
            .with_prompt(format!(
                "This will {}. Deletions cannot be undone. Continue?",
                describe(&request)
            ))
            .default(false)
            .interact()
            .unwrap_or(false);

        if !confirm {
            println!("Run cancelled");
            return Ok(());
        }
    }

    let _sweep_lock = match request.mode {
        RunMode::ChainSweep => Some(acquire_sweep_lock(&config.chain_sweep_lock())?),
        _ => None,
    };

    let mode: UiMode = ui_mode.parse().unwrap_or_default();
    let ui = Arc::new(RunUI::new(mode, config.verbose));
    let (tx, mut rx) = tokio::sync::mpsc::channel(256);
    let ui_task = {
        let ui = ui.clone();
        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                ui.handle_event(&event);
            }
        })
    };

    let engine = engine.with_event_channel(tx);
    let job = engine.start_run(request).await?;
    tracing::debug!(job = %job, "First pass queued");

    let outcomes = engine.drain(&mut queue).await;
    drop(engine);
    ui_task.await.ok();

    let mut final_report: Option<PassReport> = None;
    let mut failure: Option<String> = None;
    for outcome in outcomes {
        match outcome.result {
            Ok(PassDisposition::Finished { report }) => final_report = Some(report),
            Ok(PassDisposition::Halted { report, error }) => {
                failure = Some(format!(
                    "Run halted after loop {}: {}",
                    report.loop_index, error
                ));
            }
            Ok(_) => {}
            Err(e) => failure = Some(format!("Pass {} failed: {}", outcome.job, e)),
        }
    }

    ui.finish(final_report.as_ref());
    match failure {
        Some(message) => bail!(message),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_request_forms() {
        let req = build_request(Some("O2C"), None, None, &[]).unwrap();
        assert_eq!(req, RunRequest::chain_sweep("O2C"));

        let req = build_request(None, Some("customer"), None, &[]).unwrap();
        assert_eq!(req, RunRequest::delete_all("customer"));

        let req = build_request(None, None, Some("invoice"), &[101, 102]).unwrap();
        assert_eq!(req, RunRequest::explicit_ids("invoice", vec![101, 102]));
    }

    #[test]
    fn test_build_request_requires_a_target() {
        assert!(build_request(None, None, None, &[]).is_err());
        assert!(build_request(None, None, None, &[1]).is_err());
    }

    #[test]
    fn test_sweep_lock_is_exclusive() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("chain-sweep.lock");
        let held = acquire_sweep_lock(&path).unwrap();
        assert!(acquire_sweep_lock(&path).is_err());
        drop(held);
        assert!(acquire_sweep_lock(&path).is_ok());
    }
}
