//! Completion notifications.
//!
//! The engine notifies once per terminated run through `Notifier`. The
//! outbox notifier appends JSON lines to a file so deliveries can be
//! inspected (`reaper status`) or shipped by an external mailer.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tokio::io::AsyncWriteExt;
use tracing::info;

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, recipient: &str, subject: &str, body: &str) -> Result<()>;
}

/// A delivered notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub recipient: String,
    pub subject: String,
    pub body: String,
    pub sent_at: DateTime<Utc>,
}

impl Notification {
    fn new(recipient: &str, subject: &str, body: &str) -> Self {
        Self {
            recipient: recipient.to_string(),
            subject: subject.to_string(),
            body: body.to_string(),
            sent_at: Utc::now(),
        }
    }
}

/// Writes notifications to the log only.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, recipient: &str, subject: &str, body: &str) -> Result<()> {
        info!(recipient, subject, body, "Notification");
        Ok(())
    }
}

/// Appends each notification as one JSON line to an outbox file.
#[derive(Debug, Clone)]
pub struct OutboxNotifier {
    path: PathBuf,
}

impl OutboxNotifier {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read every notification in the outbox at `path`.
    pub fn read_all(path: &Path) -> Result<Vec<Notification>> {
        if !path.exists() {
            return Ok(Vec::new());
        }
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read outbox {}", path.display()))?;
        content
            .lines()
            .filter(|line| !line.trim().is_empty())
            .map(|line| serde_json::from_str(line).context("Malformed outbox entry"))
            .collect()
    }
}

#[async_trait]
impl Notifier for OutboxNotifier {
    async fn notify(&self, recipient: &str, subject: &str, body: &str) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .context("Failed to create outbox directory")?;
        }

        let mut line = serde_json::to_string(&Notification::new(recipient, subject, body))?;
        line.push('\n');

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .with_context(|| format!("Failed to open outbox {}", self.path.display()))?;
        file.write_all(line.as_bytes())
            .await
            .context("Failed to write notification")?;
        file.flush().await?;

        info!(recipient, subject, outbox = %self.path.display(), "Notification queued");
        Ok(())
    }
}

/// Keeps notifications in memory; used by tests and dry runs.
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<Notification>>,
    fail: bool,
}

impl RecordingNotifier {
    /// A notifier whose every delivery fails.
    pub fn failing() -> Self {
        Self {
            sent: Mutex::new(Vec::new()),
            fail: true,
        }
    }

    pub fn sent(&self) -> Vec<Notification> {
        self.sent
            .lock()
            .map(|sent| sent.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, recipient: &str, subject: &str, body: &str) -> Result<()> {
        if self.fail {
            anyhow::bail!("delivery to {} refused", recipient);
        }
        self.sent
            .lock()
            .map_err(|e| anyhow::anyhow!("Notifier lock poisoned: {}", e))?
            .push(Notification::new(recipient, subject, body));
        Ok(())
    }
}
