//! Build signal emitter.
//!
//! Listens to the build pipeline's completion reports and turns each successful
//! build into an announcement on the [`NotificationChannel`]. Failed builds are
//! logged and otherwise ignored, so clients stay on their last good build.

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::channel::NotificationChannel;
use crate::types::BuildId;

/// Completion report delivered by the build pipeline.
///
/// # Wire format
///
/// ```json
/// {"status":"succeeded","hash":"def456"}
/// {"status":"failed","hash":"def456","errors":["src/app.lua:3: unexpected symbol"]}
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum BuildReport {
  Succeeded {
    hash: BuildId,
  },
  Failed {
    #[serde(default)]
    hash: Option<BuildId>,
    #[serde(default)]
    errors: Vec<String>,
  },
}

/// Pipeline-facing half of the completion hook.
#[derive(Debug, Clone)]
pub struct BuildHook {
  tx: mpsc::Sender<BuildReport>,
}

/// Create a completion hook and the receiver the emitter drains.
pub fn build_hook(capacity: usize) -> (BuildHook, mpsc::Receiver<BuildReport>) {
  let (tx, rx) = mpsc::channel(capacity);
  (BuildHook { tx }, rx)
}

impl BuildHook {
  /// Forward a report. Fails only when the emitter has stopped.
  pub async fn send(&self, report: BuildReport) -> Result<(), mpsc::error::SendError<BuildReport>> {
    self.tx.send(report).await
  }

  pub async fn completed(&self, hash: BuildId) -> Result<(), mpsc::error::SendError<BuildReport>> {
    self.send(BuildReport::Succeeded { hash }).await
  }

  pub async fn failed(&self, errors: Vec<String>) -> Result<(), mpsc::error::SendError<BuildReport>> {
    self.send(BuildReport::Failed { hash: None, errors }).await
  }
}

/// Announces completed builds to every connected client.
pub struct BuildSignalEmitter {
  channel: NotificationChannel,
}

impl BuildSignalEmitter {
  pub fn new(channel: NotificationChannel) -> Self {
    Self { channel }
  }

  /// Handle one report.
  ///
  /// Returns the number of clients notified, or `None` when the build failed
  /// and nothing was published.
  pub fn handle(&self, report: BuildReport) -> Option<usize> {
    match report {
      BuildReport::Succeeded { hash } => {
        info!(build = %hash, "build completed");
        Some(self.channel.announce(hash))
      }
      BuildReport::Failed { hash, errors } => {
        let build = hash.as_ref().map(BuildId::as_str).unwrap_or("<unknown>");
        warn!(build, errors = errors.len(), "build failed, clients keep their last good build");
        for error in &errors {
          warn!(build, "{}", error);
        }
        None
      }
    }
  }

  /// Drain reports until every [`BuildHook`] has been dropped.
  pub async fn run(self, mut reports: mpsc::Receiver<BuildReport>) {
    while let Some(report) = reports.recv().await {
      self.handle(report);
    }
    info!("build hook closed, emitter stopping");
  }
}
