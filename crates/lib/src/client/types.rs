use thiserror::Error;

use crate::patch::InstallReport;
use crate::types::{BuildId, ModuleId, UnitId};

/// Where the update client is in its cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateState {
  /// Up to date with the last announced build.
  Idle,
  /// A newer build was announced; waiting for it to be ready.
  AwaitingManifest,
  /// Fetching the manifest and the changed units.
  AwaitingUnits,
  /// Installing a fetched unit.
  Applying,
  /// Gave up on hot updates; the session must be rebuilt from scratch.
  Reloading,
}

/// Every failure that ends hot updating for a session.
#[derive(Debug, Error)]
pub enum HmrError {
  #[error("failed to fetch update manifest '{path}': {message}")]
  ManifestFetch { path: String, message: String },

  #[error("failed to load update unit '{unit}': {message}")]
  UnitFetch { unit: UnitId, message: String },

  #[error("module '{module}' failed while applying update: {message}")]
  FactoryExecution { module: ModuleId, message: String },

  #[error("update targets module '{module}' which has no live record")]
  InconsistentCache { module: ModuleId },

  #[error("hot updates are disabled, build {build} needs a full reload")]
  LiveReload { build: BuildId },

  #[error(transparent)]
  Lua(#[from] mlua::Error),
}

/// Receives the single reload request a failed session produces.
pub trait Reloader {
  fn reload(&mut self, reason: &HmrError);
}

impl<F> Reloader for F
where
  F: FnMut(&HmrError),
{
  fn reload(&mut self, reason: &HmrError) {
    self(reason)
  }
}

/// Outcome of one update check that made progress.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleReport {
  /// Builds applied, oldest first.
  pub applied: Vec<BuildId>,
  /// Units fetched, in completion order.
  pub fetched: Vec<UnitId>,
  pub installs: Vec<InstallReport>,
}

impl CycleReport {
  /// Every `(parent, dependency)` pair whose acceptance callback ran.
  pub fn accepted(&self) -> impl Iterator<Item = &(ModuleId, ModuleId)> {
    self.installs.iter().flat_map(|install| install.accepted.iter())
  }
}

/// Why [`UpdateClient::run`](super::UpdateClient::run) returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientExit {
  /// A failure forced a full reload.
  Reloaded,
  /// The notification channel closed.
  Disconnected,
}
