//! The update fetcher: the client half of the update channel.
//!
//! [`UpdateClient`] reacts to [`ServerEvent`]s. The first build identifier it
//! sees is the build it is already running. Any later identifier becomes the
//! pending build, and the next `build-ready` (or a `module.hot.check()` from
//! Lua) pulls the manifest for the applied build, fetches every changed unit
//! concurrently and installs them through the module cache patcher.
//!
//! Every failure ends hot updating for the session: the client moves to
//! [`UpdateState::Reloading`], hands the error to its [`Reloader`] once and
//! ignores everything after that.

mod types;

use std::collections::HashSet;
use std::time::Duration;

use mlua::prelude::*;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

pub use types::*;

use crate::channel::ServerEvent;
use crate::config::ClientConfig;
use crate::fetch::{AssetSource, FetchError, fetch_with_timeout};
use crate::lua::hot::{CheckRequest, HotContext};
use crate::lua::runtime::HotRuntime;
use crate::manifest::{UpdateManifest, manifest_path, unit_path};
use crate::types::{BuildId, ModuleId, UnitId};

pub struct UpdateClient<S, R> {
  runtime: HotRuntime,
  source: S,
  reloader: R,
  fetch_timeout: Duration,
  hot: bool,
  checks: mpsc::UnboundedReceiver<CheckRequest>,
  state: UpdateState,
  applied: Option<BuildId>,
  pending: Option<BuildId>,
  /// Builds that were applied at some point.
  history: HashSet<BuildId>,
  /// Builds the server announced to this client.
  announced: HashSet<BuildId>,
}

impl<S, R> UpdateClient<S, R>
where
  S: AssetSource + Clone + Send + Sync + 'static,
  R: Reloader,
{
  pub fn new(source: S, reloader: R, config: &ClientConfig) -> Result<Self, HmrError> {
    let (hot, checks) = HotContext::new();
    Ok(Self {
      runtime: HotRuntime::new(hot)?,
      source,
      reloader,
      fetch_timeout: config.fetch_timeout(),
      hot: config.hot,
      checks,
      state: UpdateState::Idle,
      applied: None,
      pending: None,
      history: HashSet::new(),
      announced: HashSet::new(),
    })
  }

  /// Run a bundle script and load its entry module.
  pub fn boot(&mut self, bundle: &str, entry: &ModuleId) -> Result<LuaValue, HmrError> {
    self.runtime.load_bundle("bundle", bundle)?;
    let exports = self.runtime.require(entry)?;
    info!(entry = %entry, modules = self.runtime.registry().borrow().len(), "booted bundle");
    Ok(exports)
  }

  pub fn state(&self) -> UpdateState {
    self.state
  }

  /// The build whose code is currently live.
  pub fn applied_build(&self) -> Option<&BuildId> {
    self.applied.as_ref()
  }

  /// The newest announced build that is not applied yet.
  pub fn pending_build(&self) -> Option<&BuildId> {
    self.pending.as_ref()
  }

  pub fn runtime(&self) -> &HotRuntime {
    &self.runtime
  }

  /// Exports of a loaded module.
  pub fn exports(&self, id: &ModuleId) -> Result<Option<LuaValue>, HmrError> {
    Ok(self.runtime.exports(id)?)
  }

  /// React to one notification.
  ///
  /// Returns the cycle report when a `build-ready` applied at least one build.
  /// On error the reloader has already been invoked.
  pub async fn handle_event(&mut self, event: ServerEvent) -> Result<Option<CycleReport>, HmrError> {
    match event {
      ServerEvent::ConnectionEstablished => {
        debug!("connected to build server");
        Ok(None)
      }
      ServerEvent::IdentifierUpdate(build) => {
        self.note_identifier(build);
        Ok(None)
      }
      ServerEvent::BuildReady => self.update().await,
    }
  }

  /// Look for a pending build and apply it, exactly like a `build-ready` event.
  pub async fn check(&mut self) -> Result<Option<CycleReport>, HmrError> {
    self.update().await
  }

  /// Drive the client from a stream of notifications until it must reload or
  /// the stream ends. Also serves `module.hot.check()` requests from Lua.
  pub async fn run(&mut self, mut events: mpsc::Receiver<ServerEvent>) -> ClientExit {
    loop {
      if self.state == UpdateState::Reloading {
        return ClientExit::Reloaded;
      }

      tokio::select! {
        event = events.recv() => {
          let Some(event) = event else {
            info!("notification channel closed");
            return ClientExit::Disconnected;
          };
          // Drain whatever else is queued so a burst of builds costs one cycle.
          let mut ready = false;
          let mut next = Some(event);
          while let Some(event) = next {
            match event {
              ServerEvent::BuildReady => ready = true,
              other => {
                let _ = self.handle_event(other).await;
              }
            }
            next = events.try_recv().ok();
          }
          if ready {
            let _ = self.update().await;
          }
        }
        Some(request) = self.checks.recv() => self.answer_check(request).await,
      }
    }
  }

  /// Answer every queued `module.hot.check()` request. Returns how many were served.
  pub async fn serve_checks(&mut self) -> usize {
    let mut served = 0;
    while let Ok(request) = self.checks.try_recv() {
      self.answer_check(request).await;
      served += 1;
    }
    served
  }

  async fn answer_check(&mut self, request: CheckRequest) {
    let outcome = self.check().await.map(|_| ()).map_err(|err| err.to_string());
    request.resolve(outcome);
  }

  fn note_identifier(&mut self, build: BuildId) {
    if self.state == UpdateState::Reloading {
      return;
    }
    let Some(applied) = &self.applied else {
      info!(build = %build, "running build");
      self.history.insert(build.clone());
      self.announced.insert(build.clone());
      self.applied = Some(build);
      return;
    };
    if *applied == build || self.history.contains(&build) {
      debug!(build = %build, "ignoring already applied build");
      return;
    }
    self.announced.insert(build.clone());
    if let Some(previous) = self.pending.replace(build.clone()) {
      debug!(superseded = %previous, build = %build, "newer build supersedes pending one");
    }
    info!(build = %build, "new build announced");
    if self.state == UpdateState::Idle {
      self.state = UpdateState::AwaitingManifest;
    }
  }

  async fn update(&mut self) -> Result<Option<CycleReport>, HmrError> {
    if self.state == UpdateState::Reloading {
      return Ok(None);
    }
    let Some(target) = self.pending.clone() else {
      debug!("no pending build");
      return Ok(None);
    };
    if !self.hot {
      return Err(self.fail(HmrError::LiveReload { build: target }));
    }

    match self.apply_pending().await {
      Ok(report) => {
        self.state = if self.pending.is_some() {
          UpdateState::AwaitingManifest
        } else {
          UpdateState::Idle
        };
        Ok((!report.applied.is_empty()).then_some(report))
      }
      Err(err) => Err(self.fail(err)),
    }
  }

  /// Apply manifests until the pending build is live or a manifest brings nothing new.
  async fn apply_pending(&mut self) -> Result<CycleReport, HmrError> {
    let mut report = CycleReport::default();

    while let (Some(baseline), Some(target)) = (self.applied.clone(), self.pending.clone()) {
      self.state = UpdateState::AwaitingUnits;
      let manifest = self.fetch_manifest(&baseline).await?;

      if manifest.build == baseline || self.history.contains(&manifest.build) {
        warn!(baseline = %baseline, build = %manifest.build, "manifest names an applied build, skipping");
        break;
      }

      self.apply_manifest(&manifest, &mut report).await?;

      info!(build = %manifest.build, previous = %baseline, "applied update");
      self.history.insert(manifest.build.clone());
      self.applied = Some(manifest.build.clone());

      if self.history.contains(&target) {
        self.pending = None;
      } else if !self.announced.contains(&manifest.build) {
        // The server already moved past the pending build; nothing newer exists yet.
        debug!(build = %manifest.build, superseded = %target, "manifest leads past pending build");
        self.pending = None;
      }
      report.applied.push(manifest.build);
    }

    Ok(report)
  }

  async fn fetch_manifest(&self, baseline: &BuildId) -> Result<UpdateManifest, HmrError> {
    let path = manifest_path(baseline);
    debug!(path = %path, "fetching update manifest");
    let payload = fetch_with_timeout(&self.source, &path, self.fetch_timeout)
      .await
      .map_err(|err| HmrError::ManifestFetch {
        path: path.clone(),
        message: err.to_string(),
      })?;
    UpdateManifest::from_json(&payload).map_err(|err| HmrError::ManifestFetch {
      path,
      message: err.to_string(),
    })
  }

  async fn apply_manifest(&mut self, manifest: &UpdateManifest, report: &mut CycleReport) -> Result<(), HmrError> {
    if manifest.is_empty() {
      debug!(build = %manifest.build, "no code units changed");
      return Ok(());
    }

    let mut fetches: JoinSet<(UnitId, String, Result<String, FetchError>)> = JoinSet::new();
    for unit in manifest.changed_units() {
      let path = unit_path(unit, &manifest.build);
      let unit = unit.clone();
      let source = self.source.clone();
      let limit = self.fetch_timeout;
      debug!(unit = %unit, path = %path, "fetching update unit");
      fetches.spawn(async move {
        let result = fetch_with_timeout(&source, &path, limit).await;
        (unit, path, result)
      });
    }

    while let Some(joined) = fetches.join_next().await {
      let (unit, path, result) = joined.map_err(|err| HmrError::UnitFetch {
        unit: UnitId::new("<unknown>"),
        message: err.to_string(),
      })?;
      let script = result.map_err(|err| HmrError::UnitFetch {
        unit: unit.clone(),
        message: err.to_string(),
      })?;

      self.state = UpdateState::Applying;
      self.install_unit(&unit, &path, &script, report)?;
      report.fetched.push(unit);
      self.state = UpdateState::AwaitingUnits;
    }

    Ok(())
  }

  fn install_unit(&mut self, unit: &UnitId, path: &str, script: &str, report: &mut CycleReport) -> Result<(), HmrError> {
    let deliveries = self
      .runtime
      .run_unit_script(path, script)
      .map_err(|err| HmrError::UnitFetch {
        unit: unit.clone(),
        message: err.to_string(),
      })?;

    if !deliveries.iter().any(|delivery| delivery.unit == *unit) {
      return Err(HmrError::UnitFetch {
        unit: unit.clone(),
        message: "script did not deliver its modules".to_string(),
      });
    }

    for delivery in deliveries {
      report.installs.push(self.runtime.install(delivery)?);
    }
    Ok(())
  }

  fn fail(&mut self, err: HmrError) -> HmrError {
    warn!(error = %err, "hot update failed, reloading");
    self.state = UpdateState::Reloading;
    self.pending = None;
    self.reloader.reload(&err);
    err
  }
}
