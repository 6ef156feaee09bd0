use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use super::{AssetSource, FetchError};

#[derive(Default)]
struct MemoryState {
  assets: HashMap<String, String>,
  requests: Vec<String>,
}

/// In-memory asset map that also records every requested path.
///
/// Clones share the same storage, so a build step can keep writing assets
/// while a client reads them.
#[derive(Clone, Default)]
pub struct MemorySource {
  state: Arc<Mutex<MemoryState>>,
}

impl MemorySource {
  pub fn new() -> Self {
    Self::default()
  }

  fn lock(&self) -> MutexGuard<'_, MemoryState> {
    self.state.lock().unwrap_or_else(PoisonError::into_inner)
  }

  /// Add or replace an asset.
  pub fn insert(&self, path: impl Into<String>, content: impl Into<String>) {
    self.lock().assets.insert(path.into(), content.into());
  }

  pub fn remove(&self, path: &str) -> Option<String> {
    self.lock().assets.remove(path)
  }

  /// Every path requested so far, in request order.
  pub fn requests(&self) -> Vec<String> {
    self.lock().requests.clone()
  }
}

impl AssetSource for MemorySource {
  async fn fetch(&self, path: &str) -> Result<String, FetchError> {
    let mut state = self.lock();
    state.requests.push(path.to_string());
    state
      .assets
      .get(path)
      .cloned()
      .ok_or_else(|| FetchError::NotFound { path: path.to_string() })
  }
}
