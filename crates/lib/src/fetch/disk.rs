use std::path::{Component, Path, PathBuf};

use super::{AssetSource, FetchError};

/// Reads assets from a build output directory.
#[derive(Debug, Clone)]
pub struct DiskSource {
  root: PathBuf,
}

impl DiskSource {
  pub fn new(root: impl Into<PathBuf>) -> Self {
    Self { root: root.into() }
  }

  pub fn root(&self) -> &Path {
    &self.root
  }

  /// Resolve an asset path under the root.
  ///
  /// Only plain relative components are accepted, so a request can never
  /// reach outside the output directory.
  pub fn resolve(&self, path: &str) -> Result<PathBuf, FetchError> {
    let relative = Path::new(path.trim_start_matches('/'));
    let plain = relative.components().all(|c| matches!(c, Component::Normal(_)));
    if !plain || relative.as_os_str().is_empty() {
      return Err(FetchError::InvalidPath { path: path.to_string() });
    }
    Ok(self.root.join(relative))
  }
}

impl AssetSource for DiskSource {
  async fn fetch(&self, path: &str) -> Result<String, FetchError> {
    let full = self.resolve(path)?;
    tokio::fs::read_to_string(&full).await.map_err(|e| match e.kind() {
      std::io::ErrorKind::NotFound => FetchError::NotFound { path: path.to_string() },
      _ => FetchError::Io {
        path: full.display().to_string(),
        message: e.to_string(),
      },
    })
  }
}
