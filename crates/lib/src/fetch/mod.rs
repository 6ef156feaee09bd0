//! Retrieval of update manifests and code units.
//!
//! The update fetcher only knows asset paths (see [`crate::manifest`]); where the
//! bytes come from is up to an [`AssetSource`]:
//! - [`HttpSource`] - the dev server over HTTP
//! - [`DiskSource`] - a build output directory
//! - [`MemorySource`] - an in-memory map, used when embedding and in tests

mod disk;
mod http;
mod memory;

use std::future::Future;
use std::time::Duration;

use thiserror::Error;

pub use disk::DiskSource;
pub use http::HttpSource;
pub use memory::MemorySource;

/// Errors that can occur while fetching an asset.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
  /// The asset does not exist.
  #[error("asset not found: {path}")]
  NotFound { path: String },

  /// The server answered with a non-success status.
  #[error("HTTP {status} for {url}")]
  Status { url: String, status: u16 },

  /// The request could not be completed (connection refused, reset, ...).
  #[error("request to {url} failed: {message}")]
  Request { url: String, message: String },

  /// Reading the asset from disk failed.
  #[error("failed to read '{path}': {message}")]
  Io { path: String, message: String },

  /// The path escapes the source root.
  #[error("invalid asset path '{path}'")]
  InvalidPath { path: String },

  /// No answer within the configured bound.
  #[error("fetching '{path}' timed out after {}ms", .after.as_millis())]
  Timeout { path: String, after: Duration },
}

/// Something that can produce asset payloads by path.
///
/// The returned future must be `Send` so unit fetches can run concurrently on
/// the runtime while module installation stays on the client's thread.
pub trait AssetSource {
  fn fetch(&self, path: &str) -> impl Future<Output = Result<String, FetchError>> + Send;
}

/// Fetch `path`, treating an answer slower than `limit` as a failure.
pub async fn fetch_with_timeout<S: AssetSource>(source: &S, path: &str, limit: Duration) -> Result<String, FetchError> {
  match tokio::time::timeout(limit, source.fetch(path)).await {
    Ok(result) => result,
    Err(_) => Err(FetchError::Timeout {
      path: path.to_string(),
      after: limit,
    }),
  }
}
