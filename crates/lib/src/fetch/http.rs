use tracing::debug;

use super::{AssetSource, FetchError};

/// Fetches assets from the dev server over HTTP.
#[derive(Debug, Clone)]
pub struct HttpSource {
  client: reqwest::Client,
  base_url: String,
}

impl HttpSource {
  pub fn new(base_url: impl Into<String>) -> Self {
    Self {
      client: reqwest::Client::new(),
      base_url: base_url.into(),
    }
  }

  /// Full URL of an asset path.
  pub fn url_for(&self, path: &str) -> String {
    format!("{}/{}", self.base_url.trim_end_matches('/'), path.trim_start_matches('/'))
  }
}

impl AssetSource for HttpSource {
  async fn fetch(&self, path: &str) -> Result<String, FetchError> {
    let url = self.url_for(path);
    debug!(url = %url, "fetching asset");

    let response = self.client.get(&url).send().await.map_err(|e| FetchError::Request {
      url: url.clone(),
      message: e.to_string(),
    })?;

    let status = response.status();
    if !status.is_success() {
      return Err(FetchError::Status {
        url,
        status: status.as_u16(),
      });
    }

    response.text().await.map_err(|e| FetchError::Request {
      url,
      message: e.to_string(),
    })
  }
}
