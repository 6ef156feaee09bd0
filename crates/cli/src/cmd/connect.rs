//! Implementation of the `hotpatch connect` command.
//!
//! Boots a bundle fetched from the build server and keeps it up to date with
//! every build the server announces. When an update cannot be applied in place
//! the session is thrown away and booted again from the latest bundle.

use anyhow::{Context, Result};
use futures_util::StreamExt;
use owo_colors::OwoColorize;
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, warn};

use hotpatch_lib::channel::ServerEvent;
use hotpatch_lib::client::{ClientExit, HmrError, UpdateClient};
use hotpatch_lib::config::ClientConfig;
use hotpatch_lib::fetch::{HttpSource, fetch_with_timeout};
use hotpatch_lib::types::ModuleId;

use crate::output::{format_duration, print_info, print_stat, print_success, print_warning, symbols};

/// What to boot once connected.
pub struct ConnectOptions {
  /// Path of the bundle script on the server.
  pub bundle: String,
  /// Module loaded after the bundle registered its factories.
  pub entry: String,
}

// HmrError carries mlua errors, which are not Send + Sync.
fn map_hmr_err<T>(result: Result<T, HmrError>) -> Result<T> {
  result.map_err(|e| anyhow::anyhow!("{}", e))
}

/// Execute the connect command. Returns once the server closes the socket.
pub fn cmd_connect(config: &ClientConfig, options: ConnectOptions) -> Result<()> {
  let rt = tokio::runtime::Runtime::new().context("Failed to create async runtime")?;
  rt.block_on(connect(config, &options))
}

async fn connect(config: &ClientConfig, options: &ConnectOptions) -> Result<()> {
  let source = HttpSource::new(config.base_url.clone());
  let socket_url = socket_url(&config.base_url, &config.socket_path);
  let entry = ModuleId::new(options.entry.as_str());

  print_stat("Server", &config.base_url);
  print_stat("Fetch timeout", &format_duration(config.fetch_timeout()));
  if !config.hot {
    print_warning("Hot updates disabled, every build reloads the session");
  }

  loop {
    let bundle = fetch_with_timeout(&source, &options.bundle, config.fetch_timeout())
      .await
      .with_context(|| format!("Failed to fetch bundle '{}'", options.bundle))?;

    let reloader = |err: &HmrError| {
      print_warning(&format!("{} Reloading: {}", symbols::ARROW, err));
    };
    let mut client = map_hmr_err(UpdateClient::new(source.clone(), reloader, config))?;
    map_hmr_err(client.boot(&bundle, &entry))?;
    print_success(&format!("Booted {} from {}", entry.cyan(), options.bundle));

    let events = open_socket(&socket_url).await?;
    match client.run(events).await {
      ClientExit::Reloaded => {
        if let Some(build) = client.applied_build() {
          debug!(build = %build, "discarding session");
        }
        print_info("Booting a fresh session");
      }
      ClientExit::Disconnected => {
        print_info("Build server closed the connection");
        return Ok(());
      }
    }
  }
}

/// WebSocket URL of the notification socket for an HTTP base URL.
fn socket_url(base_url: &str, socket_path: &str) -> String {
  let base = base_url.trim_end_matches('/');
  let base = if let Some(rest) = base.strip_prefix("https://") {
    format!("wss://{}", rest)
  } else if let Some(rest) = base.strip_prefix("http://") {
    format!("ws://{}", rest)
  } else {
    base.to_string()
  };
  format!("{}/{}", base, socket_path.trim_start_matches('/'))
}

/// Connect to the notification socket and forward decoded events.
async fn open_socket(url: &str) -> Result<mpsc::Receiver<ServerEvent>> {
  let (mut ws, _) = connect_async(url)
    .await
    .with_context(|| format!("Failed to connect to {}", url))?;
  debug!(url, "notification socket open");

  let (tx, rx) = mpsc::channel(64);
  tokio::spawn(async move {
    while let Some(message) = ws.next().await {
      let text = match message {
        Ok(Message::Text(text)) => text,
        Ok(Message::Close(_)) => break,
        Ok(_) => continue,
        Err(err) => {
          warn!(error = %err, "notification socket error");
          break;
        }
      };
      match ServerEvent::from_json(&text) {
        Ok(event) => {
          if tx.send(event).await.is_err() {
            break;
          }
        }
        Err(err) => warn!(error = %err, "ignoring malformed event"),
      }
    }
  });

  Ok(rx)
}
