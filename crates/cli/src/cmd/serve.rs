//! Implementation of the `hotpatch serve` command.
//!
//! Serves the build output directory over HTTP, pushes build notifications to
//! every client connected to the notification socket, and accepts build reports
//! from the pipeline on the build hook endpoint.

use std::path::Path;

use anyhow::{Context, Result};
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::http::{StatusCode, Uri, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use futures_util::{SinkExt, StreamExt};
use tracing::{debug, warn};

use hotpatch_lib::channel::NotificationChannel;
use hotpatch_lib::config::ServerConfig;
use hotpatch_lib::consts::BUILD_HOOK_PATH;
use hotpatch_lib::fetch::{AssetSource, DiskSource, FetchError};
use hotpatch_lib::signal::{BuildHook, BuildReport, BuildSignalEmitter, build_hook};

use crate::output::{print_info, print_stat, print_success};

#[derive(Clone)]
struct AppState {
  channel: NotificationChannel,
  hook: BuildHook,
  assets: DiskSource,
}

/// Execute the serve command. Runs until the process is interrupted.
pub fn cmd_serve(config: &ServerConfig) -> Result<()> {
  let rt = tokio::runtime::Runtime::new().context("Failed to create async runtime")?;
  rt.block_on(serve(config))
}

async fn serve(config: &ServerConfig) -> Result<()> {
  let channel = NotificationChannel::new();
  let (hook, reports) = build_hook(16);
  tokio::spawn(BuildSignalEmitter::new(channel.clone()).run(reports));

  let state = AppState {
    channel,
    hook,
    assets: DiskSource::new(config.asset_dir.clone()),
  };
  let app = Router::new()
    .route(&config.socket_path, get(socket_handler))
    .route(BUILD_HOOK_PATH, post(build_handler))
    .fallback(asset_handler)
    .with_state(state);

  let listener = tokio::net::TcpListener::bind(&config.listen)
    .await
    .with_context(|| format!("Failed to listen on {}", config.listen))?;
  let addr = listener.local_addr().context("Failed to read listen address")?;

  print_success(&format!("Serving on http://{}", addr));
  print_stat("Assets", &config.asset_dir.display().to_string());
  print_stat("Socket", &config.socket_path);
  print_stat("Build hook", BUILD_HOOK_PATH);
  print_info("Waiting for builds");

  axum::serve(listener, app).await.context("Server failed")?;
  Ok(())
}

async fn socket_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
  ws.on_upgrade(move |socket| forward_events(socket, state.channel))
}

/// Push channel events to one socket until either side goes away.
async fn forward_events(socket: WebSocket, channel: NotificationChannel) {
  let mut subscription = channel.connect();
  let (mut sender, mut receiver) = socket.split();

  loop {
    tokio::select! {
      event = subscription.recv() => {
        let Some(event) = event else { break };
        let payload = match event.to_json() {
          Ok(payload) => payload,
          Err(err) => {
            warn!(error = %err, "failed to encode event");
            continue;
          }
        };
        if sender.send(Message::Text(payload.into())).await.is_err() {
          break;
        }
      }
      incoming = receiver.next() => match incoming {
        Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
        Some(Ok(_)) => {}
      },
    }
  }

  debug!(client = subscription.id().0, "socket closed");
}

async fn build_handler(State(state): State<AppState>, Json(report): Json<BuildReport>) -> StatusCode {
  match state.hook.send(report).await {
    Ok(()) => StatusCode::ACCEPTED,
    Err(_) => StatusCode::SERVICE_UNAVAILABLE,
  }
}

async fn asset_handler(State(state): State<AppState>, uri: Uri) -> Response {
  let path = match uri.path().trim_start_matches('/') {
    "" => "index.html",
    path => path,
  };

  match state.assets.fetch(path).await {
    Ok(body) => ([(header::CONTENT_TYPE, content_type(path))], body).into_response(),
    Err(FetchError::NotFound { .. }) => StatusCode::NOT_FOUND.into_response(),
    Err(FetchError::InvalidPath { .. }) => StatusCode::BAD_REQUEST.into_response(),
    Err(err) => {
      warn!(path, error = %err, "failed to serve asset");
      StatusCode::INTERNAL_SERVER_ERROR.into_response()
    }
  }
}

fn content_type(path: &str) -> &'static str {
  match Path::new(path).extension().and_then(|ext| ext.to_str()) {
    Some("json") => "application/json",
    Some("js") => "text/javascript; charset=utf-8",
    Some("lua") => "text/x-lua; charset=utf-8",
    Some("html") => "text/html; charset=utf-8",
    _ => "text/plain; charset=utf-8",
  }
}
