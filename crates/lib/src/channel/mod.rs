//! Notification channel between the build server and its clients.
//!
//! The channel is transport agnostic: every connected client is represented by
//! an in-process queue of [`ServerEvent`]s. A transport (a WebSocket, a test
//! harness) drains a [`Subscription`] and forwards the events in order.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::types::BuildId;

/// Events pushed from the server to every client.
///
/// # Wire format
///
/// ```json
/// {"type":"identifier-update","data":"def456"}
/// {"type":"build-ready"}
/// {"type":"connection-established"}
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "kebab-case")]
pub enum ServerEvent {
  /// A build completed; carries its identifier.
  IdentifierUpdate(BuildId),
  /// The build announced by the preceding identifier update is ready to fetch.
  BuildReady,
  /// Informational greeting sent once per connection.
  ConnectionEstablished,
}

impl ServerEvent {
  pub fn to_json(&self) -> Result<String, serde_json::Error> {
    serde_json::to_string(self)
  }

  pub fn from_json(payload: &str) -> Result<Self, serde_json::Error> {
    serde_json::from_str(payload)
  }
}

/// Identifies one connected client for the lifetime of its connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ClientId(pub u64);

#[derive(Default)]
struct ChannelState {
  next_id: u64,
  clients: BTreeMap<ClientId, mpsc::UnboundedSender<ServerEvent>>,
  latest: Option<BuildId>,
}

impl ChannelState {
  /// Send to every client, dropping the ones whose receiver is gone.
  fn broadcast(&mut self, events: &[ServerEvent]) -> usize {
    self.clients.retain(|id, tx| {
      let delivered = events.iter().all(|event| tx.send(event.clone()).is_ok());
      if !delivered {
        debug!(client = id.0, "pruning disconnected client");
      }
      delivered
    });
    self.clients.len()
  }
}

/// Publish/subscribe hub shared by the build signal emitter and the transport.
#[derive(Clone, Default)]
pub struct NotificationChannel {
  state: Arc<Mutex<ChannelState>>,
}

impl NotificationChannel {
  pub fn new() -> Self {
    Self::default()
  }

  fn lock(&self) -> MutexGuard<'_, ChannelState> {
    self.state.lock().unwrap_or_else(PoisonError::into_inner)
  }

  /// Register a new client.
  ///
  /// The client is greeted with `connection-established` and, when a build has
  /// already completed, with the latest identifier followed by `build-ready`.
  /// Earlier identifiers are never replayed.
  pub fn connect(&self) -> Subscription {
    let (tx, rx) = mpsc::unbounded_channel();
    let mut state = self.lock();

    let id = ClientId(state.next_id);
    state.next_id += 1;

    // The receiver is alive, these cannot fail.
    let _ = tx.send(ServerEvent::ConnectionEstablished);
    if let Some(latest) = &state.latest {
      let _ = tx.send(ServerEvent::IdentifierUpdate(latest.clone()));
      let _ = tx.send(ServerEvent::BuildReady);
    }

    state.clients.insert(id, tx);
    info!(client = id.0, clients = state.clients.len(), "client connected");

    Subscription {
      id,
      rx,
      channel: self.clone(),
    }
  }

  /// Remove a client. Unknown ids are ignored.
  pub fn disconnect(&self, id: ClientId) {
    let mut state = self.lock();
    if state.clients.remove(&id).is_some() {
      info!(client = id.0, clients = state.clients.len(), "client disconnected");
    }
  }

  /// Record `build` as the latest build and notify every client.
  ///
  /// Each client receives `identifier-update` immediately followed by
  /// `build-ready`; the pair is queued under one lock so a concurrent connect
  /// cannot observe half of it. Returns the number of clients reached.
  pub fn announce(&self, build: BuildId) -> usize {
    let mut state = self.lock();
    state.latest = Some(build.clone());
    let reached = state.broadcast(&[ServerEvent::IdentifierUpdate(build.clone()), ServerEvent::BuildReady]);
    info!(build = %build, clients = reached, "announced build");
    reached
  }

  /// Send a single event to every client.
  pub fn publish(&self, event: ServerEvent) -> usize {
    self.lock().broadcast(std::slice::from_ref(&event))
  }

  pub fn latest(&self) -> Option<BuildId> {
    self.lock().latest.clone()
  }

  pub fn client_count(&self) -> usize {
    self.lock().clients.len()
  }
}

/// The receiving end held by one connected client.
///
/// Dropping the subscription disconnects the client.
pub struct Subscription {
  id: ClientId,
  rx: mpsc::UnboundedReceiver<ServerEvent>,
  channel: NotificationChannel,
}

impl Subscription {
  pub fn id(&self) -> ClientId {
    self.id
  }

  /// Wait for the next event. Returns `None` once the client was disconnected.
  pub async fn recv(&mut self) -> Option<ServerEvent> {
    self.rx.recv().await
  }

  /// Take the next queued event without waiting.
  pub fn try_recv(&mut self) -> Option<ServerEvent> {
    self.rx.try_recv().ok()
  }
}

impl Drop for Subscription {
  fn drop(&mut self) {
    self.channel.disconnect(self.id);
  }
}
