//! The `module.hot` API exposed to module factories.
//!
//! Every module record gets its own `hot` table bound to that record's
//! [`AcceptanceEntry`]:
//! - `module.hot.accept(deps, callback)` - handle updates of `deps` locally
//! - `module.hot.check(on_done)` - ask the update client to look for a new build
//!
//! Acceptance is one level deep: a callback only fires when a direct
//! dependency is replaced. A module that wants to react to a deeper change must
//! accept the intermediate dependency itself.

use mlua::prelude::*;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::registry::{AcceptanceEntry, module_id_from_value};

/// A manual update check requested from Lua.
pub struct CheckRequest {
  on_done: Option<LuaFunction>,
}

impl CheckRequest {
  pub fn new(on_done: Option<LuaFunction>) -> Self {
    Self { on_done }
  }

  /// Report the outcome back to Lua: `on_done(true)` or `on_done(false, reason)`.
  pub fn resolve(self, outcome: Result<(), String>) {
    let Some(on_done) = self.on_done else {
      return;
    };
    let result = match outcome {
      Ok(()) => on_done.call::<()>(true),
      Err(reason) => on_done.call::<()>((false, reason)),
    };
    if let Err(e) = result {
      warn!(error = %e, "update check callback failed");
    }
  }
}

/// Client-side context shared by every `hot` table of a session.
#[derive(Clone)]
pub struct HotContext {
  checks: mpsc::UnboundedSender<CheckRequest>,
}

impl HotContext {
  /// Create a context and the receiver the update client drains check requests from.
  pub fn new() -> (Self, mpsc::UnboundedReceiver<CheckRequest>) {
    let (checks, rx) = mpsc::unbounded_channel();
    (Self { checks }, rx)
  }

  /// Queue a manual check. Fails when the update client is gone.
  pub fn request_check(&self, on_done: Option<LuaFunction>) -> LuaResult<()> {
    self
      .checks
      .send(CheckRequest::new(on_done))
      .map_err(|_| LuaError::external("update client is not running"))
  }
}

/// Build the `hot` table for one module record.
pub fn create_hot_api(lua: &Lua, acceptance: AcceptanceEntry, ctx: HotContext) -> LuaResult<LuaTable> {
  let hot = lua.create_table()?;

  // hot.accept(deps, callback)
  let accept = lua.create_function(move |lua, (deps, callback): (LuaValue, Option<LuaFunction>)| {
    let ids = match &deps {
      LuaValue::Nil => return Ok(()),
      LuaValue::Table(list) => list
        .sequence_values::<LuaValue>()
        .map(|value| module_id_from_value(&value?))
        .collect::<LuaResult<Vec<_>>>()?,
      single => vec![module_id_from_value(single)?],
    };

    let callback = match callback {
      Some(callback) => callback,
      None => lua.create_function(|_, _: LuaMultiValue| Ok(()))?,
    };

    for id in ids {
      debug!(dependency = %id, "accepting dependency updates");
      acceptance.accept(id, callback.clone());
    }
    Ok(())
  })?;
  hot.set("accept", accept)?;

  // hot.check(on_done)
  let check = lua.create_function(move |_, on_done: Option<LuaFunction>| ctx.request_check(on_done))?;
  hot.set("check", check)?;

  Ok(hot)
}
