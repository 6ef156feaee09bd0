use std::cell::RefCell;
use std::rc::Rc;

use mlua::prelude::*;
use tracing::debug;

use super::globals;
use super::hot::HotContext;
use crate::client::HmrError;
use crate::patch::{InstallReport, install_modules};
use crate::registry::{self, ModuleFactories, SharedRegistry, load_module};
use crate::types::{ModuleId, UnitId};

/// Factories an update unit handed over through `onUpdateUnitLoaded`.
pub struct UnitDelivery {
  pub unit: UnitId,
  pub factories: ModuleFactories,
}

/// Deliveries queued by unit scripts, waiting to be installed.
pub type UnitInbox = Rc<RefCell<Vec<UnitDelivery>>>;

/// The Lua state of one client session together with its module registry.
pub struct HotRuntime {
  lua: Lua,
  registry: SharedRegistry,
  hot: HotContext,
  inbox: UnitInbox,
}

impl HotRuntime {
  /// Create a new Lua runtime with the bundle and unit entry points registered.
  pub fn new(hot: HotContext) -> LuaResult<Self> {
    let lua = Lua::new();
    let registry = registry::shared();
    let inbox: UnitInbox = Rc::new(RefCell::new(Vec::new()));

    globals::register_globals(&lua, registry.clone(), inbox.clone())?;

    Ok(Self {
      lua,
      registry,
      hot,
      inbox,
    })
  }

  pub fn lua(&self) -> &Lua {
    &self.lua
  }

  pub fn registry(&self) -> &SharedRegistry {
    &self.registry
  }

  /// Execute a bundle script. Bundles define factories via `registerModules`.
  pub fn load_bundle(&self, name: &str, source: &str) -> LuaResult<()> {
    debug!(bundle = name, "loading bundle");
    self.lua.load(source).set_name(format!("@{}", name)).exec()
  }

  /// Load a module through the static loader and return its exports.
  pub fn require(&self, id: &ModuleId) -> LuaResult<LuaValue> {
    load_module(&self.lua, &self.registry, &self.hot, id, None)
  }

  /// Exports of an already loaded module.
  pub fn exports(&self, id: &ModuleId) -> LuaResult<Option<LuaValue>> {
    self.registry.borrow().get(id).map(|record| record.exports()).transpose()
  }

  /// Execute an update unit script and return the deliveries it made.
  ///
  /// If the script fails, anything it delivered before failing is discarded.
  pub fn run_unit_script(&self, name: &str, source: &str) -> LuaResult<Vec<UnitDelivery>> {
    self.inbox.borrow_mut().clear();
    let result = self.lua.load(source).set_name(format!("@{}", name)).exec();
    let deliveries = std::mem::take(&mut *self.inbox.borrow_mut());
    result.map(|()| deliveries)
  }

  /// Hand a delivery to the module cache patcher.
  pub fn install(&self, delivery: UnitDelivery) -> Result<InstallReport, HmrError> {
    install_modules(&self.lua, &self.registry, &self.hot, &delivery.unit, delivery.factories)
  }
}
