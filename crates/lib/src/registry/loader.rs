//! Static module loading through the shared registry.
//!
//! Factories have the signature `function(module, exports, require)`. The
//! `require` they receive is bound to the requiring module, so every lookup
//! records a parent/child edge in the registry.

use mlua::prelude::*;
use tracing::debug;

use super::{ModuleRecord, SharedRegistry};
use crate::lua::hot::HotContext;
use crate::types::ModuleId;

/// Convert a Lua module key (string or integer) to a [`ModuleId`].
pub fn module_id_from_value(value: &LuaValue) -> LuaResult<ModuleId> {
  match value {
    LuaValue::String(s) => Ok(ModuleId::new(s.to_str()?.to_string())),
    LuaValue::Integer(i) => Ok(ModuleId::new(i.to_string())),
    other => Err(LuaError::external(format!(
      "module id must be a string or an integer, got {}",
      other.type_name()
    ))),
  }
}

/// Create the `require` function handed to the factory of `parent`.
fn create_require(registry: SharedRegistry, hot: HotContext, parent: ModuleId) -> impl Fn(&Lua, LuaValue) -> LuaResult<LuaValue> {
  move |lua: &Lua, id: LuaValue| {
    let id = module_id_from_value(&id)?;
    load_module(lua, &registry, &hot, &id, Some(&parent))
  }
}

/// Return the exports of `id`, executing its factory on first use.
///
/// When `parent` is given the edge `parent -> id` is recorded, whether or not
/// the module was already loaded. A module that is still executing (a require
/// cycle) yields its exports as they are so far.
///
/// If the factory fails, the half-built record is removed again and the error
/// propagates to the caller.
pub fn load_module(
  lua: &Lua,
  registry: &SharedRegistry,
  hot: &HotContext,
  id: &ModuleId,
  parent: Option<&ModuleId>,
) -> LuaResult<LuaValue> {
  let factory = {
    let mut reg = registry.borrow_mut();
    if let Some(record) = reg.get(id) {
      let exports = record.exports()?;
      if let Some(parent) = parent {
        reg.link(parent, id);
      }
      return Ok(exports);
    }
    reg
      .factory(id)
      .ok_or_else(|| LuaError::external(format!("module '{}' is not defined", id)))?
  };

  let record = ModuleRecord::new(lua, id.clone(), hot)?;
  let module = record.module.clone();
  {
    let mut reg = registry.borrow_mut();
    reg.insert(record);
    if let Some(parent) = parent {
      reg.link(parent, id);
    }
  }

  debug!(module = %id, parent = ?parent.map(ModuleId::as_str), "loading module");
  if let Err(err) = execute_factory(lua, registry, hot, id, &factory, &module) {
    registry.borrow_mut().remove(id);
    return Err(err);
  }

  module.get("exports")
}

/// Run `factory` against the `module` table of the record installed for `id`.
///
/// Marks the record loaded once the factory returns.
pub fn execute_factory(
  lua: &Lua,
  registry: &SharedRegistry,
  hot: &HotContext,
  id: &ModuleId,
  factory: &LuaFunction,
  module: &LuaTable,
) -> LuaResult<()> {
  let exports: LuaValue = module.get("exports")?;
  let require = lua.create_function(create_require(registry.clone(), hot.clone(), id.clone()))?;

  factory.call::<()>((module.clone(), exports, require))?;

  module.set("loaded", true)?;
  registry.borrow_mut().mark_loaded(id);
  Ok(())
}
