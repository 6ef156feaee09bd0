//! Global entry points for bundles and update units.
//!
//! This module registers:
//! - `registerModules(factories)` - called by the initial bundle to define its
//!   module factories
//! - `onUpdateUnitLoaded(unitId, factories)` - called by every update unit once
//!   it is executed; the factories are queued for the module cache patcher

use mlua::prelude::*;
use tracing::debug;

use super::runtime::{UnitDelivery, UnitInbox};
use crate::consts::{BUNDLE_ENTRY_POINT, UNIT_ENTRY_POINT};
use crate::registry::{ModuleFactories, SharedRegistry, module_id_from_value};
use crate::types::UnitId;

/// Read a `{ [id] = factory }` table into [`ModuleFactories`].
pub fn collect_factories(table: &LuaTable) -> LuaResult<ModuleFactories> {
  let mut factories = ModuleFactories::new();
  for pair in table.pairs::<LuaValue, LuaValue>() {
    let (key, value) = pair?;
    let id = module_id_from_value(&key)?;
    let type_name = value.type_name();
    let LuaValue::Function(factory) = value else {
      return Err(LuaError::external(format!(
        "factory for module '{}' must be a function, got {}",
        id, type_name
      )));
    };
    factories.insert(id, factory);
  }
  Ok(factories)
}

fn unit_id_from_value(value: &LuaValue) -> LuaResult<UnitId> {
  match value {
    LuaValue::String(s) => Ok(UnitId::new(s.to_str()?.to_string())),
    LuaValue::Integer(i) => Ok(UnitId::new(i.to_string())),
    other => Err(LuaError::external(format!(
      "unit id must be a string or an integer, got {}",
      other.type_name()
    ))),
  }
}

/// Register the bundle and update unit entry points as globals.
pub fn register_globals(lua: &Lua, registry: SharedRegistry, inbox: UnitInbox) -> LuaResult<()> {
  let register_modules = lua.create_function(move |_, factories: LuaTable| {
    let factories = collect_factories(&factories)?;
    let mut reg = registry.borrow_mut();
    for (id, factory) in factories {
      debug!(module = %id, "defining module");
      reg.define(id, factory);
    }
    Ok(())
  })?;
  lua.globals().set(BUNDLE_ENTRY_POINT, register_modules)?;

  let on_unit_loaded = lua.create_function(move |_, (unit, factories): (LuaValue, LuaTable)| {
    let unit = unit_id_from_value(&unit)?;
    let factories = collect_factories(&factories)?;
    debug!(unit = %unit, modules = factories.len(), "update unit delivered");
    inbox.borrow_mut().push(UnitDelivery { unit, factories });
    Ok(())
  })?;
  lua.globals().set(UNIT_ENTRY_POINT, on_unit_loaded)?;

  Ok(())
}
