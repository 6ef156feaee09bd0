//! Module cache patcher.
//!
//! Installs the factories of one update unit into the live registry:
//!
//! 1. Classify every module id. An id with a live record is replaced. An id
//!    without a record is a plain addition (its factory is defined, nothing is
//!    executed) unless a live record still has an edge to it, which means the
//!    cache is inconsistent and the whole unit is refused untouched.
//! 2. Replace records one by one. Each replacement is a fresh record with empty
//!    exports and acceptance, carrying over the old parent/child edges, and its
//!    factory is executed right away through the same `require` the static
//!    loader uses.
//! 3. Once the whole unit is in, call the acceptance callback every direct parent
//!    registered for a replaced module. Updates do not bubble further up.
//!
//! Installation is all-or-nothing per unit: when a factory throws, every record
//! and factory already swapped or defined for this unit is put back before the
//! error is returned. The graph edges are restored from a snapshot taken before
//! the first swap, so modules first loaded by a re-executed factory's `require`
//! are dropped again along with the edges they added to untouched records. Side
//! effects the Lua code itself had are not undone. Units installed earlier in
//! the same cycle are left as they are.

use mlua::prelude::*;
use tracing::{debug, info, warn};

use crate::client::HmrError;
use crate::lua::hot::HotContext;
use crate::registry::{EdgeSnapshot, ModuleFactories, ModuleRecord, SharedRegistry, execute_factory};
use crate::types::{ModuleId, UnitId};

/// What installing one unit did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallReport {
  pub unit: UnitId,
  /// Modules whose records were replaced and re-executed.
  pub replaced: Vec<ModuleId>,
  /// Modules that were not loaded before; only their factories were defined.
  pub added: Vec<ModuleId>,
  /// `(parent, dependency)` pairs whose acceptance callback ran.
  pub accepted: Vec<(ModuleId, ModuleId)>,
}

/// State needed to undo one swap.
struct Swap {
  old: ModuleRecord,
  old_factory: Option<LuaFunction>,
}

fn lua_failure(module: &ModuleId, err: LuaError) -> HmrError {
  HmrError::FactoryExecution {
    module: module.clone(),
    message: err.to_string(),
  }
}

/// Everything needed to put the registry back as it was before a unit.
struct Rollback {
  edges: EdgeSnapshot,
  added: Vec<(ModuleId, Option<LuaFunction>)>,
  swaps: Vec<Swap>,
}

impl Rollback {
  /// Put back every swapped record and factory, newest first, then the edges.
  fn apply(self, registry: &SharedRegistry) {
    let mut reg = registry.borrow_mut();
    for swap in self.swaps.into_iter().rev() {
      let id = swap.old.id.clone();
      match swap.old_factory {
        Some(factory) => reg.define(id.clone(), factory),
        None => reg.undefine(&id),
      };
      reg.insert(swap.old);
      debug!(module = %id, "restored previous record");
    }
    for (id, old_factory) in self.added.into_iter().rev() {
      match old_factory {
        Some(factory) => reg.define(id, factory),
        None => reg.undefine(&id),
      };
    }
    reg.restore_edges(self.edges);
  }
}

/// Install the factories of `unit` into the registry.
pub fn install_modules(
  lua: &Lua,
  registry: &SharedRegistry,
  hot: &HotContext,
  unit: &UnitId,
  factories: ModuleFactories,
) -> Result<InstallReport, HmrError> {
  let mut report = InstallReport {
    unit: unit.clone(),
    replaced: Vec::new(),
    added: Vec::new(),
    accepted: Vec::new(),
  };

  let mut replacements = Vec::new();
  let mut additions = Vec::new();
  {
    let reg = registry.borrow();
    for (id, factory) in factories {
      if reg.contains(&id) {
        replacements.push((id, factory));
      } else if reg.is_referenced(&id) {
        return Err(HmrError::InconsistentCache { module: id });
      } else {
        additions.push((id, factory));
      }
    }
  }

  let mut rollback = Rollback {
    edges: registry.borrow().edges(),
    added: Vec::new(),
    swaps: Vec::new(),
  };
  {
    let mut reg = registry.borrow_mut();
    for (id, factory) in additions {
      debug!(unit = %unit, module = %id, "defining module that was never loaded");
      let old_factory = reg.define(id.clone(), factory);
      rollback.added.push((id.clone(), old_factory));
      report.added.push(id);
    }
  }

  for (id, factory) in replacements {
    let module = {
      let mut reg = registry.borrow_mut();
      let Some(old) = reg.get(&id).cloned() else {
        drop(reg);
        rollback.apply(registry);
        return Err(HmrError::InconsistentCache { module: id });
      };
      let record = match ModuleRecord::replacing(lua, &old, hot) {
        Ok(record) => record,
        Err(err) => {
          drop(reg);
          rollback.apply(registry);
          return Err(lua_failure(&id, err));
        }
      };
      let module = record.module.clone();
      let old_factory = reg.define(id.clone(), factory.clone());
      reg.insert(record);
      rollback.swaps.push(Swap { old, old_factory });
      module
    };

    debug!(unit = %unit, module = %id, "re-executing module");
    if let Err(err) = execute_factory(lua, registry, hot, &id, &factory, &module) {
      warn!(unit = %unit, module = %id, error = %err, "module factory failed, unit not installed");
      rollback.apply(registry);
      return Err(lua_failure(&id, err));
    }
    report.replaced.push(id);
  }

  for id in &report.replaced {
    let parents: Vec<ModuleId> = registry
      .borrow()
      .get(id)
      .map(|record| record.parents.iter().cloned().collect())
      .unwrap_or_default();

    for parent in parents {
      let Some(callback) = registry.borrow().acceptor(&parent, id) else {
        continue;
      };
      debug!(parent = %parent, dependency = %id, "running acceptance callback");
      callback
        .call::<()>(id.as_str())
        .map_err(|err| lua_failure(&parent, err))?;
      report.accepted.push((parent, id.clone()));
    }
  }

  info!(
    unit = %unit,
    replaced = report.replaced.len(),
    added = report.added.len(),
    accepted = report.accepted.len(),
    "installed update unit"
  );
  Ok(report)
}
