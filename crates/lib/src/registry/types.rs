//! Module records and the registry arena.

use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::rc::Rc;

use mlua::prelude::*;

use crate::lua::hot::{HotContext, create_hot_api};
use crate::types::ModuleId;

/// Factories keyed by module id, as handed over by a bundle or an update unit.
pub type ModuleFactories = BTreeMap<ModuleId, LuaFunction>;

/// Parent and child edges of every live record, keyed by module id.
pub type EdgeSnapshot = HashMap<ModuleId, (BTreeSet<ModuleId>, BTreeSet<ModuleId>)>;

/// Dependency updates a module handles itself, keyed by dependency id.
///
/// Shared between the record and the `module.hot.accept` closure of the same
/// record instance; a replacement record gets a fresh, empty entry.
#[derive(Clone, Default)]
pub struct AcceptanceEntry(Rc<RefCell<HashMap<ModuleId, LuaFunction>>>);

impl AcceptanceEntry {
  /// Store `callback` for `dependency`, replacing any earlier one.
  pub fn accept(&self, dependency: ModuleId, callback: LuaFunction) {
    self.0.borrow_mut().insert(dependency, callback);
  }

  pub fn callback(&self, dependency: &ModuleId) -> Option<LuaFunction> {
    self.0.borrow().get(dependency).cloned()
  }

  pub fn accepts(&self, dependency: &ModuleId) -> bool {
    self.0.borrow().contains_key(dependency)
  }

  /// Accepted dependency ids, sorted.
  pub fn dependencies(&self) -> Vec<ModuleId> {
    let mut deps: Vec<ModuleId> = self.0.borrow().keys().cloned().collect();
    deps.sort();
    deps
  }
}

/// Live runtime state of one loaded module.
///
/// Records are never patched in place: an update builds a new record for the
/// same id, carrying over only the graph edges.
#[derive(Clone)]
pub struct ModuleRecord {
  pub id: ModuleId,
  /// The `module` table handed to the factory (`id`, `exports`, `loaded`, `hot`).
  pub module: LuaTable,
  /// Whether the factory ran to completion.
  pub loaded: bool,
  pub acceptance: AcceptanceEntry,
  /// Modules that required this one.
  pub parents: BTreeSet<ModuleId>,
  /// Modules this one required.
  pub children: BTreeSet<ModuleId>,
}

impl ModuleRecord {
  /// Create a fresh, not yet executed record with empty exports.
  pub fn new(lua: &Lua, id: ModuleId, hot: &HotContext) -> LuaResult<Self> {
    let acceptance = AcceptanceEntry::default();

    let module = lua.create_table()?;
    module.set("id", id.as_str())?;
    module.set("exports", lua.create_table()?)?;
    module.set("loaded", false)?;
    module.set("hot", create_hot_api(lua, acceptance.clone(), hot.clone())?)?;

    Ok(Self {
      id,
      module,
      loaded: false,
      acceptance,
      parents: BTreeSet::new(),
      children: BTreeSet::new(),
    })
  }

  /// Create the record that replaces `old`, keeping its edges.
  pub fn replacing(lua: &Lua, old: &ModuleRecord, hot: &HotContext) -> LuaResult<Self> {
    let mut record = Self::new(lua, old.id.clone(), hot)?;
    record.parents = old.parents.clone();
    record.children = old.children.clone();
    Ok(record)
  }

  /// Current value of `module.exports`; factories may reassign it.
  pub fn exports(&self) -> LuaResult<LuaValue> {
    self.module.get("exports")
  }
}

/// Arena of module factories and live records.
#[derive(Default)]
pub struct ModuleRegistry {
  factories: HashMap<ModuleId, LuaFunction>,
  records: HashMap<ModuleId, ModuleRecord>,
}

impl ModuleRegistry {
  /// Define (or redefine) the factory for `id`. Returns the previous factory.
  pub fn define(&mut self, id: ModuleId, factory: LuaFunction) -> Option<LuaFunction> {
    self.factories.insert(id, factory)
  }

  pub fn undefine(&mut self, id: &ModuleId) -> Option<LuaFunction> {
    self.factories.remove(id)
  }

  pub fn factory(&self, id: &ModuleId) -> Option<LuaFunction> {
    self.factories.get(id).cloned()
  }

  pub fn is_defined(&self, id: &ModuleId) -> bool {
    self.factories.contains_key(id)
  }

  pub fn get(&self, id: &ModuleId) -> Option<&ModuleRecord> {
    self.records.get(id)
  }

  pub fn contains(&self, id: &ModuleId) -> bool {
    self.records.contains_key(id)
  }

  /// Install `record` under its id, returning the record it replaced.
  pub fn insert(&mut self, record: ModuleRecord) -> Option<ModuleRecord> {
    self.records.insert(record.id.clone(), record)
  }

  pub fn remove(&mut self, id: &ModuleId) -> Option<ModuleRecord> {
    self.records.remove(id)
  }

  pub fn mark_loaded(&mut self, id: &ModuleId) {
    if let Some(record) = self.records.get_mut(id) {
      record.loaded = true;
    }
  }

  /// Record that `parent` required `child`. Missing records are skipped.
  pub fn link(&mut self, parent: &ModuleId, child: &ModuleId) {
    if let Some(record) = self.records.get_mut(parent) {
      record.children.insert(child.clone());
    }
    if let Some(record) = self.records.get_mut(child) {
      record.parents.insert(parent.clone());
    }
  }

  /// Whether any live record still has an edge to `id`.
  pub fn is_referenced(&self, id: &ModuleId) -> bool {
    self
      .records
      .values()
      .any(|record| record.parents.contains(id) || record.children.contains(id))
  }

  /// Callback `parent` registered for updates of `dependency`.
  pub fn acceptor(&self, parent: &ModuleId, dependency: &ModuleId) -> Option<LuaFunction> {
    self.records.get(parent)?.acceptance.callback(dependency)
  }

  /// Ids of all live records, sorted.
  pub fn ids(&self) -> Vec<ModuleId> {
    let mut ids: Vec<ModuleId> = self.records.keys().cloned().collect();
    ids.sort();
    ids
  }

  pub fn edges(&self) -> EdgeSnapshot {
    self
      .records
      .iter()
      .map(|(id, record)| (id.clone(), (record.parents.clone(), record.children.clone())))
      .collect()
  }

  /// Drop records absent from `snapshot` and put back the edges of the rest.
  pub fn restore_edges(&mut self, mut snapshot: EdgeSnapshot) {
    self.records.retain(|id, _| snapshot.contains_key(id));
    for (id, record) in self.records.iter_mut() {
      if let Some((parents, children)) = snapshot.remove(id) {
        record.parents = parents;
        record.children = children;
      }
    }
  }

  pub fn len(&self) -> usize {
    self.records.len()
  }

  pub fn is_empty(&self) -> bool {
    self.records.is_empty()
  }
}
