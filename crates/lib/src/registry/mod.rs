//! The live module graph.
//!
//! [`ModuleRegistry`] is the single arena of module records for a client
//! session. It is shared as a [`SharedRegistry`] between the static loader
//! (`require`), the Lua globals and the module cache patcher; everything runs on
//! the client's one thread, so a `RefCell` is all the synchronisation needed.
//!
//! Borrows of the registry are never held while Lua code runs: a factory may
//! `require` other modules, which re-enters the registry.

mod loader;
mod types;

use std::cell::RefCell;
use std::rc::Rc;

pub use loader::{execute_factory, load_module, module_id_from_value};
pub use types::*;

/// Handle to the registry injected into every collaborator.
pub type SharedRegistry = Rc<RefCell<ModuleRegistry>>;

pub fn shared() -> SharedRegistry {
  Rc::new(RefCell::new(ModuleRegistry::default()))
}
