//! Lua runtime for module factories.
//!
//! Bundles and update units are Lua scripts. They hand their module factories
//! to the client through well-known globals, and each factory receives a
//! `module` table whose `hot` field is the acceptance API.
//!
//! # Submodules
//!
//! - [`globals`] - `registerModules()` and `onUpdateUnitLoaded()`
//! - [`hot`] - the per-module `module.hot` table
//! - [`runtime`] - the Lua state, the shared registry and the unit inbox

pub mod globals;
pub mod hot;
pub mod runtime;
