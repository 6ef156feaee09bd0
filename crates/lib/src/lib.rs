//! hotpatch-lib: Hot module replacement between a build daemon and live clients
//!
//! This crate provides both halves of the update channel:
//! - `channel` / `signal`: the server side, which announces each completed build
//!   to every connected client
//! - `client`: the update fetcher state machine that pulls the change manifest and
//!   the changed code units for a new build
//! - `registry` / `patch`: the live module graph and the surgery that swaps updated
//!   module records in place
//! - `lua`: the script runtime module factories execute in, including the
//!   `module.hot` acceptance API

pub mod channel;
pub mod client;
pub mod config;
pub mod consts;
pub mod fetch;
pub mod lua;
pub mod manifest;
pub mod patch;
pub mod registry;
pub mod signal;
pub mod types;
