//! Update manifests and the asset paths of the update protocol.
//!
//! A manifest is the small descriptor a build pipeline writes next to its output,
//! naming the build it leads to and the code units that changed on the way.

mod types;

pub use types::*;
