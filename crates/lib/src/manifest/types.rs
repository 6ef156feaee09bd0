//! Manifest types for hotpatch.
//!
//! # Format
//!
//! The manifest is fetched from `<lastAppliedBuildId>.update-manifest.json` and
//! keeps the compact field names the build pipeline emits:
//!
//! ```json
//! { "h": "def456", "c": { "main": true, "vendor": false } }
//! ```
//!
//! `h` is the build the manifest leads to. The keys of `c` whose value is `true`
//! are the changed code units. An empty `c` is still a valid manifest: it
//! acknowledges a build that changed no code.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::consts::{MANIFEST_SUFFIX, UNIT_SUFFIX};
use crate::types::{BuildId, UnitId};

/// Delta between the client's applied build and a newer one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateManifest {
  /// The build this manifest leads to.
  #[serde(rename = "h")]
  pub build: BuildId,

  /// Code units touched by the build, keyed by unit id.
  #[serde(rename = "c", default)]
  pub changed: BTreeMap<UnitId, bool>,
}

impl UpdateManifest {
  /// Create a manifest marking every given unit as changed.
  pub fn new(build: BuildId, units: impl IntoIterator<Item = UnitId>) -> Self {
    Self {
      build,
      changed: units.into_iter().map(|unit| (unit, true)).collect(),
    }
  }

  /// Parse a manifest from its JSON payload.
  pub fn from_json(payload: &str) -> Result<Self, serde_json::Error> {
    serde_json::from_str(payload)
  }

  pub fn to_json(&self) -> Result<String, serde_json::Error> {
    serde_json::to_string(self)
  }

  /// Units flagged as changed, in id order.
  pub fn changed_units(&self) -> impl Iterator<Item = &UnitId> {
    self.changed.iter().filter(|(_, changed)| **changed).map(|(unit, _)| unit)
  }

  pub fn is_empty(&self) -> bool {
    self.changed_units().next().is_none()
  }
}

/// Path of the manifest describing the build that follows `baseline`.
pub fn manifest_path(baseline: &BuildId) -> String {
  format!("{}.{}", baseline, MANIFEST_SUFFIX)
}

/// Path of the payload of `unit` as produced by `build`.
pub fn unit_path(unit: &UnitId, build: &BuildId) -> String {
  format!("{}.{}.{}", unit, build, UNIT_SUFFIX)
}
