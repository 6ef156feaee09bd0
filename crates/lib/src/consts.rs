//! Well-known names shared by the server, the build pipeline and clients.

use std::time::Duration;

/// Suffix of the change manifest, addressed by the last applied build id.
pub const MANIFEST_SUFFIX: &str = "update-manifest.json";

/// Suffix of an update unit, addressed by unit id and the new build id.
pub const UNIT_SUFFIX: &str = "update-unit.js";

/// Global function every update unit calls to hand over its module factories.
pub const UNIT_ENTRY_POINT: &str = "onUpdateUnitLoaded";

/// Global function the initial bundle calls to define its module factories.
pub const BUNDLE_ENTRY_POINT: &str = "registerModules";

/// Default path of the notification socket.
pub const DEFAULT_SOCKET_PATH: &str = "/hmr";

/// Path the build pipeline posts build reports to.
pub const BUILD_HOOK_PATH: &str = "/__hotpatch/build";

/// Default bound on a single manifest or unit fetch.
pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(10);
