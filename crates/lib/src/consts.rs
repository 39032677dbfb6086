//! Crate-wide constants.

/// Application name, used for default directories.
pub const APP_NAME: &str = "brick";

/// Default output directory name, relative to the repository root.
pub const OUT_DIR_NAME: &str = "brick-out";

/// Marker file written inside a complete cache entry.
pub const CACHE_COMPLETE_MARKER: &str = ".brick-complete";

/// Cache marker format version.
pub const CACHE_MARKER_VERSION: u32 = 1;

/// Bumped whenever the fingerprint input format changes.
pub const FINGERPRINT_VERSION: u32 = 1;

/// Profile key used when a target has no command for the active profile.
pub const DEFAULT_PROFILE_KEY: &str = "default";

/// Default build profile.
pub const DEFAULT_PROFILE: &str = "opt";

/// Default per-action timeout in seconds.
pub const DEFAULT_ACTION_TIMEOUT_SECS: u64 = 600;

/// Default capacity of the observer event channel.
pub const DEFAULT_EVENT_BUFFER: usize = 1024;

/// Visibility pattern granting access to every package.
pub const VISIBILITY_PUBLIC: &str = "PUBLIC";

/// `SOURCE_DATE_EPOCH` given to every action (1980-01-01, the ZIP epoch).
pub const SOURCE_DATE_EPOCH: &str = "315532800";
