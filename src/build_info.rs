//! Build information captured at compile time.

/// Package version from Cargo.toml.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Short git commit hash (7 chars).
pub const BUILD_HASH: &str = env!("BUILD_HASH");

/// Version with commit hash, `*` marking a dirty build.
///
/// Format: `0.1.0 (abc1234)` or `0.1.0 (abc1234*)`.
pub const LONG_VERSION: &str = concat!(
    env!("CARGO_PKG_VERSION"),
    " (",
    env!("BUILD_HASH"),
    env!("BUILD_DIRTY_MARK"),
    ")"
);

/// Whether the build was from a dirty working directory.
#[must_use]
pub fn is_dirty() -> bool {
    env!("BUILD_DIRTY_MARK") == "*"
}
