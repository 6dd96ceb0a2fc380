//! Stable exit codes for `buildloop` commands.

/// Command succeeded; for `execute`, the build was approved and complete.
pub const OK: i32 = 0;
/// Invalid config, missing build instructions or any other startup error.
pub const INVALID: i32 = 1;
/// `execute` used its whole iteration budget without completing.
pub const EXHAUSTED: i32 = 2;
