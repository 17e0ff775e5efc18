//! Stable exit codes for the docseed CLI.

/// The preview server ran successfully.
pub const OK: i32 = 0;
/// Invalid configuration, missing API key, or any other error.
pub const INVALID: i32 = 1;
/// A step exhausted its retries or the preview exceeded its restart limit.
pub const EXHAUSTED: i32 = 2;
