//! Exit code policy for pgshift.
//!
//! - `0` = Upgrade (or check) finished, or the operator cancelled at the prompt
//! - `1` = Usage/configuration error, or a fatal step failed
//!
//! A cancelled run is not an error: nothing was touched, so automation
//! should not treat it as a failure.

/// Exit code: success
pub const SUCCESS: i32 = 0;

/// Exit code: operator answered "no" at the confirmation prompt
pub const CANCELLED: i32 = 0;

/// Exit code: bad arguments, missing required parameter, invalid versions
pub const USAGE_ERROR: i32 = 1;

/// Exit code: a fatal external step failed (pg_upgrade, instance start)
pub const FAILURE: i32 = 1;
