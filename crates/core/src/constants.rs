//! Constants used throughout the TOSSE core crate.
//!
//! This module contains storage names, identifier formats and the simulated
//! processing timings so that they stay consistent across the codebase.

use std::time::Duration;

/// Default directory for persisted data when no explicit directory is configured.
pub const DEFAULT_DATA_DIR: &str = "tosse_data";

/// Key of the persisted history blob. The blob is written to `<key>.json` inside the data
/// directory.
pub const HISTORY_KEY: &str = "tosse_history";

/// Prefix of every generated analysis result identifier.
pub const RESULT_ID_PREFIX: &str = "TOSSE";

/// Number of random base-36 characters following the prefix.
pub const RESULT_ID_TOKEN_LEN: usize = 7;

/// Simulated duration of each processing stage, in order.
pub const DEFAULT_STAGE_DELAYS: [Duration; 3] = [
    Duration::from_millis(1200),
    Duration::from_millis(1500),
    Duration::from_millis(1000),
];

/// Probability threshold (percent) above which a condition is considered dominant.
pub const DOMINANT_THRESHOLD: f64 = 50.0;

/// Width of the dashed separator between exported records.
pub const EXPORT_SEPARATOR_WIDTH: usize = 40;
