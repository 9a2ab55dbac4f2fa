//! Core runtime configuration.
//!
//! This module defines configuration that should be resolved once at process startup and then
//! passed into core services. Environment variables are read by the binaries only; the helpers
//! here take the raw values so they can be tested without touching process state.

use crate::constants::{DEFAULT_STAGE_DELAYS, HISTORY_KEY};
use crate::{TriageError, TriageResult};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Core configuration resolved at startup.
#[derive(Clone, Debug)]
pub struct CoreConfig {
    data_dir: PathBuf,
    stage_delays: [Duration; 3],
    max_history: Option<usize>,
}

impl CoreConfig {
    /// Create a new `CoreConfig`.
    ///
    /// # Errors
    ///
    /// Returns `TriageError::InvalidInput` if `max_history` is `Some(0)`.
    pub fn new(
        data_dir: PathBuf,
        stage_delays: [Duration; 3],
        max_history: Option<usize>,
    ) -> TriageResult<Self> {
        if max_history == Some(0) {
            return Err(TriageError::InvalidInput(
                "max_history must be at least 1 when set".into(),
            ));
        }

        Ok(Self {
            data_dir,
            stage_delays,
            max_history,
        })
    }

    /// Configuration with default timings and an unbounded history under `data_dir`.
    pub fn with_data_dir(data_dir: PathBuf) -> Self {
        Self {
            data_dir,
            stage_delays: DEFAULT_STAGE_DELAYS,
            max_history: None,
        }
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn history_path(&self) -> PathBuf {
        self.data_dir.join(format!("{}.json", HISTORY_KEY))
    }

    pub fn stage_delays(&self) -> [Duration; 3] {
        self.stage_delays
    }

    pub fn max_history(&self) -> Option<usize> {
        self.max_history
    }
}

/// Parse the history cap from an optional string value.
///
/// `None`, empty or whitespace means unbounded.
pub fn max_history_from_env_value(value: Option<String>) -> TriageResult<Option<usize>> {
    let value = value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty());

    match value {
        None => Ok(None),
        Some(v) => match v.parse::<usize>() {
            Ok(0) | Err(_) => Err(TriageError::InvalidInput(format!(
                "TOSSE_MAX_HISTORY must be a positive integer, got: '{}'",
                v
            ))),
            Ok(n) => Ok(Some(n)),
        },
    }
}

/// Parse the three stage delays (milliseconds, comma-separated) from an optional string value.
///
/// If `value` is `None` or empty/whitespace, returns the default timings.
pub fn stage_delays_from_env_value(value: Option<String>) -> TriageResult<[Duration; 3]> {
    let value = value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty());

    let Some(raw) = value else {
        return Ok(DEFAULT_STAGE_DELAYS);
    };

    let parsed = raw
        .split(',')
        .map(|part| part.trim().parse::<u64>().map(Duration::from_millis))
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| {
            TriageError::InvalidInput(format!("invalid stage delay in '{}': {}", raw, e))
        })?;

    <[Duration; 3]>::try_from(parsed).map_err(|got| {
        TriageError::InvalidInput(format!(
            "TOSSE_STAGE_DELAYS_MS needs exactly 3 values, got {}",
            got.len()
        ))
    })
}
