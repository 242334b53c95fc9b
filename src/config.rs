//! Config loading for run defaults.
//!
//! Reads a `RunConfig` from a JSON document (e.g. a `defaults.json` shipped
//! next to the service). Recognized keys override the built-in defaults;
//! unknown keys are ignored so older configs keep working.

use std::path::Path;

use crate::error::TotResult;
use crate::types::RunConfig;

/// Parse a `RunConfig` from a JSON string. Missing keys fall back to
/// defaults; unknown keys are ignored. The result is validated.
pub fn from_json_str(json: &str) -> TotResult<RunConfig> {
    let config: RunConfig = serde_json::from_str(json)?;
    config.validate()?;
    Ok(config)
}

/// Parse a `RunConfig` from an already-decoded JSON value.
pub fn from_json_value(value: serde_json::Value) -> TotResult<RunConfig> {
    let config: RunConfig = serde_json::from_value(value)?;
    config.validate()?;
    Ok(config)
}

/// Load run defaults from a JSON file.
pub fn from_file(path: impl AsRef<Path>) -> TotResult<RunConfig> {
    let raw = std::fs::read_to_string(path)?;
    from_json_str(&raw)
}
