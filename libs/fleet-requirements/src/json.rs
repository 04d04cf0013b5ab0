//! JSON marshalling of requirements documents.

use std::io::{Read, Write};

use serde::Serialize;
use serde::de::DeserializeOwned;
use thiserror::Error;
use tracing::warn;

use crate::model::{AutoScaleStatus, FleetRequirements};

pub type RequirementsResult<T> = Result<T, RequirementsError>;

#[derive(Debug, Error)]
pub enum RequirementsError {
    #[error("invalid requirements JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("requirements I/O failed: {0}")]
    Io(#[from] std::io::Error),
}

pub fn to_json(value: &FleetRequirements) -> RequirementsResult<String> {
    value_to_json(value)
}

pub fn to_json_pretty(value: &FleetRequirements) -> RequirementsResult<String> {
    Ok(serde_json::to_string_pretty(value)?)
}

pub fn auto_scale_status_to_json(value: &AutoScaleStatus) -> RequirementsResult<String> {
    value_to_json(value)
}

/// Write `value` to `out`, indented when `indent` is set.
pub fn write_requirements<W: Write>(
    mut out: W,
    value: &FleetRequirements,
    indent: bool,
) -> RequirementsResult<()> {
    if indent {
        serde_json::to_writer_pretty(&mut out, value)?;
    } else {
        serde_json::to_writer(&mut out, value)?;
    }
    out.flush()?;
    Ok(())
}

pub fn read_requirements<R: Read>(input: R) -> RequirementsResult<FleetRequirements> {
    Ok(serde_json::from_reader(input)?)
}

pub fn read_auto_scale_status<R: Read>(input: R) -> RequirementsResult<AutoScaleStatus> {
    Ok(serde_json::from_reader(input)?)
}

/// Parse a requirements document. Blank input and `{}` mean "no document".
pub fn from_json(json: &str) -> RequirementsResult<Option<FleetRequirements>> {
    value_from_json(json)
}

pub fn auto_scale_status_from_json(json: &str) -> RequirementsResult<Option<AutoScaleStatus>> {
    value_from_json(json)
}

/// Equality of the marshalled forms.
pub fn equal(a: &FleetRequirements, b: &FleetRequirements) -> RequirementsResult<bool> {
    Ok(to_json(a)? == to_json(b)?)
}

fn value_to_json<T: Serialize>(value: &T) -> RequirementsResult<String> {
    serde_json::to_string(value).map_err(|err| {
        warn!(error = %err, "failed to marshal to JSON");
        err.into()
    })
}

fn value_from_json<T: DeserializeOwned>(json: &str) -> RequirementsResult<Option<T>> {
    let trimmed = json.trim();
    if trimmed.is_empty() || trimmed == "{}" {
        return Ok(None);
    }
    Ok(Some(serde_json::from_str(trimmed)?))
}
