//! Output formatters

pub mod terminal;

use crate::app::OutputFormat;
use anyhow::Result;
use serde::Serialize;

/// Render a serializable value in a machine-readable format.
///
/// Returns `None` for [`OutputFormat::Cli`], which each command renders
/// itself.
pub fn structured<T: Serialize>(value: &T, format: OutputFormat) -> Result<Option<String>> {
    let rendered = match format {
        OutputFormat::Json => serde_json::to_string_pretty(value)?,
        OutputFormat::Yaml => serde_yaml::to_string(value)?,
        OutputFormat::Cli => return Ok(None),
    };
    Ok(Some(rendered))
}
