use std::fmt::Display;

use serde_json::Value;

use crate::ast::SerializedSql;

const UNKNOWN_ENGINE_ERROR: &str = "Unknown DuckDB error";

#[derive(Debug)]
pub enum EnvelopeError {
    /// Input is not parseable JSON.
    InvalidJson(serde_json::Error),
    /// Top-level value is not a JSON object.
    NotAnObject,
    /// DuckDB itself answered with `"error": true`.
    EngineReported(String),
    /// Well-formed response without any statement.
    NoStatements,
}

impl Display for EnvelopeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EnvelopeError::InvalidJson(err) => write!(f, "Invalid JSON: {}", err),
            EnvelopeError::NotAnObject => write!(f, "Expected a JSON object"),
            EnvelopeError::EngineReported(message) => write!(f, "{}", message),
            EnvelopeError::NoStatements => {
                write!(f, "No statements in serialized SQL response")
            }
        }
    }
}

impl std::error::Error for EnvelopeError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            EnvelopeError::InvalidJson(err) => Some(err),
            _ => None,
        }
    }
}

/// Validates a `json_serialize_sql()` response and narrows it into the typed tree.
///
/// On success the returned root always holds at least one statement.
pub fn parse_serialized_sql(json: &str) -> Result<SerializedSql, EnvelopeError> {
    log::debug!(
        "Parsing serialized sql {}",
        json.chars().take(50).collect::<String>()
    );

    let raw: Value = serde_json::from_str(json).map_err(EnvelopeError::InvalidJson)?;
    if !raw.is_object() {
        return Err(EnvelopeError::NotAnObject);
    }

    let root: SerializedSql = serde_json::from_value(raw).map_err(EnvelopeError::InvalidJson)?;
    if root.error == Some(true) {
        let message = root
            .error_message
            .as_deref()
            .or(root.error_type.as_deref())
            .unwrap_or(UNKNOWN_ENGINE_ERROR);
        log::debug!("DuckDB reported an error: {}", message);
        return Err(EnvelopeError::EngineReported(message.to_owned()));
    }

    if !root.is_success() {
        return Err(EnvelopeError::NoStatements);
    }

    log::debug!("Found {} statement(s)", root.statements.len());
    Ok(root)
}

/// Fixtures wrap the response as `[{"<sql>": <response>}]`. Returns the inner
/// response when the input has that shape, the input unchanged otherwise.
pub fn unwrap_fixture_format(json: &str) -> String {
    if let Ok(Value::Array(items)) = serde_json::from_str::<Value>(json) {
        if let Some(Value::Object(entry)) = items.into_iter().next() {
            if entry.len() == 1 {
                if let Some((sql, payload)) = entry.into_iter().next() {
                    log::debug!("Unwrapped fixture for: {}", sql);
                    return payload.to_string();
                }
            }
        }
    }
    json.to_owned()
}
