//! Type-directed projection of polymorphic RESULT payloads.
//!
//! RESULT objects are not tagged; their variant is recognised by field
//! presence. Predicates run in [`ResultShape::MATCH_ORDER`] and the first match
//! wins, so a payload satisfying several shapes always resolves the same way.

use serde_json::{Map, Value};

use crate::event::{Metadata, ResultContent};

/// Canonical `(content_type, flat_content, metadata)` triple for a RESULT.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedResult {
    pub content_type: String,
    pub flat_content: String,
    pub metadata: Metadata,
}

/// Structured RESULT variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultShape {
    TokenStat,
    Summary,
    IndexBuildStart,
    IndexBuildEnd,
    CommandPrepareStat,
    CommandExecuteStat,
    ContextUsed,
}

const TOKEN_STAT_FIELDS: &[&str] = &[
    "model_name",
    "elapsed_time",
    "first_token_time",
    "input_tokens",
    "output_tokens",
    "input_cost",
    "output_cost",
    "speed",
];

const INDEX_BUILD_END_FIELDS: &[&str] = &[
    "updated_files",
    "removed_files",
    "input_tokens",
    "output_tokens",
    "input_cost",
    "output_cost",
];

impl ResultShape {
    /// Tie-break order; must stay stable.
    pub const MATCH_ORDER: [Self; 7] = [
        Self::TokenStat,
        Self::Summary,
        Self::IndexBuildStart,
        Self::IndexBuildEnd,
        Self::CommandPrepareStat,
        Self::CommandExecuteStat,
        Self::ContextUsed,
    ];

    /// Content type reported for messages of this shape.
    pub fn tag(&self) -> &'static str {
        match self {
            Self::TokenStat => "token_stat",
            Self::Summary => "summary",
            Self::IndexBuildStart => "index_build_start",
            Self::IndexBuildEnd => "index_build_end",
            Self::CommandPrepareStat => "command_prepare_stat",
            Self::CommandExecuteStat => "command_execute_stat",
            Self::ContextUsed => "context_used",
        }
    }

    pub fn matches(&self, object: &Map<String, Value>) -> bool {
        match self {
            Self::TokenStat => {
                is_string(object, "model_name")
                    && is_number(object, "elapsed_time")
                    && is_number(object, "input_tokens")
                    && is_number(object, "output_tokens")
            }
            Self::Summary => is_string(object, "summary"),
            Self::IndexBuildStart => {
                is_number(object, "file_number") && is_number(object, "total_files")
            }
            Self::IndexBuildEnd => {
                is_number(object, "updated_files")
                    && is_number(object, "removed_files")
                    && is_number(object, "input_tokens")
                    && is_number(object, "output_tokens")
            }
            // Producers send `parameters: null` for argument-less commands.
            Self::CommandPrepareStat => {
                is_string(object, "command")
                    && matches!(
                        object.get("parameters"),
                        Some(Value::Object(_) | Value::Array(_) | Value::Null)
                    )
            }
            Self::CommandExecuteStat => is_string(object, "command") && is_string(object, "content"),
            Self::ContextUsed => {
                matches!(object.get("files"), Some(Value::Array(_)))
                    && is_string(object, "title")
                    && is_string(object, "description")
            }
        }
    }

    /// First shape in [`Self::MATCH_ORDER`] that accepts `object`.
    pub fn detect(object: &Map<String, Value>) -> Option<Self> {
        Self::MATCH_ORDER
            .into_iter()
            .find(|shape| shape.matches(object))
    }

    fn project(&self, object: &Map<String, Value>, metadata: &mut Metadata) -> String {
        match self {
            Self::TokenStat => {
                overlay_fields(metadata, object, TOKEN_STAT_FIELDS);
                Value::Object(object.clone()).to_string()
            }
            Self::Summary => string_field(object, "summary"),
            Self::IndexBuildStart => {
                overlay_fields(metadata, object, &["file_number", "total_files"]);
                format!(
                    "Processing files: {}/{}",
                    number_text(&object["file_number"]),
                    number_text(&object["total_files"])
                )
            }
            Self::IndexBuildEnd => {
                overlay_fields(metadata, object, INDEX_BUILD_END_FIELDS);
                format!(
                    "Index build completed: Updated {} files, Removed {} files",
                    number_text(&object["updated_files"]),
                    number_text(&object["removed_files"])
                )
            }
            Self::CommandPrepareStat => {
                overlay_fields(metadata, object, &["command", "parameters"]);
                format!("Command: {}", string_field(object, "command"))
            }
            Self::CommandExecuteStat => {
                overlay_fields(metadata, object, &["command"]);
                string_field(object, "content")
            }
            Self::ContextUsed => {
                overlay_fields(metadata, object, &["files"]);
                string_field(object, "description")
            }
        }
    }
}

/// Project a RESULT payload into its canonical triple.
///
/// Metadata starts from the result's own metadata, overlaid with the
/// envelope metadata, then with any variant-specific fields.
pub fn normalize_result(result: &ResultContent, event_metadata: Option<&Metadata>) -> NormalizedResult {
    let mut metadata = result.metadata.clone().unwrap_or_default();
    if let Some(event_metadata) = event_metadata {
        for (key, value) in event_metadata {
            metadata.insert(key.clone(), value.clone());
        }
    }

    let shaped = match &result.content {
        Value::String(text) => {
            return NormalizedResult {
                content_type: result.content_type.clone(),
                flat_content: text.clone(),
                metadata,
            }
        }
        Value::Object(object) => ResultShape::detect(object).map(|shape| (shape, object)),
        _ => None,
    };

    match shaped {
        Some((shape, object)) => {
            let flat_content = shape.project(object, &mut metadata);
            NormalizedResult {
                content_type: shape.tag().to_owned(),
                flat_content,
                metadata,
            }
        }
        None => NormalizedResult {
            content_type: result.content_type.clone(),
            flat_content: result.content.to_string(),
            metadata,
        },
    }
}

fn is_string(object: &Map<String, Value>, key: &str) -> bool {
    matches!(object.get(key), Some(Value::String(_)))
}

fn is_number(object: &Map<String, Value>, key: &str) -> bool {
    matches!(object.get(key), Some(Value::Number(_)))
}

fn string_field(object: &Map<String, Value>, key: &str) -> String {
    object
        .get(key)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_owned()
}

// Absent source fields clear stale keys rather than leaving them behind.
fn overlay_fields(metadata: &mut Metadata, object: &Map<String, Value>, keys: &[&str]) {
    for key in keys {
        match object.get(*key) {
            Some(value) => {
                metadata.insert((*key).to_owned(), value.clone());
            }
            None => {
                metadata.remove(*key);
            }
        }
    }
}

/// Render a JSON number the way the producer prints it (`3`, not `3.0`).
fn number_text(value: &Value) -> String {
    let Value::Number(number) = value else {
        return value.to_string();
    };

    if let Some(int) = number.as_i64() {
        return int.to_string();
    }
    if let Some(int) = number.as_u64() {
        return int.to_string();
    }
    match number.as_f64() {
        Some(float) if float.fract() == 0.0 && float.abs() < 1e21 => format!("{float:.0}"),
        Some(float) => float.to_string(),
        None => number.to_string(),
    }
}
