//! Data types shared by the chain, the orchestrator and the broadcaster

use indexmap::IndexMap;
use serde::{ser::SerializeMap, Deserialize, Serialize, Serializer};
use serde_json::Value;

/// One spreadsheet record: column name to scalar value, in column order
pub type InputRow = IndexMap<String, Value>;

/// Result fields written after the original columns; same-named columns are shadowed
const RESULT_FIELDS: [&str; 4] = ["email", "valid", "reason", "stageVerdicts"];

/// Verdict of a single stage for a single address
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageVerdict {
    pub valid: bool,
    /// Machine token, set only on failure
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// Suggested correction, when the stage has one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suggestion: Option<String>,
}

impl StageVerdict {
    pub fn pass() -> Self {
        Self {
            valid: true,
            reason: None,
            suggestion: None,
        }
    }

    pub fn fail(reason: impl Into<String>) -> Self {
        Self {
            valid: false,
            reason: Some(reason.into()),
            suggestion: None,
        }
    }

    /// The stage ran but could not determine a verdict
    pub fn execution_failure(stage: &str, error: impl std::fmt::Display) -> Self {
        Self::fail(format!("{stage}:error:{error}"))
    }

    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestion = Some(suggestion.into());
        self
    }
}

/// Input row augmented with the chain's verdict
#[derive(Debug, Clone, PartialEq)]
pub struct RowResult {
    /// Original columns, untouched
    pub fields: InputRow,
    pub email: String,
    pub valid: bool,
    /// First failing stage, absent when valid
    pub reason: Option<String>,
    /// Verdicts of the stages that actually executed, in execution order
    pub stage_verdicts: IndexMap<String, StageVerdict>,
}

impl Serialize for RowResult {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let passthrough = self
            .fields
            .iter()
            .filter(|(column, _)| !RESULT_FIELDS.contains(&column.as_str()));

        let mut map = serializer.serialize_map(None)?;
        for (column, value) in passthrough {
            map.serialize_entry(column, value)?;
        }
        map.serialize_entry("email", &self.email)?;
        map.serialize_entry("valid", &self.valid)?;
        map.serialize_entry("reason", &self.reason)?;
        map.serialize_entry("stageVerdicts", &self.stage_verdicts)?;
        map.end()
    }
}

/// Running totals of a batch; `valid + invalid == total` always holds
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchStats {
    pub total: usize,
    pub valid: usize,
    pub invalid: usize,
}

impl BatchStats {
    pub fn record(&mut self, valid: bool) {
        self.total += 1;
        if valid {
            self.valid += 1;
        } else {
            self.invalid += 1;
        }
    }
}

/// Message delivered to a session subscriber.
///
/// Serializes with a `type` discriminator, e.g.
/// `{"type":"email","email":"a@b.com","valid":false,"reason":"mx"}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase", rename_all_fields = "camelCase")]
pub enum ProgressEvent {
    Connected {
        session_id: String,
    },
    Start {
        total: usize,
    },
    Email {
        email: String,
        valid: bool,
        reason: Option<String>,
    },
    Complete {
        stats: BatchStats,
        output_ref: Option<String>,
    },
    Error {
        message: String,
    },
}

impl ProgressEvent {
    /// Terminal events close the session's channel
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Complete { .. } | Self::Error { .. })
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Connected { .. } => "connected",
            Self::Start { .. } => "start",
            Self::Email { .. } => "email",
            Self::Complete { .. } => "complete",
            Self::Error { .. } => "error",
        }
    }
}

impl From<&RowResult> for ProgressEvent {
    fn from(row: &RowResult) -> Self {
        Self::Email {
            email: row.email.clone(),
            valid: row.valid,
            reason: row.reason.clone(),
        }
    }
}

/// Pull the candidate address out of a row.
///
/// Looks up `column` exactly, then case-insensitively, then falls back to the
/// row's first field. Returns `None` when nothing usable is there.
pub fn extract_address(row: &InputRow, column: &str) -> Option<String> {
    let value = row
        .get(column)
        .or_else(|| {
            row.iter()
                .find(|(name, _)| name.trim().eq_ignore_ascii_case(column))
                .map(|(_, value)| value)
        })
        .or_else(|| row.first().map(|(_, value)| value))?;

    let address = match value {
        Value::String(text) => text.trim().to_string(),
        Value::Number(number) => number.to_string(),
        _ => return None,
    };

    (!address.is_empty()).then_some(address)
}
