use serde::Deserialize;
use serde_json::Value;

/// One line of `gemini --output-format stream-json`.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GeminiEvent {
    Init {
        #[serde(default)]
        session_id: Option<String>,
        #[serde(default)]
        model: Option<String>,
    },
    Message {
        #[serde(default)]
        role: Option<String>,
        #[serde(default)]
        content: String,
        #[serde(default)]
        delta: bool,
    },
    ToolUse {
        tool_name: String,
        #[serde(default)]
        tool_id: Option<String>,
        #[serde(default)]
        parameters: Value,
    },
    ToolResult {
        #[serde(default)]
        tool_id: Option<String>,
        #[serde(default)]
        status: Option<String>,
        #[serde(default)]
        output: Option<String>,
        #[serde(default)]
        error: Option<ErrorDetail>,
    },
    Error {
        #[serde(default)]
        message: Option<String>,
        #[serde(default)]
        severity: Option<String>,
    },
    Result {
        #[serde(default)]
        status: Option<String>,
        #[serde(default)]
        error: Option<ErrorDetail>,
    },
    #[serde(other)]
    Other,
}

/// Errors come either as a bare string or as `{"type":..,"message":..}`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum ErrorDetail {
    Text(String),
    Structured {
        #[serde(default)]
        message: String,
    },
}

impl ErrorDetail {
    pub fn message(&self) -> &str {
        match self {
            ErrorDetail::Text(text) => text,
            ErrorDetail::Structured { message } => message,
        }
    }
}
