//! Wire types of the `opencode serve` HTTP API.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One element of a message's `parts` array.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum Part {
    Text {
        #[serde(default)]
        text: String,
        /// Parts the server injected itself, e.g. file attachments.
        #[serde(default)]
        synthetic: bool,
    },
    Reasoning {
        #[serde(default)]
        text: String,
    },
    /// Current servers: the tool name is a string and I/O sits in `state`.
    Tool {
        tool: String,
        #[serde(default, rename = "callID")]
        call_id: Option<String>,
        #[serde(default)]
        state: ToolState,
    },
    /// Older servers nest everything under `tool`.
    ToolInvocation { tool: ToolInvocation },
    StepStart,
    StepFinish,
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ToolState {
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub input: Value,
    #[serde(default)]
    pub output: Option<Value>,
    #[serde(default)]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ToolInvocation {
    pub name: String,
    #[serde(default)]
    pub input: Value,
    #[serde(default)]
    pub output: Option<Value>,
}

/// Body of `POST /session/{id}/message`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PromptResponse {
    #[serde(default)]
    pub info: Value,
    /// Kept raw so one unknown part shape cannot fail the whole turn.
    #[serde(default)]
    pub parts: Vec<Value>,
}

impl PromptResponse {
    /// `info.error` as a readable line, if the turn failed server-side.
    pub fn error_message(&self) -> Option<String> {
        let error = self.info.get("error").filter(|e| !e.is_null())?;
        let message = error
            .pointer("/data/message")
            .and_then(Value::as_str)
            .or_else(|| error.get("message").and_then(Value::as_str))
            .or_else(|| error.get("name").and_then(Value::as_str))
            .unwrap_or("unknown error");
        Some(message.to_string())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SessionInfo {
    pub id: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Health {
    #[serde(default)]
    pub healthy: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ModelRef {
    #[serde(rename = "providerID")]
    pub provider_id: String,
    #[serde(rename = "modelID")]
    pub model_id: String,
}

impl ModelRef {
    /// `provider/model`; a bare name without a provider is not addressable.
    pub fn parse(model: &str) -> Option<Self> {
        let (provider, model) = model.split_once('/')?;
        if provider.is_empty() || model.is_empty() {
            return None;
        }
        Some(Self {
            provider_id: provider.to_string(),
            model_id: model.to_string(),
        })
    }
}
