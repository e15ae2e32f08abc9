//! Blocking client for the `opencode serve` HTTP API.

use std::thread;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde_json::{json, Value};

use crate::error::AgentError;

use super::types::{Health, ModelRef, PromptResponse, SessionInfo};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

pub struct OpenCodeClient {
    base_url: String,
    agent: ureq::Agent,
}

impl OpenCodeClient {
    pub fn new(port: u16) -> Self {
        Self::with_base_url(format!("http://127.0.0.1:{port}"))
    }

    pub fn with_base_url(base_url: impl Into<String>) -> Self {
        // No read timeout: a prompt blocks for the whole turn.
        let agent = ureq::AgentBuilder::new()
            .timeout_connect(CONNECT_TIMEOUT)
            .build();
        Self {
            base_url: base_url.into(),
            agent,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn is_healthy(&self) -> bool {
        self.get::<Health>("/global/health")
            .map(|h| h.healthy)
            .unwrap_or(false)
    }

    /// Poll the health endpoint until it answers or the retries run out.
    /// `keep_waiting` is checked between attempts so a server that already
    /// died is not polled to the end.
    pub fn wait_until_healthy(
        &self,
        retries: u32,
        interval: Duration,
        keep_waiting: impl Fn() -> bool,
    ) -> Result<(), AgentError> {
        for attempt in 0..retries.max(1) {
            if self.is_healthy() {
                log::debug!("opencode at {} healthy after {attempt} retries", self.base_url);
                return Ok(());
            }
            if !keep_waiting() {
                return Err(AgentError::Protocol(format!(
                    "opencode at {} went away before it became healthy",
                    self.base_url
                )));
            }
            thread::sleep(interval);
        }
        Err(AgentError::Timeout(format!("{}/global/health", self.base_url)))
    }

    /// Sessions are created with every permission granted; there is no
    /// approval round-trip for OpenCode.
    pub fn create_session(&self, title: &str) -> Result<String, AgentError> {
        let body = json!({ "title": title, "permission": { "*": "allow" } });
        let session: SessionInfo = self.post("/session", &body)?;
        Ok(session.id)
    }

    pub fn prompt(
        &self,
        session_id: &str,
        text: &str,
        model: Option<&str>,
    ) -> Result<PromptResponse, AgentError> {
        let mut body = json!({ "parts": [{ "type": "text", "text": text }] });
        if let Some(model) = model.and_then(ModelRef::parse) {
            body["model"] = serde_json::to_value(model).unwrap_or(Value::Null);
        }
        self.post(&format!("/session/{session_id}/message"), &body)
    }

    pub fn abort(&self, session_id: &str) -> Result<(), AgentError> {
        self.post::<Value>(&format!("/session/{session_id}/abort"), &json!({}))
            .map(|_| ())
    }

    fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, AgentError> {
        let url = format!("{}{path}", self.base_url);
        let response = self.agent.get(&url).call().map_err(http_error)?;
        response
            .into_json()
            .map_err(|e| AgentError::Protocol(format!("GET {path}: {e}")))
    }

    fn post<T: DeserializeOwned>(&self, path: &str, body: &Value) -> Result<T, AgentError> {
        let url = format!("{}{path}", self.base_url);
        log::debug!("opencode POST {path}");
        let response = self.agent.post(&url).send_json(body).map_err(http_error)?;
        response
            .into_json()
            .map_err(|e| AgentError::Protocol(format!("POST {path}: {e}")))
    }
}

fn http_error(err: ureq::Error) -> AgentError {
    match err {
        ureq::Error::Status(code, response) => {
            let body = response.into_string().unwrap_or_default();
            AgentError::Http(format!("status {code}: {}", body.trim()))
        }
        ureq::Error::Transport(transport) => AgentError::Http(transport.to_string()),
    }
}
