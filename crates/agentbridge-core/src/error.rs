//! Error types shared by the transport, the adapters and the dispatcher.
//!
//! Every failure is scoped to a single chat. Nothing here is fatal to the
//! process; callers surface these as failed actions in the UI.

use thiserror::Error;

use crate::agents::AgentKind;

/// Failures of the process-level primitives (spawn, stdin, subscription).
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Failed to spawn `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid command line: {0}")]
    InvalidCommand(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Unknown process: {0}")]
    UnknownProcess(String),

    #[error("Process {0} has no open stdin")]
    StdinClosed(String),
}

/// Errors returned by [`AgentService`](crate::managers::AgentService) operations.
#[derive(Debug, Error)]
pub enum AgentError {
    /// The agent CLI is missing. `instructions` is a multi-line, user-facing
    /// explanation of how to install it.
    #[error("{instructions}")]
    ToolNotInstalled {
        agent: AgentKind,
        instructions: String,
    },

    /// The remote answered with a payload we could not make sense of.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// A JSON-RPC request came back with an `error` member (or was
    /// force-rejected because the process went away).
    #[error("`{method}` failed: {message}")]
    RequestRejected { method: String, message: String },

    #[error("Timed out waiting for `{0}`")]
    Timeout(String),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("HTTP error: {0}")]
    Http(String),

    #[error("No active session for chat {0}")]
    NoSession(String),

    #[error("Chat {0} is not bound to an agent")]
    UnknownChat(String),
}

impl AgentError {
    pub(crate) fn rejected(method: &str, message: impl Into<String>) -> Self {
        AgentError::RequestRejected {
            method: method.to_string(),
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tool_not_installed_displays_instructions_verbatim() {
        let err = AgentError::ToolNotInstalled {
            agent: AgentKind::Codex,
            instructions: "line one\nline two".to_string(),
        };
        assert_eq!(err.to_string(), "line one\nline two");
    }

    #[test]
    fn rejected_includes_method_and_message() {
        let err = AgentError::rejected("thread/start", "bad cwd");
        assert_eq!(err.to_string(), "`thread/start` failed: bad cwd");
    }

    #[test]
    fn transport_error_converts() {
        let err: AgentError = TransportError::UnknownProcess("p-1".to_string()).into();
        assert!(matches!(err, AgentError::Transport(_)));
        assert!(err.to_string().contains("p-1"));
    }
}
