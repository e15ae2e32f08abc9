//! Claude Code CLI: NDJSON in both directions over one long-lived process.
//!
//! Output is `--output-format stream-json`; user turns and permission
//! answers go back on stdin as `--input-format stream-json` envelopes.

mod parser;
mod spawn;
mod types;

pub use parser::ClaudeParser;
pub use spawn::ClaudeConfig;
pub use types::{
    interrupt_request, permission_allow, permission_deny, user_message, ClaudeMessage,
    ContentBlock, ControlRequest,
};
