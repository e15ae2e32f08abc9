//! Codex `app-server`: JSON-RPC over stdio, one process per chat.

mod parser;
mod spawn;
mod types;

pub use parser::{CodexLine, CodexParser};
pub use spawn::{approval_policy, CodexConfig};
pub use types::{
    approval_decision, initialize_params, thread_resume_params, thread_start_params,
    turn_interrupt_params, turn_start_params, CodexItem, ServerMessage, ThreadResult, TurnResult,
};
