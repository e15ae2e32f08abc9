//! GitHub Copilot CLI over ACP: JSON-RPC 2.0 on stdio, one process per chat.
//!
//! Unlike Codex, every message carries `"jsonrpc":"2.0"`, the handshake
//! negotiates a protocol version, prompts are typed content arrays, and
//! permission answers select one of the options the agent offered.

mod parser;
mod spawn;
mod types;

pub use parser::{CopilotLine, CopilotParser, PendingPermission};
pub use spawn::CopilotConfig;
pub use types::{
    cancel_params, cancelled_outcome, choose_option, initialize_params, load_session_params,
    new_session_params, prompt_params, selected_outcome, InitializeResult, NewSessionResult,
    PermissionOption, PromptResult, SessionUpdate, PROTOCOL_VERSION,
};
