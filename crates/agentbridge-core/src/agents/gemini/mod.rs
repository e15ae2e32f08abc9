//! Gemini CLI: one `gemini -p` process per turn, NDJSON on stdout.
//!
//! There is no request/response correlation and no approval channel. Session
//! continuity comes from passing `--resume <id>` to the next turn's process.

mod breaker;
mod parser;
mod spawn;
mod types;

pub use breaker::{breaker_message, is_rate_limit, RateLimitBreaker, Verdict, RATE_LIMIT_THRESHOLD};
pub use parser::{normalize_tool_name, GeminiChunk, GeminiParser};
pub use spawn::{approval_mode, GeminiConfig};
pub use types::{ErrorDetail, GeminiEvent};
