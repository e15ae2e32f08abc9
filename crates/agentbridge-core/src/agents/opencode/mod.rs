//! OpenCode: an `opencode serve` HTTP server per chat.
//!
//! Nothing useful comes out of the server's stdout. A turn is a single
//! blocking `POST /session/{id}/message` whose response carries every part
//! of the turn, which [`parse_parts`] turns into events.

mod client;
mod parser;
mod spawn;
mod types;

pub use client::OpenCodeClient;
pub use parser::parse_parts;
pub use spawn::{find_available_port, OpenCodeConfig};
pub use types::{ModelRef, Part, PromptResponse, SessionInfo, ToolState};
