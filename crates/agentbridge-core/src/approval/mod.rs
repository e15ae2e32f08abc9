//! Client-side auto-approval.
//!
//! Shell tool calls are reduced to command prefixes
//! ([`parse_command_prefixes`]). A call is answered without asking the user
//! when its tool is trusted in the project, or when each prefix is either
//! trusted or read-only (`git status`, `gh pr view`, ...).
//!
//! Grants are per project. With a storage directory they survive restarts
//! as `<dir>/<project>.approvals.json`.

mod commands;
mod context;
mod prefixes;

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Mutex;

pub use commands::is_safe_prefix;
pub use context::ApprovalContext;
pub use prefixes::parse_command_prefixes;

use crate::agents::event::AgentEvent;
use crate::persistence::{write_json_atomic, PersistenceError};
use crate::sync::lock;

#[derive(Debug, Default)]
pub struct ProjectApprovals {
    dir: Option<PathBuf>,
    projects: Mutex<HashMap<String, ApprovalContext>>,
}

impl ProjectApprovals {
    pub fn in_memory() -> Self {
        Self::default()
    }

    pub fn persistent(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: Some(dir.into()),
            projects: Mutex::default(),
        }
    }

    fn file_for(&self, project: &str) -> Option<PathBuf> {
        let name: String = project
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
            .collect();
        self.dir
            .as_ref()
            .map(|dir| dir.join(format!("{name}.approvals.json")))
    }

    fn load(&self, project: &str) -> ApprovalContext {
        let Some(path) = self.file_for(project) else {
            return ApprovalContext::default();
        };
        match std::fs::read_to_string(&path) {
            Ok(text) => serde_json::from_str(&text).unwrap_or_else(|err| {
                log::warn!("ignoring unreadable approvals {}: {err}", path.display());
                ApprovalContext::default()
            }),
            Err(_) => ApprovalContext::default(),
        }
    }

    /// Snapshot of a project's grants; loaded from disk on first use.
    pub fn context(&self, project: &str) -> ApprovalContext {
        let mut projects = lock(&self.projects);
        projects
            .entry(project.to_string())
            .or_insert_with(|| self.load(project))
            .clone()
    }

    fn update<F>(&self, project: &str, change: F) -> Result<(), PersistenceError>
    where
        F: FnOnce(&mut ApprovalContext) -> bool,
    {
        let snapshot = {
            let mut projects = lock(&self.projects);
            let ctx = projects
                .entry(project.to_string())
                .or_insert_with(|| self.load(project));
            if !change(ctx) {
                return Ok(());
            }
            ctx.clone()
        };
        match self.file_for(project) {
            Some(path) => write_json_atomic(&path, &snapshot),
            None => Ok(()),
        }
    }

    pub fn allow_tool(&self, project: &str, tool_name: &str) -> Result<(), PersistenceError> {
        self.update(project, |ctx| ctx.allow_tool(tool_name))
    }

    pub fn allow_prefixes(&self, project: &str, prefixes: &[String]) -> Result<(), PersistenceError> {
        self.update(project, |ctx| ctx.allow_prefixes(prefixes.iter().cloned()))
    }

    pub fn revoke_tool(&self, project: &str, tool_name: &str) -> Result<(), PersistenceError> {
        self.update(project, |ctx| ctx.revoke_tool(tool_name))
    }

    pub fn revoke_prefix(&self, project: &str, prefix: &str) -> Result<(), PersistenceError> {
        self.update(project, |ctx| ctx.revoke_prefix(prefix))
    }

    /// Decide a `toolApproval` event. Without a project only read-only
    /// commands pass. Anything other than a tool approval never passes.
    pub fn should_auto_approve(&self, project: Option<&str>, event: &AgentEvent) -> bool {
        let AgentEvent::ToolApproval {
            name,
            command_prefixes,
            ..
        } = event
        else {
            return false;
        };
        let ctx = match project {
            Some(project) => self.context(project),
            None => ApprovalContext::default(),
        };
        ctx.should_auto_approve(name, command_prefixes.as_deref())
    }
}
