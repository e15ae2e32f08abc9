use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use super::commands::is_safe_prefix;

/// What the user marked "always allow" in one project.
///
/// Serialized as `{"toolNames": [...], "commandPrefixes": [...]}`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ApprovalContext {
    pub tool_names: BTreeSet<String>,
    pub command_prefixes: BTreeSet<String>,
}

impl ApprovalContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// A tool call passes when its tool is trusted outright, or when it is a
    /// shell call whose every prefix is trusted or read-only. A shell call
    /// with no parseable prefix never passes on prefixes alone.
    pub fn should_auto_approve(&self, tool_name: &str, prefixes: Option<&[String]>) -> bool {
        if self.tool_names.contains(tool_name) {
            return true;
        }
        match prefixes {
            Some(prefixes) if !prefixes.is_empty() => prefixes
                .iter()
                .all(|p| is_safe_prefix(p) || self.command_prefixes.contains(p)),
            _ => false,
        }
    }

    pub fn allow_tool(&mut self, tool_name: impl Into<String>) -> bool {
        self.tool_names.insert(tool_name.into())
    }

    pub fn allow_prefixes<I, S>(&mut self, prefixes: I) -> bool
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut changed = false;
        for prefix in prefixes {
            changed |= self.command_prefixes.insert(prefix.into());
        }
        changed
    }

    pub fn revoke_tool(&mut self, tool_name: &str) -> bool {
        self.tool_names.remove(tool_name)
    }

    pub fn revoke_prefix(&mut self, prefix: &str) -> bool {
        self.command_prefixes.remove(prefix)
    }

    pub fn is_empty(&self) -> bool {
        self.tool_names.is_empty() && self.command_prefixes.is_empty()
    }
}
