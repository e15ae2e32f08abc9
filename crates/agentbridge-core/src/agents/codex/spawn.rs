use crate::spawn::SpawnConfig;

/// Command line for a `codex app-server` process.
#[derive(Debug, Clone, Default)]
pub struct CodexConfig {
    pub binary_path: String,
    pub working_dir: String,
    pub model: Option<String>,
    pub shell_prefix: Option<String>,
}

impl CodexConfig {
    pub fn build(self) -> SpawnConfig {
        let mut args = vec!["app-server".to_string()];
        if let Some(model) = self.model.filter(|m| !m.is_empty()) {
            args.push("-c".to_string());
            args.push(format!("model=\"{model}\""));
        }

        SpawnConfig::new(self.binary_path, args)
            .working_dir(self.working_dir)
            .shell_prefix(self.shell_prefix)
    }
}

/// `thread/start` approval policy for a UI permission mode.
pub fn approval_policy(permission_mode: Option<&str>) -> &'static str {
    match permission_mode {
        Some("bypassPermissions") | Some("yolo") => "never",
        Some("acceptEdits") => "on-request",
        _ => "untrusted",
    }
}
