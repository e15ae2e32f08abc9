use crate::spawn::SpawnConfig;

/// Command line for one Claude conversation process.
#[derive(Debug, Clone, Default)]
pub struct ClaudeConfig {
    pub binary_path: String,
    pub working_dir: String,
    pub session_id: Option<String>,
    pub model: Option<String>,
    pub permission_mode: Option<String>,
    pub shell_prefix: Option<String>,
}

impl ClaudeConfig {
    pub fn build(self) -> SpawnConfig {
        let mut args: Vec<String> = [
            "--output-format",
            "stream-json",
            "--input-format",
            "stream-json",
            "--verbose",
            "--permission-prompt-tool",
            "stdio",
            "--permission-mode",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();
        args.push(
            self.permission_mode
                .filter(|m| !m.is_empty())
                .unwrap_or_else(|| "default".to_string()),
        );

        if let Some(model) = self.model.filter(|m| !m.is_empty()) {
            args.extend(["--model".to_string(), model]);
        }
        if let Some(id) = self.session_id {
            args.extend(["--resume".to_string(), id]);
        }

        SpawnConfig::new(self.binary_path, args)
            .working_dir(self.working_dir)
            .shell_prefix(self.shell_prefix)
    }
}
