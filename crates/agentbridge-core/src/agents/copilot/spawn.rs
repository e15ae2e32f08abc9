use crate::spawn::SpawnConfig;

/// Command line for `copilot --acp --stdio`.
#[derive(Debug, Clone, Default)]
pub struct CopilotConfig {
    pub binary_path: String,
    pub working_dir: String,
    pub model: Option<String>,
    pub shell_prefix: Option<String>,
}

impl CopilotConfig {
    pub fn build(self) -> SpawnConfig {
        let mut args = vec!["--acp".to_string(), "--stdio".to_string()];
        if let Some(model) = self.model.filter(|m| !m.is_empty()) {
            args.extend(["--model".to_string(), model]);
        }
        SpawnConfig::new(self.binary_path, args)
            .working_dir(self.working_dir)
            .shell_prefix(self.shell_prefix)
    }
}
