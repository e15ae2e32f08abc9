use crate::spawn::SpawnConfig;

/// Command line for one Gemini turn. The process exits when the turn ends.
#[derive(Debug, Clone, Default)]
pub struct GeminiConfig {
    pub binary_path: String,
    pub working_dir: String,
    pub prompt: String,
    pub session_id: Option<String>,
    pub model: Option<String>,
    /// `--approval-mode`; there is no interactive approval channel, so
    /// this falls back to `yolo`.
    pub approval_mode: Option<String>,
    pub shell_prefix: Option<String>,
}

impl GeminiConfig {
    pub fn build(self) -> SpawnConfig {
        let mode = self
            .approval_mode
            .filter(|m| !m.is_empty())
            .unwrap_or_else(|| "yolo".to_string());
        let mut args = vec![
            "-p".to_string(),
            self.prompt,
            "--output-format".to_string(),
            "stream-json".to_string(),
            "--approval-mode".to_string(),
            mode,
        ];
        if let Some(model) = self.model.filter(|m| !m.is_empty()) {
            args.extend(["-m".to_string(), model]);
        }
        if let Some(session_id) = self.session_id.filter(|s| !s.is_empty()) {
            args.extend(["--resume".to_string(), session_id]);
        }

        SpawnConfig::new(self.binary_path, args)
            .working_dir(self.working_dir)
            .shell_prefix(self.shell_prefix)
            .no_stdin()
    }
}

/// `--approval-mode` for a UI permission mode.
pub fn approval_mode(permission_mode: Option<&str>) -> String {
    match permission_mode {
        None | Some("") | Some("bypassPermissions") | Some("yolo") => "yolo".to_string(),
        Some("acceptEdits") => "auto_edit".to_string(),
        Some(other) => other.to_string(),
    }
}
