use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::mpsc;
use std::sync::Arc;
use std::thread;

use agentbridge_core::{
    AgentContext, AgentDispatcher, AgentError, AgentEvent, AgentKind, AgentService, AgentSettings,
    JsonlEventSink, SendMessageRequest, ToolApprovalDecision,
};
use clap::Parser;

/// Run one turn against a coding agent and print its events as JSON lines
#[derive(Parser, Debug)]
#[command(name = "agentbridge", version, about, long_about = None)]
struct Cli {
    /// Backend to talk to (claude, codex, copilot, gemini, opencode)
    #[arg(short, long)]
    agent: AgentKind,

    /// Working directory of the agent
    #[arg(long, default_value = ".")]
    cwd: PathBuf,

    #[arg(short, long)]
    model: Option<String>,

    #[arg(long)]
    permission_mode: Option<String>,

    /// JSON settings file (binary paths, timeouts)
    #[arg(long)]
    settings: Option<PathBuf>,

    /// Directory for raw wire logs
    #[arg(long)]
    log_dir: Option<String>,

    /// Directory for per-chat event transcripts; resumes the chat's last session
    #[arg(long)]
    transcripts: Option<PathBuf>,

    /// Chat id, used to find the transcript to resume
    #[arg(long, default_value = "cli")]
    chat: String,

    /// Approve every tool request instead of denying it
    #[arg(short, long)]
    yes: bool,

    prompt: String,
}

enum Incoming {
    Event(AgentEvent),
    Done,
    Failed(AgentError),
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    match run(Cli::parse()) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            log::error!("{e}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<(), String> {
    let settings = match &cli.settings {
        Some(path) => AgentSettings::load(path).map_err(|e| format!("{}: {e}", path.display()))?,
        None => AgentSettings::default(),
    };
    let mut ctx = AgentContext::local(settings);
    if let Some(dir) = &cli.transcripts {
        ctx = ctx.with_sink(Arc::new(JsonlEventSink::new(dir.clone())));
    }

    let dispatcher = Arc::new(AgentDispatcher::new(ctx));
    let (tx, rx) = mpsc::channel();
    let events = tx.clone();
    dispatcher.on_event(
        &cli.chat,
        Arc::new(move |event| {
            let _ = events.send(Incoming::Event(event));
        }),
    );
    let done = tx.clone();
    dispatcher.on_done(
        &cli.chat,
        Arc::new(move || {
            let _ = done.send(Incoming::Done);
        }),
    );

    if cli.transcripts.is_some() {
        dispatcher
            .restore_chat(&cli.chat, cli.agent)
            .map_err(|e| e.to_string())?;
    } else {
        dispatcher.bind(&cli.chat, cli.agent);
    }

    let mut request = SendMessageRequest::new(
        cli.chat.clone(),
        cli.prompt.clone(),
        cli.cwd.display().to_string(),
    );
    request.log_dir = cli.log_dir.clone();
    request.model_version = cli.model.clone();
    request.permission_mode = cli.permission_mode.clone();

    // OpenCode answers the whole turn inside send_message.
    let sender = Arc::clone(&dispatcher);
    thread::spawn(move || {
        if let Err(e) = sender.send_message(request) {
            let _ = tx.send(Incoming::Failed(e));
        }
    });

    let outcome = pump(&cli, dispatcher.as_ref(), &rx);
    dispatcher.stop_chat(&cli.chat);
    outcome
}

fn pump(cli: &Cli, dispatcher: &AgentDispatcher, rx: &mpsc::Receiver<Incoming>) -> Result<(), String> {
    for incoming in rx {
        let event = match incoming {
            Incoming::Event(event) => event,
            Incoming::Done => return Ok(()),
            Incoming::Failed(e) => return Err(e.to_string()),
        };
        match serde_json::to_string(&event) {
            Ok(line) => println!("{line}"),
            Err(e) => log::warn!("unprintable event: {e}"),
        }
        match &event {
            AgentEvent::TurnComplete | AgentEvent::Done => return Ok(()),
            AgentEvent::ToolApproval { request_id, .. }
            | AgentEvent::Question { request_id, .. }
            | AgentEvent::PlanApproval { request_id, .. } => {
                let decision = if cli.yes {
                    ToolApprovalDecision::allow(request_id.clone())
                } else {
                    ToolApprovalDecision::deny(request_id.clone())
                };
                dispatcher
                    .send_tool_approval(&cli.chat, decision)
                    .map_err(|e| e.to_string())?;
            }
            _ => {}
        }
    }
    Ok(())
}
