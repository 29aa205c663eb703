//! openclaw-chat entrypoint: terminal chat for the OpenClaw gateway with
//! voice input.

mod event_loop;
mod input;
mod render;
mod status_messages;

use clap::Parser;
use openclaw_chat::gateway::ThreadedGateway;
use openclaw_chat::speech::SpeechSystem;
use openclaw_chat::{AppConfig, ChatController};
use std::process::ExitCode;

pub(crate) type Controller = ChatController<ThreadedGateway, SpeechSystem>;

fn main() -> ExitCode {
    let config = match AppConfig::parse().resolve() {
        Ok(config) => config,
        Err(err) => {
            eprintln!("openclaw-chat: {err:#}");
            return ExitCode::FAILURE;
        }
    };
    if let Err(err) = openclaw_chat::init_logging() {
        eprintln!("openclaw-chat: {err:#}");
        return ExitCode::FAILURE;
    }
    tracing::info!(
        "openclaw-chat {} starting (session '{}')",
        env!("CARGO_PKG_VERSION"),
        config.session_id
    );

    match event_loop::run(config) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!(
                "{}",
                status_messages::with_log_path(&format!("openclaw-chat failed: {err:#}"))
            );
            ExitCode::FAILURE
        }
    }
}
