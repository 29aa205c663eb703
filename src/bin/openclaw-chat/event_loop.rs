//! Runtime wiring and the single-threaded event loop that owns all state.

use crate::{input, render, Controller};
use anyhow::{Context, Result};
use crossbeam_channel::unbounded;
use crossterm::event::{Event, KeyEventKind};
use crossterm::terminal::{
    disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen,
};
use openclaw_chat::controller::ControllerConfig;
use openclaw_chat::envprobe::probe_environment;
use openclaw_chat::gateway::{spawn_notification_listener, GatewayClient, ThreadedGateway};
use openclaw_chat::speech::SpeechSystem;
use openclaw_chat::store::TimelineStore;
use openclaw_chat::transcribe::TranscriptionClient;
use openclaw_chat::{AppConfig, ChatController, ControlEvent};
use ratatui::backend::CrosstermBackend;
use ratatui::Terminal;
use std::io::Stdout;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

const INPUT_POLL: Duration = Duration::from_millis(50);

#[derive(Debug, Default)]
pub(crate) struct UiState {
    pub(crate) input: String,
    pub(crate) should_quit: bool,
}

pub(crate) fn run(config: AppConfig) -> Result<()> {
    let (events_tx, events_rx) = unbounded::<ControlEvent>();

    let gateway = Arc::new(
        GatewayClient::new(&config.base_url, &config.token).context("gateway client setup")?,
    );
    let outbound = ThreadedGateway::new(Arc::clone(&gateway), events_tx.clone());
    let transcription =
        TranscriptionClient::new(&config.base_url, &config.token, &config.stt_engine)
            .context("transcription client setup")?;
    let speech = SpeechSystem::new(
        events_tx.clone(),
        transcription,
        config.recognition_ws_url.clone(),
        config.input_device.clone(),
        Duration::from_millis(config.one_shot_cap_ms),
    );

    let shutdown = Arc::new(AtomicBool::new(false));
    let _listener = spawn_notification_listener(
        config.event_bus_url(),
        config.token.clone(),
        events_tx.clone(),
        Arc::clone(&shutdown),
    );

    let controller_config = ControllerConfig {
        session_id: config.session_id.clone(),
        language: config.language.clone(),
        response_timeout: Duration::from_millis(config.response_timeout_ms),
        allow_unreliable_env: config.allow_unreliable_env,
        environment: probe_environment(),
    };
    let mut controller: Controller = ChatController::new(
        outbound,
        speech,
        controller_config,
        Some(TimelineStore::open_default()),
    );
    controller.on_mount();

    let mut terminal = setup_terminal().context("terminal setup")?;
    let result = run_loop(&mut terminal, &mut controller, &events_rx);
    shutdown.store(true, Ordering::Relaxed);
    restore_terminal(&mut terminal);
    result
}

fn run_loop(
    terminal: &mut Terminal<CrosstermBackend<Stdout>>,
    controller: &mut Controller,
    events_rx: &crossbeam_channel::Receiver<ControlEvent>,
) -> Result<()> {
    let mut ui = UiState::default();
    loop {
        while let Ok(event) = events_rx.try_recv() {
            controller.handle_event(event, Instant::now());
        }
        controller.on_tick(Instant::now());

        if crossterm::event::poll(INPUT_POLL)? {
            match crossterm::event::read()? {
                Event::Key(key) if key.kind == KeyEventKind::Press => {
                    input::handle_key(key, &mut ui, controller);
                }
                _ => {}
            }
        }

        terminal.draw(|frame| render::draw(frame, controller, &ui))?;
        if ui.should_quit {
            return Ok(());
        }
    }
}

fn setup_terminal() -> Result<Terminal<CrosstermBackend<Stdout>>> {
    enable_raw_mode()?;
    let mut stdout = std::io::stdout();
    crossterm::execute!(stdout, EnterAlternateScreen)?;
    let terminal = Terminal::new(CrosstermBackend::new(stdout))?;
    Ok(terminal)
}

fn restore_terminal(terminal: &mut Terminal<CrosstermBackend<Stdout>>) {
    // Best-effort: the session is ending either way.
    let _ = disable_raw_mode();
    let _ = crossterm::execute!(terminal.backend_mut(), LeaveAlternateScreen);
    let _ = terminal.show_cursor();
}
