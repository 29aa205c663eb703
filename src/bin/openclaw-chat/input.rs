//! Key dispatch for the chat view.

use crate::event_loop::UiState;
use crate::Controller;
use crossterm::event::{KeyCode, KeyEvent, KeyModifiers};
use std::time::Instant;

pub(crate) fn handle_key(key: KeyEvent, ui: &mut UiState, controller: &mut Controller) {
    let control = key.modifiers.contains(KeyModifiers::CONTROL);
    match key.code {
        KeyCode::Esc => ui.should_quit = true,
        KeyCode::Char('c') if control => ui.should_quit = true,
        KeyCode::Char('t') if control => controller.toggle_voice_mode(),
        KeyCode::Char('r') if control => controller.clear_session(Instant::now()),
        KeyCode::Enter => {
            let text = std::mem::take(&mut ui.input);
            controller.send_text(&text, Instant::now());
        }
        KeyCode::Backspace => {
            ui.input.pop();
        }
        KeyCode::Char(ch) if !control => ui.input.push(ch),
        _ => {}
    }
}
