//! Chat view rendering: message log, status line, input box.

use crate::event_loop::UiState;
use crate::Controller;
use openclaw_chat::timeline::{Message, MessageStatus, Role};
use openclaw_chat::ControllerState;
use ratatui::layout::{Constraint, Direction, Layout, Rect};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span};
use ratatui::widgets::{Block, Borders, Paragraph};
use ratatui::Frame;
use unicode_width::{UnicodeWidthChar, UnicodeWidthStr};

const USER_PREFIX: &str = " you ▸ ";
const ASSISTANT_PREFIX: &str = "claw ▸ ";
const THINKING_PLACEHOLDER: &str = "…";

pub(crate) fn draw(frame: &mut Frame, controller: &Controller, ui: &UiState) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Min(1),
            Constraint::Length(1),
            Constraint::Length(3),
        ])
        .split(frame.area());

    draw_messages(frame, chunks[0], controller);
    draw_status(frame, chunks[1], controller);
    draw_input(frame, chunks[2], ui);
}

fn draw_messages(frame: &mut Frame, area: Rect, controller: &Controller) {
    let block = Block::default()
        .borders(Borders::ALL)
        .title(format!(" OpenClaw · {} ", controller.session_id()));
    let inner_width = area.width.saturating_sub(2).max(1) as usize;
    let inner_height = area.height.saturating_sub(2) as usize;

    let mut lines: Vec<Line> = Vec::new();
    for message in controller.messages() {
        lines.extend(message_lines(message, inner_width));
    }
    // Pin the view to the newest messages.
    let skip = lines.len().saturating_sub(inner_height);
    let visible: Vec<Line> = lines.into_iter().skip(skip).collect();

    frame.render_widget(Paragraph::new(visible).block(block), area);
}

fn message_lines(message: &Message, width: usize) -> Vec<Line<'static>> {
    let (prefix, body, style) = match (message.role, message.status) {
        (Role::User, MessageStatus::Pending) => (
            USER_PREFIX,
            message.content.clone(),
            Style::default().fg(Color::DarkGray),
        ),
        (Role::User, MessageStatus::Error) => (
            USER_PREFIX,
            message.content.clone(),
            Style::default().fg(Color::Red),
        ),
        (Role::User, MessageStatus::Confirmed) => (
            USER_PREFIX,
            message.content.clone(),
            Style::default().fg(Color::Cyan),
        ),
        (Role::Assistant, MessageStatus::Pending) => (
            ASSISTANT_PREFIX,
            THINKING_PLACEHOLDER.to_string(),
            Style::default()
                .fg(Color::DarkGray)
                .add_modifier(Modifier::ITALIC),
        ),
        (Role::Assistant, MessageStatus::Error) => (
            ASSISTANT_PREFIX,
            message.content.clone(),
            Style::default().fg(Color::Red),
        ),
        (Role::Assistant, MessageStatus::Confirmed) => (
            ASSISTANT_PREFIX,
            message.content.clone(),
            Style::default(),
        ),
    };

    let continuation = " ".repeat(prefix.width());
    wrap_display(&body, width.saturating_sub(prefix.width()).max(8))
        .into_iter()
        .enumerate()
        .map(|(i, chunk)| {
            let lead = if i == 0 { prefix.to_string() } else { continuation.clone() };
            Line::from(vec![
                Span::styled(lead, Style::default().fg(Color::DarkGray)),
                Span::styled(chunk, style),
            ])
        })
        .collect()
}

/// Greedy wrap on display width; splits long unbroken words.
fn wrap_display(text: &str, width: usize) -> Vec<String> {
    let width = width.max(1);
    let mut lines = Vec::new();
    let mut current = String::new();
    let mut current_width = 0usize;
    for word in text.split_whitespace() {
        let word_width = word.width();
        if current_width > 0 && current_width + 1 + word_width > width {
            lines.push(std::mem::take(&mut current));
            current_width = 0;
        }
        if word_width > width {
            // Hard-split an over-long token across lines.
            for ch in word.chars() {
                let ch_width = ch.width().unwrap_or(0);
                if current_width + ch_width > width {
                    lines.push(std::mem::take(&mut current));
                    current_width = 0;
                }
                current.push(ch);
                current_width += ch_width;
            }
            continue;
        }
        if current_width > 0 {
            current.push(' ');
            current_width += 1;
        }
        current.push_str(word);
        current_width += word_width;
    }
    if !current.is_empty() || lines.is_empty() {
        lines.push(current);
    }
    lines
}

fn draw_status(frame: &mut Frame, area: Rect, controller: &Controller) {
    let (label, color) = state_label(controller);
    let mut spans = vec![Span::styled(
        format!(" {label} "),
        Style::default().fg(color).add_modifier(Modifier::BOLD),
    )];
    if let Some(status) = controller.status_line() {
        spans.push(Span::styled(
            status.to_string(),
            Style::default().fg(Color::Yellow),
        ));
    }
    frame.render_widget(Paragraph::new(Line::from(spans)), area);
}

fn state_label(controller: &Controller) -> (&'static str, Color) {
    if controller.voice_blocked().is_some() {
        return ("voice blocked", Color::Red);
    }
    match controller.state() {
        ControllerState::Idle => ("idle", Color::DarkGray),
        ControllerState::AwaitingVoicePermission => ("requesting microphone", Color::Yellow),
        ControllerState::Listening => {
            if controller.wake_word_required() {
                ("listening for wake word", Color::Green)
            } else {
                ("listening", Color::Green)
            }
        }
        ControllerState::Sending => ("thinking", Color::Yellow),
        ControllerState::ErrorDisplay => ("error", Color::Red),
    }
}

fn draw_input(frame: &mut Frame, area: Rect, ui: &UiState) {
    let block = Block::default()
        .borders(Borders::ALL)
        .title(" message · Enter send · ^T voice · ^R clear · Esc quit ");
    let inner_width = area.width.saturating_sub(2).max(1) as usize;
    // Keep the tail of long input visible while typing.
    let mut shown: String = ui.input.clone();
    while shown.width() + 2 > inner_width && !shown.is_empty() {
        shown.remove(0);
    }
    let line = Line::from(vec![
        Span::styled("› ", Style::default().fg(Color::DarkGray)),
        Span::raw(shown),
        Span::styled("█", Style::default().fg(Color::DarkGray)),
    ]);
    frame.render_widget(Paragraph::new(line).block(block), area);
}
