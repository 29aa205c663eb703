//! End-to-end controller flows over recording fakes: optimistic sends,
//! reconciliation, voice lifecycle, and retry/blocking behavior.

use openclaw_chat::backoff::{BlockReason, MAX_CONSECUTIVE_RETRIES};
use openclaw_chat::controller::{CaptureBackend, ControllerConfig, ControllerState, Outbound};
use openclaw_chat::envprobe::EnvironmentTag;
use openclaw_chat::events::ControlEvent;
use openclaw_chat::gateway::{
    ChatSettings, GatewayError, InboundNotification, VoiceProviderSetting,
};
use openclaw_chat::speech::{CaptureMode, SpeechErrorClass, SpeechEvent, SpeechProviderKind};
use openclaw_chat::timeline::{
    MessageStatus, PendingHandle, Role, StoredMessage, RESPONSE_TIMEOUT_MESSAGE,
};
use openclaw_chat::ChatController;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

#[derive(Debug, Clone, PartialEq)]
enum OutboundCall {
    Send {
        message: String,
        session_id: String,
        user: PendingHandle,
        reply: PendingHandle,
    },
    ClearHistory(String),
    FetchHistory(String),
    FetchSettings,
    FetchPipelineLanguages,
}

#[derive(Clone, Default)]
struct RecordingOutbound {
    calls: Arc<Mutex<Vec<OutboundCall>>>,
}

impl RecordingOutbound {
    fn sends(&self) -> Vec<String> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter_map(|call| match call {
                OutboundCall::Send { message, .. } => Some(message.clone()),
                _ => None,
            })
            .collect()
    }

    fn last_send_handles(&self) -> Option<(PendingHandle, PendingHandle)> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .rev()
            .find_map(|call| match call {
                OutboundCall::Send { user, reply, .. } => Some((*user, *reply)),
                _ => None,
            })
    }

    fn count(&self, matcher: impl Fn(&OutboundCall) -> bool) -> usize {
        self.calls.lock().unwrap().iter().filter(|c| matcher(c)).count()
    }
}

impl Outbound for RecordingOutbound {
    fn send_message(
        &self,
        message: String,
        session_id: String,
        user: PendingHandle,
        reply: PendingHandle,
    ) {
        self.calls.lock().unwrap().push(OutboundCall::Send {
            message,
            session_id,
            user,
            reply,
        });
    }

    fn clear_history(&self, session_id: String) {
        self.calls
            .lock()
            .unwrap()
            .push(OutboundCall::ClearHistory(session_id));
    }

    fn fetch_history(&self, session_id: String) {
        self.calls
            .lock()
            .unwrap()
            .push(OutboundCall::FetchHistory(session_id));
    }

    fn fetch_settings(&self) {
        self.calls.lock().unwrap().push(OutboundCall::FetchSettings);
    }

    fn fetch_pipeline_languages(&self) {
        self.calls
            .lock()
            .unwrap()
            .push(OutboundCall::FetchPipelineLanguages);
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum CaptureCall {
    Start(SpeechProviderKind, CaptureMode, String),
    Stop,
}

#[derive(Clone, Default)]
struct FakeCapture {
    calls: Arc<Mutex<Vec<CaptureCall>>>,
}

impl FakeCapture {
    fn starts(&self) -> Vec<CaptureCall> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|call| matches!(call, CaptureCall::Start(..)))
            .cloned()
            .collect()
    }
}

impl CaptureBackend for FakeCapture {
    fn supports(&self, _provider: SpeechProviderKind) -> bool {
        true
    }

    fn start(&mut self, provider: SpeechProviderKind, mode: CaptureMode, language: &str) {
        self.calls
            .lock()
            .unwrap()
            .push(CaptureCall::Start(provider, mode, language.to_string()));
    }

    fn stop(&mut self) {
        self.calls.lock().unwrap().push(CaptureCall::Stop);
    }
}

type TestController = ChatController<RecordingOutbound, FakeCapture>;

const RESPONSE_TIMEOUT: Duration = Duration::from_secs(30);

fn controller() -> (TestController, RecordingOutbound, FakeCapture) {
    let outbound = RecordingOutbound::default();
    let capture = FakeCapture::default();
    let config = ControllerConfig {
        session_id: "default".to_string(),
        language: "en-US".to_string(),
        response_timeout: RESPONSE_TIMEOUT,
        allow_unreliable_env: false,
        environment: EnvironmentTag::Standard,
    };
    let controller = ChatController::new(outbound.clone(), capture.clone(), config, None);
    (controller, outbound, capture)
}

fn wake_settings() -> ChatSettings {
    ChatSettings {
        wake_word_enabled: true,
        wake_word: "hey openclaw".to_string(),
        voice_provider: VoiceProviderSetting::ContinuousRecognition,
        allow_unreliable_env: false,
        voice_language: None,
        language: "en-US".to_string(),
    }
}

fn activate_voice(controller: &mut TestController, settings: ChatSettings, now: Instant) {
    controller.toggle_voice_mode();
    controller.handle_event(
        ControlEvent::SettingsFetched {
            result: Ok(settings),
        },
        now,
    );
    controller.handle_event(ControlEvent::Speech(SpeechEvent::Listening), now);
}

fn notification(message: &str, session_id: &str, timestamp: &str) -> ControlEvent {
    ControlEvent::Notification(InboundNotification {
        message: message.to_string(),
        session_id: session_id.to_string(),
        timestamp: Some(timestamp.to_string()),
    })
}

#[test]
fn empty_input_is_rejected_without_side_effects() {
    let (mut controller, outbound, _) = controller();
    controller.send_text("   ", Instant::now());
    assert!(controller.messages().is_empty());
    assert!(outbound.calls.lock().unwrap().is_empty());
    assert_eq!(controller.state(), ControllerState::Idle);
}

#[test]
fn send_shows_pending_pair_and_dispatches() {
    let (mut controller, outbound, _) = controller();
    let now = Instant::now();
    controller.send_text("hello", now);

    assert_eq!(controller.messages().len(), 2);
    assert_eq!(controller.messages()[0].role, Role::User);
    assert_eq!(controller.messages()[0].status, MessageStatus::Pending);
    assert_eq!(controller.messages()[1].role, Role::Assistant);
    assert_eq!(controller.pending_replies(), 1);
    assert_eq!(controller.state(), ControllerState::Sending);
    assert_eq!(outbound.sends(), vec!["hello".to_string()]);
    // The post-send reconciliation safety net fires as well.
    assert_eq!(
        outbound.count(|c| matches!(c, OutboundCall::FetchHistory(_))),
        1
    );
}

#[test]
fn offline_send_becomes_an_error_entry_and_ledger_returns_to_zero() {
    let (mut controller, outbound, _) = controller();
    let now = Instant::now();
    controller.send_text("hello", now);
    let (user, reply) = outbound.last_send_handles().unwrap();

    controller.handle_event(
        ControlEvent::SendFailed {
            user,
            reply,
            error: GatewayError::Transport("gateway unreachable".to_string()),
        },
        now,
    );

    assert_eq!(controller.pending_replies(), 0);
    let messages = controller.messages();
    assert_eq!(messages[0].status, MessageStatus::Error);
    assert_eq!(messages[0].content, "hello");
    assert_eq!(messages[1].status, MessageStatus::Error);
    assert!(messages[1].content.contains("gateway unreachable"));
    assert_eq!(controller.state(), ControllerState::ErrorDisplay);

    // The UI stays responsive: the next send proceeds normally.
    controller.send_text("are you there?", now);
    assert_eq!(controller.state(), ControllerState::Sending);
    assert_eq!(controller.pending_replies(), 1);
}

#[test]
fn notification_resolves_the_placeholder_and_duplicates_collapse() {
    let (mut controller, _, _) = controller();
    let now = Instant::now();
    controller.send_text("turn on the lights", now);
    assert_eq!(controller.pending_replies(), 1);

    controller.handle_event(notification("Done.", "default", "t1"), now);
    assert_eq!(controller.pending_replies(), 0);
    assert_eq!(controller.messages().len(), 2);
    assert_eq!(controller.messages()[1].content, "Done.");
    assert_eq!(controller.state(), ControllerState::Idle);

    // Overlapping subscription/polling paths may deliver the same event twice.
    controller.handle_event(notification("Done.", "default", "t1"), now);
    assert_eq!(controller.messages().len(), 2);
}

#[test]
fn foreign_session_notifications_never_mutate_the_timeline() {
    let (mut controller, _, _) = controller();
    let now = Instant::now();
    controller.send_text("hello", now);
    controller.handle_event(notification("for someone else", "kitchen", "t1"), now);
    assert_eq!(controller.messages().len(), 2);
    assert_eq!(controller.pending_replies(), 1);
}

#[test]
fn concurrent_sends_resolve_independently_and_out_of_order() {
    let (mut controller, _, _) = controller();
    let now = Instant::now();
    controller.send_text("first", now);
    controller.send_text("second", now);
    assert_eq!(controller.pending_replies(), 2);

    // Replies arrive in whatever order the backend answers; each resolves
    // one placeholder, oldest first.
    controller.handle_event(notification("answer A", "default", "t1"), now);
    assert_eq!(controller.pending_replies(), 1);
    controller.handle_event(notification("answer B", "default", "t2"), now);
    assert_eq!(controller.pending_replies(), 0);
}

#[test]
fn reply_timeout_converts_one_placeholder_per_expiry() {
    let (mut controller, _, _) = controller();
    let now = Instant::now();
    controller.send_text("first", now);
    controller.send_text("second", now);

    let after_first = now + RESPONSE_TIMEOUT + Duration::from_millis(1);
    controller.on_tick(after_first);
    assert_eq!(controller.pending_replies(), 1);
    let timed_out: Vec<_> = controller
        .messages()
        .iter()
        .filter(|m| m.content == RESPONSE_TIMEOUT_MESSAGE)
        .collect();
    assert_eq!(timed_out.len(), 1);

    // The shared timer re-armed for the remaining reply.
    let after_second = after_first + RESPONSE_TIMEOUT + Duration::from_millis(1);
    controller.on_tick(after_second);
    assert_eq!(controller.pending_replies(), 0);
    assert_eq!(controller.state(), ControllerState::Idle);

    // A late reply is still accepted as a new message, not dropped.
    controller.handle_event(notification("late answer", "default", "t9"), after_second);
    assert_eq!(controller.messages().last().unwrap().content, "late answer");
    assert_eq!(
        controller.messages().last().unwrap().status,
        MessageStatus::Confirmed
    );
}

#[test]
fn toggle_rereads_settings_before_starting_capture() {
    let (mut controller, outbound, capture) = controller();
    let now = Instant::now();

    controller.toggle_voice_mode();
    assert_eq!(outbound.count(|c| matches!(c, OutboundCall::FetchSettings)), 1);
    assert!(capture.starts().is_empty());

    controller.handle_event(
        ControlEvent::SettingsFetched {
            result: Ok(wake_settings()),
        },
        now,
    );
    assert_eq!(
        capture.starts(),
        vec![CaptureCall::Start(
            SpeechProviderKind::Continuous,
            CaptureMode::Continuous,
            "en-US".to_string()
        )]
    );
    assert_eq!(controller.state(), ControllerState::AwaitingVoicePermission);

    controller.handle_event(ControlEvent::Speech(SpeechEvent::Listening), now);
    assert_eq!(controller.state(), ControllerState::Listening);

    // A config change made while idle applies to the next activation.
    controller.toggle_voice_mode();
    controller.toggle_voice_mode();
    let changed = ChatSettings {
        wake_word_enabled: false,
        voice_provider: VoiceProviderSetting::OneShotTranscription,
        voice_language: Some("bg-BG".to_string()),
        ..wake_settings()
    };
    controller.handle_event(
        ControlEvent::SettingsFetched {
            result: Ok(changed),
        },
        now,
    );
    assert_eq!(
        capture.starts().last(),
        Some(&CaptureCall::Start(
            SpeechProviderKind::OneShot,
            CaptureMode::Manual,
            "bg-BG".to_string()
        ))
    );
}

#[test]
fn settings_fetch_failure_surfaces_without_sticking() {
    let (mut controller, _, capture) = controller();
    let now = Instant::now();
    controller.toggle_voice_mode();
    controller.handle_event(
        ControlEvent::SettingsFetched {
            result: Err(GatewayError::Transport("offline".to_string())),
        },
        now,
    );
    assert!(capture.starts().is_empty());
    assert!(!controller.voice_active());
    assert_eq!(controller.state(), ControllerState::ErrorDisplay);
    assert!(controller.status_line().unwrap().contains("offline"));

    // Still responsive: a later toggle re-reads settings again.
    controller.toggle_voice_mode();
    controller.handle_event(
        ControlEvent::SettingsFetched {
            result: Ok(wake_settings()),
        },
        now,
    );
    assert!(controller.voice_active());
}

#[test]
fn wake_word_command_is_stripped_and_dispatched() {
    let (mut controller, outbound, _) = controller();
    let now = Instant::now();
    activate_voice(&mut controller, wake_settings(), now);

    controller.handle_event(
        ControlEvent::Speech(SpeechEvent::Final(
            "hey openclaw turn on the lights".to_string(),
        )),
        now,
    );
    assert_eq!(outbound.sends(), vec!["turn on the lights".to_string()]);
    // Voice capture stays active; the send happens alongside listening.
    assert_eq!(controller.state(), ControllerState::Listening);
}

#[test]
fn bare_wake_word_awaits_a_command_without_dispatching() {
    let (mut controller, outbound, _) = controller();
    let now = Instant::now();
    activate_voice(&mut controller, wake_settings(), now);

    controller.handle_event(
        ControlEvent::Speech(SpeechEvent::Final("hey openclaw".to_string())),
        now,
    );
    assert!(outbound.sends().is_empty());
    assert!(controller
        .status_line()
        .unwrap()
        .contains("awaiting command"));
}

#[test]
fn speech_without_wake_word_is_ignored_in_continuous_mode() {
    let (mut controller, outbound, _) = controller();
    let now = Instant::now();
    activate_voice(&mut controller, wake_settings(), now);
    controller.handle_event(
        ControlEvent::Speech(SpeechEvent::Final("what is the weather".to_string())),
        now,
    );
    assert!(outbound.sends().is_empty());
}

#[test]
fn manual_voice_dispatches_the_transcript_directly() {
    let (mut controller, outbound, _) = controller();
    let now = Instant::now();
    let manual = ChatSettings {
        wake_word_enabled: false,
        ..wake_settings()
    };
    activate_voice(&mut controller, manual, now);
    controller.handle_event(
        ControlEvent::Speech(SpeechEvent::Final("what is the weather".to_string())),
        now,
    );
    assert_eq!(outbound.sends(), vec!["what is the weather".to_string()]);
}

#[test]
fn bounded_retries_then_blocked_until_explicit_toggle() {
    let (mut controller, _, capture) = controller();
    let mut now = Instant::now();
    activate_voice(&mut controller, wake_settings(), now);
    let initial_starts = capture.starts().len();

    for attempt in 1..=MAX_CONSECUTIVE_RETRIES {
        controller.handle_event(
            ControlEvent::Speech(SpeechEvent::Failed(SpeechErrorClass::TransientNetwork)),
            now,
        );
        assert!(controller.voice_blocked().is_none(), "attempt {attempt}");
        // Let the scheduled backoff elapse; the supervisor restarts capture.
        now += Duration::from_secs(30);
        controller.on_tick(now);
        assert_eq!(capture.starts().len(), initial_starts + attempt as usize);
    }

    // The sixth consecutive failure exceeds the ceiling.
    controller.handle_event(
        ControlEvent::Speech(SpeechEvent::Failed(SpeechErrorClass::TransientNetwork)),
        now,
    );
    assert_eq!(controller.voice_blocked(), Some(BlockReason::RetryExhausted));

    // No further automatic restart, ever.
    now += Duration::from_secs(300);
    controller.on_tick(now);
    assert_eq!(
        capture.starts().len(),
        initial_starts + MAX_CONSECUTIVE_RETRIES as usize
    );

    // An explicit toggle resets the counter for the next activation.
    controller.toggle_voice_mode();
    assert!(!controller.voice_active());
    activate_voice(&mut controller, wake_settings(), now);
    assert!(controller.voice_blocked().is_none());
}

#[test]
fn unreliable_environment_blocks_with_its_own_message() {
    let outbound = RecordingOutbound::default();
    let capture = FakeCapture::default();
    let config = ControllerConfig {
        session_id: "default".to_string(),
        language: "en-US".to_string(),
        response_timeout: RESPONSE_TIMEOUT,
        allow_unreliable_env: false,
        environment: EnvironmentTag::KnownUnreliableAudio,
    };
    let mut controller = ChatController::new(outbound, capture, config, None);
    let now = Instant::now();
    activate_voice(&mut controller, wake_settings(), now);

    controller.handle_event(
        ControlEvent::Speech(SpeechEvent::Failed(SpeechErrorClass::TransientNetwork)),
        now,
    );
    assert!(controller.voice_blocked().is_none());
    controller.handle_event(
        ControlEvent::Speech(SpeechEvent::Failed(SpeechErrorClass::TransientNetwork)),
        now,
    );
    assert_eq!(
        controller.voice_blocked(),
        Some(BlockReason::UnreliableEnvironment)
    );
    let message = controller.status_line().unwrap().to_string();
    assert_ne!(message, BlockReason::RetryExhausted.user_message());
}

#[test]
fn silence_is_not_an_error_and_does_not_count_against_retries() {
    let (mut controller, _, _) = controller();
    let now = Instant::now();
    activate_voice(&mut controller, wake_settings(), now);
    for _ in 0..20 {
        controller.handle_event(
            ControlEvent::Speech(SpeechEvent::Failed(SpeechErrorClass::Silence)),
            now,
        );
    }
    assert!(controller.voice_blocked().is_none());
    assert_eq!(controller.state(), ControllerState::Listening);
}

#[test]
fn capability_errors_surface_once_and_tear_down_voice() {
    let (mut controller, _, capture) = controller();
    let now = Instant::now();
    activate_voice(&mut controller, wake_settings(), now);
    controller.handle_event(
        ControlEvent::Speech(SpeechEvent::Failed(SpeechErrorClass::PermissionDenied)),
        now,
    );
    assert!(!controller.voice_active());
    assert_eq!(controller.state(), ControllerState::ErrorDisplay);
    // No automatic retry for capability failures.
    controller.on_tick(now + Duration::from_secs(300));
    assert_eq!(capture.starts().len(), 1);
}

#[test]
fn one_shot_in_continuous_mode_rearms_after_each_attempt() {
    let (mut controller, _, capture) = controller();
    let now = Instant::now();
    let settings = ChatSettings {
        voice_provider: VoiceProviderSetting::OneShotTranscription,
        ..wake_settings()
    };
    activate_voice(&mut controller, settings, now);
    assert_eq!(capture.starts().len(), 1);

    controller.handle_event(
        ControlEvent::Speech(SpeechEvent::Final("hey openclaw hello".to_string())),
        now,
    );
    controller.handle_event(ControlEvent::Speech(SpeechEvent::Ended), now);
    assert_eq!(capture.starts().len(), 2);
}

#[test]
fn manual_capture_ends_after_one_activation() {
    let (mut controller, _, capture) = controller();
    let now = Instant::now();
    let manual = ChatSettings {
        wake_word_enabled: false,
        voice_provider: VoiceProviderSetting::OneShotTranscription,
        ..wake_settings()
    };
    activate_voice(&mut controller, manual, now);
    controller.handle_event(
        ControlEvent::Speech(SpeechEvent::Final("hello there".to_string())),
        now,
    );
    controller.handle_event(ControlEvent::Speech(SpeechEvent::Ended), now);
    assert!(!controller.voice_active());
    assert_eq!(capture.starts().len(), 1);
}

#[test]
fn reconciliation_preserves_in_flight_sends() {
    let (mut controller, _, _) = controller();
    let now = Instant::now();
    controller.send_text("in flight", now);

    // Authoritative history from before this send: shorter than local view,
    // never rolls back optimistic state.
    controller.handle_event(
        ControlEvent::HistoryFetched {
            session_id: "default".to_string(),
            result: Ok(vec![]),
        },
        now,
    );
    assert_eq!(controller.messages().len(), 2);

    // History that includes the send and its answer replaces the view while
    // resolving both optimistic entries.
    controller.handle_event(
        ControlEvent::HistoryFetched {
            session_id: "default".to_string(),
            result: Ok(vec![
                StoredMessage {
                    role: Role::User,
                    content: "in flight".to_string(),
                    timestamp: Some("t1".to_string()),
                },
                StoredMessage {
                    role: Role::Assistant,
                    content: "landed".to_string(),
                    timestamp: Some("t2".to_string()),
                },
            ]),
        },
        now,
    );
    assert_eq!(controller.messages().len(), 2);
    assert_eq!(controller.pending_replies(), 0);
    assert_eq!(controller.messages()[1].content, "landed");
}

#[test]
fn clear_session_clears_local_state_and_backend() {
    let (mut controller, outbound, _) = controller();
    let now = Instant::now();
    controller.send_text("hello", now);
    controller.handle_event(notification("hi", "default", "t1"), now);

    controller.clear_session(now);
    assert!(controller.messages().is_empty());
    assert_eq!(controller.pending_replies(), 0);
    assert_eq!(controller.state(), ControllerState::Idle);
    assert_eq!(
        outbound.count(|c| matches!(c, OutboundCall::ClearHistory(_))),
        1
    );
}
