//! Event vocabulary delivered to the controller's event-loop thread.
//!
//! Worker threads (platform calls, the event-bus listener, speech capture)
//! never touch shared state; everything they learn arrives here.

use crate::gateway::{ChatSettings, GatewayError, InboundNotification, PipelineLanguages};
use crate::speech::SpeechEvent;
use crate::timeline::{PendingHandle, StoredMessage};

#[derive(Debug, Clone, PartialEq)]
pub enum ControlEvent {
    /// Live assistant reply from the event bus.
    Notification(InboundNotification),
    /// Lifecycle and results of the active speech capture.
    Speech(SpeechEvent),
    /// A fire-and-forget send failed; both optimistic entries are demoted.
    SendFailed {
        user: PendingHandle,
        reply: PendingHandle,
        error: GatewayError,
    },
    /// Authoritative history fetch finished (either way).
    HistoryFetched {
        session_id: String,
        result: Result<Vec<StoredMessage>, GatewayError>,
    },
    /// Voice-settings re-read finished (either way).
    SettingsFetched {
        result: Result<ChatSettings, GatewayError>,
    },
    /// Best-effort pipeline-language preferences; failures degrade silently.
    PipelineLanguagesFetched {
        result: Result<PipelineLanguages, GatewayError>,
    },
}
