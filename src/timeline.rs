//! Session message timeline: optimistic placeholders, confirmation, and dedup.
//!
//! The timeline is the single owner of conversation state for one session.
//! Sends append pending entries immediately; confirmations arrive later from
//! live notifications or reconciled history and resolve them in place.
//! Entries are never removed individually, only bulk-cleared.

use serde::{Deserialize, Serialize};

/// Fixed user-facing text for a reply that never arrived.
pub const RESPONSE_TIMEOUT_MESSAGE: &str =
    "No response received. The gateway may still be working on it; try again.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageStatus {
    Confirmed,
    Pending,
    Error,
}

/// Opaque ticket for one optimistic entry. Process-local, never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PendingHandle(u64);

#[derive(Debug, Clone)]
pub struct Message {
    pub role: Role,
    pub content: String,
    /// Backend-assigned creation time; authoritative once confirmed.
    pub timestamp: Option<String>,
    pub status: MessageStatus,
    handle: Option<PendingHandle>,
}

impl Message {
    fn confirmed(role: Role, content: String, timestamp: Option<String>) -> Self {
        Self {
            role,
            content,
            timestamp,
            status: MessageStatus::Confirmed,
            handle: None,
        }
    }
}

/// Wire and cache form of a confirmed message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredMessage {
    pub role: Role,
    pub content: String,
    #[serde(default)]
    pub timestamp: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationOutcome {
    /// Resolved an outstanding placeholder.
    Resolved,
    /// No placeholder was outstanding; appended as a new confirmed message.
    Appended,
    /// Exact duplicate of the most recently accepted notification; dropped.
    Duplicate,
}

#[derive(Debug, Default)]
pub struct Timeline {
    messages: Vec<Message>,
    next_handle: u64,
    /// Count of unresolved assistant placeholders (the pending-response ledger).
    pending_replies: usize,
    /// Dedup key of the most recently accepted notification.
    last_accepted: Option<(Option<String>, String)>,
}

impl Timeline {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed from the advisory cache; entries load as confirmed.
    pub fn load_cache(&mut self, cached: Vec<StoredMessage>) {
        self.messages = cached
            .into_iter()
            .map(|m| Message::confirmed(m.role, m.content, m.timestamp))
            .collect();
    }

    #[must_use]
    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    #[must_use]
    pub fn pending_replies(&self) -> usize {
        self.pending_replies
    }

    #[must_use]
    pub fn pending_total(&self) -> usize {
        self.messages
            .iter()
            .filter(|m| m.status == MessageStatus::Pending)
            .count()
    }

    /// Confirmed entries in order, for the cache and for length comparisons.
    #[must_use]
    pub fn confirmed_messages(&self) -> Vec<StoredMessage> {
        self.messages
            .iter()
            .filter(|m| m.status == MessageStatus::Confirmed)
            .map(|m| StoredMessage {
                role: m.role,
                content: m.content.clone(),
                timestamp: m.timestamp.clone(),
            })
            .collect()
    }

    fn issue_handle(&mut self) -> PendingHandle {
        self.next_handle += 1;
        PendingHandle(self.next_handle)
    }

    /// Append an optimistic entry and return its handle.
    pub fn append_pending(&mut self, role: Role, content: String) -> PendingHandle {
        let handle = self.issue_handle();
        self.messages.push(Message {
            role,
            content,
            timestamp: None,
            status: MessageStatus::Pending,
            handle: Some(handle),
        });
        handle
    }

    /// Append an empty assistant placeholder awaiting its reply and bump the ledger.
    pub fn append_awaited_reply(&mut self) -> PendingHandle {
        let handle = self.append_pending(Role::Assistant, String::new());
        self.pending_replies += 1;
        handle
    }

    /// Promote a pending entry to confirmed. Resolving an already-resolved
    /// or unknown handle is a no-op, not an error.
    pub fn resolve_pending(
        &mut self,
        handle: PendingHandle,
        content: String,
        timestamp: Option<String>,
    ) {
        let Some(message) = self
            .messages
            .iter_mut()
            .find(|m| m.handle == Some(handle) && m.status == MessageStatus::Pending)
        else {
            return;
        };
        message.content = content;
        message.timestamp = timestamp;
        message.status = MessageStatus::Confirmed;
        if message.role == Role::Assistant {
            self.pending_replies = self.pending_replies.saturating_sub(1);
        }
    }

    /// Demote a pending entry to an error. When a description is given it
    /// replaces the content (used for empty reply placeholders); otherwise
    /// the optimistic content is kept. Idempotent like `resolve_pending`.
    pub fn fail_pending(&mut self, handle: PendingHandle, description: Option<&str>) {
        let Some(message) = self
            .messages
            .iter_mut()
            .find(|m| m.handle == Some(handle) && m.status == MessageStatus::Pending)
        else {
            return;
        };
        if let Some(description) = description {
            message.content = description.to_string();
        }
        message.status = MessageStatus::Error;
        if message.role == Role::Assistant {
            self.pending_replies = self.pending_replies.saturating_sub(1);
        }
    }

    /// Convert the oldest unresolved reply placeholder to an error entry.
    /// Returns false when no placeholder was outstanding.
    pub fn timeout_oldest_pending(&mut self) -> bool {
        let Some(message) = self
            .messages
            .iter_mut()
            .find(|m| m.status == MessageStatus::Pending && m.role == Role::Assistant)
        else {
            return false;
        };
        message.content = RESPONSE_TIMEOUT_MESSAGE.to_string();
        message.status = MessageStatus::Error;
        self.pending_replies = self.pending_replies.saturating_sub(1);
        true
    }

    /// Accept a live notification for this session.
    ///
    /// Duplicate delivery from overlapping subscription/polling paths is
    /// detected against the most recently accepted (timestamp, content)
    /// pair. A late reply with no placeholder left is appended rather than
    /// dropped.
    pub fn accept_notification(
        &mut self,
        content: &str,
        timestamp: Option<&str>,
    ) -> NotificationOutcome {
        let key = (timestamp.map(str::to_string), content.to_string());
        if self.last_accepted.as_ref() == Some(&key) {
            return NotificationOutcome::Duplicate;
        }
        self.last_accepted = Some(key);

        let oldest = self
            .messages
            .iter()
            .find(|m| m.status == MessageStatus::Pending && m.role == Role::Assistant)
            .and_then(|m| m.handle);
        match oldest {
            Some(handle) => {
                self.resolve_pending(handle, content.to_string(), timestamp.map(str::to_string));
                NotificationOutcome::Resolved
            }
            None => {
                self.messages.push(Message::confirmed(
                    Role::Assistant,
                    content.to_string(),
                    timestamp.map(str::to_string),
                ));
                NotificationOutcome::Appended
            }
        }
    }

    /// Replace the confirmed view with the authoritative fetched set while
    /// preserving in-flight optimistic entries that have no counterpart.
    ///
    /// A pending user entry is considered covered when the fetched set
    /// contains more user messages with identical content than were locally
    /// confirmed. A reply placeholder is covered by each assistant message
    /// the fetched set has beyond the locally confirmed assistant count.
    pub fn replace_all(&mut self, fetched: Vec<StoredMessage>) {
        let confirmed_assistant = self
            .messages
            .iter()
            .filter(|m| m.status == MessageStatus::Confirmed && m.role == Role::Assistant)
            .count();
        let fetched_assistant = fetched.iter().filter(|m| m.role == Role::Assistant).count();
        let mut unclaimed_replies = fetched_assistant.saturating_sub(confirmed_assistant);

        let user_surplus = |content: &str, this: &Self, fetched: &[StoredMessage]| {
            let fetched_count = fetched
                .iter()
                .filter(|m| m.role == Role::User && m.content == content)
                .count();
            let confirmed_count = this
                .messages
                .iter()
                .filter(|m| {
                    m.status == MessageStatus::Confirmed
                        && m.role == Role::User
                        && m.content == content
                })
                .count();
            fetched_count.saturating_sub(confirmed_count)
        };

        let mut carried: Vec<Message> = Vec::new();
        let mut claimed_user: Vec<(String, usize)> = Vec::new();
        let mut ledger_drop = 0usize;
        for message in &self.messages {
            if message.status != MessageStatus::Pending {
                continue;
            }
            match message.role {
                Role::User => {
                    let claimed = claimed_user
                        .iter()
                        .position(|(content, _)| content == &message.content);
                    let already = claimed.map_or(0, |i| claimed_user[i].1);
                    if user_surplus(&message.content, self, &fetched) > already {
                        match claimed {
                            Some(i) => claimed_user[i].1 += 1,
                            None => claimed_user.push((message.content.clone(), 1)),
                        }
                    } else {
                        carried.push(message.clone());
                    }
                }
                Role::Assistant => {
                    if unclaimed_replies > 0 {
                        unclaimed_replies -= 1;
                        ledger_drop += 1;
                    } else {
                        carried.push(message.clone());
                    }
                }
            }
        }
        self.pending_replies = self.pending_replies.saturating_sub(ledger_drop);

        self.messages = fetched
            .into_iter()
            .map(|m| Message::confirmed(m.role, m.content, m.timestamp))
            .collect();
        self.messages.extend(carried);
    }

    /// Bulk-clear the session. The only way entries are ever removed.
    pub fn clear(&mut self) {
        self.messages.clear();
        self.pending_replies = 0;
        self.last_accepted = None;
    }
}
