//! History reconciliation: the backstop for missed live notifications.
//!
//! Fetches run on widget mount and after every send. The replacement policy
//! guards against the race where an optimistic send is answered before the
//! fetch resolves; overwriting then would look like a rollback.

use crate::controller::Outbound;
use crate::gateway::GatewayError;
use crate::timeline::{Message, StoredMessage};
use std::time::{Duration, Instant};

pub const MAX_FETCH_ATTEMPTS: u32 = 3;
pub const FETCH_RETRY_DELAY: Duration = Duration::from_secs(2);

/// Overwrite local state only if the fetched set is strictly longer, or,
/// when lengths are equal, the last entry's content or timestamp differs.
#[must_use]
pub fn should_replace(current: &[Message], fetched: &[StoredMessage]) -> bool {
    if fetched.len() > current.len() {
        return true;
    }
    if fetched.len() < current.len() {
        return false;
    }
    match (current.last(), fetched.last()) {
        (Some(local), Some(remote)) => {
            local.content != remote.content || local.timestamp != remote.timestamp
        }
        _ => false,
    }
}

/// Drives authoritative history fetches with bounded, fixed-delay retries.
/// After the attempt budget runs out it gives up silently; local optimistic
/// state remains the source of truth for the rest of the session.
#[derive(Debug, Default)]
pub struct HistoryReconciler {
    attempts: u32,
    retry_at: Option<Instant>,
    in_flight: bool,
}

impl HistoryReconciler {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a fresh fetch (mount or post-send safety net). Resets the
    /// attempt budget; a fetch already in flight is not duplicated.
    pub fn request<O: Outbound>(&mut self, outbound: &O, session_id: &str) {
        self.attempts = 0;
        self.retry_at = None;
        if self.in_flight {
            return;
        }
        self.in_flight = true;
        outbound.fetch_history(session_id.to_string());
    }

    /// Record a fetch outcome. Returns the authoritative set when the fetch
    /// succeeded; failures schedule a bounded retry.
    pub fn on_result(
        &mut self,
        result: Result<Vec<StoredMessage>, GatewayError>,
        now: Instant,
    ) -> Option<Vec<StoredMessage>> {
        self.in_flight = false;
        match result {
            Ok(messages) => {
                self.attempts = 0;
                self.retry_at = None;
                Some(messages)
            }
            Err(err) => {
                self.attempts += 1;
                if self.attempts < MAX_FETCH_ATTEMPTS {
                    tracing::debug!(
                        "history fetch failed (attempt {}): {err}",
                        self.attempts
                    );
                    self.retry_at = Some(now + FETCH_RETRY_DELAY);
                } else {
                    tracing::debug!("history fetch failed {} times; giving up", self.attempts);
                    self.retry_at = None;
                }
                None
            }
        }
    }

    /// Fire a scheduled retry once its delay has elapsed.
    pub fn on_tick<O: Outbound>(&mut self, now: Instant, outbound: &O, session_id: &str) {
        if self.in_flight {
            return;
        }
        if self.retry_at.is_some_and(|at| now >= at) {
            self.retry_at = None;
            self.in_flight = true;
            outbound.fetch_history(session_id.to_string());
        }
    }

    #[must_use]
    pub fn retry_pending(&self) -> bool {
        self.retry_at.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::timeline::{Role, Timeline};
    use std::cell::RefCell;

    #[derive(Default)]
    struct FetchLog {
        fetches: RefCell<usize>,
    }

    impl Outbound for FetchLog {
        fn send_message(
            &self,
            _message: String,
            _session_id: String,
            _user: crate::timeline::PendingHandle,
            _reply: crate::timeline::PendingHandle,
        ) {
        }
        fn clear_history(&self, _session_id: String) {}
        fn fetch_history(&self, _session_id: String) {
            *self.fetches.borrow_mut() += 1;
        }
        fn fetch_settings(&self) {}
        fn fetch_pipeline_languages(&self) {}
    }

    fn stored(role: Role, content: &str, timestamp: &str) -> StoredMessage {
        StoredMessage {
            role,
            content: content.to_string(),
            timestamp: Some(timestamp.to_string()),
        }
    }

    #[test]
    fn longer_fetch_replaces() {
        let timeline = Timeline::new();
        let fetched = vec![stored(Role::Assistant, "hello", "t1")];
        assert!(should_replace(timeline.messages(), &fetched));
    }

    #[test]
    fn shorter_fetch_never_rolls_back_optimistic_state() {
        let mut timeline = Timeline::new();
        timeline.append_pending(Role::User, "hi".to_string());
        timeline.append_awaited_reply();
        assert!(!should_replace(timeline.messages(), &[]));
        // Equal length but the in-flight race: last local entry is the empty
        // placeholder, the fetched last entry differs → replace applies and
        // replace_all itself preserves pendings.
        let fetched = vec![
            stored(Role::User, "hi", "t1"),
            stored(Role::Assistant, "hello", "t2"),
        ];
        assert!(should_replace(timeline.messages(), &fetched));
    }

    #[test]
    fn identical_tail_at_equal_length_is_a_noop() {
        let mut timeline = Timeline::new();
        timeline.load_cache(vec![
            stored(Role::User, "hi", "t1"),
            stored(Role::Assistant, "hello", "t2"),
        ]);
        let fetched = vec![
            stored(Role::User, "hi", "t1"),
            stored(Role::Assistant, "hello", "t2"),
        ];
        assert!(!should_replace(timeline.messages(), &fetched));
    }

    #[test]
    fn changed_tail_at_equal_length_replaces() {
        let mut timeline = Timeline::new();
        timeline.load_cache(vec![stored(Role::Assistant, "hello", "t2")]);
        let fetched = vec![stored(Role::Assistant, "hello again", "t3")];
        assert!(should_replace(timeline.messages(), &fetched));
    }

    #[test]
    fn failures_retry_up_to_the_budget_then_give_up() {
        let outbound = FetchLog::default();
        let mut reconciler = HistoryReconciler::new();
        let mut now = Instant::now();

        reconciler.request(&outbound, "default");
        assert_eq!(*outbound.fetches.borrow(), 1);

        for attempt in 1..MAX_FETCH_ATTEMPTS {
            let out = reconciler.on_result(
                Err(GatewayError::Transport("offline".to_string())),
                now,
            );
            assert!(out.is_none());
            assert!(reconciler.retry_pending(), "attempt {attempt} should retry");
            now += FETCH_RETRY_DELAY;
            reconciler.on_tick(now, &outbound, "default");
        }
        assert_eq!(*outbound.fetches.borrow(), MAX_FETCH_ATTEMPTS as usize);

        // Final failure exhausts the budget silently.
        let out =
            reconciler.on_result(Err(GatewayError::Transport("offline".to_string())), now);
        assert!(out.is_none());
        assert!(!reconciler.retry_pending());
        now += FETCH_RETRY_DELAY;
        reconciler.on_tick(now, &outbound, "default");
        assert_eq!(*outbound.fetches.borrow(), MAX_FETCH_ATTEMPTS as usize);
    }

    #[test]
    fn success_resets_the_attempt_budget() {
        let outbound = FetchLog::default();
        let mut reconciler = HistoryReconciler::new();
        let now = Instant::now();
        reconciler.request(&outbound, "default");
        let out = reconciler.on_result(Ok(vec![stored(Role::Assistant, "hi", "t1")]), now);
        assert_eq!(out.unwrap().len(), 1);
        assert!(!reconciler.retry_pending());
    }
}
