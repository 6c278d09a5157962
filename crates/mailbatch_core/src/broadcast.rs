//! Session-scoped progress broadcasting
//!
//! One registry entry per session, each holding the sending half of an
//! unbounded channel. Delivery is at-most-once and best-effort: a batch never
//! waits on, or fails because of, its subscriber.

use crate::{model::ProgressEvent, BatchError};
use async_trait::async_trait;
use dashmap::{mapref::entry::Entry, DashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::{mpsc, Notify};
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Producer/consumer contract between a batch run and its live subscriber
#[async_trait]
pub trait ProgressBroadcaster: Send + Sync {
    /// Open a session. Fails with [`BatchError::DuplicateSession`] while
    /// another subscriber holds the id.
    fn register(&self, session_id: &str) -> Result<Subscription, BatchError>;

    /// Deliver an event if someone is listening; a no-op otherwise
    fn publish(&self, session_id: &str, event: ProgressEvent);

    /// Stop delivery and drop the entry. Idempotent.
    fn close(&self, session_id: &str);

    /// Drop the entry only if it still belongs to the subscription `token`
    fn release(&self, session_id: &str, token: u64);

    fn is_registered(&self, session_id: &str) -> bool;

    fn active_sessions(&self) -> usize;

    /// Wait at most `grace` for a subscriber to register `session_id`
    async fn wait_for_subscriber(&self, session_id: &str, grace: Duration) -> bool;
}

struct SessionEntry {
    token: u64,
    sender: mpsc::UnboundedSender<ProgressEvent>,
}

/// In-process [`ProgressBroadcaster`] backed by a sharded map
pub struct SessionRegistry {
    sessions: DashMap<String, SessionEntry>,
    next_token: AtomicU64,
    registered: Notify,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self {
            sessions: DashMap::new(),
            next_token: AtomicU64::new(1),
            registered: Notify::new(),
        }
    }

    fn remove_entry(&self, session_id: &str, token: u64) -> bool {
        self.sessions
            .remove_if(session_id, |_, entry| entry.token == token)
            .is_some()
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ProgressBroadcaster for SessionRegistry {
    fn register(&self, session_id: &str) -> Result<Subscription, BatchError> {
        let token = self.next_token.fetch_add(1, Ordering::Relaxed);
        let (sender, events) = mpsc::unbounded_channel();
        let connected = ProgressEvent::Connected {
            session_id: session_id.to_string(),
        };
        // The receiver is alive until this function returns
        let _ = sender.send(connected);

        match self.sessions.entry(session_id.to_string()) {
            Entry::Occupied(mut occupied) => {
                if !occupied.get().sender.is_closed() {
                    warn!(session_id, "Rejected second subscriber for active session");
                    return Err(BatchError::DuplicateSession(session_id.to_string()));
                }
                debug!(session_id, "Replacing entry of a departed subscriber");
                occupied.insert(SessionEntry { token, sender });
            }
            Entry::Vacant(vacant) => {
                vacant.insert(SessionEntry { token, sender });
            }
        }

        self.registered.notify_waiters();
        info!(session_id, token, "Progress subscriber registered");

        Ok(Subscription {
            session_id: session_id.to_string(),
            token,
            events,
        })
    }

    fn publish(&self, session_id: &str, event: ProgressEvent) {
        let terminal = event.is_terminal();
        let kind = event.kind();

        let (token, delivered) = {
            let Some(entry) = self.sessions.get(session_id) else {
                return;
            };
            (entry.token, entry.sender.send(event).is_ok())
        };

        if !delivered {
            warn!(session_id, event = kind, "Subscriber unreachable, dropping session");
            self.remove_entry(session_id, token);
        } else if terminal {
            debug!(session_id, event = kind, "Terminal event delivered, closing session");
            self.remove_entry(session_id, token);
        }
    }

    fn close(&self, session_id: &str) {
        if self.sessions.remove(session_id).is_some() {
            debug!(session_id, "Session closed");
        }
    }

    fn release(&self, session_id: &str, token: u64) {
        if self.remove_entry(session_id, token) {
            info!(session_id, token, "Progress subscriber disconnected");
        }
    }

    fn is_registered(&self, session_id: &str) -> bool {
        self.sessions
            .get(session_id)
            .is_some_and(|entry| !entry.sender.is_closed())
    }

    fn active_sessions(&self) -> usize {
        self.sessions.len()
    }

    async fn wait_for_subscriber(&self, session_id: &str, grace: Duration) -> bool {
        let deadline = Instant::now() + grace;
        loop {
            let notified = self.registered.notified();
            tokio::pin!(notified);
            // Arm before checking so a registration in between is not missed
            notified.as_mut().enable();

            if self.is_registered(session_id) {
                return true;
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return self.is_registered(session_id);
            }
        }
    }
}

/// Receiving end of one session, held by the transport
#[derive(Debug)]
pub struct Subscription {
    session_id: String,
    token: u64,
    events: mpsc::UnboundedReceiver<ProgressEvent>,
}

impl Subscription {
    /// Next event, or `None` once the session is closed and drained
    pub async fn recv(&mut self) -> Option<ProgressEvent> {
        self.events.recv().await
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn token(&self) -> u64 {
        self.token
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::BatchStats;
    use pretty_assertions::assert_eq;
    use std::sync::Arc;

    fn complete() -> ProgressEvent {
        ProgressEvent::Complete {
            stats: BatchStats::default(),
            output_ref: None,
        }
    }

    #[tokio::test]
    async fn test_register_queues_connected() {
        let registry = SessionRegistry::new();
        let mut subscription = registry.register("s1").unwrap();

        assert_eq!(
            subscription.recv().await,
            Some(ProgressEvent::Connected {
                session_id: "s1".to_string()
            })
        );
        assert!(registry.is_registered("s1"));
        assert_eq!(registry.active_sessions(), 1);
    }

    #[test]
    fn test_duplicate_session_rejected() {
        let registry = SessionRegistry::new();
        let _first = registry.register("s1").unwrap();

        let second = registry.register("s1");
        assert!(matches!(second, Err(BatchError::DuplicateSession(id)) if id == "s1"));
    }

    #[test]
    fn test_register_after_close_succeeds() {
        let registry = SessionRegistry::new();
        let _first = registry.register("s1").unwrap();
        registry.close("s1");

        assert!(registry.register("s1").is_ok());
    }

    #[test]
    fn test_dropped_subscriber_can_be_replaced() {
        let registry = SessionRegistry::new();
        drop(registry.register("s1").unwrap());

        assert!(!registry.is_registered("s1"));
        assert!(registry.register("s1").is_ok());
    }

    #[tokio::test]
    async fn test_events_delivered_in_order_and_terminal_closes() {
        let registry = SessionRegistry::new();
        let mut subscription = registry.register("s1").unwrap();

        registry.publish("s1", ProgressEvent::Start { total: 2 });
        for email in ["a@x.com", "b@x.com"] {
            registry.publish(
                "s1",
                ProgressEvent::Email {
                    email: email.to_string(),
                    valid: true,
                    reason: None,
                },
            );
        }
        registry.publish("s1", complete());
        registry.publish("s1", ProgressEvent::Start { total: 9 });

        let mut kinds = Vec::new();
        while let Some(event) = subscription.recv().await {
            kinds.push(event.kind());
        }
        assert_eq!(kinds, vec!["connected", "start", "email", "email", "complete"]);
        assert!(!registry.is_registered("s1"));
    }

    #[tokio::test]
    async fn test_close_is_idempotent_and_does_not_redeliver() {
        let registry = SessionRegistry::new();
        let mut subscription = registry.register("s1").unwrap();
        registry.publish("s1", complete());

        registry.close("s1");
        registry.close("s1");

        assert_eq!(subscription.recv().await.map(|e| e.kind()), Some("connected"));
        assert_eq!(subscription.recv().await.map(|e| e.kind()), Some("complete"));
        assert_eq!(subscription.recv().await, None);
    }

    #[test]
    fn test_publish_without_subscriber_is_noop() {
        let registry = SessionRegistry::new();
        registry.publish("nobody", ProgressEvent::Start { total: 1 });
        registry.close("nobody");
        assert_eq!(registry.active_sessions(), 0);
    }

    #[test]
    fn test_publish_to_departed_subscriber_drops_entry() {
        let registry = SessionRegistry::new();
        drop(registry.register("s1").unwrap());
        assert_eq!(registry.active_sessions(), 1);

        registry.publish("s1", ProgressEvent::Start { total: 1 });
        assert_eq!(registry.active_sessions(), 0);
    }

    #[test]
    fn test_stale_release_keeps_newer_registration() {
        let registry = SessionRegistry::new();
        let first = registry.register("s1").unwrap();
        let stale_token = first.token();
        registry.close("s1");
        let second = registry.register("s1").unwrap();

        registry.release("s1", stale_token);
        assert!(registry.is_registered("s1"));

        registry.release("s1", second.token());
        assert!(!registry.is_registered("s1"));
    }

    #[tokio::test]
    async fn test_wait_for_subscriber_times_out() {
        let registry = SessionRegistry::new();
        let started = Instant::now();

        assert!(!registry.wait_for_subscriber("s1", Duration::from_millis(50)).await);
        assert!(started.elapsed() >= Duration::from_millis(50));
    }

    #[tokio::test]
    async fn test_wait_for_subscriber_wakes_on_register() {
        let registry = Arc::new(SessionRegistry::new());

        let waiter = {
            let registry = Arc::clone(&registry);
            tokio::spawn(async move { registry.wait_for_subscriber("s1", Duration::from_secs(5)).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        let _other = registry.register("s2").unwrap();
        let _subscription = registry.register("s1").unwrap();

        let started = Instant::now();
        assert!(waiter.await.unwrap());
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_wait_returns_immediately_when_registered() {
        let registry = SessionRegistry::new();
        let _subscription = registry.register("s1").unwrap();

        assert!(registry.wait_for_subscriber("s1", Duration::ZERO).await);
    }
}
