//! Per-session event fan-out
//!
//! Observers subscribe to one session and receive its status, log and stats
//! events. Delivery is best-effort: a slow channel subscriber loses events
//! rather than slowing the session down. Log events reach every subscriber
//! in sequence order even if they are published out of order.

use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::mpsc;
use tracing::debug;

use crate::session::{LogLine, ResourceStats, SessionState};

/// Out-of-order log lines held while waiting for a gap to fill
pub const MAX_PENDING_LOGS: usize = 256;

/// Event published for one session
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum SessionEvent {
    /// State transition
    #[serde(rename_all = "camelCase")]
    Status {
        session_id: String,
        status: SessionState,
        #[serde(skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },
    /// One log line
    #[serde(rename_all = "camelCase")]
    Log { session_id: String, log: LogLine },
    /// Latest resource sample
    #[serde(rename_all = "camelCase")]
    Stats {
        session_id: String,
        stats: ResourceStats,
    },
    /// Session finished and cleaned up; no further events follow
    #[serde(rename_all = "camelCase")]
    Closed {
        session_id: String,
        status: SessionState,
    },
}

impl SessionEvent {
    pub fn session_id(&self) -> &str {
        match self {
            SessionEvent::Status { session_id, .. }
            | SessionEvent::Log { session_id, .. }
            | SessionEvent::Stats { session_id, .. }
            | SessionEvent::Closed { session_id, .. } => session_id,
        }
    }
}

/// Subscriber callback. Runs on the publishing task; must not block and must
/// not call back into the broadcaster.
pub type EventHandler = Arc<dyn Fn(&SessionEvent) + Send + Sync>;

/// Returned by [`EventBroadcaster::subscribe`]; pass back to unsubscribe
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SubscriptionHandle {
    pub session_id: String,
    pub id: u64,
}

struct Hub {
    subscribers: Vec<(u64, EventHandler)>,
    /// Next log sequence number to deliver
    next_seq: u64,
    pending: BTreeMap<u64, SessionEvent>,
}

impl Hub {
    fn new() -> Self {
        Hub {
            subscribers: Vec::new(),
            next_seq: 1,
            pending: BTreeMap::new(),
        }
    }

    fn deliver(&self, event: &SessionEvent) {
        for (_, handler) in &self.subscribers {
            handler(event);
        }
    }

    fn publish_log(&mut self, seq: u64, event: SessionEvent) {
        if seq < self.next_seq {
            debug!("Dropping stale log seq {} for {}", seq, event.session_id());
            return;
        }
        self.pending.insert(seq, event);
        self.drain_ready();

        while self.pending.len() > MAX_PENDING_LOGS {
            // Give up on the gap: skip ahead to the oldest held line
            let oldest = self.pending.keys().next().copied();
            if let Some(seq) = oldest {
                self.next_seq = seq;
                self.drain_ready();
            }
        }
    }

    fn drain_ready(&mut self) {
        while let Some(event) = self.pending.remove(&self.next_seq) {
            self.deliver(&event);
            self.next_seq += 1;
        }
    }

    /// Deliver everything held, in order, ignoring gaps
    fn flush(&mut self) {
        let pending = std::mem::take(&mut self.pending);
        for (seq, event) in pending {
            self.deliver(&event);
            self.next_seq = seq + 1;
        }
    }
}

/// Per-session publish/subscribe hub
#[derive(Default)]
pub struct EventBroadcaster {
    hubs: Mutex<HashMap<String, Hub>>,
    next_id: AtomicU64,
}

impl EventBroadcaster {
    pub fn new() -> Self {
        Self::default()
    }

    fn hubs(&self) -> MutexGuard<'_, HashMap<String, Hub>> {
        self.hubs
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Register `handler` for every event of `session_id`
    pub fn subscribe(&self, session_id: &str, handler: EventHandler) -> SubscriptionHandle {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        self.hubs()
            .entry(session_id.to_string())
            .or_insert_with(Hub::new)
            .subscribers
            .push((id, handler));
        debug!("Subscription {} added for session {}", id, session_id);
        SubscriptionHandle {
            session_id: session_id.to_string(),
            id,
        }
    }

    /// Subscribe through a bounded channel; events are dropped when it is full
    pub fn subscribe_channel(
        &self,
        session_id: &str,
        capacity: usize,
    ) -> (SubscriptionHandle, mpsc::Receiver<SessionEvent>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let handler: EventHandler = Arc::new(move |event: &SessionEvent| {
            if tx.try_send(event.clone()).is_err() {
                debug!("Subscriber channel full or closed, dropping event");
            }
        });
        (self.subscribe(session_id, handler), rx)
    }

    /// Remove a subscription. Returns `false` if it was already gone.
    pub fn unsubscribe(&self, handle: &SubscriptionHandle) -> bool {
        let mut hubs = self.hubs();
        let Some(hub) = hubs.get_mut(&handle.session_id) else {
            return false;
        };
        let before = hub.subscribers.len();
        hub.subscribers.retain(|(id, _)| *id != handle.id);
        before != hub.subscribers.len()
    }

    /// Publish one event to every subscriber of its session.
    ///
    /// A `Closed` event flushes held log lines first and then drops the
    /// session's hub together with its subscriptions.
    pub fn publish(&self, event: SessionEvent) {
        let mut hubs = self.hubs();
        let session_id = event.session_id().to_string();

        if matches!(event, SessionEvent::Closed { .. }) {
            if let Some(mut hub) = hubs.remove(&session_id) {
                hub.flush();
                hub.deliver(&event);
            }
            return;
        }

        let log_seq = match &event {
            SessionEvent::Log { log, .. } => Some(log.seq),
            _ => None,
        };
        let hub = hubs.entry(session_id).or_insert_with(Hub::new);
        match log_seq {
            Some(seq) => hub.publish_log(seq, event),
            None => hub.deliver(&event),
        }
    }

    /// Drop whatever is left of a session's hub without delivering anything
    pub fn discard(&self, session_id: &str) -> bool {
        self.hubs().remove(session_id).is_some()
    }

    /// Number of live subscriptions for a session
    pub fn subscriber_count(&self, session_id: &str) -> usize {
        self.hubs()
            .get(session_id)
            .map(|hub| hub.subscribers.len())
            .unwrap_or(0)
    }
}
