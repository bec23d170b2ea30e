//! Topic management
//!
//! A `Topic` holds its member sessions, a bounded history of the events
//! published to it and the total number of publishes. All three live behind
//! one mutex so that appending to the history, bumping the counter and
//! handing the event to every member happen as a single step with respect
//! to concurrent joins and leaves. Handing an event to a member is a
//! non-blocking enqueue, so the lock is never held across I/O.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, warn};

use crate::session::{DeliveryHold, Session};
use crate::transport::message::ServerMessage;
use crate::utils::{BrokerError, Result};

/// Read-only projection of a topic, as reported by the admin surface.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TopicInfo {
    pub name: String,
    pub subscribers: usize,
    pub messages: u64,
    pub created_at: String,
}

/// History snapshot handed to a new subscriber, oldest first.
///
/// Holds back the subscriber's pump until dropped; write the events and the
/// ack first, then drop it.
#[derive(Debug, Default)]
pub struct Replay {
    events: Vec<ServerMessage>,
    _hold: Option<DeliveryHold>,
}

impl Replay {
    pub fn events(&self) -> &[ServerMessage] {
        &self.events
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

#[derive(Debug, Default)]
struct TopicState {
    history: VecDeque<ServerMessage>,
    message_count: u64,
    members: HashMap<String, Arc<Session>>,
}

#[derive(Debug)]
pub struct Topic {
    name: String,
    created_at: DateTime<Utc>,
    history_capacity: usize,
    state: Mutex<TopicState>,
}

impl Topic {
    /// Create an empty topic keeping at most `history_capacity` events.
    pub fn new(name: &str, history_capacity: usize) -> Self {
        Self {
            name: name.to_string(),
            created_at: Utc::now(),
            history_capacity,
            state: Mutex::new(TopicState::default()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Records `event` in the history and enqueues a copy for every member.
    ///
    /// Returns how many members accepted the event. Members whose queue is
    /// full are told so by the session itself and are skipped.
    pub fn append_and_fan_out(&self, event: ServerMessage) -> Result<usize> {
        let ws_msg = event.to_ws()?;

        let mut state = self.state.lock();
        state.history.push_back(event);
        while state.history.len() > self.history_capacity {
            state.history.pop_front();
        }
        state.message_count += 1;

        let mut delivered = 0;
        for (client_id, session) in &state.members {
            match session.enqueue(ws_msg.clone()) {
                Ok(()) => delivered += 1,
                Err(BrokerError::SlowConsumer(_)) => {}
                Err(e) => warn!("Failed to enqueue for {client_id} on '{}': {e}", self.name),
            }
        }

        debug!(
            "Fanned out message #{} on '{}' to {delivered} subscriber(s)",
            state.message_count, self.name
        );
        Ok(delivered)
    }

    /// The `last_n` most recent events, oldest first.
    pub fn replay(&self, last_n: usize) -> Vec<ServerMessage> {
        let state = self.state.lock();
        Self::tail(&state.history, last_n)
    }

    fn tail(history: &VecDeque<ServerMessage>, last_n: usize) -> Vec<ServerMessage> {
        let skip = history.len().saturating_sub(last_n);
        history.iter().skip(skip).cloned().collect()
    }

    /// Adds `session` as a member and snapshots the `last_n` most recent
    /// events in the same critical section, so an event published
    /// concurrently is either in the snapshot or in the session queue.
    /// A non-empty snapshot also holds the session's pump, keeping queued
    /// live events behind the replay.
    pub(crate) fn join(&self, session: Arc<Session>, last_n: usize) -> Replay {
        let mut state = self.state.lock();
        let events = Self::tail(&state.history, last_n);
        let hold = (!events.is_empty()).then(|| session.hold_delivery());
        state
            .members
            .insert(session.client_id().to_string(), session);
        Replay {
            events,
            _hold: hold,
        }
    }

    pub(crate) fn leave(&self, client_id: &str) -> bool {
        self.state.lock().members.remove(client_id).is_some()
    }

    /// Removes and returns every member.
    pub(crate) fn drain_members(&self) -> Vec<Arc<Session>> {
        self.state
            .lock()
            .members
            .drain()
            .map(|(_, session)| session)
            .collect()
    }

    pub fn has_member(&self, client_id: &str) -> bool {
        self.state.lock().members.contains_key(client_id)
    }

    pub fn subscriber_count(&self) -> usize {
        self.state.lock().members.len()
    }

    pub fn message_count(&self) -> u64 {
        self.state.lock().message_count
    }

    pub fn history_len(&self) -> usize {
        self.state.lock().history.len()
    }

    pub fn info(&self) -> TopicInfo {
        let state = self.state.lock();
        TopicInfo {
            name: self.name.clone(),
            subscribers: state.members.len(),
            messages: state.message_count,
            created_at: self.created_at.format("%Y-%m-%dT%H:%M:%SZ").to_string(),
        }
    }
}
