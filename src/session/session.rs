//! Subscriber session
//!
//! A `Session` is the durable identity of one client, keyed by the client
//! supplied id rather than by socket. It owns a bounded outbound queue
//! drained by its delivery pump, and remembers which topics it belongs to.
//!
//! Membership changes always go through `SessionRegistry` so that the
//! session's topic set and each topic's member map stay in step.

use std::collections::HashSet;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::warn;
use tungstenite::protocol::Message as WsMessage;

use super::connection::Connection;
use super::pump;
use crate::transport::message::ServerMessage;
use crate::utils::{BrokerError, ErrorCode, Result};

#[derive(Debug)]
pub struct Session {
    client_id: String,
    connection: Arc<RwLock<Connection>>,
    queue: Mutex<Option<mpsc::Sender<WsMessage>>>,
    capacity: usize,
    topics: Mutex<HashSet<String>>,
    /// Outstanding `DeliveryHold`s; the pump waits while this is non-zero.
    holds: Arc<watch::Sender<usize>>,
    pump: Mutex<Option<JoinHandle<()>>>,
}

/// Keeps the session's pump from writing while alive.
///
/// Taken under the topic lock when a subscription replays history, and
/// dropped once the replay and its ack are on the connection, so live
/// events queued after the join are written after them.
#[derive(Debug)]
pub struct DeliveryHold {
    holds: Arc<watch::Sender<usize>>,
}

impl Drop for DeliveryHold {
    fn drop(&mut self) {
        self.holds.send_modify(|n| *n = n.saturating_sub(1));
    }
}

impl Session {
    /// Builds a session without a pump. The caller owns the queue receiver.
    pub(crate) fn new(
        client_id: &str,
        connection: Connection,
        capacity: usize,
    ) -> (Self, mpsc::Receiver<WsMessage>) {
        let (tx, rx) = mpsc::channel(capacity);
        let session = Self {
            client_id: client_id.to_string(),
            connection: Arc::new(RwLock::new(connection)),
            queue: Mutex::new(Some(tx)),
            capacity,
            topics: Mutex::new(HashSet::new()),
            holds: Arc::new(watch::Sender::new(0)),
            pump: Mutex::new(None),
        };
        (session, rx)
    }

    /// Builds a session and starts its delivery pump. Must be called from
    /// within a tokio runtime.
    pub fn spawn(client_id: &str, connection: Connection, capacity: usize) -> Arc<Self> {
        let (session, rx) = Self::new(client_id, connection, capacity);
        let handle = tokio::spawn(pump::run(
            session.client_id.clone(),
            rx,
            session.connection.clone(),
            session.holds.subscribe(),
        ));
        *session.pump.lock() = Some(handle);
        Arc::new(session)
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    /// The connection the session currently delivers to.
    pub fn connection(&self) -> Connection {
        self.connection.read().clone()
    }

    /// Points the session at a new connection; subscriptions are untouched.
    pub fn attach(&self, connection: Connection) {
        *self.connection.write() = connection;
    }

    /// Queues a frame for the pump without blocking.
    ///
    /// When the queue is full the frame is dropped and a `SLOW_CONSUMER`
    /// error is pushed straight to the current connection, best effort.
    pub fn enqueue(&self, msg: WsMessage) -> Result<()> {
        let result = match self.queue.lock().as_ref() {
            Some(tx) => tx.try_send(msg),
            None => return Err(BrokerError::ConnectionClosed),
        };

        match result {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => {
                warn!("Queue full for {}, dropping frame", self.client_id);
                let notice = ServerMessage::error(
                    None,
                    ErrorCode::SlowConsumer,
                    "Subscriber queue overflow",
                );
                if let Err(e) = self.connection().try_send(&notice) {
                    warn!("Could not notify {} of overflow: {e}", self.client_id);
                }
                Err(BrokerError::SlowConsumer(self.client_id.clone()))
            }
            Err(TrySendError::Closed(_)) => Err(BrokerError::ConnectionClosed),
        }
    }

    pub fn hold_delivery(&self) -> DeliveryHold {
        self.holds.send_modify(|n| *n += 1);
        DeliveryHold {
            holds: self.holds.clone(),
        }
    }

    pub fn is_held(&self) -> bool {
        *self.holds.borrow() > 0
    }

    /// Frames waiting for the pump.
    pub fn queued(&self) -> usize {
        match self.queue.lock().as_ref() {
            Some(tx) => self.capacity - tx.capacity(),
            None => 0,
        }
    }

    /// Closes the queue. The pump delivers what is left and then exits.
    pub fn close(&self) {
        self.queue.lock().take();
    }

    pub fn is_closed(&self) -> bool {
        self.queue.lock().is_none()
    }

    /// Hands out the pump's join handle, if the pump was started.
    pub fn take_pump(&self) -> Option<JoinHandle<()>> {
        self.pump.lock().take()
    }

    pub(crate) fn add_topic(&self, topic: &str) -> bool {
        self.topics.lock().insert(topic.to_string())
    }

    pub(crate) fn remove_topic(&self, topic: &str) -> bool {
        self.topics.lock().remove(topic)
    }

    pub(crate) fn take_topics(&self) -> Vec<String> {
        self.topics.lock().drain().collect()
    }

    pub fn is_subscribed(&self, topic: &str) -> bool {
        self.topics.lock().contains(topic)
    }

    pub fn topics(&self) -> Vec<String> {
        let mut topics: Vec<String> = self.topics.lock().iter().cloned().collect();
        topics.sort();
        topics
    }

    pub fn topic_count(&self) -> usize {
        self.topics.lock().len()
    }
}
