//! Session registry
//!
//! Concurrent map from client id to `Session`. Every operation that changes
//! which topics a session belongs to runs while holding the map entry for
//! that client id, so a session cannot be torn down by one connection while
//! another is adding a subscription to it. Lock order is always
//! session entry, then topic.

use std::sync::Arc;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tracing::{debug, info};

use super::connection::{Connection, ConnectionId};
use super::session::Session;
use crate::broker::registry::TopicRegistry;
use crate::broker::topic::{Replay, Topic};

#[derive(Debug)]
pub struct SessionRegistry {
    sessions: DashMap<String, Arc<Session>>,
    queue_capacity: usize,
}

impl SessionRegistry {
    pub fn new(queue_capacity: usize) -> Self {
        Self {
            sessions: DashMap::new(),
            queue_capacity,
        }
    }

    /// Returns the session for `client_id`, creating it (and starting its
    /// pump) if needed. An existing session is re-pointed at `connection`.
    pub fn get_or_create(&self, client_id: &str, connection: Connection) -> Arc<Session> {
        match self.sessions.entry(client_id.to_string()) {
            Entry::Occupied(entry) => {
                entry.get().attach(connection);
                entry.get().clone()
            }
            Entry::Vacant(entry) => {
                let session = Session::spawn(client_id, connection, self.queue_capacity);
                entry.insert(session.clone());
                debug!("Created session for {client_id}");
                session
            }
        }
    }

    /// Subscribes `client_id` to `topic` over `connection`, returning the
    /// `last_n` most recent events to replay.
    pub fn subscribe(
        &self,
        client_id: &str,
        connection: Connection,
        topic: &Arc<Topic>,
        last_n: usize,
    ) -> Replay {
        let entry = self.sessions.entry(client_id.to_string());
        let session = match &entry {
            Entry::Occupied(occupied) => {
                occupied.get().attach(connection);
                occupied.get().clone()
            }
            Entry::Vacant(_) => Session::spawn(client_id, connection, self.queue_capacity),
        };

        session.add_topic(topic.name());
        let replay = topic.join(session.clone(), last_n);

        if let Entry::Vacant(vacant) = entry {
            vacant.insert(session);
            debug!("Created session for {client_id}");
        }
        replay
    }

    /// Removes `client_id` from `topic_name`. A session left without topics
    /// is torn down. Returns true if the session was torn down.
    pub fn unsubscribe(&self, client_id: &str, topic_name: &str, topics: &TopicRegistry) -> bool {
        let Entry::Occupied(entry) = self.sessions.entry(client_id.to_string()) else {
            if let Ok(topic) = topics.get(topic_name) {
                topic.leave(client_id);
            }
            return false;
        };

        if let Ok(topic) = topics.get(topic_name) {
            topic.leave(client_id);
        }
        entry.get().remove_topic(topic_name);

        if entry.get().topic_count() == 0 {
            let (_, session) = entry.remove_entry();
            session.close();
            debug!("Session {client_id} has no topics left, closed");
            true
        } else {
            false
        }
    }

    /// Drops a deleted topic from the session's topic set. Returns true if
    /// the session was torn down.
    ///
    /// If the client already subscribed to a new topic of the same name, the
    /// name stays in the set.
    pub fn detach(&self, client_id: &str, removed: &Arc<Topic>, topics: &TopicRegistry) -> bool {
        let Entry::Occupied(entry) = self.sessions.entry(client_id.to_string()) else {
            return false;
        };

        let resubscribed = topics.get(removed.name()).is_ok_and(|current| {
            !Arc::ptr_eq(&current, removed) && current.has_member(client_id)
        });
        if resubscribed {
            debug!("{client_id} resubscribed to {}, keeping it", removed.name());
            return false;
        }

        entry.get().remove_topic(removed.name());
        if entry.get().topic_count() == 0 {
            let (_, session) = entry.remove_entry();
            session.close();
            true
        } else {
            false
        }
    }

    /// Tears down the session for `client_id` if it is still attached to
    /// `connection_id`: leaves every topic, removes the entry and closes the
    /// queue. A session that has moved to another connection is left alone.
    pub fn disconnect(
        &self,
        client_id: &str,
        connection_id: ConnectionId,
        topics: &TopicRegistry,
    ) -> bool {
        let Entry::Occupied(entry) = self.sessions.entry(client_id.to_string()) else {
            return false;
        };
        if entry.get().connection().id() != connection_id {
            debug!("Session {client_id} moved to another connection, keeping it");
            return false;
        }

        for topic_name in entry.get().take_topics() {
            if let Ok(topic) = topics.get(&topic_name) {
                topic.leave(client_id);
            }
        }
        let (_, session) = entry.remove_entry();
        session.close();
        info!("Cleaned up session {client_id}");
        true
    }

    pub fn get(&self, client_id: &str) -> Option<Arc<Session>> {
        self.sessions.get(client_id).map(|s| s.value().clone())
    }

    /// Removes a session that has no subscriptions left and closes its
    /// queue. A session that still has topics is kept and `None` returned.
    pub fn remove(&self, client_id: &str) -> Option<Arc<Session>> {
        let (_, session) = self
            .sessions
            .remove_if(client_id, |_, session| session.topic_count() == 0)?;
        session.close();
        Some(session)
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}
