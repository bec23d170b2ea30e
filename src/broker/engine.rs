//! Broker engine
//!
//! `Broker` ties the topic registry and the session registry together and
//! is the single entry point used by the protocol engine (subscribe,
//! unsubscribe, publish, disconnect) and by administrative collaborators
//! (create/list/get/delete topics, health and stats). It is cheap to clone;
//! every clone shares the same registries.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::broker::message::Message;
use crate::broker::registry::TopicRegistry;
use crate::broker::topic::{Replay, TopicInfo};
use crate::config::BrokerSettings;
use crate::session::{Connection, ConnectionId, SessionRegistry};
use crate::transport::message::{ServerMessage, now_ts};
use crate::utils::{BrokerError, Result};

#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub status: String,
    pub uptime_sec: f64,
    pub topics: usize,
    pub subscribers: usize,
    pub timestamp: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TopicStats {
    pub messages: u64,
    pub subscribers: usize,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct StatsSummary {
    pub total_topics: usize,
    pub total_subscribers: usize,
    pub total_messages: u64,
    pub uptime_sec: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct StatsReport {
    pub topics: BTreeMap<String, TopicStats>,
    pub summary: StatsSummary,
}

#[derive(Debug, Clone)]
pub struct Broker {
    topics: Arc<TopicRegistry>,
    sessions: Arc<SessionRegistry>,
    started_at: DateTime<Utc>,
}

impl Default for Broker {
    fn default() -> Self {
        Self::new(&BrokerSettings::default())
    }
}

impl Broker {
    pub fn new(settings: &BrokerSettings) -> Self {
        Self {
            topics: Arc::new(TopicRegistry::new(settings.history_capacity)),
            sessions: Arc::new(SessionRegistry::new(settings.queue_capacity)),
            started_at: Utc::now(),
        }
    }

    pub fn topics(&self) -> &TopicRegistry {
        &self.topics
    }

    pub fn sessions(&self) -> &SessionRegistry {
        &self.sessions
    }

    /// Subscribes `client_id` to `topic`, creating the topic if needed, and
    /// returns up to `last_n` historical events to replay, oldest first.
    /// The subscriber's live delivery waits until the `Replay` is dropped.
    pub fn subscribe(
        &self,
        topic: &str,
        client_id: &str,
        connection: Connection,
        last_n: usize,
    ) -> Replay {
        let topic = self.topics.get_or_create(topic);
        let replay = self
            .sessions
            .subscribe(client_id, connection, &topic, last_n);
        debug!("{client_id} subscribed to {}", topic.name());
        replay
    }

    /// Unknown topics and unknown clients are a no-op.
    pub fn unsubscribe(&self, topic: &str, client_id: &str) -> bool {
        let closed = self.sessions.unsubscribe(client_id, topic, &self.topics);
        debug!("{client_id} unsubscribed from {topic}");
        closed
    }

    /// Appends `message` to the topic history and fans it out to every
    /// subscriber. Fails without side effects if the topic does not exist.
    pub fn publish(&self, topic: &str, message: Message) -> Result<usize> {
        let topic = self.topics.get(topic)?;
        let event = ServerMessage::event(topic.name().to_string(), message);
        topic.append_and_fan_out(event)
    }

    /// Connection-close cleanup for one client id.
    pub fn disconnect(&self, client_id: &str, connection_id: ConnectionId) -> bool {
        self.sessions
            .disconnect(client_id, connection_id, &self.topics)
    }

    pub fn create_topic(&self, name: &str) -> Result<TopicInfo> {
        if name.is_empty() {
            return Err(BrokerError::BadRequest("Topic name is required".to_string()));
        }
        let topic = self.topics.create(name)?;
        info!("Created topic {name}");
        Ok(topic.info())
    }

    pub fn list_topics(&self) -> Vec<TopicInfo> {
        self.topics.list()
    }

    pub fn get_topic(&self, name: &str) -> Result<TopicInfo> {
        self.topics.get(name).map(|t| t.info())
    }

    /// Removes the topic, then tells every member it is gone and drops the
    /// topic from the member's subscriptions before returning.
    pub async fn delete_topic(&self, name: &str) -> Result<()> {
        let topic = self.topics.remove(name)?;
        let notice = ServerMessage::topic_deleted(name.to_string());

        for session in topic.drain_members() {
            let connection = session.connection();
            if connection.is_open() {
                if let Err(e) = connection.send(&notice).await {
                    warn!("Error notifying subscriber {}: {e}", session.client_id());
                }
            }
            self.sessions.detach(session.client_id(), &topic, &self.topics);
        }

        info!("Deleted topic {name}");
        Ok(())
    }

    pub fn uptime_sec(&self) -> f64 {
        (Utc::now() - self.started_at).num_milliseconds() as f64 / 1000.0
    }

    pub fn health(&self) -> HealthReport {
        let topics = self.topics.list();
        HealthReport {
            status: "healthy".to_string(),
            uptime_sec: self.uptime_sec(),
            topics: topics.len(),
            subscribers: topics.iter().map(|t| t.subscribers).sum(),
            timestamp: now_ts(),
        }
    }

    pub fn stats(&self) -> StatsReport {
        let infos = self.topics.list();
        let summary = StatsSummary {
            total_topics: infos.len(),
            total_subscribers: infos.iter().map(|t| t.subscribers).sum(),
            total_messages: infos.iter().map(|t| t.messages).sum(),
            uptime_sec: self.uptime_sec(),
        };
        let topics = infos
            .into_iter()
            .map(|t| {
                (
                    t.name,
                    TopicStats {
                        messages: t.messages,
                        subscribers: t.subscribers,
                        created_at: t.created_at,
                    },
                )
            })
            .collect();
        StatsReport { topics, summary }
    }
}
