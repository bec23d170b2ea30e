//! Topic registry
//!
//! Concurrent map from topic name to `Topic`. Inserts and removals are
//! single atomic map operations, so two connections racing to create the
//! same topic end up sharing one. Topics are never evicted for being
//! empty; only `remove` takes them out.

use std::sync::Arc;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;

use super::topic::{Topic, TopicInfo};
use crate::utils::{BrokerError, Result};

#[derive(Debug)]
pub struct TopicRegistry {
    topics: DashMap<String, Arc<Topic>>,
    history_capacity: usize,
}

impl TopicRegistry {
    pub fn new(history_capacity: usize) -> Self {
        Self {
            topics: DashMap::new(),
            history_capacity,
        }
    }

    /// Returns the topic, creating it if needed.
    pub fn get_or_create(&self, name: &str) -> Arc<Topic> {
        self.topics
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(Topic::new(name, self.history_capacity)))
            .clone()
    }

    /// Inserts a new topic; fails if the name is taken.
    pub fn create(&self, name: &str) -> Result<Arc<Topic>> {
        match self.topics.entry(name.to_string()) {
            Entry::Occupied(_) => Err(BrokerError::TopicExists(name.to_string())),
            Entry::Vacant(entry) => {
                let topic = Arc::new(Topic::new(name, self.history_capacity));
                entry.insert(topic.clone());
                Ok(topic)
            }
        }
    }

    pub fn get(&self, name: &str) -> Result<Arc<Topic>> {
        self.topics
            .get(name)
            .map(|t| t.value().clone())
            .ok_or_else(|| BrokerError::TopicNotFound(name.to_string()))
    }

    pub fn remove(&self, name: &str) -> Result<Arc<Topic>> {
        self.topics
            .remove(name)
            .map(|(_, topic)| topic)
            .ok_or_else(|| BrokerError::TopicNotFound(name.to_string()))
    }

    /// Snapshot of every topic, sorted by name.
    pub fn list(&self) -> Vec<TopicInfo> {
        let topics: Vec<Arc<Topic>> = self.topics.iter().map(|t| t.value().clone()).collect();
        let mut infos: Vec<TopicInfo> = topics.iter().map(|t| t.info()).collect();
        infos.sort_by(|a, b| a.name.cmp(&b.name));
        infos
    }

    pub fn contains(&self, name: &str) -> bool {
        self.topics.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.topics.len()
    }

    pub fn is_empty(&self) -> bool {
        self.topics.is_empty()
    }
}
