//! The `broker` module owns topics and routes published messages.
//!
//! - `Topic`: member sessions, bounded history and message counter.
//! - `TopicRegistry`: the topic name → topic map.
//! - `Broker`: the facade used by the protocol engine and by admin callers.

pub mod engine;
pub mod message;
pub mod registry;
pub mod topic;

pub use engine::{Broker, HealthReport, StatsReport, StatsSummary, TopicStats};
pub use registry::TopicRegistry;
pub use topic::{Replay, Topic, TopicInfo};
