//! # Topicast
//!
//! `topicast` is an in-memory publish/subscribe broker. Clients keep one
//! WebSocket open, subscribe to named topics (optionally replaying recent
//! history), publish to topics and receive the events of the topics they
//! subscribe to.
//!
//! ## Core Modules
//!
//! - `broker`: topics, their bounded history, and the `Broker` facade that
//!   also serves the administrative operations.
//! - `session`: client sessions that survive reconnects, their bounded
//!   outbound queues and delivery pumps.
//! - `transport`: protocol frames, the per-connection protocol engine and
//!   the WebSocket server.
//! - `config`: layered configuration loading.
//! - `utils`: error handling and logging setup.

pub mod broker;
pub mod config;
pub mod session;
pub mod transport;
pub mod utils;
