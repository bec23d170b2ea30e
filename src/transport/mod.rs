//! The `transport` module is responsible for network communication with
//! clients over WebSockets.
//!
//! It defines the frames exchanged with clients, the per-connection
//! protocol engine that interprets them, and the server that accepts
//! connections and wires each one to an engine.

pub mod message;
pub mod protocol;
pub mod websocket;

pub use message::{ClientMessage, ServerMessage};
pub use protocol::{ConnectionState, ProtocolEngine};
pub use websocket::{serve, start_websocket_server};
