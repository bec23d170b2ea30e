//! The `session` module tracks clients across connections.
//!
//! - `Connection`: sending half of one client socket.
//! - `Session`: a client identity with its bounded outbound queue and the
//!   set of topics it subscribes to.
//! - `SessionRegistry`: the client id → session map, and the only place
//!   subscriptions are added or removed.
//! - `pump`: the task that moves queued frames onto the socket.

pub mod connection;
pub mod pump;
pub mod registry;
pub mod session;

pub use connection::{Connection, ConnectionId};
pub use registry::SessionRegistry;
pub use session::{DeliveryHold, Session};

#[cfg(test)]
mod tests;
