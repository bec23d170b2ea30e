//! The `utils` module provides the pieces shared by every other module of
//! `topicast`: the error taxonomy surfaced to clients and the tracing setup
//! used by the binary.

pub mod error;
pub mod logging;

pub use error::{BrokerError, ErrorCode, Result};
