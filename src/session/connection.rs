//! Connection handle
//!
//! A `Connection` is the sending side of one client socket: frames pushed
//! into it are written to the socket by the transport's writer task. The
//! channel is bounded, so a slow socket eventually stalls whoever awaits
//! `send`. The handle is cheap to clone and is what a session points at;
//! replacing it is how a session migrates to a reconnected client.

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tungstenite::protocol::Message as WsMessage;
use uuid::Uuid;

use crate::transport::message::ServerMessage;
use crate::utils::{BrokerError, Result};

pub type ConnectionId = Uuid;

#[derive(Debug, Clone)]
pub struct Connection {
    id: ConnectionId,
    sender: mpsc::Sender<WsMessage>,
}

impl Connection {
    pub fn new(sender: mpsc::Sender<WsMessage>) -> Self {
        Self {
            id: Uuid::new_v4(),
            sender,
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// False once the writer side has gone away.
    pub fn is_open(&self) -> bool {
        !self.sender.is_closed()
    }

    pub async fn send(&self, frame: &ServerMessage) -> Result<()> {
        self.send_raw(frame.to_ws()?).await
    }

    pub async fn send_raw(&self, msg: WsMessage) -> Result<()> {
        self.sender
            .send(msg)
            .await
            .map_err(|_| BrokerError::ConnectionClosed)
    }

    /// Non-blocking send; fails if the socket buffer is full or closed.
    pub fn try_send(&self, frame: &ServerMessage) -> Result<()> {
        match self.sender.try_send(frame.to_ws()?) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) | Err(TrySendError::Closed(_)) => {
                Err(BrokerError::ConnectionClosed)
            }
        }
    }
}
