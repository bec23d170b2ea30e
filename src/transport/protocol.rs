//! Protocol engine
//!
//! One `ProtocolEngine` runs per connection. It reads inbound frames,
//! dispatches them to the broker and answers each one with exactly one
//! synchronous frame (`ack`, `pong` or `error`) on the same connection.
//! Subscribe may send replayed `event` frames ahead of its `ack`.
//!
//! States: `Open` while reading, `Closing` once a close frame, end of stream
//! or transport error is seen, `Closed` after session cleanup. Nothing a
//! client sends can close the connection; only the transport can.

use std::collections::HashSet;

use futures_util::{Stream, StreamExt};
use tracing::{debug, info, warn};
use tungstenite::protocol::Message as WsMessage;

use crate::broker::Broker;
use crate::broker::message::Message;
use crate::session::Connection;
use crate::transport::message::{ClientMessage, ServerMessage};
use crate::utils::ErrorCode;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Open,
    Closing,
    Closed,
}

pub struct ProtocolEngine {
    broker: Broker,
    connection: Connection,
    state: ConnectionState,
    /// Client ids this connection subscribed with; cleaned up on close.
    client_ids: HashSet<String>,
}

impl ProtocolEngine {
    pub fn new(broker: Broker, connection: Connection) -> Self {
        Self {
            broker,
            connection,
            state: ConnectionState::Open,
            client_ids: HashSet::new(),
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn connection(&self) -> &Connection {
        &self.connection
    }

    /// Reads frames until the stream ends, a close frame arrives or the
    /// transport fails, then cleans up.
    pub async fn run<S, E>(mut self, mut inbound: S)
    where
        S: Stream<Item = Result<WsMessage, E>> + Unpin,
        E: std::fmt::Display,
    {
        while self.state == ConnectionState::Open {
            match inbound.next().await {
                Some(Ok(WsMessage::Text(text))) => self.handle_text(text.as_str()).await,
                Some(Ok(WsMessage::Close(_))) | None => self.state = ConnectionState::Closing,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    warn!("Transport error on {}: {e}", self.connection.id());
                    self.state = ConnectionState::Closing;
                }
            }
        }
        self.close();
    }

    /// Decodes and handles one text frame.
    pub async fn handle_text(&mut self, text: &str) {
        match ClientMessage::decode(text) {
            Ok(msg) => self.dispatch(msg).await,
            Err(e) => {
                warn!(
                    "Invalid client message on {}: {} | {}",
                    self.connection.id(),
                    e.reason,
                    text.chars().take(100).collect::<String>()
                );
                let response = ServerMessage::error(e.request_id, ErrorCode::BadRequest, e.reason);
                self.reply(&response).await;
            }
        }
    }

    async fn dispatch(&mut self, msg: ClientMessage) {
        let response = match msg {
            ClientMessage::Subscribe {
                topic,
                client_id,
                last_n,
                request_id,
            } => {
                return self
                    .handle_subscribe(topic, client_id, last_n, request_id)
                    .await;
            }
            ClientMessage::Unsubscribe {
                topic,
                client_id,
                request_id,
            } => self.handle_unsubscribe(topic, client_id, request_id),
            ClientMessage::Publish {
                topic,
                message,
                request_id,
            } => self.handle_publish(topic, message, request_id),
            ClientMessage::Ping { request_id } => ServerMessage::pong(request_id),
        };
        self.reply(&response).await;
    }

    /// Writes the replay and then the ack while the session's pump is held,
    /// so live events follow both.
    async fn handle_subscribe(
        &mut self,
        topic: String,
        client_id: String,
        last_n: usize,
        request_id: Option<String>,
    ) {
        let replay = self
            .broker
            .subscribe(&topic, &client_id, self.connection.clone(), last_n);
        self.client_ids.insert(client_id);

        for event in replay.events() {
            self.reply(event).await;
        }
        self.reply(&ServerMessage::ack(request_id, Some(topic))).await;
        drop(replay);
    }

    fn handle_unsubscribe(
        &mut self,
        topic: String,
        client_id: String,
        request_id: Option<String>,
    ) -> ServerMessage {
        if self.broker.unsubscribe(&topic, &client_id) {
            self.client_ids.remove(&client_id);
        }
        ServerMessage::ack(request_id, Some(topic))
    }

    fn handle_publish(
        &mut self,
        topic: String,
        message: Message,
        request_id: Option<String>,
    ) -> ServerMessage {
        match self.broker.publish(&topic, message) {
            Ok(delivered) => {
                debug!("Published to {topic} ({delivered} delivered)");
                ServerMessage::ack(request_id, Some(topic))
            }
            Err(e) => ServerMessage::from_error(request_id, &e),
        }
    }

    async fn reply(&self, frame: &ServerMessage) {
        if let Err(e) = self.connection.send(frame).await {
            debug!("Could not reply on {}: {e}", self.connection.id());
        }
    }

    /// Tears down every session this connection still owns.
    pub fn close(&mut self) {
        if self.state == ConnectionState::Closed {
            return;
        }
        self.state = ConnectionState::Closing;
        for client_id in self.client_ids.drain() {
            self.broker.disconnect(&client_id, self.connection.id());
        }
        self.state = ConnectionState::Closed;
        info!("Connection {} closed", self.connection.id());
    }
}
