//! WebSocket transport
//!
//! Accepts TCP connections, performs the WebSocket handshake and runs one
//! `ProtocolEngine` per connection. Each connection also gets a writer task
//! that drains the connection's bounded outbound channel into the socket;
//! the engine, the session pumps and admin notifications all write through
//! that channel, never to the socket directly.

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::spawn;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_tungstenite::accept_async;
use tracing::{debug, info, warn};
use tungstenite::protocol::Message as WsMessage;

use crate::broker::Broker;
use crate::config::Settings;
use crate::session::Connection;
use crate::transport::protocol::ProtocolEngine;
use crate::utils::Result;

/// How long a closing connection may spend flushing queued frames.
const FLUSH_TIMEOUT: Duration = Duration::from_secs(1);

/// Binds `addr` and serves connections; only returns on a bind error.
pub async fn start_websocket_server(
    addr: String,
    broker: Broker,
    settings: Settings,
) -> Result<()> {
    let listener = TcpListener::bind(&addr).await?;
    serve(listener, broker, settings).await
}

/// Serves connections from an already bound listener.
pub async fn serve(listener: TcpListener, broker: Broker, settings: Settings) -> Result<()> {
    info!("WebSocket server listening on ws://{}", listener.local_addr()?);

    loop {
        let (stream, peer) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(e) => {
                warn!("Failed to accept connection: {e}");
                continue;
            }
        };
        debug!("Accepted TCP connection from {peer}");

        let broker = broker.clone();
        let buffer = settings.broker.connection_buffer;
        tokio::spawn(handle_connection(stream, broker, buffer));
    }
}

async fn handle_connection(stream: TcpStream, broker: Broker, buffer: usize) {
    let ws_stream = match accept_async(stream).await {
        Ok(ws) => ws,
        Err(e) => {
            warn!("WebSocket handshake error: {e}");
            return;
        }
    };

    let (mut ws_sender, ws_receiver) = ws_stream.split();
    let (tx, mut rx) = mpsc::channel::<WsMessage>(buffer);
    let connection = Connection::new(tx);
    let connection_id = connection.id();
    info!("Connection {connection_id} opened");

    let mut writer = spawn(async move {
        while let Some(msg) = rx.recv().await {
            if let Err(e) = ws_sender.send(msg).await {
                warn!("Failed to send message to {connection_id}: {e}");
                break;
            }
        }
        let _ = ws_sender.close().await;
        debug!("Send loop closed for {connection_id}");
    });

    ProtocolEngine::new(broker, connection)
        .run(ws_receiver)
        .await;

    // the writer ends once every clone of the connection is gone; a pump
    // still draining a torn down session may hold one for a while
    if timeout(FLUSH_TIMEOUT, &mut writer).await.is_err() {
        debug!("Connection {connection_id} did not flush in time");
        writer.abort();
    }
}
