//! Delivery pump
//!
//! One pump task per session drains the session queue in FIFO order and
//! writes each frame to whichever connection the session is attached to at
//! that moment. While a `DeliveryHold` is out the pump waits before
//! writing, so history replayed on subscribe lands ahead of newer events.
//! A frame dequeued while the current connection is closed is dropped; the
//! pump itself only stops once the queue is closed and empty.

use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::{mpsc, watch};
use tracing::{debug, warn};
use tungstenite::protocol::Message as WsMessage;

use super::connection::Connection;

pub(crate) async fn run(
    client_id: String,
    mut queue: mpsc::Receiver<WsMessage>,
    current: Arc<RwLock<Connection>>,
    mut holds: watch::Receiver<usize>,
) {
    while let Some(msg) = queue.recv().await {
        // a new subscription is still writing its replay
        let _ = holds.wait_for(|n| *n == 0).await;

        // re-read on every frame so a reattached session follows its client
        let connection = current.read().clone();
        if let Err(e) = connection.send_raw(msg).await {
            warn!(
                "Dropped frame for {client_id} on connection {}: {e}",
                connection.id()
            );
        }
    }

    debug!("Delivery pump closed for {client_id}");
}
