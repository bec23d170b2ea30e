use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tungstenite::protocol::Message as WsMessage;

use super::{Connection, Session, SessionRegistry};
use crate::broker::message::Message;
use crate::broker::registry::TopicRegistry;
use crate::broker::topic::Topic;
use crate::transport::message::ServerMessage;
use crate::utils::{BrokerError, ErrorCode};

fn event(topic: &str, id: &str) -> ServerMessage {
    ServerMessage::event(
        topic.to_string(),
        Message {
            id: id.to_string(),
            payload: json!({ "n": id }),
        },
    )
}

fn parse(ws: WsMessage) -> ServerMessage {
    let text = ws.to_text().expect("text frame").to_string();
    serde_json::from_str(&text).expect("valid server frame")
}

fn event_id(frame: ServerMessage) -> String {
    match frame {
        ServerMessage::Event { message, .. } => message.id,
        other => panic!("Expected an event, got {other:?}"),
    }
}

async fn next_frame(rx: &mut mpsc::Receiver<WsMessage>) -> ServerMessage {
    let ws = timeout(Duration::from_secs(2), rx.recv())
        .await
        .expect("timed out waiting for frame")
        .expect("connection channel closed");
    parse(ws)
}

#[test]
fn overflow_reports_slow_consumer_on_connection() {
    const Q: usize = 3;
    let topic = Topic::new("t", 100);
    let (conn_tx, mut conn_rx) = mpsc::channel::<WsMessage>(8);
    let (session, mut queue) = Session::new("slow", Connection::new(conn_tx), Q);
    let session = Arc::new(session);
    topic.join(session.clone(), 0);

    for i in 0..=Q {
        topic.append_and_fan_out(event("t", &format!("m{i}"))).unwrap();
    }

    // the (Q+1)th publish overflowed and was reported directly
    match parse(conn_rx.try_recv().expect("slow consumer notice")) {
        ServerMessage::Error {
            request_id, error, ..
        } => {
            assert_eq!(request_id, None);
            assert_eq!(error.code, ErrorCode::SlowConsumer);
        }
        other => panic!("Expected error, got {other:?}"),
    }
    assert!(conn_rx.try_recv().is_err());

    // the first Q are still queued, in order
    assert_eq!(session.queued(), Q);
    for i in 0..Q {
        assert_eq!(event_id(parse(queue.try_recv().unwrap())), format!("m{i}"));
    }
    assert!(queue.try_recv().is_err());
    // the history still recorded every publish
    assert_eq!(topic.message_count(), (Q + 1) as u64);
}

#[test]
fn enqueue_full_returns_slow_consumer_even_if_notice_fails() {
    let (conn_tx, conn_rx) = mpsc::channel::<WsMessage>(1);
    drop(conn_rx);
    let (session, _queue) = Session::new("slow", Connection::new(conn_tx), 1);

    session.enqueue(WsMessage::text("first".to_string())).unwrap();
    let err = session.enqueue(WsMessage::text("second".to_string())).unwrap_err();
    assert!(matches!(err, BrokerError::SlowConsumer(id) if id == "slow"));
}

#[test]
fn closed_session_rejects_enqueue() {
    let (conn_tx, _conn_rx) = mpsc::channel::<WsMessage>(1);
    let (session, _queue) = Session::new("c", Connection::new(conn_tx), 4);
    session.close();
    assert!(session.is_closed());
    assert!(matches!(
        session.enqueue(WsMessage::text("late".to_string())),
        Err(BrokerError::ConnectionClosed)
    ));
}

#[tokio::test]
async fn pump_delivers_in_publish_order() {
    let topics = TopicRegistry::new(100);
    let sessions = SessionRegistry::new(100);
    let topic = topics.get_or_create("t");
    let (tx, mut rx) = mpsc::channel::<WsMessage>(16);
    sessions.subscribe("a", Connection::new(tx), &topic, 0);

    for i in 0..20 {
        topic.append_and_fan_out(event("t", &format!("m{i}"))).unwrap();
    }
    for i in 0..20 {
        assert_eq!(event_id(next_frame(&mut rx).await), format!("m{i}"));
    }
}

#[tokio::test]
async fn replay_holds_the_pump_until_dropped() {
    let topics = TopicRegistry::new(100);
    let sessions = SessionRegistry::new(100);
    let topic = topics.get_or_create("t");
    topic.append_and_fan_out(event("t", "old")).unwrap();
    let (tx, mut rx) = mpsc::channel::<WsMessage>(16);

    let replay = sessions.subscribe("a", Connection::new(tx), &topic, 1);
    assert_eq!(replay.len(), 1);
    assert!(sessions.get("a").unwrap().is_held());

    topic.append_and_fan_out(event("t", "live")).unwrap();
    assert!(timeout(Duration::from_millis(100), rx.recv()).await.is_err());

    drop(replay);
    assert_eq!(event_id(next_frame(&mut rx).await), "live");
    assert!(!sessions.get("a").unwrap().is_held());
}

#[tokio::test]
async fn subscribe_without_history_does_not_hold_the_pump() {
    let topics = TopicRegistry::new(100);
    let sessions = SessionRegistry::new(100);
    let topic = topics.get_or_create("t");
    let (tx, _rx) = mpsc::channel::<WsMessage>(16);

    let replay = sessions.subscribe("a", Connection::new(tx), &topic, 5);
    assert!(replay.is_empty());
    assert!(!sessions.get("a").unwrap().is_held());
}

#[tokio::test]
async fn resubscribe_with_new_connection_migrates_delivery() {
    let topics = TopicRegistry::new(100);
    let sessions = SessionRegistry::new(100);
    let topic = topics.get_or_create("t");

    let (old_tx, mut old_rx) = mpsc::channel::<WsMessage>(16);
    let (new_tx, mut new_rx) = mpsc::channel::<WsMessage>(16);
    let old_conn = Connection::new(old_tx);
    let new_conn = Connection::new(new_tx);

    sessions.subscribe("a", old_conn, &topic, 0);
    sessions.subscribe("a", new_conn.clone(), &topic, 0);

    let session = sessions.get("a").unwrap();
    assert_eq!(session.connection().id(), new_conn.id());
    assert_eq!(session.topics(), vec!["t".to_string()]);
    assert_eq!(topic.subscriber_count(), 1);
    assert_eq!(sessions.len(), 1);

    topic.append_and_fan_out(event("t", "m1")).unwrap();
    assert_eq!(event_id(next_frame(&mut new_rx).await), "m1");
    assert!(old_rx.try_recv().is_err());
}

#[tokio::test]
async fn get_or_create_reattaches_without_touching_topics() {
    let topics = TopicRegistry::new(100);
    let sessions = SessionRegistry::new(100);
    let topic = topics.get_or_create("t");
    let (tx1, _rx1) = mpsc::channel::<WsMessage>(4);
    let (tx2, _rx2) = mpsc::channel::<WsMessage>(4);
    let second = Connection::new(tx2);

    sessions.subscribe("a", Connection::new(tx1), &topic, 0);
    let session = sessions.get_or_create("a", second.clone());

    assert_eq!(session.connection().id(), second.id());
    assert!(session.is_subscribed("t"));
    assert!(Arc::ptr_eq(&session, &sessions.get("a").unwrap()));
}

#[tokio::test]
async fn pump_survives_closed_connection_until_reattached() {
    let topics = TopicRegistry::new(100);
    let sessions = SessionRegistry::new(100);
    let topic = topics.get_or_create("t");

    let (old_tx, old_rx) = mpsc::channel::<WsMessage>(4);
    sessions.subscribe("a", Connection::new(old_tx), &topic, 0);
    drop(old_rx);

    // dropped while dark
    topic.append_and_fan_out(event("t", "lost")).unwrap();
    tokio::task::yield_now().await;

    let (new_tx, mut new_rx) = mpsc::channel::<WsMessage>(4);
    sessions.get_or_create("a", Connection::new(new_tx));
    topic.append_and_fan_out(event("t", "m2")).unwrap();

    // "lost" may still reach the new connection if the pump had not
    // dequeued it before the reattach
    let mut first = event_id(next_frame(&mut new_rx).await);
    if first == "lost" {
        first = event_id(next_frame(&mut new_rx).await);
    }
    assert_eq!(first, "m2");
}

#[tokio::test]
async fn unsubscribing_last_topic_removes_session_and_closes_queue() {
    let topics = TopicRegistry::new(100);
    let sessions = SessionRegistry::new(100);
    let t1 = topics.get_or_create("t1");
    let t2 = topics.get_or_create("t2");
    let (tx, _rx) = mpsc::channel::<WsMessage>(4);
    let conn = Connection::new(tx);

    sessions.subscribe("a", conn.clone(), &t1, 0);
    sessions.subscribe("a", conn, &t2, 0);
    let session = sessions.get("a").unwrap();

    assert!(!sessions.unsubscribe("a", "t1", &topics));
    assert!(!t1.has_member("a"));
    assert!(t2.has_member("a"));
    assert!(sessions.get("a").is_some());

    assert!(sessions.unsubscribe("a", "t2", &topics));
    assert!(sessions.get("a").is_none());
    assert!(session.is_closed());

    // the pump observes closure and exits instead of hanging
    let pump = session.take_pump().expect("pump was started");
    timeout(Duration::from_secs(2), pump)
        .await
        .expect("pump did not exit")
        .unwrap();
}

#[tokio::test]
async fn unsubscribe_unknown_topic_or_client_is_a_no_op() {
    let topics = TopicRegistry::new(100);
    let sessions = SessionRegistry::new(100);
    let topic = topics.get_or_create("t");
    let (tx, _rx) = mpsc::channel::<WsMessage>(4);
    sessions.subscribe("a", Connection::new(tx), &topic, 0);

    assert!(!sessions.unsubscribe("ghost", "t", &topics));
    assert!(!sessions.unsubscribe("a", "unknown", &topics));
    assert!(sessions.get("a").unwrap().is_subscribed("t"));
}

#[tokio::test]
async fn disconnect_only_tears_down_sessions_still_on_that_connection() {
    let topics = TopicRegistry::new(100);
    let sessions = SessionRegistry::new(100);
    let topic = topics.get_or_create("t");
    let (tx1, _rx1) = mpsc::channel::<WsMessage>(4);
    let (tx2, _rx2) = mpsc::channel::<WsMessage>(4);
    let first = Connection::new(tx1);
    let second = Connection::new(tx2);

    sessions.subscribe("a", first.clone(), &topic, 0);
    sessions.subscribe("a", second.clone(), &topic, 0);

    assert!(!sessions.disconnect("a", first.id(), &topics));
    assert!(topic.has_member("a"));

    assert!(sessions.disconnect("a", second.id(), &topics));
    assert!(!topic.has_member("a"));
    assert!(sessions.is_empty());
}

#[tokio::test]
async fn remove_refuses_sessions_with_topics() {
    let topics = TopicRegistry::new(100);
    let sessions = SessionRegistry::new(100);
    let topic = topics.get_or_create("t");
    let (tx, _rx) = mpsc::channel::<WsMessage>(4);
    let conn = Connection::new(tx);

    sessions.subscribe("a", conn.clone(), &topic, 0);
    assert!(sessions.remove("a").is_none());

    let idle = sessions.get_or_create("idle", conn);
    let removed = sessions.remove("idle").expect("idle session removed");
    assert!(Arc::ptr_eq(&idle, &removed));
    assert!(removed.is_closed());
    assert!(sessions.get("idle").is_none());
}

#[tokio::test]
async fn detach_keeps_a_topic_resubscribed_after_deletion() {
    let topics = TopicRegistry::new(100);
    let sessions = SessionRegistry::new(100);
    let (tx, _rx) = mpsc::channel::<WsMessage>(4);
    let conn = Connection::new(tx);
    sessions.subscribe("a", conn.clone(), &topics.get_or_create("t"), 0);

    // deletion removes the topic, then the client subscribes again before
    // the deletion gets to detach it
    let removed = topics.remove("t").unwrap();
    let members = removed.drain_members();
    let fresh = topics.get_or_create("t");
    sessions.subscribe("a", conn, &fresh, 0);
    for session in members {
        assert!(!sessions.detach(session.client_id(), &removed, &topics));
    }

    let session = sessions.get("a").expect("session kept");
    assert!(session.is_subscribed("t"));
    assert!(!session.is_closed());
    assert!(fresh.has_member("a"));
}

#[tokio::test]
async fn detach_after_deletion_tears_down_an_idle_session() {
    let topics = TopicRegistry::new(100);
    let sessions = SessionRegistry::new(100);
    let (tx, _rx) = mpsc::channel::<WsMessage>(4);
    sessions.subscribe("a", Connection::new(tx), &topics.get_or_create("t"), 0);

    let removed = topics.remove("t").unwrap();
    removed.drain_members();
    assert!(sessions.detach("a", &removed, &topics));
    assert!(sessions.get("a").is_none());
}
