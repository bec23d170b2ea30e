use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A message carried by a `publish` frame and delivered inside `event` frames.
///
/// `id` is chosen by the publisher and is opaque to the broker; `payload`
/// may be any JSON value.
///
/// # Example
///
/// ```rust
/// use topicast::broker::message::Message;
///
/// let msg: Message = serde_json::from_str(r#"{"id":"m1","payload":{"temp":25}}"#).unwrap();
/// assert_eq!(msg.id, "m1");
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    #[serde(default)]
    pub payload: Value,
}
