//! # Wire Protocol
//!
//! Every frame exchanged with a client is a JSON object with an integer `op`
//! and a payload `d`.
//!
//! | op | direction | payload |
//! |----|-----------|---------|
//! | 0  | hub→client | `{pingInterval}` once on open |
//! | 1  | client→hub | heartbeat |
//! | 2  | both | subscribe `{user}` / ack `{subscriptions}` |
//! | 3  | both | unsubscribe `{user}` / update `{user, track}` / error `{user, error}` / ack `{subscriptions}` |
//! | -1 | hub→client | `{reason}`, then the connection is terminated |

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{HubError, HubResult};

/// Opcode constants shared by the router and the outbound messages.
pub mod opcode {
    pub const CLOSE: i64 = -1;
    pub const READY: i64 = 0;
    pub const HEARTBEAT: i64 = 1;
    pub const SUBSCRIBE: i64 = 2;
    pub const UNSUBSCRIBE: i64 = 3;
    /// Track updates and feed errors share op 3 with the unsubscribe ack.
    pub const UPDATE: i64 = UNSUBSCRIBE;
}

/// An album or artist reference inside a [`Track`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NamedRef {
    pub mbid: String,
    pub name: String,
}

/// One cover image, tagged with its size ("small", "medium", ...).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Image {
    pub size: String,
    pub url: String,
}

/// # Track Snapshot
///
/// The canonical snapshot of a feed: the most recent track a user scrobbled.
/// Two snapshots are "the same" when every field compares equal.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Track {
    pub album: NamedRef,
    pub artist: NamedRef,
    pub images: Vec<Image>,
    pub name: String,
    pub mbid: String,
    pub url: String,
    #[serde(rename = "nowplaying")]
    pub now_playing: bool,
}

/// Payload (`d`) of a hub→client frame.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ServerPayload {
    Ready {
        #[serde(rename = "pingInterval")]
        ping_interval: u64,
    },
    Subscriptions {
        subscriptions: Vec<String>,
    },
    Track {
        user: String,
        track: Track,
    },
    FeedError {
        user: String,
        error: String,
    },
    Close {
        reason: String,
    },
}

/// A hub→client frame.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ServerMessage {
    pub op: i64,
    pub d: ServerPayload,
}

impl ServerMessage {
    pub fn ready(ping_interval: Duration) -> Self {
        Self {
            op: opcode::READY,
            d: ServerPayload::Ready {
                ping_interval: u64::try_from(ping_interval.as_millis()).unwrap_or(u64::MAX),
            },
        }
    }

    pub fn subscribe_ack(subscriptions: Vec<String>) -> Self {
        Self {
            op: opcode::SUBSCRIBE,
            d: ServerPayload::Subscriptions { subscriptions },
        }
    }

    pub fn unsubscribe_ack(subscriptions: Vec<String>) -> Self {
        Self {
            op: opcode::UNSUBSCRIBE,
            d: ServerPayload::Subscriptions { subscriptions },
        }
    }

    pub fn track(user: &str, track: Track) -> Self {
        Self {
            op: opcode::UPDATE,
            d: ServerPayload::Track {
                user: user.to_string(),
                track,
            },
        }
    }

    pub fn feed_error(user: &str, error: &str) -> Self {
        Self {
            op: opcode::UPDATE,
            d: ServerPayload::FeedError {
                user: user.to_string(),
                error: error.to_string(),
            },
        }
    }

    pub fn close(reason: &str) -> Self {
        Self {
            op: opcode::CLOSE,
            d: ServerPayload::Close {
                reason: reason.to_string(),
            },
        }
    }

    pub fn encode(&self) -> HubResult<String> {
        Ok(serde_json::to_string(self)?)
    }
}

/// # Client Frame
///
/// A client→hub frame that passed the structural checks: it is a JSON object
/// and carries a non-zero integer `op`. Opcode-specific checks happen in the router.
#[derive(Debug, Clone, PartialEq)]
pub struct ClientFrame {
    pub op: i64,
    pub d: Value,
}

impl ClientFrame {
    /// Parses a text frame, failing with the close reason the client should
    /// receive.
    pub fn parse(text: &str) -> HubResult<Self> {
        let value: Value = serde_json::from_str(text)
            .map_err(|_| HubError::protocol("Message must be a JSON object"))?;
        let Value::Object(mut object) = value else {
            return Err(HubError::protocol("Message must be a JSON object"));
        };
        let op = object
            .get("op")
            .and_then(Value::as_i64)
            // Op 0 is hub→client only; from a client it counts as no op at all.
            .filter(|op| *op != 0)
            .ok_or_else(|| HubError::protocol("Message must have an op property"))?;
        let d = object.remove("d").unwrap_or(Value::Null);
        Ok(Self { op, d })
    }

    /// The `d.user` feed key, if present and non-empty.
    pub fn user(&self) -> Option<&str> {
        self.d
            .get("user")
            .and_then(Value::as_str)
            .filter(|user| !user.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_ready_frame_shape() {
        let text = ServerMessage::ready(Duration::from_secs(30)).encode().unwrap();
        let value: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value, json!({"op": 0, "d": {"pingInterval": 30000}}));
    }

    #[test]
    fn test_track_frame_uses_wire_field_names() {
        let track = Track {
            name: "Song A".into(),
            now_playing: true,
            images: vec![Image {
                size: "small".into(),
                url: "https://img/1.png".into(),
            }],
            ..Default::default()
        };
        let text = ServerMessage::track("alice", track).encode().unwrap();
        let value: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value["op"], 3);
        assert_eq!(value["d"]["user"], "alice");
        assert_eq!(value["d"]["track"]["name"], "Song A");
        assert_eq!(value["d"]["track"]["nowplaying"], true);
        assert_eq!(value["d"]["track"]["images"][0]["size"], "small");
    }

    #[test]
    fn test_close_and_error_frames() {
        let close: Value =
            serde_json::from_str(&ServerMessage::close("bye").encode().unwrap()).unwrap();
        assert_eq!(close, json!({"op": -1, "d": {"reason": "bye"}}));

        let error: Value = serde_json::from_str(
            &ServerMessage::feed_error("bob", "User not found").encode().unwrap(),
        )
        .unwrap();
        assert_eq!(error, json!({"op": 3, "d": {"user": "bob", "error": "User not found"}}));
    }

    #[test]
    fn test_parse_rejects_non_objects() {
        for text in ["not json", "[1,2]", "42", "\"op\""] {
            let err = ClientFrame::parse(text).unwrap_err();
            assert_eq!(err.to_string(), "Message must be a JSON object");
        }
    }

    #[test]
    fn test_parse_requires_integer_op() {
        for text in [r#"{"d":{}}"#, r#"{"op":"2"}"#, r#"{"op":null}"#, r#"{"op":0}"#] {
            let err = ClientFrame::parse(text).unwrap_err();
            assert_eq!(err.to_string(), "Message must have an op property");
        }
    }

    #[test]
    fn test_user_must_be_non_empty_string() {
        let frame = ClientFrame::parse(r#"{"op":2,"d":{"user":"alice"}}"#).unwrap();
        assert_eq!(frame.op, 2);
        assert_eq!(frame.user(), Some("alice"));

        let empty = ClientFrame::parse(r#"{"op":2,"d":{"user":""}}"#).unwrap();
        assert_eq!(empty.user(), None);

        let numeric = ClientFrame::parse(r#"{"op":2,"d":{"user":7}}"#).unwrap();
        assert_eq!(numeric.user(), None);

        let missing = ClientFrame::parse(r#"{"op":2}"#).unwrap();
        assert_eq!(missing.user(), None);
    }
}
