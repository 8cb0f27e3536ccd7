//! Wire format of cross-context messages
//!
//! An envelope is a JSON object with the required fields `type`, `source` and
//! `timestamp` (epoch milliseconds), the optional routing fields `id`,
//! `target` and `origin`, and the fields of its type-specific payload.

use std::{
    fmt,
    time::{SystemTime, UNIX_EPOCH},
};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::descriptor::Meta;

/// Which side of the frame boundary produced a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MessageSource {
    Host,
    Embedded,
}

/// Envelope type without its payload, used as a subscription key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MessageKind {
    Mount,
    Unmount,
    Update,
    RouteChange,
    RouteSync,
    Event,
    Request,
    Response,
    DataSet,
    DataGet,
}

impl MessageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageKind::Mount => "MOUNT",
            MessageKind::Unmount => "UNMOUNT",
            MessageKind::Update => "UPDATE",
            MessageKind::RouteChange => "ROUTE_CHANGE",
            MessageKind::RouteSync => "ROUTE_SYNC",
            MessageKind::Event => "EVENT",
            MessageKind::Request => "REQUEST",
            MessageKind::Response => "RESPONSE",
            MessageKind::DataSet => "DATA_SET",
            MessageKind::DataGet => "DATA_GET",
        }
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Props carried by lifecycle envelopes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LifecycleProps {
    pub route: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<Meta>,
}

/// Type-specific payload; serialized inline next to the common fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MessageBody {
    Mount {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        props: Option<LifecycleProps>,
    },
    Unmount {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        props: Option<LifecycleProps>,
    },
    Update {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        props: Option<LifecycleProps>,
    },
    RouteChange {
        route: String,
    },
    RouteSync {
        route: String,
    },
    Event {
        event: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        payload: Option<Value>,
    },
    Request {
        method: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        params: Option<Value>,
    },
    Response {
        success: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        data: Option<Value>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    DataSet {
        key: String,
        value: Value,
    },
    DataGet {
        key: String,
    },
}

impl MessageBody {
    pub fn kind(&self) -> MessageKind {
        match self {
            MessageBody::Mount { .. } => MessageKind::Mount,
            MessageBody::Unmount { .. } => MessageKind::Unmount,
            MessageBody::Update { .. } => MessageKind::Update,
            MessageBody::RouteChange { .. } => MessageKind::RouteChange,
            MessageBody::RouteSync { .. } => MessageKind::RouteSync,
            MessageBody::Event { .. } => MessageKind::Event,
            MessageBody::Request { .. } => MessageKind::Request,
            MessageBody::Response { .. } => MessageKind::Response,
            MessageBody::DataSet { .. } => MessageKind::DataSet,
            MessageBody::DataGet { .. } => MessageKind::DataGet,
        }
    }

    /// Route carried by route and lifecycle envelopes.
    pub fn route(&self) -> Option<&str> {
        match self {
            MessageBody::RouteChange { route } | MessageBody::RouteSync { route } => Some(route),
            MessageBody::Mount { props }
            | MessageBody::Unmount { props }
            | MessageBody::Update { props } => props.as_ref().map(|p| p.route.as_str()),
            _ => None,
        }
    }
}

/// The unit of cross-context communication.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(flatten)]
    pub body: MessageBody,
    pub source: MessageSource,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Name of the application the envelope is addressed to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
    /// Name of the application that sent the envelope.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin: Option<String>,
    pub timestamp: u64,
}

impl Envelope {
    pub fn new(body: MessageBody, source: MessageSource) -> Self {
        Self {
            body,
            source,
            id: None,
            target: None,
            origin: None,
            timestamp: now_millis(),
        }
    }

    pub fn kind(&self) -> MessageKind {
        self.body.kind()
    }

    /// Parses a raw channel message. Anything that is not a well-formed
    /// envelope yields `None`.
    pub fn decode(raw: Value) -> Option<Self> {
        if !raw.is_object() {
            return None;
        }
        serde_json::from_value(raw).ok()
    }

    pub fn encode(&self) -> serde_json::Result<Value> {
        serde_json::to_value(self)
    }
}

pub(crate) fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_wire_format() {
        let mut envelope = Envelope::new(
            MessageBody::Mount {
                props: Some(LifecycleProps {
                    route: "/1".into(),
                    meta: None,
                }),
            },
            MessageSource::Host,
        );
        envelope.target = Some("a".into());

        let raw = envelope.encode().unwrap();
        assert_eq!(raw["type"], "MOUNT");
        assert_eq!(raw["source"], "HOST");
        assert_eq!(raw["target"], "a");
        assert_eq!(raw["props"]["route"], "/1");
        assert!(raw["timestamp"].is_u64());
        assert!(raw.get("id").is_none());

        assert_eq!(Envelope::decode(raw).unwrap(), envelope);
    }

    #[test]
    fn test_decode_foreign_json() {
        let raw = json!({
            "type": "REQUEST",
            "source": "EMBEDDED",
            "id": "req_1_1700000000000",
            "origin": "a",
            "timestamp": 1700000000000u64,
            "method": "getUser",
            "params": {"id": 7}
        });
        let envelope = Envelope::decode(raw).unwrap();
        assert_eq!(envelope.kind(), MessageKind::Request);
        assert_eq!(envelope.origin.as_deref(), Some("a"));
        match envelope.body {
            MessageBody::Request { method, params } => {
                assert_eq!(method, "getUser");
                assert_eq!(params, Some(json!({"id": 7})));
            }
            other => panic!("unexpected body {other:?}"),
        }
    }

    #[test]
    fn test_decode_rejects_malformed() {
        // unknown type
        assert!(Envelope::decode(json!({"type": "PING", "source": "HOST", "timestamp": 1})).is_none());
        // unknown source
        assert!(Envelope::decode(json!({"type": "EVENT", "event": "x", "source": "OTHER", "timestamp": 1})).is_none());
        // missing timestamp
        assert!(Envelope::decode(json!({"type": "EVENT", "event": "x", "source": "HOST"})).is_none());
        // unrelated window traffic
        assert!(Envelope::decode(json!("webpackHotUpdate")).is_none());
        assert!(Envelope::decode(json!({"vite": "reload"})).is_none());
    }

    #[test]
    fn test_route_accessor() {
        let body = MessageBody::RouteSync { route: "/a/2".into() };
        assert_eq!(body.route(), Some("/a/2"));
        assert_eq!(MessageBody::Unmount { props: None }.route(), None);
        assert_eq!(body.kind().to_string(), "ROUTE_SYNC");
    }
}
