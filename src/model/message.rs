//! Wire-protocol frames (§4.1): JSON arrays, one per WebSocket text frame.

use serde_json::Value;

use super::event::Event;
use super::filter::Filter;

/// A subscription identifier. The protocol imposes no structure beyond a length bound,
/// enforced by the message handler rather than this type.
pub type SubscriptionId = String;

/// Frames sent by clients, received by the relay.
#[derive(Debug, Clone)]
pub enum ClientMessage {
    Event(Box<Event>),
    Req {
        subscription_id: SubscriptionId,
        filters: Vec<Filter>,
    },
    Count {
        subscription_id: SubscriptionId,
        filters: Vec<Filter>,
    },
    Close(SubscriptionId),
    Auth(Box<Event>),
    NegOpen {
        subscription_id: SubscriptionId,
        filter: Box<Filter>,
        initial_message: String,
    },
    NegMsg {
        subscription_id: SubscriptionId,
        message: String,
    },
    NegClose {
        subscription_id: SubscriptionId,
    },
}

/// Error decoding a client frame: carries enough to compose a `NOTICE`, never closes the
/// connection (§4.1 framing contract).
#[derive(Debug, thiserror::Error)]
#[error("{0}")]
pub struct FrameError(pub String);

impl ClientMessage {
    /// Parse a single JSON-array text frame.
    pub fn from_json(json: &str) -> Result<Self, FrameError> {
        let value: Value = serde_json::from_str(json).map_err(|e| FrameError(e.to_string()))?;
        let arr = value
            .as_array()
            .ok_or_else(|| FrameError("expected a JSON array".to_string()))?;
        let verb = arr
            .first()
            .and_then(Value::as_str)
            .ok_or_else(|| FrameError("missing verb".to_string()))?;

        let parse_event = |v: &Value| -> Result<Box<Event>, FrameError> {
            serde_json::from_value(v.clone())
                .map(Box::new)
                .map_err(|e| FrameError(format!("invalid event: {e}")))
        };
        let parse_filter = |v: &Value| -> Result<Filter, FrameError> {
            serde_json::from_value(v.clone()).map_err(|e| FrameError(format!("invalid filter: {e}")))
        };
        let parse_string =
            |v: Option<&Value>, what: &str| -> Result<String, FrameError> {
                v.and_then(Value::as_str)
                    .map(str::to_string)
                    .ok_or_else(|| FrameError(format!("missing {what}")))
            };

        match verb {
            "EVENT" => {
                let event = arr
                    .get(1)
                    .ok_or_else(|| FrameError("EVENT: missing event".to_string()))?;
                Ok(Self::Event(parse_event(event)?))
            }
            "REQ" => {
                let subscription_id = parse_string(arr.get(1), "subscription id")?;
                let filters = arr[2..]
                    .iter()
                    .map(parse_filter)
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(Self::Req {
                    subscription_id,
                    filters,
                })
            }
            "COUNT" => {
                let subscription_id = parse_string(arr.get(1), "subscription id")?;
                let filters = arr[2..]
                    .iter()
                    .map(parse_filter)
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(Self::Count {
                    subscription_id,
                    filters,
                })
            }
            "CLOSE" => Ok(Self::Close(parse_string(arr.get(1), "subscription id")?)),
            "AUTH" => {
                let event = arr
                    .get(1)
                    .ok_or_else(|| FrameError("AUTH: missing event".to_string()))?;
                Ok(Self::Auth(parse_event(event)?))
            }
            "NEG-OPEN" => Ok(Self::NegOpen {
                subscription_id: parse_string(arr.get(1), "subscription id")?,
                filter: Box::new(
                    arr.get(2)
                        .map(parse_filter)
                        .transpose()?
                        .unwrap_or_default(),
                ),
                initial_message: parse_string(arr.get(3), "initial message")?,
            }),
            "NEG-MSG" => Ok(Self::NegMsg {
                subscription_id: parse_string(arr.get(1), "subscription id")?,
                message: parse_string(arr.get(2), "message")?,
            }),
            "NEG-CLOSE" => Ok(Self::NegClose {
                subscription_id: parse_string(arr.get(1), "subscription id")?,
            }),
            other => Err(FrameError(format!("unknown verb: {other}"))),
        }
    }
}

/// Frames sent by the relay, received by clients.
#[derive(Debug, Clone)]
pub enum RelayMessage {
    Event {
        subscription_id: SubscriptionId,
        event: Box<Event>,
    },
    Ok {
        event_id: String,
        status: bool,
        message: String,
    },
    Eose(SubscriptionId),
    Closed {
        subscription_id: SubscriptionId,
        message: String,
    },
    Notice(String),
    Count {
        subscription_id: SubscriptionId,
        count: usize,
    },
    Auth {
        challenge: String,
    },
    NegMsg {
        subscription_id: SubscriptionId,
        message: String,
    },
    NegErr {
        subscription_id: SubscriptionId,
        message: String,
    },
}

impl RelayMessage {
    pub fn event(subscription_id: SubscriptionId, event: Event) -> Self {
        Self::Event {
            subscription_id,
            event: Box::new(event),
        }
    }

    pub fn ok(event_id: String, status: bool, message: impl Into<String>) -> Self {
        Self::Ok {
            event_id,
            status,
            message: message.into(),
        }
    }

    pub fn notice(message: impl Into<String>) -> Self {
        Self::Notice(message.into())
    }

    /// Serialize to the wire JSON array form.
    pub fn as_json(&self) -> String {
        let value = match self {
            Self::Event {
                subscription_id,
                event,
            } => serde_json::json!(["EVENT", subscription_id, event]),
            Self::Ok {
                event_id,
                status,
                message,
            } => serde_json::json!(["OK", event_id, status, message]),
            Self::Eose(sub) => serde_json::json!(["EOSE", sub]),
            Self::Closed {
                subscription_id,
                message,
            } => serde_json::json!(["CLOSED", subscription_id, message]),
            Self::Notice(message) => serde_json::json!(["NOTICE", message]),
            Self::Count {
                subscription_id,
                count,
            } => serde_json::json!(["COUNT", subscription_id, { "count": count }]),
            Self::Auth { challenge } => serde_json::json!(["AUTH", challenge]),
            Self::NegMsg {
                subscription_id,
                message,
            } => serde_json::json!(["NEG-MSG", subscription_id, message]),
            Self::NegErr {
                subscription_id,
                message,
            } => serde_json::json!(["NEG-ERR", subscription_id, message]),
        };
        value.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_req_with_multiple_filters() {
        let json = r#"["REQ","sub1",{"kinds":[1]},{"kinds":[2]}]"#;
        let msg = ClientMessage::from_json(json).unwrap();
        match msg {
            ClientMessage::Req {
                subscription_id,
                filters,
            } => {
                assert_eq!(subscription_id, "sub1");
                assert_eq!(filters.len(), 2);
            }
            _ => panic!("wrong variant"),
        }
    }

    #[test]
    fn unknown_verb_is_an_error_not_a_panic() {
        let err = ClientMessage::from_json(r#"["WAT"]"#).unwrap_err();
        assert!(err.0.contains("unknown verb"));
    }

    #[test]
    fn malformed_json_is_an_error() {
        let err = ClientMessage::from_json("not json").unwrap_err();
        assert!(!err.0.is_empty());
    }

    #[test]
    fn relay_message_ok_shape() {
        let msg = RelayMessage::ok("deadbeef".to_string(), true, "");
        assert_eq!(msg.as_json(), r#"["OK","deadbeef",true,""]"#);
    }
}
