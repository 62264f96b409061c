use codee::{Decoder, Encoder};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ProtocolError;

/// Separator between concatenated Engine.IO packets in one transport payload.
pub const RECORD_SEPARATOR: char = '\x1e';

/// Default Socket.IO namespace.
pub const DEFAULT_NAMESPACE: &str = "/";

/// Endpoint path of an Engine.IO server.
pub const ENGINE_IO_PATH: &str = "/socket.io/";

/// Query selecting protocol v4 directly over WebSocket, skipping polling.
pub const ENGINE_IO_QUERY: &str = "EIO=4&transport=websocket";

/// Server handshake carried by the Engine.IO `open` packet.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct OpenHandshake {
    /// Engine.IO session id
    pub sid: String,
    /// Transports the server offers to upgrade to
    #[serde(default)]
    pub upgrades: Vec<String>,
    /// Milliseconds between server pings
    #[serde(default = "default_ping_interval")]
    pub ping_interval: u64,
    /// Milliseconds the server waits for a pong before dropping us
    #[serde(default = "default_ping_timeout")]
    pub ping_timeout: u64,
    /// Largest payload the server accepts, in bytes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_payload: Option<u64>,
}

fn default_ping_interval() -> u64 {
    25_000
}

fn default_ping_timeout() -> u64 {
    20_000
}

/// One decoded Engine.IO packet, with Socket.IO messages unpacked.
#[derive(Clone, Debug, PartialEq)]
pub enum Frame {
    /// `0{...}` server handshake
    Open(OpenHandshake),
    /// `1`
    Close,
    /// `2` with optional data to echo
    Ping(String),
    /// `3` echoing the ping's data
    Pong(String),
    /// `5`
    Upgrade,
    /// `6`
    Noop,
    /// `40` namespace connect, or the server's connect acknowledgement
    Connect {
        /// Socket.IO namespace
        namespace: String,
        /// Auth data on a request, `{"sid": ...}` on an acknowledgement
        payload: Option<Value>,
    },
    /// `41`
    Disconnect {
        /// Socket.IO namespace
        namespace: String,
    },
    /// `42["name", ...args]`
    Event {
        /// Socket.IO namespace
        namespace: String,
        /// Set when the sender wants an acknowledgement
        ack_id: Option<u64>,
        /// Event name, the first array element
        name: String,
        /// Remaining array elements
        args: Vec<Value>,
    },
    /// `43<id>[...args]`
    Ack {
        /// Socket.IO namespace
        namespace: String,
        /// Id of the event being acknowledged
        ack_id: u64,
        /// Acknowledgement arguments
        args: Vec<Value>,
    },
    /// `44{"message": ...}`
    ConnectError {
        /// Socket.IO namespace
        namespace: String,
        /// Reason given by the server
        message: String,
    },
}

impl Frame {
    /// Namespace connect request for the default namespace.
    pub fn connect() -> Self {
        Frame::Connect {
            namespace: DEFAULT_NAMESPACE.to_string(),
            payload: None,
        }
    }

    /// Event on the default namespace without an acknowledgement id.
    pub fn event(name: impl Into<String>, args: Vec<Value>) -> Self {
        Frame::Event {
            namespace: DEFAULT_NAMESPACE.to_string(),
            ack_id: None,
            name: name.into(),
            args,
        }
    }

    /// Pong answering `ping`, echoing its data.
    pub fn pong_for(ping: &str) -> Self {
        Frame::Pong(ping.to_string())
    }

    /// Splits a transport payload and decodes each packet.
    ///
    /// Packets that fail to decode are returned as errors in place so one
    /// bad packet does not hide the others.
    pub fn decode_payload(payload: &str) -> Vec<Result<Frame, ProtocolError>> {
        split_payload(payload).map(decode_frame).collect()
    }
}

/// Splits a payload on the record separator, skipping empty records.
pub fn split_payload(payload: &str) -> impl Iterator<Item = &str> {
    payload
        .split(RECORD_SEPARATOR)
        .filter(|packet| !packet.is_empty())
}

/// Decodes a single Engine.IO packet.
pub fn decode_frame(packet: &str) -> Result<Frame, ProtocolError> {
    let mut chars = packet.chars();
    let kind = chars.next().ok_or(ProtocolError::Empty)?;
    let rest = chars.as_str();

    match kind {
        '0' => Ok(Frame::Open(serde_json::from_str(rest)?)),
        '1' => Ok(Frame::Close),
        '2' => Ok(Frame::Ping(rest.to_string())),
        '3' => Ok(Frame::Pong(rest.to_string())),
        '4' => decode_message(rest),
        '5' => Ok(Frame::Upgrade),
        '6' => Ok(Frame::Noop),
        other => Err(ProtocolError::UnknownPacketType(other)),
    }
}

/// Encodes a single Engine.IO packet.
pub fn encode_frame(frame: &Frame) -> Result<String, ProtocolError> {
    let encoded = match frame {
        Frame::Open(handshake) => format!("0{}", serde_json::to_string(handshake)?),
        Frame::Close => "1".to_string(),
        Frame::Ping(data) => format!("2{data}"),
        Frame::Pong(data) => format!("3{data}"),
        Frame::Upgrade => "5".to_string(),
        Frame::Noop => "6".to_string(),
        Frame::Connect { namespace, payload } => {
            let mut out = format!("40{}", namespace_prefix(namespace, payload.is_some()));
            if let Some(payload) = payload {
                out.push_str(&serde_json::to_string(payload)?);
            }
            out
        }
        Frame::Disconnect { namespace } => format!("41{}", namespace_prefix(namespace, false)),
        Frame::Event {
            namespace,
            ack_id,
            name,
            args,
        } => {
            let mut items = Vec::with_capacity(args.len() + 1);
            items.push(Value::String(name.clone()));
            items.extend(args.iter().cloned());
            format!(
                "42{}{}{}",
                namespace_prefix(namespace, true),
                ack_id.map(|id| id.to_string()).unwrap_or_default(),
                serde_json::to_string(&items)?
            )
        }
        Frame::Ack {
            namespace,
            ack_id,
            args,
        } => format!(
            "43{}{}{}",
            namespace_prefix(namespace, true),
            ack_id,
            serde_json::to_string(args)?
        ),
        Frame::ConnectError { namespace, message } => format!(
            "44{}{}",
            namespace_prefix(namespace, true),
            serde_json::to_string(&serde_json::json!({ "message": message }))?
        ),
    };
    Ok(encoded)
}

fn namespace_prefix(namespace: &str, has_more: bool) -> String {
    if namespace.is_empty() || namespace == DEFAULT_NAMESPACE {
        String::new()
    } else if has_more {
        format!("{namespace},")
    } else {
        namespace.to_string()
    }
}

/// Decodes the Socket.IO packet carried by an Engine.IO `message`.
fn decode_message(body: &str) -> Result<Frame, ProtocolError> {
    let mut chars = body.chars();
    let kind = chars
        .next()
        .ok_or_else(|| ProtocolError::Unsupported("plain engine message".into()))?;
    let rest = chars.as_str();

    let (namespace, rest) = split_namespace(rest);
    let digits = rest.bytes().take_while(u8::is_ascii_digit).count();
    let (ack_digits, data) = rest.split_at(digits);
    let ack_id = if ack_digits.is_empty() {
        None
    } else {
        Some(
            ack_digits
                .parse::<u64>()
                .map_err(|err| ProtocolError::InvalidPayload(err.to_string()))?,
        )
    };

    match kind {
        '0' => {
            let payload = if data.is_empty() {
                None
            } else {
                Some(serde_json::from_str(data)?)
            };
            Ok(Frame::Connect { namespace, payload })
        }
        '1' => Ok(Frame::Disconnect { namespace }),
        '2' => {
            let mut items: Vec<Value> = serde_json::from_str(data)?;
            if items.is_empty() {
                return Err(ProtocolError::InvalidPayload("event without a name".into()));
            }
            let name = match items.remove(0) {
                Value::String(name) => name,
                other => {
                    return Err(ProtocolError::InvalidPayload(format!(
                        "event name must be a string, got {other}"
                    )));
                }
            };
            Ok(Frame::Event {
                namespace,
                ack_id,
                name,
                args: items,
            })
        }
        '3' => {
            let ack_id = ack_id
                .ok_or_else(|| ProtocolError::InvalidPayload("ack without an id".into()))?;
            Ok(Frame::Ack {
                namespace,
                ack_id,
                args: serde_json::from_str(data)?,
            })
        }
        '4' => {
            let message = match serde_json::from_str::<Value>(data) {
                Ok(Value::Object(map)) => map
                    .get("message")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
                Ok(Value::String(message)) => message,
                _ => data.to_string(),
            };
            Ok(Frame::ConnectError { namespace, message })
        }
        '5' | '6' => Err(ProtocolError::Unsupported("binary packets".into())),
        other => Err(ProtocolError::UnknownPacketType(other)),
    }
}

fn split_namespace(rest: &str) -> (String, &str) {
    if !rest.starts_with('/') {
        return (DEFAULT_NAMESPACE.to_string(), rest);
    }
    match rest.find(',') {
        Some(idx) => (rest[..idx].to_string(), &rest[idx + 1..]),
        None => (rest.to_string(), ""),
    }
}

/// Text codec for Engine.IO v4 packets.
///
/// One call handles exactly one packet; use [`split_payload`] first when a
/// transport message may carry several.
pub struct EngineIoCodec;

impl Encoder<Frame> for EngineIoCodec {
    type Error = ProtocolError;
    type Encoded = String;

    fn encode(val: &Frame) -> Result<Self::Encoded, Self::Error> {
        encode_frame(val)
    }
}

impl Decoder<Frame> for EngineIoCodec {
    type Error = ProtocolError;
    type Encoded = str;

    fn decode(val: &Self::Encoded) -> Result<Frame, Self::Error> {
        decode_frame(val)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn decodes_open_handshake() {
        let frame = EngineIoCodec::decode(
            r#"0{"sid":"abc","upgrades":[],"pingInterval":25000,"pingTimeout":5000,"maxPayload":1000000}"#,
        )
        .unwrap();
        let Frame::Open(handshake) = frame else {
            panic!("expected open, got {frame:?}");
        };
        assert_eq!(handshake.sid, "abc");
        assert_eq!(handshake.ping_interval, 25_000);
        assert_eq!(handshake.ping_timeout, 5_000);
        assert_eq!(handshake.max_payload, Some(1_000_000));
    }

    #[test]
    fn open_handshake_fills_defaults() {
        let Frame::Open(handshake) = decode_frame(r#"0{"sid":"x"}"#).unwrap() else {
            panic!("expected open");
        };
        assert_eq!(handshake.ping_interval, 25_000);
        assert_eq!(handshake.ping_timeout, 20_000);
    }

    #[test]
    fn decodes_control_packets() {
        assert_eq!(decode_frame("2").unwrap(), Frame::Ping(String::new()));
        assert_eq!(decode_frame("2check").unwrap(), Frame::Ping("check".into()));
        assert_eq!(decode_frame("3").unwrap(), Frame::Pong(String::new()));
        assert_eq!(decode_frame("1").unwrap(), Frame::Close);
        assert_eq!(decode_frame("6").unwrap(), Frame::Noop);
        assert_eq!(decode_frame("").unwrap_err(), ProtocolError::Empty);
        assert_eq!(
            decode_frame("9").unwrap_err(),
            ProtocolError::UnknownPacketType('9')
        );
    }

    #[test]
    fn decodes_connect_ack_with_sid() {
        let frame = decode_frame(r#"40{"sid":"s1"}"#).unwrap();
        assert_eq!(
            frame,
            Frame::Connect {
                namespace: "/".into(),
                payload: Some(json!({"sid": "s1"})),
            }
        );
        assert_eq!(decode_frame("40").unwrap(), Frame::connect());
    }

    #[test]
    fn decodes_final_movements_event() {
        let frame = decode_frame(
            r#"42["final_movements",{"sequence":[{"commands":[{"id":"left_shoulder_vertical","deg":30}]}]}]"#,
        )
        .unwrap();
        let Frame::Event {
            namespace,
            ack_id,
            name,
            args,
        } = frame
        else {
            panic!("expected event");
        };
        assert_eq!(namespace, "/");
        assert_eq!(ack_id, None);
        assert_eq!(name, "final_movements");
        assert_eq!(args.len(), 1);
        assert_eq!(args[0]["sequence"][0]["commands"][0]["deg"], json!(30));
    }

    #[test]
    fn decodes_namespace_and_ack_id() {
        let frame = decode_frame(r#"42/arm,17["ping_arm"]"#).unwrap();
        assert_eq!(
            frame,
            Frame::Event {
                namespace: "/arm".into(),
                ack_id: Some(17),
                name: "ping_arm".into(),
                args: vec![],
            }
        );
        assert_eq!(
            decode_frame("41/arm").unwrap(),
            Frame::Disconnect {
                namespace: "/arm".into()
            }
        );
    }

    #[test]
    fn connect_error_extracts_message() {
        assert_eq!(
            decode_frame(r#"44{"message":"Not authorized"}"#).unwrap(),
            Frame::ConnectError {
                namespace: "/".into(),
                message: "Not authorized".into(),
            }
        );
    }

    #[test]
    fn rejects_malformed_events() {
        assert!(matches!(
            decode_frame("42[]"),
            Err(ProtocolError::InvalidPayload(_))
        ));
        assert!(matches!(
            decode_frame("42[1,2]"),
            Err(ProtocolError::InvalidPayload(_))
        ));
        assert!(matches!(
            decode_frame("42{not json"),
            Err(ProtocolError::InvalidPayload(_))
        ));
        assert!(matches!(
            decode_frame("45-[]"),
            Err(ProtocolError::Unsupported(_))
        ));
    }

    #[test]
    fn encodes_outbound_frames() {
        assert_eq!(EngineIoCodec::encode(&Frame::connect()).unwrap(), "40");
        assert_eq!(EngineIoCodec::encode(&Frame::pong_for("")).unwrap(), "3");
        assert_eq!(
            EngineIoCodec::encode(&Frame::event("status", vec![json!({"ok": true})])).unwrap(),
            r#"42["status",{"ok":true}]"#
        );
        assert_eq!(
            encode_frame(&Frame::Event {
                namespace: "/arm".into(),
                ack_id: Some(3),
                name: "hello".into(),
                args: vec![],
            })
            .unwrap(),
            r#"42/arm,3["hello"]"#
        );
    }

    #[test]
    fn splits_concatenated_payloads() {
        let results = Frame::decode_payload("2\u{1e}40\u{1e}\u{1e}9");
        assert_eq!(results.len(), 3);
        assert_eq!(results[0], Ok(Frame::Ping(String::new())));
        assert_eq!(results[1], Ok(Frame::connect()));
        assert!(results[2].is_err());
    }
}
