//! Gateway wire packet types.
//!
//! Every frame is a JSON object `{ s, d, sn? }` where the number `s`
//! distinguishes the packet kind, optionally zlib-compressed when the
//! gateway was asked for compression.

mod types;

pub use types::{Hello, Payload, Reconnect, ResumeAck, Sn};

use bytes::Bytes;
use enum_as_inner::EnumAsInner;
use miniz_oxide::inflate::{self, TINFLStatus};
use serde::{Deserialize, Serialize};
use snafu::prelude::*;

use super::event::EventData;

/// Error when parse binary data as packet
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(super)), module(error), context(suffix(false)))]
pub enum ParsePacketError {
    /// Decompress data failed
    #[snafu(display("decompress packet failed: {status:?}"))]
    DecompressFailed {
        /// data for decode
        data: Bytes,
        /// decompress error status code
        status: TINFLStatus,
    },

    /// data is invalid json
    #[snafu(display("parse json failed: {source:?}"))]
    ParseJsonFailed {
        /// data for decode
        data: Bytes,
        /// source error
        source: serde_json::Error,
    },

    /// data json is not an object
    #[snafu(display("parsed packet is not object: {json}"))]
    PacketNotObject {
        /// json string
        json: String,
    },

    /// data json has no opcode(s) field
    #[snafu(display("packet has no opcode(s) field: {json}"))]
    NoOpcode {
        /// json string
        json: String,
    },

    /// data json opcode field is not number type
    #[snafu(display("packet has non-number s field: {json}"))]
    OpcodeNotNumber {
        /// json string
        json: String,
    },

    /// data json has an unknown opcode
    #[snafu(display("packet has unknown opcode {opcode}"))]
    UnknownOpcode {
        /// opcode number
        opcode: i64,
    },

    /// data json is not a valid typed packet
    #[snafu(display("parse to {type_name} packet failed: {source}"))]
    ParseTypedPacketFailed {
        /// type name
        type_name: String,
        /// source error
        source: serde_json::Error,
    },
}

impl ParsePacketError {
    /// Whether this failure must tear the connection down.
    ///
    /// An unknown opcode is ignorable per the gateway contract; anything
    /// else means the frame stream itself cannot be trusted.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Self::UnknownOpcode { .. })
    }
}

static PACKET_INTERNAL_TYPE_TAG: &str = "__internal_type_tag__";

/// Gateway websocket protocol packet type
#[derive(Debug, Clone, Serialize, Deserialize, EnumAsInner)]
// serde does not support number tag for now, see: https://github.com/serde-rs/serde/issues/745
#[serde(tag = "__internal_type_tag__")]
pub enum Packet {
    /// Event, server -> client
    Event(EventData),
    /// Hello, server -> client
    Hello(Payload<Hello>),
    /// Ping, client -> server
    Ping(Sn),
    /// Pong, server -> client
    Pong,
    /// Resume, client -> server
    Resume(Sn),
    /// Reconnect, server -> client
    Reconnect(Payload<Reconnect>),
    /// ResumeAck, server -> client
    ResumeAck(Payload<ResumeAck>),
}

impl Packet {
    /// Decode raw frame data to a packet, inflating first when `compressed`.
    pub fn decode(mut buff: Bytes, compressed: bool) -> Result<Self, ParsePacketError> {
        if compressed {
            buff = inflate::decompress_to_vec_zlib(&buff)
                .map_err(|status| ParsePacketError::DecompressFailed {
                    data: buff.clone(),
                    status,
                })?
                .into();
        }

        let mut value: serde_json::Value =
            serde_json::from_slice(&buff).context(error::ParseJsonFailed { data: buff.clone() })?;

        let obj = value.as_object_mut().with_context(|| error::PacketNotObject {
            json: String::from_utf8_lossy(&buff),
        })?;

        let s = obj
            .get("s")
            .with_context(|| error::NoOpcode {
                json: String::from_utf8_lossy(&buff),
            })?
            .as_i64()
            .with_context(|| error::OpcodeNotNumber {
                json: String::from_utf8_lossy(&buff),
            })?;

        let type_name =
            Self::opcode_to_type_name(s).with_context(|| error::UnknownOpcode { opcode: s })?;

        obj.insert(
            PACKET_INTERNAL_TYPE_TAG.to_string(),
            serde_json::Value::String(type_name.to_string()),
        );

        serde_json::from_value(value).with_context(|_| error::ParseTypedPacketFailed {
            type_name: type_name.to_string(),
        })
    }

    /// encode packet to binary frame data (without compress)
    pub fn encode(&self) -> Vec<u8> {
        let mut value = serde_json::to_value(self).unwrap();
        let obj = value.as_object_mut().unwrap();
        obj.remove(PACKET_INTERNAL_TYPE_TAG);
        obj.insert(
            "s".to_string(),
            serde_json::Value::Number(self.opcode().into()),
        );
        serde_json::to_vec(&value).unwrap()
    }

    fn opcode_to_type_name(s: i64) -> Option<&'static str> {
        match s {
            0 => Some("Event"),
            1 => Some("Hello"),
            2 => Some("Ping"),
            3 => Some("Pong"),
            4 => Some("Resume"),
            5 => Some("Reconnect"),
            6 => Some("ResumeAck"),
            _ => None,
        }
    }

    /// get opcode number
    pub fn opcode(&self) -> i64 {
        match self {
            Self::Event(_) => 0,
            Self::Hello(_) => 1,
            Self::Ping(_) => 2,
            Self::Pong => 3,
            Self::Resume(_) => 4,
            Self::Reconnect(_) => 5,
            Self::ResumeAck(_) => 6,
        }
    }

    /// get packet type name
    pub fn type_name(&self) -> &'static str {
        Self::opcode_to_type_name(self.opcode()).unwrap()
    }
}

#[cfg(test)]
mod test {
    mod decode {
        use super::super::*;
        use serde_json::json;

        fn frame(value: serde_json::Value) -> Bytes {
            serde_json::to_vec(&value).unwrap().into()
        }

        #[test]
        fn test_packet_decode_hello() {
            let data = frame(json!({
                "s": 1,
                "d": {
                    "code": 0,
                    "session_id": "some-session-id",
                },
            }));

            let packet = Packet::decode(data, false).unwrap();

            if let Packet::Hello(hello) = packet {
                assert_eq!(hello.data.code, 0);
                assert_eq!(hello.data.session_id.unwrap(), "some-session-id");
            } else {
                panic!("decoded packet is not hello")
            }
        }

        #[test]
        fn test_packet_decode_event() {
            let data = frame(json!({
                "s": 0,
                "sn": 12,
                "d": { "content": "hi" },
            }));

            let packet = Packet::decode(data, false).unwrap();

            if let Packet::Event(event) = packet {
                assert_eq!(event.sn, 12);
                assert_eq!(event.event["content"], "hi");
            } else {
                panic!("decoded packet is not event")
            }
        }

        #[test]
        fn test_packet_decode_pong() {
            let data = frame(json!({ "s": 3 }));

            let packet = Packet::decode(data, false).unwrap();

            assert!(matches!(packet, Packet::Pong));
        }

        #[test]
        fn test_packet_decode_reconnect() {
            let data = frame(json!({
                "s": 5,
                "d": {
                    "code": 41008,
                    "err": "Missing params",
                },
            }));

            let packet = Packet::decode(data, false).unwrap();

            if let Packet::Reconnect(reconnect) = packet {
                assert_eq!(reconnect.data.code, 41008);
                assert_eq!(reconnect.data.err, "Missing params");
            } else {
                panic!("decoded packet is not reconnect")
            }
        }

        #[test]
        fn test_packet_decode_resume_ack() {
            let data = frame(json!({
                "s": 6,
                "d": {
                    "session_id": "some-session-id",
                }
            }));

            let packet = Packet::decode(data, false).unwrap();

            if let Packet::ResumeAck(resume_ack) = packet {
                assert_eq!(resume_ack.data.session_id, "some-session-id");
            } else {
                panic!("decoded packet is not resume ack")
            }
        }

        #[test]
        fn test_packet_decode_unknown_opcode_is_not_fatal() {
            let data = frame(json!({ "s": 42 }));

            let err = Packet::decode(data, false).unwrap_err();

            assert!(matches!(err, ParsePacketError::UnknownOpcode { opcode: 42 }));
            assert!(!err.is_fatal());
        }

        #[test]
        fn test_packet_decode_non_object_is_fatal() {
            let data = frame(json!([1, 2, 3]));

            let err = Packet::decode(data, false).unwrap_err();

            assert!(matches!(err, ParsePacketError::PacketNotObject { .. }));
            assert!(err.is_fatal());
        }

        #[test]
        fn test_packet_decode_garbage_is_fatal() {
            let err = Packet::decode(Bytes::from_static(b"\x01\x02not json"), false).unwrap_err();

            assert!(matches!(err, ParsePacketError::ParseJsonFailed { .. }));
            assert!(err.is_fatal());
        }
    }

    mod encode {
        use super::super::*;

        #[test]
        fn test_packet_encode_ping_carries_opcode_and_sn() {
            let packet = Packet::Ping(Sn { sn: 6 });

            let value: serde_json::Value = serde_json::from_slice(&packet.encode()).unwrap();

            assert_eq!(value["s"], 2);
            assert_eq!(value["sn"], 6);
        }
    }
}
