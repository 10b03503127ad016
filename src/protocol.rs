//! CozyLife wire protocol implementation.
//! Encodes and decodes the JSON command envelope shared by UDP discovery and TCP control.

use crate::error::{CozyError, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};

/// Protocol version carried in every envelope. The vendor firmware always sends 0.
pub const PROTOCOL_VERSION: u32 = 0;

/// Broadcast address used for discovery scans.
pub const UDP_SCAN_ADDRESS: &str = "255.255.255.255";
/// Port the devices listen on for discovery broadcasts.
pub const UDP_SCAN_PORT: u16 = 6095;
/// Default local port the discovery socket binds to.
pub const UDP_BIND_PORT: u16 = 5555;
/// Fixed TCP command port every device listens on, independent of the UDP response port.
pub const TCP_COMMAND_PORT: u16 = 5555;

/// Response code signalling success.
pub const RES_SUCCESS: i64 = 0;

/// Command opcodes of the vendor protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum CommandType {
    /// Discovery request and response (devices echo back an Info envelope)
    Info = 0,
    /// Read attribute values
    Query = 2,
    /// Write attribute values
    Set = 3,
    /// Unsolicited status report from the device
    StatusReport = 10,
}

impl CommandType {
    pub fn from_u32(value: u32) -> Option<Self> {
        match value {
            0 => Some(CommandType::Info),
            2 => Some(CommandType::Query),
            3 => Some(CommandType::Set),
            10 => Some(CommandType::StatusReport),
            _ => None,
        }
    }
}

/// Last-known attribute values, keyed by the attribute code as a string.
pub type StatusMap = HashMap<String, Value>;

/// Controllable device properties, transmitted as stringified integer codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Attribute {
    Power = 1,
    Mode = 2,
    Temperature = 3,
    Brightness = 4,
    Hue = 5,
    Saturation = 6,
}

/// Wire value for power on.
pub const POWER_ON: i64 = 255;
/// Wire value for power off.
pub const POWER_OFF: i64 = 0;

impl Attribute {
    /// Numeric attribute code as used in `attr` arrays.
    pub fn code(&self) -> u8 {
        *self as u8
    }

    /// String key as used in `data` maps.
    pub fn key(&self) -> &'static str {
        match self {
            Attribute::Power => "1",
            Attribute::Mode => "2",
            Attribute::Temperature => "3",
            Attribute::Brightness => "4",
            Attribute::Hue => "5",
            Attribute::Saturation => "6",
        }
    }

    pub fn from_key(key: &str) -> Option<Self> {
        match key {
            "1" => Some(Attribute::Power),
            "2" => Some(Attribute::Mode),
            "3" => Some(Attribute::Temperature),
            "4" => Some(Attribute::Brightness),
            "5" => Some(Attribute::Hue),
            "6" => Some(Attribute::Saturation),
            _ => None,
        }
    }
}

/// Typed message payload. The shape is determined by the command code and
/// validated on decode.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    /// Empty object on a scan request; device identity fields on a response.
    Info(Map<String, Value>),
    /// Attribute codes to read; `[0]` means "all attributes".
    Query { attr: Vec<i64> },
    /// Attribute codes being written plus the new values.
    Set { attr: Vec<i64>, data: StatusMap },
    /// Status report carrying current attribute values.
    Report { data: StatusMap },
}

impl Payload {
    /// The command code this payload shape belongs to.
    pub fn command(&self) -> CommandType {
        match self {
            Payload::Info(_) => CommandType::Info,
            Payload::Query { .. } => CommandType::Query,
            Payload::Set { .. } => CommandType::Set,
            Payload::Report { .. } => CommandType::StatusReport,
        }
    }

    /// A QUERY for every attribute the device supports.
    pub fn query_all() -> Self {
        Payload::Query { attr: vec![0] }
    }

    /// A SET whose `attr` list is derived from the patch keys.
    pub fn set_from(patch: StatusMap) -> Self {
        let mut attr: Vec<i64> = patch.keys().filter_map(|k| k.parse().ok()).collect();
        attr.sort_unstable();
        Payload::Set { attr, data: patch }
    }

    fn to_value(&self) -> Value {
        match self {
            Payload::Info(fields) => Value::Object(fields.clone()),
            Payload::Query { attr } => serde_json::json!({ "attr": attr }),
            Payload::Set { attr, data } => serde_json::json!({ "attr": attr, "data": data }),
            Payload::Report { data } => serde_json::json!({ "data": data }),
        }
    }

    fn from_value(cmd: CommandType, msg: Value) -> Result<Self> {
        let obj = match msg {
            Value::Object(obj) => obj,
            other => {
                return Err(CozyError::Decode(format!(
                    "payload for cmd {:?} is not an object: {}",
                    cmd, other
                )));
            }
        };

        match cmd {
            CommandType::Info => Ok(Payload::Info(obj)),
            CommandType::Query => {
                let attr = parse_attr_list(&obj)?;
                Ok(Payload::Query { attr })
            }
            CommandType::Set => {
                let attr = parse_attr_list(&obj)?;
                let data = parse_data_map(&obj)?;
                Ok(Payload::Set { attr, data })
            }
            CommandType::StatusReport => {
                let data = parse_data_map(&obj)?;
                Ok(Payload::Report { data })
            }
        }
    }
}

fn parse_attr_list(obj: &Map<String, Value>) -> Result<Vec<i64>> {
    let list = obj
        .get("attr")
        .and_then(|v| v.as_array())
        .ok_or_else(|| CozyError::Decode("missing or non-array 'attr'".into()))?;
    list.iter()
        .map(|v| {
            v.as_i64()
                .ok_or_else(|| CozyError::Decode(format!("non-integer attr entry: {}", v)))
        })
        .collect()
}

fn parse_data_map(obj: &Map<String, Value>) -> Result<StatusMap> {
    let data = obj
        .get("data")
        .and_then(|v| v.as_object())
        .ok_or_else(|| CozyError::Decode("missing or non-object 'data'".into()))?;
    Ok(data.clone().into_iter().collect())
}

/// Raw JSON shape of the envelope, used for (de)serialization only.
#[derive(Serialize, Deserialize)]
struct WireEnvelope {
    pv: u32,
    cmd: u32,
    sn: String,
    msg: Value,
}

/// One protocol message as sent over UDP or TCP.
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    /// Protocol version, always 0
    pub pv: u32,
    /// Command opcode
    pub cmd: CommandType,
    /// Correlation token; the firmware convention is a timestamp string
    pub sn: String,
    /// Typed payload matching `cmd`
    pub payload: Payload,
}

impl Envelope {
    /// Build an envelope with a fresh timestamp sequence number.
    pub fn new(payload: Payload) -> Self {
        Self {
            pv: PROTOCOL_VERSION,
            cmd: payload.command(),
            sn: sequence_number(),
            payload,
        }
    }

    /// A discovery scan request with an empty payload.
    pub fn scan_request() -> Self {
        Self::new(Payload::Info(Map::new()))
    }

    /// Encode to a JSON byte sequence without framing (UDP datagrams).
    pub fn encode(&self) -> Result<Vec<u8>> {
        let wire = WireEnvelope {
            pv: self.pv,
            cmd: self.cmd as u32,
            sn: self.sn.clone(),
            msg: self.payload.to_value(),
        };
        Ok(serde_json::to_vec(&wire)?)
    }

    /// Encode with the CRLF terminator TCP frames carry.
    pub fn encode_framed(&self) -> Result<Vec<u8>> {
        let mut bytes = self.encode()?;
        bytes.extend_from_slice(b"\r\n");
        Ok(bytes)
    }

    /// Decode an envelope, rejecting malformed JSON, unknown command codes and
    /// payloads whose shape contradicts the declared command.
    pub fn decode(data: &[u8]) -> Result<Self> {
        let wire: WireEnvelope = serde_json::from_slice(data)
            .map_err(|e| CozyError::Decode(format!("invalid envelope JSON: {}", e)))?;
        let cmd = CommandType::from_u32(wire.cmd)
            .ok_or_else(|| CozyError::Decode(format!("unknown command code {}", wire.cmd)))?;
        let payload = Payload::from_value(cmd, wire.msg)?;
        Ok(Self {
            pv: wire.pv,
            cmd,
            sn: wire.sn,
            payload,
        })
    }
}

#[derive(Serialize, Deserialize, Default)]
struct WireResponseMsg {
    #[serde(default)]
    data: StatusMap,
}

#[derive(Serialize, Deserialize)]
struct WireResponse {
    res: i64,
    cmd: u32,
    #[serde(default)]
    msg: WireResponseMsg,
}

/// A device's answer to a QUERY or SET, also the shape of unsolicited status
/// reports: `{ "res": n, "cmd": n, "msg": { "data": { ... } } }`.
#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    /// Response code; 0 signals success
    pub res: i64,
    /// Command opcode the device is answering with
    pub cmd: CommandType,
    /// Current attribute values reported by the device
    pub data: StatusMap,
}

impl Response {
    pub fn is_success(&self) -> bool {
        self.res == RES_SUCCESS
    }

    /// Decode a response frame, tolerating the CRLF terminator.
    pub fn decode(data: &[u8]) -> Result<Self> {
        let trimmed = trim_frame(data);
        let wire: WireResponse = serde_json::from_slice(trimmed)
            .map_err(|e| CozyError::Decode(format!("invalid response JSON: {}", e)))?;
        let cmd = CommandType::from_u32(wire.cmd)
            .ok_or_else(|| CozyError::Decode(format!("unknown command code {}", wire.cmd)))?;
        Ok(Self {
            res: wire.res,
            cmd,
            data: wire.msg.data,
        })
    }

    /// Encode a response frame with the CRLF terminator. Used by device
    /// simulators in tests and demos.
    pub fn encode_framed(&self) -> Result<Vec<u8>> {
        let wire = WireResponse {
            res: self.res,
            cmd: self.cmd as u32,
            msg: WireResponseMsg {
                data: self.data.clone(),
            },
        };
        let mut bytes = serde_json::to_vec(&wire)?;
        bytes.extend_from_slice(b"\r\n");
        Ok(bytes)
    }
}

fn trim_frame(data: &[u8]) -> &[u8] {
    let mut end = data.len();
    while end > 0 && (data[end - 1] == b'\r' || data[end - 1] == b'\n') {
        end -= 1;
    }
    &data[..end]
}

/// Sequence number for outgoing envelopes: the current timestamp in
/// milliseconds, matching the firmware convention. This is a correlation
/// token, not a unique request id.
pub fn sequence_number() -> String {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn envelope_round_trip() {
        let cases = vec![
            Payload::Info(Map::new()),
            Payload::query_all(),
            Payload::Set {
                attr: vec![1],
                data: StatusMap::from([("1".to_string(), json!(255))]),
            },
            Payload::Report {
                data: StatusMap::from([("4".to_string(), json!(80))]),
            },
        ];
        for payload in cases {
            let envelope = Envelope::new(payload);
            let decoded = Envelope::decode(&envelope.encode().unwrap()).unwrap();
            assert_eq!(decoded, envelope);
        }
    }

    #[test]
    fn framed_encoding_ends_with_crlf() {
        let bytes = Envelope::scan_request().encode_framed().unwrap();
        assert!(bytes.ends_with(b"\r\n"));
        Envelope::decode(trim_frame(&bytes)).unwrap();
    }

    #[test]
    fn decode_rejects_malformed_json() {
        let err = Envelope::decode(b"{not json").unwrap_err();
        assert!(matches!(err, CozyError::Decode(_)));
    }

    #[test]
    fn decode_rejects_unknown_command() {
        let bytes = serde_json::to_vec(&json!({"pv": 0, "cmd": 7, "sn": "1", "msg": {}})).unwrap();
        let err = Envelope::decode(&bytes).unwrap_err();
        assert!(matches!(err, CozyError::Decode(_)));
    }

    #[test]
    fn decode_rejects_shape_mismatch() {
        // QUERY without an attr list
        let bytes = serde_json::to_vec(&json!({"pv": 0, "cmd": 2, "sn": "1", "msg": {}})).unwrap();
        assert!(matches!(
            Envelope::decode(&bytes),
            Err(CozyError::Decode(_))
        ));

        // SET whose data is not an object
        let bytes = serde_json::to_vec(
            &json!({"pv": 0, "cmd": 3, "sn": "1", "msg": {"attr": [1], "data": 5}}),
        )
        .unwrap();
        assert!(matches!(
            Envelope::decode(&bytes),
            Err(CozyError::Decode(_))
        ));

        // non-object payload
        let bytes =
            serde_json::to_vec(&json!({"pv": 0, "cmd": 0, "sn": "1", "msg": []})).unwrap();
        assert!(matches!(
            Envelope::decode(&bytes),
            Err(CozyError::Decode(_))
        ));
    }

    #[test]
    fn response_decode() {
        let raw = br#"{"res":0,"cmd":2,"msg":{"data":{"1":255}}}"#;
        let response = Response::decode(raw).unwrap();
        assert!(response.is_success());
        assert_eq!(response.cmd, CommandType::Query);
        assert_eq!(response.data.get("1"), Some(&json!(255)));
    }

    #[test]
    fn response_decode_tolerates_crlf() {
        let raw = b"{\"res\":0,\"cmd\":3,\"msg\":{\"data\":{}}}\r\n";
        let response = Response::decode(raw).unwrap();
        assert_eq!(response.cmd, CommandType::Set);
    }

    #[test]
    fn set_payload_derives_attr_from_patch() {
        let patch = StatusMap::from([
            ("4".to_string(), json!(80)),
            ("1".to_string(), json!(255)),
        ]);
        match Payload::set_from(patch) {
            Payload::Set { attr, data } => {
                assert_eq!(attr, vec![1, 4]);
                assert_eq!(data.len(), 2);
            }
            other => panic!("unexpected payload: {:?}", other),
        }
    }

    #[test]
    fn attribute_key_mapping() {
        for attribute in [
            Attribute::Power,
            Attribute::Mode,
            Attribute::Temperature,
            Attribute::Brightness,
            Attribute::Hue,
            Attribute::Saturation,
        ] {
            assert_eq!(Attribute::from_key(attribute.key()), Some(attribute));
            assert_eq!(attribute.key(), attribute.code().to_string());
        }
        assert_eq!(Attribute::from_key("9"), None);
    }
}
