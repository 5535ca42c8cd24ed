//! Wire protocol between host and bridge.
//!
//! Commands and responses are plain strings. Control traffic is a JSON object
//! tagged by `cmd`:
//!
//! ```text
//! host   -> bridge  {"cmd":"initialize","moduleRef":"gforth"}
//! bridge -> host    {"cmd":"ready"}
//! host   -> bridge  "3 SQUARE ."
//! bridge -> host    "9 ok"
//! bridge -> host    {"cmd":"error","kind":"timeout","detail":"..."}
//! ```

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::BridgeState;
use crate::error::{BridgeError, ErrorKind};

/// Control messages the host may send.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "cmd", rename_all = "lowercase")]
pub enum Control {
    /// Load the engine. Without a module the configured default is used.
    #[serde(alias = "init")]
    Initialize {
        #[serde(
            rename = "moduleRef",
            default,
            skip_serializing_if = "Option::is_none"
        )]
        module_ref: Option<String>,
    },
    /// Report the bridge state. Answered in every state.
    Status,
}

/// Everything that can arrive on the bridge's inbound channel.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    Control(Control),
    Command(String),
    /// A frame that could not be decoded. Answered with an error in sequence.
    Malformed(String),
}

impl Inbound {
    pub fn initialize(module_ref: &str) -> Self {
        Inbound::Control(Control::Initialize {
            module_ref: Some(module_ref.to_string()),
        })
    }

    pub fn command(text: &str) -> Self {
        Inbound::Command(text.to_string())
    }

    /// Decode one JSON frame. Never fails: bad frames become `Malformed`.
    pub fn decode(frame: &str) -> Self {
        match serde_json::from_str::<Value>(frame) {
            Ok(Value::String(text)) => Inbound::Command(text),
            Ok(value @ Value::Object(_)) => match serde_json::from_value::<Control>(value) {
                Ok(control) => Inbound::Control(control),
                Err(e) => Inbound::Malformed(e.to_string()),
            },
            Ok(other) => {
                Inbound::Malformed(format!("expected a string or an object, got `{other}`"))
            }
            Err(e) => Inbound::Malformed(e.to_string()),
        }
    }

    pub fn encode(&self) -> serde_json::Result<String> {
        match self {
            Inbound::Control(control) => serde_json::to_string(control),
            Inbound::Command(text) | Inbound::Malformed(text) => serde_json::to_string(text),
        }
    }
}

/// Structured messages the bridge sends back.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "cmd", rename_all = "lowercase")]
pub enum Notice {
    /// Sent once, after the engine loaded.
    Ready,
    Error {
        kind: ErrorKind,
        detail: String,
    },
    Status {
        state: BridgeState,
        module: Option<String>,
        pending: usize,
    },
}

impl From<&BridgeError> for Notice {
    fn from(err: &BridgeError) -> Self {
        Notice::Error {
            kind: err.kind(),
            detail: err.to_string(),
        }
    }
}

/// Everything the bridge can send to the host.
#[derive(Debug, Clone, PartialEq)]
pub enum Outbound {
    Notice(Notice),
    /// Non-empty engine output, verbatim.
    Response(String),
}

impl Outbound {
    pub fn encode(&self) -> serde_json::Result<String> {
        match self {
            Outbound::Notice(notice) => serde_json::to_string(notice),
            Outbound::Response(text) => serde_json::to_string(text),
        }
    }

    pub fn decode(frame: &str) -> Result<Self, BridgeError> {
        match serde_json::from_str::<Value>(frame) {
            Ok(Value::String(text)) => Ok(Outbound::Response(text)),
            Ok(value @ Value::Object(_)) => serde_json::from_value(value)
                .map(Outbound::Notice)
                .map_err(|e| BridgeError::Malformed(e.to_string())),
            Ok(other) => Err(BridgeError::Malformed(format!(
                "expected a string or an object, got `{other}`"
            ))),
            Err(e) => Err(BridgeError::Malformed(e.to_string())),
        }
    }

    pub fn is_ready(&self) -> bool {
        matches!(self, Outbound::Notice(Notice::Ready))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_string_is_command() {
        assert_eq!(
            Inbound::decode(r#""3 SQUARE .""#),
            Inbound::command("3 SQUARE .")
        );
    }

    #[test]
    fn decode_initialize() {
        assert_eq!(
            Inbound::decode(r#"{"cmd":"initialize","moduleRef":"engine-x"}"#),
            Inbound::initialize("engine-x")
        );
    }

    #[test]
    fn decode_init_alias_without_module() {
        assert_eq!(
            Inbound::decode(r#"{"cmd":"init"}"#),
            Inbound::Control(Control::Initialize { module_ref: None })
        );
    }

    #[test]
    fn decode_status() {
        assert_eq!(
            Inbound::decode(r#"{"cmd":"status"}"#),
            Inbound::Control(Control::Status)
        );
    }

    #[test]
    fn decode_unknown_cmd_is_malformed() {
        assert!(matches!(
            Inbound::decode(r#"{"cmd":"reboot"}"#),
            Inbound::Malformed(_)
        ));
    }

    #[test]
    fn decode_number_is_malformed() {
        match Inbound::decode("42") {
            Inbound::Malformed(reason) => assert!(reason.contains("42")),
            other => panic!("expected malformed, got {other:?}"),
        }
    }

    #[test]
    fn decode_bare_text_is_malformed() {
        assert!(matches!(Inbound::decode("WORDS"), Inbound::Malformed(_)));
    }

    #[test]
    fn ready_encodes_exactly() {
        let out = Outbound::Notice(Notice::Ready);
        assert_eq!(out.encode().unwrap(), r#"{"cmd":"ready"}"#);
    }

    #[test]
    fn error_encodes_with_kind_and_detail() {
        let out = Outbound::Notice(Notice::Error {
            kind: ErrorKind::NotReady,
            detail: "engine not ready".to_string(),
        });
        assert_eq!(
            out.encode().unwrap(),
            r#"{"cmd":"error","kind":"not_ready","detail":"engine not ready"}"#
        );
    }

    #[test]
    fn response_encodes_as_string() {
        let out = Outbound::Response("9 ok\n".to_string());
        assert_eq!(out.encode().unwrap(), r#""9 ok\n""#);
    }

    #[test]
    fn status_encodes_state() {
        let out = Outbound::Notice(Notice::Status {
            state: BridgeState::Ready,
            module: Some("engine-x".to_string()),
            pending: 0,
        });
        assert_eq!(
            out.encode().unwrap(),
            r#"{"cmd":"status","state":"ready","module":"engine-x","pending":0}"#
        );
    }

    #[test]
    fn outbound_decode_recovers_notice() {
        let out = Outbound::decode(r#"{"cmd":"error","kind":"load","detail":"x"}"#).unwrap();
        assert_eq!(
            out,
            Outbound::Notice(Notice::Error {
                kind: ErrorKind::Load,
                detail: "x".to_string(),
            })
        );
        assert!(Outbound::decode(r#"{"cmd":"ready"}"#).unwrap().is_ready());
    }

    #[test]
    fn initialize_encodes_module_ref() {
        assert_eq!(
            Inbound::initialize("engine-x").encode().unwrap(),
            r#"{"cmd":"initialize","moduleRef":"engine-x"}"#
        );
    }
}
