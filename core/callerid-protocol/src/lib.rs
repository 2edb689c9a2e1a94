//! Wire types shared by the caller-ID core and its lookup engine.
//!
//! Two contracts live here so both sides agree on one schema:
//!
//! - the lookup channel (`lookupLabel` request, response envelope, and the
//!   three-way reply classification the overlay relies on)
//! - the persisted phone-book payload handed across process boundaries
//!   (`{"entries":[{"number":"...","label":"..."}]}`)

use chrono::DateTime;
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const PROTOCOL_VERSION: u32 = 1;
pub const MAX_PAYLOAD_BYTES: usize = 8 * 1024 * 1024; // 8MB

/// Error code a lookup engine answers with while its handler is not attached yet.
pub const NOT_IMPLEMENTED_CODE: &str = "not_implemented";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub enum Method {
    LookupLabel,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Request {
    pub protocol_version: u32,
    pub method: Method,
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub args: Option<Value>,
}

impl Request {
    pub fn lookup_label(id: Option<String>, number: &str) -> Self {
        Self {
            protocol_version: PROTOCOL_VERSION,
            method: Method::LookupLabel,
            id,
            args: Some(serde_json::json!({ "number": number })),
        }
    }

    /// Extracts the `number` argument of a `lookupLabel` request.
    pub fn number(&self) -> Result<&str, ErrorInfo> {
        if self.protocol_version != PROTOCOL_VERSION {
            return Err(ErrorInfo::new(
                "protocol_mismatch",
                format!(
                    "protocol_version {} is not supported (expected {})",
                    self.protocol_version, PROTOCOL_VERSION
                ),
            ));
        }
        self.args
            .as_ref()
            .and_then(|args| args.get("number"))
            .and_then(Value::as_str)
            .ok_or_else(|| ErrorInfo::new("missing_field", "number is required"))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorInfo>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct ErrorInfo {
    pub code: String,
    pub message: String,
}

impl ErrorInfo {
    pub fn new(code: &str, message: impl Into<String>) -> Self {
        Self {
            code: code.to_string(),
            message: message.into(),
        }
    }
}

impl Response {
    pub fn ok(id: Option<String>, data: Value) -> Self {
        Self {
            ok: true,
            id,
            data: Some(data),
            error: None,
        }
    }

    pub fn label(id: Option<String>, label: impl Into<String>) -> Self {
        Self::ok(id, Value::String(label.into()))
    }

    pub fn error(id: Option<String>, code: &str, message: impl Into<String>) -> Self {
        Self {
            ok: false,
            id,
            data: None,
            error: Some(ErrorInfo::new(code, message)),
        }
    }

    pub fn not_implemented(id: Option<String>) -> Self {
        Self::error(id, NOT_IMPLEMENTED_CODE, "lookup handler is not attached")
    }

    pub fn from_reply(id: Option<String>, reply: LookupReply) -> Self {
        match reply {
            LookupReply::Label(label) => Self::label(id, label),
            LookupReply::Error { code, message } => Self::error(id, &code, message),
            LookupReply::NotReady => Self::not_implemented(id),
        }
    }

    /// Classifies the envelope into the three outcomes the caller acts on.
    ///
    /// Non-string success data is treated as an empty label, matching engines
    /// that answer `null` for unknown numbers.
    pub fn into_reply(self) -> LookupReply {
        if self.ok {
            let label = match self.data {
                Some(Value::String(label)) => label,
                _ => String::new(),
            };
            return LookupReply::Label(label);
        }

        match self.error {
            Some(info) if info.code == NOT_IMPLEMENTED_CODE => LookupReply::NotReady,
            Some(info) => LookupReply::Error {
                code: info.code,
                message: info.message,
            },
            None => LookupReply::Error {
                code: "unknown".to_string(),
                message: "error response without details".to_string(),
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LookupReply {
    Label(String),
    Error { code: String, message: String },
    NotReady,
}

// ─────────────────────────────────────────────────────────────────────────────
// Phone-book payload
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhoneBookEntry {
    pub number: String,
    pub label: String,
}

impl PhoneBookEntry {
    pub fn new(number: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            number: number.into(),
            label: label.into(),
        }
    }
}

/// The record set shared between the editing app and the directory provider.
///
/// Entries are kept raw; normalization happens at synchronization time.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhoneBookPayload {
    pub entries: Vec<PhoneBookEntry>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<String>,
}

impl PhoneBookPayload {
    pub fn validate(&self) -> Result<(), ErrorInfo> {
        if let Some(updated_at) = &self.updated_at {
            if DateTime::parse_from_rfc3339(updated_at).is_err() {
                return Err(ErrorInfo::new(
                    "invalid_timestamp",
                    "updated_at must be RFC3339",
                ));
            }
        }
        Ok(())
    }
}

pub fn parse_payload(json: &str) -> Result<PhoneBookPayload, ErrorInfo> {
    if json.len() > MAX_PAYLOAD_BYTES {
        return Err(ErrorInfo::new(
            "payload_too_large",
            format!("payload exceeds {} bytes", MAX_PAYLOAD_BYTES),
        ));
    }
    let payload: PhoneBookPayload = serde_json::from_str(json).map_err(|err| {
        ErrorInfo::new("bad_args", format!("payload is invalid JSON: {}", err))
    })?;
    payload.validate()?;
    Ok(payload)
}
