// Response envelope
//
// Every management endpoint replies with the same JSON shape:
// `{ "data": <object | list | absent>, "error": { "code": N, "description": "..." } }`.
// `code == 0` means success regardless of the HTTP status. The payload is
// kept loosely typed; typed accessors fail with `Error::Decode` instead of
// an unchecked cast.

use serde::de::{self, Deserializer};
use serde::Deserialize;
use serde_json::{Map, Value};

use crate::error::Error;

/// Business codes meaning the authenticated session is no longer valid.
pub const SESSION_EXPIRED_CODES: [i64; 2] = [-401, 1_077_949_069];

/// Wrong user name or password.
pub const WRONG_PASSWORD_CODES: [i64; 3] = [1_077_987_870, 1_077_949_081, 1_077_949_061];

/// The account has been locked after repeated failures.
pub const ACCOUNT_LOCKED_CODES: [i64; 2] = [1_077_949_071, 1_077_987_871];

/// The client address has been locked out.
pub const IP_LOCK_CODE: i64 = 1_077_949_076;

/// Returns `true` if a login rejection with this code should take the
/// backend offline.
pub fn is_lockout_code(code: i64) -> bool {
    WRONG_PASSWORD_CODES.contains(&code) || ACCOUNT_LOCKED_CODES.contains(&code) || code == IP_LOCK_CODE
}

// ── Payload ─────────────────────────────────────────────────────────

/// The `data` member of the envelope.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum Payload {
    Object(Map<String, Value>),
    List(Vec<Value>),
    #[default]
    Absent,
}

impl<'de> Deserialize<'de> for Payload {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        match Value::deserialize(deserializer)? {
            Value::Null => Ok(Self::Absent),
            Value::Object(map) => Ok(Self::Object(map)),
            Value::Array(list) => Ok(Self::List(list)),
            other => Err(de::Error::custom(format!(
                "expected object, list or null data, got {other}"
            ))),
        }
    }
}

impl Payload {
    pub fn is_absent(&self) -> bool {
        matches!(self, Self::Absent)
    }

    /// Borrow the payload as an object.
    pub fn as_object(&self) -> Result<&Map<String, Value>, Error> {
        match self {
            Self::Object(map) => Ok(map),
            other => Err(shape_error("object", other)),
        }
    }

    /// Borrow the payload as a list. An absent payload is an empty list.
    pub fn as_list(&self) -> Result<&[Value], Error> {
        match self {
            Self::List(list) => Ok(list),
            Self::Absent => Ok(&[]),
            other @ Self::Object(_) => Err(shape_error("list", other)),
        }
    }

    pub fn into_object(self) -> Result<Map<String, Value>, Error> {
        match self {
            Self::Object(map) => Ok(map),
            other => Err(shape_error("object", &other)),
        }
    }

    pub fn into_list(self) -> Result<Vec<Value>, Error> {
        match self {
            Self::List(list) => Ok(list),
            Self::Absent => Ok(Vec::new()),
            other @ Self::Object(_) => Err(shape_error("list", &other)),
        }
    }
}

fn shape_error(expected: &str, got: &Payload) -> Error {
    let got = match got {
        Payload::Object(_) => "object",
        Payload::List(_) => "list",
        Payload::Absent => "absent",
    };
    Error::Decode {
        message: format!("expected {expected} data payload, got {got}"),
        body: String::new(),
    }
}

/// Read a string field from an object payload.
pub fn str_field<'a>(map: &'a Map<String, Value>, key: &str) -> Option<&'a str> {
    map.get(key).and_then(Value::as_str)
}

// ── Error info ──────────────────────────────────────────────────────

/// The `error` member of the envelope.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct ErrorInfo {
    #[serde(deserialize_with = "deserialize_code")]
    pub code: i64,
    #[serde(default, deserialize_with = "deserialize_description")]
    pub description: String,
}

/// Firmware versions disagree on the JSON type of `code`.
#[derive(Deserialize)]
#[serde(untagged)]
enum RawCode {
    Int(i64),
    Float(f64),
    Text(String),
}

fn deserialize_code<'de, D: Deserializer<'de>>(deserializer: D) -> Result<i64, D::Error> {
    match RawCode::deserialize(deserializer)? {
        RawCode::Int(code) => Ok(code),
        #[allow(clippy::cast_possible_truncation, clippy::as_conversions)]
        RawCode::Float(code) if code.fract() == 0.0 => Ok(code as i64),
        RawCode::Float(code) => Err(de::Error::custom(format!("non-integral error code {code}"))),
        RawCode::Text(code) => code
            .trim()
            .parse()
            .map_err(|_| de::Error::custom(format!("non-numeric error code {code:?}"))),
    }
}

fn deserialize_description<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    Ok(Option::<String>::deserialize(deserializer)?.unwrap_or_default())
}

// ── Envelope ────────────────────────────────────────────────────────

/// Decoded reply from the array.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ResponseEnvelope {
    #[serde(default)]
    pub data: Payload,
    pub error: ErrorInfo,
}

impl ResponseEnvelope {
    /// Decode a raw response body. A malformed body is a `Decode` error,
    /// never a business error.
    pub fn from_slice(body: &[u8]) -> Result<Self, Error> {
        serde_json::from_slice(body).map_err(|e| Error::decode(e.to_string(), body))
    }

    pub fn code(&self) -> i64 {
        self.error.code
    }

    pub fn description(&self) -> &str {
        &self.error.description
    }

    pub fn is_success(&self) -> bool {
        self.error.code == 0
    }

    /// Returns `true` if the array reports the session has expired.
    pub fn needs_relogin(&self) -> bool {
        SESSION_EXPIRED_CODES.contains(&self.error.code)
    }

    /// Turn a business failure into an error, yielding the payload on success.
    pub fn into_result(self) -> Result<Payload, Error> {
        if self.is_success() {
            Ok(self.data)
        } else if self.needs_relogin() {
            Err(Error::SessionExpired {
                code: self.error.code,
            })
        } else {
            Err(Error::Api {
                code: self.error.code,
                description: self.error.description,
            })
        }
    }
}
