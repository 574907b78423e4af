// Per-path request logging policy.
//
// Login exchanges carry the password and the session token and are never
// logged. Paths polled by health checks log at debug. Everything else logs
// at info with passwords masked.

use reqwest::Method;
use serde_json::Value;
use tracing::{debug, info};

use crate::session::LOGIN_PATH;

const DEBUG_GET_PREFIXES: [&str; 5] = [
    "/license/feature",
    "/nfsservice",
    "/storagepool",
    "/system",
    "/vstore?filter=NAME",
];

const MAX_LOGGED_BODY: usize = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Verbosity {
    Silent,
    Debug,
    Info,
}

impl Verbosity {
    pub(crate) fn for_request(method: &Method, path: &str) -> Self {
        if *method == Method::POST && path == LOGIN_PATH {
            Self::Silent
        } else if *method == Method::GET && DEBUG_GET_PREFIXES.iter().any(|p| path.starts_with(p)) {
            Self::Debug
        } else {
            Self::Info
        }
    }

    pub(crate) fn request(self, method: &Method, url: &str, body: Option<&Value>) {
        let body = body.map(mask_body).map(|b| b.to_string()).unwrap_or_default();
        match self {
            Self::Silent => {}
            Self::Debug => debug!(%method, url = %url, body = %body, "request"),
            Self::Info => info!(%method, url = %url, body = %body, "request"),
        }
    }

    pub(crate) fn response(self, method: &Method, url: &str, body: &[u8]) {
        if self == Self::Silent {
            return;
        }
        let text = String::from_utf8_lossy(body);
        let body: String = text.chars().take(MAX_LOGGED_BODY).collect();
        if self == Self::Debug {
            debug!(%method, url = %url, body = %body, "response");
        } else {
            info!(%method, url = %url, body = %body, "response");
        }
    }
}

/// Copy of `body` with every `password` member replaced by `***`.
pub(crate) fn mask_body(body: &Value) -> Value {
    match body {
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| {
                    let v = if k.eq_ignore_ascii_case("password") {
                        Value::String("***".into())
                    } else {
                        mask_body(v)
                    };
                    (k.clone(), v)
                })
                .collect(),
        ),
        Value::Array(items) => Value::Array(items.iter().map(mask_body).collect()),
        other => other.clone(),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn login_is_silent() {
        assert_eq!(Verbosity::for_request(&Method::POST, LOGIN_PATH), Verbosity::Silent);
    }

    #[test]
    fn polling_paths_are_debug() {
        assert_eq!(Verbosity::for_request(&Method::GET, "/system/"), Verbosity::Debug);
        assert_eq!(
            Verbosity::for_request(&Method::GET, "/vstore?filter=NAME::a"),
            Verbosity::Debug
        );
        assert_eq!(Verbosity::for_request(&Method::POST, "/system/"), Verbosity::Info);
        assert_eq!(Verbosity::for_request(&Method::GET, "/lun"), Verbosity::Info);
    }

    #[test]
    fn passwords_are_masked() {
        let masked = mask_body(&json!({
            "username": "admin",
            "Password": "secret",
            "nested": [{"password": "x"}],
        }));
        assert_eq!(masked["username"], "admin");
        assert_eq!(masked["Password"], "***");
        assert_eq!(masked["nested"][0]["password"], "***");
    }
}
