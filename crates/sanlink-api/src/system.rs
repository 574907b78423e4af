// System information capability
//
// `GET /system/` describes the array: serial number, product model,
// firmware point release and the WWN of the controller currently serving
// the management port. The WWN doubles as the active site identity.

use serde_json::{Map, Value};

use crate::envelope::{ResponseEnvelope, str_field};
use crate::error::Error;
use crate::session::SessionClient;

pub const SYSTEM_PATH: &str = "/system/";

/// Decoded `/system/` object. Unknown members are kept in `raw`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SystemInfo {
    raw: Map<String, Value>,
}

impl SystemInfo {
    pub fn from_envelope(resp: ResponseEnvelope) -> Result<Self, Error> {
        let raw = resp.into_result()?.into_object()?;
        Ok(Self { raw })
    }

    pub fn from_map(raw: Map<String, Value>) -> Self {
        Self { raw }
    }

    fn non_empty(&self, key: &str) -> Option<&str> {
        str_field(&self.raw, key).filter(|v| !v.is_empty())
    }

    /// Firmware point release, e.g. `6.1.5`.
    pub fn point_release(&self) -> Option<&str> {
        self.non_empty("pointRelease")
    }

    /// World-wide name of the serving controller.
    pub fn wwn(&self) -> Option<&str> {
        self.non_empty("wwn")
    }

    pub fn product_mode(&self) -> Option<&str> {
        self.non_empty("PRODUCTMODE")
    }

    pub fn product_version(&self) -> Option<&str> {
        self.non_empty("PRODUCTVERSION")
    }

    pub fn id(&self) -> Option<&str> {
        self.non_empty("ID")
    }

    pub fn name(&self) -> Option<&str> {
        self.non_empty("NAME")
    }

    pub fn raw(&self) -> &Map<String, Value> {
        &self.raw
    }
}

/// Borrowed view exposing system queries on a session.
#[derive(Debug, Clone, Copy)]
pub struct SystemApi<'a> {
    session: &'a SessionClient,
}

impl<'a> SystemApi<'a> {
    pub(crate) fn new(session: &'a SessionClient) -> Self {
        Self { session }
    }

    /// Fetch system information through the ordinary request path.
    pub async fn get_system(&self) -> Result<SystemInfo, Error> {
        let resp = self.session.get(SYSTEM_PATH, None).await?;
        SystemInfo::from_envelope(resp)
    }
}
