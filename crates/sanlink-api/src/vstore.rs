// Logical partition (vStore) lookup

use serde_json::{Map, Value};
use tracing::info;

use crate::envelope::str_field;
use crate::error::Error;
use crate::session::SessionClient;

/// One logical partition as reported by the array.
#[derive(Debug, Clone, PartialEq)]
pub struct VStore {
    pub id: String,
    pub name: String,
    pub raw: Map<String, Value>,
}

impl VStore {
    fn from_value(value: Value) -> Option<Self> {
        let Value::Object(raw) = value else {
            return None;
        };
        Some(Self {
            id: str_field(&raw, "ID").unwrap_or_default().to_owned(),
            name: str_field(&raw, "NAME").unwrap_or_default().to_owned(),
            raw,
        })
    }
}

#[derive(Debug, Clone, Copy)]
pub struct VStoreApi<'a> {
    session: &'a SessionClient,
}

impl<'a> VStoreApi<'a> {
    pub(crate) fn new(session: &'a SessionClient) -> Self {
        Self { session }
    }

    /// Look up a logical partition by exact name. `Ok(None)` when absent.
    pub async fn get_vstore_by_name(&self, name: &str) -> Result<Option<VStore>, Error> {
        let path = format!("/vstore?filter=NAME::{name}");
        let resp = self.session.get(&path, None).await?;
        let list = resp.into_result()?.into_list()?;

        let found = list
            .into_iter()
            .filter_map(VStore::from_value)
            .find(|v| v.name == name);
        if found.is_none() {
            info!(vstore = name, "vstore not found");
        }
        Ok(found)
    }
}
