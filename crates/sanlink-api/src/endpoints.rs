// Endpoint failover ring
//
// Ordered candidate management addresses for one physical array. Login
// walks the ring front to back; the address that succeeded is moved to the
// back so the next login favors addresses that were not just used. The set
// never grows or shrinks after construction.

use url::Url;

use crate::error::Error;

/// Ordered, rotating set of candidate base addresses for one device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointRing {
    urls: Vec<Url>,
}

impl EndpointRing {
    /// Build a ring from a non-empty list of addresses.
    pub fn new(urls: Vec<Url>) -> Result<Self, Error> {
        if urls.is_empty() {
            return Err(Error::Config {
                field: "urls".into(),
                reason: "at least one management address must be provided".into(),
            });
        }
        Ok(Self { urls })
    }

    /// Candidates in the order they should be tried.
    pub fn candidates(&self) -> &[Url] {
        &self.urls
    }

    pub fn len(&self) -> usize {
        self.urls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.urls.is_empty()
    }

    /// Move the address at `index` to the last slot, keeping the relative
    /// order of every other address.
    pub fn promote_to_back(&mut self, index: usize) {
        if index < self.urls.len() {
            let url = self.urls.remove(index);
            self.urls.push(url);
        }
    }

    /// Move `url` to the last slot if it is part of the ring.
    pub fn promote_url_to_back(&mut self, url: &Url) {
        if let Some(index) = self.urls.iter().position(|u| u == url) {
            self.promote_to_back(index);
        }
    }
}

/// Management API root under every candidate address.
pub const REST_ROOT: &str = "/deviceManager/rest";

/// Join a candidate address with the management API root.
pub fn rest_base(url: &Url) -> String {
    format!("{}{REST_ROOT}", url.as_str().trim_end_matches('/'))
}
