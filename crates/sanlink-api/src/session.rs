// Session client
//
// Owns one authenticated session against one array: device identity,
// token, active management address and logical partition. Every request
// goes through `base_call`, which assembles headers under the relogin lock,
// consults the site guard, takes the client and device permits and decodes
// the envelope. `call` adds one transparent relogin-and-retry cycle when the
// array reports the session has expired.

use std::sync::Arc;

use arc_swap::{ArcSwap, ArcSwapOption};
use reqwest::Method;
use reqwest::header::{CONNECTION, CONTENT_TYPE};
use secrecy::{ExposeSecret, SecretString};
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};
use url::Url;

use crate::auth::{Collaborators, DEFAULT_VSTORE_ID, DEFAULT_VSTORE_NAME};
use crate::config::ClientConfig;
use crate::endpoints::{EndpointRing, rest_base};
use crate::envelope::{ResponseEnvelope, is_lockout_code, str_field};
use crate::error::Error;
use crate::request_log::Verbosity;
use crate::site::SiteGuard;
use crate::system::{SYSTEM_PATH, SystemApi, SystemInfo};
use crate::throttle::ConcurrencyGate;
use crate::vstore::VStoreApi;

/// Login path. Bypasses the token header and the request lock.
pub const LOGIN_PATH: &str = "/xx/sessions";
/// Logout path. Bypasses the request lock.
pub const LOGOUT_PATH: &str = "/sessions";
/// Header carrying the session token.
pub const TOKEN_HEADER: &str = "iBaseToken";

/// Returns `true` for the two reserved session paths.
pub fn is_session_path(path: &str) -> bool {
    path == LOGIN_PATH || path == LOGOUT_PATH
}

// ── SessionState ────────────────────────────────────────────────────

/// Immutable snapshot of the session. Replaced wholesale on every change.
#[derive(Debug, Clone, Default)]
pub struct SessionState {
    /// Candidate address joined with the management root.
    pub active_url: String,
    /// Device serial number; empty until login succeeds.
    pub device_id: String,
    token: Option<SecretString>,
    pub vstore_id: String,
    pub vstore_name: String,
    /// Firmware point release reported by the last system refresh.
    pub storage_version: String,
}

impl SessionState {
    /// A session with a token is usable for authenticated calls.
    pub fn has_token(&self) -> bool {
        self.token
            .as_ref()
            .is_some_and(|t| !t.expose_secret().is_empty())
    }

    fn same_token(&self, other: &Self) -> bool {
        match (&self.token, &other.token) {
            (Some(a), Some(b)) => a.expose_secret() == b.expose_secret(),
            (None, None) => true,
            _ => false,
        }
    }

    fn token_str(&self) -> Option<&str> {
        self.token
            .as_ref()
            .map(|t| t.expose_secret())
            .filter(|t| !t.is_empty())
    }
}

/// Whether a request is subject to the site guard.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Route {
    Guarded,
    Unguarded,
}

// ── SessionClient ───────────────────────────────────────────────────

/// Authenticated session against one array.
///
/// Cheap to share behind an `Arc`: all methods take `&self` and are safe to
/// call from many tasks at once. Token, device id and endpoint order are
/// only replaced by login/relogin/logout while holding the relogin lock.
pub struct SessionClient {
    config: ClientConfig,
    endpoints: ArcSwap<EndpointRing>,
    state: ArcSwap<SessionState>,
    http: ArcSwapOption<reqwest::Client>,
    relogin_lock: Mutex<()>,
    gate: ConcurrencyGate,
    site: SiteGuard,
    collaborators: Collaborators,
}

impl std::fmt::Debug for SessionClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionClient")
            .field("name", &self.config.name)
            .field("backend_id", &self.config.backend_id)
            .field("state", &self.state.load_full())
            .finish_non_exhaustive()
    }
}

impl SessionClient {
    /// Create a session from a validated configuration. Does NOT log in.
    pub fn new(config: ClientConfig, collaborators: Collaborators) -> Result<Self, Error> {
        config.validate()?;
        let endpoints = EndpointRing::new(config.urls.clone())?;
        let http = config.transport.build_client()?;
        let parallel = config.parallel_count();
        info!(backend = %config.name, parallel, "init session client");

        let state = SessionState {
            active_url: rest_base(&endpoints.candidates()[0]),
            vstore_name: config.vstore_name.clone().unwrap_or_default(),
            ..SessionState::default()
        };

        Ok(Self {
            gate: ConcurrencyGate::new(parallel, Arc::clone(&collaborators.devices)),
            endpoints: ArcSwap::from_pointee(endpoints),
            state: ArcSwap::from_pointee(state),
            http: ArcSwapOption::from_pointee(http),
            relogin_lock: Mutex::new(()),
            site: SiteGuard::new(),
            collaborators,
            config,
        })
    }

    // ── Accessors ────────────────────────────────────────────────────

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn backend_id(&self) -> &str {
        &self.config.backend_id
    }

    /// Device serial number of the array; empty before login.
    pub fn device_sn(&self) -> String {
        self.state.load().device_id.clone()
    }

    pub fn storage_version(&self) -> String {
        self.state.load().storage_version.clone()
    }

    pub fn vstore_id(&self) -> String {
        self.state.load().vstore_id.clone()
    }

    pub fn vstore_name(&self) -> String {
        self.state.load().vstore_name.clone()
    }

    pub fn active_url(&self) -> String {
        self.state.load().active_url.clone()
    }

    pub fn has_token(&self) -> bool {
        self.state.load().has_token()
    }

    /// Snapshot of the whole session state.
    pub fn session(&self) -> Arc<SessionState> {
        self.state.load_full()
    }

    /// Candidate addresses in their current order.
    pub fn endpoints(&self) -> Vec<Url> {
        self.endpoints.load().candidates().to_vec()
    }

    pub fn site(&self) -> &SiteGuard {
        &self.site
    }

    pub fn gate(&self) -> &ConcurrencyGate {
        &self.gate
    }

    pub fn has_transport(&self) -> bool {
        self.http.load().is_some()
    }

    /// Attach a caller-supplied HTTP client.
    pub fn attach_transport(&self, http: reqwest::Client) {
        self.http.store(Some(Arc::new(http)));
    }

    // ── Capability views ─────────────────────────────────────────────

    pub fn system(&self) -> SystemApi<'_> {
        SystemApi::new(self)
    }

    pub fn vstore(&self) -> VStoreApi<'_> {
        VStoreApi::new(self)
    }

    // ── Login / logout ───────────────────────────────────────────────

    /// Authenticate against the first reachable candidate address.
    ///
    /// Connectivity failures fail over to the next address; any other
    /// outcome stops the walk. On success the address that answered moves
    /// to the back of the ring and the next system refresh records a fresh
    /// site identity.
    pub async fn login(&self) -> Result<(), Error> {
        let _guard = self.relogin_lock.lock().await;
        self.login_locked().await?;
        self.site.reset_observed();
        Ok(())
    }

    /// Best-effort logout. Failures are logged, never raised.
    pub async fn logout(&self) {
        let _guard = self.relogin_lock.lock().await;
        self.logout_locked().await;
        self.update_state(|s| {
            s.token = None;
            s.device_id.clear();
        });
    }

    /// Replace the session, unless a concurrent caller already did.
    pub async fn relogin(&self) -> Result<(), Error> {
        let seen = self.state.load_full();

        let _guard = self.relogin_lock.lock().await;

        let current = self.state.load_full();
        if current.has_token() && !current.same_token(&seen) {
            debug!(backend = %self.config.name, "session already renewed by another caller");
            return Ok(());
        }
        if current.has_token() {
            self.logout_locked().await;
        }

        self.login_locked().await.inspect_err(|e| {
            error!(backend = %self.config.name, error = %e, "try to relogin failed");
        })
    }

    /// Check the configured credentials with a full failover login.
    ///
    /// Records device id and token but neither registers a device pool nor
    /// reports lockouts to the status sink.
    pub async fn validate_login(&self) -> Result<(), Error> {
        let _guard = self.relogin_lock.lock().await;
        self.ensure_transport()?;

        let auth = self
            .collaborators
            .secrets
            .auth_info(&self.config.secret)
            .await?;
        let body = auth.login_body(self.config.vstore_name.as_deref());

        self.clear_identity();
        let (candidate, url, resp) = self.login_call(&body).await?;
        if !resp.is_success() {
            return Err(Error::AuthRejected {
                url,
                code: resp.code(),
                description: resp.error.description,
            });
        }

        if let Ok(data) = resp.data.as_object() {
            let device_id = str_field(data, "deviceid").unwrap_or_default().to_owned();
            let token = str_field(data, "iBaseToken").unwrap_or_default().to_owned();
            if device_id.is_empty() || token.is_empty() {
                warn!(url = %url, "validate login response lacks device id or token");
            }
            self.update_state(|s| {
                s.device_id.clone_from(&device_id);
                s.token = Some(SecretString::from(token.clone()));
            });
        } else {
            warn!(url = %url, "validate login response data is not an object");
        }

        self.promote(&candidate);
        info!(url = %url, "validate login success");
        Ok(())
    }

    async fn login_locked(&self) -> Result<(), Error> {
        self.ensure_transport()?;

        let auth = self
            .collaborators
            .secrets
            .auth_info(&self.config.secret)
            .await
            .inspect_err(|e| error!(backend = %self.config.name, error = %e, "get credentials failed"))?;
        let body = auth.login_body(self.config.vstore_name.as_deref());

        self.clear_identity();
        let (candidate, url, resp) = self.login_call(&body).await?;

        if !resp.is_success() {
            let code = resp.code();
            error!(url = %url, code, description = resp.description(), "login rejected");
            if is_lockout_code(code) {
                self.mark_offline().await;
            }
            return Err(Error::AuthRejected {
                url,
                code,
                description: resp.error.description,
            });
        }

        if let Err(e) = self.apply_login_data(&resp) {
            error!(url = %url, error = %e, "unexpected login response");
            self.logout_locked().await;
            self.clear_identity();
            self.mark_offline().await;
            return Err(e);
        }

        self.promote(&candidate);
        info!(url = %url, device = %self.device_sn(), "login success");
        Ok(())
    }

    /// Walk the ring until an address answers.
    async fn login_call(&self, body: &Value) -> Result<(Url, String, ResponseEnvelope), Error> {
        let candidates = self.endpoints();
        let mut last_err = None;

        for candidate in candidates {
            let base = rest_base(&candidate);
            self.update_state(|s| s.active_url.clone_from(&base));
            info!(url = %base, "try to login");

            match self
                .base_call(Method::POST, LOGIN_PATH, Some(body), Route::Unguarded)
                .await
            {
                Ok(resp) => return Ok((candidate, base, resp)),
                Err(e) if e.is_unconnected() => {
                    warn!(url = %base, "login failed due to connection failure, trying another address");
                    last_err = Some(e);
                }
                Err(e) => {
                    error!(url = %base, error = %e, "login failed");
                    return Err(e);
                }
            }
        }

        Err(last_err.unwrap_or_else(|| Error::Config {
            field: "urls".into(),
            reason: "no management address to log into".into(),
        }))
    }

    fn apply_login_data(&self, resp: &ResponseEnvelope) -> Result<(), Error> {
        let data = resp.data.as_object()?;
        let missing = |field: &str| Error::Decode {
            message: format!("login response has no string field {field:?}"),
            body: String::new(),
        };
        let device_id = str_field(data, "deviceid")
            .filter(|d| !d.is_empty())
            .ok_or_else(|| missing("deviceid"))?
            .to_owned();
        // Recorded before the token check so a logout of a half-valid
        // session still addresses the device.
        self.update_state(|s| s.device_id.clone_from(&device_id));
        let token = str_field(data, "iBaseToken")
            .filter(|t| !t.is_empty())
            .ok_or_else(|| missing("iBaseToken"))?
            .to_owned();
        let vstore_name = str_field(data, "vstoreName").map_or_else(
            || {
                info!(default = DEFAULT_VSTORE_NAME, "no vstoreName in login response");
                DEFAULT_VSTORE_NAME.to_owned()
            },
            str::to_owned,
        );
        let vstore_id = str_field(data, "vstoreId").map_or_else(
            || {
                info!(default = DEFAULT_VSTORE_ID, "no vstoreId in login response");
                DEFAULT_VSTORE_ID.to_owned()
            },
            str::to_owned,
        );

        self.collaborators.devices.ensure(&device_id);
        self.update_state(|s| {
            s.token = Some(SecretString::from(token.clone()));
            s.vstore_name.clone_from(&vstore_name);
            s.vstore_id.clone_from(&vstore_id);
        });
        Ok(())
    }

    async fn logout_locked(&self) {
        match self
            .base_call(Method::DELETE, LOGOUT_PATH, None, Route::Unguarded)
            .await
        {
            Ok(resp) if resp.is_success() => info!(url = %self.active_url(), "logout success"),
            Ok(resp) => warn!(url = %self.active_url(), code = resp.code(), "logout error"),
            Err(e) => warn!(url = %self.active_url(), error = %e, "logout error"),
        }
    }

    async fn mark_offline(&self) {
        let backend_id = &self.config.backend_id;
        match self.collaborators.status.set_online(backend_id, false).await {
            Ok(()) => warn!(backend_id = %backend_id, "backend marked offline"),
            Err(e) => error!(backend_id = %backend_id, error = %e, "set backend offline failed"),
        }
    }

    // ── Calls ────────────────────────────────────────────────────────

    /// Issue an authenticated call, renewing the session once if the array
    /// reports it expired.
    pub async fn call(
        &self,
        method: Method,
        path: &str,
        body: Option<&Value>,
    ) -> Result<ResponseEnvelope, Error> {
        let resp = self
            .base_call(method.clone(), path, body, Route::Guarded)
            .await?;
        if !resp.needs_relogin() {
            return Ok(resp);
        }

        info!(%method, path, "session expired, re-login and resend request");
        self.relogin().await?;

        // The management port may have moved to the other site.
        if let Err(e) = self.refresh_system_info().await {
            error!(error = %e, "after re-login, can't get system info");
            return Err(Error::SystemInfoUnavailable(Box::new(e)));
        }

        self.base_call(method, path, body, Route::Guarded).await
    }

    pub async fn get(&self, path: &str, body: Option<&Value>) -> Result<ResponseEnvelope, Error> {
        self.call(Method::GET, path, body).await
    }

    pub async fn post(&self, path: &str, body: Option<&Value>) -> Result<ResponseEnvelope, Error> {
        self.call(Method::POST, path, body).await
    }

    pub async fn put(&self, path: &str, body: Option<&Value>) -> Result<ResponseEnvelope, Error> {
        self.call(Method::PUT, path, body).await
    }

    pub async fn delete(&self, path: &str, body: Option<&Value>) -> Result<ResponseEnvelope, Error> {
        self.call(Method::DELETE, path, body).await
    }

    /// Re-read system information and the active site identity.
    ///
    /// The site guard stays in `Refreshing` for the duration; the query
    /// itself bypasses the guard and never triggers a relogin.
    pub async fn refresh_system_info(&self) -> Result<SystemInfo, Error> {
        info!(backend = %self.config.name, "system info is refreshing");
        let mut refresh = self.site.begin_refresh();

        let resp = self
            .base_call(Method::GET, SYSTEM_PATH, None, Route::Unguarded)
            .await?;
        let system = SystemInfo::from_envelope(resp)?;

        if let Some(version) = system.point_release() {
            let version = version.to_owned();
            self.update_state(|s| s.storage_version.clone_from(&version));
        }
        refresh.complete(system.wwn().map(str::to_owned));

        info!(
            backend = %self.config.name,
            storage = %self.config.storage,
            version = %self.storage_version(),
            "system info updated"
        );
        Ok(system)
    }

    async fn base_call(
        &self,
        method: Method,
        path: &str,
        body: Option<&Value>,
        route: Route,
    ) -> Result<ResponseEnvelope, Error> {
        let Some(http) = self.http.load_full() else {
            error!(%method, path, "failed to send request: http client not initialized");
            return Err(Error::NoTransport {
                backend: self.config.name.clone(),
            });
        };

        let session_path = is_session_path(path);
        let (request, device_id) = if session_path {
            self.build_request(&http, &method, path, body)?
        } else {
            let _guard = self.relogin_lock.lock().await;
            self.build_request(&http, &method, path, body)?
        };

        if route == Route::Guarded && !session_path {
            self.site.check()?;
        }

        let verbosity = Verbosity::for_request(&method, path);
        let url = request.url().to_string();
        verbosity.request(&method, &url, body);

        let _permit = self.gate.acquire(&device_id).await?;

        let response = http.execute(request).await.map_err(|e| {
            error!(%method, url = %url, error = %e, "send request failed");
            classify_transport(e, &url)
        })?;
        let bytes = response.bytes().await.map_err(|e| {
            error!(%method, url = %url, error = %e, "read response data failed");
            Error::Transport(e)
        })?;

        verbosity.response(&method, &url, &bytes);
        ResponseEnvelope::from_slice(&bytes)
    }

    /// Assemble URL and headers from the current session snapshot.
    pub(crate) fn build_request(
        &self,
        http: &reqwest::Client,
        method: &Method,
        path: &str,
        body: Option<&Value>,
    ) -> Result<(reqwest::Request, String), Error> {
        let state = self.state.load();

        let mut url = state.active_url.clone();
        if !state.device_id.is_empty() {
            url.push('/');
            url.push_str(&state.device_id);
        }
        url.push_str(path);

        let mut builder = http
            .request(method.clone(), &url)
            .header(CONTENT_TYPE, "application/json")
            .header(CONNECTION, "keep-alive");
        if let Some(token) = state.token_str() {
            builder = builder.header(TOKEN_HEADER, token);
        }
        if let Some(body) = body {
            builder = builder.json(body);
        }

        let request = builder.build().map_err(|e| {
            error!(url = %url, error = %e, "construct http request failed");
            Error::Transport(e)
        })?;
        Ok((request, state.device_id.clone()))
    }

    // ── Duplication ──────────────────────────────────────────────────

    /// Independent copy for switching to another capability set.
    ///
    /// Copies the endpoint list (never shared), session snapshot, site
    /// state and collaborators; shares the client-level permit pool. The
    /// copy has no transport until it logs in.
    pub fn duplicate(&self) -> SessionClient {
        let endpoints = EndpointRing::clone(&self.endpoints.load());
        let mut config = self.config.clone();
        config.urls = endpoints.candidates().to_vec();

        SessionClient {
            config,
            endpoints: ArcSwap::from_pointee(endpoints),
            state: ArcSwap::new(self.state.load_full()),
            http: ArcSwapOption::empty(),
            relogin_lock: Mutex::new(()),
            gate: self.gate.clone(),
            site: SiteGuard::from_state(self.site.snapshot()),
            collaborators: self.collaborators.clone(),
        }
    }

    // ── Internals ────────────────────────────────────────────────────

    fn ensure_transport(&self) -> Result<(), Error> {
        if self.http.load().is_none() {
            let http = self.config.transport.build_client()?;
            self.http.store(Some(Arc::new(http)));
        }
        Ok(())
    }

    fn clear_identity(&self) {
        self.update_state(|s| {
            s.device_id.clear();
            s.token = None;
        });
    }

    fn promote(&self, candidate: &Url) {
        self.endpoints.rcu(|ring| {
            let mut next = EndpointRing::clone(ring);
            next.promote_url_to_back(candidate);
            Arc::new(next)
        });
    }

    fn update_state(&self, f: impl Fn(&mut SessionState)) {
        self.state.rcu(|old| {
            let mut next = SessionState::clone(old);
            f(&mut next);
            Arc::new(next)
        });
    }
}

/// Map a reqwest failure onto the connectivity sentinel where it means
/// the endpoint could not be reached.
fn classify_transport(err: reqwest::Error, url: &str) -> Error {
    if err.is_connect() || err.is_timeout() || err.is_request() {
        Error::Unconnected {
            url: url.to_owned(),
            message: err.to_string(),
        }
    } else {
        Error::Transport(err)
    }
}
