//! Backend configuration for sanlink.
//!
//! TOML backend and secret profiles, credential resolution (env + keyring +
//! plaintext), and translation to `sanlink_api::ClientConfig`.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use directories::ProjectDirs;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};
use url::Url;

use sanlink_api::auth::DEFAULT_SCOPE;
use sanlink_api::{AuthInfo, ClientConfig, SecretRef, SecretStore, TlsMode, TransportConfig};

const KEYRING_SERVICE: &str = "sanlink";

// ── Error ───────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {field}: {reason}")]
    Validation { field: String, reason: String },

    #[error("no backend named '{name}'")]
    UnknownBackend { name: String },

    #[error("no credentials configured for secret '{secret}'")]
    NoCredentials { secret: String },

    #[error("failed to serialize config: {0}")]
    Serialization(#[from] toml::ser::Error),

    #[error("config loading failed: {0}")]
    Figment(Box<figment::Error>),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        Self::Figment(Box::new(err))
    }
}

impl From<sanlink_api::Error> for ConfigError {
    fn from(err: sanlink_api::Error) -> Self {
        match err {
            sanlink_api::Error::Config { field, reason } => Self::Validation { field, reason },
            other => Self::Validation {
                field: "backend".into(),
                reason: other.to_string(),
            },
        }
    }
}

// ── TOML config structs ─────────────────────────────────────────────

/// Top-level TOML configuration.
#[derive(Debug, Default, Deserialize, Serialize)]
pub struct Config {
    /// Global defaults.
    #[serde(default)]
    pub defaults: Defaults,

    /// Named storage backends.
    #[serde(default)]
    pub backends: BTreeMap<String, BackendProfile>,

    /// Named credential sets referenced by backends.
    #[serde(default)]
    pub secrets: BTreeMap<String, SecretProfile>,
}

/// Thread count as written in TOML: `8` or `"8"`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(untagged)]
pub enum ThreadCount {
    Number(i64),
    Text(String),
}

impl ThreadCount {
    fn raw(&self) -> String {
        match self {
            Self::Number(n) => n.to_string(),
            Self::Text(s) => s.clone(),
        }
    }
}

#[derive(Debug, Deserialize, Serialize)]
pub struct Defaults {
    /// Per-client request concurrency, clamped to 1..=30.
    pub max_client_threads: Option<ThreadCount>,

    #[serde(default = "default_timeout")]
    pub timeout: u64,

    /// Accept self-signed array certificates.
    #[serde(default = "default_insecure")]
    pub insecure: bool,
}

impl Default for Defaults {
    fn default() -> Self {
        Self {
            max_client_threads: None,
            timeout: default_timeout(),
            insecure: default_insecure(),
        }
    }
}

fn default_timeout() -> u64 {
    60
}
fn default_insecure() -> bool {
    true
}

/// One storage backend.
#[derive(Debug, Deserialize, Serialize)]
pub struct BackendProfile {
    /// Candidate management addresses, tried in order.
    pub urls: Vec<String>,

    pub user: String,

    /// Name of the `[secrets.<name>]` entry holding the password.
    pub secret: String,

    /// Namespace of `secret`; the entry is then `[secrets."<namespace>/<name>"]`.
    pub secret_namespace: Option<String>,

    /// Identity reported to the status board. Defaults to the backend name.
    pub backend_id: Option<String>,

    /// Storage product label.
    pub storage: Option<String>,

    /// Logical partition to log into.
    pub vstore_name: Option<String>,

    /// Override the default concurrency.
    pub max_client_threads: Option<ThreadCount>,

    /// Path to a custom CA certificate.
    pub ca_cert: Option<PathBuf>,

    /// Override the insecure TLS setting.
    pub insecure: Option<bool>,

    /// Override the timeout (seconds).
    pub timeout: Option<u64>,
}

/// Credentials for one or more backends.
#[derive(Debug, Default, Deserialize, Serialize)]
pub struct SecretProfile {
    /// User name; falls back to the `user` of a backend referencing this secret.
    pub user: Option<String>,

    /// Password (plaintext -- prefer keyring or env var).
    pub password: Option<String>,

    /// Environment variable name containing the password.
    pub password_env: Option<String>,

    /// Authorization scope; `"0"` (local user) when omitted.
    pub scope: Option<String>,
}

impl BackendProfile {
    fn secret_ref(&self) -> SecretRef {
        let secret = SecretRef::new(&self.secret);
        match self.secret_namespace {
            Some(ref ns) => secret.in_namespace(ns),
            None => secret,
        }
    }
}

// ── Config file path ────────────────────────────────────────────────

/// Resolve the config file path via XDG / platform conventions.
pub fn config_path() -> PathBuf {
    ProjectDirs::from("io", "sanlink", "sanlink").map_or_else(
        || {
            let mut p = dirs_fallback();
            p.push("config.toml");
            p
        },
        |dirs| dirs.config_dir().join("config.toml"),
    )
}

fn dirs_fallback() -> PathBuf {
    let mut p = PathBuf::from(std::env::var("HOME").unwrap_or_else(|_| ".".into()));
    p.push(".config");
    p.push("sanlink");
    p
}

// ── Config loading ──────────────────────────────────────────────────

/// Load the full Config from `path` + `SANLINK_` environment.
///
/// Nested keys use a double underscore: `SANLINK_DEFAULTS__TIMEOUT=30`.
pub fn load_config(path: &Path) -> Result<Config, ConfigError> {
    let figment = Figment::new()
        .merge(Serialized::defaults(Config::default()))
        .merge(Toml::file(path))
        .merge(Env::prefixed("SANLINK_").split("__"));

    let config: Config = figment.extract()?;
    debug!(path = %path.display(), backends = config.backends.len(), "config loaded");
    Ok(config)
}

/// Serialize config to TOML and write it to `path`.
pub fn save_config(cfg: &Config, path: &Path) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let toml_str = toml::to_string_pretty(cfg)?;
    std::fs::write(path, toml_str)?;
    Ok(())
}

// ── Translation ─────────────────────────────────────────────────────

impl Config {
    /// Build a validated `ClientConfig` for the named backend.
    pub fn client_config(&self, name: &str) -> Result<ClientConfig, ConfigError> {
        let profile = self
            .backends
            .get(name)
            .ok_or_else(|| ConfigError::UnknownBackend { name: name.into() })?;

        let urls = profile
            .urls
            .iter()
            .map(|raw| {
                raw.parse::<Url>().map_err(|_| ConfigError::Validation {
                    field: "urls".into(),
                    reason: format!("invalid URL: {raw}"),
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        let mut config = ClientConfig::new(name, urls, &profile.user, profile.secret_ref())
            .with_transport(self.transport(profile));
        if let Some(ref id) = profile.backend_id {
            config = config.with_backend_id(id);
        }
        if let Some(ref storage) = profile.storage {
            config = config.with_storage(storage);
        }
        if let Some(ref vstore) = profile.vstore_name {
            config = config.with_vstore(vstore);
        }
        if let Some(threads) = profile
            .max_client_threads
            .as_ref()
            .or(self.defaults.max_client_threads.as_ref())
        {
            config = config.with_parallel_num(threads.raw());
        }

        config.validate()?;
        Ok(config)
    }

    fn transport(&self, profile: &BackendProfile) -> TransportConfig {
        let tls = if profile.insecure == Some(true) {
            TlsMode::DangerAcceptInvalid
        } else if let Some(ref ca_path) = profile.ca_cert {
            TlsMode::CustomCa(ca_path.clone())
        } else if profile.insecure.unwrap_or(self.defaults.insecure) {
            TlsMode::DangerAcceptInvalid // arrays ship self-signed certificates
        } else {
            TlsMode::System
        };
        let timeout = Duration::from_secs(profile.timeout.unwrap_or(self.defaults.timeout));

        TransportConfig::default()
            .with_tls(tls)
            .with_timeout(timeout)
    }

    /// Secret store backed by the `[secrets]` table.
    pub fn secret_store(&self) -> ProfileSecrets {
        let entries = self
            .secrets
            .iter()
            .map(|(name, profile)| {
                let user = profile.user.clone().or_else(|| {
                    self.backends
                        .values()
                        .find(|b| b.secret_ref().to_string() == *name)
                        .map(|b| b.user.clone())
                });
                let entry = SecretEntry {
                    user: user.unwrap_or_default(),
                    password: profile.password.clone(),
                    password_env: profile.password_env.clone(),
                    scope: profile.scope.clone().unwrap_or_else(|| DEFAULT_SCOPE.into()),
                };
                (name.clone(), entry)
            })
            .collect();

        ProfileSecrets {
            entries,
            use_keyring: true,
        }
    }
}

// ── Credential resolution ───────────────────────────────────────────

#[derive(Debug, Clone)]
struct SecretEntry {
    user: String,
    password: Option<String>,
    password_env: Option<String>,
    scope: String,
}

/// `SecretStore` resolving passwords from env var, OS keyring, then
/// plaintext config, in that order.
#[derive(Debug, Clone)]
pub struct ProfileSecrets {
    entries: BTreeMap<String, SecretEntry>,
    use_keyring: bool,
}

impl ProfileSecrets {
    /// Skip the OS keyring step.
    pub fn without_keyring(mut self) -> Self {
        self.use_keyring = false;
        self
    }

    /// Entries are keyed by `SecretRef`'s display form, `namespace/name`
    /// for namespaced references.
    fn entry(&self, key: &str) -> Result<&SecretEntry, ConfigError> {
        self.entries
            .get(key)
            .ok_or_else(|| ConfigError::NoCredentials { secret: key.into() })
    }

    fn env_password(
        &self,
        key: &str,
        env: impl Fn(&str) -> Option<String>,
    ) -> Result<Option<String>, ConfigError> {
        Ok(self.entry(key)?.password_env.as_deref().and_then(env))
    }

    /// Build credentials from an already looked-up password, falling back
    /// to the plaintext one.
    fn resolve(&self, key: &str, password: Option<String>) -> Result<AuthInfo, ConfigError> {
        let entry = self.entry(key)?;
        let password = password
            .or_else(|| entry.password.clone())
            .ok_or_else(|| ConfigError::NoCredentials { secret: key.into() })?;

        Ok(AuthInfo::new(&entry.user, password).with_scope(&entry.scope))
    }

    async fn lookup(&self, key: &str) -> Result<AuthInfo, ConfigError> {
        let mut password = self.env_password(key, |var| std::env::var(var).ok())?;
        if password.is_none() && self.use_keyring {
            password = keyring_password(format!("{key}/password")).await;
        }
        self.resolve(key, password)
    }
}

/// OS keyring access blocks (D-Bus on Linux), so it runs off the runtime.
async fn keyring_password(account: String) -> Option<String> {
    tokio::task::spawn_blocking(move || {
        keyring::Entry::new(KEYRING_SERVICE, &account)
            .and_then(|entry| entry.get_password())
            .ok()
    })
    .await
    .inspect_err(|e| warn!(error = %e, "keyring lookup task failed"))
    .ok()
    .flatten()
}

#[async_trait]
impl SecretStore for ProfileSecrets {
    async fn auth_info(&self, secret: &SecretRef) -> Result<AuthInfo, sanlink_api::Error> {
        self.lookup(&secret.to_string())
            .await
            .map_err(|e| sanlink_api::Error::Secret {
                secret: secret.to_string(),
                message: e.to_string(),
            })
    }
}
