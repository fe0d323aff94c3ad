//! Temporary S3 credentials issued per DAAC.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use reqwest::header::ACCEPT;
use serde::Deserialize;
use tracing::{debug, info};

use crate::error::{Error, Result, auth_service_error};
use crate::http::{HttpSession, parse_json, read_text};
use crate::secret_store::SecretStore;
use crate::token::TokenSource;

/// Format the credential endpoints use for `expiration`, e.g.
/// `2023-01-11 19:13:22+00:00`.
const PROVIDER_EXPIRATION_FORMAT: &str = "%Y-%m-%d %H:%M:%S%:z";

/// Earthdata `s3credentials` endpoints known out of the box.
pub const DEFAULT_PROVIDERS: &[(&str, &str)] = &[
    ("podaac", "https://archive.podaac.earthdata.nasa.gov/s3credentials"),
    ("gesdisc", "https://data.gesdisc.earthdata.nasa.gov/s3credentials"),
    ("lpdaac", "https://data.lpdaac.earthdatacloud.nasa.gov/s3credentials"),
    ("ornldaac", "https://data.ornldaac.earthdata.nasa.gov/s3credentials"),
    ("ghrcdaac", "https://data.ghrc.earthdata.nasa.gov/s3credentials"),
];

#[derive(Clone, PartialEq, Eq)]
pub struct ProviderCredential {
    pub provider_id: String,
    pub access_key: String,
    pub secret_key: String,
    pub session_token: String,
    pub expiration: DateTime<Utc>,
}

impl ProviderCredential {
    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        self.expiration > now
    }

    pub fn is_valid(&self) -> bool {
        self.is_valid_at(Utc::now())
    }
}

impl fmt::Debug for ProviderCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderCredential")
            .field("provider_id", &self.provider_id)
            .field("access_key", &self.access_key)
            .field("secret_key", &"<redacted>")
            .field("session_token", &"<redacted>")
            .field("expiration", &self.expiration)
            .finish()
    }
}

pub(crate) fn parse_provider_expiration(s: &str) -> Option<DateTime<Utc>> {
    let s = s.trim();
    DateTime::parse_from_str(s, PROVIDER_EXPIRATION_FORMAT)
        .or_else(|_| DateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%z"))
        .or_else(|_| DateTime::parse_from_rfc3339(s))
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

pub(crate) fn format_provider_expiration(dt: &DateTime<Utc>) -> String {
    dt.format(PROVIDER_EXPIRATION_FORMAT).to_string()
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct S3CredentialsResponse {
    access_key_id: String,
    secret_access_key: String,
    session_token: String,
    expiration: String,
}

/// Issues temporary credentials for one provider endpoint.
pub trait CredentialSource: Send + Sync {
    fn fetch(&self, provider_id: &str, endpoint: &str) -> Result<ProviderCredential>;
}

/// Calls a DAAC `s3credentials` endpoint with an Earthdata Login bearer
/// token.
///
/// The token goes straight to the DAAC, so no login redirect to URS (which
/// would drop the `Authorization` header on the host change) is involved.
pub struct S3CredentialsClient {
    http: HttpSession,
    tokens: Arc<dyn TokenSource>,
    login_host: String,
}

impl fmt::Debug for S3CredentialsClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("S3CredentialsClient")
            .field("http", &self.http)
            .field("login_host", &self.login_host)
            .finish_non_exhaustive()
    }
}

impl S3CredentialsClient {
    /// Tokens are requested from `tokens` for `login_host`.
    pub fn new(http: HttpSession, tokens: Arc<dyn TokenSource>, login_host: impl Into<String>) -> Self {
        Self {
            http,
            tokens,
            login_host: login_host.into(),
        }
    }
}

impl CredentialSource for S3CredentialsClient {
    fn fetch(&self, provider_id: &str, endpoint: &str) -> Result<ProviderCredential> {
        let token = self.tokens.bearer_token(&self.login_host)?;
        let resp = self.http.robust_request(endpoint, |c| {
            c.get(endpoint)
                .bearer_auth(&token.value)
                .header(ACCEPT, "application/json")
                .send()
        })?;

        let (status, text) = read_text(endpoint, resp)?;
        if !status.is_success() {
            return Err(auth_service_error(status, endpoint, &text));
        }

        let body: S3CredentialsResponse = parse_json(endpoint, &text)?;
        let expiration = parse_provider_expiration(&body.expiration).ok_or_else(|| {
            Error::ProviderCredential {
                provider: provider_id.to_string(),
                reason: format!("unreadable expiration {:?}", body.expiration),
            }
        })?;

        Ok(ProviderCredential {
            provider_id: provider_id.to_string(),
            access_key: body.access_key_id,
            secret_key: body.secret_access_key,
            session_token: body.session_token,
            expiration,
        })
    }
}

type Slot = Arc<Mutex<Option<ProviderCredential>>>;

/// Per-provider cache of temporary credentials.
///
/// Entries live in memory and, when a store is attached, in the secret file.
/// Every provider id has its own lock so one provider's refresh neither
/// blocks nor invalidates another's.
pub struct ProviderCredentialCache<S = S3CredentialsClient> {
    endpoints: BTreeMap<String, String>,
    source: S,
    store: Option<Arc<SecretStore>>,
    slots: Mutex<HashMap<String, Slot>>,
}

impl<S: CredentialSource> ProviderCredentialCache<S> {
    /// A cache over [`DEFAULT_PROVIDERS`].
    pub fn new(source: S) -> Self {
        Self::with_endpoints(
            source,
            DEFAULT_PROVIDERS
                .iter()
                .map(|(id, url)| (id.to_string(), url.to_string())),
        )
    }

    pub fn with_endpoints(source: S, endpoints: impl IntoIterator<Item = (String, String)>) -> Self {
        Self {
            endpoints: endpoints.into_iter().collect(),
            source,
            store: None,
            slots: Mutex::new(HashMap::new()),
        }
    }

    /// Persists credentials in (and reads them back from) `store`.
    pub fn with_store(mut self, store: Arc<SecretStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Registers or replaces the endpoint for `provider_id`.
    pub fn register(&mut self, provider_id: impl Into<String>, endpoint: impl Into<String>) {
        self.endpoints.insert(provider_id.into(), endpoint.into());
    }

    pub fn providers(&self) -> impl Iterator<Item = &str> {
        self.endpoints.keys().map(String::as_str)
    }

    fn slot(&self, provider_id: &str) -> Slot {
        self.slots.lock().entry(provider_id.to_string()).or_default().clone()
    }

    /// Returns unexpired credentials for `provider_id`, fetching new ones on a
    /// miss.
    pub fn get(&self, provider_id: &str) -> Result<ProviderCredential> {
        let Some(endpoint) = self.endpoints.get(provider_id) else {
            return Err(Error::ProviderCredential {
                provider: provider_id.to_string(),
                reason: format!(
                    "unknown provider (known: {})",
                    self.providers().collect::<Vec<_>>().join(", ")
                ),
            });
        };

        let slot = self.slot(provider_id);
        let mut cached = slot.lock();

        if let Some(cred) = cached.as_ref().filter(|c| c.is_valid()) {
            return Ok(cred.clone());
        }

        if let Some(store) = &self.store {
            if let Some(cred) = store.load_provider(provider_id)?.filter(ProviderCredential::is_valid) {
                debug!(provider = provider_id, expiration = %cred.expiration, "reusing stored credentials");
                *cached = Some(cred.clone());
                return Ok(cred);
            }
        }

        let cred = self.source.fetch(provider_id, endpoint).map_err(|e| match e {
            Error::Authentication { .. } | Error::MissingCredentials { .. } | Error::ProviderCredential { .. } => e,
            other => Error::ProviderCredential {
                provider: provider_id.to_string(),
                reason: other.to_string(),
            },
        })?;
        info!(provider = provider_id, expiration = %cred.expiration, "obtained temporary credentials");

        if let Some(store) = &self.store {
            store.store_provider(&cred)?;
        }
        *cached = Some(cred.clone());
        Ok(cred)
    }

    /// Drops cached credentials for `provider_id`, in memory and on disk.
    pub fn invalidate(&self, provider_id: &str) -> Result<()> {
        let slot = self.slot(provider_id);
        let mut cached = slot.lock();
        *cached = None;
        if let Some(store) = &self.store {
            store.clear_provider(provider_id)?;
        }
        Ok(())
    }
}
