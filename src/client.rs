use std::fmt;
use std::sync::Arc;

use tracing::debug;

use crate::catalog::{CatalogClient, CollectionQuery, SearchResults};
use crate::config::Settings;
use crate::error::Result;
use crate::granule::{CollectionSummary, GranuleRecord};
use crate::http::HttpSession;
use crate::prompt::TerminalPrompter;
use crate::provider::{ProviderCredential, ProviderCredentialCache, S3CredentialsClient};
use crate::query::CatalogQuery;
use crate::secret_store::{LoginSecret, SecretStore};
use crate::token::{BearerToken, TokenLifecycleManager, UrsClient};

/// Environment variables read for a pre-provisioned login.
pub const USERNAME_VAR: &str = "EARTHDATA_USERNAME";
pub const PASSWORD_VAR: &str = "EARTHDATA_PASSWORD";

/// Every component wired from one [`Settings`] value over one HTTP session.
pub struct Client {
    settings: Settings,
    urs_host: String,
    store: Arc<SecretStore>,
    tokens: Arc<TokenLifecycleManager>,
    providers: ProviderCredentialCache,
    catalog: CatalogClient,
}

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client")
            .field("urs_host", &self.urs_host)
            .field("settings", &self.settings)
            .field("store", &self.store)
            .finish_non_exhaustive()
    }
}

impl Client {
    /// Creates a client from environment variables and `.earthdatarc`.
    ///
    /// This is equivalent to `Client::new(Settings::from_env()?)`.
    pub fn from_env() -> Result<Self> {
        Self::new(Settings::from_env()?)
    }

    pub fn new(settings: Settings) -> Result<Self> {
        let http = HttpSession::new(settings.timeout, settings.verify)?;
        Self::with_http(settings, http)
    }

    /// Like [`Client::new`] but over an existing session, e.g. one with a
    /// custom retry policy.
    pub fn with_http(settings: Settings, http: HttpSession) -> Result<Self> {
        let urs_host = settings.urs_host()?.to_string();

        let mut store = SecretStore::new(&settings.secret_file).with_env(USERNAME_VAR, PASSWORD_VAR);
        if let Some(netrc) = &settings.netrc_file {
            store = store.with_netrc(netrc);
        }
        if settings.interactive {
            if let Some(prompter) = TerminalPrompter::detect() {
                store = store.with_prompter(prompter);
            }
        }
        let store = Arc::new(store);

        let tokens = Arc::new(
            TokenLifecycleManager::new(store.clone(), UrsClient::new(http.clone(), &settings.urs_url))
                .with_timezone(settings.timezone),
        );

        let providers = ProviderCredentialCache::with_endpoints(
            S3CredentialsClient::new(http.clone(), tokens.clone(), &urs_host),
            settings.providers.clone(),
        )
        .with_store(store.clone());

        let catalog = CatalogClient::new(http, &settings.cmr_url, &urs_host, tokens.clone())
            .with_progress(settings.progress);

        debug!(
            urs = %settings.urs_url,
            cmr = %settings.cmr_url,
            secret_file = %settings.secret_file.display(),
            "earthdata client ready"
        );

        Ok(Self {
            settings,
            urs_host,
            store,
            tokens,
            providers,
            catalog,
        })
    }

    /// Granules matching `query`.
    pub fn search(&self, query: &CatalogQuery) -> Result<Vec<GranuleRecord>> {
        self.catalog.search(query)
    }

    pub fn search_detailed(&self, query: &CatalogQuery) -> Result<SearchResults> {
        self.catalog.search_detailed(query)
    }

    pub fn collections(&self, query: &CollectionQuery) -> Result<Vec<CollectionSummary>> {
        self.catalog.list_collections(query)
    }

    /// Temporary S3 credentials for a DAAC, e.g. `lpdaac`.
    pub fn provider_credentials(&self, provider_id: &str) -> Result<ProviderCredential> {
        self.providers.get(provider_id)
    }

    pub fn bearer_token(&self) -> Result<BearerToken> {
        self.tokens.get_valid_token(&self.urs_host)
    }

    /// Revokes the current bearer token. Returns whether one existed.
    pub fn revoke_token(&self) -> Result<bool> {
        self.tokens.revoke(&self.urs_host)
    }

    /// The login for the URS host, obtaining it first if needed.
    pub fn login(&self) -> Result<LoginSecret> {
        self.store.ensure(&self.urs_host)
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn urs_host(&self) -> &str {
        &self.urs_host
    }

    pub fn secret_store(&self) -> &Arc<SecretStore> {
        &self.store
    }

    pub fn token_manager(&self) -> &Arc<TokenLifecycleManager> {
        &self.tokens
    }

    pub fn provider_cache(&self) -> &ProviderCredentialCache {
        &self.providers
    }

    pub fn catalog(&self) -> &CatalogClient {
        &self.catalog
    }
}
