//! A Rust client for NASA Earthdata: Earthdata Login (URS) credentials and
//! bearer tokens, per-DAAC temporary S3 credentials, and CMR granule search.
//!
//! ## Quick start
//! - Provide a login through `EARTHDATA_USERNAME` / `EARTHDATA_PASSWORD`, a
//!   `machine urs.earthdata.nasa.gov` entry in `~/.netrc`, or answer the
//!   terminal prompt once. The login is kept in `.earthdatarc` (mode `0600`).
//! - Build a [`CatalogQuery`] and call [`Client::search`].
//!
//! ```no_run
//! use earthdata::{CatalogQuery, Client, LinkKind};
//!
//! fn main() -> earthdata::Result<()> {
//!     let client = Client::from_env()?;
//!     let query = CatalogQuery::new("C2076090826-LPCLOUD")
//!         .bounding_box("-120.45,34.51,-120.40,34.53")?
//!         .temporal("2022-12-01T00:00:00Z,2022-12-07T23:59:59Z")?;
//!
//!     for granule in client.search(&query)? {
//!         for href in granule.links_for(LinkKind::S3) {
//!             println!("{} {}", granule.id, href);
//!         }
//!     }
//!
//!     let creds = client.provider_credentials("lpdaac")?;
//!     println!("S3 credentials valid until {}", creds.expiration);
//!     Ok(())
//! }
//! ```
//!
//! For full usage and configuration details, see the crate README.

#![forbid(unsafe_code)]

mod catalog;
mod client;
mod config;
mod error;
mod granule;
mod http;
mod ini;
mod netrc;
mod prompt;
mod provider;
mod query;
mod secret_store;
mod token;
mod util;

pub use catalog::{CatalogClient, CollectionQuery, SearchResults};
pub use client::{Client, PASSWORD_VAR, USERNAME_VAR};
pub use config::{DEFAULT_CMR_URL, DEFAULT_URS_URL, Settings};
pub use error::{Error, Result};
pub use granule::{CollectionSummary, GranuleRecord, LinkFilter, LinkKind};
pub use http::{HttpSession, RetryPolicy};
pub use prompt::{Prompter, TerminalPrompter};
pub use provider::{
    CredentialSource, DEFAULT_PROVIDERS, ProviderCredential, ProviderCredentialCache,
    S3CredentialsClient,
};
pub use query::{CatalogQuery, MAX_PAGE_SIZE};
pub use secret_store::{LoginSecret, SecretStore};
pub use token::{AuthApi, BearerToken, IssuedToken, TokenLifecycleManager, TokenSource, UrsClient};
