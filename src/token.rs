//! Earthdata Login bearer tokens.
//!
//! The manager keeps at most one valid token per host. A miss lists the
//! tokens the service knows for the login, revokes the expired ones, keeps
//! the one with the latest expiration and only generates a new token when
//! nothing valid is left.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, FixedOffset, NaiveDate, Offset, Utc};
use parking_lot::Mutex;
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::error::{Error, Result, auth_service_error};
use crate::http::{HttpSession, parse_json, read_text};
use crate::secret_store::{LoginSecret, SecretStore};
use crate::util::urljoin;

/// Date format URS uses for `expiration_date`.
const URS_DATE_FORMAT: &str = "%m/%d/%Y";

#[derive(Clone, PartialEq, Eq)]
pub struct BearerToken {
    pub host: String,
    pub value: String,
    pub expiration: DateTime<Utc>,
}

impl fmt::Debug for BearerToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BearerToken")
            .field("host", &self.host)
            .field("value", &"<redacted>")
            .field("expiration", &self.expiration)
            .finish()
    }
}

impl BearerToken {
    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        self.expiration > now
    }

    pub fn is_valid(&self) -> bool {
        self.is_valid_at(Utc::now())
    }
}

/// A token as reported by the auth service.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct IssuedToken {
    pub access_token: String,
    pub expiration_date: String,
    #[serde(default)]
    pub token_type: Option<String>,
}

/// Parses a token expiration.
///
/// Accepts RFC 3339 instants and the service's `%m/%d/%Y` dates; the latter
/// mean midnight at `timezone`.
pub(crate) fn parse_token_expiration(s: &str, timezone: FixedOffset) -> Option<DateTime<Utc>> {
    let s = s.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    let date = NaiveDate::parse_from_str(s, URS_DATE_FORMAT).ok()?;
    date.and_hms_opt(0, 0, 0)?
        .and_local_timezone(timezone)
        .single()
        .map(|dt| dt.with_timezone(&Utc))
}

/// Token endpoints of the auth service.
pub trait AuthApi: Send + Sync {
    fn list_tokens(&self, login: &LoginSecret) -> Result<Vec<IssuedToken>>;
    fn generate_token(&self, login: &LoginSecret) -> Result<IssuedToken>;
    fn revoke_token(&self, login: &LoginSecret, token: &str) -> Result<()>;
}

/// Anything that can hand out a valid bearer token for a host.
pub trait TokenSource: Send + Sync {
    fn bearer_token(&self, host: &str) -> Result<BearerToken>;
}

impl<T: TokenSource + ?Sized> TokenSource for Arc<T> {
    fn bearer_token(&self, host: &str) -> Result<BearerToken> {
        (**self).bearer_token(host)
    }
}

/// Earthdata Login (URS) token API over HTTP basic auth.
#[derive(Debug, Clone)]
pub struct UrsClient {
    http: HttpSession,
    base_url: String,
}

impl UrsClient {
    pub fn new(http: HttpSession, base_url: impl Into<String>) -> Self {
        Self {
            http,
            base_url: base_url.into(),
        }
    }

    fn call(&self, method: &str, path: &str, login: &LoginSecret, query: &[(&str, &str)]) -> Result<String> {
        let url = urljoin(&self.base_url, path);
        let resp = self.http.robust_request(&url, |c| {
            let req = match method {
                "GET" => c.get(&url),
                _ => c.post(&url),
            };
            req.basic_auth(&login.username, Some(&login.password))
                .query(query)
                .send()
        })?;

        let (status, text) = read_text(&url, resp)?;
        if !status.is_success() {
            return Err(auth_service_error(status, &url, &text));
        }
        Ok(text)
    }
}

impl AuthApi for UrsClient {
    fn list_tokens(&self, login: &LoginSecret) -> Result<Vec<IssuedToken>> {
        let text = self.call("GET", "/api/users/tokens", login, &[])?;
        parse_json(&urljoin(&self.base_url, "/api/users/tokens"), &text)
    }

    fn generate_token(&self, login: &LoginSecret) -> Result<IssuedToken> {
        let text = self.call("POST", "/api/users/token", login, &[])?;
        parse_json(&urljoin(&self.base_url, "/api/users/token"), &text)
    }

    fn revoke_token(&self, login: &LoginSecret, token: &str) -> Result<()> {
        self.call("POST", "/api/users/revoke_token", login, &[("token", token)])?;
        Ok(())
    }
}

type Slot = Arc<Mutex<Option<BearerToken>>>;

/// Hands out bearer tokens, refreshing them lazily.
///
/// Each host has its own lock, held across the refresh, so concurrent misses
/// for one host produce a single list/generate round.
pub struct TokenLifecycleManager<A = UrsClient> {
    store: Arc<SecretStore>,
    api: A,
    timezone: FixedOffset,
    slots: Mutex<HashMap<String, Slot>>,
}

impl<A: AuthApi> TokenLifecycleManager<A> {
    pub fn new(store: Arc<SecretStore>, api: A) -> Self {
        Self {
            store,
            api,
            timezone: Utc.fix(),
            slots: Mutex::new(HashMap::new()),
        }
    }

    /// Offset at which the service's date-only expirations are interpreted.
    pub fn with_timezone(mut self, timezone: FixedOffset) -> Self {
        self.timezone = timezone;
        self
    }

    pub fn timezone(&self) -> FixedOffset {
        self.timezone
    }

    pub fn store(&self) -> &Arc<SecretStore> {
        &self.store
    }

    fn slot(&self, host: &str) -> Slot {
        self.slots.lock().entry(host.to_string()).or_default().clone()
    }

    /// Returns a token for `host` whose expiration is in the future.
    pub fn get_valid_token(&self, host: &str) -> Result<BearerToken> {
        let slot = self.slot(host);
        let mut cached = slot.lock();

        if let Some(token) = cached.as_ref().filter(|t| t.is_valid()) {
            return Ok(token.clone());
        }

        if let Some(token) = self
            .store
            .load_token(host, self.timezone)?
            .filter(BearerToken::is_valid)
        {
            debug!(host, expiration = %token.expiration, "reusing stored token");
            *cached = Some(token.clone());
            return Ok(token);
        }

        let token = self.refresh(host).map_err(|e| match e {
            Error::Authentication { .. } | Error::MissingCredentials { .. } | Error::TokenRefresh { .. } => e,
            other => Error::TokenRefresh {
                host: host.to_string(),
                reason: other.to_string(),
            },
        })?;

        self.store.store_token(&token)?;
        *cached = Some(token.clone());
        Ok(token)
    }

    /// Revokes the current token for `host` and forgets it.
    ///
    /// Returns `false` when there was nothing to revoke.
    pub fn revoke(&self, host: &str) -> Result<bool> {
        let slot = self.slot(host);
        let mut cached = slot.lock();

        let current = match cached.take() {
            Some(t) => Some(t),
            None => self.store.load_token(host, self.timezone)?,
        };
        let Some(token) = current else {
            return Ok(false);
        };

        let login = self.store.get(host)?;
        self.api.revoke_token(&login, &token.value)?;
        self.store.clear_token(host)?;
        info!(host, "revoked bearer token");
        Ok(true)
    }

    fn refresh(&self, host: &str) -> Result<BearerToken> {
        let login = self.store.ensure(host)?;
        let issued = self.api.list_tokens(&login)?;
        let now = Utc::now();

        let mut valid = Vec::new();
        let mut expired = Vec::new();
        for t in issued {
            match parse_token_expiration(&t.expiration_date, self.timezone) {
                Some(expiration) if expiration > now => valid.push(BearerToken {
                    host: host.to_string(),
                    value: t.access_token,
                    expiration,
                }),
                Some(_) => expired.push(t),
                None => warn!(host, expiration = %t.expiration_date, "skipping token with unreadable expiration"),
            }
        }

        for t in &expired {
            match self.api.revoke_token(&login, &t.access_token) {
                Ok(()) => debug!(host, expiration = %t.expiration_date, "revoked expired token"),
                Err(e) => warn!(host, error = %e, "failed to revoke expired token"),
            }
        }

        if let Some(token) = valid.into_iter().max_by_key(|t| t.expiration) {
            info!(host, expiration = %token.expiration, revoked = expired.len(), "using existing token");
            return Ok(token);
        }

        let generated = self.api.generate_token(&login)?;
        let expiration = parse_token_expiration(&generated.expiration_date, self.timezone)
            .ok_or_else(|| Error::TokenRefresh {
                host: host.to_string(),
                reason: format!(
                    "generated token has unreadable expiration {:?}",
                    generated.expiration_date
                ),
            })?;
        info!(host, expiration = %expiration, "generated new token");
        Ok(BearerToken {
            host: host.to_string(),
            value: generated.access_token,
            expiration,
        })
    }
}

impl<A: AuthApi> TokenSource for TokenLifecycleManager<A> {
    fn bearer_token(&self, host: &str) -> Result<BearerToken> {
        self.get_valid_token(host)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;
    use std::time::Duration;

    const HOST: &str = "urs.earthdata.nasa.gov";

    #[derive(Default)]
    struct FakeAuth {
        tokens: Mutex<Vec<IssuedToken>>,
        list_calls: AtomicUsize,
        generate_calls: AtomicUsize,
        revoked: Mutex<Vec<String>>,
        fail_revoke: bool,
        fail_list: Option<fn() -> Error>,
        generate_delay: Duration,
    }

    fn issued(value: &str, date: &str) -> IssuedToken {
        IssuedToken {
            access_token: value.to_string(),
            expiration_date: date.to_string(),
            token_type: None,
        }
    }

    impl FakeAuth {
        fn with_tokens(tokens: Vec<IssuedToken>) -> Self {
            Self {
                tokens: Mutex::new(tokens),
                ..Self::default()
            }
        }
    }

    impl AuthApi for FakeAuth {
        fn list_tokens(&self, _login: &LoginSecret) -> Result<Vec<IssuedToken>> {
            self.list_calls.fetch_add(1, Ordering::SeqCst);
            if let Some(fail) = self.fail_list {
                return Err(fail());
            }
            Ok(self.tokens.lock().clone())
        }

        fn generate_token(&self, _login: &LoginSecret) -> Result<IssuedToken> {
            thread::sleep(self.generate_delay);
            let n = self.generate_calls.fetch_add(1, Ordering::SeqCst);
            let t = issued(&format!("generated-{n}"), "12/31/2099");
            self.tokens.lock().push(t.clone());
            Ok(t)
        }

        fn revoke_token(&self, _login: &LoginSecret, token: &str) -> Result<()> {
            if self.fail_revoke {
                return Err(Error::Transport {
                    url: "revoke".into(),
                    attempts: 3,
                    message: "connection reset".into(),
                });
            }
            self.revoked.lock().push(token.to_string());
            self.tokens.lock().retain(|t| t.access_token != token);
            Ok(())
        }
    }

    fn manager(dir: &tempfile::TempDir, api: FakeAuth) -> TokenLifecycleManager<FakeAuth> {
        let store = SecretStore::new(dir.path().join(".earthdatarc"));
        store.provision(&LoginSecret::new(HOST, "alice", "pw")).unwrap();
        TokenLifecycleManager::new(Arc::new(store), api)
    }

    #[test]
    fn valid_read_is_idempotent_with_one_service_call() {
        let dir = tempfile::tempdir().unwrap();
        let m = manager(&dir, FakeAuth::with_tokens(vec![issued("tok", "01/01/2099")]));

        let first = m.get_valid_token(HOST).unwrap();
        let second = m.get_valid_token(HOST).unwrap();
        assert_eq!(first, second);
        assert_eq!(first.value, "tok");
        assert_eq!(m.api.list_calls.load(Ordering::SeqCst), 1);
        assert_eq!(m.api.generate_calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn expired_token_is_revoked_and_valid_one_returned() {
        let dir = tempfile::tempdir().unwrap();
        let m = manager(
            &dir,
            FakeAuth::with_tokens(vec![issued("old", "01/01/2020"), issued("new", "01/01/2099")]),
        );

        let token = m.get_valid_token(HOST).unwrap();
        assert_eq!(token.value, "new");
        assert_eq!(token.expiration, Utc.with_ymd_and_hms(2099, 1, 1, 0, 0, 0).unwrap());
        assert_eq!(*m.api.revoked.lock(), vec!["old".to_string()]);
        assert_eq!(m.api.generate_calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn no_tokens_forces_single_generation_and_persists() {
        let dir = tempfile::tempdir().unwrap();
        let m = manager(&dir, FakeAuth::default());

        let token = m.get_valid_token(HOST).unwrap();
        assert_eq!(token.value, "generated-0");
        assert_eq!(m.api.generate_calls.load(Ordering::SeqCst), 1);

        let stored = m.store().load_token(HOST, m.timezone()).unwrap();
        assert_eq!(stored, Some(token));
    }

    #[test]
    fn all_expired_revokes_each_then_generates() {
        let dir = tempfile::tempdir().unwrap();
        let m = manager(
            &dir,
            FakeAuth::with_tokens(vec![issued("a", "01/01/2020"), issued("b", "06/30/2021")]),
        );

        let token = m.get_valid_token(HOST).unwrap();
        assert_eq!(token.value, "generated-0");
        let mut revoked = m.api.revoked.lock().clone();
        revoked.sort();
        assert_eq!(revoked, vec!["a".to_string(), "b".to_string()]);
        assert_eq!(m.api.generate_calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn latest_expiration_wins() {
        let dir = tempfile::tempdir().unwrap();
        let m = manager(
            &dir,
            FakeAuth::with_tokens(vec![issued("later", "03/01/2099"), issued("sooner", "02/01/2099")]),
        );
        assert_eq!(m.get_valid_token(HOST).unwrap().value, "later");
    }

    #[test]
    fn revocation_failure_does_not_abort() {
        let dir = tempfile::tempdir().unwrap();
        let mut api = FakeAuth::with_tokens(vec![issued("old", "01/01/2020")]);
        api.fail_revoke = true;
        let m = manager(&dir, api);

        let token = m.get_valid_token(HOST).unwrap();
        assert_eq!(token.value, "generated-0");
    }

    #[test]
    fn unreadable_expiration_is_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let m = manager(&dir, FakeAuth::with_tokens(vec![issued("weird", "sometime")]));
        assert_eq!(m.get_valid_token(HOST).unwrap().value, "generated-0");
        assert!(m.api.revoked.lock().is_empty());
    }

    #[test]
    fn authentication_failure_is_not_wrapped() {
        let dir = tempfile::tempdir().unwrap();
        let api = FakeAuth {
            fail_list: Some(|| Error::Authentication {
                code: "invalid_credentials".into(),
                description: "Invalid user credentials".into(),
            }),
            ..FakeAuth::default()
        };
        let m = manager(&dir, api);

        let err = m.get_valid_token(HOST).unwrap_err();
        assert!(err.is_authentication(), "{err:?}");
        assert_eq!(m.api.list_calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn transport_failure_becomes_token_refresh() {
        let dir = tempfile::tempdir().unwrap();
        let api = FakeAuth {
            fail_list: Some(|| Error::Transport {
                url: "tokens".into(),
                attempts: 3,
                message: "timed out".into(),
            }),
            ..FakeAuth::default()
        };
        let m = manager(&dir, api);
        assert!(matches!(m.get_valid_token(HOST), Err(Error::TokenRefresh { .. })));
    }

    #[test]
    fn stored_token_is_reused_without_service_calls() {
        let dir = tempfile::tempdir().unwrap();
        let first = manager(&dir, FakeAuth::default());
        let token = first.get_valid_token(HOST).unwrap();

        let store = Arc::clone(first.store());
        let second = TokenLifecycleManager::new(store, FakeAuth::default());
        assert_eq!(second.get_valid_token(HOST).unwrap(), token);
        assert_eq!(second.api.list_calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn concurrent_misses_generate_once() {
        let dir = tempfile::tempdir().unwrap();
        let api = FakeAuth {
            generate_delay: Duration::from_millis(50),
            ..FakeAuth::default()
        };
        let m = Arc::new(manager(&dir, api));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let m = Arc::clone(&m);
                thread::spawn(move || m.get_valid_token(HOST).unwrap())
            })
            .collect();
        let tokens: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

        assert_eq!(m.api.generate_calls.load(Ordering::SeqCst), 1);
        assert!(tokens.iter().all(|t| t == &tokens[0]));
    }

    #[test]
    fn revoke_returns_to_absent() {
        let dir = tempfile::tempdir().unwrap();
        let m = manager(&dir, FakeAuth::default());
        let token = m.get_valid_token(HOST).unwrap();

        assert!(m.revoke(HOST).unwrap());
        assert_eq!(*m.api.revoked.lock(), vec![token.value]);
        assert_eq!(m.store().load_token(HOST, m.timezone()).unwrap(), None);
        assert!(!m.revoke(HOST).unwrap());

        assert_eq!(m.get_valid_token(HOST).unwrap().value, "generated-1");
    }

    #[test]
    fn date_only_expiration_uses_host_offset() {
        let est = FixedOffset::west_opt(5 * 3600).unwrap();
        let exp = parse_token_expiration("6/4/2099", est).unwrap();
        assert_eq!(exp, Utc.with_ymd_and_hms(2099, 6, 4, 5, 0, 0).unwrap());

        let rfc = parse_token_expiration("2099-06-04T00:00:00+00:00", est).unwrap();
        assert_eq!(rfc, Utc.with_ymd_and_hms(2099, 6, 4, 0, 0, 0).unwrap());

        assert_eq!(parse_token_expiration("tomorrow", est), None);
    }

    #[test]
    fn validity_is_strictly_before_expiration() {
        let exp = Utc.with_ymd_and_hms(2030, 1, 1, 0, 0, 0).unwrap();
        let t = BearerToken {
            host: HOST.into(),
            value: "v".into(),
            expiration: exp,
        };
        assert!(t.is_valid_at(exp - chrono::Duration::seconds(1)));
        assert!(!t.is_valid_at(exp));
    }

    #[test]
    fn debug_hides_token_value() {
        let t = BearerToken {
            host: HOST.into(),
            value: "eyJ0eXAiOiJKV1QiLCJvcmlnaW4iOiJFYXJ0aGRhdGEgTG9naW4ifQ".into(),
            expiration: Utc.with_ymd_and_hms(2030, 1, 1, 0, 0, 0).unwrap(),
        };
        let shown = format!("{t:?}");
        assert!(!shown.contains("eyJ0eXAi"), "{shown}");
        assert!(shown.contains("<redacted>"));
        assert!(shown.contains(HOST));
    }
}
