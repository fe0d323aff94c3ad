//! Owner-only storage for the Earthdata login, the current bearer token and
//! cached provider credentials.

use std::fmt;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::FixedOffset;
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::ini::IniFile;
use crate::netrc;
use crate::prompt::Prompter;
use crate::provider::{ProviderCredential, format_provider_expiration, parse_provider_expiration};
use crate::token::{BearerToken, parse_token_expiration};

/// Long-lived login identity for one host.
#[derive(Clone, PartialEq, Eq)]
pub struct LoginSecret {
    pub host: String,
    pub username: String,
    pub password: String,
}

impl LoginSecret {
    pub fn new(host: impl Into<String>, username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            username: username.into(),
            password: password.into(),
        }
    }
}

impl fmt::Debug for LoginSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoginSecret")
            .field("host", &self.host)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

const USERNAME: &str = "username";
const PASSWORD: &str = "password";
const ACCESS_TOKEN: &str = "access_token";
const EXPIRATION_DATE: &str = "expiration_date";
const ACCESS_KEY: &str = "access_key";
const SECRET_KEY: &str = "secret_key";
const SESSION_TOKEN: &str = "session_token";

/// File-backed secret store.
///
/// Every read-modify-write cycle holds an in-process lock; writes go through
/// a temp file created with mode `0600` and renamed over the target.
pub struct SecretStore {
    path: PathBuf,
    netrc: Option<PathBuf>,
    env_vars: Option<(String, String)>,
    prompter: Option<Box<dyn Prompter>>,
    lock: Mutex<()>,
}

impl fmt::Debug for SecretStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SecretStore")
            .field("path", &self.path)
            .field("netrc", &self.netrc)
            .field("env_vars", &self.env_vars)
            .field("interactive", &self.prompter.is_some())
            .finish()
    }
}

impl SecretStore {
    /// A store with no pre-provisioned sources and no prompt.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            netrc: None,
            env_vars: None,
            prompter: None,
            lock: Mutex::new(()),
        }
    }

    /// Reads missing logins from this `.netrc` file.
    pub fn with_netrc(mut self, path: impl Into<PathBuf>) -> Self {
        self.netrc = Some(path.into());
        self
    }

    /// Reads missing logins from these environment variables.
    pub fn with_env(mut self, username_var: impl Into<String>, password_var: impl Into<String>) -> Self {
        self.env_vars = Some((username_var.into(), password_var.into()));
        self
    }

    pub fn with_prompter(mut self, prompter: impl Prompter + 'static) -> Self {
        self.prompter = Some(Box::new(prompter));
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the login for `host`, obtaining and persisting it first if the
    /// file has none.
    pub fn ensure(&self, host: &str) -> Result<LoginSecret> {
        let _guard = self.lock.lock();
        let mut file = self.read_file()?;
        if let Some(secret) = login_from(&file, host) {
            return Ok(secret);
        }

        let secret = match self.provisioned(host)? {
            Some(secret) => secret,
            None => self.prompt(host)?,
        };

        file.set(host, USERNAME, secret.username.as_str())?;
        file.set(host, PASSWORD, secret.password.as_str())?;
        self.write_file(&file)?;
        info!(host, path = %self.path.display(), "stored Earthdata login");
        Ok(secret)
    }

    /// Returns the login for `host` without prompting or writing.
    pub fn get(&self, host: &str) -> Result<LoginSecret> {
        let file = {
            let _guard = self.lock.lock();
            self.read_file()?
        };
        if let Some(secret) = login_from(&file, host) {
            return Ok(secret);
        }
        self.provisioned(host)?.ok_or_else(|| self.missing(host))
    }

    /// Stores `secret`, replacing any existing login for its host.
    pub fn provision(&self, secret: &LoginSecret) -> Result<()> {
        let _guard = self.lock.lock();
        let mut file = self.read_file()?;
        file.set(&secret.host, USERNAME, secret.username.as_str())?;
        file.set(&secret.host, PASSWORD, secret.password.as_str())?;
        self.write_file(&file)
    }

    /// Deletes everything stored for `host`. Returns whether anything existed.
    pub fn remove(&self, host: &str) -> Result<bool> {
        let _guard = self.lock.lock();
        let mut file = self.read_file()?;
        if !file.remove_section(host) {
            return Ok(false);
        }
        self.write_file(&file)?;
        info!(host, "removed Earthdata login");
        Ok(true)
    }

    /// Persisted bearer token for `host`, if any. Unreadable expirations are
    /// treated as absent.
    pub fn load_token(&self, host: &str, timezone: FixedOffset) -> Result<Option<BearerToken>> {
        let file = {
            let _guard = self.lock.lock();
            self.read_file()?
        };
        let (Some(value), Some(expiration)) = (file.get(host, ACCESS_TOKEN), file.get(host, EXPIRATION_DATE))
        else {
            return Ok(None);
        };
        match parse_token_expiration(expiration, timezone) {
            Some(expiration) => Ok(Some(BearerToken {
                host: host.to_string(),
                value: value.to_string(),
                expiration,
            })),
            None => {
                warn!(host, expiration, "ignoring stored token with unreadable expiration");
                Ok(None)
            }
        }
    }

    pub fn store_token(&self, token: &BearerToken) -> Result<()> {
        let _guard = self.lock.lock();
        let mut file = self.read_file()?;
        file.set(&token.host, ACCESS_TOKEN, token.value.as_str())?;
        file.set(&token.host, EXPIRATION_DATE, token.expiration.to_rfc3339())?;
        self.write_file(&file)?;
        debug!(host = %token.host, expiration = %token.expiration, "stored bearer token");
        Ok(())
    }

    pub fn clear_token(&self, host: &str) -> Result<()> {
        let _guard = self.lock.lock();
        let mut file = self.read_file()?;
        file.remove_key(host, ACCESS_TOKEN);
        file.remove_key(host, EXPIRATION_DATE);
        self.write_file(&file)
    }

    /// Persisted temporary credentials for `provider_id`, if complete.
    pub fn load_provider(&self, provider_id: &str) -> Result<Option<ProviderCredential>> {
        let file = {
            let _guard = self.lock.lock();
            self.read_file()?
        };
        let fields = (
            file.get(provider_id, ACCESS_KEY),
            file.get(provider_id, SECRET_KEY),
            file.get(provider_id, SESSION_TOKEN),
            file.get(provider_id, EXPIRATION_DATE),
        );
        let (Some(access_key), Some(secret_key), Some(session_token), Some(expiration)) = fields else {
            return Ok(None);
        };
        let Some(expiration) = parse_provider_expiration(expiration) else {
            warn!(provider = provider_id, expiration, "ignoring cached credentials with unreadable expiration");
            return Ok(None);
        };
        Ok(Some(ProviderCredential {
            provider_id: provider_id.to_string(),
            access_key: access_key.to_string(),
            secret_key: secret_key.to_string(),
            session_token: session_token.to_string(),
            expiration,
        }))
    }

    pub fn store_provider(&self, credential: &ProviderCredential) -> Result<()> {
        let _guard = self.lock.lock();
        let mut file = self.read_file()?;
        let id = credential.provider_id.as_str();
        file.set(id, ACCESS_KEY, credential.access_key.as_str())?;
        file.set(id, SECRET_KEY, credential.secret_key.as_str())?;
        file.set(id, SESSION_TOKEN, credential.session_token.as_str())?;
        file.set(id, EXPIRATION_DATE, format_provider_expiration(&credential.expiration))?;
        self.write_file(&file)
    }

    pub fn clear_provider(&self, provider_id: &str) -> Result<()> {
        let _guard = self.lock.lock();
        let mut file = self.read_file()?;
        if file.remove_section(provider_id) {
            self.write_file(&file)?;
        }
        Ok(())
    }

    fn provisioned(&self, host: &str) -> Result<Option<LoginSecret>> {
        if let Some((user_var, pass_var)) = &self.env_vars {
            if let (Ok(username), Ok(password)) = (std::env::var(user_var), std::env::var(pass_var)) {
                if !username.is_empty() && !password.is_empty() {
                    debug!(host, "using login from environment");
                    return Ok(Some(LoginSecret::new(host, username, password)));
                }
            }
        }

        if let Some(path) = &self.netrc {
            if let Some(entry) = netrc::lookup(path, host)? {
                debug!(host, netrc = %path.display(), "using login from netrc");
                return Ok(Some(LoginSecret::new(host, entry.login, entry.password)));
            }
        }

        Ok(None)
    }

    fn prompt(&self, host: &str) -> Result<LoginSecret> {
        let Some(prompter) = &self.prompter else {
            return Err(self.missing(host));
        };
        match prompter.prompt_login(host) {
            Ok(Some((username, password))) => Ok(LoginSecret::new(host, username, password)),
            Ok(None) => Err(Error::MissingCredentials {
                host: host.to_string(),
                reason: "no login entered at the prompt".to_string(),
            }),
            Err(e) => Err(Error::MissingCredentials {
                host: host.to_string(),
                reason: format!("prompt failed: {e}"),
            }),
        }
    }

    fn missing(&self, host: &str) -> Error {
        let mut looked = vec![self.path.display().to_string()];
        if let Some((u, p)) = &self.env_vars {
            looked.push(format!("${u}/${p}"));
        }
        if let Some(n) = &self.netrc {
            looked.push(n.display().to_string());
        }
        Error::MissingCredentials {
            host: host.to_string(),
            reason: format!(
                "not found in {} and no interactive prompt is available",
                looked.join(", ")
            ),
        }
    }

    fn read_file(&self) -> Result<IniFile> {
        let text = match fs::read_to_string(&self.path) {
            Ok(t) => t,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(IniFile::default()),
            Err(e) => return Err(Error::io(&self.path, e)),
        };
        restrict_existing(&self.path)?;
        IniFile::parse(&self.path, &text)
    }

    fn write_file(&self, file: &IniFile) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(|e| Error::io(parent, e))?;
            }
        }

        let tmp = temp_path(&self.path);
        match fs::remove_file(&tmp) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(Error::io(&tmp, e)),
        }

        let mut out = create_private(&tmp).map_err(|e| Error::io(&tmp, e))?;
        out.write_all(file.render().as_bytes())
            .and_then(|_| out.sync_all())
            .map_err(|e| Error::io(&tmp, e))?;
        drop(out);

        fs::rename(&tmp, &self.path).map_err(|e| Error::io(&self.path, e))
    }
}

fn login_from(file: &IniFile, host: &str) -> Option<LoginSecret> {
    let username = file.get(host, USERNAME)?;
    let password = file.get(host, PASSWORD)?;
    Some(LoginSecret::new(host, username, password))
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_else(|| "secrets".into());
    name.push(".tmp");
    path.with_file_name(name)
}

#[cfg(unix)]
fn create_private(path: &Path) -> std::io::Result<File> {
    use std::os::unix::fs::OpenOptionsExt;
    OpenOptions::new()
        .write(true)
        .create_new(true)
        .mode(0o600)
        .open(path)
}

#[cfg(not(unix))]
fn create_private(path: &Path) -> std::io::Result<File> {
    // No POSIX mode bits: the file inherits the ACL of its directory.
    warn!(path = %path.display(), "owner-only permissions are not enforced on this platform");
    OpenOptions::new().write(true).create_new(true).open(path)
}

#[cfg(unix)]
fn restrict_existing(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    let meta = fs::metadata(path).map_err(|e| Error::io(path, e))?;
    let mode = meta.permissions().mode();
    if mode & 0o077 != 0 {
        warn!(path = %path.display(), mode = %format!("{:o}", mode & 0o777), "secret file readable by others, restricting to 0600");
        fs::set_permissions(path, fs::Permissions::from_mode(0o600)).map_err(|e| Error::io(path, e))?;
    }
    Ok(())
}

#[cfg(not(unix))]
fn restrict_existing(_path: &Path) -> Result<()> {
    Ok(())
}
