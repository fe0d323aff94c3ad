use std::path::PathBuf;

use reqwest::StatusCode;
use thiserror::Error;

/// Errors returned by every component of this crate.
#[derive(Debug, Error)]
pub enum Error {
    /// No login identity is stored for the host and none could be obtained
    /// without a prompt.
    #[error("no Earthdata login for {host}: {reason}")]
    MissingCredentials { host: String, reason: String },

    /// The service rejected the login identity or token. Never retried.
    #[error("authentication failed: {code}: {description}")]
    Authentication { code: String, description: String },

    /// A bearer token could not be listed or generated.
    #[error("token refresh for {host} failed: {reason}")]
    TokenRefresh { host: String, reason: String },

    /// Unknown provider id, or temporary credentials could not be obtained.
    #[error("provider credentials for {provider}: {reason}")]
    ProviderCredential { provider: String, reason: String },

    /// The catalog answered a search with a non-success status.
    #[error("catalog query failed (HTTP {status}): {code}: {description}")]
    CatalogQuery {
        status: u16,
        code: String,
        description: String,
    },

    /// One entry of an otherwise successful catalog response is malformed.
    #[error("malformed catalog entry {entry}: {reason}")]
    CatalogParse { entry: String, reason: String },

    #[error("invalid query: {0}")]
    InvalidQuery(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    /// Transient failures persisted through every retry.
    #[error("request to {url} failed after {attempts} attempt(s): {message}")]
    Transport {
        url: String,
        attempts: usize,
        message: String,
    },

    /// A non-success status that is neither an auth failure nor a catalog error.
    #[error("HTTP {status} from {url}: {message}")]
    Status {
        url: String,
        status: u16,
        message: String,
    },

    #[error("malformed secret file {} (line {line}): {reason}", path.display())]
    SecretFile {
        path: PathBuf,
        line: usize,
        reason: String,
    },

    /// A value that cannot be written to the secret file as one line.
    #[error("cannot store {key} in the secret file: {reason}")]
    SecretValue { key: String, reason: String },

    #[error("{}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse response from {url}: {source}")]
    Json {
        url: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to build HTTP client: {0}")]
    HttpClient(#[source] reqwest::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Error::Io {
            path: path.into(),
            source,
        }
    }

    /// Whether this error is an authentication failure reported by a service.
    pub fn is_authentication(&self) -> bool {
        matches!(self, Error::Authentication { .. })
    }
}

/// Error bodies returned by Earthdata Login and CMR.
///
/// URS answers `{"error": ..., "error_description": ...}` while CMR uses
/// `{"errors": [...]}`.
#[derive(Debug, Default, serde::Deserialize)]
pub(crate) struct ServiceErrorBody {
    #[serde(default)]
    pub(crate) error: Option<String>,
    #[serde(default)]
    pub(crate) error_description: Option<String>,
    #[serde(default)]
    pub(crate) errors: Vec<String>,
}

impl ServiceErrorBody {
    pub(crate) fn parse(text: &str) -> Self {
        serde_json::from_str(text).unwrap_or_default()
    }

    /// Returns `(code, description)`, falling back to the HTTP status and the
    /// raw body when the service sent something unstructured.
    pub(crate) fn code_and_description(&self, status: StatusCode, raw: &str) -> (String, String) {
        let code = self.error.clone().unwrap_or_else(|| {
            status
                .canonical_reason()
                .map(|r| r.to_lowercase().replace(' ', "_"))
                .unwrap_or_else(|| status.as_u16().to_string())
        });

        let description = match (&self.error_description, self.errors.is_empty()) {
            (Some(d), _) => d.clone(),
            (None, false) => self.errors.join("; "),
            (None, true) => raw.trim().to_string(),
        };

        (code, description)
    }
}

/// Maps an unsuccessful auth-service response onto the error taxonomy.
pub(crate) fn auth_service_error(status: StatusCode, url: &str, text: &str) -> Error {
    let body = ServiceErrorBody::parse(text);
    let (code, description) = body.code_and_description(status, text);

    if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
        return Error::Authentication { code, description };
    }

    Error::Status {
        url: url.to_string(),
        status: status.as_u16(),
        message: format!("{code}: {description}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn urs_error_body() {
        let text = r#"{"error":"invalid_credentials","error_description":"Invalid user credentials"}"#;
        let body = ServiceErrorBody::parse(text);
        let (code, description) = body.code_and_description(StatusCode::UNAUTHORIZED, text);
        assert_eq!(code, "invalid_credentials");
        assert_eq!(description, "Invalid user credentials");
    }

    #[test]
    fn cmr_error_body() {
        let text = r#"{"errors":["Collection not found","Try again"]}"#;
        let body = ServiceErrorBody::parse(text);
        let (code, description) = body.code_and_description(StatusCode::BAD_REQUEST, text);
        assert_eq!(code, "bad_request");
        assert_eq!(description, "Collection not found; Try again");
    }

    #[test]
    fn unstructured_body_falls_back_to_raw_text() {
        let body = ServiceErrorBody::parse("<html>gateway</html>");
        let (code, description) =
            body.code_and_description(StatusCode::BAD_GATEWAY, "<html>gateway</html>");
        assert_eq!(code, "bad_gateway");
        assert_eq!(description, "<html>gateway</html>");
    }

    #[test]
    fn unauthorized_maps_to_authentication() {
        let err = auth_service_error(
            StatusCode::UNAUTHORIZED,
            "https://urs.example/api/users/tokens",
            r#"{"error":"invalid_credentials","error_description":"bad password"}"#,
        );
        assert!(err.is_authentication());
        assert_eq!(
            err.to_string(),
            "authentication failed: invalid_credentials: bad password"
        );
    }

    #[test]
    fn other_status_is_not_authentication() {
        let err = auth_service_error(StatusCode::NOT_FOUND, "https://urs.example/x", "{}");
        assert!(matches!(err, Error::Status { status: 404, .. }));
    }
}
