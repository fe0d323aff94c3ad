use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use chrono::{FixedOffset, Offset, Utc};

use crate::error::{Error, Result};
use crate::netrc;
use crate::provider::DEFAULT_PROVIDERS;
use crate::util::{host_of, strip_quotes};

pub const DEFAULT_URS_URL: &str = "https://urs.earthdata.nasa.gov";
pub const DEFAULT_CMR_URL: &str = "https://cmr.earthdata.nasa.gov/search";

const SECRET_FILE_NAME: &str = ".earthdatarc";

/// Everything needed to wire a [`Client`](crate::Client).
#[derive(Debug, Clone)]
pub struct Settings {
    /// Earthdata Login root, e.g. `https://urs.earthdata.nasa.gov`.
    pub urs_url: String,
    /// CMR search root, e.g. `https://cmr.earthdata.nasa.gov/search`.
    pub cmr_url: String,
    pub secret_file: PathBuf,
    pub netrc_file: Option<PathBuf>,
    /// Provider id to temporary-credential endpoint.
    pub providers: BTreeMap<String, String>,
    /// Offset used to read date-only token expirations.
    pub timezone: FixedOffset,
    /// Whether to verify TLS certificates.
    pub verify: bool,
    pub timeout: Duration,
    pub progress: bool,
    /// Prompt on the terminal when no login is stored or provisioned.
    pub interactive: bool,
}

impl Settings {
    /// Settings with every default and the given secret file.
    pub fn new(secret_file: impl Into<PathBuf>) -> Self {
        Self {
            urs_url: DEFAULT_URS_URL.to_string(),
            cmr_url: DEFAULT_CMR_URL.to_string(),
            secret_file: secret_file.into(),
            netrc_file: netrc::home_path(),
            providers: DEFAULT_PROVIDERS
                .iter()
                .map(|(id, url)| (id.to_string(), url.to_string()))
                .collect(),
            timezone: Utc.fix(),
            verify: true,
            timeout: Duration::from_secs(60),
            progress: false,
            interactive: true,
        }
    }

    /// Reads settings from (in order of precedence):
    /// - environment variables `EARTHDATA_URS_URL`, `EARTHDATA_CMR_URL`,
    ///   `EARTHDATA_SECRET_FILE`, `EARTHDATA_NETRC` / `NETRC`,
    ///   `EARTHDATA_TZ_OFFSET`, `EARTHDATA_VERIFY`, `EARTHDATA_TIMEOUT`
    /// - an existing `./.earthdatarc`, then `~/.earthdatarc`
    /// - built-in defaults
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|k| std::env::var(k).ok(), &secret_candidates())
    }

    pub(crate) fn from_lookup<F>(lookup: F, candidates: &[PathBuf]) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |k: &str| {
            lookup(k)
                .map(|v| strip_quotes(&v).to_string())
                .filter(|v| !v.is_empty())
        };

        let secret_file = match var("EARTHDATA_SECRET_FILE") {
            Some(p) => PathBuf::from(p),
            None => discover_secret_file(candidates).ok_or_else(|| {
                Error::Config(
                    "no location for the secret file (set EARTHDATA_SECRET_FILE)".to_string(),
                )
            })?,
        };

        let mut settings = Self::new(secret_file);

        if let Some(url) = var("EARTHDATA_URS_URL") {
            settings.urs_url = url.trim_end_matches('/').to_string();
        }
        if let Some(url) = var("EARTHDATA_CMR_URL") {
            settings.cmr_url = url.trim_end_matches('/').to_string();
        }
        if let Some(p) = var("EARTHDATA_NETRC").or_else(|| var("NETRC")) {
            settings.netrc_file = Some(PathBuf::from(p));
        }
        if let Some(tz) = var("EARTHDATA_TZ_OFFSET") {
            settings.timezone = parse_offset(&tz).ok_or_else(|| {
                Error::Config(format!("EARTHDATA_TZ_OFFSET {tz:?} is not an offset like -05:00"))
            })?;
        }
        if let Some(v) = var("EARTHDATA_VERIFY") {
            settings.verify = !matches!(v.to_ascii_lowercase().as_str(), "0" | "false" | "no");
        }
        if let Some(t) = var("EARTHDATA_TIMEOUT") {
            let secs = t
                .parse::<f64>()
                .ok()
                .filter(|s| s.is_finite() && *s > 0.0)
                .ok_or_else(|| Error::Config(format!("EARTHDATA_TIMEOUT {t:?} is not a positive number of seconds")))?;
            settings.timeout = Duration::from_secs_f64(secs);
        }

        settings.urs_host()?;
        Ok(settings)
    }

    /// Host part of [`Settings::urs_url`]; logins and tokens are keyed by it.
    pub fn urs_host(&self) -> Result<&str> {
        host_of(&self.urs_url)
            .ok_or_else(|| Error::Config(format!("URS url {:?} has no host", self.urs_url)))
    }
}

fn secret_candidates() -> Vec<PathBuf> {
    let mut v = Vec::new();
    if let Ok(cwd) = std::env::current_dir() {
        v.push(cwd.join(SECRET_FILE_NAME));
    }
    if let Some(home) = dirs::home_dir() {
        v.push(home.join(SECRET_FILE_NAME));
    }
    v
}

/// First existing candidate, else the last one (where a new file is created).
fn discover_secret_file(candidates: &[PathBuf]) -> Option<PathBuf> {
    candidates
        .iter()
        .find(|p| p.exists())
        .or_else(|| candidates.last())
        .cloned()
}

/// `Z`, `UTC`, `+05:30`, `-0500` or `-05`.
pub(crate) fn parse_offset(s: &str) -> Option<FixedOffset> {
    let s = s.trim();
    if s.eq_ignore_ascii_case("z") || s.eq_ignore_ascii_case("utc") {
        return Some(Utc.fix());
    }

    let (sign, rest) = match s.as_bytes().first()? {
        b'+' => (1, &s[1..]),
        b'-' => (-1, &s[1..]),
        _ => return None,
    };
    let digits: String = rest.chars().filter(|c| *c != ':').collect();
    if !digits.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    let (hours, minutes) = match digits.len() {
        2 => (digits.parse::<i32>().ok()?, 0),
        4 => (digits[..2].parse::<i32>().ok()?, digits[2..].parse::<i32>().ok()?),
        _ => return None,
    };
    if hours > 23 || minutes > 59 {
        return None;
    }
    FixedOffset::east_opt(sign * (hours * 3600 + minutes * 60))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |k| map.get(k).cloned()
    }

    #[test]
    fn defaults_without_environment() {
        let dir = tempfile::tempdir().unwrap();
        let home = dir.path().join(SECRET_FILE_NAME);
        let s = Settings::from_lookup(lookup(&[]), &[dir.path().join("cwd-rc"), home.clone()]).unwrap();

        assert_eq!(s.urs_url, DEFAULT_URS_URL);
        assert_eq!(s.cmr_url, DEFAULT_CMR_URL);
        assert_eq!(s.secret_file, home);
        assert_eq!(s.urs_host().unwrap(), "urs.earthdata.nasa.gov");
        assert_eq!(s.timezone, Utc.fix());
        assert!(s.verify);
        assert_eq!(s.timeout, Duration::from_secs(60));
        assert!(s.providers.contains_key("podaac"));
    }

    #[test]
    fn existing_working_directory_file_wins() {
        let dir = tempfile::tempdir().unwrap();
        let cwd = dir.path().join("cwd-rc");
        std::fs::write(&cwd, "").unwrap();
        let s = Settings::from_lookup(lookup(&[]), &[cwd.clone(), dir.path().join("home-rc")]).unwrap();
        assert_eq!(s.secret_file, cwd);
    }

    #[test]
    fn environment_overrides() {
        let s = Settings::from_lookup(
            lookup(&[
                ("EARTHDATA_URS_URL", "http://127.0.0.1:4000/"),
                ("EARTHDATA_CMR_URL", "'http://127.0.0.1:5000/search'"),
                ("EARTHDATA_SECRET_FILE", "/tmp/rc"),
                ("NETRC", "/tmp/netrc-b"),
                ("EARTHDATA_NETRC", "/tmp/netrc-a"),
                ("EARTHDATA_TZ_OFFSET", "-05:00"),
                ("EARTHDATA_VERIFY", "0"),
                ("EARTHDATA_TIMEOUT", "2.5"),
            ]),
            &[],
        )
        .unwrap();

        assert_eq!(s.urs_url, "http://127.0.0.1:4000");
        assert_eq!(s.urs_host().unwrap(), "127.0.0.1");
        assert_eq!(s.cmr_url, "http://127.0.0.1:5000/search");
        assert_eq!(s.secret_file, PathBuf::from("/tmp/rc"));
        assert_eq!(s.netrc_file, Some(PathBuf::from("/tmp/netrc-a")));
        assert_eq!(s.timezone, FixedOffset::west_opt(5 * 3600).unwrap());
        assert!(!s.verify);
        assert_eq!(s.timeout, Duration::from_millis(2500));
    }

    #[test]
    fn invalid_values_are_reported() {
        let bad = [
            ("EARTHDATA_TZ_OFFSET", "eastern"),
            ("EARTHDATA_TIMEOUT", "-1"),
            ("EARTHDATA_URS_URL", "not a url"),
        ];
        for (k, v) in bad {
            let err = Settings::from_lookup(lookup(&[("EARTHDATA_SECRET_FILE", "/tmp/rc"), (k, v)]), &[])
                .unwrap_err();
            assert!(matches!(err, Error::Config(_)), "{k}: {err}");
        }
    }

    #[test]
    fn no_secret_file_location() {
        let err = Settings::from_lookup(lookup(&[]), &[]).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn offsets() {
        assert_eq!(parse_offset("Z"), Some(Utc.fix()));
        assert_eq!(parse_offset("+05:30"), FixedOffset::east_opt(5 * 3600 + 1800));
        assert_eq!(parse_offset("-0800"), FixedOffset::west_opt(8 * 3600));
        assert_eq!(parse_offset("+02"), FixedOffset::east_opt(2 * 3600));
        assert_eq!(parse_offset("05:00"), None);
        assert_eq!(parse_offset("+25:00"), None);
        assert_eq!(parse_offset("+5:0"), None);
    }
}
