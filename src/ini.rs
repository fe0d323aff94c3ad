//! Minimal INI reader/writer for the secret file.
//!
//! ```text
//! [urs.earthdata.nasa.gov]
//! username = alice
//! password = secret
//! access_token = eyJ0eXAi...
//! expiration_date = 03/14/2027
//!
//! [lpdaac]
//! access_key = ASIA...
//! expiration_date = 2026-10-16 19:13:22+00:00
//! ```

use std::borrow::Cow;
use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::path::Path;

use crate::error::{Error, Result};
use crate::util::strip_quotes;

pub(crate) type Section = BTreeMap<String, String>;

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub(crate) struct IniFile {
    sections: BTreeMap<String, Section>,
}

impl IniFile {
    pub(crate) fn parse(path: &Path, text: &str) -> Result<Self> {
        let mut file = IniFile::default();
        let mut current: Option<String> = None;

        for (idx, raw) in text.lines().enumerate() {
            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') || line.starts_with(';') {
                continue;
            }

            if let Some(name) = line.strip_prefix('[') {
                let name = name.strip_suffix(']').ok_or_else(|| Error::SecretFile {
                    path: path.to_path_buf(),
                    line: idx + 1,
                    reason: "unterminated section header".to_string(),
                })?;
                let name = name.trim().to_string();
                file.sections.entry(name.clone()).or_default();
                current = Some(name);
                continue;
            }

            let Some((k, v)) = line.split_once(['=', ':']) else {
                return Err(Error::SecretFile {
                    path: path.to_path_buf(),
                    line: idx + 1,
                    reason: "expected `key = value`".to_string(),
                });
            };

            let Some(section) = current.as_ref() else {
                return Err(Error::SecretFile {
                    path: path.to_path_buf(),
                    line: idx + 1,
                    reason: "key outside of any section".to_string(),
                });
            };

            file.sections
                .entry(section.clone())
                .or_default()
                .insert(k.trim().to_string(), strip_quotes(v).to_string());
        }

        Ok(file)
    }

    pub(crate) fn get(&self, section: &str, key: &str) -> Option<&str> {
        self.section(section)
            .and_then(|s| s.get(key))
            .map(String::as_str)
            .filter(|v| !v.is_empty())
    }

    /// Values must fit on one line; anything else is refused before the file
    /// is touched.
    pub(crate) fn set(&mut self, section: &str, key: &str, value: impl Into<String>) -> Result<()> {
        let value = value.into();
        for (what, text) in [("section name", section), ("key", key), ("value", value.as_str())] {
            if text.contains(['\r', '\n']) {
                return Err(Error::SecretValue {
                    key: format!("[{section}] {key}"),
                    reason: format!("{what} contains a line break"),
                });
            }
        }
        self.sections
            .entry(section.to_string())
            .or_default()
            .insert(key.to_string(), value);
        Ok(())
    }

    pub(crate) fn remove_key(&mut self, section: &str, key: &str) {
        if let Some(s) = self.sections.get_mut(section) {
            s.remove(key);
        }
    }

    fn section(&self, name: &str) -> Option<&Section> {
        self.sections.get(name)
    }

    pub(crate) fn remove_section(&mut self, section: &str) -> bool {
        self.sections.remove(section).is_some()
    }

    pub(crate) fn render(&self) -> String {
        let mut out = String::new();
        for (name, entries) in &self.sections {
            if !out.is_empty() {
                out.push('\n');
            }
            let _ = writeln!(out, "[{name}]");
            for (k, v) in entries {
                let _ = writeln!(out, "{k} = {}", quote(v));
            }
        }
        out
    }
}

/// Wraps values that `parse` would otherwise trim or unquote.
fn quote(v: &str) -> Cow<'_, str> {
    let needs_quotes = v.trim() != v
        || v.starts_with(['"', '\''])
        || v.ends_with(['"', '\'']);
    if needs_quotes {
        Cow::Owned(format!("\"{v}\""))
    } else {
        Cow::Borrowed(v)
    }
}
