use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct NetrcEntry {
    pub(crate) login: String,
    pub(crate) password: String,
}

/// Looks up the `machine` entry for `host`, falling back to `default`.
///
/// Missing files are not an error; a `.netrc` is an optional source.
pub(crate) fn lookup(path: &Path, host: &str) -> Result<Option<NetrcEntry>> {
    let text = match std::fs::read_to_string(path) {
        Ok(t) => t,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(Error::io(path, e)),
    };
    Ok(find(&text, host))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Target {
    Host,
    Other,
    Default,
}

struct Pending {
    target: Target,
    login: Option<String>,
    password: Option<String>,
}

impl Pending {
    fn new(target: Target) -> Self {
        Self {
            target,
            login: None,
            password: None,
        }
    }

    fn complete(self) -> Option<(Target, NetrcEntry)> {
        Some((
            self.target,
            NetrcEntry {
                login: self.login?,
                password: self.password?,
            },
        ))
    }
}

fn find(text: &str, host: &str) -> Option<NetrcEntry> {
    let tokens = tokenize(text);
    let mut iter = tokens.into_iter().peekable();
    let mut entries: Vec<(Target, NetrcEntry)> = Vec::new();
    let mut current: Option<Pending> = None;

    while let Some(tok) = iter.next() {
        match tok.as_str() {
            "machine" | "default" | "macdef" => {
                if let Some(done) = current.take().and_then(Pending::complete) {
                    entries.push(done);
                }
                match tok.as_str() {
                    "machine" => {
                        let name = iter.next().unwrap_or_default();
                        current = Some(Pending::new(if name == host {
                            Target::Host
                        } else {
                            Target::Other
                        }));
                    }
                    "default" => current = Some(Pending::new(Target::Default)),
                    // Macro bodies are skipped up to the next entry keyword.
                    _ => {
                        while iter
                            .peek()
                            .is_some_and(|t| !matches!(t.as_str(), "machine" | "default"))
                        {
                            iter.next();
                        }
                    }
                }
            }
            "login" => {
                let v = iter.next();
                if let Some(p) = current.as_mut() {
                    p.login = v;
                }
            }
            "password" => {
                let v = iter.next();
                if let Some(p) = current.as_mut() {
                    p.password = v;
                }
            }
            "account" => {
                iter.next();
            }
            _ => {}
        }
    }
    if let Some(done) = current.take().and_then(Pending::complete) {
        entries.push(done);
    }

    let idx = entries
        .iter()
        .position(|(t, _)| *t == Target::Host)
        .or_else(|| entries.iter().position(|(t, _)| *t == Target::Default))?;
    Some(entries.swap_remove(idx).1)
}

/// Whitespace separated tokens. A token starting with `#` comments out the
/// rest of its line; a `#` inside a token is kept.
fn tokenize(text: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    for line in text.lines() {
        for tok in line.split_whitespace() {
            if tok.starts_with('#') {
                break;
            }
            tokens.push(crate::util::strip_quotes(tok).to_string());
        }
    }
    tokens
}

/// `~/.netrc`.
pub(crate) fn home_path() -> Option<PathBuf> {
    dirs::home_dir().map(|h| h.join(".netrc"))
}
