use std::io::{self, BufRead, IsTerminal, Write};

/// Interactive source of login identities.
pub trait Prompter: Send + Sync {
    /// Asks for `(username, password)` for `host`. `None` means the user
    /// declined or input is unavailable.
    fn prompt_login(&self, host: &str) -> io::Result<Option<(String, String)>>;
}

/// Reads the login identity from the controlling terminal.
///
/// The password is read as a plain line; input is echoed, and the prompt says
/// so before asking.
#[derive(Debug, Default, Clone, Copy)]
pub struct TerminalPrompter;

impl TerminalPrompter {
    /// `Some` only when stdin is attached to a terminal.
    pub fn detect() -> Option<Self> {
        io::stdin().is_terminal().then_some(TerminalPrompter)
    }
}

impl Prompter for TerminalPrompter {
    fn prompt_login(&self, host: &str) -> io::Result<Option<(String, String)>> {
        read_login(host, &mut io::stdin().lock(), &mut io::stderr())
    }
}

fn read_login<R: BufRead, W: Write>(
    host: &str,
    input: &mut R,
    output: &mut W,
) -> io::Result<Option<(String, String)>> {
    write!(output, "Enter {host} username: ")?;
    output.flush()?;
    let mut username = String::new();
    if input.read_line(&mut username)? == 0 {
        return Ok(None);
    }

    writeln!(output, "Warning: the password will be visible as you type it.")?;
    write!(output, "Enter {host} password: ")?;
    output.flush()?;
    let mut password = String::new();
    if input.read_line(&mut password)? == 0 {
        return Ok(None);
    }

    let username = username.trim().to_string();
    let password = password.trim_end_matches(['\r', '\n']).to_string();
    if username.is_empty() || password.is_empty() {
        return Ok(None);
    }
    Ok(Some((username, password)))
}
