//! Passwords and the prompts that collect them

use crate::error::{ErrorCategory, ErrorKind, Result, VaultError};
use std::collections::VecDeque;
use std::fmt;
use std::io::{self, BufRead, IsTerminal, Write};
use zeroize::Zeroizing;

/// A user-supplied password.
///
/// The bytes are overwritten when the value is dropped. `Debug` never prints
/// the content, so a password can sit inside logged structs safely.
#[derive(Clone)]
pub struct Password(Zeroizing<String>);

impl Password {
    pub fn new(password: impl Into<String>) -> Self {
        Self(Zeroizing::new(password.into()))
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Byte-wise equality, used for the save-time confirmation check.
    pub fn matches(&self, other: &Password) -> bool {
        self.0.as_bytes() == other.0.as_bytes()
    }

    pub(crate) fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }
}

impl From<&str> for Password {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl fmt::Debug for Password {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Password([REDACTED])")
    }
}

/// Source of passwords for the lifecycle controller and the CLI.
pub trait PasswordPrompt {
    /// Ask for a password, showing `label` where the source supports it.
    ///
    /// `Ok(None)` means the user gave up; callers treat it as a cancel.
    fn prompt(&mut self, label: &str) -> Result<Option<Password>>;
}

/// Returns queued passwords in order, then gives up (for testing)
pub struct ScriptedPasswordPrompt {
    answers: VecDeque<Password>,
    asked: usize,
}

impl ScriptedPasswordPrompt {
    pub fn new<I, P>(answers: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<Password>,
    {
        Self {
            answers: answers.into_iter().map(Into::into).collect(),
            asked: 0,
        }
    }

    /// Number of times `prompt` was called.
    pub fn asked(&self) -> usize {
        self.asked
    }
}

impl PasswordPrompt for ScriptedPasswordPrompt {
    fn prompt(&mut self, _label: &str) -> Result<Option<Password>> {
        self.asked += 1;
        Ok(self.answers.pop_front())
    }
}

/// Reads one password per line from any buffered source
///
/// Used for `--password-stdin`, where a save with protection reads the
/// password and its confirmation as two consecutive lines. End of input
/// counts as giving up.
pub struct LinePasswordPrompt {
    reader: Box<dyn BufRead>,
}

impl LinePasswordPrompt {
    pub fn new(reader: Box<dyn BufRead>) -> Self {
        Self { reader }
    }
}

impl PasswordPrompt for LinePasswordPrompt {
    fn prompt(&mut self, _label: &str) -> Result<Option<Password>> {
        let mut line = Zeroizing::new(String::new());
        let read = self.reader.read_line(&mut line).map_err(|e| {
            VaultError::with_kind_and_source(
                ErrorCategory::InvalidInput,
                ErrorKind::Io,
                format!("error reading password: {}", e),
                e,
            )
        })?;
        if read == 0 {
            return Ok(None);
        }
        let trimmed = line.trim_end_matches(['\n', '\r']);
        Ok(Some(Password::new(trimmed)))
    }
}

/// Reads passwords from the terminal with no echo
pub struct TerminalPasswordPrompt;

impl TerminalPasswordPrompt {
    pub fn new() -> Self {
        Self
    }
}

impl Default for TerminalPasswordPrompt {
    fn default() -> Self {
        Self::new()
    }
}

impl PasswordPrompt for TerminalPasswordPrompt {
    fn prompt(&mut self, label: &str) -> Result<Option<Password>> {
        if !io::stdin().is_terminal() {
            return Err(VaultError::with_kind(
                ErrorCategory::InvalidInput,
                ErrorKind::PasswordUnavailable,
                "cannot read password from terminal - stdin is not a terminal",
            ));
        }

        let mut stderr = io::stderr();
        stderr
            .write_all(format!("{} (snipvault): ", label).as_bytes())
            .and_then(|_| stderr.flush())
            .map_err(|e| {
                VaultError::with_kind_and_source(
                    ErrorCategory::InvalidInput,
                    ErrorKind::Io,
                    format!("failed to write prompt: {}", e),
                    e,
                )
            })?;

        // rpassword hands back a plain String; it is moved, not copied, into
        // the zeroizing wrapper.
        let password = rpassword::read_password().map_err(|e| {
            VaultError::with_kind_and_source(
                ErrorCategory::InvalidInput,
                ErrorKind::PasswordUnavailable,
                format!("failure reading password: {}", e),
                e,
            )
        })?;

        Ok(Some(Password::new(password)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_debug_is_redacted() {
        let password = Password::from("hunter2");
        let rendered = format!("{:?}", password);
        assert!(!rendered.contains("hunter2"));
        assert!(rendered.contains("REDACTED"));
    }

    #[test]
    fn test_matches() {
        assert!(Password::from("p1").matches(&Password::from("p1")));
        assert!(!Password::from("p1").matches(&Password::from("p2")));
        assert!(Password::from("").is_empty());
    }

    #[test]
    fn test_scripted_prompt() {
        let mut prompt = ScriptedPasswordPrompt::new(["a", "b"]);
        assert!(prompt.prompt("Password").unwrap().unwrap().matches(&"a".into()));
        assert!(prompt.prompt("Password").unwrap().unwrap().matches(&"b".into()));
        assert!(prompt.prompt("Password").unwrap().is_none());
        assert_eq!(prompt.asked(), 3);
    }

    #[test]
    fn test_line_prompt_reads_one_line_per_call() {
        let data: &[u8] = b"first\r\nsecond\n";
        let mut prompt = LinePasswordPrompt::new(Box::new(data));
        assert!(prompt.prompt("Password").unwrap().unwrap().matches(&"first".into()));
        assert!(prompt.prompt("Confirm").unwrap().unwrap().matches(&"second".into()));
        assert!(prompt.prompt("Password").unwrap().is_none());
    }

    #[test]
    fn test_line_prompt_without_trailing_newline() {
        let data: &[u8] = b"only";
        let mut prompt = LinePasswordPrompt::new(Box::new(data));
        assert!(prompt.prompt("Password").unwrap().unwrap().matches(&"only".into()));
    }

    /// Tests the terminal prompt. This is ignored by default and must be run
    /// explicitly and with human input:
    ///
    /// cargo test test_terminal_prompt_interactive -- --ignored --nocapture
    #[test]
    #[ignore]
    fn test_terminal_prompt_interactive() {
        let mut prompt = TerminalPasswordPrompt::new();
        let password = prompt.prompt("Test password").unwrap().unwrap();
        assert!(!password.is_empty(), "Expected non-empty password");
    }
}
