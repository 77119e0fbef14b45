//! Credential line parsing for `username<SEP>password` dumps.
//!
//! A line parses only if it splits into exactly two non-empty fields. Lines
//! that fail are skipped by the caller and never count toward totals.
//!
//! Use [`parse_credential_line`] with [`Separator::Tab`] for the canonical
//! TSV format, or [`Separator::TabOrSpace`] for dumps that mix in
//! single-space separated lines.
use clap::ValueEnum;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum CredentialError {
    #[error("malformed credential line: {0}")]
    Malformed(String),
}

/// Field separator accepted by the parser.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum Separator {
    /// Exactly one tab between two non-empty fields.
    #[default]
    Tab,
    /// Tab first, then a single space between two fields that contain no
    /// space.
    TabOrSpace,
}

/// A parsed `(username, password)` pair borrowed from the raw input line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Credential<'a> {
    pub username: &'a [u8],
    pub password: &'a [u8],
}

fn split_exactly_two(line: &[u8], sep: u8) -> Option<(&[u8], &[u8])> {
    let idx = memchr::memchr(sep, line)?;
    let (user, pass) = (&line[..idx], &line[idx + 1..]);
    if user.is_empty() || pass.is_empty() || memchr::memchr(sep, pass).is_some() {
        return None;
    }
    Some((user, pass))
}

/// Parse one credential line. Surrounding ASCII whitespace is trimmed first.
pub fn parse_credential_line(line: &[u8], sep: Separator) -> Result<Credential<'_>, CredentialError> {
    let trimmed = line.trim_ascii();
    let parsed = split_exactly_two(trimmed, b'\t').or_else(|| match sep {
        Separator::Tab => None,
        Separator::TabOrSpace => split_exactly_two(trimmed, b' '),
    });
    match parsed {
        Some((username, password)) => Ok(Credential { username, password }),
        None => Err(CredentialError::Malformed(
            String::from_utf8_lossy(trimmed).into_owned(),
        )),
    }
}
