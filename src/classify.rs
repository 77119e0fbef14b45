//! Password classification.
//!
//! [`classify`] maps a password to its character-class flags, the two
//! structural format patterns, and its length. It is pure and holds no state
//! besides the compiled format regexes, so workers call it concurrently
//! without synchronization.
//!
//! Passwords are raw bytes. Dumps are not guaranteed to be UTF-8, and two
//! passwords that differ only in invalid bytes are still different passwords.
use std::sync::LazyLock;

use regex::bytes::Regex;

/// Letters followed by digits, e.g. `Password1`.
pub const FORMAT_A: &str = "^[a-zA-Z]+[0-9]+$";
/// Digits followed by letters, e.g. `123abc`.
pub const FORMAT_B: &str = "^[0-9]+[a-zA-Z]+$";

static FORMAT_A_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(FORMAT_A).expect("FORMAT_A is a valid regex"));
static FORMAT_B_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(FORMAT_B).expect("FORMAT_B is a valid regex"));

/// Classification of one password plus its occurrence count within the scope
/// that first saw it (a worker's local cache).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PasswordRecord {
    /// Length in bytes.
    pub length: usize,
    pub has_lower: bool,
    pub has_upper: bool,
    pub has_digit: bool,
    /// Any byte outside `[A-Za-z0-9]`.
    pub has_symbol: bool,
    pub matches_format_a: bool,
    pub matches_format_b: bool,
    pub occurrences: u64,
}

impl PasswordRecord {
    pub fn has_letters(&self) -> bool {
        self.has_upper || self.has_lower
    }
}

/// Classify a password. An empty password yields all flags false and length
/// 0; `occurrences` is always 1.
pub fn classify(password: &[u8]) -> PasswordRecord {
    let mut rec = PasswordRecord {
        length: password.len(),
        occurrences: 1,
        ..PasswordRecord::default()
    };
    for b in password {
        match b {
            b'a'..=b'z' => rec.has_lower = true,
            b'A'..=b'Z' => rec.has_upper = true,
            b'0'..=b'9' => rec.has_digit = true,
            _ => rec.has_symbol = true,
        }
    }
    // Both patterns need letters and digits and no symbols.
    if rec.has_letters() && rec.has_digit && !rec.has_symbol {
        rec.matches_format_a = FORMAT_A_RE.is_match(password);
        rec.matches_format_b = FORMAT_B_RE.is_match(password);
    }
    rec
}
