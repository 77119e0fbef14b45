//! Statistical aggregation over unique passwords.
//!
//! [`Aggregate`] holds raw counters for one scope (a worker partition or the
//! merged global view). Counters are signed so the merger can retract a
//! contribution that two partitions both claimed. [`StatReport`] turns the
//! final aggregate into fractions of the unique-password count.
use std::collections::BTreeMap;

use serde::Serialize;

use crate::classify::PasswordRecord;

pub fn pct(n: i64, d: i64) -> String {
    if d <= 0 {
        return "0.00%".to_string();
    }
    format!("{:.2}%", (n as f64) / (d as f64) * 100.0)
}

fn ratio(n: i64, d: i64) -> f64 {
    if d <= 0 { 0.0 } else { n as f64 / d as f64 }
}

/// Per-category counts of unique passwords. "letters" means upper or lower.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Categories {
    pub upper: i64,
    pub lower: i64,
    pub letters: i64,
    pub digits: i64,
    pub symbols: i64,
    pub letters_digits: i64,
    pub letters_symbols: i64,
    pub digits_symbols: i64,
    pub letters_digits_symbols: i64,
    pub upper_only: i64,
    pub lower_only: i64,
    pub letters_only: i64,
    pub digits_only: i64,
    pub symbols_only: i64,
    pub letters_digits_only: i64,
    pub letters_symbols_only: i64,
    pub digits_symbols_only: i64,
    pub format_a: i64,
    pub format_b: i64,
}

impl Categories {
    fn apply(&mut self, r: &PasswordRecord, a: i64) {
        let letters = r.has_letters();
        let (up, low, num, sym) = (r.has_upper, r.has_lower, r.has_digit, r.has_symbol);
        if up {
            self.upper += a;
            if !low && !num && !sym {
                self.upper_only += a;
            }
        }
        if low {
            self.lower += a;
            if !up && !num && !sym {
                self.lower_only += a;
            }
        }
        if letters {
            self.letters += a;
            if !num && !sym {
                self.letters_only += a;
            }
        }
        if num {
            self.digits += a;
            if !letters && !sym {
                self.digits_only += a;
            }
        }
        if sym {
            self.symbols += a;
            if !letters && !num {
                self.symbols_only += a;
            }
        }
        if letters && num {
            self.letters_digits += a;
            if !sym {
                self.letters_digits_only += a;
            }
        }
        if letters && sym {
            self.letters_symbols += a;
            if !num {
                self.letters_symbols_only += a;
            }
        }
        if num && sym {
            self.digits_symbols += a;
            if !letters {
                self.digits_symbols_only += a;
            }
        }
        if letters && num && sym {
            self.letters_digits_symbols += a;
        }
        if r.matches_format_a {
            self.format_a += a;
        }
        if r.matches_format_b {
            self.format_b += a;
        }
    }

    fn absorb(&mut self, o: &Self) {
        self.upper += o.upper;
        self.lower += o.lower;
        self.letters += o.letters;
        self.digits += o.digits;
        self.symbols += o.symbols;
        self.letters_digits += o.letters_digits;
        self.letters_symbols += o.letters_symbols;
        self.digits_symbols += o.digits_symbols;
        self.letters_digits_symbols += o.letters_digits_symbols;
        self.upper_only += o.upper_only;
        self.lower_only += o.lower_only;
        self.letters_only += o.letters_only;
        self.digits_only += o.digits_only;
        self.symbols_only += o.symbols_only;
        self.letters_digits_only += o.letters_digits_only;
        self.letters_symbols_only += o.letters_symbols_only;
        self.digits_symbols_only += o.digits_symbols_only;
        self.format_a += o.format_a;
        self.format_b += o.format_b;
    }

    /// Display labels paired with counts, in report order.
    pub fn labelled(&self) -> [(&'static str, i64); 19] {
        [
            ("Uppercase", self.upper),
            ("Lowercase", self.lower),
            ("Letters", self.letters),
            ("Digits", self.digits),
            ("Symbols", self.symbols),
            ("Letters + Digits", self.letters_digits),
            ("Letters + Symbols", self.letters_symbols),
            ("Digits + Symbols", self.digits_symbols),
            ("Letters + Digits + Symbols", self.letters_digits_symbols),
            ("Uppercase Only", self.upper_only),
            ("Lowercase Only", self.lower_only),
            ("Letters Only", self.letters_only),
            ("Digits Only", self.digits_only),
            ("Symbols Only", self.symbols_only),
            ("Letters + Digits Only", self.letters_digits_only),
            ("Letters + Symbols Only", self.letters_symbols_only),
            ("Digits + Symbols Only", self.digits_symbols_only),
            ("Format Letters→Digits", self.format_a),
            ("Format Digits→Letters", self.format_b),
        ]
    }
}

/// Raw counters for one scope. `total_pw` counts every parsed occurrence;
/// everything else counts unique passwords.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Aggregate {
    pub total_pw: u64,
    pub total_unique_pw: i64,
    pub categories: Categories,
    /// Password length in bytes -> unique passwords of that length.
    pub lengths: BTreeMap<usize, i64>,
}

impl Aggregate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add (`delta = 1`) or retract (`delta = -1`) one unique password's
    /// classification. Does not touch `total_pw`.
    pub fn apply(&mut self, record: &PasswordRecord, delta: i64) {
        self.total_unique_pw += delta;
        self.categories.apply(record, delta);
        let bucket = self.lengths.entry(record.length).or_insert(0);
        *bucket += delta;
        if *bucket == 0 {
            self.lengths.remove(&record.length);
        }
    }

    /// Record one parsed occurrence, unique or not.
    pub fn record_occurrence(&mut self) {
        self.total_pw += 1;
    }

    /// Sum another aggregate into this one.
    pub fn absorb(&mut self, other: &Aggregate) {
        self.total_pw += other.total_pw;
        self.total_unique_pw += other.total_unique_pw;
        self.categories.absorb(&other.categories);
        for (len, count) in &other.lengths {
            let bucket = self.lengths.entry(*len).or_insert(0);
            *bucket += count;
            if *bucket == 0 {
                self.lengths.remove(len);
            }
        }
    }
}

/// Normalized statistics. Field names are the stable serialized record.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatReport {
    #[serde(rename = "totalPasswords")]
    pub total_passwords: u64,
    #[serde(rename = "totalUniquePasswords")]
    pub total_unique_passwords: i64,
    #[serde(rename = "uniquePasswordsPercent")]
    pub unique_passwords_percent: f64,
    #[serde(rename = "hasUppercase")]
    pub has_uppercase: f64,
    #[serde(rename = "hasLowercase")]
    pub has_lowercase: f64,
    #[serde(rename = "hasLetters")]
    pub has_letters: f64,
    #[serde(rename = "hasNumbers")]
    pub has_numbers: f64,
    #[serde(rename = "hasSymbols")]
    pub has_symbols: f64,
    #[serde(rename = "hasLettersAndNumbers")]
    pub has_letters_and_numbers: f64,
    #[serde(rename = "hasLettersAndSymbols")]
    pub has_letters_and_symbols: f64,
    #[serde(rename = "hasNumbersAndSymbols")]
    pub has_numbers_and_symbols: f64,
    #[serde(rename = "hasLettersNumbersAndSymbols")]
    pub has_letters_numbers_and_symbols: f64,
    #[serde(rename = "hasUppercaseOnly")]
    pub has_uppercase_only: f64,
    #[serde(rename = "hasLowercaseOnly")]
    pub has_lowercase_only: f64,
    #[serde(rename = "hasLettersOnly")]
    pub has_letters_only: f64,
    #[serde(rename = "hasNumbersOnly")]
    pub has_numbers_only: f64,
    #[serde(rename = "hasSymbolsOnly")]
    pub has_symbols_only: f64,
    #[serde(rename = "hasLettersAndNumbersOnly")]
    pub has_letters_and_numbers_only: f64,
    #[serde(rename = "hasLettersAndSymbolsOnly")]
    pub has_letters_and_symbols_only: f64,
    #[serde(rename = "hasNumbersAndSymbolsOnly")]
    pub has_numbers_and_symbols_only: f64,
    #[serde(rename = "format^[a-zA-Z]+[0-9]+$")]
    pub format_letters_digits: f64,
    #[serde(rename = "format^[0-9]+[a-zA-Z]+$")]
    pub format_digits_letters: f64,
    #[serde(rename = "passwordLengths")]
    pub password_lengths: BTreeMap<usize, i64>,
}

impl StatReport {
    pub fn from_aggregate(agg: &Aggregate) -> Self {
        let tot = agg.total_unique_pw;
        let c = &agg.categories;
        let r = |n: i64| ratio(n, tot);
        Self {
            total_passwords: agg.total_pw,
            total_unique_passwords: tot,
            unique_passwords_percent: ratio(tot, i64::try_from(agg.total_pw).unwrap_or(i64::MAX)),
            has_uppercase: r(c.upper),
            has_lowercase: r(c.lower),
            has_letters: r(c.letters),
            has_numbers: r(c.digits),
            has_symbols: r(c.symbols),
            has_letters_and_numbers: r(c.letters_digits),
            has_letters_and_symbols: r(c.letters_symbols),
            has_numbers_and_symbols: r(c.digits_symbols),
            has_letters_numbers_and_symbols: r(c.letters_digits_symbols),
            has_uppercase_only: r(c.upper_only),
            has_lowercase_only: r(c.lower_only),
            has_letters_only: r(c.letters_only),
            has_numbers_only: r(c.digits_only),
            has_symbols_only: r(c.symbols_only),
            has_letters_and_numbers_only: r(c.letters_digits_only),
            has_letters_and_symbols_only: r(c.letters_symbols_only),
            has_numbers_and_symbols_only: r(c.digits_symbols_only),
            format_letters_digits: r(c.format_a),
            format_digits_letters: r(c.format_b),
            password_lengths: agg.lengths.clone(),
        }
    }
}
