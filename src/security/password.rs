//! Password strength rules.

use serde::Serialize;
use std::fmt;

pub const MIN_LENGTH: usize = 8;
pub const MAX_LENGTH: usize = 128;

/// Matched as case-insensitive substrings.
const COMMON_PASSWORDS: &[&str] = &[
    "password",
    "123456",
    "12345678",
    "qwerty",
    "abc123",
    "111111",
    "letmein",
    "welcome",
    "admin",
    "senha",
    "iloveyou",
    "monkey",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PasswordRule {
    TooShort,
    TooLong,
    MissingUppercase,
    MissingLowercase,
    MissingDigit,
    MissingSymbol,
    CommonPassword,
}

impl fmt::Display for PasswordRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let message = match self {
            PasswordRule::TooShort => "Password must be at least 8 characters long",
            PasswordRule::TooLong => "Password must be at most 128 characters long",
            PasswordRule::MissingUppercase => "Password must contain an uppercase letter",
            PasswordRule::MissingLowercase => "Password must contain a lowercase letter",
            PasswordRule::MissingDigit => "Password must contain a digit",
            PasswordRule::MissingSymbol => "Password must contain a symbol",
            PasswordRule::CommonPassword => "Password contains a commonly used password",
        };
        f.write_str(message)
    }
}

/// Every rule the password violates; empty when it is acceptable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PasswordReport {
    pub violations: Vec<PasswordRule>,
}

impl PasswordReport {
    pub fn is_strong(&self) -> bool {
        self.violations.is_empty()
    }

    pub fn messages(&self) -> Vec<String> {
        self.violations.iter().map(ToString::to_string).collect()
    }
}

pub fn check_strength(password: &str) -> PasswordReport {
    let mut violations = Vec::new();
    let length = password.chars().count();

    if length < MIN_LENGTH {
        violations.push(PasswordRule::TooShort);
    }
    if length > MAX_LENGTH {
        violations.push(PasswordRule::TooLong);
    }
    if !password.chars().any(char::is_uppercase) {
        violations.push(PasswordRule::MissingUppercase);
    }
    if !password.chars().any(char::is_lowercase) {
        violations.push(PasswordRule::MissingLowercase);
    }
    if !password.chars().any(|c| c.is_ascii_digit()) {
        violations.push(PasswordRule::MissingDigit);
    }
    if !password.chars().any(|c| !c.is_alphanumeric() && !c.is_whitespace()) {
        violations.push(PasswordRule::MissingSymbol);
    }

    let lowered = password.to_lowercase();
    if COMMON_PASSWORDS.iter().any(|common| lowered.contains(common)) {
        violations.push(PasswordRule::CommonPassword);
    }

    PasswordReport { violations }
}
