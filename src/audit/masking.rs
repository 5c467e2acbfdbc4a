//! Sensitive-field masking for audit payloads.
//!
//! Keys are compared case-insensitively with `_` and `-` ignored, so
//! `access_token`, `accessToken` and `ACCESS-TOKEN` all match `accesstoken`.
//! Masking is total over [`serde_json::Value`]: objects and arrays are walked
//! recursively, primitives pass through untouched.

use serde_json::{Map, Value};

/// Replacement for masked values.
pub const REDACTED: &str = "[REDACTED]";

pub const DEFAULT_SENSITIVE_KEYS: &[&str] = &[
    "password",
    "senha",
    "currentPassword",
    "newPassword",
    "confirmPassword",
    "token",
    "accessToken",
    "refreshToken",
    "secret",
    "apiKey",
    "authorization",
    "cookie",
    "cpf",
    "creditCard",
];

#[derive(Debug, Clone)]
pub struct Masker {
    keys: Vec<String>,
}

impl Masker {
    pub fn new<I, S>(keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            keys: keys.into_iter().map(|k| normalize(k.as_ref())).collect(),
        }
    }

    pub fn is_sensitive(&self, key: &str) -> bool {
        let key = normalize(key);
        self.keys.iter().any(|k| *k == key)
    }

    pub fn mask(&self, value: Value) -> Value {
        match value {
            Value::Object(map) => Value::Object(self.mask_object(map)),
            Value::Array(items) => Value::Array(items.into_iter().map(|v| self.mask(v)).collect()),
            other => other,
        }
    }

    fn mask_object(&self, map: Map<String, Value>) -> Map<String, Value> {
        map.into_iter()
            .map(|(key, value)| {
                if self.is_sensitive(&key) {
                    (key, Value::String(REDACTED.to_string()))
                } else {
                    let masked = self.mask(value);
                    (key, masked)
                }
            })
            .collect()
    }
}

impl Default for Masker {
    fn default() -> Self {
        Self::new(DEFAULT_SENSITIVE_KEYS)
    }
}

fn normalize(key: &str) -> String {
    key.chars()
        .filter(|c| *c != '_' && *c != '-')
        .flat_map(char::to_lowercase)
        .collect()
}
