//! National identifier (CPF) validation.
//!
//! A CPF is 11 digits, the last two being check digits over the first nine
//! and first ten respectively. Identifiers are only ever logged through
//! [`mask`].
//!
//! [`InMemoryIdentifierRegistry`] only knows the records it has been told
//! about: writes that pass through the gateway, plus whatever was loaded with
//! [`InMemoryIdentifierRegistry::seed`] at startup. Records created upstream
//! before startup and never seeded are invisible to the uniqueness check.

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

use crate::audit::{AuditCategory, AuditEntry, AuditLevel, AuditTrail};

pub const CPF_LENGTH: usize = 11;

/// Why a raw identifier was refused. Messages are client-facing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum NationalIdError {
    #[error("CPF is required")]
    Empty,
    #[error("CPF must contain exactly 11 digits")]
    WrongLength,
    #[error("CPF cannot consist of a single repeated digit")]
    RepeatedDigits,
    #[error("CPF check digits are invalid")]
    InvalidChecksum,
}

impl NationalIdError {
    pub fn code(&self) -> &'static str {
        match self {
            NationalIdError::Empty => "empty",
            NationalIdError::WrongLength => "wrong_length",
            NationalIdError::RepeatedDigits => "repeated_digits",
            NationalIdError::InvalidChecksum => "invalid_checksum",
        }
    }
}

/// Result of [`process`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NationalIdCheck {
    pub valid: bool,
    pub sanitized: String,
    #[serde(skip_serializing_if = "Option::is_none", serialize_with = "error_message")]
    pub error: Option<NationalIdError>,
}

fn error_message<S: serde::Serializer>(
    error: &Option<NationalIdError>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    match error {
        Some(e) => serializer.serialize_str(&e.to_string()),
        None => serializer.serialize_none(),
    }
}

/// Strip everything but ASCII digits.
pub fn sanitize(raw: &str) -> String {
    raw.chars().filter(|c| c.is_ascii_digit()).collect()
}

fn classify(digits: &str) -> Result<(), NationalIdError> {
    let parsed: Option<Vec<u32>> = digits.chars().map(|c| c.to_digit(10)).collect();
    let d = match parsed {
        Some(d) if d.len() == CPF_LENGTH => d,
        _ => return Err(NationalIdError::WrongLength),
    };

    if d.iter().all(|x| *x == d[0]) {
        return Err(NationalIdError::RepeatedDigits);
    }
    if check_digit(&d[..9]) != d[9] || check_digit(&d[..10]) != d[10] {
        return Err(NationalIdError::InvalidChecksum);
    }
    Ok(())
}

/// Weights run from `len + 1` down to 2.
fn check_digit(digits: &[u32]) -> u32 {
    let top = digits.len() as u32 + 1;
    let sum: u32 = digits
        .iter()
        .enumerate()
        .map(|(i, d)| d * (top - i as u32))
        .sum();
    let r = 11 - sum % 11;
    if r >= 10 {
        0
    } else {
        r
    }
}

/// `true` for a well-formed, checksum-valid, digits-only CPF.
pub fn validate(digits: &str) -> bool {
    classify(digits).is_ok()
}

/// `***.***.DDD-DD`: only the last five digits survive.
pub fn mask(digits: &str) -> String {
    if digits.len() == CPF_LENGTH && digits.bytes().all(|b| b.is_ascii_digit()) {
        format!("***.***.{}-{}", &digits[6..9], &digits[9..])
    } else {
        "***.***.***-**".to_string()
    }
}

/// `DDD.DDD.DDD-DD`. Returns `None` unless given exactly 11 digits.
pub fn format(digits: &str) -> Option<String> {
    if digits.len() != CPF_LENGTH || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    Some(format!(
        "{}.{}.{}-{}",
        &digits[..3],
        &digits[3..6],
        &digits[6..9],
        &digits[9..]
    ))
}

/// Sanitize then validate.
pub fn process(raw: &str) -> NationalIdCheck {
    let sanitized = sanitize(raw);
    let error = if raw.trim().is_empty() {
        Some(NationalIdError::Empty)
    } else {
        classify(&sanitized).err()
    };
    NationalIdCheck {
        valid: error.is_none(),
        sanitized,
        error,
    }
}

#[derive(Debug, Error)]
pub enum LookupError {
    #[error("identifier lookup unavailable: {0}")]
    Unavailable(String),
}

/// Record-store capability used to enforce identifier uniqueness.
pub trait IdentifierLookup: Send + Sync {
    /// Whether another record in `category` already holds `sanitized`.
    /// `exclude_id` names the record being updated, if any.
    fn exists(
        &self,
        category: &str,
        sanitized: &str,
        exclude_id: Option<&str>,
    ) -> Result<bool, LookupError>;
}

/// What to do when the lookup itself fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LookupFailurePolicy {
    /// Accept the write.
    #[default]
    Allow,
    /// Refuse the write until the lookup recovers.
    Reject,
}

/// Why a write carrying an identifier was refused.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NationalIdRejection {
    #[error("{0}")]
    Invalid(NationalIdError),
    #[error("CPF is already registered")]
    Duplicate,
    #[error("CPF uniqueness could not be verified, try again later")]
    Unverifiable,
}

impl NationalIdRejection {
    pub fn code(&self) -> &'static str {
        match self {
            NationalIdRejection::Invalid(e) => e.code(),
            NationalIdRejection::Duplicate => "duplicate",
            NationalIdRejection::Unverifiable => "unverifiable",
        }
    }
}

/// Checksum plus uniqueness, with masked audit logging.
pub struct NationalIdGuard {
    lookup: Arc<dyn IdentifierLookup>,
    on_lookup_failure: LookupFailurePolicy,
    audit: Arc<AuditTrail>,
}

impl NationalIdGuard {
    pub fn new(
        lookup: Arc<dyn IdentifierLookup>,
        on_lookup_failure: LookupFailurePolicy,
        audit: Arc<AuditTrail>,
    ) -> Self {
        Self {
            lookup,
            on_lookup_failure,
            audit,
        }
    }

    /// Whether another record already holds the identifier. Lookup
    /// failures resolve according to the configured policy.
    pub fn is_duplicate(
        &self,
        category: &str,
        sanitized: &str,
        exclude_id: Option<&str>,
    ) -> Result<bool, NationalIdRejection> {
        match self.lookup.exists(category, sanitized, exclude_id) {
            Ok(found) => Ok(found),
            Err(e) => {
                tracing::error!(
                    category,
                    cpf = %mask(sanitized),
                    error = %e,
                    policy = ?self.on_lookup_failure,
                    "CPF uniqueness lookup failed"
                );
                self.audit.record(
                    AuditEntry::new(AuditLevel::Error, AuditCategory::DataModification, "cpf_lookup_failed")
                        .resource(category)
                        .details(json!({
                            "maskedCpf": mask(sanitized),
                            "error": e.to_string(),
                            "policy": format!("{:?}", self.on_lookup_failure),
                        })),
                );
                match self.on_lookup_failure {
                    LookupFailurePolicy::Allow => Ok(false),
                    LookupFailurePolicy::Reject => Err(NationalIdRejection::Unverifiable),
                }
            }
        }
    }

    /// Validate a raw identifier for a create (`exclude_id = None`) or an
    /// update of record `exclude_id`. Returns the sanitized value.
    pub fn validate_for_write(
        &self,
        category: &str,
        raw: &str,
        exclude_id: Option<&str>,
        source: &str,
    ) -> Result<String, NationalIdRejection> {
        let check = process(raw);
        if let Some(error) = check.error {
            self.reject(category, &check.sanitized, exclude_id, source, error.code());
            return Err(NationalIdRejection::Invalid(error));
        }

        if self.is_duplicate(category, &check.sanitized, exclude_id)? {
            self.reject(category, &check.sanitized, exclude_id, source, "duplicate");
            return Err(NationalIdRejection::Duplicate);
        }

        Ok(check.sanitized)
    }

    fn reject(
        &self,
        category: &str,
        sanitized: &str,
        record_id: Option<&str>,
        source: &str,
        reason: &str,
    ) {
        tracing::info!(category, cpf = %mask(sanitized), reason, "CPF rejected");
        self.audit.record(
            AuditEntry::new(AuditLevel::Warn, AuditCategory::DataModification, "cpf_rejected")
                .source(source)
                .resource(category)
                .details(json!({
                    "maskedCpf": mask(sanitized),
                    "reason": reason,
                    "recordId": record_id,
                })),
        );
    }
}

impl fmt::Debug for NationalIdGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NationalIdGuard")
            .field("on_lookup_failure", &self.on_lookup_failure)
            .finish()
    }
}

/// A record that already exists upstream, as listed in a seed file.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SeedRecord {
    pub category: String,
    pub cpf: String,
    pub id: String,
}

/// In-process identifier index: `(category, cpf) → record id`.
#[derive(Debug, Default)]
pub struct InMemoryIdentifierRegistry {
    entries: DashMap<(String, String), String>,
}

impl InMemoryIdentifierRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `sanitized` to `record_id`, dropping any identifier the record
    /// held before.
    pub fn register(&self, category: &str, sanitized: &str, record_id: &str) {
        self.entries
            .retain(|(cat, _), id| !(cat == category && id == record_id));
        self.entries.insert(
            (category.to_string(), sanitized.to_string()),
            record_id.to_string(),
        );
    }

    /// Index pre-existing records. Entries with an invalid identifier are
    /// skipped; returns how many were indexed.
    pub fn seed(&self, records: impl IntoIterator<Item = SeedRecord>) -> usize {
        let mut indexed = 0;
        for record in records {
            let digits = sanitize(&record.cpf);
            if !validate(&digits) {
                tracing::warn!(
                    category = %record.category,
                    record_id = %record.id,
                    cpf = %mask(&digits),
                    "Skipping seed record with invalid CPF"
                );
                continue;
            }
            self.entries.insert((record.category, digits), record.id);
            indexed += 1;
        }
        indexed
    }

    pub fn unregister(&self, category: &str, record_id: &str) {
        self.entries
            .retain(|(cat, _), id| !(cat == category && id == record_id));
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl IdentifierLookup for InMemoryIdentifierRegistry {
    fn exists(
        &self,
        category: &str,
        sanitized: &str,
        exclude_id: Option<&str>,
    ) -> Result<bool, LookupError> {
        let key = (category.to_string(), sanitized.to_string());
        Ok(match self.entries.get(&key) {
            Some(holder) => exclude_id != Some(holder.value().as_str()),
            None => false,
        })
    }
}
