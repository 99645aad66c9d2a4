//! Classification rule tables
//!
//! The cascade is data, not control flow: rules are matched top to bottom
//! and the first family with a keyword hit wins. Extending the taxonomy
//! means editing these tables, not the classifier.

use crate::types::{FailureSeverity, FailureType};

/// Ordered keyword families for failure-type detection.
///
/// Matched case-insensitively against `code + " " + message`. Order is
/// significant: "timeout" belongs to the network family first, so only
/// non-network deadline wording reaches TIMEOUT_ERROR.
pub const TYPE_RULES: &[(FailureType, &[&str])] = &[
    (
        FailureType::NetworkError,
        &[
            "connection",
            "timeout",
            "unreachable",
            "econnrefused",
            "enotfound",
            "etimedout",
        ],
    ),
    (FailureType::TimeoutError, &["deadline"]),
    (
        FailureType::AuthenticationError,
        &["auth", "unauthorized", "token", "401"],
    ),
    (
        FailureType::PermissionError,
        &["permission", "forbidden", "403"],
    ),
    (
        FailureType::DataCorruption,
        &["corrupt", "invalid", "malformed", "checksum"],
    ),
    (
        FailureType::SchemaMismatch,
        &["schema", "column", "table", "constraint"],
    ),
    (
        FailureType::ConflictError,
        &["conflict", "duplicate", "unique", "violation"],
    ),
    (
        FailureType::ResourceExhaustion,
        &["resource", "memory", "disk", "quota"],
    ),
];

/// Types where automated retry or backoff can still succeed
pub const RECOVERABLE_TYPES: &[FailureType] = &[
    FailureType::NetworkError,
    FailureType::TimeoutError,
    FailureType::ConflictError,
    FailureType::ResourceExhaustion,
];

/// Table-level recent-failure count that triggers the second severity
/// escalation step
pub const TABLE_FAILURE_ESCALATION_THRESHOLD: usize = 5;

/// Detect the failure type from the error's code and message.
pub fn detect_failure_type(code: &str, message: &str) -> FailureType {
    let haystack = format!("{} {}", code, message).to_lowercase();

    for (failure_type, keywords) in TYPE_RULES {
        if keywords.iter().any(|k| haystack.contains(k)) {
            return *failure_type;
        }
    }

    FailureType::UnknownError
}

/// Base severity before escalation
pub fn base_severity(failure_type: FailureType) -> FailureSeverity {
    match failure_type {
        FailureType::NetworkError => FailureSeverity::Medium,
        FailureType::TimeoutError => FailureSeverity::Medium,
        FailureType::AuthenticationError => FailureSeverity::High,
        FailureType::PermissionError => FailureSeverity::High,
        FailureType::DataCorruption => FailureSeverity::Critical,
        FailureType::SchemaMismatch => FailureSeverity::High,
        FailureType::ConflictError => FailureSeverity::Medium,
        FailureType::ResourceExhaustion => FailureSeverity::High,
        FailureType::UnknownError => FailureSeverity::Medium,
    }
}

/// Per-type base recovery estimate in milliseconds, before the severity
/// multiplier
pub fn base_recovery_time_ms(failure_type: FailureType) -> u64 {
    match failure_type {
        FailureType::NetworkError => 5_000,
        FailureType::TimeoutError => 10_000,
        FailureType::AuthenticationError => 3_000,
        FailureType::PermissionError => 3_000,
        FailureType::DataCorruption => 60_000,
        FailureType::SchemaMismatch => 30_000,
        FailureType::ConflictError => 15_000,
        FailureType::ResourceExhaustion => 45_000,
        FailureType::UnknownError => 20_000,
    }
}
