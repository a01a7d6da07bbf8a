//! Error taxonomy shared by the service, the store port and the message pipeline.

use serde::{Deserialize, Serialize};

/// Classification of every failure the service can report.
///
/// Keep this closed: each variant maps to exactly one broker disposition and one
/// numeric code carried on published error records.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Malformed or missing input, including ownership mismatch.
    Validation,
    /// Uniqueness violation at the store.
    Conflict,
    /// No matching entity.
    NotFound,
    /// Missing or invalid caller identity.
    PermissionDenied,
    /// Anything unclassified (transport, encoding, store outages).
    Internal,
}

impl ErrorKind {
    pub const ALL: [ErrorKind; 5] = [
        ErrorKind::Validation,
        ErrorKind::Conflict,
        ErrorKind::NotFound,
        ErrorKind::PermissionDenied,
        ErrorKind::Internal,
    ];

    /// Numeric code carried on error records (gRPC status numbering).
    pub fn code(self) -> i32 {
        match self {
            ErrorKind::Validation => 3,
            ErrorKind::NotFound => 5,
            ErrorKind::Conflict => 6,
            ErrorKind::PermissionDenied => 7,
            ErrorKind::Internal => 13,
        }
    }

    pub fn from_code(code: i32) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.code() == code)
    }

    /// Permanent failures cannot succeed on redelivery of the same input.
    pub fn is_permanent(self) -> bool {
        !matches!(self, ErrorKind::Internal)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::Validation => "validation",
            ErrorKind::Conflict => "conflict",
            ErrorKind::NotFound => "not_found",
            ErrorKind::PermissionDenied => "permission_denied",
            ErrorKind::Internal => "internal",
        }
    }
}

impl core::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Anything that can report its own classification.
pub trait Classify {
    fn kind(&self) -> ErrorKind;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_distinct_and_round_trip() {
        for kind in ErrorKind::ALL {
            assert_eq!(ErrorKind::from_code(kind.code()), Some(kind));
        }
        assert_eq!(ErrorKind::from_code(0), None);
    }

    #[test]
    fn only_internal_is_transient() {
        assert!(!ErrorKind::Internal.is_permanent());
        assert!(ErrorKind::Validation.is_permanent());
        assert!(ErrorKind::Conflict.is_permanent());
        assert!(ErrorKind::NotFound.is_permanent());
        assert!(ErrorKind::PermissionDenied.is_permanent());
    }

    #[test]
    fn conflict_uses_already_exists_code() {
        assert_eq!(ErrorKind::Conflict.code(), 6);
        assert_eq!(ErrorKind::Internal.code(), 13);
    }
}
