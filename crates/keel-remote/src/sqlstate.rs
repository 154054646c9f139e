// SPDX-License-Identifier: Apache-2.0

//! SQLSTATE classification for the remote client layer.
//!
//! Every remote call leaves a SQLSTATE/SQLCODE pair in the client layer's
//! diagnostic area. The connector core never interprets raw state strings
//! itself; it classifies them here and acts on the class.

use thiserror::Error;

/// Coarse classification of a SQLSTATE value.
///
/// The scan loop treats `NotFound` as the end-of-data sentinel, not as an
/// error. The `Connection*` variants are only produced while establishing
/// or validating a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SqlStateClass {
    /// Call completed without diagnostics.
    Success,
    /// Non-fatal warning; flow continues.
    Warning,
    /// Recoverable statement error; resources must be unwound.
    Error,
    /// Runtime error from the remote engine.
    RtError,
    /// SQLSTATE class 02: cursor exhausted.
    NotFound,
    /// Connection established cleanly.
    ConnectionOk,
    /// Connection established with warnings.
    ConnectionWarn,
    /// Connection could not be established or validated.
    ConnectionError,
    /// Referenced remote object does not exist.
    ObjectNotFound,
    /// Identifier rejected by the remote engine.
    InvalidName,
    /// State string not recognized; treated like a runtime error.
    Unknown,
}

impl SqlStateClass {
    /// Classify a five-character SQLSTATE string.
    pub fn from_sqlstate(sqlstate: &str) -> Self {
        match sqlstate {
            "00000" => SqlStateClass::Success,
            "42S02" => SqlStateClass::ObjectNotFound,
            "42602" => SqlStateClass::InvalidName,
            s if s.starts_with("01") => SqlStateClass::Warning,
            s if s.starts_with("02") => SqlStateClass::NotFound,
            s if s.starts_with("08") => SqlStateClass::ConnectionError,
            s if s.starts_with("42") => SqlStateClass::Error,
            s if s.starts_with("22") || s.starts_with("23") => SqlStateClass::Error,
            s if s.starts_with("40") => SqlStateClass::Error,
            s if s.starts_with("58") || s.starts_with("XX") => SqlStateClass::RtError,
            s if s.starts_with("IX") => SqlStateClass::RtError,
            _ => SqlStateClass::Unknown,
        }
    }

    /// Whether this class requires a full call-stack unwind before the
    /// error is surfaced to the host.
    pub fn requires_unwind(&self) -> bool {
        matches!(
            self,
            SqlStateClass::Error
                | SqlStateClass::RtError
                | SqlStateClass::ObjectNotFound
                | SqlStateClass::InvalidName
                | SqlStateClass::ConnectionError
                | SqlStateClass::Unknown
        )
    }
}

/// One entry from the client layer's diagnostic area.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SqlDiagnostic {
    /// Five-character SQLSTATE value.
    pub sqlstate: String,
    /// Vendor SQLCODE.
    pub sqlcode: i32,
    /// Message text reported by the remote engine.
    pub message: String,
}

impl SqlDiagnostic {
    pub fn new(sqlstate: impl Into<String>, sqlcode: i32, message: impl Into<String>) -> Self {
        Self {
            sqlstate: sqlstate.into(),
            sqlcode,
            message: message.into(),
        }
    }

    pub fn class(&self) -> SqlStateClass {
        SqlStateClass::from_sqlstate(&self.sqlstate)
    }
}

/// Error raised by the remote client layer.
///
/// Wraps the diagnostic so callers can report the remote engine's own
/// error code alongside the local context.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{} (SQLSTATE {}, SQLCODE {})", .diagnostic.message, .diagnostic.sqlstate, .diagnostic.sqlcode)]
pub struct RemoteError {
    pub diagnostic: SqlDiagnostic,
}

impl RemoteError {
    pub fn new(sqlstate: impl Into<String>, sqlcode: i32, message: impl Into<String>) -> Self {
        Self {
            diagnostic: SqlDiagnostic::new(sqlstate, sqlcode, message),
        }
    }

    pub fn class(&self) -> SqlStateClass {
        self.diagnostic.class()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_core_states() {
        assert_eq!(SqlStateClass::from_sqlstate("00000"), SqlStateClass::Success);
        assert_eq!(SqlStateClass::from_sqlstate("01004"), SqlStateClass::Warning);
        assert_eq!(SqlStateClass::from_sqlstate("02000"), SqlStateClass::NotFound);
        assert_eq!(
            SqlStateClass::from_sqlstate("08001"),
            SqlStateClass::ConnectionError
        );
        assert_eq!(
            SqlStateClass::from_sqlstate("42S02"),
            SqlStateClass::ObjectNotFound
        );
        assert_eq!(
            SqlStateClass::from_sqlstate("42602"),
            SqlStateClass::InvalidName
        );
        assert_eq!(SqlStateClass::from_sqlstate("42601"), SqlStateClass::Error);
        assert_eq!(SqlStateClass::from_sqlstate("IX000"), SqlStateClass::RtError);
        assert_eq!(SqlStateClass::from_sqlstate("?????"), SqlStateClass::Unknown);
    }

    #[test]
    fn test_not_found_never_unwinds() {
        assert!(!SqlStateClass::NotFound.requires_unwind());
        assert!(!SqlStateClass::Warning.requires_unwind());
        assert!(SqlStateClass::RtError.requires_unwind());
        assert!(SqlStateClass::Unknown.requires_unwind());
    }

    #[test]
    fn test_diagnostic_class() {
        let diag = SqlDiagnostic::new("02000", 100, "no more rows");
        assert_eq!(diag.class(), SqlStateClass::NotFound);

        let err = RemoteError::new("IX000", -271, "could not insert new row");
        assert!(err.class().requires_unwind());
        assert!(err.to_string().contains("SQLSTATE IX000"));
    }
}
