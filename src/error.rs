use core::fmt;
use std::fmt::{Display, Formatter};

/// Errors surfaced by the presence store.
///
/// Soft data issues (bad coordinates, malformed window values, message
/// text from unentitled devices) are deliberately absent here: those are
/// normalized or dropped at the point of use, never raised. Error text
/// must never carry another device's coordinates, message, or identifier.
#[derive(Debug)]
pub enum StoreError {
    /// Status outside the closed enumeration; the request is rejected
    /// with no partial write.
    InvalidStatus(String),
    /// Administrative credential mismatch, rejected before any mutation.
    Unauthorized,
    /// Underlying persistence error, fatal for the current request only.
    Storage(diesel::result::Error),
}

impl Display for StoreError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            StoreError::InvalidStatus(s) => write!(f, "invalid status: {}", s),
            StoreError::Unauthorized => write!(f, "unauthorized"),
            StoreError::Storage(e) => write!(f, "storage error: {}", e),
        }
    }
}

impl std::error::Error for StoreError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            StoreError::Storage(e) => Some(e),
            _ => None,
        }
    }
}

impl From<diesel::result::Error> for StoreError {
    fn from(value: diesel::result::Error) -> Self {
        StoreError::Storage(value)
    }
}
