//! Error types for phone number allocation and SMS delivery.
//!
//! Every failure the core can produce is a variant of [`Error`]. Each variant
//! belongs to exactly one [`ErrorKind`], which is what transports use to pick a
//! status code:
//!
//! - [`ErrorKind::InvalidArgument`]: the caller sent something malformed, or a
//!   reference id / phone number pair that does not match a live reservation.
//!   Nothing was mutated.
//! - [`ErrorKind::FailedPrecondition`]: the pool for a scope is exhausted. Safe
//!   to retry later or against another scope.
//! - [`ErrorKind::NotFound`]: a phone number is not assigned to anyone.
//! - [`ErrorKind::Internal`]: a store or transport failed.
//! - [`ErrorKind::Cancelled`]: the caller went away before the work finished.

use crate::types::{AreaCode, PhoneNumber, RefId};

pub type Result<T> = core::result::Result<T, Error>;

/// Coarse classification of an [`Error`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    InvalidArgument,
    FailedPrecondition,
    NotFound,
    Internal,
    Cancelled,
}

/// Unified error type for the allocator and sender.
#[derive(Clone, thiserror::Error, Debug, PartialEq, Eq)]
pub enum Error {
    /// A request field failed validation.
    #[error("Invalid argument: {reason}")]
    InvalidArgument { reason: String },

    /// The reference id does not exist, or the phone number is not part of
    /// the reservation it names. Both cases are reported identically.
    #[error("Phone number and/or reference id is wrong")]
    InvalidReservation,

    /// Fewer numbers than the batch size are available in the scope.
    #[error("Not enough available phone numbers in area code {area_code}")]
    PoolExhausted { area_code: AreaCode },

    /// The phone number is not assigned to any user.
    #[error("Phone number {number} doesn't exist")]
    NumberNotFound { number: PhoneNumber },

    /// A cache or database operation failed.
    #[error("Store error: {context}")]
    Store { context: String },

    /// The remote phonebook could not be reached or answered with an error.
    #[error("Lookup error: {context}")]
    Lookup { context: String },

    /// Reserved numbers could not be returned to the pool. They stay
    /// RESERVED under `ref_id` until an operator intervenes.
    #[error("Numbers under reference id {ref_id} are stuck reserved: {context}")]
    StuckReservation { ref_id: RefId, context: String },

    /// The call was cancelled before it completed.
    #[error("Request cancelled")]
    Cancelled,
}

impl Error {
    pub fn invalid(reason: impl Into<String>) -> Self {
        Self::InvalidArgument {
            reason: reason.into(),
        }
    }

    /// Wraps a backend error with the name of the operation that failed.
    pub fn store(op: &str, err: impl core::fmt::Display) -> Self {
        Self::Store {
            context: format!("{op}: {err}"),
        }
    }

    pub fn lookup(err: impl core::fmt::Display) -> Self {
        Self::Lookup {
            context: err.to_string(),
        }
    }

    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidArgument { .. } | Self::InvalidReservation => ErrorKind::InvalidArgument,
            Self::PoolExhausted { .. } => ErrorKind::FailedPrecondition,
            Self::NumberNotFound { .. } => ErrorKind::NotFound,
            Self::Store { .. } | Self::Lookup { .. } | Self::StuckReservation { .. } => {
                ErrorKind::Internal
            }
            Self::Cancelled => ErrorKind::Cancelled,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_follow_the_taxonomy() {
        assert_eq!(Error::InvalidReservation.kind(), ErrorKind::InvalidArgument);
        assert_eq!(Error::invalid("x").kind(), ErrorKind::InvalidArgument);
        assert_eq!(
            Error::PoolExhausted {
                area_code: AreaCode::new(613).unwrap()
            }
            .kind(),
            ErrorKind::FailedPrecondition
        );
        assert_eq!(
            Error::NumberNotFound {
                number: PhoneNumber::parse("+16135550100").unwrap()
            }
            .kind(),
            ErrorKind::NotFound
        );
        assert_eq!(Error::store("spop", "boom").kind(), ErrorKind::Internal);
        assert_eq!(Error::lookup("refused").kind(), ErrorKind::Internal);
        assert_eq!(Error::Cancelled.kind(), ErrorKind::Cancelled);
    }

    #[test]
    fn store_errors_name_the_operation() {
        let err = Error::store("sadd", "connection reset");
        assert_eq!(err.to_string(), "Store error: sadd: connection reset");
    }
}
