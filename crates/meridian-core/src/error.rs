//! Core error types

use thiserror::Error;

/// Errors from parsing or deriving identifiers.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IdentifierError {
    /// The textual form of a store address could not be decoded.
    #[error("invalid store address {input:?}: {reason}")]
    InvalidStoreAddress {
        /// The rejected input
        input: String,
        /// Why it was rejected
        reason: String,
    },

    /// The textual form of an account id could not be decoded.
    #[error("invalid account id {input:?}: {reason}")]
    InvalidAccountId {
        /// The rejected input
        input: String,
        /// Why it was rejected
        reason: String,
    },
}

impl IdentifierError {
    /// Create an invalid store address error.
    pub fn invalid_store_address(input: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidStoreAddress {
            input: input.into(),
            reason: reason.into(),
        }
    }

    /// Create an invalid account id error.
    pub fn invalid_account_id(input: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidAccountId {
            input: input.into(),
            reason: reason.into(),
        }
    }
}
