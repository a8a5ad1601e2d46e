//! Marketplace error taxonomy
//!
//! Every failure a marketplace operation can surface, grouped into the kinds
//! a request handler reacts to. Lower-level errors convert into their kind.

use thiserror::Error;

use crate::core::{OutputReference, ScriptError, TransactionError};
use crate::crypto::KeyError;
use crate::proof::BundleError;
use crate::salelock::TermsError;
use crate::unlock::UnlockError;

/// Category of a marketplace error
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Validation,
    IncompleteBundle,
    IncompleteSignature,
    InvalidListing,
    Rejected,
    Conflict,
    NotFound,
    Service,
}

/// Marketplace operation errors
#[derive(Error, Debug)]
pub enum MarketError {
    #[error("Validation failed: {0}")]
    Validation(String),
    #[error("Invalid sale terms: {0}")]
    Terms(#[from] TermsError),
    #[error("Script error: {0}")]
    Script(#[from] ScriptError),
    #[error("Transaction error: {0}")]
    Transaction(#[from] TransactionError),
    #[error("Key error: {0}")]
    Key(#[from] KeyError),
    #[error("Incomplete proof bundle: {0}")]
    IncompleteBundle(#[from] BundleError),
    #[error("Incomplete signature: {0}")]
    IncompleteSignature(String),
    #[error("Invalid listing: {0}")]
    InvalidListing(String),
    #[error("Broadcast rejected (retryable: {retryable}): {message}")]
    Rejected { retryable: bool, message: String },
    #[error("Conflict: {0}")]
    Conflict(String),
    #[error("Output not found: {0}")]
    NotFound(OutputReference),
    #[error("Signing service error: {0}")]
    Service(String),
}

impl MarketError {
    /// The taxonomy kind of this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            MarketError::Validation(_)
            | MarketError::Terms(_)
            | MarketError::Script(_)
            | MarketError::Transaction(_)
            | MarketError::Key(_) => ErrorKind::Validation,
            MarketError::IncompleteBundle(_) => ErrorKind::IncompleteBundle,
            MarketError::IncompleteSignature(_) => ErrorKind::IncompleteSignature,
            MarketError::InvalidListing(_) => ErrorKind::InvalidListing,
            MarketError::Rejected { .. } => ErrorKind::Rejected,
            MarketError::Conflict(_) => ErrorKind::Conflict,
            MarketError::NotFound(_) => ErrorKind::NotFound,
            MarketError::Service(_) => ErrorKind::Service,
        }
    }

    /// Whether retrying the same signed transaction may succeed
    pub fn is_retryable(&self) -> bool {
        matches!(self, MarketError::Rejected { retryable: true, .. })
    }

    /// Message suitable for end users; never carries service internals
    pub fn safe_message(&self) -> String {
        match self {
            MarketError::Terms(e) => e.to_string(),
            MarketError::Validation(_)
            | MarketError::Script(_)
            | MarketError::Transaction(_)
            | MarketError::Key(_) => "The request is not valid for this item".to_string(),
            MarketError::IncompleteBundle(_) => {
                "The item's history could not be assembled".to_string()
            }
            MarketError::IncompleteSignature(_) => {
                "The transaction could not be fully signed".to_string()
            }
            MarketError::InvalidListing(_) => "The listing could not be verified".to_string(),
            MarketError::Rejected {
                retryable: true, ..
            } => "The network is busy, please try again".to_string(),
            MarketError::Rejected { .. } => "The transaction was rejected".to_string(),
            MarketError::Conflict(_) => {
                "This item has already been sold or withdrawn".to_string()
            }
            MarketError::NotFound(_) => "The item could not be found".to_string(),
            MarketError::Service(_) => "The wallet service is unavailable".to_string(),
        }
    }
}

impl From<UnlockError> for MarketError {
    fn from(e: UnlockError) -> Self {
        match e {
            UnlockError::Transaction(TransactionError::MissingSourceOutput(index)) => {
                MarketError::IncompleteSignature(format!(
                    "input {} has no source transaction",
                    index
                ))
            }
            UnlockError::WrongKey => {
                MarketError::IncompleteSignature("signing key does not match".to_string())
            }
            other => MarketError::Validation(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kinds() {
        assert_eq!(
            MarketError::from(TermsError::ZeroPrice).kind(),
            ErrorKind::Validation
        );
        assert_eq!(
            MarketError::from(UnlockError::Underpayment { paid: 999, price: 1000 }).kind(),
            ErrorKind::Validation
        );
        assert_eq!(
            MarketError::from(UnlockError::Transaction(
                TransactionError::MissingSourceOutput(0)
            ))
            .kind(),
            ErrorKind::IncompleteSignature
        );
        assert_eq!(
            MarketError::Conflict("spent".to_string()).kind(),
            ErrorKind::Conflict
        );
    }

    #[test]
    fn test_retryable() {
        let transient = MarketError::Rejected {
            retryable: true,
            message: "mempool full".to_string(),
        };
        let structural = MarketError::Rejected {
            retryable: false,
            message: "fee too low".to_string(),
        };
        assert!(transient.is_retryable());
        assert!(!structural.is_retryable());
        assert!(!MarketError::Conflict(String::new()).is_retryable());
    }

    #[test]
    fn test_safe_message_hides_internals() {
        let err = MarketError::Service("wallet db at 10.0.0.3 refused connection".to_string());
        assert!(!err.safe_message().contains("10.0.0.3"));

        let err = MarketError::Rejected {
            retryable: false,
            message: "node rejected: mandatory-script-verify-flag-failed".to_string(),
        };
        assert!(!err.safe_message().contains("mandatory"));
    }
}
