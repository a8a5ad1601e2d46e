//! External service interfaces
//!
//! The marketplace core talks to three collaborators:
//! - an output resolver backed by chain data
//! - a signing service (the wallet) that funds, reserves and finalizes
//!   transactions
//! - a broadcaster that submits transactions to the network
//!
//! All three are async and passed in explicitly by the caller.

#![allow(async_fn_in_trait)]

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::core::{OutputReference, Script, Transaction, TransactionOutput, TxId};
use crate::error::MarketError;
use crate::proof::ProofBundle;

// =============================================================================
// Output Resolver
// =============================================================================

/// An unspent output together with the evidence it is valid
#[derive(Debug, Clone)]
pub struct ResolvedOutput {
    pub value: u64,
    pub locking_script: Script,
    pub proof_bundle: ProofBundle,
}

impl ResolvedOutput {
    /// The transaction that created the output, taken from the bundle
    pub fn source_transaction(&self, reference: &OutputReference) -> Option<&Transaction> {
        self.proof_bundle.transaction(&reference.txid)
    }
}

/// Resolves output references against chain state
pub trait OutputResolver {
    /// Look up an unspent output; `MarketError::NotFound` when it does not
    /// exist or has been spent
    async fn resolve(&self, reference: &OutputReference) -> Result<ResolvedOutput, MarketError>;

    /// The accepted transaction spending `reference`, if any
    async fn spending_transaction(
        &self,
        reference: &OutputReference,
    ) -> Result<Option<Transaction>, MarketError>;
}

// =============================================================================
// Signing Service
// =============================================================================

/// Correlation reference for one in-progress wallet action
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SigningReference(pub String);

impl fmt::Display for SigningReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A caller-supplied input and the unlocking script length to reserve for it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestInput {
    pub previous_output: OutputReference,
    pub unlocking_script_length: usize,
}

/// Request for a signable transaction
#[derive(Debug, Clone)]
pub struct TransactionRequest {
    /// Caller inputs; they occupy the first positions of the result
    pub inputs: Vec<RequestInput>,
    /// Caller outputs; they occupy the first positions of the result
    pub outputs: Vec<TransactionOutput>,
    /// Evidence for every caller input
    pub input_bundle: ProofBundle,
    /// Must be false: outputs are positional
    pub randomize_outputs: bool,
    /// Human-readable purpose, for the wallet's records
    pub description: String,
}

/// Unsigned transaction laid out by the signing service
#[derive(Debug, Clone)]
pub struct SignableTransaction {
    pub tx: Transaction,
    pub reference: SigningReference,
}

/// Wallet service that funds and signs transactions
pub trait SigningService {
    /// Lay out a funded, unsigned transaction and reserve its wallet inputs
    async fn begin_transaction(
        &self,
        request: TransactionRequest,
    ) -> Result<SignableTransaction, MarketError>;

    /// Apply caller unlocking scripts, sign wallet inputs and return the
    /// complete transaction
    async fn finalize_transaction(
        &self,
        reference: &SigningReference,
        unlocking_scripts: BTreeMap<usize, Script>,
    ) -> Result<Transaction, MarketError>;

    /// Release the reservation held by `reference`
    async fn abort_transaction(&self, reference: &SigningReference) -> Result<(), MarketError>;
}

// =============================================================================
// Broadcaster
// =============================================================================

/// Why the network refused a transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RejectionCause {
    /// An unlocking script failed or the transaction is malformed
    MalformedScript,
    /// Fee below the network's rate
    FeeTooLow,
    /// An input was already spent
    DoubleSpend,
    /// Temporary failure; the same transaction may be resubmitted
    Transient,
}

/// A refused broadcast
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{cause:?}: {message}")]
pub struct BroadcastRejection {
    pub cause: RejectionCause,
    pub message: String,
}

impl BroadcastRejection {
    pub fn new(cause: RejectionCause, message: impl Into<String>) -> Self {
        Self {
            cause,
            message: message.into(),
        }
    }
}

impl From<BroadcastRejection> for MarketError {
    fn from(rejection: BroadcastRejection) -> Self {
        match rejection.cause {
            RejectionCause::DoubleSpend => MarketError::Conflict(rejection.message),
            RejectionCause::Transient => MarketError::Rejected {
                retryable: true,
                message: rejection.message,
            },
            RejectionCause::MalformedScript | RejectionCause::FeeTooLow => MarketError::Rejected {
                retryable: false,
                message: rejection.message,
            },
        }
    }
}

/// Submits transactions to the network
pub trait Broadcaster {
    async fn submit(&self, tx: &Transaction) -> Result<TxId, BroadcastRejection>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn test_rejection_mapping() {
        let conflict: MarketError =
            BroadcastRejection::new(RejectionCause::DoubleSpend, "input spent").into();
        assert_eq!(conflict.kind(), ErrorKind::Conflict);

        let transient: MarketError =
            BroadcastRejection::new(RejectionCause::Transient, "try later").into();
        assert!(transient.is_retryable());

        for cause in [RejectionCause::MalformedScript, RejectionCause::FeeTooLow] {
            let err: MarketError = BroadcastRejection::new(cause, "no").into();
            assert_eq!(err.kind(), ErrorKind::Rejected);
            assert!(!err.is_retryable());
        }
    }
}
