//! Sign / finalize / broadcast pipeline
//!
//! One `TransactionAttempt` carries a marketplace transaction from request to
//! outcome:
//!
//! ```text
//! Requested -> Signable -> Signed -> Broadcast -> Terminal(success | failure)
//! ```
//!
//! Each step checks the current state first. Nothing reaches the signing
//! service's finalize call unless every caller input has an unlocking script.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};

use crate::builder::{PreparedTransaction, TransactionPlan, TwoPassBuilder};
use crate::config::MarketConfig;
use crate::core::{Script, Transaction, TxId};
use crate::error::{ErrorKind, MarketError};
use crate::services::{Broadcaster, SigningService};
use crate::unlock::UnlockingTemplate;

/// How an attempt ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Success(TxId),
    Failure(ErrorKind),
}

/// Where an attempt stands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptState {
    /// Plan accepted, nothing requested yet
    Requested,
    /// Final layout reserved by the signing service
    Signable,
    /// Caller unlocking scripts produced
    Signed,
    /// Complete transaction assembled; submission pending or retrying
    Broadcast,
    /// Finished
    Terminal(Outcome),
}

impl fmt::Display for AttemptState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttemptState::Requested => write!(f, "requested"),
            AttemptState::Signable => write!(f, "signable"),
            AttemptState::Signed => write!(f, "signed"),
            AttemptState::Broadcast => write!(f, "broadcast"),
            AttemptState::Terminal(Outcome::Success(txid)) => write!(f, "succeeded ({})", txid),
            AttemptState::Terminal(Outcome::Failure(kind)) => write!(f, "failed ({:?})", kind),
        }
    }
}

/// A single transaction attempt
pub struct TransactionAttempt<'a, S: SigningService> {
    service: &'a S,
    config: &'a MarketConfig,
    plan: Option<TransactionPlan>,
    prepared: Option<PreparedTransaction>,
    unlocking_scripts: BTreeMap<usize, Script>,
    signed: Option<Transaction>,
    state: AttemptState,
    broadcast_attempts: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl<'a, S: SigningService> TransactionAttempt<'a, S> {
    pub fn new(service: &'a S, config: &'a MarketConfig, plan: TransactionPlan) -> Self {
        let now = Utc::now();
        Self {
            service,
            config,
            plan: Some(plan),
            prepared: None,
            unlocking_scripts: BTreeMap::new(),
            signed: None,
            state: AttemptState::Requested,
            broadcast_attempts: 0,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn state(&self) -> AttemptState {
        self.state
    }

    /// The unsigned transaction, once signable
    pub fn signable_transaction(&self) -> Option<&Transaction> {
        self.prepared.as_ref().map(|p| &p.signable.tx)
    }

    /// The complete transaction, once the service has assembled it
    pub fn signed_transaction(&self) -> Option<&Transaction> {
        self.signed.as_ref()
    }

    /// Number of submissions made so far
    pub fn broadcast_attempts(&self) -> u32 {
        self.broadcast_attempts
    }

    fn expect_state(&self, expected: AttemptState, step: &str) -> Result<(), MarketError> {
        if self.state != expected {
            return Err(MarketError::IncompleteSignature(format!(
                "cannot {} while attempt is {}",
                step, self.state
            )));
        }
        Ok(())
    }

    fn set_state(&mut self, state: AttemptState) {
        log::debug!("Attempt {} -> {}", self.state, state);
        self.state = state;
        self.updated_at = Utc::now();
    }

    fn fail(&mut self, err: MarketError) -> MarketError {
        self.set_state(AttemptState::Terminal(Outcome::Failure(err.kind())));
        err
    }

    /// Hand the wallet reservation back to the signing service
    async fn release(&self) {
        if let Some(prepared) = &self.prepared {
            if let Err(e) = self.service.abort_transaction(&prepared.signable.reference).await {
                log::warn!("Failed to release {}: {}", prepared.signable.reference, e);
            }
        }
    }

    /// Requested -> Signable: run the two-pass build
    pub async fn prepare(&mut self) -> Result<(), MarketError> {
        self.expect_state(AttemptState::Requested, "prepare")?;
        let plan = self.plan.take().ok_or_else(|| {
            MarketError::IncompleteSignature("attempt has no plan".to_string())
        })?;

        let result = match TwoPassBuilder::new(self.service, self.config, plan) {
            Ok(builder) => builder.build().await,
            Err(e) => Err(e),
        };
        match result {
            Ok(prepared) => {
                self.prepared = Some(prepared);
                self.set_state(AttemptState::Signable);
                Ok(())
            }
            Err(e) => Err(self.fail(e)),
        }
    }

    /// Signable -> Signed: evaluate every caller template locally
    pub fn sign(&mut self) -> Result<(), MarketError> {
        self.expect_state(AttemptState::Signable, "sign")?;
        let prepared = self.prepared.as_ref().ok_or_else(|| {
            MarketError::IncompleteSignature("attempt has no signable transaction".to_string())
        })?;

        let mut scripts = BTreeMap::new();
        for (index, template) in prepared.templates.iter().enumerate() {
            scripts.insert(index, template.sign(&prepared.signable.tx, index)?);
        }
        self.accept_scripts(scripts)
    }

    /// Signable -> Signed with externally produced unlocking scripts
    ///
    /// Every caller input needs a non-empty script that fits the length
    /// reserved for it; otherwise the attempt stays signable.
    pub fn accept_scripts(&mut self, scripts: BTreeMap<usize, Script>) -> Result<(), MarketError> {
        self.expect_state(AttemptState::Signable, "accept unlocking scripts")?;
        let prepared = self.prepared.as_ref().ok_or_else(|| {
            MarketError::IncompleteSignature("attempt has no signable transaction".to_string())
        })?;

        for (index, reserved) in prepared.reserved_lengths.iter().enumerate() {
            let script = match scripts.get(&index) {
                Some(script) if !script.is_empty() => script,
                _ => {
                    return Err(MarketError::IncompleteSignature(format!(
                        "input {} has no unlocking script",
                        index
                    )))
                }
            };
            if script.len() > *reserved {
                return Err(MarketError::Validation(format!(
                    "input {} unlock is {} bytes, {} reserved",
                    index,
                    script.len(),
                    reserved
                )));
            }
        }
        if let Some(extra) = scripts.keys().find(|i| **i >= prepared.reserved_lengths.len()) {
            return Err(MarketError::Validation(format!(
                "input {} is not a caller input",
                extra
            )));
        }

        self.unlocking_scripts = scripts;
        self.set_state(AttemptState::Signed);
        Ok(())
    }

    /// Signed -> Broadcast: hand the scripts to the signing service
    pub async fn finalize(&mut self) -> Result<(), MarketError> {
        self.expect_state(AttemptState::Signed, "finalize")?;
        let reference = match &self.prepared {
            Some(prepared) => prepared.signable.reference.clone(),
            None => {
                return Err(MarketError::IncompleteSignature(
                    "attempt has no signing reference".to_string(),
                ))
            }
        };

        let tx = match self
            .service
            .finalize_transaction(&reference, self.unlocking_scripts.clone())
            .await
        {
            Ok(tx) => tx,
            Err(e) => {
                self.release().await;
                return Err(self.fail(e));
            }
        };

        let lost = self
            .unlocking_scripts
            .iter()
            .find(|(index, script)| tx.inputs.get(**index).map(|i| &i.unlocking_script) != Some(*script))
            .map(|(index, _)| *index);
        if let Some(index) = lost {
            self.release().await;
            return Err(self.fail(MarketError::Service(format!(
                "finalized transaction lost the script for input {}",
                index
            ))));
        }

        log::info!("Transaction {} finalized ({} bytes)", tx.id(), tx.size());
        self.signed = Some(tx);
        self.set_state(AttemptState::Broadcast);
        Ok(())
    }

    /// Broadcast -> Terminal: submit the signed transaction
    ///
    /// A transient rejection leaves the attempt in `Broadcast` so the same
    /// transaction can be submitted again. Any other rejection releases the
    /// wallet reservation.
    pub async fn broadcast<B: Broadcaster>(&mut self, broadcaster: &B) -> Result<TxId, MarketError> {
        self.expect_state(AttemptState::Broadcast, "broadcast")?;
        let tx = self.signed.as_ref().ok_or_else(|| {
            MarketError::IncompleteSignature("attempt has no signed transaction".to_string())
        })?;

        self.broadcast_attempts += 1;
        match broadcaster.submit(tx).await {
            Ok(txid) => {
                log::info!("Transaction {} accepted", txid);
                self.set_state(AttemptState::Terminal(Outcome::Success(txid)));
                Ok(txid)
            }
            Err(rejection) => {
                log::warn!("Broadcast of {} rejected: {}", tx.id(), rejection);
                let err = MarketError::from(rejection);
                if err.is_retryable() {
                    self.updated_at = Utc::now();
                    Err(err)
                } else {
                    self.release().await;
                    Err(self.fail(err))
                }
            }
        }
    }

    /// Give up, releasing the wallet reservation if one is held
    pub async fn abandon(&mut self) {
        if matches!(
            self.state,
            AttemptState::Signable | AttemptState::Signed | AttemptState::Broadcast
        ) {
            self.release().await;
        }
        if !matches!(self.state, AttemptState::Terminal(_)) {
            self.set_state(AttemptState::Terminal(Outcome::Failure(ErrorKind::Validation)));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{OutputReference, TransactionOutput, NOMINAL_ITEM_VALUE};
    use crate::crypto::KeyPair;
    use crate::devnet::{DevChain, DevWallet};
    use crate::proof::ProofBundle;
    use crate::salelock::{render, SaleTerms};
    use crate::services::{OutputResolver, TransactionRequest};
    use crate::unlock::PurchaseUnlock;
    use std::sync::Arc;

    struct Setup {
        chain: Arc<DevChain>,
        wallet: DevWallet,
        config: MarketConfig,
        terms: SaleTerms,
        listing: OutputReference,
    }

    async fn setup() -> Setup {
        let chain = Arc::new(DevChain::new());
        let seller = KeyPair::generate();
        let terms = SaleTerms::new(seller.address(), seller.address(), 1000, b"ring".to_vec(), "ring-1");
        let listing = chain.fund(render(&terms), NOMINAL_ITEM_VALUE).await;
        let wallet = DevWallet::new(KeyPair::generate(), chain.clone());
        chain.fund(Script::p2pkh(&wallet.pubkey_hash()), 100_000).await;
        chain.fund(Script::p2pkh(&wallet.pubkey_hash()), 100_000).await;
        Setup {
            chain,
            wallet,
            config: MarketConfig::default(),
            terms,
            listing,
        }
    }

    async fn plan(s: &Setup, buyer: [u8; 20]) -> TransactionPlan {
        let resolved = s.chain.resolve(&s.listing).await.unwrap();
        let mut plan = TransactionPlan::new("purchase");
        plan.add_input(s.listing, PurchaseUnlock::new(s.terms.clone()), &resolved.proof_bundle)
            .unwrap();
        plan.add_output(TransactionOutput::new(NOMINAL_ITEM_VALUE, Script::p2pkh(&buyer)));
        plan.add_output(TransactionOutput::new(
            s.terms.price,
            Script::p2pkh(s.terms.payee.pubkey_hash()),
        ));
        plan
    }

    #[tokio::test]
    async fn test_full_lifecycle() {
        let s = setup().await;
        let mut attempt = TransactionAttempt::new(&s.wallet, &s.config, plan(&s, [7; 20]).await);
        assert_eq!(attempt.state(), AttemptState::Requested);

        attempt.prepare().await.unwrap();
        assert_eq!(attempt.state(), AttemptState::Signable);
        attempt.sign().unwrap();
        assert_eq!(attempt.state(), AttemptState::Signed);
        attempt.finalize().await.unwrap();
        assert_eq!(attempt.state(), AttemptState::Broadcast);

        let txid = attempt.broadcast(s.chain.as_ref()).await.unwrap();
        assert_eq!(attempt.state(), AttemptState::Terminal(Outcome::Success(txid)));
        assert!(s.chain.transaction(&txid).await.is_some());
        assert!(matches!(
            s.chain.resolve(&s.listing).await,
            Err(MarketError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_wrong_state_is_incomplete_signature() {
        let s = setup().await;
        let mut attempt = TransactionAttempt::new(&s.wallet, &s.config, plan(&s, [7; 20]).await);

        let err = attempt.sign().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::IncompleteSignature);
        let err = attempt.finalize().await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::IncompleteSignature);
        let err = attempt.broadcast(s.chain.as_ref()).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::IncompleteSignature);
        assert_eq!(attempt.state(), AttemptState::Requested);
    }

    #[tokio::test]
    async fn test_missing_script_blocks_finalize() {
        let s = setup().await;
        let mut attempt = TransactionAttempt::new(&s.wallet, &s.config, plan(&s, [7; 20]).await);
        attempt.prepare().await.unwrap();

        let err = attempt.accept_scripts(BTreeMap::new()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::IncompleteSignature);

        let mut empty = BTreeMap::new();
        empty.insert(0, Script::new());
        assert!(attempt.accept_scripts(empty).is_err());

        assert_eq!(attempt.state(), AttemptState::Signable);
        assert_eq!(s.wallet.finalize_count(), 0);

        attempt.abandon().await;
        assert_eq!(s.wallet.pending_count().await, 0);
        assert!(matches!(attempt.state(), AttemptState::Terminal(Outcome::Failure(_))));
    }

    #[tokio::test]
    async fn test_oversized_script_rejected() {
        let s = setup().await;
        let mut attempt = TransactionAttempt::new(&s.wallet, &s.config, plan(&s, [7; 20]).await);
        attempt.prepare().await.unwrap();

        let mut scripts = BTreeMap::new();
        scripts.insert(0, Script::from_bytes(vec![0x51; 5000]));
        let err = attempt.accept_scripts(scripts).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
        assert_eq!(attempt.state(), AttemptState::Signable);
    }

    #[tokio::test]
    async fn test_transient_rejection_keeps_transaction() {
        let s = setup().await;
        let mut attempt = TransactionAttempt::new(&s.wallet, &s.config, plan(&s, [7; 20]).await);
        attempt.prepare().await.unwrap();
        attempt.sign().unwrap();
        attempt.finalize().await.unwrap();
        let signed = attempt.signed_transaction().unwrap().clone();

        s.chain.fail_next_broadcasts(1).await;
        let err = attempt.broadcast(s.chain.as_ref()).await.unwrap_err();
        assert!(err.is_retryable());
        assert_eq!(attempt.state(), AttemptState::Broadcast);
        assert_eq!(attempt.signed_transaction(), Some(&signed));

        let txid = attempt.broadcast(s.chain.as_ref()).await.unwrap();
        assert_eq!(txid, signed.id());
        assert_eq!(attempt.broadcast_attempts(), 2);
    }

    #[tokio::test]
    async fn test_losing_purchase_is_conflict() {
        let s = setup().await;
        let mut first = TransactionAttempt::new(&s.wallet, &s.config, plan(&s, [7; 20]).await);
        let mut second = TransactionAttempt::new(&s.wallet, &s.config, plan(&s, [8; 20]).await);

        for attempt in [&mut first, &mut second] {
            attempt.prepare().await.unwrap();
            attempt.sign().unwrap();
            attempt.finalize().await.unwrap();
        }

        first.broadcast(s.chain.as_ref()).await.unwrap();
        let err = second.broadcast(s.chain.as_ref()).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Conflict);
        assert_eq!(
            second.state(),
            AttemptState::Terminal(Outcome::Failure(ErrorKind::Conflict))
        );

        // The loser's funding is spendable again
        let request = TransactionRequest {
            inputs: Vec::new(),
            outputs: vec![TransactionOutput::new(150_000, Script::p2pkh(&[9; 20]))],
            input_bundle: ProofBundle::new(),
            randomize_outputs: false,
            description: "sweep".to_string(),
        };
        s.wallet.begin_transaction(request).await.unwrap();
    }

    #[tokio::test]
    async fn test_abandon_after_transient_failure_releases() {
        let s = setup().await;
        let mut attempt = TransactionAttempt::new(&s.wallet, &s.config, plan(&s, [7; 20]).await);
        attempt.prepare().await.unwrap();
        attempt.sign().unwrap();
        attempt.finalize().await.unwrap();
        assert_eq!(s.wallet.reserved_count().await, 1);

        s.chain.fail_next_broadcasts(1).await;
        attempt.broadcast(s.chain.as_ref()).await.unwrap_err();
        attempt.abandon().await;
        assert!(matches!(attempt.state(), AttemptState::Terminal(Outcome::Failure(_))));
        assert_eq!(s.wallet.reserved_count().await, 0);
    }
}
