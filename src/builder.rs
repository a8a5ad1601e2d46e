//! Two-pass transaction building
//!
//! A purchase unlocking script embeds the preimage of the transaction it
//! unlocks, so its length is only known once the transaction exists, while
//! the wallet needs every unlocking length up front to compute the fee. The
//! builder resolves this in two round trips:
//!
//! 1. **Placeholder**: request a transaction reserving an oversized
//!    placeholder length for each variable-length input
//! 2. **Measured**: build the real unlocking scripts against that
//!    transaction, add the safety buffer, release the pass-1 reservation
//! 3. **Final**: request the transaction again with the measured lengths;
//!    this layout is the one signed and broadcast
//!
//! The output layout must not change between passes, so output
//! randomization is never requested.

use std::sync::Arc;

use crate::config::MarketConfig;
use crate::core::{OutputReference, Transaction, TransactionOutput};
use crate::error::MarketError;
use crate::proof::{BundleError, ProofBundle};
use crate::services::{RequestInput, SignableTransaction, SigningService, TransactionRequest};
use crate::unlock::{UnlockTemplate, UnlockingTemplate};

// =============================================================================
// Transaction Plan
// =============================================================================

/// A caller input: what it spends, how to unlock it, and where it came from
#[derive(Debug, Clone)]
pub struct CallerInput {
    pub previous_output: OutputReference,
    pub template: UnlockTemplate,
    pub source_transaction: Arc<Transaction>,
}

/// Everything needed to request a marketplace transaction
#[derive(Debug, Clone)]
pub struct TransactionPlan {
    pub inputs: Vec<CallerInput>,
    pub outputs: Vec<TransactionOutput>,
    pub input_bundle: ProofBundle,
    pub description: String,
}

impl TransactionPlan {
    pub fn new(description: impl Into<String>) -> Self {
        Self {
            inputs: Vec::new(),
            outputs: Vec::new(),
            input_bundle: ProofBundle::new(),
            description: description.into(),
        }
    }

    /// Add an input, absorbing its evidence into the plan's bundle
    pub fn add_input(
        &mut self,
        previous_output: OutputReference,
        template: impl Into<UnlockTemplate>,
        bundle: &ProofBundle,
    ) -> Result<&mut Self, MarketError> {
        let source = bundle
            .transaction(&previous_output.txid)
            .cloned()
            .ok_or(BundleError::MissingTransaction(previous_output.txid))?;
        self.input_bundle.absorb(bundle);
        self.inputs.push(CallerInput {
            previous_output,
            template: template.into(),
            source_transaction: Arc::new(source),
        });
        Ok(self)
    }

    pub fn add_output(&mut self, output: TransactionOutput) -> &mut Self {
        self.outputs.push(output);
        self
    }

    fn references(&self) -> Vec<OutputReference> {
        self.inputs.iter().map(|i| i.previous_output).collect()
    }

    fn has_variable_length_input(&self) -> bool {
        self.inputs.iter().any(|i| i.template.is_variable_length())
    }
}

// =============================================================================
// Build Phases
// =============================================================================

/// Where a two-pass build stands
#[derive(Debug, Clone)]
pub enum BuildPhase {
    /// Nothing requested yet
    Placeholder,
    /// Pass 1 measured and released; lengths to request in pass 2
    Measured {
        lengths: Vec<usize>,
        outputs: Vec<TransactionOutput>,
    },
    /// The transaction to sign
    Final {
        signable: SignableTransaction,
        lengths: Vec<usize>,
    },
}

/// Result of a finished build
#[derive(Debug, Clone)]
pub struct PreparedTransaction {
    /// Unsigned transaction with caller sources attached
    pub signable: SignableTransaction,
    /// Unlocking script length reserved for each caller input
    pub reserved_lengths: Vec<usize>,
    /// Caller templates in input order
    pub templates: Vec<UnlockTemplate>,
}

/// Drives the placeholder / measure / rebuild cycle against a signing service
pub struct TwoPassBuilder<'a, S: SigningService> {
    service: &'a S,
    config: &'a MarketConfig,
    plan: TransactionPlan,
    phase: BuildPhase,
}

impl<'a, S: SigningService> TwoPassBuilder<'a, S> {
    /// Check the plan and start in the placeholder phase
    pub fn new(
        service: &'a S,
        config: &'a MarketConfig,
        plan: TransactionPlan,
    ) -> Result<Self, MarketError> {
        if config.randomize_outputs {
            return Err(MarketError::Validation(
                "output randomization is not supported".to_string(),
            ));
        }
        if plan.inputs.is_empty() {
            return Err(MarketError::Validation("plan has no inputs".to_string()));
        }
        plan.input_bundle.ensure_covers(&plan.references())?;

        Ok(Self {
            service,
            config,
            plan,
            phase: BuildPhase::Placeholder,
        })
    }

    pub fn phase(&self) -> &BuildPhase {
        &self.phase
    }

    /// Lengths requested in pass 1
    pub fn placeholder_lengths(&self) -> Vec<usize> {
        self.plan
            .inputs
            .iter()
            .map(|i| {
                i.template
                    .fixed_length()
                    .unwrap_or(self.config.purchase_unlock_placeholder_len)
            })
            .collect()
    }

    fn request(&self, lengths: &[usize]) -> TransactionRequest {
        TransactionRequest {
            inputs: self
                .plan
                .inputs
                .iter()
                .zip(lengths)
                .map(|(input, len)| RequestInput {
                    previous_output: input.previous_output,
                    unlocking_script_length: *len,
                })
                .collect(),
            outputs: self.plan.outputs.clone(),
            input_bundle: self.plan.input_bundle.clone(),
            randomize_outputs: false,
            description: self.plan.description.clone(),
        }
    }

    /// Check the caller inputs lead the transaction and attach their sources
    fn attach_sources(&self, tx: &mut Transaction) -> Result<(), MarketError> {
        if tx.inputs.len() < self.plan.inputs.len() {
            return Err(MarketError::Service(
                "signing service dropped caller inputs".to_string(),
            ));
        }
        for (index, input) in self.plan.inputs.iter().enumerate() {
            if tx.inputs[index].previous_output != input.previous_output {
                return Err(MarketError::Service(format!(
                    "caller input {} moved in the signable transaction",
                    index
                )));
            }
            tx.attach_source(index, input.source_transaction.clone())?;
        }
        Ok(())
    }

    async fn begin(&self, lengths: &[usize]) -> Result<SignableTransaction, MarketError> {
        let mut signable = self.service.begin_transaction(self.request(lengths)).await?;
        if let Err(e) = self.attach_sources(&mut signable.tx) {
            self.release(&signable).await;
            return Err(e);
        }
        Ok(signable)
    }

    async fn release(&self, signable: &SignableTransaction) {
        if let Err(e) = self.service.abort_transaction(&signable.reference).await {
            log::warn!("Failed to release reservation {}: {}", signable.reference, e);
        }
    }

    /// Pass 1: request with placeholders, then measure
    ///
    /// When no input has a variable-length template the pass-1 transaction
    /// is already final.
    pub async fn run_placeholder_pass(&mut self) -> Result<(), MarketError> {
        if !matches!(self.phase, BuildPhase::Placeholder) {
            return Err(MarketError::Validation(
                "placeholder pass already ran".to_string(),
            ));
        }

        let placeholders = self.placeholder_lengths();
        let signable = self.begin(&placeholders).await?;

        if !self.plan.has_variable_length_input() {
            log::debug!("No variable-length inputs, pass 1 is final");
            self.phase = BuildPhase::Final {
                signable,
                lengths: placeholders,
            };
            return Ok(());
        }

        let lengths = match self.measure(&signable.tx, &placeholders) {
            Ok(lengths) => lengths,
            Err(e) => {
                self.release(&signable).await;
                return Err(e);
            }
        };
        self.release(&signable).await;

        log::debug!("Measured unlock lengths {:?} (placeholders {:?})", lengths, placeholders);
        self.phase = BuildPhase::Measured {
            lengths,
            outputs: signable.tx.outputs,
        };
        Ok(())
    }

    fn measure(&self, tx: &Transaction, placeholders: &[usize]) -> Result<Vec<usize>, MarketError> {
        let mut lengths = Vec::with_capacity(placeholders.len());
        for (index, input) in self.plan.inputs.iter().enumerate() {
            if !input.template.is_variable_length() {
                lengths.push(placeholders[index]);
                continue;
            }
            let measured = input.template.estimate_length(tx, index)?;
            if measured > placeholders[index] {
                return Err(MarketError::Validation(format!(
                    "input {} unlock is {} bytes, over the {} byte placeholder",
                    index, measured, placeholders[index]
                )));
            }
            lengths.push(measured + self.config.unlock_length_buffer);
        }
        Ok(lengths)
    }

    /// Pass 2: request with measured lengths and check the layout held
    pub async fn run_final_pass(&mut self) -> Result<(), MarketError> {
        let (lengths, pass_one_outputs) = match &self.phase {
            BuildPhase::Measured { lengths, outputs } => (lengths.clone(), outputs.clone()),
            _ => {
                return Err(MarketError::Validation(
                    "final pass requires measured lengths".to_string(),
                ))
            }
        };

        let signable = self.begin(&lengths).await?;
        if let Err(e) = check_layout(&pass_one_outputs, &signable.tx.outputs, self.plan.outputs.len()) {
            self.release(&signable).await;
            return Err(e);
        }

        self.phase = BuildPhase::Final { signable, lengths };
        Ok(())
    }

    /// Run every remaining step
    pub async fn build(mut self) -> Result<PreparedTransaction, MarketError> {
        if matches!(self.phase, BuildPhase::Placeholder) {
            self.run_placeholder_pass().await?;
        }
        if matches!(self.phase, BuildPhase::Measured { .. }) {
            self.run_final_pass().await?;
        }

        match self.phase {
            BuildPhase::Final { signable, lengths } => Ok(PreparedTransaction {
                signable,
                reserved_lengths: lengths,
                templates: self.plan.inputs.into_iter().map(|i| i.template).collect(),
            }),
            _ => Err(MarketError::Validation("build did not finish".to_string())),
        }
    }
}

/// Pass-2 outputs must match pass 1 in count, order and scripts; caller
/// outputs must also keep their values
fn check_layout(
    pass_one: &[TransactionOutput],
    pass_two: &[TransactionOutput],
    caller_outputs: usize,
) -> Result<(), MarketError> {
    if pass_one.len() != pass_two.len() {
        return Err(MarketError::Service(format!(
            "output count changed between passes ({} vs {})",
            pass_one.len(),
            pass_two.len()
        )));
    }
    for (index, (a, b)) in pass_one.iter().zip(pass_two).enumerate() {
        if a.locking_script != b.locking_script || (index < caller_outputs && a.value != b.value) {
            return Err(MarketError::Service(format!(
                "output {} changed between passes",
                index
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{Script, NOMINAL_ITEM_VALUE};
    use crate::devnet::{DevChain, DevWallet};
    use crate::error::ErrorKind;
    use crate::salelock::{render, SaleTerms};
    use crate::services::OutputResolver;
    use crate::unlock::{P2pkhUnlock, PurchaseUnlock, P2PKH_UNLOCK_MAX_LEN};
    use crate::crypto::KeyPair;

    struct Setup {
        chain: Arc<DevChain>,
        wallet: DevWallet,
        terms: SaleTerms,
        listing: OutputReference,
    }

    async fn setup(price: u64) -> Setup {
        let chain = Arc::new(DevChain::new());
        let seller = KeyPair::generate();
        let terms = SaleTerms::new(seller.address(), seller.address(), price, b"bow".to_vec(), "bow-1");
        let listing = chain.fund(render(&terms), NOMINAL_ITEM_VALUE).await;
        let wallet = DevWallet::new(KeyPair::generate(), chain.clone());
        chain.fund(Script::p2pkh(&wallet.pubkey_hash()), 100_000).await;
        Setup {
            chain,
            wallet,
            terms,
            listing,
        }
    }

    async fn purchase_plan(s: &Setup, paid: u64) -> TransactionPlan {
        let resolved = s.chain.resolve(&s.listing).await.unwrap();
        let mut plan = TransactionPlan::new("purchase");
        plan.add_input(s.listing, PurchaseUnlock::new(s.terms.clone()), &resolved.proof_bundle)
            .unwrap();
        plan.add_output(TransactionOutput::new(
            NOMINAL_ITEM_VALUE,
            Script::p2pkh(&[0xbb; 20]),
        ));
        plan.add_output(TransactionOutput::new(paid, Script::p2pkh(s.terms.payee.pubkey_hash())));
        plan
    }

    #[tokio::test]
    async fn test_phases_step_by_step() {
        let s = setup(1000).await;
        let config = MarketConfig::default();
        let plan = purchase_plan(&s, 1000).await;
        let mut builder = TwoPassBuilder::new(&s.wallet, &config, plan).unwrap();
        assert!(matches!(builder.phase(), BuildPhase::Placeholder));
        assert_eq!(
            builder.placeholder_lengths(),
            vec![config.purchase_unlock_placeholder_len]
        );

        builder.run_placeholder_pass().await.unwrap();
        let measured = match builder.phase() {
            BuildPhase::Measured { lengths, .. } => lengths[0],
            other => panic!("unexpected phase {:?}", other),
        };
        assert!(measured < config.purchase_unlock_placeholder_len);
        // Pass-1 reservation was released
        assert_eq!(s.wallet.pending_count().await, 0);

        builder.run_final_pass().await.unwrap();
        let prepared = builder.build().await.unwrap();
        assert_eq!(prepared.reserved_lengths, vec![measured]);

        let tx = &prepared.signable.tx;
        let actual = prepared.templates[0].sign(tx, 0).unwrap().len();
        assert!(actual <= measured);
        assert_eq!(tx.inputs[0].previous_output, s.listing);
        assert!(tx.inputs[0].source_transaction.is_some());
    }

    #[tokio::test]
    async fn test_fixed_length_plan_skips_second_pass() {
        let chain = Arc::new(DevChain::new());
        let owner = KeyPair::generate();
        let item = chain.fund(Script::p2pkh(&owner.pubkey_hash()), NOMINAL_ITEM_VALUE).await;
        let wallet = DevWallet::new(KeyPair::generate(), chain.clone());
        chain.fund(Script::p2pkh(&wallet.pubkey_hash()), 50_000).await;

        let resolved = chain.resolve(&item).await.unwrap();
        let mut plan = TransactionPlan::new("list");
        plan.add_input(item, P2pkhUnlock::new(owner.clone()), &resolved.proof_bundle)
            .unwrap();
        plan.add_output(TransactionOutput::new(NOMINAL_ITEM_VALUE, Script::p2pkh(&[1; 20])));

        let config = MarketConfig::default();
        let mut builder = TwoPassBuilder::new(&wallet, &config, plan).unwrap();
        builder.run_placeholder_pass().await.unwrap();
        assert!(matches!(builder.phase(), BuildPhase::Final { .. }));
        assert_eq!(wallet.begin_count(), 1);

        let prepared = builder.build().await.unwrap();
        assert_eq!(prepared.reserved_lengths, vec![P2PKH_UNLOCK_MAX_LEN]);
    }

    #[tokio::test]
    async fn test_underpayment_aborts_before_second_pass() {
        let s = setup(1000).await;
        let config = MarketConfig::default();
        let plan = purchase_plan(&s, 999).await;
        let err = TwoPassBuilder::new(&s.wallet, &config, plan)
            .unwrap()
            .build()
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
        assert_eq!(s.wallet.begin_count(), 1);
        assert_eq!(s.wallet.pending_count().await, 0);
    }

    #[tokio::test]
    async fn test_small_placeholder_is_fatal() {
        let s = setup(1000).await;
        let config = MarketConfig {
            purchase_unlock_placeholder_len: 200,
            ..Default::default()
        };
        let plan = purchase_plan(&s, 1000).await;
        let err = TwoPassBuilder::new(&s.wallet, &config, plan)
            .unwrap()
            .build()
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
        assert_eq!(s.wallet.pending_count().await, 0);
    }

    #[tokio::test]
    async fn test_missing_bundle_entry_rejected() {
        let s = setup(1000).await;
        let config = MarketConfig::default();
        let mut plan = purchase_plan(&s, 1000).await;
        plan.input_bundle = ProofBundle::new();
        assert!(matches!(
            TwoPassBuilder::new(&s.wallet, &config, plan),
            Err(MarketError::IncompleteBundle(_))
        ));
    }

    #[tokio::test]
    async fn test_randomized_outputs_refused() {
        let s = setup(1000).await;
        let config = MarketConfig {
            randomize_outputs: true,
            ..Default::default()
        };
        let plan = purchase_plan(&s, 1000).await;
        assert!(TwoPassBuilder::new(&s.wallet, &config, plan).is_err());
    }

    #[test]
    fn test_layout_check() {
        let a = vec![
            TransactionOutput::new(1, Script::p2pkh(&[1; 20])),
            TransactionOutput::new(500, Script::p2pkh(&[2; 20])),
        ];
        let mut change_moved = a.clone();
        change_moved[1].value = 400;
        check_layout(&a, &change_moved, 1).unwrap();
        assert!(check_layout(&a, &change_moved, 2).is_err());
        assert!(check_layout(&a, &a[..1], 1).is_err());

        let mut swapped = a.clone();
        swapped.swap(0, 1);
        assert!(check_layout(&a, &swapped, 0).is_err());
    }
}
