//! In-process development network
//!
//! `DevChain` plays the chain: it validates submitted transactions with the
//! script interpreter, tracks unspent outputs, mines blocks with merkle paths
//! and answers output lookups with proof bundles. `DevWallet` plays the
//! signing service: it funds requests from its own outputs, reserves them
//! between passes and signs its inputs on finalize.
//!
//! Both back the CLI simulation and the scenario tests.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::RwLock;

use crate::core::{
    estimate_size, verify_spend, FeeRate, OutputReference, Script, Transaction, TransactionInput,
    TransactionOutput, TxId, DUST_LIMIT,
};
use crate::crypto::{sha256, KeyPair};
use crate::error::MarketError;
use crate::proof::{merkle_root, Checkpoints, MerklePath, ProofBundle};
use crate::services::{
    BroadcastRejection, Broadcaster, OutputResolver, RejectionCause, ResolvedOutput,
    SignableTransaction, SigningReference, SigningService, TransactionRequest,
};
use crate::unlock::{P2pkhUnlock, UnlockingTemplate, P2PKH_UNLOCK_MAX_LEN};

// =============================================================================
// Chain
// =============================================================================

#[derive(Debug, Default)]
struct ChainState {
    transactions: HashMap<TxId, Transaction>,
    utxos: BTreeMap<OutputReference, TransactionOutput>,
    spent_by: HashMap<OutputReference, TxId>,
    mempool: Vec<TxId>,
    proofs: HashMap<TxId, MerklePath>,
    checkpoints: Checkpoints,
    height: u64,
    fundings: u32,
    fail_next: u32,
}

impl ChainState {
    fn accept(&mut self, tx: Transaction) -> TxId {
        let txid = tx.id();
        for input in &tx.inputs {
            self.utxos.remove(&input.previous_output);
            self.spent_by.insert(input.previous_output, txid);
        }
        for (index, output) in tx.outputs.iter().enumerate() {
            self.utxos
                .insert(OutputReference::new(txid, index as u32), output.clone());
        }
        self.transactions.insert(txid, tx);
        self.mempool.push(txid);
        txid
    }

    fn mine(&mut self) -> Option<u64> {
        if self.mempool.is_empty() {
            return None;
        }
        let txids = std::mem::take(&mut self.mempool);
        self.height += 1;
        self.checkpoints.insert(self.height, merkle_root(&txids));
        for (index, txid) in txids.iter().enumerate() {
            if let Some(path) = MerklePath::create(self.height, &txids, index) {
                self.proofs.insert(*txid, path);
            }
        }
        log::debug!("Mined block {} with {} transactions", self.height, txids.len());
        Some(self.height)
    }

    /// `txid` plus every ancestor back to mined transactions
    fn bundle_for(&self, txid: TxId) -> ProofBundle {
        let mut bundle = ProofBundle::new();
        let mut visited = BTreeSet::new();
        let mut pending = vec![txid];
        while let Some(current) = pending.pop() {
            if !visited.insert(current) {
                continue;
            }
            let Some(tx) = self.transactions.get(&current) else {
                continue;
            };
            let proof = self.proofs.get(&current).cloned();
            if proof.is_none() {
                pending.extend(tx.inputs.iter().map(|i| i.previous_output.txid));
            }
            bundle.insert(tx.clone(), proof);
        }
        bundle
    }

    fn check(&self, tx: &Transaction, fee_rate: FeeRate) -> Result<(), BroadcastRejection> {
        if tx.inputs.is_empty() || tx.outputs.is_empty() {
            return Err(BroadcastRejection::new(
                RejectionCause::MalformedScript,
                "transaction needs inputs and outputs",
            ));
        }

        let mut total_in = 0u64;
        for (index, input) in tx.inputs.iter().enumerate() {
            if let Some(spender) = self.spent_by.get(&input.previous_output) {
                return Err(BroadcastRejection::new(
                    RejectionCause::DoubleSpend,
                    format!("{} already spent by {}", input.previous_output, spender),
                ));
            }
            let output = self.utxos.get(&input.previous_output).ok_or_else(|| {
                BroadcastRejection::new(
                    RejectionCause::MalformedScript,
                    format!("unknown input {}", input.previous_output),
                )
            })?;
            verify_spend(tx, index, &output.locking_script, output.value).map_err(|e| {
                BroadcastRejection::new(
                    RejectionCause::MalformedScript,
                    format!("input {}: {}", index, e),
                )
            })?;
            total_in += output.value;
        }

        let total_out = tx.total_output();
        if total_in < total_out {
            return Err(BroadcastRejection::new(
                RejectionCause::MalformedScript,
                format!("outputs {} exceed inputs {}", total_out, total_in),
            ));
        }
        if !fee_rate.is_covered(total_in - total_out, tx.size()) {
            return Err(BroadcastRejection::new(
                RejectionCause::FeeTooLow,
                format!(
                    "fee {} below {} for {} bytes",
                    total_in - total_out,
                    fee_rate.fee_for_size(tx.size()),
                    tx.size()
                ),
            ));
        }
        Ok(())
    }
}

/// In-memory chain with mempool, blocks and merkle proofs
#[derive(Debug, Default)]
pub struct DevChain {
    state: RwLock<ChainState>,
    fee_rate: FeeRate,
}

impl DevChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_fee_rate(fee_rate: FeeRate) -> Self {
        Self {
            state: RwLock::default(),
            fee_rate,
        }
    }

    pub fn fee_rate(&self) -> FeeRate {
        self.fee_rate
    }

    /// Create an output out of nothing and mine it
    pub async fn fund(&self, locking_script: Script, value: u64) -> OutputReference {
        let mut state = self.state.write().await;
        state.fundings += 1;
        let mut marker = [0u8; 32];
        marker[..4].copy_from_slice(&state.fundings.to_le_bytes());

        let mut tx = Transaction::new(
            vec![TransactionInput::new(OutputReference::new(
                TxId::from_bytes(marker),
                u32::MAX,
            ))],
            vec![TransactionOutput::new(value, locking_script)],
        );
        tx.locktime = state.fundings;

        let txid = state.accept(tx);
        state.mine();
        OutputReference::new(txid, 0)
    }

    /// Mine everything in the mempool; returns the new height
    pub async fn mine_block(&self) -> Option<u64> {
        self.state.write().await.mine()
    }

    pub async fn height(&self) -> u64 {
        self.state.read().await.height
    }

    pub async fn transaction(&self, txid: &TxId) -> Option<Transaction> {
        self.state.read().await.transactions.get(txid).cloned()
    }

    /// Unspent outputs paying `pubkey_hash`
    pub async fn utxos_for(&self, pubkey_hash: &[u8; 20]) -> Vec<(OutputReference, TransactionOutput)> {
        self.state
            .read()
            .await
            .utxos
            .iter()
            .filter(|(_, output)| output.locking_script.p2pkh_hash().as_ref() == Some(pubkey_hash))
            .map(|(reference, output)| (*reference, output.clone()))
            .collect()
    }

    pub async fn balance(&self, pubkey_hash: &[u8; 20]) -> u64 {
        self.utxos_for(pubkey_hash).await.iter().map(|(_, o)| o.value).sum()
    }

    /// Accepted block roots
    pub async fn checkpoints(&self) -> Checkpoints {
        self.state.read().await.checkpoints.clone()
    }

    /// Reject the next `count` submissions as transient failures
    pub async fn fail_next_broadcasts(&self, count: u32) {
        self.state.write().await.fail_next = count;
    }
}

impl OutputResolver for DevChain {
    async fn resolve(&self, reference: &OutputReference) -> Result<ResolvedOutput, MarketError> {
        let state = self.state.read().await;
        let output = state
            .utxos
            .get(reference)
            .ok_or(MarketError::NotFound(*reference))?;
        Ok(ResolvedOutput {
            value: output.value,
            locking_script: output.locking_script.clone(),
            proof_bundle: state.bundle_for(reference.txid),
        })
    }

    async fn spending_transaction(
        &self,
        reference: &OutputReference,
    ) -> Result<Option<Transaction>, MarketError> {
        let state = self.state.read().await;
        Ok(state
            .spent_by
            .get(reference)
            .and_then(|txid| state.transactions.get(txid))
            .cloned())
    }
}

impl Broadcaster for DevChain {
    async fn submit(&self, tx: &Transaction) -> Result<TxId, BroadcastRejection> {
        let mut state = self.state.write().await;
        if state.fail_next > 0 {
            state.fail_next -= 1;
            return Err(BroadcastRejection::new(
                RejectionCause::Transient,
                "node temporarily unavailable",
            ));
        }

        let txid = tx.id();
        if state.transactions.contains_key(&txid) {
            return Ok(txid);
        }
        state.check(tx, self.fee_rate)?;

        let mut accepted = tx.clone();
        for input in &mut accepted.inputs {
            input.source_transaction = None;
        }
        state.accept(accepted);
        log::info!("Accepted transaction {} into mempool", txid);
        Ok(txid)
    }
}

// =============================================================================
// Wallet
// =============================================================================

#[derive(Debug)]
struct PendingAction {
    tx: Transaction,
    caller_inputs: usize,
    reserved: Vec<OutputReference>,
}

/// A finalized action whose transaction may still fail to broadcast
#[derive(Debug)]
struct CommittedAction {
    txid: TxId,
    reserved: Vec<OutputReference>,
}

#[derive(Debug, Default)]
struct WalletState {
    pending: HashMap<SigningReference, PendingAction>,
    committed: HashMap<SigningReference, CommittedAction>,
    reserved: BTreeSet<OutputReference>,
    actions: u64,
}

impl WalletState {
    fn release(&mut self, outputs: &[OutputReference]) {
        for r in outputs {
            self.reserved.remove(r);
        }
    }
}

/// Single-key wallet that funds and signs marketplace transactions
pub struct DevWallet {
    key: KeyPair,
    chain: Arc<DevChain>,
    state: RwLock<WalletState>,
    begins: AtomicUsize,
    finalizes: AtomicUsize,
}

impl DevWallet {
    pub fn new(key: KeyPair, chain: Arc<DevChain>) -> Self {
        Self {
            key,
            chain,
            state: RwLock::default(),
            begins: AtomicUsize::new(0),
            finalizes: AtomicUsize::new(0),
        }
    }

    pub fn key(&self) -> &KeyPair {
        &self.key
    }

    pub fn pubkey_hash(&self) -> [u8; 20] {
        self.key.pubkey_hash()
    }

    /// Actions begun and not yet finalized or aborted
    pub async fn pending_count(&self) -> usize {
        self.state.read().await.pending.len()
    }

    /// Wallet outputs held by begun or finalized actions
    pub async fn reserved_count(&self) -> usize {
        self.state.read().await.reserved.len()
    }

    pub fn begin_count(&self) -> usize {
        self.begins.load(Ordering::SeqCst)
    }

    pub fn finalize_count(&self) -> usize {
        self.finalizes.load(Ordering::SeqCst)
    }

    /// Forget finalized actions the chain has accepted
    async fn settle_committed(&self, state: &mut WalletState) {
        let mut settled = Vec::new();
        for (reference, action) in &state.committed {
            if self.chain.transaction(&action.txid).await.is_some() {
                settled.push(reference.clone());
            }
        }
        for reference in settled {
            if let Some(action) = state.committed.remove(&reference) {
                state.release(&action.reserved);
            }
        }
    }

    async fn select_funding(
        &self,
        request: &TransactionRequest,
        state: &WalletState,
    ) -> Result<(Vec<(OutputReference, u64)>, Option<TransactionOutput>), MarketError> {
        let mut caller_in = 0u64;
        for input in &request.inputs {
            let source = request
                .input_bundle
                .transaction(&input.previous_output.txid)
                .and_then(|tx| tx.outputs.get(input.previous_output.index as usize))
                .ok_or(MarketError::NotFound(input.previous_output))?;
            caller_in += source.value;
        }
        let total_out: u64 = request.outputs.iter().map(|o| o.value).sum();
        let caller_refs: BTreeSet<OutputReference> =
            request.inputs.iter().map(|i| i.previous_output).collect();

        let change_script = Script::p2pkh(&self.pubkey_hash());
        let mut outputs = request.outputs.clone();
        outputs.push(TransactionOutput::new(0, change_script.clone()));
        let mut unlock_lens: Vec<usize> = request
            .inputs
            .iter()
            .map(|i| i.unlocking_script_length)
            .collect();

        let fee_rate = self.chain.fee_rate();
        let mut selected = Vec::new();
        let mut funding = 0u64;
        let candidates = self
            .chain
            .utxos_for(&self.pubkey_hash())
            .await
            .into_iter()
            .filter(|(r, _)| !state.reserved.contains(r) && !caller_refs.contains(r));

        for (reference, output) in candidates {
            selected.push((reference, output.value));
            funding += output.value;
            unlock_lens.push(P2PKH_UNLOCK_MAX_LEN);

            let fee = fee_rate.fee_for_size(estimate_size(&unlock_lens, &outputs));
            if caller_in + funding >= total_out + fee {
                let change = caller_in + funding - total_out - fee;
                let change_output = (change >= DUST_LIMIT)
                    .then(|| TransactionOutput::new(change, change_script.clone()));
                return Ok((selected, change_output));
            }
        }

        Err(MarketError::Service(format!(
            "insufficient funds: {} available for {} in outputs",
            caller_in + funding,
            total_out
        )))
    }
}

impl SigningService for DevWallet {
    async fn begin_transaction(
        &self,
        request: TransactionRequest,
    ) -> Result<SignableTransaction, MarketError> {
        self.begins.fetch_add(1, Ordering::SeqCst);
        if request.randomize_outputs {
            return Err(MarketError::Validation(
                "randomized outputs are not supported".to_string(),
            ));
        }
        let caller_refs: Vec<OutputReference> =
            request.inputs.iter().map(|i| i.previous_output).collect();
        request.input_bundle.ensure_covers(&caller_refs)?;

        let mut state = self.state.write().await;
        self.settle_committed(&mut state).await;
        let (funding, change) = self.select_funding(&request, &state).await?;

        let mut inputs: Vec<TransactionInput> = caller_refs
            .iter()
            .map(|r| TransactionInput::new(*r))
            .collect();
        for (reference, _) in &funding {
            let mut input = TransactionInput::new(*reference);
            input.source_transaction = self.chain.transaction(&reference.txid).await.map(Arc::new);
            inputs.push(input);
        }
        let mut outputs = request.outputs;
        outputs.extend(change);
        let tx = Transaction::new(inputs, outputs);

        state.actions += 1;
        let seed = format!(
            "{}{}{}",
            tx.id(),
            Utc::now().timestamp_nanos_opt().unwrap_or(0),
            state.actions
        );
        let reference = SigningReference(hex::encode(&sha256(seed.as_bytes())[..16]));

        let reserved: Vec<OutputReference> = funding.iter().map(|(r, _)| *r).collect();
        state.reserved.extend(reserved.iter().copied());
        state.pending.insert(
            reference.clone(),
            PendingAction {
                tx: tx.clone(),
                caller_inputs: caller_refs.len(),
                reserved,
            },
        );

        log::debug!(
            "Began {} ({}): {} caller inputs, {} funding inputs",
            reference,
            request.description,
            caller_refs.len(),
            funding.len()
        );

        let mut unsigned = tx;
        for input in &mut unsigned.inputs {
            input.source_transaction = None;
        }
        Ok(SignableTransaction {
            tx: unsigned,
            reference,
        })
    }

    async fn finalize_transaction(
        &self,
        reference: &SigningReference,
        unlocking_scripts: BTreeMap<usize, Script>,
    ) -> Result<Transaction, MarketError> {
        self.finalizes.fetch_add(1, Ordering::SeqCst);
        let mut state = self.state.write().await;
        let action = state
            .pending
            .get(reference)
            .ok_or_else(|| MarketError::Service(format!("unknown reference {}", reference)))?;

        if let Some(index) = unlocking_scripts.keys().find(|i| **i >= action.caller_inputs) {
            return Err(MarketError::Service(format!(
                "input {} belongs to the wallet",
                index
            )));
        }
        let mut tx = action.tx.clone();
        for index in 0..action.caller_inputs {
            let script = unlocking_scripts.get(&index).ok_or_else(|| {
                MarketError::IncompleteSignature(format!("input {} has no unlocking script", index))
            })?;
            tx.inputs[index].unlocking_script = script.clone();
        }

        let signer = P2pkhUnlock::new(self.key.clone());
        for index in action.caller_inputs..tx.inputs.len() {
            tx.inputs[index].unlocking_script = signer.sign(&tx, index)?;
        }
        for input in &mut tx.inputs {
            input.source_transaction = None;
        }

        // Funding stays reserved until the chain accepts the transaction or
        // the caller aborts
        let txid = tx.id();
        if let Some(action) = state.pending.remove(reference) {
            log::debug!(
                "Finalized {} as {} ({} wallet outputs committed)",
                reference,
                txid,
                action.reserved.len()
            );
            state.committed.insert(
                reference.clone(),
                CommittedAction {
                    txid,
                    reserved: action.reserved,
                },
            );
        }
        Ok(tx)
    }

    async fn abort_transaction(&self, reference: &SigningReference) -> Result<(), MarketError> {
        let mut state = self.state.write().await;
        if let Some(action) = state.pending.remove(reference) {
            state.release(&action.reserved);
            log::debug!("Aborted {}, released {} outputs", reference, action.reserved.len());
            return Ok(());
        }
        if let Some(action) = state.committed.remove(reference) {
            state.release(&action.reserved);
            log::debug!(
                "Aborted {} after finalize, released {} outputs of {}",
                reference,
                action.reserved.len(),
                action.txid
            );
            return Ok(());
        }
        Err(MarketError::Service(format!("unknown reference {}", reference)))
    }
}
