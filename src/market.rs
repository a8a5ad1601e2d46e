//! Marketplace operations
//!
//! The list, purchase and cancel flows a request handler invokes, plus
//! reconciliation of stale listing records. Every collaborator is borrowed
//! for the lifetime of one `Marketplace`; nothing is global.

use crate::builder::TransactionPlan;
use crate::config::MarketConfig;
use crate::core::{
    OutputReference, Script, TransactionOutput, TxId, MAX_SCRIPT_SIZE, NOMINAL_ITEM_VALUE,
};
use crate::crypto::{Address, KeyPair};
use crate::error::MarketError;
use crate::listing::{ListingRecord, ListingStatus};
use crate::pipeline::TransactionAttempt;
use crate::salelock::{render, SaleTerms};
use crate::services::{Broadcaster, OutputResolver, ResolvedOutput, SigningService};
use crate::unlock::{CancelUnlock, P2pkhUnlock, PurchaseUnlock};
use crate::validator::{ClientListing, ListingValidator};

/// Marketplace bound to its chain, wallet and network services
pub struct Marketplace<'a, R, S, B>
where
    R: OutputResolver,
    S: SigningService,
    B: Broadcaster,
{
    resolver: &'a R,
    wallet: &'a S,
    broadcaster: &'a B,
    config: &'a MarketConfig,
}

impl<'a, R, S, B> Marketplace<'a, R, S, B>
where
    R: OutputResolver,
    S: SigningService,
    B: Broadcaster,
{
    pub fn new(
        resolver: &'a R,
        wallet: &'a S,
        broadcaster: &'a B,
        config: &'a MarketConfig,
    ) -> Result<Self, MarketError> {
        config
            .validate()
            .map_err(|e| MarketError::Validation(e.to_string()))?;
        Ok(Self {
            resolver,
            wallet,
            broadcaster,
            config,
        })
    }

    pub fn config(&self) -> &MarketConfig {
        self.config
    }

    fn validator(&self) -> ListingValidator<'a, R> {
        ListingValidator::new(self.resolver, self.config)
    }

    // =========================================================================
    // Flows
    // =========================================================================

    /// Lock an owned item under `terms`
    ///
    /// `item` is the pay-to-key output holding the item, spendable by `owner`.
    pub async fn list_item(
        &self,
        item: OutputReference,
        owner: &KeyPair,
        terms: SaleTerms,
        seller_id: &str,
        item_reference: &str,
    ) -> Result<ListingRecord, MarketError> {
        terms.validate(&self.config.terms_limits())?;
        let locking_script = render(&terms);
        if locking_script.len() > MAX_SCRIPT_SIZE {
            return Err(MarketError::Validation(format!(
                "sale-lock is {} bytes, over the {} byte script limit",
                locking_script.len(),
                MAX_SCRIPT_SIZE
            )));
        }

        let resolved = self.resolver.resolve(&item).await?;
        if resolved.value != NOMINAL_ITEM_VALUE {
            return Err(MarketError::Validation(format!(
                "item output {} holds {} instead of {}",
                item, resolved.value, NOMINAL_ITEM_VALUE
            )));
        }

        let mut plan = TransactionPlan::new(format!("list {}", terms.asset_id));
        plan.add_input(item, P2pkhUnlock::new(owner.clone()), &resolved.proof_bundle)?;
        plan.add_output(TransactionOutput::new(NOMINAL_ITEM_VALUE, locking_script));

        let txid = self.execute(plan).await?;
        let listing = OutputReference::new(txid, 0);
        log::info!(
            "Listed {} at {} satoshis as {}",
            terms.asset_id,
            terms.price,
            listing
        );
        Ok(ListingRecord::new(listing, terms, seller_id, item_reference))
    }

    /// Buy a listed item for `payment`, delivering it to `buyer`
    ///
    /// Returns the buyer's new item reference. A lost race surfaces as
    /// `MarketError::Conflict` after the record is reconciled.
    pub async fn purchase_listing(
        &self,
        record: &mut ListingRecord,
        buyer: &Address,
        payment: u64,
    ) -> Result<OutputReference, MarketError> {
        let resolved = self.resolve_active(record).await?;
        let terms = record.sale_terms.clone();

        let mut plan = TransactionPlan::new(format!("purchase {}", terms.asset_id));
        plan.add_input(
            record.output_reference,
            PurchaseUnlock::new(terms.clone()),
            &resolved.proof_bundle,
        )?;
        plan.add_output(TransactionOutput::new(NOMINAL_ITEM_VALUE, Script::p2pkh_for(buyer)));
        plan.add_output(TransactionOutput::new(payment, Script::p2pkh_for(&terms.payee)));

        let txid = self.settle(record, plan).await?;
        record.mark_sold(txid)?;
        log::info!("Sold {} to {} for {}", terms.asset_id, buyer, payment);
        Ok(OutputReference::new(txid, 0))
    }

    /// Withdraw a listing, returning the item to the cancel authority
    pub async fn cancel_listing(
        &self,
        record: &mut ListingRecord,
        owner: &KeyPair,
    ) -> Result<OutputReference, MarketError> {
        let resolved = self.resolve_active(record).await?;

        let mut plan = TransactionPlan::new(format!("cancel {}", record.sale_terms.asset_id));
        plan.add_input(
            record.output_reference,
            CancelUnlock::new(owner.clone()),
            &resolved.proof_bundle,
        )?;
        plan.add_output(TransactionOutput::new(
            NOMINAL_ITEM_VALUE,
            Script::p2pkh(&owner.pubkey_hash()),
        ));

        let txid = self.settle(record, plan).await?;
        record.mark_cancelled(txid)?;
        log::info!("Cancelled listing of {}", record.sale_terms.asset_id);
        Ok(OutputReference::new(txid, 0))
    }

    /// Verify a listing a client built and broadcast itself
    pub async fn validate_client_listing(
        &self,
        listing: ClientListing,
    ) -> Result<ListingRecord, MarketError> {
        self.validator().validate_listing(listing).await
    }

    /// Bring a record in line with the chain
    ///
    /// A spent listing output is classified by the transaction that spent it.
    pub async fn reconcile_listing(
        &self,
        record: &mut ListingRecord,
    ) -> Result<ListingStatus, MarketError> {
        if !record.is_active() {
            return Ok(record.status);
        }

        match self.resolver.resolve(&record.output_reference).await {
            Ok(_) => Ok(ListingStatus::Active),
            Err(MarketError::NotFound(reference)) => {
                let tx = self
                    .resolver
                    .spending_transaction(&reference)
                    .await?
                    .ok_or(MarketError::NotFound(reference))?;
                let path = self.validator().apply_settlement(record, &tx)?;
                log::info!(
                    "Reconciled listing {} as {:?} by {}",
                    reference,
                    path,
                    tx.id()
                );
                Ok(record.status)
            }
            Err(e) => Err(e),
        }
    }

    // =========================================================================
    // Helpers
    // =========================================================================

    /// Resolve the listing output, checking it still carries the record's terms
    async fn resolve_active(
        &self,
        record: &mut ListingRecord,
    ) -> Result<ResolvedOutput, MarketError> {
        if !record.is_active() {
            return Err(MarketError::Conflict(format!(
                "listing {} is {:?}",
                record.output_reference, record.status
            )));
        }

        let resolved = match self.resolver.resolve(&record.output_reference).await {
            Ok(resolved) => resolved,
            Err(MarketError::NotFound(reference)) => {
                self.reconcile_quietly(record).await;
                return Err(MarketError::Conflict(format!(
                    "listing {} is no longer available",
                    reference
                )));
            }
            Err(e) => return Err(e),
        };

        if resolved.locking_script != render(&record.sale_terms) {
            log::warn!(
                "SECURITY: listing {} on chain does not match its recorded terms",
                record.output_reference
            );
            return Err(MarketError::InvalidListing(format!(
                "{} is not locked by the recorded terms",
                record.output_reference
            )));
        }
        Ok(resolved)
    }

    /// Run a settling transaction, reconciling the record if it lost a race
    async fn settle(
        &self,
        record: &mut ListingRecord,
        plan: TransactionPlan,
    ) -> Result<TxId, MarketError> {
        match self.execute(plan).await {
            Err(MarketError::Conflict(message)) => {
                self.reconcile_quietly(record).await;
                Err(MarketError::Conflict(message))
            }
            other => other,
        }
    }

    async fn reconcile_quietly(&self, record: &mut ListingRecord) {
        if let Err(e) = self.reconcile_listing(record).await {
            log::warn!("Could not reconcile {}: {}", record.output_reference, e);
        }
    }

    /// Prepare, sign, finalize and broadcast one plan
    async fn execute(&self, plan: TransactionPlan) -> Result<TxId, MarketError> {
        let mut attempt = TransactionAttempt::new(self.wallet, self.config, plan);
        attempt.prepare().await?;

        if let Err(e) = attempt.sign() {
            attempt.abandon().await;
            return Err(e);
        }
        attempt.finalize().await?;

        loop {
            match attempt.broadcast(self.broadcaster).await {
                Ok(txid) => return Ok(txid),
                Err(e)
                    if e.is_retryable()
                        && attempt.broadcast_attempts() < self.config.max_broadcast_attempts =>
                {
                    log::warn!(
                        "Transient broadcast failure (attempt {}/{}), retrying",
                        attempt.broadcast_attempts(),
                        self.config.max_broadcast_attempts
                    );
                    tokio::time::sleep(self.config.broadcast_retry_delay()).await;
                }
                Err(e) => {
                    // Releases the wallet reservation if still held
                    attempt.abandon().await;
                    return Err(e);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::TwoPassBuilder;
    use crate::core::verify_input;
    use crate::devnet::{DevChain, DevWallet};
    use crate::error::ErrorKind;
    use crate::salelock::SpendPath;
    use crate::unlock::UnlockingTemplate;
    use rand::Rng;
    use std::sync::Arc;

    struct World {
        chain: Arc<DevChain>,
        wallet: DevWallet,
        config: MarketConfig,
        seller: KeyPair,
    }

    impl World {
        async fn new() -> Self {
            let chain = Arc::new(DevChain::new());
            let wallet = DevWallet::new(KeyPair::generate(), chain.clone());
            for _ in 0..4 {
                chain
                    .fund(Script::p2pkh(&wallet.pubkey_hash()), 200_000)
                    .await;
            }
            Self {
                chain,
                wallet,
                config: MarketConfig {
                    broadcast_retry_delay_ms: 0,
                    ..Default::default()
                },
                seller: KeyPair::generate(),
            }
        }

        fn market(&self) -> Marketplace<'_, DevChain, DevWallet, DevChain> {
            Marketplace::new(self.chain.as_ref(), &self.wallet, self.chain.as_ref(), &self.config)
                .unwrap()
        }

        fn terms(&self, price: u64) -> SaleTerms {
            SaleTerms::new(
                self.seller.address(),
                self.seller.address(),
                price,
                b"{\"name\":\"Dragon Scale\",\"rarity\":\"epic\"}".to_vec(),
                "dragon-scale-42",
            )
        }

        async fn listed(&self, price: u64) -> ListingRecord {
            let item = self
                .chain
                .fund(Script::p2pkh(&self.seller.pubkey_hash()), NOMINAL_ITEM_VALUE)
                .await;
            self.market()
                .list_item(item, &self.seller, self.terms(price), "seller-1", "item-42")
                .await
                .unwrap()
        }
    }

    #[tokio::test]
    async fn test_list_item() {
        let world = World::new().await;
        let record = world.listed(1_000).await;
        assert_eq!(record.status, ListingStatus::Active);

        let resolved = world.chain.resolve(&record.output_reference).await.unwrap();
        assert_eq!(resolved.value, NOMINAL_ITEM_VALUE);
        assert_eq!(resolved.locking_script, render(&world.terms(1_000)));
    }

    #[tokio::test]
    async fn test_list_rejects_invalid_terms() {
        let world = World::new().await;
        let item = world
            .chain
            .fund(Script::p2pkh(&world.seller.pubkey_hash()), NOMINAL_ITEM_VALUE)
            .await;
        let err = world
            .market()
            .list_item(item, &world.seller, world.terms(0), "s", "i")
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
        assert_eq!(world.wallet.begin_count(), 0);
    }

    #[tokio::test]
    async fn test_purchase_at_price() {
        let world = World::new().await;
        let mut record = world.listed(1_000).await;
        let buyer = KeyPair::generate();
        let before = world.chain.balance(&world.seller.pubkey_hash()).await;

        let item = world
            .market()
            .purchase_listing(&mut record, &buyer.address(), 1_000)
            .await
            .unwrap();
        assert_eq!(record.status, ListingStatus::Sold);
        assert_eq!(record.settled_by, Some(item.txid));

        let delivered = world.chain.resolve(&item).await.unwrap();
        assert_eq!(delivered.value, NOMINAL_ITEM_VALUE);
        assert_eq!(delivered.locking_script, Script::p2pkh(&buyer.pubkey_hash()));
        assert_eq!(
            world.chain.balance(&world.seller.pubkey_hash()).await,
            before + 1_000
        );
    }

    #[tokio::test]
    async fn test_overpayment_accepted() {
        let world = World::new().await;
        let mut record = world.listed(1_000).await;
        let buyer = KeyPair::generate();
        world
            .market()
            .purchase_listing(&mut record, &buyer.address(), 1_500)
            .await
            .unwrap();
        assert_eq!(record.status, ListingStatus::Sold);
    }

    #[tokio::test]
    async fn test_underpayment_fails_before_broadcast() {
        let world = World::new().await;
        let mut record = world.listed(1_000).await;
        let buyer = KeyPair::generate();
        let height = world.chain.height().await;
        let finalizes = world.wallet.finalize_count();

        let err = world
            .market()
            .purchase_listing(&mut record, &buyer.address(), 999)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
        assert_eq!(record.status, ListingStatus::Active);
        assert_eq!(world.wallet.finalize_count(), finalizes);
        assert_eq!(world.wallet.pending_count().await, 0);
        assert_eq!(world.chain.height().await, height);
        world.chain.resolve(&record.output_reference).await.unwrap();
    }

    #[tokio::test]
    async fn test_cancel_by_owner() {
        let world = World::new().await;
        let mut record = world.listed(1_000).await;

        let item = world
            .market()
            .cancel_listing(&mut record, &world.seller)
            .await
            .unwrap();
        assert_eq!(record.status, ListingStatus::Cancelled);
        let returned = world.chain.resolve(&item).await.unwrap();
        assert_eq!(returned.locking_script, Script::p2pkh(&world.seller.pubkey_hash()));
    }

    #[tokio::test]
    async fn test_largest_listing_stays_spendable() {
        let mut world = World::new().await;
        world.config = MarketConfig {
            max_item_metadata_len: 9_000,
            purchase_unlock_placeholder_len: MAX_SCRIPT_SIZE,
            broadcast_retry_delay_ms: 0,
            ..Default::default()
        };
        let terms = SaleTerms::new(
            world.seller.address(),
            world.seller.address(),
            crate::salelock::MAX_PRICE,
            vec![0x5a; 9_000],
            "x".repeat(world.config.max_asset_id_len),
        );
        assert_eq!(
            render(&terms).len(),
            crate::salelock::max_rendered_len(&world.config.terms_limits())
        );

        let item = world
            .chain
            .fund(Script::p2pkh(&world.seller.pubkey_hash()), NOMINAL_ITEM_VALUE)
            .await;
        let mut record = world
            .market()
            .list_item(item, &world.seller, terms.clone(), "seller-1", "item-max")
            .await
            .unwrap();
        world
            .market()
            .cancel_listing(&mut record, &world.seller)
            .await
            .unwrap();
        assert_eq!(record.status, ListingStatus::Cancelled);

        // The purchase branch of a maximal listing fits as well
        let mut terms = terms;
        terms.price = 1_000;
        let item = world
            .chain
            .fund(Script::p2pkh(&world.seller.pubkey_hash()), NOMINAL_ITEM_VALUE)
            .await;
        let mut record = world
            .market()
            .list_item(item, &world.seller, terms, "seller-1", "item-max-2")
            .await
            .unwrap();
        world
            .market()
            .purchase_listing(&mut record, &KeyPair::generate().address(), 1_000)
            .await
            .unwrap();
        assert_eq!(record.status, ListingStatus::Sold);
    }

    #[tokio::test]
    async fn test_oversized_terms_limits_refused() {
        let world = World::new().await;
        let config = MarketConfig {
            max_item_metadata_len: 12_000,
            purchase_unlock_placeholder_len: 20_000,
            ..Default::default()
        };
        let err = Marketplace::new(world.chain.as_ref(), &world.wallet, world.chain.as_ref(), &config)
            .err()
            .unwrap();
        assert_eq!(err.kind(), ErrorKind::Validation);
    }

    #[tokio::test]
    async fn test_cancel_by_stranger_refused() {
        let world = World::new().await;
        let mut record = world.listed(1_000).await;

        let err = world
            .market()
            .cancel_listing(&mut record, &KeyPair::generate())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::IncompleteSignature);
        assert_eq!(record.status, ListingStatus::Active);
        assert_eq!(world.wallet.pending_count().await, 0);
    }

    #[tokio::test]
    async fn test_relist_after_cancel() {
        let world = World::new().await;
        let mut record = world.listed(1_000).await;
        let item = world
            .market()
            .cancel_listing(&mut record, &world.seller)
            .await
            .unwrap();

        let relisted = world
            .market()
            .list_item(item, &world.seller, world.terms(2_000), "seller-1", "item-42")
            .await
            .unwrap();
        assert_eq!(relisted.sale_terms.price, 2_000);
        assert!(world
            .market()
            .purchase_listing(&mut record, &world.seller.address(), 1_000)
            .await
            .is_err());
    }

    /// Holds every submission until `parties` of them are waiting
    struct RaceBroadcaster<'a> {
        chain: &'a DevChain,
        gate: tokio::sync::Barrier,
    }

    impl<'a> RaceBroadcaster<'a> {
        fn new(chain: &'a DevChain, parties: usize) -> Self {
            Self {
                chain,
                gate: tokio::sync::Barrier::new(parties),
            }
        }
    }

    impl Broadcaster for RaceBroadcaster<'_> {
        async fn submit(
            &self,
            tx: &crate::core::Transaction,
        ) -> Result<TxId, crate::services::BroadcastRejection> {
            self.gate.wait().await;
            self.chain.submit(tx).await
        }
    }

    #[tokio::test]
    async fn test_double_purchase_one_wins() {
        let world = World::new().await;
        let record = world.listed(1_000).await;
        let racer = RaceBroadcaster::new(world.chain.as_ref(), 2);
        let market =
            Marketplace::new(world.chain.as_ref(), &world.wallet, &racer, &world.config).unwrap();

        let alice = KeyPair::generate().address();
        let bob = KeyPair::generate().address();
        let (mut alice_record, mut bob_record) = (record.clone(), record.clone());

        // Both purchases are finalized before either reaches the network
        let (a, b) = futures::join!(
            market.purchase_listing(&mut alice_record, &alice, 1_000),
            market.purchase_listing(&mut bob_record, &bob, 1_000),
        );
        assert_eq!(world.wallet.finalize_count(), 3);

        let (winner, loser) = match (a, b) {
            (Ok(item), Err(e)) => (item, e),
            (Err(e), Ok(item)) => (item, e),
            other => panic!("expected exactly one winner, got {:?}", other),
        };
        assert_eq!(loser.kind(), ErrorKind::Conflict);
        assert_eq!(alice_record.status, ListingStatus::Sold);
        assert_eq!(bob_record.status, ListingStatus::Sold);
        assert_eq!(alice_record.settled_by, Some(winner.txid));
        assert_eq!(bob_record.settled_by, Some(winner.txid));

        // Only the winner's funding is still held, until the chain settles it
        assert_eq!(world.wallet.reserved_count().await, 1);
    }

    #[tokio::test]
    async fn test_reconcile_stale_record() {
        let world = World::new().await;
        let mut record = world.listed(1_000).await;
        let mut stale = record.clone();
        let market = world.market();

        assert_eq!(
            market.reconcile_listing(&mut stale).await.unwrap(),
            ListingStatus::Active
        );

        market
            .cancel_listing(&mut record, &world.seller)
            .await
            .unwrap();
        assert_eq!(
            market.reconcile_listing(&mut stale).await.unwrap(),
            ListingStatus::Cancelled
        );
        assert_eq!(stale.settled_by, record.settled_by);
    }

    #[tokio::test]
    async fn test_transient_broadcast_retried() {
        let world = World::new().await;
        let mut record = world.listed(1_000).await;
        world.chain.fail_next_broadcasts(2).await;

        world
            .market()
            .purchase_listing(&mut record, &KeyPair::generate().address(), 1_000)
            .await
            .unwrap();
        assert_eq!(record.status, ListingStatus::Sold);
    }

    #[tokio::test]
    async fn test_transient_failures_exhausted() {
        let world = World::new().await;
        let mut record = world.listed(1_000).await;
        world
            .chain
            .fail_next_broadcasts(world.config.max_broadcast_attempts)
            .await;

        let err = world
            .market()
            .purchase_listing(&mut record, &KeyPair::generate().address(), 1_000)
            .await
            .unwrap_err();
        assert!(err.is_retryable());
        assert_eq!(record.status, ListingStatus::Active);
        assert_eq!(world.wallet.reserved_count().await, 0);

        world
            .market()
            .purchase_listing(&mut record, &KeyPair::generate().address(), 1_000)
            .await
            .unwrap();
        assert_eq!(record.status, ListingStatus::Sold);
    }

    #[tokio::test]
    async fn test_settlement_classification() {
        let world = World::new().await;
        let market = world.market();
        let mut sold = world.listed(1_000).await;
        let mut cancelled = world.listed(1_000).await;
        let (sold_view, cancelled_view) = (sold.clone(), cancelled.clone());

        market
            .purchase_listing(&mut sold, &KeyPair::generate().address(), 1_000)
            .await
            .unwrap();
        market
            .cancel_listing(&mut cancelled, &world.seller)
            .await
            .unwrap();

        let validator = ListingValidator::new(world.chain.as_ref(), &world.config);
        for (view, expected) in [
            (&sold_view, SpendPath::Purchase),
            (&cancelled_view, SpendPath::Cancel),
        ] {
            let tx = world
                .chain
                .spending_transaction(&view.output_reference)
                .await
                .unwrap()
                .unwrap();
            assert_eq!(validator.validate_settlement(view, &tx).unwrap(), expected);
        }
    }

    /// Measured length plus buffer always covers the final unlocking script,
    /// across random prices, payments, metadata and signatures
    #[tokio::test]
    async fn test_two_pass_convergence_trials() {
        let world = World::new().await;
        let mut rng = rand::thread_rng();

        for _ in 0..25 {
            let price = rng.gen_range(1..5_000_000u64);
            let payment = price + rng.gen_range(0..1_000);
            let metadata: Vec<u8> = (0..rng.gen_range(0..300)).map(|_| rng.gen()).collect();
            let terms = SaleTerms::new(
                world.seller.address(),
                KeyPair::generate().address(),
                price,
                metadata,
                "trial",
            );
            let listing = world.chain.fund(render(&terms), NOMINAL_ITEM_VALUE).await;
            world
                .chain
                .fund(Script::p2pkh(&world.wallet.pubkey_hash()), 10_000_000)
                .await;
            let resolved = world.chain.resolve(&listing).await.unwrap();

            let mut plan = TransactionPlan::new("trial");
            plan.add_input(listing, PurchaseUnlock::new(terms.clone()), &resolved.proof_bundle)
                .unwrap();
            plan.add_output(TransactionOutput::new(
                NOMINAL_ITEM_VALUE,
                Script::p2pkh(&KeyPair::generate().pubkey_hash()),
            ));
            plan.add_output(TransactionOutput::new(payment, Script::p2pkh_for(&terms.payee)));

            let prepared = TwoPassBuilder::new(&world.wallet, &world.config, plan)
                .unwrap()
                .build()
                .await
                .unwrap();
            let tx = &prepared.signable.tx;
            let unlock = prepared.templates[0].sign(tx, 0).unwrap();
            assert!(unlock.len() <= prepared.reserved_lengths[0]);

            let mut signed = tx.clone();
            signed.inputs[0].unlocking_script = unlock;
            verify_input(&signed, 0).unwrap();

            world
                .wallet
                .abort_transaction(&prepared.signable.reference)
                .await
                .unwrap();
        }
    }

    #[tokio::test]
    async fn test_stale_source_detected() {
        let world = World::new().await;
        let record = world.listed(1_000).await;

        // A purchase against terms that were never rendered on chain
        let mut forged = record.clone();
        forged.sale_terms.price = 1;
        let err = world
            .market()
            .purchase_listing(&mut forged, &KeyPair::generate().address(), 1)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidListing);
    }
}
