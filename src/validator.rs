//! Listing and settlement validation
//!
//! Client-built transactions are never trusted on their word. A listing is
//! persisted only after its locking script is recomputed from the claimed
//! terms and matched against what the chain actually holds; a settling
//! transaction is run through the interpreter before a record moves.

use crate::config::MarketConfig;
use crate::core::{verify_spend, OutputReference, Script, Transaction, NOMINAL_ITEM_VALUE};
use crate::error::MarketError;
use crate::listing::ListingRecord;
use crate::salelock::{render, spend_path, SaleTerms, SpendPath};
use crate::services::OutputResolver;

/// A listing built and broadcast by a client, as it reports it
#[derive(Debug, Clone)]
pub struct ClientListing {
    pub seller_id: String,
    pub item_reference: String,
    pub terms: SaleTerms,
    /// Locking script the client says it used
    pub locking_script: Script,
    /// Sale-lock output the client says it created
    pub listing_reference: OutputReference,
    /// Transaction that created the listing
    pub listing_transaction: Transaction,
    /// Output that held the item before it was listed
    pub prior_item_reference: OutputReference,
}

/// Checks client-built listings against recomputed scripts and chain state
pub struct ListingValidator<'a, R: OutputResolver> {
    resolver: &'a R,
    config: &'a MarketConfig,
}

impl<'a, R: OutputResolver> ListingValidator<'a, R> {
    pub fn new(resolver: &'a R, config: &'a MarketConfig) -> Self {
        Self { resolver, config }
    }

    /// Verify a client listing and produce its record
    pub async fn validate_listing(&self, listing: ClientListing) -> Result<ListingRecord, MarketError> {
        if let Err(reason) = self.check_listing(&listing).await {
            log::warn!(
                "SECURITY: rejected listing {} from seller {} (item {}, asset {}, prior {}): {}",
                listing.listing_reference,
                listing.seller_id,
                listing.item_reference,
                listing.terms.asset_id,
                listing.prior_item_reference,
                reason
            );
            return Err(MarketError::InvalidListing(reason));
        }

        log::info!(
            "Accepted listing {} for asset {} at {} satoshis",
            listing.listing_reference,
            listing.terms.asset_id,
            listing.terms.price
        );
        Ok(ListingRecord::new(
            listing.listing_reference,
            listing.terms,
            listing.seller_id,
            listing.item_reference,
        ))
    }

    async fn check_listing(&self, listing: &ClientListing) -> Result<(), String> {
        listing
            .terms
            .validate(&self.config.terms_limits())
            .map_err(|e| format!("terms invalid: {}", e))?;

        let expected = render(&listing.terms);
        if expected != listing.locking_script {
            return Err("locking script does not match the terms".to_string());
        }

        let resolved = self
            .resolver
            .resolve(&listing.listing_reference)
            .await
            .map_err(|e| format!("listing output unavailable: {}", e))?;
        if resolved.locking_script != expected {
            return Err("on-chain locking script does not match the terms".to_string());
        }
        if resolved.value != NOMINAL_ITEM_VALUE {
            return Err(format!(
                "listing output holds {} instead of {}",
                resolved.value, NOMINAL_ITEM_VALUE
            ));
        }

        let tx = &listing.listing_transaction;
        if tx.id() != listing.listing_reference.txid {
            return Err("listing transaction does not create the listing output".to_string());
        }
        if !tx.spends(&listing.prior_item_reference) {
            return Err(format!(
                "listing transaction does not spend item {}",
                listing.prior_item_reference
            ));
        }
        Ok(())
    }

    /// Confirm `tx` settles the listing and say which branch it took
    pub fn validate_settlement(
        &self,
        record: &ListingRecord,
        tx: &Transaction,
    ) -> Result<SpendPath, MarketError> {
        let index = tx.input_spending(&record.output_reference).ok_or_else(|| {
            MarketError::Validation(format!(
                "{} does not spend listing {}",
                tx.id(),
                record.output_reference
            ))
        })?;

        let locking_script = render(&record.sale_terms);
        verify_spend(tx, index, &locking_script, NOMINAL_ITEM_VALUE)?;

        spend_path(&tx.inputs[index].unlocking_script).ok_or_else(|| {
            MarketError::Validation(format!("input {} takes no sale-lock branch", index))
        })
    }

    /// Validate `tx` and move the record to the outcome it represents
    pub fn apply_settlement(
        &self,
        record: &mut ListingRecord,
        tx: &Transaction,
    ) -> Result<SpendPath, MarketError> {
        let path = self.validate_settlement(record, tx)?;
        record.settle(path, tx.id())?;
        Ok(path)
    }
}
