//! Listing records
//!
//! A listing record caches what the chain says about one sale-lock output.
//! The chain stays authoritative: records only move forward from Active, and
//! stale records are reconciled against the spending transaction.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core::{OutputReference, TxId};
use crate::error::MarketError;
use crate::salelock::{SaleTerms, SpendPath};

/// Status of a listing
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub enum ListingStatus {
    /// Locked in a sale-lock, available for purchase
    Active,
    /// Bought through the purchase branch
    Sold,
    /// Withdrawn through the cancel branch
    Cancelled,
}

/// A listed item and the terms it is offered under
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct ListingRecord {
    /// The sale-lock output holding the item
    pub output_reference: OutputReference,
    /// Terms rendered into the output's locking script
    pub sale_terms: SaleTerms,
    /// Current status
    pub status: ListingStatus,
    /// Seller account identifier
    pub seller_id: String,
    /// Identifier of the logical item record
    pub item_reference: String,
    /// Transaction that sold or withdrew the item
    pub settled_by: Option<TxId>,
    /// Creation timestamp
    pub created_at: DateTime<Utc>,
    /// When status last changed
    pub updated_at: DateTime<Utc>,
}

impl ListingRecord {
    /// Create an active listing
    pub fn new(
        output_reference: OutputReference,
        sale_terms: SaleTerms,
        seller_id: impl Into<String>,
        item_reference: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            output_reference,
            sale_terms,
            status: ListingStatus::Active,
            seller_id: seller_id.into(),
            item_reference: item_reference.into(),
            settled_by: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == ListingStatus::Active
    }

    /// Mark as sold by `txid`
    pub fn mark_sold(&mut self, txid: TxId) -> Result<(), MarketError> {
        self.transition(ListingStatus::Sold, txid)
    }

    /// Mark as cancelled by `txid`
    pub fn mark_cancelled(&mut self, txid: TxId) -> Result<(), MarketError> {
        self.transition(ListingStatus::Cancelled, txid)
    }

    /// Apply the outcome of a settling transaction
    pub fn settle(&mut self, path: SpendPath, txid: TxId) -> Result<(), MarketError> {
        match path {
            SpendPath::Purchase => self.mark_sold(txid),
            SpendPath::Cancel => self.mark_cancelled(txid),
        }
    }

    fn transition(&mut self, to: ListingStatus, txid: TxId) -> Result<(), MarketError> {
        if self.status != ListingStatus::Active {
            return Err(MarketError::Conflict(format!(
                "listing {} is {:?}, cannot become {:?}",
                self.output_reference, self.status, to
            )));
        }
        self.status = to;
        self.settled_by = Some(txid);
        self.updated_at = Utc::now();
        Ok(())
    }
}
