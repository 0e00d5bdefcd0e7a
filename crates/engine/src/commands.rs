//! Command structs for engine operations.
//!
//! These types group parameters for the write paths, keeping call sites
//! readable and avoiding long argument lists.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::EntryReason;

/// One line item of a purchase-completion event.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineItem {
    pub price_id: String,
    pub quantity: i64,
    /// Per-unit credit count carried in the item's own metadata; the
    /// fallback when `price_id` is not in the pack rule table.
    #[serde(default)]
    pub unit_credits: Option<i64>,
}

impl LineItem {
    #[must_use]
    pub fn new(price_id: impl Into<String>, quantity: i64) -> Self {
        Self {
            price_id: price_id.into(),
            quantity,
            unit_credits: None,
        }
    }

    #[must_use]
    pub fn unit_credits(mut self, credits: i64) -> Self {
        self.unit_credits = Some(credits);
        self
    }
}

/// A purchase-completion event from the payment collaborator.
///
/// `source_id` must be stable across redeliveries of the same purchase
/// (a payment identifier, not the event-delivery identifier); it is the
/// idempotency key for the whole grant.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PurchaseEvent {
    pub payer_email: String,
    pub source_id: String,
    pub line_items: Vec<LineItem>,
}

impl PurchaseEvent {
    #[must_use]
    pub fn new(payer_email: impl Into<String>, source_id: impl Into<String>) -> Self {
        Self {
            payer_email: payer_email.into(),
            source_id: source_id.into(),
            line_items: Vec::new(),
        }
    }

    #[must_use]
    pub fn line_item(mut self, item: LineItem) -> Self {
        self.line_items.push(item);
        self
    }
}

/// A consumption request for one unit of work.
#[derive(Clone, Debug)]
pub struct DeductCmd {
    pub user_id: Uuid,
    pub amount: i64,
    pub reason: EntryReason,
    /// Stable id of the unit of work being paid for (e.g. a job id);
    /// makes retries safe.
    pub source_id: Option<String>,
}

impl DeductCmd {
    #[must_use]
    pub fn new(user_id: Uuid, amount: i64) -> Self {
        Self {
            user_id,
            amount,
            reason: EntryReason::Consumption,
            source_id: None,
        }
    }

    #[must_use]
    pub fn reason(mut self, reason: EntryReason) -> Self {
        self.reason = reason;
        self
    }

    #[must_use]
    pub fn source_id(mut self, source_id: impl Into<String>) -> Self {
        self.source_id = Some(source_id.into());
        self
    }
}
