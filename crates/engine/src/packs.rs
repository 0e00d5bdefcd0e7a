//! Pack rules: static configuration mapping external price identifiers
//! to credit amounts and expiry policy.
//!
//! The table is read-only at runtime and swapped only via configuration
//! and redeploy; nothing here is persisted per user.

use std::collections::HashMap;

use chrono::{DateTime, Days, Months, Utc};
use serde::{Deserialize, Serialize};

use crate::{CreditError, CreditResult, LineItem};

/// One recognized pack tier.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackRule {
    /// External price identifier from the payment collaborator.
    pub price_id: String,
    /// Stable pack key, recorded on the balance as `last_pack`.
    pub key: String,
    pub credits: i64,
    pub validity_months: u32,
    #[serde(default)]
    pub grace_days: Option<u64>,
    #[serde(default)]
    pub auto_extend: bool,
    pub label: String,
}

impl PackRule {
    /// Expiry for a purchase of this pack at `now`, grace included.
    pub fn expires_at(&self, now: DateTime<Utc>) -> CreditResult<DateTime<Utc>> {
        now.checked_add_months(Months::new(self.validity_months))
            .and_then(|at| at.checked_add_days(Days::new(self.grace_days.unwrap_or(0))))
            .ok_or_else(|| {
                CreditError::InvalidAmount(format!("pack \"{}\" validity overflows", self.key))
            })
    }
}

/// The pack rule table, keyed by external price identifier.
#[derive(Clone, Debug, Default)]
pub struct PackRuleSet {
    by_price: HashMap<String, PackRule>,
}

impl PackRuleSet {
    pub fn new(rules: Vec<PackRule>) -> Self {
        let by_price = rules
            .into_iter()
            .map(|rule| (rule.price_id.clone(), rule))
            .collect();
        Self { by_price }
    }

    pub fn lookup(&self, price_id: &str) -> Option<&PackRule> {
        self.by_price.get(price_id)
    }

    /// Total credits for a purchase, plus the rule supplying the balance
    /// policy (the last matching line item wins, consistent with later
    /// purchases overriding earlier ones).
    ///
    /// An unrecognized price id falls back to the per-unit credit count
    /// the line item itself carries, and contributes zero without one.
    pub(crate) fn credits_for_items<'a>(&'a self, items: &[LineItem]) -> (i64, Option<&'a PackRule>) {
        let mut total = 0;
        let mut matched = None;
        for item in items {
            match self.lookup(&item.price_id) {
                Some(rule) => {
                    total += rule.credits * item.quantity;
                    matched = Some(rule);
                }
                None => {
                    if let Some(unit_credits) = item.unit_credits {
                        total += unit_credits * item.quantity;
                    }
                }
            }
        }
        (total, matched)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rules() -> PackRuleSet {
        PackRuleSet::new(vec![
            PackRule {
                price_id: "price_starter".to_string(),
                key: "starter".to_string(),
                credits: 5,
                validity_months: 3,
                grace_days: None,
                auto_extend: false,
                label: "Starter".to_string(),
            },
            PackRule {
                price_id: "price_bulk10".to_string(),
                key: "bulk10".to_string(),
                credits: 10,
                validity_months: 12,
                grace_days: Some(14),
                auto_extend: true,
                label: "Bulk 10".to_string(),
            },
        ])
    }

    #[test]
    fn multiplies_credits_by_quantity() {
        let rules = rules();
        let (total, matched) =
            rules.credits_for_items(&[LineItem::new("price_starter", 3)]);
        assert_eq!(total, 15);
        assert_eq!(matched.map(|rule| rule.key.as_str()), Some("starter"));
    }

    #[test]
    fn unknown_price_uses_item_metadata() {
        let rules = rules();
        let (total, matched) =
            rules.credits_for_items(&[LineItem::new("price_custom", 2).unit_credits(3)]);
        assert_eq!(total, 6);
        assert!(matched.is_none());
    }

    #[test]
    fn unmapped_items_contribute_zero() {
        let rules = rules();
        let (total, matched) = rules.credits_for_items(&[
            LineItem::new("price_tshirt", 1),
            LineItem::new("price_starter", 1),
        ]);
        assert_eq!(total, 5);
        assert!(matched.is_some());
    }

    #[test]
    fn last_matching_pack_supplies_the_policy() {
        let rules = rules();
        let (total, matched) = rules.credits_for_items(&[
            LineItem::new("price_starter", 1),
            LineItem::new("price_bulk10", 1),
        ]);
        assert_eq!(total, 15);
        assert_eq!(matched.map(|rule| rule.key.as_str()), Some("bulk10"));
    }

    #[test]
    fn grace_days_extend_the_expiry() {
        let now = Utc::now();
        let rules = rules();
        let bulk = rules.lookup("price_bulk10").unwrap();
        let without_grace = now.checked_add_months(Months::new(12)).unwrap();
        assert_eq!(
            bulk.expires_at(now).unwrap(),
            without_grace.checked_add_days(Days::new(14)).unwrap()
        );
    }
}
