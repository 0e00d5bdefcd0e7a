//! Credit ledger engine.
//!
//! Tracks how many staging credits each user owns. An append-only ledger
//! of signed movements is the source of truth; a per-user balance row is
//! kept in lockstep inside the same database transaction. Grants and
//! deductions are idempotent under an externally supplied `source_id`,
//! so retried or redelivered calls never double-count.

use std::sync::Arc;

use sea_orm::DatabaseConnection;

pub use alerts::DEFAULT_THRESHOLDS;
pub use balances::Balance;
pub use commands::{DeductCmd, LineItem, PurchaseEvent};
pub use deduct::DeductOutcome;
pub use entries::{EntryReason, LedgerEntry};
pub use error::CreditError;
pub use notify::{AlertNotifier, LogNotifier};
pub use packs::{PackRule, PackRuleSet};
pub use users::{DbUserResolver, UserResolver};

mod adjust;
mod alerts;
mod balances;
mod commands;
mod deduct;
mod entries;
mod error;
mod grant;
mod notify;
mod packs;
mod sweeper;
mod users;

type CreditResult<T> = Result<T, CreditError>;

/// Run a block inside a DB transaction, committing on success and rolling back on error.
macro_rules! with_tx {
    ($self:expr, |$tx:ident| $body:expr) => {{
        let $tx = $self.database.begin().await?;
        let result = $body;
        match result {
            Ok(value) => {
                $tx.commit().await?;
                Ok(value)
            }
            Err(err) => Err(err),
        }
    }};
}

pub(crate) use with_tx;

/// The credit service.
///
/// Constructed once at process start and passed by reference into every
/// request or job handler; there is no ambient global state. All write
/// operations serialize per user on the balance row, never globally.
pub struct CreditService {
    database: DatabaseConnection,
    packs: PackRuleSet,
    thresholds: Vec<i64>,
    users: Arc<dyn UserResolver>,
    notifier: Arc<dyn AlertNotifier>,
}

impl CreditService {
    /// Return a builder for `CreditService`. Help to build the struct.
    pub fn builder() -> CreditServiceBuilder {
        CreditServiceBuilder::default()
    }

    pub fn pack_rules(&self) -> &PackRuleSet {
        &self.packs
    }

    pub fn thresholds(&self) -> &[i64] {
        &self.thresholds
    }
}

/// The builder for `CreditService`
#[derive(Default)]
pub struct CreditServiceBuilder {
    database: DatabaseConnection,
    packs: PackRuleSet,
    thresholds: Option<Vec<i64>>,
    users: Option<Arc<dyn UserResolver>>,
    notifier: Option<Arc<dyn AlertNotifier>>,
}

impl CreditServiceBuilder {
    /// Pass the required database
    pub fn database(mut self, db: DatabaseConnection) -> CreditServiceBuilder {
        self.database = db;
        self
    }

    /// Pack rules recognized by the grant processor.
    pub fn packs(mut self, packs: PackRuleSet) -> CreditServiceBuilder {
        self.packs = packs;
        self
    }

    /// Low-balance alert thresholds. Order does not matter; the service
    /// always evaluates them highest-first.
    pub fn thresholds(mut self, thresholds: Vec<i64>) -> CreditServiceBuilder {
        self.thresholds = Some(thresholds);
        self
    }

    /// Substitute the payer-email resolution (defaults to the `users`
    /// table upsert).
    pub fn user_resolver(mut self, users: Arc<dyn UserResolver>) -> CreditServiceBuilder {
        self.users = Some(users);
        self
    }

    /// Substitute the low-balance notifier (defaults to a log line).
    pub fn notifier(mut self, notifier: Arc<dyn AlertNotifier>) -> CreditServiceBuilder {
        self.notifier = Some(notifier);
        self
    }

    /// Construct `CreditService`
    pub fn build(self) -> CreditService {
        let mut thresholds = self
            .thresholds
            .unwrap_or_else(|| DEFAULT_THRESHOLDS.to_vec());
        // Highest-crossed selection relies on descending order; enforce it
        // here instead of trusting configuration order.
        thresholds.sort_unstable_by(|a, b| b.cmp(a));
        thresholds.dedup();

        let users = self
            .users
            .unwrap_or_else(|| Arc::new(DbUserResolver::new(self.database.clone())));
        let notifier = self.notifier.unwrap_or_else(|| Arc::new(LogNotifier));

        CreditService {
            database: self.database,
            packs: self.packs,
            thresholds,
            users,
            notifier,
        }
    }
}
