use std::sync::{Arc, Mutex};

use chrono::{Duration, Utc};
use sea_orm::{ConnectOptions, ConnectionTrait, Database, DatabaseConnection, Statement};
use uuid::Uuid;

use engine::{
    AlertNotifier, CreditError, CreditService, DbUserResolver, DeductCmd, EntryReason, LineItem,
    PackRule, PackRuleSet, PurchaseEvent, UserResolver,
};
use migration::MigratorTrait;

#[derive(Default)]
struct RecordingNotifier {
    sent: Mutex<Vec<(Uuid, i64)>>,
}

impl RecordingNotifier {
    fn sent(&self) -> Vec<(Uuid, i64)> {
        self.sent.lock().unwrap().clone()
    }
}

impl AlertNotifier for RecordingNotifier {
    fn notify_threshold(&self, user_id: &Uuid, threshold: i64) {
        self.sent.lock().unwrap().push((*user_id, threshold));
    }
}

fn pack_rules() -> PackRuleSet {
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
            grace_days: None,
            auto_extend: true,
            label: "Bulk 10".to_string(),
        },
    ])
}

async fn service_with_db() -> (CreditService, DatabaseConnection, Arc<RecordingNotifier>) {
    let db = Database::connect("sqlite::memory:").await.unwrap();
    migration::Migrator::up(&db, None).await.unwrap();

    let notifier = Arc::new(RecordingNotifier::default());
    let service = CreditService::builder()
        .database(db.clone())
        .packs(pack_rules())
        .notifier(notifier.clone())
        .build();
    (service, db, notifier)
}

/// File-backed database with a single pooled connection, so concurrent
/// tasks fully serialize instead of tripping over SQLite busy errors.
async fn service_with_serialized_db() -> (Arc<CreditService>, DatabaseConnection) {
    let root =
        std::path::PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("../../target/test_dbs");
    std::fs::create_dir_all(&root).unwrap();

    let path = root.join(format!("credits_{}.db", Uuid::new_v4()));
    let mut options = ConnectOptions::new(format!("sqlite:{}?mode=rwc", path.display()));
    options.max_connections(1);

    let db = Database::connect(options).await.unwrap();
    migration::Migrator::up(&db, None).await.unwrap();

    let service = CreditService::builder()
        .database(db.clone())
        .packs(pack_rules())
        .build();
    (Arc::new(service), db)
}

async fn new_user(db: &DatabaseConnection, email: &str) -> Uuid {
    DbUserResolver::new(db.clone())
        .resolve_or_create(email)
        .await
        .unwrap()
}

#[tokio::test]
async fn grant_then_deduct_end_to_end() {
    let (service, db, _notifier) = service_with_db().await;
    let user_id = new_user(&db, "buyer@example.com").await;

    let granted = service
        .grant(
            PurchaseEvent::new("buyer@example.com", "pay_1")
                .line_item(LineItem::new("price_bulk10", 1)),
        )
        .await
        .unwrap();
    assert_eq!(granted, 10);

    let balance = service.balance(&user_id).await.unwrap();
    assert_eq!(balance.balance, 10);
    assert_eq!(balance.last_pack.as_deref(), Some("bulk10"));
    assert!(balance.auto_extend);
    assert!(balance.expires_at.is_some());

    let entries = service.transactions(&user_id, 10).await.unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].delta, 10);
    assert_eq!(entries[0].reason, EntryReason::Purchase);
    assert_eq!(entries[0].source_id.as_deref(), Some("pay_1"));

    let outcome = service
        .deduct(DeductCmd::new(user_id, 1).source_id("job_1"))
        .await
        .unwrap();
    assert_eq!(outcome.balance.balance, 9);
    assert_eq!(outcome.entry.delta, -1);
    assert_eq!(service.transactions(&user_id, 10).await.unwrap().len(), 2);

    // Redelivered purchase event: idempotent echo, not a new mutation.
    let granted_again = service
        .grant(
            PurchaseEvent::new("buyer@example.com", "pay_1")
                .line_item(LineItem::new("price_bulk10", 1)),
        )
        .await
        .unwrap();
    assert_eq!(granted_again, 10);
    assert_eq!(service.balance(&user_id).await.unwrap().balance, 9);

    let err = service
        .deduct(DeductCmd::new(user_id, 20).source_id("job_2"))
        .await
        .unwrap_err();
    assert_eq!(
        err,
        CreditError::InsufficientCredits {
            requested: 20,
            available: 9
        }
    );
    assert_eq!(service.balance(&user_id).await.unwrap().balance, 9);
}

#[tokio::test]
async fn grant_is_idempotent_across_redelivery() {
    let (service, db, _notifier) = service_with_db().await;
    let user_id = new_user(&db, "buyer@example.com").await;

    let event = PurchaseEvent::new("buyer@example.com", "pay_42")
        .line_item(LineItem::new("price_starter", 2));

    let first = service.grant(event.clone()).await.unwrap();
    let second = service.grant(event).await.unwrap();
    assert_eq!(first, 10);
    assert_eq!(second, 10);

    assert_eq!(service.balance(&user_id).await.unwrap().balance, 10);
    assert_eq!(service.transactions(&user_id, 10).await.unwrap().len(), 1);
}

#[tokio::test]
async fn grant_resolves_the_same_user_for_the_same_email() {
    let (service, db, _notifier) = service_with_db().await;

    service
        .grant(
            PurchaseEvent::new("Buyer@Example.com", "pay_1")
                .line_item(LineItem::new("price_starter", 1)),
        )
        .await
        .unwrap();
    service
        .grant(
            PurchaseEvent::new("buyer@example.com", "pay_2")
                .line_item(LineItem::new("price_starter", 1)),
        )
        .await
        .unwrap();

    let user_id = new_user(&db, "buyer@example.com").await;
    assert_eq!(service.balance(&user_id).await.unwrap().balance, 10);
}

#[tokio::test]
async fn grant_with_unknown_price_uses_item_metadata() {
    let (service, db, _notifier) = service_with_db().await;
    let user_id = new_user(&db, "buyer@example.com").await;

    let granted = service
        .grant(
            PurchaseEvent::new("buyer@example.com", "pay_1")
                .line_item(LineItem::new("price_custom", 2).unit_credits(3)),
        )
        .await
        .unwrap();
    assert_eq!(granted, 6);

    let balance = service.balance(&user_id).await.unwrap();
    assert_eq!(balance.balance, 6);
    // No pack matched, so no expiry policy was set.
    assert!(balance.expires_at.is_none());
    assert!(balance.last_pack.is_none());
}

#[tokio::test]
async fn grant_with_no_credit_items_is_a_noop() {
    let (service, db, _notifier) = service_with_db().await;
    let user_id = new_user(&db, "buyer@example.com").await;

    let granted = service
        .grant(
            PurchaseEvent::new("buyer@example.com", "pay_1")
                .line_item(LineItem::new("price_tshirt", 1)),
        )
        .await
        .unwrap();
    assert_eq!(granted, 0);

    assert_eq!(service.balance(&user_id).await.unwrap().balance, 0);
    assert!(service.transactions(&user_id, 10).await.unwrap().is_empty());
}

#[tokio::test]
async fn later_pack_policy_replaces_the_earlier_one() {
    let (service, db, _notifier) = service_with_db().await;
    let user_id = new_user(&db, "buyer@example.com").await;

    service
        .grant(
            PurchaseEvent::new("buyer@example.com", "pay_1")
                .line_item(LineItem::new("price_starter", 1)),
        )
        .await
        .unwrap();
    let starter = service.balance(&user_id).await.unwrap();
    assert_eq!(starter.last_pack.as_deref(), Some("starter"));
    assert!(!starter.auto_extend);

    service
        .grant(
            PurchaseEvent::new("buyer@example.com", "pay_2")
                .line_item(LineItem::new("price_bulk10", 1)),
        )
        .await
        .unwrap();
    let bulk = service.balance(&user_id).await.unwrap();
    assert_eq!(bulk.balance, 15);
    assert_eq!(bulk.last_pack.as_deref(), Some("bulk10"));
    assert!(bulk.auto_extend);
    assert!(bulk.expires_at.unwrap() > starter.expires_at.unwrap());
}

#[tokio::test]
async fn deduct_is_idempotent_for_the_same_job() {
    let (service, _db, _notifier) = service_with_db().await;
    let user_id = Uuid::new_v4();
    service.adjust(user_id, 10, None).await.unwrap();

    let first = service
        .deduct(DeductCmd::new(user_id, 4).source_id("job_1"))
        .await
        .unwrap();
    assert_eq!(first.balance.balance, 6);

    let second = service
        .deduct(DeductCmd::new(user_id, 4).source_id("job_1"))
        .await
        .unwrap();
    assert_eq!(second.balance.balance, 6);
    assert_eq!(second.entry.id, first.entry.id);

    // One seed adjustment plus exactly one consumption row.
    let entries = service.transactions(&user_id, 10).await.unwrap();
    assert_eq!(entries.len(), 2);
    assert_eq!(service.ledger_total(&user_id).await.unwrap(), 6);
}

#[tokio::test]
async fn insufficient_credits_leaves_no_trace() {
    let (service, _db, notifier) = service_with_db().await;
    let user_id = Uuid::new_v4();
    service.adjust(user_id, 3, None).await.unwrap();

    let err = service
        .deduct(DeductCmd::new(user_id, 5).source_id("job_1"))
        .await
        .unwrap_err();
    assert_eq!(
        err,
        CreditError::InsufficientCredits {
            requested: 5,
            available: 3
        }
    );

    assert_eq!(service.balance(&user_id).await.unwrap().balance, 3);
    assert_eq!(service.transactions(&user_id, 10).await.unwrap().len(), 1);
    // Even though 3 -> -2 would have crossed a trip-wire, the failed
    // deduction alerts nobody.
    assert!(notifier.sent().is_empty());
}

#[tokio::test]
async fn deduct_rejects_nonpositive_amounts() {
    let (service, _db, _notifier) = service_with_db().await;
    let user_id = Uuid::new_v4();

    let err = service.deduct(DeductCmd::new(user_id, 0)).await.unwrap_err();
    assert_eq!(
        err,
        CreditError::InvalidAmount("deduction amount must be > 0".to_string())
    );
}

#[tokio::test]
async fn threshold_fires_highest_only_and_only_once() {
    let (service, _db, notifier) = service_with_db().await;
    let user_id = Uuid::new_v4();
    service.adjust(user_id, 12, None).await.unwrap();

    // 12 -> 4 crosses both 10 and 5; only the highest fires.
    let outcome = service
        .deduct(DeductCmd::new(user_id, 8).source_id("job_1"))
        .await
        .unwrap();
    assert_eq!(outcome.balance.balance, 4);
    assert_eq!(outcome.threshold_crossed, Some(10));
    assert_eq!(notifier.sent(), vec![(user_id, 10)]);

    // Retrying the identical deduction never fires a second alert.
    let replay = service
        .deduct(DeductCmd::new(user_id, 8).source_id("job_1"))
        .await
        .unwrap();
    assert_eq!(replay.threshold_crossed, None);
    assert_eq!(notifier.sent(), vec![(user_id, 10)]);
}

#[tokio::test]
async fn threshold_alert_never_rearms() {
    let (_service, db, notifier) = service_with_db().await;
    // Single trip-wire keeps the recovery scenario focused on one threshold.
    let service = CreditService::builder()
        .database(db.clone())
        .packs(pack_rules())
        .thresholds(vec![5])
        .notifier(notifier.clone())
        .build();

    let user_id = Uuid::new_v4();
    service.adjust(user_id, 6, None).await.unwrap();

    let first = service
        .deduct(DeductCmd::new(user_id, 2).source_id("job_1"))
        .await
        .unwrap();
    assert_eq!(first.threshold_crossed, Some(5));

    // Balance recovers above the threshold, then drops through it again.
    service.adjust(user_id, 10, None).await.unwrap();
    let second = service
        .deduct(DeductCmd::new(user_id, 10).source_id("job_2"))
        .await
        .unwrap();
    assert_eq!(second.balance.balance, 4);
    assert_eq!(second.threshold_crossed, None);
    assert_eq!(notifier.sent(), vec![(user_id, 5)]);
}

#[tokio::test]
async fn concurrent_deductions_all_succeed() {
    let (service, _db) = service_with_serialized_db().await;
    let user_id = Uuid::new_v4();
    service.adjust(user_id, 5, None).await.unwrap();

    let mut tasks = tokio::task::JoinSet::new();
    for i in 0..5 {
        let service = service.clone();
        tasks.spawn(async move {
            service
                .deduct(DeductCmd::new(user_id, 1).source_id(format!("job_{i}")))
                .await
        });
    }
    while let Some(result) = tasks.join_next().await {
        result.unwrap().unwrap();
    }

    assert_eq!(service.balance(&user_id).await.unwrap().balance, 0);
    // One seed adjustment plus five consumption rows.
    assert_eq!(service.transactions(&user_id, 10).await.unwrap().len(), 6);
    assert_eq!(service.ledger_total(&user_id).await.unwrap(), 0);
}

#[tokio::test]
async fn concurrent_contention_exactly_one_wins() {
    let (service, _db) = service_with_serialized_db().await;
    let user_id = Uuid::new_v4();
    service.adjust(user_id, 1, None).await.unwrap();

    let mut tasks = tokio::task::JoinSet::new();
    for name in ["job_x", "job_y"] {
        let service = service.clone();
        tasks.spawn(async move {
            service
                .deduct(DeductCmd::new(user_id, 1).source_id(name))
                .await
        });
    }

    let mut wins = 0;
    let mut losses = 0;
    while let Some(result) = tasks.join_next().await {
        match result.unwrap() {
            Ok(_) => wins += 1,
            Err(CreditError::InsufficientCredits { .. }) => losses += 1,
            Err(err) => panic!("unexpected error: {err}"),
        }
    }
    assert_eq!((wins, losses), (1, 1));
    assert_eq!(service.balance(&user_id).await.unwrap().balance, 0);
    assert_eq!(service.transactions(&user_id, 10).await.unwrap().len(), 2);
}

#[tokio::test]
async fn balance_matches_ledger_sum_after_mixed_operations() {
    let (service, db, _notifier) = service_with_db().await;
    let user_id = new_user(&db, "buyer@example.com").await;

    service
        .grant(
            PurchaseEvent::new("buyer@example.com", "pay_1")
                .line_item(LineItem::new("price_bulk10", 2)),
        )
        .await
        .unwrap();
    service
        .deduct(DeductCmd::new(user_id, 3).source_id("job_1"))
        .await
        .unwrap();
    service.adjust(user_id, -2, None).await.unwrap();
    service
        .deduct(DeductCmd::new(user_id, 1).source_id("job_2"))
        .await
        .unwrap();

    let balance = service.balance(&user_id).await.unwrap();
    assert_eq!(balance.balance, 14);
    assert_eq!(service.ledger_total(&user_id).await.unwrap(), balance.balance);
}

#[tokio::test]
async fn expiry_sweep_zeroes_balance_and_leaves_ledger_untouched() {
    let (service, db, _notifier) = service_with_db().await;
    let user_id = new_user(&db, "buyer@example.com").await;

    service
        .grant(
            PurchaseEvent::new("buyer@example.com", "pay_1")
                .line_item(LineItem::new("price_starter", 1)),
        )
        .await
        .unwrap();

    // Backdate the expiry so the sweep picks the account up.
    let backend = db.get_database_backend();
    db.execute(Statement::from_sql_and_values(
        backend,
        "UPDATE balances SET expires_at = ? WHERE user_id = ?",
        vec![
            (Utc::now() - Duration::days(1)).into(),
            user_id.to_string().into(),
        ],
    ))
    .await
    .unwrap();

    let swept = service.sweep_expired(Utc::now()).await.unwrap();
    assert_eq!(swept, 1);
    assert_eq!(service.balance(&user_id).await.unwrap().balance, 0);

    // The sweep writes no compensating entry, so the cached balance and
    // the ledger sum drift apart here. Intentional for now; `audit`
    // surfaces it.
    assert_eq!(service.ledger_total(&user_id).await.unwrap(), 5);

    // Already-zeroed accounts are not swept again.
    assert_eq!(service.sweep_expired(Utc::now()).await.unwrap(), 0);
}

#[tokio::test]
async fn auto_extend_pushes_expiry_on_consumption() {
    let (service, db, _notifier) = service_with_db().await;
    let user_id = new_user(&db, "buyer@example.com").await;

    service
        .grant(
            PurchaseEvent::new("buyer@example.com", "pay_1")
                .line_item(LineItem::new("price_bulk10", 1)),
        )
        .await
        .unwrap();
    let before = service.balance(&user_id).await.unwrap().expires_at.unwrap();

    let outcome = service
        .deduct(DeductCmd::new(user_id, 1).source_id("job_1"))
        .await
        .unwrap();
    let after = outcome.balance.expires_at.unwrap();
    assert_eq!(after, before + Duration::days(30));

    // Non-auto-extend packs keep their expiry as granted.
    service
        .grant(
            PurchaseEvent::new("other@example.com", "pay_2")
                .line_item(LineItem::new("price_starter", 1)),
        )
        .await
        .unwrap();
    let other_id = new_user(&db, "other@example.com").await;
    let granted_at = service.balance(&other_id).await.unwrap().expires_at.unwrap();
    let outcome = service
        .deduct(DeductCmd::new(other_id, 1).source_id("job_3"))
        .await
        .unwrap();
    assert_eq!(outcome.balance.expires_at.unwrap(), granted_at);
}

#[tokio::test]
async fn adjust_cannot_drive_the_balance_negative() {
    let (service, _db, _notifier) = service_with_db().await;
    let user_id = Uuid::new_v4();
    service.adjust(user_id, 3, None).await.unwrap();

    let err = service.adjust(user_id, -5, None).await.unwrap_err();
    assert_eq!(
        err,
        CreditError::InsufficientCredits {
            requested: 5,
            available: 3
        }
    );
    assert_eq!(service.balance(&user_id).await.unwrap().balance, 3);
}
