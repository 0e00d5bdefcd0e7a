//! Notification seam for low-balance alerts.

use uuid::Uuid;

/// One-way "balance crossed threshold T" request toward the notifier
/// collaborator.
///
/// Called strictly after the deduction transaction commits, so the
/// balance-row lock is never held across delivery. At-least-once
/// delivery downstream is harmless: the alert dedup table already
/// guarantees a single request per `(user, threshold)`.
pub trait AlertNotifier: Send + Sync {
    fn notify_threshold(&self, user_id: &Uuid, threshold: i64);
}

/// Default notifier: logs the request and leaves delivery to whatever
/// consumes the logs.
pub struct LogNotifier;

impl AlertNotifier for LogNotifier {
    fn notify_threshold(&self, user_id: &Uuid, threshold: i64) {
        tracing::info!(%user_id, threshold, "balance crossed low-credit threshold");
    }
}
