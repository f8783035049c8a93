use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio_util::sync::CancellationToken;

use super::{ExpiryReminderScheduler, NotificationLedger, ReminderPublisher};
use crate::compliance::audit::AuditSink;
use crate::compliance::lifecycle::CoiLifecycle;
use crate::compliance::repository::CoiRepository;
use crate::compliance::requirements::RequirementStore;

/// Run the expiration sweep followed by a reminder tick on a fixed interval.
///
/// The sweep goes first so certificates that lapsed since the last run are out of the
/// reminder pass. Runs until `cancel` is triggered.
pub async fn run_expiry_jobs<R, Q, A, L, P>(
    lifecycle: Arc<CoiLifecycle<R, Q, A>>,
    scheduler: Arc<ExpiryReminderScheduler<R, L, P>>,
    every: Duration,
    cancel: CancellationToken,
) where
    R: CoiRepository + 'static,
    Q: RequirementStore + 'static,
    A: AuditSink + 'static,
    L: NotificationLedger + 'static,
    P: ReminderPublisher + 'static,
{
    tracing::info!(interval_secs = every.as_secs(), "expiry jobs started");
    let mut interval = tokio::time::interval(every);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::info!("expiry jobs stopping");
                break;
            }
            _ = interval.tick() => {
                let now = Utc::now();
                if let Err(e) = lifecycle.sweep_expirations(now) {
                    tracing::error!(error = %e, "expiration sweep failed");
                }
                match scheduler.tick(now) {
                    Ok(report) => tracing::debug!(
                        emitted = report.emitted.len(),
                        duplicates = report.duplicates,
                        failed = report.failed.len(),
                        "reminder tick complete"
                    ),
                    Err(e) => tracing::error!(error = %e, "reminder tick failed"),
                }
            }
        }
    }
}
