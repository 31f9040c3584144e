use std::time::Duration;

use chrono::Utc;
use tracing::{info, warn};

use remedi_core::audit::{AuditCategory, AuditEvent, AuditOutcome, AuditSink};
use remedi_db::repositories::SqlAttachmentRepository;
use remedi_db::{AttachmentRepository, DbPool};

/// Independent scheduled sweep over abandoned attachment aggregates. Only
/// the repository's public deletion contract is used; the engine never
/// assumes whether a given sweep has run.
pub fn spawn(
    pool: DbPool,
    ttl_minutes: i64,
    interval_minutes: u64,
    audit: std::sync::Arc<dyn AuditSink>,
) {
    let repo = SqlAttachmentRepository::new(pool);
    let interval = Duration::from_secs(interval_minutes.max(1) * 60);

    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        // The first tick fires immediately, which doubles as a startup
        // cleanup of aggregates orphaned by a previous crash.
        loop {
            ticker.tick().await;
            let cutoff = Utc::now() - chrono::Duration::minutes(ttl_minutes);
            match repo.delete_older_than(cutoff).await {
                Ok(0) => {}
                Ok(removed) => {
                    info!(
                        event_name = "attachment.sweep_completed",
                        correlation_id = "sweep",
                        subject_id = "unknown",
                        removed,
                        "stale attachment aggregates removed"
                    );
                    audit.emit(AuditEvent::new(
                        None,
                        "sweep",
                        "attachment.sweep_completed",
                        AuditCategory::Sweep,
                        "attachment-sweep",
                        AuditOutcome::Success,
                    ));
                }
                Err(error) => {
                    warn!(
                        event_name = "attachment.sweep_failed",
                        correlation_id = "sweep",
                        subject_id = "unknown",
                        error = %error,
                        "attachment sweep failed; will retry on the next tick"
                    );
                }
            }
        }
    });
}
