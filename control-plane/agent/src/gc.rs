//! `GarbageCollector` (spec §4.6): periodically drains the two expiry
//! indices and issues deletes against the *controller's own* client, never
//! a caller-scoped one (the caller may be long gone by the time a session
//! expires).

use chrono::{Duration as ChronoDuration, Utc};
use common_lib::types::{SessionKind, SessionRecord};
use k8s_client::OrchestratorClient;
use std::sync::Arc;
use std::time::Duration;
use store::SessionStore;
use tokio_util::sync::CancellationToken;

pub struct GarbageCollector {
    store: Arc<dyn SessionStore>,
    client: Arc<dyn OrchestratorClient>,
    interval: Duration,
    tick_timeout: Duration,
    idle_threshold: ChronoDuration,
    limit_per_index: usize,
}

/// Outcome of a single tick, surfaced for logging and tests (spec §7
/// `GCPartial`: "logged, aggregated, never fatal").
#[derive(Debug, Default)]
pub struct TickReport {
    pub deleted: usize,
    pub errors: Vec<String>,
}

impl GarbageCollector {
    pub fn new(
        store: Arc<dyn SessionStore>,
        client: Arc<dyn OrchestratorClient>,
        interval: Duration,
        tick_timeout: Duration,
        idle_threshold: ChronoDuration,
        limit_per_index: usize,
    ) -> Self {
        Self {
            store,
            client,
            interval,
            tick_timeout,
            idle_threshold,
            limit_per_index,
        }
    }

    /// Runs ticks at the configured interval until `cancel` fires.
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.interval);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!("garbage collector shutting down");
                    return;
                }
                _ = ticker.tick() => {
                    let report = match tokio::time::timeout(self.tick_timeout, self.tick()).await {
                        Ok(report) => report,
                        Err(_) => {
                            tracing::warn!("garbage collector tick exceeded its bound");
                            continue;
                        }
                    };
                    if !report.errors.is_empty() {
                        tracing::warn!(deleted = report.deleted, errors = ?report.errors, "gc tick completed with partial failures");
                    } else if report.deleted > 0 {
                        tracing::info!(deleted = report.deleted, "gc tick reclaimed sessions");
                    }
                }
            }
        }
    }

    /// One tick of spec §4.6's three steps. Never aborts early: every
    /// candidate is attempted even if an earlier one failed, and all
    /// errors are aggregated into the returned report.
    pub async fn tick(&self) -> TickReport {
        let now = Utc::now();
        let mut report = TickReport::default();

        let inactive = match self.store.list_inactive(now - self.idle_threshold, self.limit_per_index).await {
            Ok(records) => records,
            Err(error) => {
                report.errors.push(format!("list_inactive: {}", error));
                Vec::new()
            }
        };
        let expired = match self.store.list_expired(now, self.limit_per_index).await {
            Ok(records) => records,
            Err(error) => {
                report.errors.push(format!("list_expired: {}", error));
                Vec::new()
            }
        };

        // P7 is the store's own invariant (a record only appears in an
        // index if it's actually due); this loop additionally re-checks
        // both conditions so a record freshly touched between the list and
        // the delete (a genuine, if narrow, race) isn't reclaimed.
        let mut seen = std::collections::HashSet::new();
        for record in inactive.into_iter().chain(expired.into_iter()) {
            if !seen.insert(record.session_id.clone()) {
                continue;
            }
            if record.last_activity > now - self.idle_threshold && record.expires_at > now {
                continue;
            }
            self.reclaim(record, &mut report).await;
        }
        report
    }

    async fn reclaim(&self, record: SessionRecord, report: &mut TickReport) {
        let delete_result = match &record.kind {
            SessionKind::ClaimBacked { claim_name } => {
                self.client.delete_claim(&record.sandbox_namespace, claim_name).await
            }
            SessionKind::Direct => Ok(()),
        };
        if let Err(error) = delete_result {
            report.errors.push(format!("delete_claim({}): {}", record.session_id, error));
            return;
        }
        if let Err(error) = self
            .client
            .delete_sandbox(&record.sandbox_namespace, &record.sandbox_name)
            .await
        {
            report.errors.push(format!("delete_sandbox({}): {}", record.session_id, error));
            return;
        }
        if let Err(error) = self.store.delete(&record.session_id).await {
            report.errors.push(format!("store.delete({}): {}", record.session_id, error));
            return;
        }
        report.deleted += 1;
    }
}
