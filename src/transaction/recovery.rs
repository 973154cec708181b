use std::collections::HashMap;
use std::time::Instant;

use log::{info, warn};

use crate::common::types::{millis_since, now_millis};
use crate::transaction::coordinator::{Result, TransactionCoordinator};
use crate::transaction::record::{TransactionRecord, TransactionState};

/// Outcome of a startup recovery pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecoveryReport {
    /// Log records scanned
    pub scanned: usize,
    /// Incomplete records successfully re-applied
    pub recovered: usize,
    /// Incomplete records that failed to re-apply (now marked failed)
    pub failed: usize,
    /// Records that could not be decoded and were skipped
    pub corrupt: usize,
}

/// Outcome of a purge pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PurgeReport {
    /// Applied records deleted
    pub purged_applied: usize,
    /// Failed records deleted
    pub purged_failed: usize,
}

/// Log record counts by state, for observability
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransactionStats {
    pub pending: usize,
    pub committed: usize,
    pub applied: usize,
    pub failed: usize,
}

impl TransactionCoordinator {
    /// Re-apply every transaction that was committed but not fully
    /// applied before a crash. Run once at startup, before the
    /// coordinator accepts new transactions.
    ///
    /// A record that fails to re-apply is marked failed and recovery
    /// moves on; a single bad record never blocks startup.
    pub fn recover(&self) -> Result<RecoveryReport> {
        let started = Instant::now();
        let mut report = RecoveryReport::default();

        for mut record in self.load_records(&mut report.corrupt)? {
            report.scanned += 1;
            if !record.is_incomplete() {
                continue;
            }

            match self.apply_record(&record) {
                Ok(()) => {
                    record.mark_applied(now_millis());
                    if let Err(persist_err) = self.persist_record(&record) {
                        // The record stays incomplete and the next
                        // recovery pass re-applies it; one bad log write
                        // must not block the records behind it
                        warn!(
                            "failed to persist applied state for {}: {}",
                            record.id, persist_err
                        );
                        report.failed += 1;
                        continue;
                    }
                    report.recovered += 1;
                    info!("recovered incomplete transaction {}", record.id);

                    let mut metadata = HashMap::new();
                    metadata.insert("transaction_id".to_string(), record.id.clone());
                    metadata.insert(
                        "committed_at".to_string(),
                        record.committed_at.unwrap_or_default().to_string(),
                    );
                    self.audit().record_event("transaction.recovered", &metadata);
                }
                Err(e) => {
                    record.mark_failed(&e.to_string());
                    if let Err(persist_err) = self.persist_record(&record) {
                        warn!(
                            "failed to persist recovery failure for {}: {}",
                            record.id, persist_err
                        );
                    }
                    report.failed += 1;
                    warn!("recovery of transaction {} failed: {}", record.id, e);
                }
            }
        }

        self.telemetry()
            .incr_counter("txn.recovery.recovered", report.recovered as u64);
        self.telemetry()
            .incr_counter("txn.recovery.failed", report.failed as u64);
        self.telemetry().record_gauge(
            "txn.recovery.duration_ms",
            started.elapsed().as_secs_f64() * 1000.0,
        );
        Ok(report)
    }

    /// Delete log records that are no longer needed: applied records
    /// past the short grace window, failed records past the longer one.
    /// Pending and committed records are never purged, regardless of
    /// age.
    pub fn purge(&self) -> Result<PurgeReport> {
        let now = now_millis();
        let applied_grace = self.config().applied_grace.as_millis() as u64;
        let failed_grace = self.config().failed_grace.as_millis() as u64;
        let mut report = PurgeReport::default();
        let mut corrupt = 0;

        for record in self.load_records(&mut corrupt)? {
            let eligible = match record.state {
                TransactionState::Applied => {
                    let age = millis_since(now, record.applied_at.unwrap_or(record.created_at));
                    age > applied_grace
                }
                TransactionState::Failed => {
                    millis_since(now, record.created_at) > failed_grace
                }
                TransactionState::Pending | TransactionState::Committed => false,
            };

            if eligible {
                self.store()
                    .delete(&self.config().log_container, &record.id)?;
                match record.state {
                    TransactionState::Applied => report.purged_applied += 1,
                    _ => report.purged_failed += 1,
                }
            }
        }

        if report.purged_applied > 0 || report.purged_failed > 0 {
            info!(
                "purged {} applied and {} failed transaction records",
                report.purged_applied, report.purged_failed
            );
        }
        self.telemetry()
            .incr_counter("txn.purge.applied", report.purged_applied as u64);
        self.telemetry()
            .incr_counter("txn.purge.failed", report.purged_failed as u64);
        Ok(report)
    }

    /// Log record counts by state
    pub fn stats(&self) -> Result<TransactionStats> {
        let mut corrupt = 0;
        let mut stats = TransactionStats::default();
        for record in self.load_records(&mut corrupt)? {
            match record.state {
                TransactionState::Pending => stats.pending += 1,
                TransactionState::Committed => stats.committed += 1,
                TransactionState::Applied => stats.applied += 1,
                TransactionState::Failed => stats.failed += 1,
            }
        }
        Ok(stats)
    }

    /// Decode every record in the log container, counting (and
    /// skipping) any that fail to decode
    fn load_records(&self, corrupt: &mut usize) -> Result<Vec<TransactionRecord>> {
        let mut records = Vec::new();
        for (key, bytes) in self.store().scan(&self.config().log_container)? {
            match TransactionRecord::deserialize(&bytes) {
                Ok(record) => records.push(record),
                Err(e) => {
                    *corrupt += 1;
                    warn!("skipping undecodable transaction record {}: {}", key, e);
                }
            }
        }
        Ok(records)
    }
}
