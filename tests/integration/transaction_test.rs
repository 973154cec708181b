// Transaction Coordinator Integration Tests

use std::sync::Arc;

use anyhow::Result;
use serde::{Deserialize, Serialize};
use tempfile::TempDir;

use duralog::common::types::INDEX_ORDER_KEY;
use duralog::telemetry::{NoopAudit, RecordingTelemetry};
use duralog::transaction::coordinator::TransactionError;
use duralog::{
    FileStore, PendingOp, RecordStore, TransactionCoordinator, TransactionCoordinatorConfig,
    TransactionRecord, TransactionState,
};

#[derive(Debug, PartialEq, Serialize, Deserialize)]
struct DeviceState {
    status: String,
}

/// Coordinator over a file store in a scratch directory
fn setup() -> Result<(TransactionCoordinator, Arc<FileStore>, TempDir)> {
    let dir = TempDir::new()?;
    let store = Arc::new(FileStore::new(dir.path())?);
    let coordinator = TransactionCoordinator::new(
        store.clone(),
        Arc::new(RecordingTelemetry::new()),
        Arc::new(NoopAudit),
        TransactionCoordinatorConfig::default(),
    );
    Ok((coordinator, store, dir))
}

#[test]
fn test_commit_makes_staged_writes_visible() -> Result<()> {
    let (tc, store, _dir) = setup()?;

    let id = tc.begin_transaction()?;
    tc.write_model_state(
        "devices",
        "d1",
        &DeviceState {
            status: "on".to_string(),
        },
    )?;
    tc.commit_transaction()?;

    // The staged write is readable from its target container
    let bytes = store.get("devices", "d1")?.expect("device record missing");
    let state: DeviceState = bincode::deserialize(&bytes)?;
    assert_eq!(state.status, "on");

    // And the log record ended applied
    let log_bytes = store.get("txn_log", &id)?.expect("log record missing");
    let record = TransactionRecord::deserialize(&log_bytes)?;
    assert_eq!(record.state, TransactionState::Applied);
    assert!(record.committed_at.is_some());
    assert!(record.applied_at.is_some());
    Ok(())
}

#[test]
fn test_commit_with_queue_and_index() -> Result<()> {
    let (tc, store, _dir) = setup()?;

    tc.begin_transaction()?;
    tc.write_model_state(
        "devices",
        "d1",
        &DeviceState {
            status: "on".to_string(),
        },
    )?;
    let payload = serde_json::to_vec(&serde_json::json!({
        "device": "d1",
        "action": "sync"
    }))?;
    tc.enqueue_pending_op(PendingOp {
        op_id: "op-1".to_string(),
        op_type: "sync".to_string(),
        payload,
    })?;
    tc.add_index_entry("op_index", "op-1")?;
    tc.commit_transaction()?;

    // The pending op landed in the work queue, keyed by its own id
    let queued = store.get("op_queue", "op-1")?.expect("queued op missing");
    let op: PendingOp = bincode::deserialize(&queued)?;
    let payload: serde_json::Value = serde_json::from_slice(&op.payload)?;
    assert_eq!(payload["device"], "d1");

    // And its id was appended to the index order list
    let order_bytes = store
        .get("op_index", INDEX_ORDER_KEY)?
        .expect("index order missing");
    let order: Vec<String> = bincode::deserialize(&order_bytes)?;
    assert_eq!(order, vec!["op-1".to_string()]);
    Ok(())
}

#[test]
fn test_sequential_transactions_share_one_coordinator() -> Result<()> {
    let (tc, store, _dir) = setup()?;

    for i in 0..3 {
        tc.begin_transaction()?;
        tc.write_model_state(
            "devices",
            &format!("d{}", i),
            &DeviceState {
                status: "on".to_string(),
            },
        )?;
        tc.add_index_entry("op_index", &format!("op-{}", i))?;
        tc.commit_transaction()?;
    }

    let order_bytes = store.get("op_index", INDEX_ORDER_KEY)?.unwrap();
    let order: Vec<String> = bincode::deserialize(&order_bytes)?;
    assert_eq!(order, vec!["op-0", "op-1", "op-2"]);

    let stats = tc.stats()?;
    assert_eq!(stats.applied, 3);
    Ok(())
}

#[test]
fn test_begin_while_in_progress_is_misuse() -> Result<()> {
    let (tc, _store, _dir) = setup()?;

    tc.begin_transaction()?;
    assert!(matches!(
        tc.begin_transaction(),
        Err(TransactionError::AlreadyInProgress)
    ));

    // Rollback clears the slot, after which begin works again
    tc.rollback_transaction()?;
    tc.begin_transaction()?;
    tc.commit_transaction()?;
    Ok(())
}

#[test]
fn test_rollback_leaves_targets_untouched() -> Result<()> {
    let (tc, store, _dir) = setup()?;

    let id = tc.begin_transaction()?;
    tc.write_model_state(
        "devices",
        "d1",
        &DeviceState {
            status: "on".to_string(),
        },
    )?;
    tc.rollback_transaction()?;

    assert!(store.get("devices", "d1")?.is_none());

    let log_bytes = store.get("txn_log", &id)?.unwrap();
    let record = TransactionRecord::deserialize(&log_bytes)?;
    assert_eq!(record.state, TransactionState::Failed);
    assert_eq!(record.error_message.as_deref(), Some("rolled back"));
    Ok(())
}

#[test]
fn test_coordinators_on_disjoint_containers() -> Result<()> {
    // Two coordinator instances (one per logical subsystem) sharing a
    // store need no coordination when their targets are disjoint
    let dir = TempDir::new()?;
    let store = Arc::new(FileStore::new(dir.path())?);

    let sync_tc = TransactionCoordinator::new(
        store.clone(),
        Arc::new(RecordingTelemetry::new()),
        Arc::new(NoopAudit),
        TransactionCoordinatorConfig {
            log_container: "sync_txn_log".to_string(),
            ..TransactionCoordinatorConfig::default()
        },
    );
    let prefs_tc = TransactionCoordinator::new(
        store.clone(),
        Arc::new(RecordingTelemetry::new()),
        Arc::new(NoopAudit),
        TransactionCoordinatorConfig {
            log_container: "prefs_txn_log".to_string(),
            ..TransactionCoordinatorConfig::default()
        },
    );

    sync_tc.begin_transaction()?;
    prefs_tc.begin_transaction()?; // Different instance, so no conflict
    sync_tc.write_model_state(
        "devices",
        "d1",
        &DeviceState {
            status: "on".to_string(),
        },
    )?;
    prefs_tc.write_model_state("preferences", "theme", "dark")?;
    sync_tc.commit_transaction()?;
    prefs_tc.commit_transaction()?;

    assert!(store.get("devices", "d1")?.is_some());
    assert!(store.get("preferences", "theme")?.is_some());
    assert_eq!(sync_tc.stats()?.applied, 1);
    assert_eq!(prefs_tc.stats()?.applied, 1);
    Ok(())
}
