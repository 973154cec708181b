// Lock Coordinator Integration Tests
//
// Two coordinators sharing one file store stand in for two runner
// processes sharing a storage directory. Staleness thresholds are
// scaled down to milliseconds to keep the tests fast.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::Result;
use tempfile::TempDir;

use duralog::runner::RUNNER_METADATA_CONTAINER;
use duralog::telemetry::{NoopAudit, RecordingTelemetry};
use duralog::{FileStore, LockCoordinator, LockCoordinatorConfig, RecordStore, RunnerIdentity};

const STALENESS: Duration = Duration::from_millis(100);
const HEARTBEAT: Duration = Duration::from_millis(20);

fn test_config() -> LockCoordinatorConfig {
    LockCoordinatorConfig {
        lock_container: "locks".to_string(),
        staleness_threshold: STALENESS,
        heartbeat_interval: HEARTBEAT,
    }
}

/// A coordinator standing in for one runner process
fn runner(store: Arc<FileStore>) -> Arc<LockCoordinator> {
    Arc::new(LockCoordinator::new(
        store,
        RunnerIdentity::generate(),
        Arc::new(RecordingTelemetry::new()),
        Arc::new(NoopAudit),
        test_config(),
    ))
}

fn shared_store() -> Result<(Arc<FileStore>, TempDir)> {
    let dir = TempDir::new()?;
    let store = Arc::new(FileStore::new(dir.path())?);
    Ok((store, dir))
}

#[test]
fn test_live_holder_blocks_and_stale_holder_yields() -> Result<()> {
    let (store, _dir) = shared_store()?;
    let r1 = runner(store.clone());
    let r2 = runner(store);

    // R1 acquires and renews within the staleness threshold
    assert!(r1.acquire_lock("sync", None)?);
    thread::sleep(Duration::from_millis(40));
    assert!(r1.renew_heartbeat("sync")?);

    // R2 attempts while the last heartbeat is fresh - contention
    assert!(!r2.acquire_lock("sync", None)?);

    // R1 "crashes": no more renewals. Once the threshold elapses the
    // lock is takeable.
    thread::sleep(Duration::from_millis(150));
    assert!(r2.acquire_lock("sync", None)?);

    let info = r2.get_lock_info("sync")?.expect("lock record missing");
    assert_eq!(info.runner_id, r2.runner().id);
    assert_eq!(r2.get_stats().takeovers, 1);

    // The displaced holder notices on its next renewal
    assert!(!r1.renew_heartbeat("sync")?);
    Ok(())
}

#[test]
fn test_heartbeat_keeps_lock_fresh_across_many_thresholds() -> Result<()> {
    let (store, _dir) = shared_store()?;
    let r1 = runner(store.clone());
    let r2 = runner(store);

    assert!(r1.acquire_lock("sync", None)?);
    r1.start_heartbeat("sync");

    // Several staleness windows pass, but renewals keep the holder live
    thread::sleep(Duration::from_millis(300));
    assert!(!r2.acquire_lock("sync", None)?);
    assert!(r1.heartbeat_running("sync"));

    let info = r1.get_lock_info("sync")?.unwrap();
    assert!(info.renewal_count >= 5, "renewals: {}", info.renewal_count);

    r1.stop_heartbeat("sync");
    assert!(!r1.heartbeat_running("sync"));
    r1.release_lock("sync")?;
    Ok(())
}

#[test]
fn test_heartbeat_stops_itself_when_lock_is_lost() -> Result<()> {
    let (store, _dir) = shared_store()?;
    let r1 = runner(store.clone());

    assert!(r1.acquire_lock("sync", None)?);
    r1.start_heartbeat("sync");
    assert!(r1.heartbeat_running("sync"));

    // The record disappears out from under the task (another runner's
    // cleanup, manual intervention, ...)
    store.delete("locks", "sync")?;

    // The next renewal returns false and the task exits on its own
    thread::sleep(Duration::from_millis(100));
    assert!(!r1.heartbeat_running("sync"));
    Ok(())
}

#[test]
fn test_acquire_idempotence_under_running_heartbeat() -> Result<()> {
    let (store, _dir) = shared_store()?;
    let r1 = runner(store);

    assert!(r1.acquire_lock("sync", None)?);
    let first = r1.get_lock_info("sync")?.unwrap();
    r1.start_heartbeat("sync");
    thread::sleep(Duration::from_millis(50));

    // Re-acquire while holding: success, and acquired_at is unchanged
    assert!(r1.acquire_lock("sync", None)?);
    let second = r1.get_lock_info("sync")?.unwrap();
    assert_eq!(first.acquired_at, second.acquired_at);

    r1.stop_heartbeat("sync");
    Ok(())
}

#[test]
fn test_release_all_my_locks_stops_heartbeats() -> Result<()> {
    let (store, _dir) = shared_store()?;
    let r1 = runner(store.clone());
    let r2 = runner(store);

    r1.acquire_lock("sync", None)?;
    r1.acquire_lock("purge", None)?;
    r1.start_heartbeat("sync");
    r2.acquire_lock("export", None)?;

    assert_eq!(r1.release_all_my_locks()?, 2);
    assert!(!r1.heartbeat_running("sync"));
    assert!(!r1.is_lock_held("sync")?);
    assert!(!r1.is_lock_held("purge")?);
    assert!(r2.is_lock_held_by_me("export")?);
    Ok(())
}

#[test]
fn test_cleanup_stale_locks_across_runners() -> Result<()> {
    let (store, _dir) = shared_store()?;
    let r1 = runner(store.clone());
    let r2 = runner(store);

    r1.acquire_lock("sync", None)?;
    thread::sleep(Duration::from_millis(150));
    r2.acquire_lock("fresh", None)?;

    // R2 sweeps everyone's stale records, not just its own
    assert_eq!(r2.cleanup_stale_locks()?, 1);
    assert!(!r2.is_lock_held("sync")?);
    assert!(r2.is_lock_held("fresh")?);

    let remaining = r2.get_all_locks()?;
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].lock_name, "fresh");
    Ok(())
}

#[test]
fn test_lock_metadata_captured_at_acquisition() -> Result<()> {
    let (store, _dir) = shared_store()?;
    let r1 = runner(store);

    let mut metadata = std::collections::HashMap::new();
    metadata.insert("host".to_string(), "bedside-tablet".to_string());
    assert!(r1.acquire_lock("sync", Some(metadata))?);

    let info = r1.get_lock_info("sync")?.unwrap();
    assert_eq!(info.metadata.get("host").unwrap(), "bedside-tablet");
    assert!(info.metadata.contains_key("pid"));
    Ok(())
}

#[test]
fn test_runner_identity_survives_restart() -> Result<()> {
    let dir = TempDir::new()?;

    let first = {
        let store = FileStore::new(dir.path())?;
        RunnerIdentity::load_or_create(&store, RUNNER_METADATA_CONTAINER)?
    };

    // Same directory, "restarted process": identity is reloaded
    let store = FileStore::new(dir.path())?;
    let second = RunnerIdentity::load_or_create(&store, RUNNER_METADATA_CONTAINER)?;
    assert_eq!(first, second);
    Ok(())
}
