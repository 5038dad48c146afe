mod support;

use std::sync::Arc;
use std::time::Duration;

use photocache_core::TrackedKey;
use photocache_engine::{Scheduler, SchedulerSettings, ShutdownOutcome};
use support::{harness, serve_entity, FakeTransport};
use tempfile::TempDir;

fn settings(shutdown_grace: Duration) -> SchedulerSettings {
    SchedulerSettings {
        normal_interval: Duration::from_secs(600),
        busy_interval: Duration::from_millis(20),
        shutdown_grace,
    }
}

#[tokio::test]
async fn overlapping_tick_is_skipped() {
    let root = TempDir::new().unwrap();
    let transport = Arc::new(FakeTransport::with_delay(Duration::from_millis(100)));
    serve_entity(&transport, "101", 1);
    let h = harness(root.path(), transport, vec![TrackedKey::new("kite", "101")]);
    let scheduler = Scheduler::new(Arc::new(h.cache), settings(Duration::from_secs(1)));

    let (first, second) = tokio::join!(scheduler.run_tick(), scheduler.run_tick());

    let report = first.expect("first tick runs").unwrap();
    assert_eq!(report.tick, 1);
    assert!(second.is_none());
    // Only one tick ran; the next one gets number 2.
    let report = scheduler.run_tick().await.unwrap().unwrap();
    assert_eq!(report.tick, 2);
}

#[tokio::test]
async fn delay_accelerates_while_work_is_pending() {
    let root = TempDir::new().unwrap();
    let transport = Arc::new(FakeTransport::new());
    serve_entity(&transport, "101", 1);
    let h = harness(root.path(), transport, vec![TrackedKey::new("kite", "101")]);
    let scheduler = Scheduler::new(Arc::new(h.cache), settings(Duration::from_secs(1)));
    assert_eq!(scheduler.next_delay(), Duration::from_secs(600));

    scheduler.run_tick().await.unwrap().unwrap();
    assert_eq!(scheduler.next_delay(), Duration::from_millis(20));

    while scheduler.cache().has_pending_work() {
        scheduler.run_tick().await.unwrap().unwrap();
    }
    scheduler.run_tick().await.unwrap().unwrap();
    assert_eq!(scheduler.next_delay(), Duration::from_secs(600));
}

#[tokio::test]
async fn spawned_loop_finishes_pipeline_and_shuts_down_cleanly() {
    let root = TempDir::new().unwrap();
    let transport = Arc::new(FakeTransport::new());
    serve_entity(&transport, "101", 2);
    let h = harness(root.path(), transport, vec![TrackedKey::new("kite", "101")]);
    let cache = Arc::new(h.cache);
    let handle = Arc::new(Scheduler::new(cache.clone(), settings(Duration::from_secs(5)))).spawn();

    let finished = tokio::time::timeout(Duration::from_secs(5), async {
        while cache.entries().is_empty() || cache.has_pending_work() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await;
    assert!(finished.is_ok(), "loop did not complete the pipeline");
    assert_eq!(cache.sub_items_for_key("kite").len(), 2);

    handle.request_tick();
    assert_eq!(handle.shutdown().await, ShutdownOutcome::Clean);
}

#[tokio::test]
async fn slow_tick_is_aborted_after_grace_period() {
    let root = TempDir::new().unwrap();
    let transport = Arc::new(FakeTransport::with_delay(Duration::from_secs(30)));
    serve_entity(&transport, "101", 1);
    let h = harness(
        root.path(),
        transport.clone(),
        vec![TrackedKey::new("kite", "101")],
    );
    let handle = Arc::new(Scheduler::new(
        Arc::new(h.cache),
        settings(Duration::from_millis(50)),
    ))
    .spawn();

    // Wait until the first tick is inside its drain.
    while transport.gets().is_empty() {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    assert_eq!(handle.shutdown().await, ShutdownOutcome::TimedOut);
}
