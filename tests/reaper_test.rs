//! Reaper cleanup and recovery against the in-memory store.

use std::sync::Arc;
use std::time::Duration;

use chrono::Duration as TimeDelta;
use workclaim::clock::{Clock, ManualClock};
use workclaim::engine::{Claimer, Reaper, ReaperConfig, StepTracker, SweepReport};
use workclaim::error::Error;
use workclaim::model::work::{NewWorkItem, OwnerId, ResourceId, Step, WorkFilter, WorkItem};
use workclaim::store::{MemoryStore, WorkStore};

struct Harness {
    store: Arc<MemoryStore>,
    clock: Arc<ManualClock>,
    claimer: Claimer,
    tracker: StepTracker,
    reaper: Reaper,
}

fn harness(config: ReaperConfig) -> Harness {
    let store = Arc::new(MemoryStore::new());
    let clock = Arc::new(ManualClock::default());
    Harness {
        claimer: Claimer::new(store.clone(), clock.clone()),
        tracker: StepTracker::new(store.clone()),
        reaper: Reaper::new(store.clone(), clock.clone(), config),
        store,
        clock,
    }
}

impl Harness {
    async fn submit_and_take(&self, resource: i64, seq: i64) -> WorkItem {
        self.store
            .create(NewWorkItem::new(ResourceId(resource), seq))
            .await
            .unwrap();
        self.claimer
            .take(&OwnerId::new("worker-1"))
            .await
            .unwrap()
            .expect("should claim the submitted item")
    }
}

#[tokio::test]
async fn recovery_respects_the_cutoff() {
    let h = harness(ReaperConfig::default());
    let t = h.clock.now();
    let claimed = h.submit_and_take(1, 1).await;
    assert_eq!(claimed.taken_at, Some(t));

    let recovered = h
        .reaper
        .find_unfinished_work(t - TimeDelta::seconds(1))
        .await
        .unwrap();
    assert!(recovered.is_empty());
    let still = h.store.find_by_id(claimed.id).await.unwrap().unwrap();
    assert_eq!(still.step, Step::Processing);

    let recovered = h
        .reaper
        .find_unfinished_work(t + TimeDelta::seconds(1))
        .await
        .unwrap();
    assert_eq!(recovered.len(), 1);
    assert_eq!(recovered[0].id, claimed.id);
    assert_eq!(recovered[0].step, Step::Error);

    let stored = h.store.find_by_id(claimed.id).await.unwrap().unwrap();
    assert_eq!(stored.step, Step::Error);
    assert_eq!(stored.owner_id, claimed.owner_id);
}

#[tokio::test]
async fn recovery_releases_the_resource() {
    let h = harness(ReaperConfig::default());
    let first = h.submit_and_take(2, 1).await;
    h.store
        .create(NewWorkItem::new(ResourceId(2), 2))
        .await
        .unwrap();
    assert!(h.claimer.take(&OwnerId::new("worker-2")).await.unwrap().is_none());

    h.clock.advance(TimeDelta::seconds(5));
    let recovered = h.reaper.find_unfinished_work(h.clock.now()).await.unwrap();
    assert_eq!(recovered.len(), 1);
    assert_eq!(recovered[0].id, first.id);

    let next = h
        .claimer
        .take(&OwnerId::new("worker-2"))
        .await
        .unwrap()
        .expect("resource should be free after recovery");
    assert_eq!(next.resource_id, ResourceId(2));
    assert_eq!(next.sequence_number, 2);
}

#[tokio::test]
async fn late_report_after_recovery_is_a_no_op() {
    let h = harness(ReaperConfig::default());
    let claimed = h.submit_and_take(3, 1).await;

    h.clock.advance(TimeDelta::seconds(1));
    h.reaper.find_unfinished_work(h.clock.now()).await.unwrap();

    let late = h.tracker.advance_by_id(claimed.id, Step::Done).await.unwrap();
    assert!(late.is_none());
    let stored = h.store.find_by_id(claimed.id).await.unwrap().unwrap();
    assert_eq!(stored.step, Step::Error);
}

#[tokio::test]
async fn cleanup_deletes_only_old_done_work_and_is_idempotent() {
    let h = harness(ReaperConfig::default());
    let done = h.submit_and_take(4, 1).await;
    h.tracker.advance_by_id(done.id, Step::Done).await.unwrap();
    let failed = h.submit_and_take(5, 1).await;
    h.tracker.advance_by_id(failed.id, Step::Error).await.unwrap();
    let running = h.submit_and_take(6, 1).await;
    let waiting = h
        .store
        .create(NewWorkItem::new(ResourceId(7), 1))
        .await
        .unwrap();

    let cutoff = h.clock.now() + TimeDelta::seconds(1);
    assert_eq!(h.reaper.delete_finished_work(cutoff).await.unwrap(), 1);
    assert_eq!(h.reaper.delete_finished_work(cutoff).await.unwrap(), 0);

    assert!(h.store.find_by_id(done.id).await.unwrap().is_none());
    for id in [failed.id, running.id, waiting.id] {
        assert!(h.store.find_by_id(id).await.unwrap().is_some());
    }
}

#[tokio::test]
async fn cleanup_keeps_recent_done_work() {
    let h = harness(ReaperConfig::default());
    let done = h.submit_and_take(8, 1).await;
    h.tracker.advance_by_id(done.id, Step::Done).await.unwrap();

    let cutoff = h.clock.now() - TimeDelta::seconds(1);
    assert_eq!(h.reaper.delete_finished_work(cutoff).await.unwrap(), 0);
    assert!(h.store.find_by_id(done.id).await.unwrap().is_some());
}

#[tokio::test]
async fn cleanup_includes_removed_done_work() {
    let h = harness(ReaperConfig::default());
    let done = h.submit_and_take(9, 1).await;
    h.tracker.advance_by_id(done.id, Step::Done).await.unwrap();
    assert!(h.store.remove(done.id).await.unwrap());

    let cutoff = h.clock.now() + TimeDelta::seconds(1);
    assert_eq!(h.reaper.delete_finished_work(cutoff).await.unwrap(), 1);
    assert!(h.store.is_empty().await);
}

#[tokio::test]
async fn sweep_derives_cutoffs_from_the_clock() {
    let h = harness(ReaperConfig {
        retention: Duration::from_secs(3600),
        staleness: Duration::from_secs(600),
        interval: Duration::from_secs(300),
    });
    let done = h.submit_and_take(10, 1).await;
    h.tracker.advance_by_id(done.id, Step::Done).await.unwrap();
    let running = h.submit_and_take(11, 1).await;

    h.clock.advance(TimeDelta::seconds(599));
    assert_eq!(h.reaper.sweep().await.unwrap(), SweepReport::default());

    h.clock.advance(TimeDelta::seconds(2));
    let report = h.reaper.sweep().await.unwrap();
    assert_eq!(report.expunged, 0);
    assert_eq!(report.recovered, 1);
    let stored = h.store.find_by_id(running.id).await.unwrap().unwrap();
    assert_eq!(stored.step, Step::Error);

    h.clock.advance(TimeDelta::seconds(3000));
    let report = h.reaper.sweep().await.unwrap();
    assert_eq!(report.expunged, 1);
    assert_eq!(report.recovered, 0);
    assert!(h.store.find_by_id(done.id).await.unwrap().is_none());
}

#[tokio::test]
async fn run_sweeps_until_shutdown() {
    let h = harness(ReaperConfig {
        interval: Duration::from_millis(10),
        ..ReaperConfig::default()
    });
    let claimed = h.submit_and_take(12, 1).await;
    h.clock.advance(TimeDelta::seconds(3600));

    let reaper = h.reaper.clone();
    let handle = tokio::spawn(async move { reaper.run().await });

    let mut recovered = false;
    for _ in 0..100 {
        tokio::time::sleep(Duration::from_millis(10)).await;
        let stored = h.store.find_by_id(claimed.id).await.unwrap().unwrap();
        if stored.step == Step::Error {
            recovered = true;
            break;
        }
    }
    assert!(recovered, "reaper loop never recovered the stale item");

    h.reaper.shutdown();
    handle.await.unwrap().unwrap();

    let errors = h
        .store
        .list(&WorkFilter::new().step(Step::Error), None)
        .await
        .unwrap();
    assert_eq!(errors.len(), 1);
}

#[tokio::test]
async fn shutdown_before_run_returns_immediately() {
    let h = harness(ReaperConfig::default());
    h.reaper.shutdown();
    tokio::time::timeout(Duration::from_secs(5), h.reaper.run())
        .await
        .expect("run should observe the pending shutdown")
        .unwrap();
}

#[tokio::test]
async fn sweep_rejects_windows_beyond_the_date_range() {
    let h = harness(ReaperConfig {
        retention: Duration::from_secs(10_000_000_000_000),
        ..ReaperConfig::default()
    });
    let claimed = h.submit_and_take(13, 1).await;
    h.clock.advance(TimeDelta::seconds(3600));

    let err = h.reaper.sweep().await.unwrap_err();
    assert!(matches!(err, Error::Config(_)), "unexpected error: {err}");

    // Nothing was touched: the bad window fails before any pass runs.
    let stored = h.store.find_by_id(claimed.id).await.unwrap().unwrap();
    assert_eq!(stored.step, Step::Processing);
}

#[tokio::test]
async fn run_survives_failing_sweeps() {
    let h = harness(ReaperConfig {
        staleness: Duration::from_secs(10_000_000_000_000),
        interval: Duration::from_millis(5),
        ..ReaperConfig::default()
    });

    let reaper = h.reaper.clone();
    let handle = tokio::spawn(async move { reaper.run().await });
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!handle.is_finished(), "run returned after a failed sweep");

    h.reaper.shutdown();
    tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .expect("run should stop on shutdown")
        .unwrap()
        .unwrap();
}

#[tokio::test]
async fn shutdown_stops_every_running_clone() {
    let h = harness(ReaperConfig {
        interval: Duration::from_secs(3600),
        ..ReaperConfig::default()
    });

    let handles: Vec<_> = (0..3)
        .map(|_| {
            let reaper = h.reaper.clone();
            tokio::spawn(async move { reaper.run().await })
        })
        .collect();
    tokio::time::sleep(Duration::from_millis(20)).await;

    h.reaper.shutdown();
    for handle in handles {
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("every loop should observe the shutdown")
            .unwrap()
            .unwrap();
    }

    // A loop started after shutdown returns straight away too.
    tokio::time::timeout(Duration::from_secs(5), h.reaper.clone().run())
        .await
        .expect("late loop should see the shutdown")
        .unwrap();
}
