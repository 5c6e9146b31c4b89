//! Concurrent workers sharing one store: no double claims, and never two
//! processing items for the same resource.

use std::collections::HashSet;
use std::sync::Arc;

use workclaim::clock::SystemClock;
use workclaim::engine::{Claimer, StepTracker};
use workclaim::model::work::{NewWorkItem, OwnerId, ResourceId, Step, WorkFilter, WorkId};
use workclaim::store::{MemoryStore, WorkStore};

/// Snapshot the processing set inside a transaction and check that no
/// resource appears twice.
async fn assert_one_processing_per_resource(store: &MemoryStore) {
    let mut tx = store.begin().await.unwrap();
    let processing = tx
        .find(
            &WorkFilter::new().step(Step::Processing).including_removed(),
            None,
        )
        .await
        .unwrap();
    tx.commit().await.unwrap();

    let mut seen = HashSet::new();
    for work in processing {
        assert!(
            seen.insert(work.resource_id),
            "two processing items for resource {}",
            work.resource_id
        );
    }
}

async fn concurrent_takes(workers: usize, items: i64) -> Vec<Option<WorkId>> {
    let store = Arc::new(MemoryStore::new());
    for resource in 0..items {
        store
            .create(NewWorkItem::new(ResourceId(resource), 1))
            .await
            .unwrap();
    }
    let claimer = Claimer::new(store.clone(), Arc::new(SystemClock));

    let mut handles = Vec::new();
    for i in 0..workers {
        let claimer = claimer.clone();
        handles.push(tokio::spawn(async move {
            claimer
                .take(&OwnerId::new(format!("worker-{i}")))
                .await
                .unwrap()
                .map(|w| w.id)
        }));
    }

    let mut results = Vec::new();
    for handle in handles {
        results.push(handle.await.unwrap());
    }
    results
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_takes_claim_distinct_items_when_work_is_plentiful() {
    let results = concurrent_takes(5, 8).await;

    let claimed: Vec<WorkId> = results.into_iter().flatten().collect();
    assert_eq!(claimed.len(), 5);
    let distinct: HashSet<_> = claimed.iter().collect();
    assert_eq!(distinct.len(), 5, "an item was claimed twice");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_takes_claim_every_item_when_workers_outnumber_work() {
    let results = concurrent_takes(8, 5).await;

    let empty = results.iter().filter(|r| r.is_none()).count();
    let claimed: HashSet<WorkId> = results.into_iter().flatten().collect();
    assert_eq!(claimed.len(), 5);
    assert_eq!(empty, 3);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn workers_never_process_one_resource_twice_at_once() {
    let store = Arc::new(MemoryStore::new());
    for seq in 1..=5 {
        for resource in 1..=3 {
            store
                .create(NewWorkItem::new(ResourceId(resource), seq))
                .await
                .unwrap();
        }
    }
    let claimer = Claimer::new(store.clone(), Arc::new(SystemClock));
    let tracker = StepTracker::new(store.clone());

    let mut handles = Vec::new();
    for i in 0..6 {
        let store = Arc::clone(&store);
        let claimer = claimer.clone();
        let tracker = tracker.clone();
        handles.push(tokio::spawn(async move {
            let owner = OwnerId::new(format!("worker-{i}"));
            let mut finished = 0usize;
            loop {
                match claimer.take(&owner).await.unwrap() {
                    Some(work) => {
                        assert_one_processing_per_resource(&store).await;
                        tokio::task::yield_now().await;
                        tracker
                            .advance_by_id(work.id, Step::Done)
                            .await
                            .unwrap()
                            .expect("claimed item should advance");
                        finished += 1;
                    }
                    None => {
                        let pending = store
                            .list(&WorkFilter::new().step(Step::Scheduled), Some(1))
                            .await
                            .unwrap();
                        if pending.is_empty() {
                            break;
                        }
                        tokio::task::yield_now().await;
                    }
                }
            }
            finished
        }));
    }

    let mut total = 0;
    for handle in handles {
        total += handle.await.unwrap();
    }
    assert_eq!(total, 15);

    let done = store
        .list(&WorkFilter::new().step(Step::Done), None)
        .await
        .unwrap();
    assert_eq!(done.len(), 15);
}
