#![forbid(unsafe_code)]

mod common;

use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use common::{author, author_id, eventually, request, result_for, Author, AuthorNamesFactory, Recorder};
use shake_core::sync::lock;
use shake_core::{
    ClientError, DataInfo, EntityId, EntityIdSet, EntityStoreSnapshot, OperationResult, OperationResultDataFactory,
    OperationResultDataInfo, ShakeError,
};
use shake_store::{CachePolicy, EntityStore, EntityUpdate, OperationStore, OperationUpdate, OperationUpdateKind};

type Shared = Arc<OperationResult<String>>;

fn stores() -> (Arc<EntityStore>, OperationStore) {
    let entities = Arc::new(EntityStore::new());
    let operations = OperationStore::new(Arc::clone(&entities)).unwrap();
    (entities, operations)
}

fn data(r: &Shared) -> String {
    r.data().cloned().unwrap_or_default()
}

#[tokio::test]
async fn entity_change_republishes_rebuilt_result() {
    let (entities, operations) = stores();
    let factory = Arc::new(AuthorNamesFactory::default());
    let req = request("GetAuthor");

    let v1 = entities
        .update(|s| {
            s.set_entity(author_id(1), author("X"))?;
            Ok::<_, ShakeError>(s.version())
        })
        .unwrap();

    let rec = Arc::new(Recorder::<Shared>::default());
    let _sub = operations.watch::<String>(&req).unwrap().subscribe(rec.clone()).unwrap();
    operations.set(&req, result_for("X", &[author_id(1)], v1, factory.clone())).unwrap();

    entities.update(|s| s.set_entity(author_id(1), author("Y"))).unwrap();

    assert!(eventually(|| rec.len() == 2).await);
    let seen: Vec<String> = lock(&rec.values).iter().map(data).collect();
    assert_eq!(seen, vec!["X", "Y"]);
    let last = operations.try_get::<String>(&req).unwrap();
    assert_eq!(data(&last), "Y");
    assert_eq!(last.data_info().map(|i| i.version()), Some(v1 + 1));
    assert_eq!(*lock(&factory.calls), 1);
}

#[tokio::test]
async fn only_overlapping_updates_trigger_recompute() {
    let (entities, operations) = stores();
    let factory = Arc::new(AuthorNamesFactory::default());
    let req = request("GetAuthors");

    entities
        .update(|s| {
            s.set_entity(author_id(1), author("A"))?;
            s.set_entity(author_id(2), author("B"))?;
            s.set_entity(author_id(3), author("C"))
        })
        .unwrap();
    operations.set(&req, result_for("A,B", &[author_id(1), author_id(2)], 1, factory.clone())).unwrap();

    let rec = Arc::new(Recorder::<OperationUpdate>::default());
    let _sub = operations.watch_all().unwrap().subscribe(rec.clone());

    entities.update(|s| s.set_entity(author_id(3), author("C2"))).unwrap();
    entities.update(|s| s.set_entity(EntityId::new("Book", 1), 1u32)).unwrap();
    // a marker update that does overlap, so we know the earlier ones were processed
    entities.update(|s| s.set_entity(author_id(2), author("B2"))).unwrap();

    assert!(eventually(|| rec.len() == 1).await);
    assert_eq!(*lock(&factory.calls), 1);
    assert_eq!(data(&operations.try_get::<String>(&req).unwrap()), "A,B2");
    let update = lock(&rec.values)[0].clone();
    assert_eq!(update.kind(), OperationUpdateKind::Updated);
    assert_eq!(update.operations()[0].version(), 4);
}

#[tokio::test]
async fn stale_or_equal_versions_never_recompute() {
    let (entities, operations) = stores();
    let factory = Arc::new(AuthorNamesFactory::default());
    let req = request("GetAuthor");
    // result claims to be built at version 3; updates 1..=3 must not touch it
    operations.set(&req, result_for("X", &[author_id(1)], 3, factory.clone())).unwrap();

    for name in ["A", "B", "C"] {
        entities.update(|s| s.set_entity(author_id(1), author(name))).unwrap();
    }
    entities.update(|s| s.set_entity(author_id(1), author("D"))).unwrap();

    let ops = &operations;
    assert!(eventually(|| ops.try_get::<String>(&req).map(|r| data(&r)) == Some("D".to_string())).await);
    assert_eq!(*lock(&factory.calls), 1);
}

#[tokio::test]
async fn error_only_results_stay_put() {
    let (entities, operations) = stores();
    let factory = Arc::new(AuthorNamesFactory::default());
    let req = request("Broken");
    let failed = Arc::new(OperationResult::<String>::new(None, None, factory.clone()));
    operations.set(&req, failed).unwrap();
    entities.update(|s| s.set_entity(author_id(1), author("A"))).unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(*lock(&factory.calls), 0);
    assert!(operations.try_get::<String>(&req).unwrap().data().is_none());
}

#[tokio::test]
async fn try_get_misses_are_not_errors() {
    let (_entities, operations) = stores();
    let factory = Arc::new(AuthorNamesFactory::default());
    let req = request("GetAuthor");
    assert!(operations.try_get::<String>(&req).is_none());

    // watching alone creates an empty entry
    let _sub = operations.watch::<String>(&req).unwrap().subscribe_fn(|_| {}).unwrap();
    assert!(operations.contains(&req));
    assert!(operations.try_get::<String>(&req).is_none());

    operations.set(&req, result_for("X", &[], 0, factory)).unwrap();
    assert!(operations.try_get::<String>(&req).is_some());
    assert!(operations.try_get::<u32>(&req).is_none());
}

#[tokio::test]
async fn result_type_is_fixed_per_request() {
    let (_entities, operations) = stores();
    let req = request("GetAuthor");
    operations.set(&req, result_for("X", &[], 0, Arc::new(AuthorNamesFactory::default()))).unwrap();
    let other = operations.watch::<u32>(&req).unwrap().subscribe_fn(|_| {});
    assert!(matches!(other, Err(ShakeError::ResultTypeMismatch { .. })));
}

#[tokio::test]
async fn remove_and_clear_complete_subscribers() {
    let (_entities, operations) = stores();
    let a = request("A");
    let b = request("B");
    let rec_a = Arc::new(Recorder::<Shared>::default());
    let rec_b = Arc::new(Recorder::<Shared>::default());
    let _sa = operations.watch::<String>(&a).unwrap().subscribe(rec_a.clone()).unwrap();
    let _sb = operations.watch::<String>(&b).unwrap().subscribe(rec_b.clone()).unwrap();

    assert!(operations.remove(&a));
    assert!(!operations.remove(&a));
    assert_eq!(rec_a.completed(), 1);
    assert_eq!(operations.len(), 1);

    operations.clear();
    assert_eq!(rec_b.completed(), 1);
    assert!(operations.is_empty());
}

#[tokio::test]
async fn disposed_store_rejects_calls() {
    let (_entities, operations) = stores();
    let req = request("GetAuthor");
    let rec = Arc::new(Recorder::<Shared>::default());
    let _sub = operations.watch::<String>(&req).unwrap().subscribe(rec.clone()).unwrap();
    operations.dispose();
    operations.dispose();
    assert_eq!(rec.completed(), 1);
    let res = operations.set(&req, result_for("X", &[], 0, Arc::new(AuthorNamesFactory::default())));
    assert!(matches!(res, Err(ShakeError::Disposed(_))));
    assert!(matches!(operations.watch::<String>(&req), Err(ShakeError::Disposed(_))));
}

#[tokio::test]
async fn no_cache_evicts_unsubscribed_operations() {
    let (_entities, operations) = stores();
    let _sweeper = CachePolicy::NoCache.attach(&operations).unwrap();
    let factory = Arc::new(AuthorNamesFactory::default());

    let watched = request("Watched");
    let _sub = operations.watch::<String>(&watched).unwrap().subscribe_fn(|_| {}).unwrap();
    operations.set(&watched, result_for("X", &[], 0, factory.clone())).unwrap();

    let unwatched = request("Unwatched");
    operations.set(&unwatched, result_for("X", &[], 0, factory)).unwrap();

    assert!(operations.contains(&watched));
    assert!(!operations.contains(&unwatched));
}

#[tokio::test(start_paused = true)]
async fn ttl_policy_keeps_fresh_entries_and_evicts_stale_ones() {
    let (_entities, operations) = stores();
    let ttl = Duration::from_secs(60);
    let _sweeper = CachePolicy::Default { time_to_live: ttl }.attach(&operations).unwrap();
    let factory = Arc::new(AuthorNamesFactory::default());

    let old = request("Old");
    operations.set(&old, result_for("X", &[], 0, factory.clone())).unwrap();

    // inside the throttle window nothing is scanned
    tokio::time::advance(Duration::from_secs(30)).await;
    operations.set(&request("Tick1"), result_for("X", &[], 0, factory.clone())).unwrap();
    assert!(operations.contains(&old));

    // past the ttl the next update sweeps; fresh entries survive
    tokio::time::advance(Duration::from_secs(31)).await;
    let fresh = request("Fresh");
    operations.set(&fresh, result_for("X", &[], 0, factory.clone())).unwrap();
    assert!(!operations.contains(&old));
    assert!(operations.contains(&fresh));
    // Tick1 is only 31s old
    assert!(operations.contains(&request("Tick1")));

    // subscribed entries are never evicted
    let kept = request("Kept");
    let _sub = operations.watch::<String>(&kept).unwrap().subscribe_fn(|_| {}).unwrap();
    tokio::time::advance(Duration::from_secs(61)).await;
    operations.set(&request("Tick2"), result_for("X", &[], 0, factory)).unwrap();
    assert!(operations.contains(&kept));
    assert!(!operations.contains(&fresh));
}

#[tokio::test]
async fn snapshot_reads_during_recompute_use_latest_entities() {
    let (entities, operations) = stores();
    let factory = Arc::new(AuthorNamesFactory::default());
    let req = request("GetAuthor");
    entities.update(|s| s.set_entity(author_id(1), author("A"))).unwrap();
    operations.set(&req, result_for("A", &[author_id(1)], 1, factory)).unwrap();

    entities.update(|s| s.set_entity(author_id(1), author("B"))).unwrap();
    entities.update(|s| s.set_entity(author_id(1), author("C"))).unwrap();

    let ops = &operations;
    assert!(eventually(|| ops.try_get::<String>(&req).map(|r| data(&r)) == Some("C".to_string())).await);
    let snap = entities.current_snapshot();
    assert_eq!(snap.get_entity::<Author>(&author_id(1)).as_deref(), Some(&author("C")));
}

/// Factory that reports each call and then blocks until released.
struct GatedFactory {
    started: Mutex<mpsc::Sender<()>>,
    release: Mutex<mpsc::Receiver<()>>,
}

impl OperationResultDataFactory<String> for GatedFactory {
    fn create(&self, info: &dyn OperationResultDataInfo, snapshot: &EntityStoreSnapshot) -> anyhow::Result<String> {
        let _ = lock(&self.started).send(());
        lock(&self.release).recv()?;
        let names: Vec<String> =
            snapshot.get_entities_by_ids::<Author>(info.entity_ids().iter()).iter().map(|a| a.name.clone()).collect();
        Ok(format!("rebuilt:{}", names.join(",")))
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn rebuild_racing_a_newer_set_keeps_the_newer_result() {
    let (entities, operations) = stores();
    let (started_tx, started_rx) = mpsc::channel();
    let (release_tx, release_rx) = mpsc::channel();
    let factory = Arc::new(GatedFactory { started: Mutex::new(started_tx), release: Mutex::new(release_rx) });
    let req = request("GetAuthor");
    let ids: EntityIdSet = [author_id(1)].into_iter().collect();

    entities.update(|s| s.set_entity(author_id(1), author("X"))).unwrap();
    let info: Arc<dyn OperationResultDataInfo> = Arc::new(DataInfo::new(ids.clone(), 1, ()));
    operations
        .set(&req, Arc::new(OperationResult::new(Some("X".to_string()), Some(info), factory.clone())))
        .unwrap();

    // observe entity updates after the operation store has handled them
    let seen = Arc::new(Recorder::<EntityUpdate>::default());
    let _watch = entities.watch().unwrap().subscribe(seen.clone());

    entities.update(|s| s.set_entity(author_id(1), author("Z"))).unwrap();
    started_rx.recv_timeout(Duration::from_secs(2)).unwrap();

    let info: Arc<dyn OperationResultDataInfo> = Arc::new(DataInfo::new(ids, 3, ()));
    let fresh = OperationResult::new(Some("FRESH".to_string()), Some(info), factory.clone())
        .with_errors(vec![ClientError::new("fresh-partial")]);
    operations.set(&req, Arc::new(fresh)).unwrap();

    release_tx.send(()).unwrap();
    assert!(eventually(|| lock(&seen.values).iter().any(|u| u.version() == 2)).await);

    let last = operations.try_get::<String>(&req).unwrap();
    assert_eq!(data(&last), "FRESH");
    assert_eq!(last.data_info().map(|i| i.version()), Some(3));
    assert_eq!(last.errors().len(), 1);
    assert_eq!(last.errors()[0].message, "fresh-partial");
}

#[tokio::test]
async fn subscribe_racing_dispose_always_completes() {
    for _ in 0..50 {
        let (_entities, operations) = stores();
        let accepted = Mutex::new(Vec::new());
        std::thread::scope(|scope| {
            for worker in 0..4 {
                let (operations, accepted) = (&operations, &accepted);
                scope.spawn(move || {
                    for n in 0..25 {
                        let rec = Arc::new(Recorder::<Shared>::default());
                        let req = request(&format!("Op{worker}_{n}"));
                        if let Ok(sub) = operations.watch::<String>(&req).and_then(|w| w.subscribe(rec.clone())) {
                            lock(accepted).push((rec, sub));
                        }
                    }
                });
            }
            scope.spawn(|| operations.dispose());
        });

        assert!(operations.is_empty());
        for (rec, _sub) in lock(&accepted).iter() {
            assert_eq!(rec.completed(), 1);
        }
    }
}
