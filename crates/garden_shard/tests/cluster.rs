//! End-to-end tests: one coordinator driving several executor tasks.

use garden_shard::rpc::Link;
use garden_shard::{
    CoordinatorConfig, DocumentStore, DurableStore, ExecutorConfig, Filter, Interaction, PeerId,
    PlantRecord, Point, SeedRegistry, SeedSpec, ShardCoordinator, ShardExecutor, ShutdownState,
    WorkerId,
};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

struct Worker {
    executor: JoinHandle<()>,
    reader: JoinHandle<()>,
}

struct Cluster {
    coordinator: ShardCoordinator,
    store: Arc<DocumentStore>,
    shutdown: ShutdownState,
    workers: HashMap<WorkerId, Worker>,
}

fn seeds() -> Arc<SeedRegistry> {
    let specs = [
        // slow: never ticks during a test
        SeedSpec::new("oak", 4, 4_000_000, 0.0, 3),
        // quick: fully grown ~100ms after planting
        SeedSpec::new("cress", 2, 100, 0.0, 5),
        // doomed: always damaged, dead two ticks later
        SeedSpec::new("ghost", 1, 20, 1.0, 1),
    ];
    Arc::new(SeedRegistry::from_specs(specs).unwrap())
}

fn plant(x: i64, y: i64, seed: i64) -> PlantRecord {
    PlantRecord { x, y, seed, stage: 0, dmg: false, last: 0 }
}

async fn start(workers: u32, stored: Vec<PlantRecord>) -> Cluster {
    let store = Arc::new(DocumentStore::in_memory());
    store.ensure_unique_index(&["x", "y"]).await.unwrap();
    store
        .insert(stored.iter().map(PlantRecord::to_document).collect())
        .await
        .unwrap();

    let shutdown = ShutdownState::new();
    let coordinator = ShardCoordinator::new(store.clone(), CoordinatorConfig::default(), shutdown.clone());
    let config = ExecutorConfig {
        min_step_ms: 10,
        flush_on_exit: true,
    };

    let mut handles = HashMap::new();
    for id in 1..=workers {
        let worker = WorkerId(id);
        let (primary_side, worker_side) = Link::pair(PeerId::Primary, PeerId::Worker(worker));
        let (to_primary, inbox) = worker_side.split();

        let executor = ShardExecutor::new(worker, seeds(), to_primary, config.clone())
            .spawn(inbox, shutdown.clone());
        let reader = coordinator.attach_worker(worker, primary_side);
        handles.insert(worker, Worker { executor, reader });
    }

    coordinator.load_and_distribute().await.unwrap();
    Cluster {
        coordinator,
        store,
        shutdown,
        workers: handles,
    }
}

#[tokio::test]
async fn test_crashed_worker_plants_are_reassigned() {
    let stored: Vec<PlantRecord> = (0..30).map(|i| plant(i, -i, 0)).collect();
    let mut cluster = start(3, stored).await;

    for id in 1..=3 {
        assert_eq!(cluster.coordinator.owned_by(WorkerId(id)).await, 10);
    }

    let crashed = cluster.workers.remove(&WorkerId(2)).unwrap();
    crashed.executor.abort();
    crashed.reader.await.unwrap();

    assert_eq!(cluster.coordinator.worker_ids(), vec![WorkerId(1), WorkerId(3)]);
    assert_eq!(cluster.coordinator.owned_by(WorkerId(2)).await, 0);
    assert_eq!(cluster.coordinator.plant_count().await, 30);
    assert_eq!(
        cluster.coordinator.owned_by(WorkerId(1)).await + cluster.coordinator.owned_by(WorkerId(3)).await,
        30
    );
    for i in 0..30 {
        assert!(cluster.coordinator.has_plant(Point::new(i, -i)).await);
    }
}

#[tokio::test]
async fn test_plants_grow_and_are_harvested() {
    let cluster = start(2, vec![plant(0, 0, 1), plant(1, 0, 0)]).await;

    // freshly planted: still growing
    assert_eq!(cluster.coordinator.interact(Point::new(1, 0)).await.unwrap(), None);

    tokio::time::sleep(Duration::from_millis(400)).await;
    match cluster.coordinator.interact(Point::new(0, 0)).await.unwrap() {
        Some(Interaction::Drop(amount)) => assert!((1..=5).contains(&amount)),
        other => panic!("unexpected interaction: {other:?}"),
    }

    assert!(!cluster.coordinator.has_plant(Point::new(0, 0)).await);
    assert!(cluster.store.find(&Filter::at(0, 0)).await.unwrap().is_empty());
    assert_eq!(cluster.coordinator.interact(Point::new(0, 0)).await.unwrap(), None);
}

#[tokio::test]
async fn test_dead_plants_are_forgotten() {
    let cluster = start(2, vec![plant(5, 5, 2), plant(6, 6, 0)]).await;
    assert!(cluster.coordinator.has_plant(Point::new(5, 5)).await);

    tokio::time::sleep(Duration::from_millis(400)).await;

    assert!(!cluster.coordinator.has_plant(Point::new(5, 5)).await);
    assert!(cluster.store.find(&Filter::at(5, 5)).await.unwrap().is_empty());
    assert!(cluster.coordinator.has_plant(Point::new(6, 6)).await);
    assert_eq!(cluster.store.len().await, 1);
}

#[tokio::test]
async fn test_shutdown_persists_every_partition() {
    let stored: Vec<PlantRecord> = (0..12).map(|i| plant(i, i, 0)).collect();
    let cluster = start(3, stored).await;
    cluster.coordinator.add_plant(plant(100, 100, 0)).await.unwrap();

    cluster.shutdown.initiate_shutdown();
    for (_, worker) in cluster.workers {
        worker.executor.await.unwrap();
        worker.reader.await.unwrap();
    }

    // orphans are not reassigned while shutting down
    assert_eq!(cluster.coordinator.plant_count().await, 0);

    let stored = cluster.store.find(&Filter::All).await.unwrap();
    assert_eq!(stored.len(), 13);
    assert_eq!(cluster.store.find(&Filter::at(100, 100)).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_periodic_flush_snapshots_workers() {
    let cluster = start(2, vec![plant(0, 0, 1)]).await;

    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(cluster.coordinator.flush_from_workers().await.unwrap(), 1);

    let stored = cluster.store.find(&Filter::at(0, 0)).await.unwrap();
    assert_eq!(stored[0].get("stage").and_then(|v| v.as_i64()), Some(2));
}
