//! Shard coordinator: the primary-side owner of the plant world.
//!
//! The coordinator holds the durable store and the [`OwnershipMap`]. It
//! hands persisted plants out to workers, routes client calls to the worker
//! owning the target point, reclaims a dead worker's plants and
//! periodically snapshots every partition back into the store.
//!
//! Ownership is best effort. Assignment and reclamation race with worker
//! exits, so a plant may briefly be owned twice or not at all; the
//! reconciliation pass ([`ShardCoordinator::reconcile`]) repairs the
//! latter and the flush dedupes the former.
//!
//! Calls to one worker are coalesced per call name, so a reply may belong
//! to somebody else's request. Ownership is therefore only ever claimed for
//! points that were both sent and acknowledged, and only released on a
//! worker's own `remove_plant`.
//!
//! The ownership lock is never held across an RPC await.

pub mod assign;
pub mod ownership;

use crate::error::{CoordinatorError, RpcError};
use crate::executor::Interaction;
use crate::plant::PlantRecord;
use crate::rpc::{Call, Link, Peer, RpcEndpoint};
use crate::shutdown::ShutdownState;
use crate::store::{Document, DurableStore, Filter};
use crate::types::{PeerId, Point, WorkerId};
use assign::{plan_rounds, round_robin, DEFAULT_BATCH_LIMIT};
use dashmap::DashMap;
use futures::future::join_all;
use serde_json::Value;
use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

pub use ownership::OwnershipMap;

/// Passes over plants no worker took before giving up on them.
const ASSIGN_ATTEMPTS: usize = 3;

#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    /// Largest batch sent in one assignment call
    pub batch_limit: usize,
    /// Period of the snapshot-and-persist job
    pub flush_interval: Duration,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            batch_limit: DEFAULT_BATCH_LIMIT,
            flush_interval: Duration::from_secs(300),
        }
    }
}

/// Cheaply cloneable handle to the coordinator.
#[derive(Clone)]
pub struct ShardCoordinator {
    inner: Arc<Inner>,
}

struct Inner {
    store: Arc<dyn DurableStore>,
    ownership: RwLock<OwnershipMap>,
    workers: DashMap<WorkerId, Peer>,
    endpoint: RpcEndpoint,
    config: CoordinatorConfig,
    shutdown: ShutdownState,
    /// Round-robin position for externally added plants
    cursor: AtomicUsize,
    /// Serializes distribution and reconciliation passes
    reconcile_lock: Mutex<()>,
}

impl ShardCoordinator {
    pub fn new(store: Arc<dyn DurableStore>, config: CoordinatorConfig, shutdown: ShutdownState) -> Self {
        Self {
            inner: Arc::new(Inner {
                store,
                ownership: RwLock::new(OwnershipMap::new()),
                workers: DashMap::new(),
                endpoint: RpcEndpoint::new(PeerId::Primary),
                config,
                shutdown,
                cursor: AtomicUsize::new(0),
                reconcile_lock: Mutex::new(()),
            }),
        }
    }

    pub fn store(&self) -> &Arc<dyn DurableStore> {
        &self.inner.store
    }

    pub fn shutdown_state(&self) -> &ShutdownState {
        &self.inner.shutdown
    }

    /// Connects a worker and starts reading its frames.
    ///
    /// The returned task ends when the worker's side of the link closes,
    /// after its plants have been reclaimed.
    pub fn attach_worker(&self, worker: WorkerId, link: Link) -> JoinHandle<()> {
        let (peer, mut inbox) = link.split();
        self.inner.workers.insert(worker, peer);
        info!("🔗 {worker} attached");

        let coordinator = self.clone();
        tokio::spawn(async move {
            while let Some(frame) = inbox.recv().await {
                coordinator.handle_frame(worker, &frame).await;
            }
            coordinator.on_worker_exit(worker).await;
        })
    }

    /// Drops the link to `worker`. Its executor stops once it notices, and
    /// its plants are reclaimed when its side of the link closes.
    pub fn disconnect(&self, worker: WorkerId) -> bool {
        let removed = self.inner.workers.remove(&worker).is_some();
        if removed {
            warn!("✂️ Disconnecting {worker}");
        }
        removed
    }

    /// Live workers, in id order.
    pub fn worker_ids(&self) -> Vec<WorkerId> {
        let mut ids: Vec<WorkerId> = self.inner.workers.iter().map(|entry| *entry.key()).collect();
        ids.sort();
        ids
    }

    pub async fn owner_of(&self, point: Point) -> Option<WorkerId> {
        self.inner.ownership.read().await.owner(point)
    }

    /// Whether a live worker owns a plant at `point`. Answered locally.
    pub async fn has_plant(&self, point: Point) -> bool {
        self.inner.ownership.read().await.is_owned(point)
    }

    /// Number of owned plants.
    pub async fn plant_count(&self) -> usize {
        self.inner.ownership.read().await.len()
    }

    pub async fn owned_by(&self, worker: WorkerId) -> usize {
        self.inner.ownership.read().await.owned_by(worker)
    }

    /// Loads every persisted plant and spreads it over the live workers,
    /// replacing whatever partitions they held.
    pub async fn load_and_distribute(&self) -> Result<usize, CoordinatorError> {
        let _pass = self.inner.reconcile_lock.lock().await;
        let started = Instant::now();

        let mut docs = self.inner.store.find(&Filter::All).await?;
        docs.sort_by_key(doc_point);

        let workers = self.worker_ids().len();
        info!("📦 Distributing {} plants over {} workers", docs.len(), workers);
        let accepted = self
            .assign(docs.into_iter().map(Value::Object).collect(), true)
            .await;

        debug!("load_and_distribute took {:?}", started.elapsed());
        Ok(accepted)
    }

    /// Reassigns every persisted plant that no live worker owns.
    pub async fn reconcile(&self) -> Result<usize, CoordinatorError> {
        let _pass = self.inner.reconcile_lock.lock().await;
        if self.inner.shutdown.is_shutdown_initiated() {
            return Ok(0);
        }

        let docs = self.inner.store.find(&Filter::All).await?;
        let orphans: Vec<Value> = {
            let ownership = self.inner.ownership.read().await;
            docs.into_iter()
                .filter(|doc| doc_point(doc).is_some_and(|p| !ownership.is_owned(p)))
                .map(Value::Object)
                .collect()
        };

        if orphans.is_empty() {
            return Ok(0);
        }

        info!("♻️ Reassigning {} orphaned plants", orphans.len());
        Ok(self.assign(orphans, false).await)
    }

    /// Sends `plants` round-robin in bounded batches and records what each
    /// worker accepted. A worker failing its call is disconnected.
    ///
    /// Plants that come back unaccepted (rejected, sent to a worker that
    /// failed, or lost to a coalesced call) are dealt again over the
    /// remaining workers, up to [`ASSIGN_ATTEMPTS`] passes. With `init` the
    /// first pass clears every live partition, even ones that get nothing.
    async fn assign(&self, plants: Vec<Value>, init: bool) -> usize {
        let mut pending = plants;
        let mut init = init;
        let mut total = 0;

        for attempt in 1..=ASSIGN_ATTEMPTS {
            if pending.is_empty() && !init {
                break;
            }
            let workers = self.worker_ids();
            if workers.is_empty() {
                break;
            }
            if attempt > 1 {
                debug!("Retrying {} plants no worker took (pass {attempt})", pending.len());
            }

            let (accepted, missed) = self.assign_pass(pending, &workers, init).await;
            total += accepted;
            pending = missed;
            init = false;
        }

        if !pending.is_empty() {
            warn!("⚠️ {} plants stay unassigned", pending.len());
        }
        total
    }

    async fn assign_pass(&self, plants: Vec<Value>, workers: &[WorkerId], init: bool) -> (usize, Vec<Value>) {
        let mut rounds = plan_rounds(plants, workers.len(), self.inner.config.batch_limit);
        if init {
            if rounds.is_empty() {
                rounds.push(Vec::new());
            }
            rounds[0].resize_with(workers.len(), Vec::new);
        }

        let mut accepted = 0;
        let mut missed = Vec::new();

        for (index, round) in rounds.into_iter().enumerate() {
            let calls = round.into_iter().zip(workers.iter().copied()).map(|(batch, worker)| {
                let call = if init && index == 0 {
                    Call::InitPlants(batch.clone())
                } else {
                    Call::AddPlants(batch.clone())
                };
                async move { (worker, batch, self.call_for_points(worker, call).await) }
            });

            for (worker, batch, result) in join_all(calls).await {
                let points: HashSet<Point> = match result {
                    Ok(points) => points.into_iter().collect(),
                    Err(e) => {
                        error!("❌ Failed to assign plants to {worker}: {e}");
                        self.disconnect(worker);
                        HashSet::new()
                    }
                };

                let (taken, rest): (Vec<Value>, Vec<Value>) = batch
                    .into_iter()
                    .partition(|plant| value_point(plant).is_some_and(|p| points.contains(&p)));

                accepted += taken.len();
                self.inner
                    .ownership
                    .write()
                    .await
                    .claim_all(taken.iter().filter_map(value_point), worker);
                missed.extend(rest.into_iter().filter(|plant| value_point(plant).is_some()));
            }
        }

        (accepted, missed)
    }

    /// Routes an interaction to the owning worker.
    ///
    /// Returns `Ok(None)` when there is nothing to interact with: no owner,
    /// a growing plant, or a worker that went away mid-call. A harvest is
    /// settled by the worker's own `remove_plant`, which names the point it
    /// actually emptied.
    pub async fn interact(&self, point: Point) -> Result<Option<Interaction>, CoordinatorError> {
        let Some(worker) = self.owner_of(point).await else {
            return Ok(None);
        };

        let value = match self.call_worker(worker, Call::Interact(point)).await {
            Ok(value) => value,
            Err(RpcError::Handler(reason)) => {
                debug!("Interaction on {point} refused by {worker}: {reason}");
                return Ok(None);
            }
            Err(RpcError::Disconnected(_)) => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let interaction: Interaction = serde_json::from_value(value).map_err(RpcError::from)?;
        Ok(Some(interaction))
    }

    /// Adds plants on behalf of a client.
    ///
    /// Points that are already owned are skipped. The rest are dealt
    /// round-robin over live workers; whatever a worker accepts is owned by
    /// it and persisted right away.
    pub async fn add_plants(&self, records: Vec<PlantRecord>) -> Result<Vec<Point>, CoordinatorError> {
        let workers = self.worker_ids();
        if workers.is_empty() {
            warn!("⚠️ No live workers; rejecting {} plants", records.len());
            return Ok(Vec::new());
        }

        let fresh: Vec<PlantRecord> = {
            let ownership = self.inner.ownership.read().await;
            let mut seen = HashSet::new();
            records
                .into_iter()
                .filter(|record| {
                    let point = record.point();
                    let free = !ownership.is_owned(point) && seen.insert(point);
                    if !free {
                        debug!("Space {point} is already taken");
                    }
                    free
                })
                .collect()
        };

        let start = self.inner.cursor.fetch_add(fresh.len(), Ordering::Relaxed);
        let mut dealt = workers.clone();
        dealt.rotate_left(start % workers.len());

        let calls = dealt
            .into_iter()
            .zip(round_robin(fresh, workers.len()))
            .filter(|(_, group)| !group.is_empty())
            .map(|(worker, group)| async move {
                let call = Call::AddPlants(group.iter().map(PlantRecord::to_value).collect());
                let result = self.call_for_points(worker, call).await;
                (worker, group, result)
            });

        let mut accepted = Vec::new();
        let mut docs: Vec<Document> = Vec::new();
        for (worker, group, result) in join_all(calls).await {
            let points: HashSet<Point> = match result {
                Ok(points) => points.into_iter().collect(),
                Err(e) => {
                    error!("❌ Failed to add plants on {worker}: {e}");
                    continue;
                }
            };

            let mut ownership = self.inner.ownership.write().await;
            for record in group.into_iter().filter(|r| points.contains(&r.point())) {
                ownership.claim(record.point(), worker);
                accepted.push(record.point());
                docs.push(record.to_document());
            }
        }

        if !docs.is_empty() {
            let keys = accepted.iter().map(|p| Filter::at(p.x, p.y)).collect();
            self.inner.store.remove(&Filter::or(keys), true).await?;
            self.inner.store.insert(docs).await?;
        }
        Ok(accepted)
    }

    pub async fn add_plant(&self, record: PlantRecord) -> Result<bool, CoordinatorError> {
        Ok(self.add_plants(vec![record]).await?.len() == 1)
    }

    /// Replaces the store's contents with a snapshot of every live
    /// partition.
    ///
    /// The cycle is skipped if any worker fails to answer, so a partial
    /// snapshot never overwrites the store. A reported plant is kept only if
    /// the reporting worker still owns it; one harvested or dead since the
    /// snapshot is dropped. Persisted plants that nobody owns yet are
    /// carried over until they are reassigned.
    pub async fn flush_from_workers(&self) -> Result<usize, CoordinatorError> {
        let started = Instant::now();
        let workers = self.worker_ids();

        let calls = workers.iter().copied().map(|worker| async move {
            let result = self
                .call_worker(worker, Call::GetAllPlants)
                .await
                .and_then(|value| Ok(serde_json::from_value::<Vec<PlantRecord>>(value)?));
            (worker, result)
        });

        let mut snapshots = Vec::with_capacity(workers.len());
        for (worker, result) in join_all(calls).await {
            match result {
                Ok(records) => snapshots.push((worker, records)),
                Err(e) => {
                    warn!("⚠️ Skipping flush, {worker} did not answer: {e}");
                    return Ok(0);
                }
            }
        }

        let stored = self.inner.store.find(&Filter::All).await?;
        let merged: BTreeMap<Point, Document> = {
            let ownership = self.inner.ownership.read().await;
            let mut merged = BTreeMap::new();
            for (worker, records) in snapshots {
                for record in records {
                    let point = record.point();
                    if ownership.owner(point) != Some(worker) {
                        continue;
                    }
                    merged.entry(point).or_insert_with(|| record.to_document());
                }
            }
            for doc in stored {
                if let Some(point) = doc_point(&doc) {
                    if !ownership.is_owned(point) {
                        merged.entry(point).or_insert(doc);
                    }
                }
            }
            merged
        };

        let count = self
            .inner
            .store
            .replace_all(merged.into_values().collect())
            .await?;

        debug!("flush_from_workers took {:?}", started.elapsed());
        Ok(count)
    }

    /// Runs [`Self::flush_from_workers`] every `flush_interval` until
    /// shutdown, then reassigns whatever is still orphaned.
    pub fn spawn_flush_job(&self) -> JoinHandle<()> {
        let coordinator = self.clone();
        tokio::spawn(async move {
            let interval = coordinator.inner.config.flush_interval;
            loop {
                tokio::select! {
                    _ = tokio::time::sleep(interval) => {}
                    _ = coordinator.inner.shutdown.wait() => break,
                }

                match coordinator.flush_from_workers().await {
                    Ok(count) => info!("💾 Flushed {count} plants to storage"),
                    Err(e) => error!("❌ Periodic flush failed: {e}"),
                }

                match coordinator.reconcile().await {
                    Ok(0) => {}
                    Ok(count) => info!("♻️ Reassigned {count} orphaned plants"),
                    Err(e) => error!("❌ Periodic reconciliation failed: {e}"),
                }
            }
            debug!("Flush job stopped");
        })
    }

    async fn handle_frame(&self, worker: WorkerId, frame: &str) {
        let Some(incoming) = self.inner.endpoint.accept(PeerId::Worker(worker), frame) else {
            return;
        };

        let outcome = match incoming.call {
            Ok(Call::RemovePlant(point)) => self.handle_remove(worker, point).await,
            Ok(Call::PostAllPlants(records)) => self.handle_post(worker, records).await,
            Ok(other) => Err(RpcError::NotRegistered(other.name().to_string()).into()),
            Err(e) => Err(e.into()),
        };

        let outcome = outcome.map(|_| Value::Null).map_err(|e| match e {
            CoordinatorError::Rpc(e) => e,
            other => RpcError::Handler(other.to_string()),
        });
        if let Err(e) = &outcome {
            warn!("❌ Request {} from {worker} failed: {e}", incoming.name);
        }

        let Some(peer) = self.peer(worker) else {
            return;
        };
        if let Err(e) = self
            .inner
            .endpoint
            .respond(&peer, &incoming.name, incoming.silent, outcome)
        {
            warn!("❌ Failed to reply to {worker}: {e}");
        }
    }

    async fn handle_remove(&self, worker: WorkerId, point: Point) -> Result<(), CoordinatorError> {
        let released = self
            .inner
            .ownership
            .write()
            .await
            .release_if_owner(point, worker);

        if released {
            self.inner
                .store
                .remove(&Filter::at(point.x, point.y), false)
                .await?;
            debug!("🗑️ {worker} removed plant on {point}");
        } else {
            debug!("Ignoring removal of {point}: not owned by {worker}");
        }
        Ok(())
    }

    /// Takes a worker's full partition as authoritative for that worker.
    async fn handle_post(&self, worker: WorkerId, records: Vec<PlantRecord>) -> Result<(), CoordinatorError> {
        let live = self.inner.workers.contains_key(&worker);

        let (released, posted) = {
            let mut ownership = self.inner.ownership.write().await;
            let released = ownership.reclaim(worker);

            let posted: Vec<PlantRecord> = records
                .into_iter()
                .filter(|record| match ownership.owner(record.point()) {
                    Some(other) => {
                        warn!("⚠️ {worker} posted {} owned by {other}", record.point());
                        false
                    }
                    None => true,
                })
                .collect();

            if live {
                ownership.claim_all(posted.iter().map(PlantRecord::point), worker);
            }
            (released, posted)
        };

        let keys: Vec<Filter> = released
            .iter()
            .copied()
            .chain(posted.iter().map(PlantRecord::point))
            .map(|p| Filter::at(p.x, p.y))
            .collect();
        if !keys.is_empty() {
            self.inner.store.remove(&Filter::or(keys), true).await?;
        }

        let count = posted.len();
        self.inner
            .store
            .insert(posted.iter().map(PlantRecord::to_document).collect())
            .await?;
        info!("📥 Stored {count} plants posted by {worker}");

        if !self.inner.shutdown.is_shutdown_initiated() {
            // Reconciling may call this worker again, so it cannot run on
            // the task that reads its frames.
            let coordinator = self.clone();
            tokio::spawn(async move {
                if let Err(e) = coordinator.reconcile().await {
                    error!("❌ Reconciliation failed: {e}");
                }
            });
        }
        Ok(())
    }

    async fn on_worker_exit(&self, worker: WorkerId) {
        self.inner.workers.remove(&worker);
        let rejected = self.inner.endpoint.fail_peer(PeerId::Worker(worker));
        let reclaimed = self.inner.ownership.write().await.reclaim(worker);
        warn!(
            "💀 {worker} exited; released {} plants and {rejected} pending calls",
            reclaimed.len()
        );

        if self.inner.shutdown.is_shutdown_initiated() {
            return;
        }
        match self.reconcile().await {
            Ok(count) => info!("✅ Reassigned {count} plants after {worker} exited"),
            Err(e) => error!("❌ Reconciliation after {worker} exited failed: {e}"),
        }
    }

    fn peer(&self, worker: WorkerId) -> Option<Peer> {
        self.inner.workers.get(&worker).map(|peer| peer.clone())
    }

    async fn call_worker(&self, worker: WorkerId, call: Call) -> Result<Value, RpcError> {
        let peer = self
            .peer(worker)
            .ok_or_else(|| RpcError::Disconnected(worker.to_string()))?;
        self.inner.endpoint.call(&peer, call).await
    }

    async fn call_for_points(&self, worker: WorkerId, call: Call) -> Result<Vec<Point>, RpcError> {
        let value = self.call_worker(worker, call).await?;
        Ok(serde_json::from_value(value)?)
    }
}

fn doc_point(doc: &Document) -> Option<Point> {
    let x = doc.get("x")?.as_i64()?;
    let y = doc.get("y")?.as_i64()?;
    Some(Point::new(x, y))
}

fn value_point(plant: &Value) -> Option<Point> {
    PlantRecord::from_value(plant, 0).ok().map(|record| record.point())
}
