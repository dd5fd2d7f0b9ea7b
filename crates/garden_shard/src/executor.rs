//! Shard executor: the worker-side owner of a plant partition.
//!
//! An executor runs as a single tokio task. It owns its [`Table`] of plants
//! and its [`Scheduler`], so every mutation of the partition is serialized
//! by that task and needs no locking. It reacts to three things:
//!
//! * frames from the primary, answered through its [`RpcEndpoint`]
//! * the scheduler's single armed wake-up, which ticks due plants
//! * shutdown, which flushes the partition to the primary and stops

use crate::clock::Clock;
use crate::error::{RpcError, ValidationError};
use crate::plant::{Growth, Plant, PlantRecord};
use crate::rpc::{Call, Peer, RpcEndpoint};
use crate::scheduler::{Scheduler, DEFAULT_MIN_STEP_MS};
use crate::seed::SeedRegistry;
use crate::shutdown::ShutdownState;
use crate::table::Table;
use crate::types::{Millis, PeerId, Point, WorkerId};
use rand::rngs::StdRng;
use rand::{RngCore, SeedableRng};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace, warn};

#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// Scheduler step: the minimum distance between two wake-ups
    pub min_step_ms: Millis,
    /// Post the partition to the primary when shutdown is initiated
    pub flush_on_exit: bool,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            min_step_ms: DEFAULT_MIN_STEP_MS,
            flush_on_exit: true,
        }
    }
}

/// Result of a successful interaction with a plant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Interaction {
    /// The plant was harvested and yielded this many items.
    Drop(u32),
    /// The plant was damaged and is now healthy again.
    Healed,
}

pub struct ShardExecutor {
    worker: WorkerId,
    plants: Table<Plant>,
    scheduler: Scheduler<Point>,
    seeds: Arc<SeedRegistry>,
    clock: Clock,
    rng: Box<dyn RngCore + Send>,
    primary: Peer,
    endpoint: RpcEndpoint,
    config: ExecutorConfig,
}

impl ShardExecutor {
    /// Creates an executor that reports to `primary`.
    pub fn new(worker: WorkerId, seeds: Arc<SeedRegistry>, primary: Peer, config: ExecutorConfig) -> Self {
        Self {
            worker,
            plants: Table::new(),
            scheduler: Scheduler::new(format!("growth@{worker}"), config.min_step_ms),
            seeds,
            clock: Clock::new(),
            rng: Box::new(StdRng::from_entropy()),
            primary,
            endpoint: RpcEndpoint::new(PeerId::Worker(worker)),
            config,
        }
    }

    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_rng<R: RngCore + Send + 'static>(mut self, rng: R) -> Self {
        self.rng = Box::new(rng);
        self
    }

    pub fn worker(&self) -> WorkerId {
        self.worker
    }

    pub fn plant(&self, point: Point) -> Option<&Plant> {
        self.plants.get(point.x, point.y)
    }

    pub fn plant_count(&self) -> usize {
        self.plants.len()
    }

    pub fn scheduler(&self) -> &Scheduler<Point> {
        &self.scheduler
    }

    /// Validates and indexes every candidate, skipping the bad ones.
    ///
    /// # Returns
    ///
    /// The points of the plants that were accepted.
    pub fn add_plants(&mut self, candidates: Vec<Value>) -> Vec<Point> {
        let started = Instant::now();
        let now = self.clock.now_ms();
        let mut accepted = Vec::with_capacity(candidates.len());

        for candidate in &candidates {
            let added = PlantRecord::from_value(candidate, now)
                .and_then(|record| Plant::from_record(&record, &self.seeds))
                .and_then(|plant| self.add_plant(plant, now));

            match added {
                Ok(point) => accepted.push(point),
                Err(e) => warn!(worker = %self.worker, "⚠️ Rejected plant: {e}"),
            }
        }

        debug!(
            worker = %self.worker,
            received = candidates.len(),
            accepted = accepted.len(),
            "add_plants took {:?}",
            started.elapsed()
        );
        accepted
    }

    /// Clears the partition, then adds `candidates`.
    pub fn init_plants(&mut self, candidates: Vec<Value>) -> Vec<Point> {
        self.plants.clear();
        self.add_plants(candidates)
    }

    /// Indexes a single plant and schedules its next tick.
    pub fn add_plant(&mut self, mut plant: Plant, now: Millis) -> Result<Point, ValidationError> {
        let point = plant.point();
        if self.plants.has(point.x, point.y) {
            return Err(ValidationError::Occupied(point));
        }

        if !plant.is_finished() {
            let due = plant.next_due(now);
            plant.due = due;
            self.scheduler.add(due, point);
        }

        trace!(worker = %self.worker, "🌱 {plant} added");
        self.plants.set(point.x, point.y, plant);
        Ok(point)
    }

    pub fn get_all_plants(&self) -> Vec<PlantRecord> {
        self.plants.get_all().map(Plant::to_record).collect()
    }

    pub fn has_plant(&self, point: Point) -> bool {
        self.plants.has(point.x, point.y)
    }

    /// Harvests a grown plant or heals a damaged one.
    ///
    /// A harvest tells the primary which point was emptied with a silent
    /// `remove_plant`, sent ahead of the reply.
    pub fn interact(&mut self, point: Point) -> Result<Interaction, ValidationError> {
        let plant = self
            .plants
            .get_mut(point.x, point.y)
            .ok_or(ValidationError::NoPlant(point))?;

        if plant.is_finished() {
            let amount = plant.seed().random_drop(self.rng.as_mut());
            debug!(worker = %self.worker, "🧺 Harvested {plant} for {amount}");
            self.plants.remove(point.x, point.y);
            if let Err(e) = self.endpoint.notify(&self.primary, Call::RemovePlant(point)) {
                warn!(worker = %self.worker, "❌ Failed to report harvest of {point}: {e}");
            }
            return Ok(Interaction::Drop(amount));
        }

        if plant.heal() {
            debug!(worker = %self.worker, "🩹 Healed {plant}");
            return Ok(Interaction::Healed);
        }

        Err(ValidationError::Growing(point))
    }

    /// Ticks every plant whose deadline has passed.
    ///
    /// Stale deadlines (the plant is gone, or was replaced by one due later)
    /// are skipped. Dead plants are removed and reported to the primary.
    pub fn run_due(&mut self) -> usize {
        let now = self.clock.now_ms();
        let Self {
            worker,
            plants,
            scheduler,
            rng,
            primary,
            endpoint,
            ..
        } = self;

        scheduler.tick(now, |points, follow_ups| {
            let mut failure = None;

            for point in points {
                let Some(plant) = plants.get_mut(point.x, point.y) else {
                    continue;
                };
                if plant.due > now || plant.is_finished() {
                    continue;
                }

                let growth = if plant.is_dead() {
                    Growth::Dead
                } else {
                    plant.tick(now, rng.as_mut())
                };

                match growth {
                    Growth::Pending => {
                        let due = now.saturating_add(plant.seed().per_stage());
                        plant.due = due;
                        follow_ups.push((due, point));
                    }
                    Growth::Grown => debug!(worker = %worker, "🌾 {plant} is fully grown"),
                    Growth::Dead => {
                        debug!(worker = %worker, "🥀 {plant} died");
                        plants.remove(point.x, point.y);
                        if let Err(e) = endpoint.notify(primary, Call::RemovePlant(point)) {
                            failure.get_or_insert(e);
                        }
                    }
                }
            }

            failure.map_or(Ok(()), Err)
        })
    }

    /// Serves one request from the primary.
    pub fn dispatch(&mut self, call: Call) -> Result<Value, RpcError> {
        match call {
            Call::AddPlants(candidates) => Ok(serde_json::to_value(self.add_plants(candidates))?),
            Call::InitPlants(candidates) => Ok(serde_json::to_value(self.init_plants(candidates))?),
            Call::GetAllPlants => Ok(serde_json::to_value(self.get_all_plants())?),
            Call::HasPlant(point) => Ok(Value::Bool(self.has_plant(point))),
            Call::Interact(point) => {
                let interaction = self
                    .interact(point)
                    .map_err(|e| RpcError::Handler(e.to_string()))?;
                Ok(serde_json::to_value(interaction)?)
            }
            other @ (Call::RemovePlant(_) | Call::PostAllPlants(_)) => {
                Err(RpcError::NotRegistered(other.name().to_string()))
            }
        }
    }

    /// Posts the whole partition to the primary.
    pub fn flush(&self) -> Result<usize, RpcError> {
        let records = self.get_all_plants();
        let count = records.len();
        self.endpoint
            .notify(&self.primary, Call::PostAllPlants(records))?;
        info!(worker = %self.worker, plants = count, "📤 Posted partition to primary");
        Ok(count)
    }

    /// Time of the next scheduled wake-up.
    pub fn next_wakeup(&self) -> Option<Millis> {
        self.scheduler.next_wakeup()
    }

    pub fn handle_frame(&mut self, frame: &str) {
        let Some(incoming) = self.endpoint.accept(PeerId::Primary, frame) else {
            return;
        };

        let outcome = incoming.call.and_then(|call| self.dispatch(call));
        if let Err(e) = &outcome {
            warn!(worker = %self.worker, call = %incoming.name, "❌ Request failed: {e}");
        }

        if let Err(e) = self
            .endpoint
            .respond(&self.primary, &incoming.name, incoming.silent, outcome)
        {
            warn!(worker = %self.worker, call = %incoming.name, "❌ Failed to reply: {e}");
        }
    }

    /// Runs the executor until shutdown or until the primary hangs up.
    ///
    /// # Arguments
    ///
    /// * `inbox` - Frames sent by the primary
    /// * `shutdown` - Shared shutdown state; initiating it flushes the
    ///   partition (if configured) and stops the task
    pub fn spawn(mut self, mut inbox: UnboundedReceiver<String>, shutdown: ShutdownState) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!(worker = %self.worker, "🚀 Shard executor started");

            loop {
                let deadline = self.scheduler.deadline(&self.clock);

                tokio::select! {
                    frame = inbox.recv() => match frame {
                        Some(frame) => self.handle_frame(&frame),
                        None => {
                            info!(worker = %self.worker, "🔌 Primary link closed");
                            break;
                        }
                    },
                    _ = sleep_until(deadline) => {
                        self.run_due();
                    }
                    _ = shutdown.wait() => {
                        if self.config.flush_on_exit {
                            if let Err(e) = self.flush() {
                                error!(worker = %self.worker, "❌ Failed to post partition: {e}");
                            }
                        }
                        break;
                    }
                }
            }

            info!(worker = %self.worker, plants = self.plants.len(), "🛑 Shard executor stopped");
        })
    }
}

async fn sleep_until(deadline: Option<tokio::time::Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rpc::{CallName, Envelope, Link, Request};
    use crate::seed::SeedSpec;
    use rand::rngs::mock::StepRng;
    use serde_json::json;
    use std::time::Duration;

    const WORKER: WorkerId = WorkerId(1);

    fn registry() -> Arc<SeedRegistry> {
        let mut registry = SeedRegistry::new();
        registry.register(SeedSpec::new("test", 4, 2_000, 0.0, 10)).unwrap();
        registry.register(SeedSpec::new("fragile", 2, 200, 1.0, 1)).unwrap();
        Arc::new(registry)
    }

    fn executor() -> (ShardExecutor, UnboundedReceiver<String>) {
        let (worker_side, primary_side) = Link::pair(PeerId::Worker(WORKER), PeerId::Primary);
        let (_, primary_inbox) = primary_side.split();
        let config = ExecutorConfig {
            min_step_ms: 100,
            flush_on_exit: true,
        };
        let executor = ShardExecutor::new(WORKER, registry(), worker_side.peer().clone(), config)
            .with_clock(Clock::starting_at(0))
            .with_rng(StdRng::seed_from_u64(7));
        (executor, primary_inbox)
    }

    fn requests(inbox: &mut UnboundedReceiver<String>) -> Vec<Request> {
        let mut requests = Vec::new();
        while let Ok(frame) = inbox.try_recv() {
            if let Ok(Envelope::Rpc(request)) = Envelope::decode(&frame) {
                requests.push(request);
            }
        }
        requests
    }

    #[tokio::test(start_paused = true)]
    async fn test_plant_grows_and_is_harvested() {
        let (mut executor, mut inbox) = executor();
        let accepted = executor.add_plants(vec![json!({"x": 0, "y": 0, "seed": 0, "stage": 0})]);
        assert_eq!(accepted, vec![Point::new(0, 0)]);
        assert_eq!(executor.next_wakeup(), Some(500));

        for expected in 1..=4 {
            tokio::time::advance(Duration::from_millis(500)).await;
            executor.run_due();
            assert_eq!(executor.plant(Point::new(0, 0)).unwrap().stage(), expected);
        }
        assert!(executor.plant(Point::new(0, 0)).unwrap().is_finished());
        assert_eq!(executor.next_wakeup(), None);

        match executor.interact(Point::new(0, 0)) {
            Ok(Interaction::Drop(amount)) => assert!((1..=10).contains(&amount)),
            other => panic!("unexpected interaction: {other:?}"),
        }
        assert!(!executor.has_plant(Point::new(0, 0)));

        let sent = requests(&mut inbox);
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].name, CallName::RemovePlant.as_str());
        assert_eq!(sent[0].args, vec![json!(0), json!(0)]);
        assert!(sent[0].silent);
    }

    #[tokio::test(start_paused = true)]
    async fn test_decay_removes_plant_and_notifies_primary() {
        let (executor, mut inbox) = executor();
        let mut executor = executor.with_rng(StepRng::new(0, 0));
        executor.add_plants(vec![json!({"x": 3, "y": 4, "seed": 1, "stage": 0})]);

        // damaged, then -1, then -2 (dead)
        for _ in 0..3 {
            tokio::time::advance(Duration::from_millis(100)).await;
            executor.run_due();
        }

        assert!(!executor.has_plant(Point::new(3, 4)));
        let sent = requests(&mut inbox);
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].name, CallName::RemovePlant.as_str());
        assert_eq!(sent[0].args, vec![json!(3), json!(4)]);
        assert!(sent[0].silent);
    }

    #[tokio::test(start_paused = true)]
    async fn test_interact_heals_damaged_and_rejects_growing() {
        let (mut executor, _inbox) = executor();
        executor.add_plants(vec![
            json!({"x": 1, "y": 1, "seed": 0, "stage": 1, "dmg": true}),
            json!({"x": 2, "y": 2, "seed": 0, "stage": 1}),
        ]);

        assert_eq!(executor.interact(Point::new(1, 1)), Ok(Interaction::Healed));
        assert!(!executor.plant(Point::new(1, 1)).unwrap().damaged());
        assert_eq!(
            executor.interact(Point::new(2, 2)),
            Err(ValidationError::Growing(Point::new(2, 2)))
        );
        assert_eq!(
            executor.interact(Point::new(9, 9)),
            Err(ValidationError::NoPlant(Point::new(9, 9)))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_add_rejects_occupied_and_invalid() {
        let (mut executor, _inbox) = executor();
        let accepted = executor.add_plants(vec![
            json!({"x": 1, "y": 1, "seed": 0, "stage": 0}),
            json!({"x": 1, "y": 1, "seed": 0, "stage": 2}),
            json!({"x": 2, "y": 1, "seed": 42, "stage": 0}),
            json!({"x": "left", "y": 1, "seed": 0, "stage": 0}),
            json!("garbage"),
        ]);

        assert_eq!(accepted, vec![Point::new(1, 1)]);
        assert_eq!(executor.plant(Point::new(1, 1)).unwrap().stage(), 0);
        assert_eq!(executor.plant_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_init_replaces_partition() {
        let (mut executor, _inbox) = executor();
        executor.add_plants(vec![json!({"x": 1, "y": 1, "seed": 0, "stage": 0})]);
        executor.init_plants(vec![json!({"x": 5, "y": 5, "seed": 0, "stage": 4})]);

        assert!(!executor.has_plant(Point::new(1, 1)));
        assert!(executor.plant(Point::new(5, 5)).unwrap().is_finished());

        // the stale deadline for [1:1] is a no-op
        tokio::time::advance(Duration::from_millis(1_000)).await;
        executor.run_due();
        assert_eq!(executor.plant_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_deadline_does_not_tick_replacement() {
        let (mut executor, _inbox) = executor();
        executor.add_plants(vec![json!({"x": 0, "y": 0, "seed": 0, "stage": 1, "dmg": true})]);
        assert_eq!(executor.interact(Point::new(0, 0)), Ok(Interaction::Healed));
        executor.init_plants(vec![]);

        tokio::time::advance(Duration::from_millis(300)).await;
        executor.add_plants(vec![json!({"x": 0, "y": 0, "seed": 0, "stage": 1})]);

        // The old deadline at 500 fires, but the replacement is due at 800.
        tokio::time::advance(Duration::from_millis(200)).await;
        executor.run_due();
        assert_eq!(executor.plant(Point::new(0, 0)).unwrap().stage(), 1);

        tokio::time::advance(Duration::from_millis(300)).await;
        executor.run_due();
        assert_eq!(executor.plant(Point::new(0, 0)).unwrap().stage(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dispatch_rejects_primary_only_calls() {
        let (mut executor, _inbox) = executor();
        assert_eq!(
            executor.dispatch(Call::RemovePlant(Point::new(0, 0))),
            Err(RpcError::NotRegistered("remove_plant".into()))
        );
        assert_eq!(
            executor.dispatch(Call::HasPlant(Point::new(0, 0))),
            Ok(Value::Bool(false))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_spawned_executor_serves_and_flushes_on_shutdown() {
        let (primary_side, worker_side) = Link::pair(PeerId::Primary, PeerId::Worker(WORKER));
        let (to_worker, mut primary_inbox) = primary_side.split();
        let (to_primary, worker_inbox) = worker_side.split();
        let shutdown = ShutdownState::new();

        let executor = ShardExecutor::new(WORKER, registry(), to_primary, ExecutorConfig::default())
            .with_clock(Clock::starting_at(0));
        let handle = executor.spawn(worker_inbox, shutdown.clone());

        let primary = Arc::new(RpcEndpoint::new(PeerId::Primary));
        let call = {
            let (primary, to_worker) = (primary.clone(), to_worker.clone());
            tokio::spawn(async move {
                primary
                    .call(
                        &to_worker,
                        Call::InitPlants(vec![json!({"x": 7, "y": 8, "seed": 0, "stage": 2})]),
                    )
                    .await
            })
        };

        let frame = primary_inbox.recv().await.unwrap();
        assert!(primary.accept(PeerId::Worker(WORKER), &frame).is_none());
        assert_eq!(call.await.unwrap(), Ok(json!([{"x": 7, "y": 8}])));

        shutdown.initiate_shutdown();
        handle.await.unwrap();

        let frame = primary_inbox.recv().await.unwrap();
        let incoming = primary.accept(PeerId::Worker(WORKER), &frame).unwrap();
        assert!(incoming.silent);
        match incoming.call {
            Ok(Call::PostAllPlants(records)) => {
                assert_eq!(records.len(), 1);
                assert_eq!(records[0].point(), Point::new(7, 8));
            }
            other => panic!("unexpected call: {other:?}"),
        }
    }
}
