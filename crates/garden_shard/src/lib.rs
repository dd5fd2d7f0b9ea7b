//! # Garden Shard - Coordination and Scheduling Core
//!
//! The garden world is a sparse plane of growable plants spread over a pool
//! of worker tasks. This crate holds everything that decides *who owns which
//! plant* and *when each plant advances*:
//!
//! * **Spatial index** ([`Table`]) - sparse `(x, y)` keyed storage
//! * **Time buckets** ([`TimeBuckets`]) - due-time to pending items
//! * **Coalescing scheduler** ([`Scheduler`]) - one timer per worker, no matter
//!   how many plants it holds
//! * **RPC layer** ([`rpc`]) - JSON envelopes over a bidirectional link with
//!   `(peer, call)` correlation and in-flight coalescing
//! * **Shard executor** ([`ShardExecutor`]) - runs inside a worker, owns a
//!   partition and ticks its growth
//! * **Shard coordinator** ([`ShardCoordinator`]) - runs in the primary,
//!   keeps the ownership map, reclaims orphans and flushes to the store
//!
//! ## Message Flow
//!
//! 1. The coordinator loads persisted plants and hands them out round-robin
//! 2. Each executor indexes its batch and schedules the next growth tick
//! 3. Executors answer with the coordinates they accepted
//! 4. Client calls are routed to the owning executor through the ownership map
//! 5. When a worker link drops, its plants are reclaimed and reassigned
//!
//! Every worker mutates its partition from a single task, so no locking is
//! needed inside a partition. Cross-worker communication only happens through
//! the [`rpc::Link`] frames.

pub mod buckets;
pub mod clock;
pub mod coordinator;
pub mod error;
pub mod executor;
pub mod plant;
pub mod rpc;
pub mod scheduler;
pub mod seed;
pub mod shutdown;
pub mod store;
pub mod table;
pub mod types;

pub use buckets::TimeBuckets;
pub use clock::Clock;
pub use coordinator::{CoordinatorConfig, ShardCoordinator};
pub use error::{CoordinatorError, RegistryError, RpcError, StoreError, ValidationError};
pub use executor::{ExecutorConfig, Interaction, ShardExecutor};
pub use plant::{Growth, Plant, PlantRecord};
pub use scheduler::Scheduler;
pub use seed::{Seed, SeedRegistry, SeedSpec};
pub use shutdown::ShutdownState;
pub use store::{DocumentStore, DurableStore, Filter};
pub use table::Table;
pub use types::{Millis, PeerId, Point, WorkerId};
