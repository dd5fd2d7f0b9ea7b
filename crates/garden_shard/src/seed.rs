//! Growth profiles ("seeds") and the registry that indexes them.
//!
//! The registry is built once at startup and shared behind an `Arc`. Seeds
//! are looked up by the small integer index they were registered under.

use crate::error::RegistryError;
use crate::types::Millis;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

const SEC: Millis = 1_000;
const MIN: Millis = 60 * SEC;

/// Definition of a growth profile as it appears in configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeedSpec {
    /// Display name
    pub name: String,
    /// Number of growth stages to full size
    pub stages: u32,
    /// Total growth duration in milliseconds
    pub time_ms: Millis,
    /// Per-tick probability (0..=1) of the plant becoming damaged
    pub fragility: f64,
    /// Upper bound of the harvest yield
    pub max_result: u32,
}

impl SeedSpec {
    pub fn new(name: impl Into<String>, stages: u32, time_ms: Millis, fragility: f64, max_result: u32) -> Self {
        Self {
            name: name.into(),
            stages,
            time_ms,
            fragility,
            max_result,
        }
    }

    fn validate(&self) -> Result<(), RegistryError> {
        let invalid = |reason: &str| RegistryError::InvalidSeed {
            name: self.name.clone(),
            reason: reason.to_string(),
        };

        if self.name.trim().is_empty() {
            return Err(invalid("name cannot be empty"));
        }
        if self.stages == 0 || self.stages > i32::MAX as u32 {
            return Err(invalid("stages must be a positive 32-bit number"));
        }
        if self.time_ms == 0 {
            return Err(invalid("time_ms must be greater than 0"));
        }
        if !(0.0..=1.0).contains(&self.fragility) {
            return Err(invalid("fragility must be within 0..=1"));
        }
        if self.max_result == 0 {
            return Err(invalid("max_result must be at least 1"));
        }
        Ok(())
    }
}

/// Immutable growth profile.
#[derive(Debug, Clone, PartialEq)]
pub struct Seed {
    index: u32,
    name: String,
    stages: i32,
    time_ms: Millis,
    fragility: f64,
    max_result: u32,
    per_stage: Millis,
}

impl Seed {
    fn from_spec(index: u32, spec: SeedSpec) -> Self {
        let stages = spec.stages as i32;
        Self {
            index,
            per_stage: (spec.time_ms / spec.stages as Millis).max(1),
            name: spec.name,
            stages,
            time_ms: spec.time_ms,
            fragility: spec.fragility,
            max_result: spec.max_result,
        }
    }

    pub fn index(&self) -> u32 {
        self.index
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn stages(&self) -> i32 {
        self.stages
    }

    pub fn time_ms(&self) -> Millis {
        self.time_ms
    }

    pub fn fragility(&self) -> f64 {
        self.fragility
    }

    pub fn max_result(&self) -> u32 {
        self.max_result
    }

    /// Milliseconds between two growth stages.
    pub fn per_stage(&self) -> Millis {
        self.per_stage
    }

    /// Harvest yield, uniform over `1..=max_result`.
    pub fn random_drop<R: Rng + ?Sized>(&self, rng: &mut R) -> u32 {
        rng.gen_range(1..=self.max_result)
    }
}

/// The seeds every fresh world starts with.
pub fn standard_seeds() -> Vec<SeedSpec> {
    vec![
        SeedSpec::new("wheat", 4, 5 * MIN, 0.5, 3),
        SeedSpec::new("potato", 3, 10 * MIN, 0.4, 5),
        SeedSpec::new("carrot", 4, 3 * MIN, 0.7, 3),
        SeedSpec::new("dandelion", 2, 2 * MIN, 0.1, 2),
    ]
}

#[derive(Debug, Default)]
pub struct SeedRegistry {
    seeds: Vec<Arc<Seed>>,
}

impl SeedRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding [`standard_seeds`].
    pub fn standard() -> Self {
        let seeds = standard_seeds()
            .into_iter()
            .enumerate()
            .map(|(index, spec)| Arc::new(Seed::from_spec(index as u32, spec)))
            .collect();
        Self { seeds }
    }

    pub fn from_specs<I>(specs: I) -> Result<Self, RegistryError>
    where
        I: IntoIterator<Item = SeedSpec>,
    {
        let mut registry = Self::new();
        for spec in specs {
            registry.register(spec)?;
        }
        Ok(registry)
    }

    /// Registers `spec` under the next free index.
    pub fn register(&mut self, spec: SeedSpec) -> Result<Arc<Seed>, RegistryError> {
        spec.validate()?;
        let seed = Arc::new(Seed::from_spec(self.seeds.len() as u32, spec));
        self.seeds.push(seed.clone());
        Ok(seed)
    }

    pub fn lookup(&self, id: i64) -> Option<&Arc<Seed>> {
        usize::try_from(id).ok().and_then(|index| self.seeds.get(index))
    }

    pub fn all(&self) -> &[Arc<Seed>] {
        &self.seeds
    }

    pub fn len(&self) -> usize {
        self.seeds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seeds.is_empty()
    }
}
