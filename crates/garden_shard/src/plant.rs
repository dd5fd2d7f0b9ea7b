//! Plant entities, their growth step and their persisted form.

use crate::error::ValidationError;
use crate::seed::{Seed, SeedRegistry};
use crate::types::{Millis, Point};
use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::sync::Arc;

/// Outcome of a single growth step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Growth {
    /// Reached `stage == stages`; no further ticks needed.
    Grown,
    /// Reached `stage == -stages`; must be removed.
    Dead,
    /// Still somewhere in between; schedule another tick.
    Pending,
}

/// A plant on the world grid.
#[derive(Debug, Clone)]
pub struct Plant {
    point: Point,
    seed: Arc<Seed>,
    stage: i32,
    damaged: bool,
    last_check: Millis,
    /// Earliest time the next scheduled tick may run.
    pub(crate) due: Millis,
}

impl Plant {
    /// Creates a plant, clamping `stage` into `-stages..=stages`.
    pub fn new(point: Point, seed: Arc<Seed>, stage: i32, damaged: bool, last_check: Millis) -> Self {
        let stages = seed.stages();
        Self {
            point,
            stage: stage.clamp(-stages, stages),
            seed,
            damaged,
            last_check,
            due: last_check,
        }
    }

    /// Builds a plant from a record, resolving its seed in `registry`.
    pub fn from_record(record: &PlantRecord, registry: &SeedRegistry) -> Result<Self, ValidationError> {
        let seed = registry
            .lookup(record.seed)
            .ok_or(ValidationError::UnknownSeed(record.seed))?;
        let stage = record.stage.clamp(i32::MIN as i64, i32::MAX as i64) as i32;

        Ok(Self::new(
            Point::new(record.x, record.y),
            seed.clone(),
            stage,
            record.dmg,
            record.last,
        ))
    }

    pub fn point(&self) -> Point {
        self.point
    }

    pub fn seed(&self) -> &Arc<Seed> {
        &self.seed
    }

    pub fn stage(&self) -> i32 {
        self.stage
    }

    pub fn damaged(&self) -> bool {
        self.damaged
    }

    pub fn last_check(&self) -> Millis {
        self.last_check
    }

    pub fn is_dead(&self) -> bool {
        self.stage <= -self.seed.stages()
    }

    pub fn is_finished(&self) -> bool {
        self.stage >= self.seed.stages()
    }

    /// Clears the damage flag. Returns whether the plant was damaged.
    pub fn heal(&mut self) -> bool {
        std::mem::replace(&mut self.damaged, false)
    }

    /// Advances the plant by one step at time `now`.
    ///
    /// A healthy plant either grows one stage or, with probability
    /// `fragility`, becomes damaged without changing stage. A damaged plant
    /// loses one stage per step until healed.
    pub fn tick<R: Rng + ?Sized>(&mut self, now: Millis, rng: &mut R) -> Growth {
        self.last_check = now;

        if self.damaged {
            self.stage -= 1;
        } else if rng.gen::<f64>() < self.seed.fragility() {
            self.damaged = true;
        } else {
            self.stage += 1;
        }

        let stages = self.seed.stages();
        self.stage = self.stage.clamp(-stages, stages);

        if self.is_dead() {
            Growth::Dead
        } else if self.is_finished() {
            Growth::Grown
        } else {
            Growth::Pending
        }
    }

    /// When the next tick should run: one stage after the last check, but
    /// never in the past and never more than one stage out.
    pub fn next_due(&self, now: Millis) -> Millis {
        let per_stage = self.seed.per_stage();
        self.last_check
            .saturating_add(per_stage)
            .clamp(now, now.saturating_add(per_stage))
    }

    pub fn to_record(&self) -> PlantRecord {
        PlantRecord {
            x: self.point.x,
            y: self.point.y,
            seed: self.seed.index() as i64,
            stage: self.stage as i64,
            dmg: self.damaged,
            last: self.last_check,
        }
    }
}

impl fmt::Display for Plant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "p{} {}", self.point, self.seed.name())?;
        if self.is_dead() {
            f.write_str(" (is_dead)")?;
        }
        if self.is_finished() {
            f.write_str(" (is_finished)")?;
        }
        Ok(())
    }
}

/// Plant as stored on disk and sent between workers and the primary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlantRecord {
    pub x: i64,
    pub y: i64,
    pub seed: i64,
    pub stage: i64,
    #[serde(default)]
    pub dmg: bool,
    #[serde(default)]
    pub last: Millis,
}

impl PlantRecord {
    pub fn point(&self) -> Point {
        Point::new(self.x, self.y)
    }

    /// Parses an untrusted JSON candidate.
    ///
    /// Numeric fields accept integers, floats (floored) and numeric strings.
    /// A missing `last` falls back to `now`.
    pub fn from_value(value: &Value, now: Millis) -> Result<Self, ValidationError> {
        let object = value.as_object().ok_or(ValidationError::NotAnObject)?;

        let last = match object.get("last") {
            None | Some(Value::Null) => now,
            Some(_) => {
                let last = int_field(object, "last")?;
                Millis::try_from(last).map_err(|_| ValidationError::BadField {
                    field: "last",
                    value: last.to_string(),
                })?
            }
        };

        Ok(Self {
            x: int_field(object, "x")?,
            y: int_field(object, "y")?,
            seed: int_field(object, "seed")?,
            stage: int_field(object, "stage")?,
            dmg: object.get("dmg").map(truthy).unwrap_or(false),
            last,
        })
    }

    pub fn to_document(&self) -> Map<String, Value> {
        let mut doc = Map::new();
        doc.insert("x".into(), self.x.into());
        doc.insert("y".into(), self.y.into());
        doc.insert("seed".into(), self.seed.into());
        doc.insert("stage".into(), self.stage.into());
        doc.insert("dmg".into(), self.dmg.into());
        doc.insert("last".into(), self.last.into());
        doc
    }

    pub fn to_value(&self) -> Value {
        Value::Object(self.to_document())
    }
}

fn int_field(object: &Map<String, Value>, field: &'static str) -> Result<i64, ValidationError> {
    let value = object.get(field).ok_or(ValidationError::MissingField(field))?;

    let floor = |f: f64| f.is_finite().then(|| f.floor() as i64);
    let parsed = match value {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().and_then(floor)),
        Value::String(s) => s.trim().parse::<f64>().ok().and_then(floor),
        _ => None,
    };

    parsed.ok_or_else(|| ValidationError::BadField {
        field,
        value: value.to_string(),
    })
}

fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        _ => true,
    }
}
