//! The closed set of calls spoken between the primary and its workers.

use crate::error::RpcError;
use crate::plant::PlantRecord;
use crate::types::Point;
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CallName {
    AddPlants,
    InitPlants,
    GetAllPlants,
    HasPlant,
    Interact,
    RemovePlant,
    PostAllPlants,
}

impl CallName {
    pub const ALL: [CallName; 7] = [
        CallName::AddPlants,
        CallName::InitPlants,
        CallName::GetAllPlants,
        CallName::HasPlant,
        CallName::Interact,
        CallName::RemovePlant,
        CallName::PostAllPlants,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            CallName::AddPlants => "add_plants",
            CallName::InitPlants => "init_plants",
            CallName::GetAllPlants => "get_all_plants",
            CallName::HasPlant => "has_plant",
            CallName::Interact => "interact",
            CallName::RemovePlant => "remove_plant",
            CallName::PostAllPlants => "post_all_plants",
        }
    }

    /// Worker-to-primary notifications, sent without awaiting an answer.
    pub fn is_silent(self) -> bool {
        matches!(self, CallName::RemovePlant | CallName::PostAllPlants)
    }
}

impl FromStr for CallName {
    type Err = RpcError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        CallName::ALL
            .into_iter()
            .find(|name| name.as_str() == s)
            .ok_or_else(|| RpcError::UnknownCall(s.to_string()))
    }
}

impl fmt::Display for CallName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A call together with its typed arguments.
///
/// Plant candidates travel as raw JSON so the receiving worker can reject
/// bad entries one by one instead of failing the whole batch.
#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    AddPlants(Vec<Value>),
    InitPlants(Vec<Value>),
    GetAllPlants,
    HasPlant(Point),
    Interact(Point),
    RemovePlant(Point),
    PostAllPlants(Vec<PlantRecord>),
}

impl Call {
    pub fn name(&self) -> CallName {
        match self {
            Call::AddPlants(_) => CallName::AddPlants,
            Call::InitPlants(_) => CallName::InitPlants,
            Call::GetAllPlants => CallName::GetAllPlants,
            Call::HasPlant(_) => CallName::HasPlant,
            Call::Interact(_) => CallName::Interact,
            Call::RemovePlant(_) => CallName::RemovePlant,
            Call::PostAllPlants(_) => CallName::PostAllPlants,
        }
    }

    pub fn into_args(self) -> Vec<Value> {
        match self {
            Call::AddPlants(plants) | Call::InitPlants(plants) => vec![Value::Array(plants)],
            Call::GetAllPlants => Vec::new(),
            Call::HasPlant(p) | Call::Interact(p) | Call::RemovePlant(p) => {
                vec![Value::from(p.x), Value::from(p.y)]
            }
            Call::PostAllPlants(records) => {
                vec![Value::Array(records.iter().map(PlantRecord::to_value).collect())]
            }
        }
    }

    /// Rebuilds a call from its wire name and arguments.
    pub fn from_wire(name: CallName, args: Vec<Value>) -> Result<Self, RpcError> {
        let call = match name {
            CallName::AddPlants => Call::AddPlants(plant_list(args)),
            CallName::InitPlants => Call::InitPlants(plant_list(args)),
            CallName::GetAllPlants => Call::GetAllPlants,
            CallName::HasPlant => Call::HasPlant(point_arg(name, &args)?),
            CallName::Interact => Call::Interact(point_arg(name, &args)?),
            CallName::RemovePlant => Call::RemovePlant(point_arg(name, &args)?),
            CallName::PostAllPlants => {
                let records = plant_list(args)
                    .into_iter()
                    .map(serde_json::from_value)
                    .collect::<Result<Vec<PlantRecord>, _>>()
                    .map_err(|e| bad_arguments(name, e))?;
                Call::PostAllPlants(records)
            }
        };
        Ok(call)
    }
}

/// A list argument is either one array or the candidates spread as args.
fn plant_list(mut args: Vec<Value>) -> Vec<Value> {
    if args.len() == 1 && args[0].is_array() {
        if let Some(Value::Array(items)) = args.pop() {
            return items;
        }
    }
    args
}

fn point_arg(name: CallName, args: &[Value]) -> Result<Point, RpcError> {
    match args {
        [x, y, ..] => match (x.as_i64(), y.as_i64()) {
            (Some(x), Some(y)) => Ok(Point::new(x, y)),
            _ => Err(bad_arguments(name, format!("coordinates must be integers, got {x}, {y}"))),
        },
        _ => Err(bad_arguments(name, "expected x and y")),
    }
}

fn bad_arguments(name: CallName, reason: impl ToString) -> RpcError {
    RpcError::BadArguments {
        name: name.to_string(),
        reason: reason.to_string(),
    }
}
