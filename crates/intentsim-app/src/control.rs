use std::sync::{Arc, MutexGuard, PoisonError};

use crossfire::TrySendError;
use intentsim_core::{
    AnalysisReport, ControlCommand, EngineSnapshot, Position, SimulationConfig, SimulationEngine,
    Tick,
};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use smallvec::SmallVec;
use thiserror::Error;

use crate::SharedEngine;
use crate::command::CommandSender;

/// Snapshot of configuration state returned to external clients.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigSnapshot {
    pub tick: u64,
    pub config: Value,
}

impl ConfigSnapshot {
    fn from_config(config: &SimulationConfig, tick: Tick) -> Result<Self, ControlError> {
        let config_value = serde_json::to_value(config).map_err(ControlError::serialization)?;
        Ok(Self {
            tick: tick.0,
            config: config_value,
        })
    }
}

/// Enumeration describing the primitive type of a knob.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KnobKind {
    Number,
    Integer,
    Boolean,
    String,
    Array,
    Object,
    Null,
}

/// Public descriptor for a single configuration knob.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnobEntry {
    pub path: String,
    pub kind: KnobKind,
    pub value: Value,
}

/// Request payload for updating a configuration knob.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnobUpdate {
    pub path: String,
    pub value: Value,
}

/// Errors produced by the control domain when mutating configuration.
#[derive(Debug, Error)]
pub enum ControlError {
    #[error("failed to lock simulation engine")]
    Lock,
    #[error("{0}")]
    InvalidPatch(String),
    #[error("unknown knob path: {0}")]
    UnknownPath(String),
    #[error("serialization error: {0}")]
    Serialization(String),
    #[error("command queue is full; retry later")]
    CommandQueueFull,
    #[error("command queue has been closed")]
    CommandQueueClosed,
}

impl ControlError {
    fn serialization(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<PoisonError<MutexGuard<'_, SimulationEngine>>> for ControlError {
    fn from(_: PoisonError<MutexGuard<'_, SimulationEngine>>) -> Self {
        ControlError::Lock
    }
}

/// Shared handle used by control surfaces to observe and steer the running engine.
///
/// Reads lock the engine briefly; every mutation is queued as a
/// [`ControlCommand`] and applied by the driver between ticks.
#[derive(Clone)]
pub struct ControlHandle {
    shared_engine: SharedEngine,
    commands: CommandSender,
}

impl ControlHandle {
    pub fn new(shared_engine: SharedEngine, commands: CommandSender) -> Self {
        Self {
            shared_engine,
            commands,
        }
    }

    pub(crate) fn lock_engine(&self) -> Result<MutexGuard<'_, SimulationEngine>, ControlError> {
        self.shared_engine.lock().map_err(|err| err.into())
    }

    /// Retrieve the current configuration snapshot.
    pub fn snapshot(&self) -> Result<ConfigSnapshot, ControlError> {
        let engine = self.lock_engine()?;
        ConfigSnapshot::from_config(engine.config(), engine.tick())
    }

    /// Latest published engine snapshot.
    pub fn engine_snapshot(&self) -> Result<Arc<EngineSnapshot>, ControlError> {
        Ok(self.lock_engine()?.snapshot())
    }

    /// Up to `limit` most recent analysis reports, newest first.
    pub fn recent_analyses(&self, limit: usize) -> Result<Vec<AnalysisReport>, ControlError> {
        let engine = self.lock_engine()?;
        Ok(engine.history().rev().take(limit).cloned().collect())
    }

    pub fn start(&self) -> Result<(), ControlError> {
        self.enqueue(ControlCommand::Start)
    }

    pub fn stop(&self) -> Result<(), ControlError> {
        self.enqueue(ControlCommand::Stop)
    }

    pub fn reset(&self) -> Result<(), ControlError> {
        self.enqueue(ControlCommand::Reset)
    }

    /// Queue the creation of `count` particles, optionally at a fixed position.
    pub fn add_particles(&self, count: usize, at: Option<Position>) -> Result<(), ControlError> {
        if let Some(position) = at
            && !position.is_finite()
        {
            return Err(ControlError::InvalidPatch(
                "particle position must be finite".into(),
            ));
        }
        self.enqueue(ControlCommand::AddParticles { count, at })
    }

    /// Queue a single particle at `(x, y)`; the engine clamps it into the world.
    pub fn create_particle_at(&self, x: f32, y: f32) -> Result<(), ControlError> {
        self.enqueue(ControlCommand::CreateParticleAt { x, y })
    }

    /// Flatten the configuration into individual knob descriptors for discovery.
    pub fn list_knobs(&self) -> Result<Vec<KnobEntry>, ControlError> {
        let config_value = {
            let engine = self.lock_engine()?;
            serde_json::to_value(engine.config()).map_err(ControlError::serialization)?
        };
        let mut entries = Vec::with_capacity(64);
        let mut prefix = String::new();
        flatten_value(&mut prefix, &config_value, &mut entries);
        Ok(entries)
    }

    /// Apply a structured JSON patch object onto the configuration.
    ///
    /// The merged configuration is validated here so callers get errors
    /// synchronously; the update itself takes effect before the next tick.
    pub fn apply_patch(&self, patch: Value) -> Result<ConfigSnapshot, ControlError> {
        if !patch.is_object() {
            return Err(ControlError::InvalidPatch(
                "configuration patch must be a JSON object".into(),
            ));
        }

        let engine = self.lock_engine()?;
        let current_tick = engine.tick();
        let mut config_value =
            serde_json::to_value(engine.config()).map_err(ControlError::serialization)?;
        let mut path = SmallVec::<[&str; 8]>::new();
        merge_value(&mut config_value, &patch, &mut path)?;
        let json_str = serde_json::to_string(&config_value).map_err(ControlError::serialization)?;
        let mut de = serde_json::Deserializer::from_str(&json_str);
        let new_config: SimulationConfig = serde_path_to_error::deserialize(&mut de).map_err(
            |e: serde_path_to_error::Error<serde_json::Error>| {
                ControlError::InvalidPatch(format!("{} at {}", e, e.path()))
            },
        )?;
        let dims = new_config
            .validate()
            .map_err(|err| ControlError::InvalidPatch(err.to_string()))?;
        if dims != engine.field().dimensions() {
            return Err(ControlError::InvalidPatch(
                "changing field dimensions at runtime is not supported; restart the simulation with the new configuration"
                    .into(),
            ));
        }
        if new_config.world_extent() != engine.config().world_extent() {
            return Err(ControlError::InvalidPatch(
                "changing world dimensions at runtime is not supported; restart the simulation with the new configuration"
                    .into(),
            ));
        }
        let snapshot = ConfigSnapshot::from_config(&new_config, current_tick)?;
        drop(engine);
        self.enqueue(ControlCommand::UpdateConfig(Box::new(new_config)))?;
        Ok(snapshot)
    }

    /// Apply a list of knob updates by path.
    pub fn apply_updates(&self, updates: &[KnobUpdate]) -> Result<ConfigSnapshot, ControlError> {
        let mut patch_map = Map::new();
        for update in updates {
            insert_path(&mut patch_map, &update.path, update.value.clone())?;
        }
        self.apply_patch(Value::Object(patch_map))
    }

    fn enqueue(&self, command: ControlCommand) -> Result<(), ControlError> {
        match self.commands.try_send(command) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_msg)) => Err(ControlError::CommandQueueFull),
            Err(TrySendError::Disconnected(_msg)) => Err(ControlError::CommandQueueClosed),
        }
    }
}

fn insert_path(map: &mut Map<String, Value>, path: &str, value: Value) -> Result<(), ControlError> {
    let mut segments = path.split('.').filter(|s| !s.is_empty());
    let Some(mut seg) = segments.next() else {
        return Err(ControlError::InvalidPatch("empty knob path".into()));
    };
    let mut cur = map;

    for next in segments {
        let entry = cur
            .entry(seg.to_owned())
            .or_insert_with(|| Value::Object(Map::new()));
        cur = entry.as_object_mut().ok_or_else(|| {
            ControlError::InvalidPatch(format!("intermediate segment '{seg}' is not an object"))
        })?;
        seg = next;
    }

    cur.insert(seg.to_owned(), value);
    Ok(())
}

fn path_display(path: &[&str]) -> String {
    path.join(".")
}

fn type_mismatch(path: &[&str]) -> ControlError {
    ControlError::InvalidPatch(format!("type mismatch at {}", path_display(path)))
}

fn set_f64(target: &mut Value, v: f64, path: &[&str]) -> Result<(), ControlError> {
    let number = serde_json::Number::from_f64(v).ok_or_else(|| {
        ControlError::InvalidPatch(format!("non-finite float at {}", path_display(path)))
    })?;
    *target = Value::Number(number);
    Ok(())
}

/// Merge `patch` into `target`, refusing keys the target does not already have.
///
/// Strings are coerced into numbers and booleans so knob values typed on a
/// command line behave like JSON literals. `null` targets (unset optional
/// knobs) accept any value and leave the type check to deserialization.
fn merge_value<'a>(
    target: &mut Value,
    patch: &'a Value,
    path: &mut SmallVec<[&'a str; 8]>,
) -> Result<(), ControlError> {
    match target {
        Value::Object(target_map) => {
            let Value::Object(patch_map) = patch else {
                return Err(type_mismatch(path));
            };

            for (key, patch_value) in patch_map {
                path.push(key);
                let Some(target_value) = target_map.get_mut(key) else {
                    return Err(ControlError::UnknownPath(path_display(path)));
                };
                merge_value(target_value, patch_value, path)?;
                path.pop();
            }
            Ok(())
        }
        Value::Array(_) => {
            if matches!(patch, Value::Array(_)) {
                *target = patch.clone();
                Ok(())
            } else {
                Err(type_mismatch(path))
            }
        }
        Value::Number(_) => match patch {
            Value::Number(n) => {
                *target = Value::Number(n.clone());
                Ok(())
            }
            Value::String(s) => {
                let s = s.trim();
                let invalid = || ControlError::InvalidPatch(path_display(path));
                if target.as_u64().is_some() {
                    let v: u64 = s.parse().map_err(|_| invalid())?;
                    *target = Value::from(v);
                } else if target.as_i64().is_some() {
                    let v: i64 = s.parse().map_err(|_| invalid())?;
                    *target = Value::from(v);
                } else {
                    let v: f64 = s.parse().map_err(|_| invalid())?;
                    set_f64(target, v, path)?;
                }
                Ok(())
            }
            Value::Null => {
                *target = Value::Null;
                Ok(())
            }
            _ => Err(type_mismatch(path)),
        },
        Value::String(_) => match patch {
            Value::String(_) | Value::Null => {
                *target = patch.clone();
                Ok(())
            }
            _ => Err(type_mismatch(path)),
        },
        Value::Bool(_) => match patch {
            Value::Bool(_) | Value::Null => {
                *target = patch.clone();
                Ok(())
            }
            Value::String(s) => {
                let parsed = match s.trim().to_ascii_lowercase().as_str() {
                    "true" | "1" | "yes" | "on" | "t" | "y" => true,
                    "false" | "0" | "no" | "off" | "f" | "n" => false,
                    _ => {
                        return Err(ControlError::InvalidPatch(format!(
                            "cannot coerce '{s}' to bool for {}",
                            path_display(path),
                        )));
                    }
                };
                *target = Value::from(parsed);
                Ok(())
            }
            _ => Err(type_mismatch(path)),
        },
        Value::Null => {
            *target = patch.clone();
            Ok(())
        }
    }
}

fn flatten_value(prefix: &mut String, value: &Value, entries: &mut Vec<KnobEntry>) {
    match value {
        Value::Object(map) => {
            let base = prefix.len();
            for (k, v) in map {
                if base != 0 {
                    prefix.push('.');
                }
                prefix.push_str(k);
                flatten_value(prefix, v, entries);
                prefix.truncate(base);
            }
        }
        _ => entries.push(KnobEntry {
            path: prefix.clone(),
            kind: knob_kind(value),
            value: value.clone(),
        }),
    }
}

fn knob_kind(value: &Value) -> KnobKind {
    match value {
        Value::Number(n) => {
            if n.is_i64() || n.is_u64() {
                KnobKind::Integer
            } else {
                KnobKind::Number
            }
        }
        Value::String(_) => KnobKind::String,
        Value::Bool(_) => KnobKind::Boolean,
        Value::Array(_) => KnobKind::Array,
        Value::Object(_) => KnobKind::Object,
        Value::Null => KnobKind::Null,
    }
}
