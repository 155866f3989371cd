//! Scene context and world state.
//!
//! Both are string-keyed JSON maps: the context is assembled by outer layers
//! and carries loosely structured fields, so accessors validate on read and
//! report the offending field by name.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::error::{Result, SagaError};
use crate::model::anchor::Anchor;

/// Truthiness used for anchor conditions.
fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map_or(false, |f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}

/// Shared world facts; a condition holds when its key is truthy.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WorldState(Map<String, Value>);

impl WorldState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_satisfied(&self, condition: &str) -> bool {
        self.0.get(condition).map_or(false, is_truthy)
    }

    pub fn set(&mut self, key: impl Into<String>, value: Value) {
        self.0.insert(key.into(), value);
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// Power level of an agent from the `power_levels` table, if recorded.
    pub fn power_level(&self, agent_id: &str) -> Option<f64> {
        self.0.get("power_levels")?.get(agent_id)?.as_f64()
    }

    /// Explicit position advantage flag from `position_advantage`, if recorded.
    pub fn position_advantage(&self, agent_id: &str) -> Option<bool> {
        self.0.get("position_advantage")?.get(agent_id)?.as_bool()
    }
}

impl From<Map<String, Value>> for WorldState {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

/// Mutable context of one scene simulation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SceneContext(Map<String, Value>);

impl SceneContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from a JSON value; anything but an object is rejected.
    pub fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Object(map) => Ok(Self(map)),
            _ => Err(SagaError::validation("scene_context", "must be an object")),
        }
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn insert(&mut self, key: impl Into<String>, value: Value) {
        self.0.insert(key.into(), value);
    }

    fn str_field(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(Value::as_str).filter(|s| !s.is_empty())
    }

    pub fn scene_id(&self) -> Option<&str> {
        self.str_field("scene_id")
    }

    pub fn scene_version_id(&self) -> Option<&str> {
        self.str_field("scene_version_id")
    }

    pub fn root_id(&self) -> Option<&str> {
        self.str_field("root_id")
    }

    pub fn branch_id(&self) -> Option<&str> {
        self.str_field("branch_id")
    }

    pub fn scene_seq(&self) -> Option<u32> {
        self.0
            .get("scene_seq")
            .and_then(Value::as_u64)
            .and_then(|v| u32::try_from(v).ok())
    }

    fn typed<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        match self.0.get(key) {
            None | Some(Value::Null) => Ok(None),
            Some(value) => serde_json::from_value(value.clone())
                .map(Some)
                .map_err(|e| SagaError::validation(format!("scene_context.{key}"), e.to_string())),
        }
    }

    pub fn world_state(&self) -> Result<Option<WorldState>> {
        self.typed("world_state")
    }

    pub fn set_world_state(&mut self, world: &WorldState) -> Result<()> {
        self.0.insert("world_state".into(), serde_json::to_value(world)?);
        Ok(())
    }

    pub fn next_anchor(&self) -> Result<Option<Anchor>> {
        self.typed("next_anchor")
    }

    pub fn set_next_anchor(&mut self, anchor: Option<&Anchor>) -> Result<()> {
        let value = match anchor {
            Some(a) => serde_json::to_value(a)?,
            None => Value::Null,
        };
        self.0.insert("next_anchor".into(), value);
        Ok(())
    }

    /// Current escalation level in [0, 1]; absent counts as zero.
    pub fn conflict_escalation(&self) -> f64 {
        self.0
            .get("conflict_escalation")
            .and_then(Value::as_f64)
            .unwrap_or(0.0)
    }

    /// The `events` sequence, validated for presence and type.
    pub fn events_mut(&mut self) -> Result<&mut Vec<Value>> {
        match self.0.get_mut("events") {
            None | Some(Value::Null) => {
                Err(SagaError::validation("scene_context.events", "is required"))
            }
            Some(Value::Array(events)) => Ok(events),
            Some(_) => Err(SagaError::validation("scene_context.events", "must be a list")),
        }
    }

    /// String members of a list field such as `facts`, `relations`, `secrets`.
    pub fn string_set(&self, key: &str) -> Vec<String> {
        match self.0.get(key) {
            Some(Value::Array(items)) => items
                .iter()
                .map(|v| match v {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                })
                .collect(),
            Some(Value::Null) | None => Vec::new(),
            Some(Value::String(s)) => vec![s.clone()],
            Some(other) => vec![other.to_string()],
        }
    }

    /// Append a fact to `facts` unless already recorded.
    pub fn record_fact(&mut self, fact: &str) {
        let facts = self
            .0
            .entry("facts")
            .or_insert_with(|| Value::Array(Vec::new()));
        if !facts.is_array() {
            *facts = json!([facts.clone()]);
        }
        if let Value::Array(items) = facts {
            if !items.iter().any(|v| v.as_str() == Some(fact)) {
                items.push(Value::String(fact.to_string()));
            }
        }
    }
}

impl From<Map<String, Value>> for SceneContext {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}
