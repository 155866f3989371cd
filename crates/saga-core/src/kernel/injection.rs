//! Manual interventions on a scene and the information-gain measure.

use std::collections::HashSet;

use serde_json::Value;

use crate::error::{Result, SagaError};
use crate::model::{NarrativeEvent, SceneContext};

const ESCALATION_STEP: f64 = 0.2;

fn check_events(scene: &SceneContext) -> Result<()> {
    match scene.get("events") {
        None | Some(Value::Null) => Err(SagaError::validation("scene_context.events", "is required")),
        Some(Value::Array(_)) => Ok(()),
        Some(_) => Err(SagaError::validation("scene_context.events", "must be a list")),
    }
}

fn push_event(scene: &mut SceneContext, event: &NarrativeEvent) -> Result<()> {
    let value = serde_json::to_value(event)?;
    scene.events_mut()?.push(value);
    Ok(())
}

/// Append a breaking incident to the scene's `events`.
pub fn inject_breaking_incident(scene: &mut SceneContext) -> Result<NarrativeEvent> {
    check_events(scene)?;
    let event = NarrativeEvent::BreakingIncident {
        detail: "breaking incident to shake stagnation".to_string(),
    };
    push_event(scene, &event)?;
    Ok(event)
}

/// Raise `conflict_escalation` by one step, capped at 1.0, and record it.
///
/// Checked in order: escalation present, escalation numeric, events
/// present, events a list. Nothing is written unless every check passes.
pub fn force_conflict_escalation(scene: &mut SceneContext) -> Result<NarrativeEvent> {
    let current = match scene.get("conflict_escalation") {
        None => {
            return Err(SagaError::validation(
                "scene_context.conflict_escalation",
                "is required",
            ))
        }
        Some(value) => value.as_f64().ok_or_else(|| {
            SagaError::validation("scene_context.conflict_escalation", "must be a number")
        })?,
    };
    check_events(scene)?;

    let level = (current + ESCALATION_STEP).min(1.0);
    scene.insert("conflict_escalation", Value::from(level));
    let event = NarrativeEvent::ForceEscalation { level };
    push_event(scene, &event)?;
    Ok(event)
}

/// New facts, relations, and secrets relative to all known, plus any rise in
/// escalation, clamped to [0, 1].
pub fn calculate_info_gain(prev: &SceneContext, curr: &SceneContext) -> f64 {
    let mut new_info = 0usize;
    let mut total = 0usize;
    for key in ["facts", "relations", "secrets"] {
        let before: HashSet<String> = prev.string_set(key).into_iter().collect();
        let after: HashSet<String> = curr.string_set(key).into_iter().collect();
        new_info += after.difference(&before).count();
        total += after.len();
    }

    let conflict_delta = (curr.conflict_escalation() - prev.conflict_escalation()).max(0.0);
    if new_info == 0 && conflict_delta <= 0.0 {
        return 0.0;
    }

    let info_ratio = new_info as f64 / total.max(1) as f64;
    (info_ratio + conflict_delta.min(1.0)).min(1.0)
}
