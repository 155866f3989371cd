//! Convergence monitor - how far the world is from the next anchor.

use crate::config::SimulationConfig;
use crate::error::Result;
use crate::model::{Anchor, ConstraintType, ConvergenceAction, ConvergenceCheck, WorldState};

#[derive(Debug, Clone)]
pub struct ConvergenceMonitor {
    threshold: f64,
    safety_margin_rounds: u32,
}

impl Default for ConvergenceMonitor {
    fn default() -> Self {
        Self::from_config(&SimulationConfig::default())
    }
}

impl ConvergenceMonitor {
    pub fn from_config(config: &SimulationConfig) -> Self {
        Self {
            threshold: config.convergence_threshold,
            safety_margin_rounds: config.safety_margin_rounds,
        }
    }

    /// Share of the anchor's conditions the world does not yet satisfy.
    pub fn distance(world: &WorldState, anchor: &Anchor) -> f64 {
        let total = anchor.required_conditions.len();
        if total == 0 {
            return 0.0;
        }
        anchor.unmet_conditions(world).len() as f64 / total as f64
    }

    /// Convergence is needed when the gap is wide and time is short. Soft
    /// anchors are advisory and never demand it.
    pub fn check_convergence(
        &self,
        world: &WorldState,
        anchor: &Anchor,
        rounds_remaining: u32,
    ) -> Result<ConvergenceCheck> {
        let distance = Self::distance(world, anchor);
        let convergence_needed = anchor.constraint_type != ConstraintType::Soft
            && distance > self.threshold
            && rounds_remaining <= self.safety_margin_rounds;
        let suggested = (distance > 0.0).then(|| ConvergenceAction::for_distance(distance));

        ConvergenceCheck::new(anchor.id.clone(), distance, convergence_needed, suggested)
    }
}
