//! Plain renderer - a readable digest of simulated rounds.

use async_trait::async_trait;

use super::Renderer;
use crate::error::Result;
use crate::model::{ActionOutcome, SceneContext, SimulationRoundResult};

/// Renders rounds as plain text without a generation backend.
#[derive(Debug, Default, Clone)]
pub struct PlainRenderer;

#[async_trait]
impl Renderer for PlainRenderer {
    async fn render(
        &self,
        rounds: &[SimulationRoundResult],
        scene: &SceneContext,
    ) -> Result<String> {
        let title = scene.scene_id().unwrap_or("untitled scene");
        let mut out = format!("# {title}\n");

        for round in rounds {
            out.push_str(&format!("\n## {}\n", round.round_id));
            for seed in &round.sensory_seeds {
                out.push_str(&format!("_{}_\n", seed.detail));
            }
            for (action, result) in round
                .agent_actions
                .iter()
                .zip(&round.dm_arbitration.action_results)
            {
                let verdict = match result.success {
                    ActionOutcome::Success => "succeeds",
                    ActionOutcome::Partial => "partly succeeds",
                    ActionOutcome::Failure => "fails",
                };
                out.push_str(&format!("- {} {}", action.action_description, verdict));
                if result.reason != "ok" {
                    out.push_str(&format!(" ({})", result.reason));
                }
                out.push('\n');
                if let Some(line) = &action.dialogue {
                    out.push_str(&format!("  \"{line}\"\n"));
                }
            }
        }
        Ok(out)
    }
}
