//! Scripted adapter - replays a fixed list of actions.

use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use serde::Deserialize;

use super::AgentDecider;
use crate::error::Result;
use crate::model::{AgentAction, BdiState, SceneContext};

const TOP_DESIRE_LIMIT: usize = 3;

/// One step of a script, as written in a scene file.
#[derive(Debug, Clone, Deserialize)]
pub struct ScriptStep {
    pub action_type: String,
    #[serde(default)]
    pub target: String,
    #[serde(default)]
    pub dialogue: Option<String>,
    #[serde(default)]
    pub thought: Option<String>,
}

/// Agent that cycles through a script, one step per round.
#[derive(Debug)]
pub struct ScriptedAgent {
    agent_id: String,
    script: Vec<AgentAction>,
    cursor: AtomicUsize,
}

impl ScriptedAgent {
    pub fn new(agent_id: impl Into<String>, script: Vec<AgentAction>) -> Self {
        Self {
            agent_id: agent_id.into(),
            script,
            cursor: AtomicUsize::new(0),
        }
    }

    pub fn from_steps(agent_id: impl Into<String>, steps: &[ScriptStep]) -> Self {
        let agent_id = agent_id.into();
        let script = steps
            .iter()
            .map(|step| {
                let mut action = AgentAction::new(&agent_id, &step.action_type, &step.target);
                if let Some(line) = &step.dialogue {
                    action = action.with_dialogue(line);
                }
                if let Some(thought) = &step.thought {
                    action = action.with_thought(thought);
                }
                action
            })
            .collect();
        Self::new(agent_id, script)
    }

    /// Script the committed intentions of the highest-priority desires.
    pub fn from_bdi(state: &BdiState) -> Self {
        let script = state
            .top_desires(TOP_DESIRE_LIMIT)
            .into_iter()
            .filter_map(|desire| {
                state
                    .intentions
                    .iter()
                    .find(|i| i.desire_id == desire.id)
                    .map(|intention| {
                        AgentAction::new(
                            &state.agent_id,
                            intention.action_type.as_str(),
                            &intention.target,
                        )
                        .with_thought(&desire.description)
                    })
            })
            .collect();
        Self::new(state.agent_id.clone(), script)
    }
}

#[async_trait]
impl AgentDecider for ScriptedAgent {
    fn agent_id(&self) -> &str {
        &self.agent_id
    }

    async fn decide(&self, agent_id: &str, _scene: &SceneContext) -> Result<AgentAction> {
        if self.script.is_empty() {
            return Ok(AgentAction::wait(agent_id));
        }
        let step = self.cursor.fetch_add(1, Ordering::Relaxed) % self.script.len();
        tracing::debug!(agent_id = %agent_id, step, "Scripted decision");
        Ok(self.script[step].clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Desire, DesireType, Intention, IntentionActionType};

    #[tokio::test]
    async fn cycles_through_script() {
        let agent = ScriptedAgent::new(
            "alice",
            vec![
                AgentAction::new("alice", "investigate", "vault"),
                AgentAction::new("alice", "negotiate", "guard"),
            ],
        );
        let scene = SceneContext::new();
        let targets: Vec<String> = futures::future::join_all(
            (0..3).map(|_| agent.decide("alice", &scene)),
        )
        .await
        .into_iter()
        .map(|a| a.unwrap().action_target)
        .collect();
        let mut sorted = targets.clone();
        sorted.sort();
        assert_eq!(sorted, vec!["guard", "vault", "vault"]);
    }

    #[tokio::test]
    async fn empty_script_waits() {
        let agent = ScriptedAgent::new("bob", vec![]);
        let action = agent.decide("bob", &SceneContext::new()).await.unwrap();
        assert_eq!(action.action_type, "wait");
        assert!(action.dialogue.is_none());
    }

    #[test]
    fn bdi_script_follows_desire_priority() {
        let mut state = BdiState::new("carol");
        state.desires = vec![
            Desire::new("d-low", DesireType::LongTerm, "rest", 2, "rested", 0).unwrap(),
            Desire::new("d-high", DesireType::ShortTerm, "find clue", 9, "clue", 0).unwrap(),
        ];
        state.intentions = vec![
            Intention::new("i1", "d-low", IntentionActionType::Wait, "", "rested", 0.0).unwrap(),
            Intention::new("i2", "d-high", IntentionActionType::Investigate, "desk", "clue", 0.3)
                .unwrap(),
        ];
        let agent = ScriptedAgent::from_bdi(&state);
        assert_eq!(agent.script[0].action_type, "investigate");
        assert_eq!(agent.script[0].internal_thought, "find clue");
        assert_eq!(agent.script.len(), 2);
    }
}
