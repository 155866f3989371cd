//! World master - arbitrates each round's simultaneous actions.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::model::{
    ActionOutcome, ActionResult, AgentAction, ChangeKind, ConflictKind, ConflictResolution,
    DmArbitration, EnvironmentChange, SubmittedAction, WorldState,
};

/// Action types that move the actor rather than change the target.
const MOVEMENT_ACTIONS: &[&str] = &["flee", "move"];

/// A rule an action must pass to be judged at all.
pub trait ActionRule: Send + Sync {
    fn name(&self) -> &str;

    /// `false` vetoes the action.
    fn allows(&self, action: &SubmittedAction, world: &WorldState) -> bool;
}

/// Two or more actions contending within one round.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DetectedConflict {
    pub kind: ConflictKind,
    /// Indices into the round's submitted actions, ascending.
    pub participants: Vec<usize>,
    pub target: String,
}

/// The ceiling a policy imposes on one participant's outcome.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ruling {
    pub participant: usize,
    pub outcome: ActionOutcome,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settlement {
    pub winner: Option<usize>,
    pub rulings: Vec<Ruling>,
}

/// Decides who prevails in a conflict. Must be deterministic in its inputs.
pub trait ConflictPolicy: Send + Sync {
    fn settle(
        &self,
        conflict: &DetectedConflict,
        actions: &[SubmittedAction],
        world: &WorldState,
    ) -> Settlement;
}

/// Higher power wins; equal power is broken by the lower agent id, then by
/// submission order. A mutual attack between equals is a stalemate.
#[derive(Debug, Default, Clone, Copy)]
pub struct PowerRankPolicy;

impl PowerRankPolicy {
    fn power(world: &WorldState, action: &SubmittedAction) -> f64 {
        world.power_level(&action.action.agent_id).unwrap_or(0.0)
    }

    fn rank(world: &WorldState, actions: &[SubmittedAction], a: usize, b: usize) -> Ordering {
        Self::power(world, &actions[b])
            .total_cmp(&Self::power(world, &actions[a]))
            .then_with(|| actions[a].action.agent_id.cmp(&actions[b].action.agent_id))
            .then_with(|| a.cmp(&b))
    }
}

impl ConflictPolicy for PowerRankPolicy {
    fn settle(
        &self,
        conflict: &DetectedConflict,
        actions: &[SubmittedAction],
        world: &WorldState,
    ) -> Settlement {
        let mut ranked = conflict.participants.clone();
        ranked.sort_by(|a, b| Self::rank(world, actions, *a, *b));

        match conflict.kind {
            ConflictKind::MutualAttack => {
                let (first, second) = (ranked[0], ranked[1]);
                let even = Self::power(world, &actions[first]) == Self::power(world, &actions[second]);
                if even {
                    Settlement {
                        winner: None,
                        rulings: ranked
                            .iter()
                            .map(|&participant| Ruling {
                                participant,
                                outcome: ActionOutcome::Partial,
                                reason: "stalemate".into(),
                            })
                            .collect(),
                    }
                } else {
                    Settlement {
                        winner: Some(first),
                        rulings: vec![Ruling {
                            participant: second,
                            outcome: ActionOutcome::Failure,
                            reason: "overpowered".into(),
                        }],
                    }
                }
            }
            ConflictKind::SharedTarget => Settlement {
                winner: Some(ranked[0]),
                rulings: ranked[1..]
                    .iter()
                    .map(|&participant| Ruling {
                        participant,
                        outcome: ActionOutcome::Partial,
                        reason: "contested".into(),
                    })
                    .collect(),
            },
        }
    }
}

/// The referee ("DM"). Arbitration is a pure function of the round id, the
/// submitted actions, and the world state.
#[derive(Clone)]
pub struct WorldMaster {
    rules: Vec<Arc<dyn ActionRule>>,
    policy: Arc<dyn ConflictPolicy>,
}

impl Default for WorldMaster {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for WorldMaster {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorldMaster")
            .field("rules", &self.rules.iter().map(|r| r.name().to_string()).collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

impl WorldMaster {
    pub fn new() -> Self {
        Self {
            rules: Vec::new(),
            policy: Arc::new(PowerRankPolicy),
        }
    }

    pub fn with_rule(mut self, rule: Arc<dyn ActionRule>) -> Self {
        self.rules.push(rule);
        self
    }

    pub fn with_policy(mut self, policy: Arc<dyn ConflictPolicy>) -> Self {
        self.policy = policy;
        self
    }

    /// Judge a round: one result per action, conflicts settled, deltas emitted.
    pub fn arbitrate(
        &self,
        round_id: &str,
        actions: &[AgentAction],
        world: &WorldState,
    ) -> DmArbitration {
        let submitted = SubmittedAction::number(round_id, actions);
        let mut results: Vec<ActionResult> = submitted
            .iter()
            .map(|action| self.check_action_validity(action, world))
            .collect();

        let conflicts = Self::detect_conflicts(&submitted);
        let mut conflicts_resolved = Vec::with_capacity(conflicts.len());
        for conflict in &conflicts {
            let settlement = self.policy.settle(conflict, &submitted, world);
            for ruling in settlement.rulings {
                let result = &mut results[ruling.participant];
                if ruling.outcome < result.success {
                    result.success = ruling.outcome;
                    result.reason = ruling.reason;
                }
            }
            conflicts_resolved.push(ConflictResolution {
                kind: conflict.kind,
                agents: conflict
                    .participants
                    .iter()
                    .map(|&i| submitted[i].action.agent_id.clone())
                    .collect(),
                action_ids: conflict
                    .participants
                    .iter()
                    .map(|&i| submitted[i].action_id.clone())
                    .collect(),
                target: conflict.target.clone(),
                winner: settlement
                    .winner
                    .map(|i| submitted[i].action.agent_id.clone()),
            });
        }

        let mut environment_changes = Vec::new();
        for (action, result) in submitted.iter().zip(results.iter_mut()) {
            if result.success != ActionOutcome::Success {
                continue;
            }
            if let Some(change) = Self::environment_change(action) {
                result.actual_outcome = format!("{} applied", change.effect);
                environment_changes.push(change);
            }
        }

        tracing::debug!(
            round_id = %round_id,
            actions = results.len(),
            conflicts = conflicts_resolved.len(),
            changes = environment_changes.len(),
            "Round arbitrated"
        );

        DmArbitration {
            round_id: round_id.to_string(),
            action_results: results,
            conflicts_resolved,
            environment_changes,
        }
    }

    /// Judge one action in isolation, before conflicts are considered.
    pub fn check_action_validity(&self, action: &SubmittedAction, world: &WorldState) -> ActionResult {
        let verdict = |success: ActionOutcome, reason: &str| ActionResult {
            action_id: action.action_id.clone(),
            agent_id: action.action.agent_id.clone(),
            success,
            reason: reason.to_string(),
            actual_outcome: String::new(),
        };

        if let Some(rule) = self.rules.iter().find(|r| !r.allows(action, world)) {
            tracing::debug!(action_id = %action.action_id, rule = %rule.name(), "Action vetoed");
            return verdict(ActionOutcome::Failure, "rule_violation");
        }

        if action.action.action_type == "attack" {
            let agent = &action.action.agent_id;
            let target = &action.action.action_target;
            if let (Some(own), Some(theirs)) = (world.power_level(agent), world.power_level(target)) {
                if own < theirs {
                    return verdict(ActionOutcome::Partial, "power_mismatch");
                }
            }
            if world.position_advantage(agent) == Some(false) {
                return verdict(ActionOutcome::Partial, "position_disadvantage");
            }
        }

        verdict(ActionOutcome::Success, "ok")
    }

    /// Mutual attacks pairwise, shared targets grouped per (action type, target).
    pub fn detect_conflicts(actions: &[SubmittedAction]) -> Vec<DetectedConflict> {
        let mut conflicts = Vec::new();

        for (i, a) in actions.iter().enumerate() {
            for (j, b) in actions.iter().enumerate().skip(i + 1) {
                if Self::is_mutual_attack(&a.action, &b.action) {
                    conflicts.push(DetectedConflict {
                        kind: ConflictKind::MutualAttack,
                        participants: vec![i, j],
                        target: String::new(),
                    });
                }
            }
        }

        let mut shared: BTreeMap<(&str, &str), Vec<usize>> = BTreeMap::new();
        for (i, a) in actions.iter().enumerate() {
            if a.action.is_passive() || a.action.action_target.is_empty() {
                continue;
            }
            shared
                .entry((a.action.action_type.as_str(), a.action.action_target.as_str()))
                .or_default()
                .push(i);
        }
        for ((_, target), participants) in shared {
            if participants.len() > 1 {
                conflicts.push(DetectedConflict {
                    kind: ConflictKind::SharedTarget,
                    participants,
                    target: target.to_string(),
                });
            }
        }

        conflicts
    }

    fn is_mutual_attack(a: &AgentAction, b: &AgentAction) -> bool {
        a.action_type == "attack"
            && b.action_type == "attack"
            && a.action_target == b.agent_id
            && b.action_target == a.agent_id
    }

    fn environment_change(action: &SubmittedAction) -> Option<EnvironmentChange> {
        let a = &action.action;
        if a.is_passive() || a.action_target.is_empty() {
            return None;
        }
        let kind = if MOVEMENT_ACTIONS.contains(&a.action_type.as_str()) {
            ChangeKind::LocationChange
        } else {
            ChangeKind::StateChange
        };
        Some(EnvironmentChange {
            kind,
            action_id: action.action_id.clone(),
            agent_id: a.agent_id.clone(),
            entity_id: a.action_target.clone(),
            effect: format!("{}:{}", a.action_type, a.action_target),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn world(powers: serde_json::Value) -> WorldState {
        serde_json::from_value(json!({ "power_levels": powers })).unwrap()
    }

    #[test]
    fn one_result_per_action_in_order() {
        let dm = WorldMaster::new();
        let actions = vec![
            AgentAction::new("alice", "investigate", "vault"),
            AgentAction::wait("bob"),
            AgentAction::new("carol", "negotiate", "guard"),
        ];
        let arb = dm.arbitrate("s1-1", &actions, &WorldState::default());
        assert_eq!(arb.action_results.len(), 3);
        let ids: Vec<&str> = arb.action_results.iter().map(|r| r.action_id.as_str()).collect();
        assert_eq!(ids, vec!["s1-1-0", "s1-1-1", "s1-1-2"]);
        assert!(arb.conflicts_resolved.is_empty());
        // wait produces no delta
        assert_eq!(arb.environment_changes.len(), 2);
        assert_eq!(arb.environment_changes[0].effect, "investigate:vault");
    }

    #[test]
    fn empty_round_is_empty_arbitration() {
        let arb = WorldMaster::new().arbitrate("r-1", &[], &WorldState::default());
        assert!(arb.action_results.is_empty());
        assert!(arb.conflicts_resolved.is_empty());
        assert!(arb.environment_changes.is_empty());
    }

    #[test]
    fn shared_target_goes_to_strongest() {
        let actions = vec![
            AgentAction::new("alice", "investigate", "vault"),
            AgentAction::new("bob", "investigate", "vault"),
            AgentAction::new("carol", "investigate", "vault"),
        ];
        let w = world(json!({"alice": 1.0, "bob": 5.0, "carol": 5.0}));
        let arb = WorldMaster::new().arbitrate("r-1", &actions, &w);

        assert_eq!(arb.conflicts_resolved.len(), 1);
        let conflict = &arb.conflicts_resolved[0];
        assert_eq!(conflict.kind, ConflictKind::SharedTarget);
        assert_eq!(conflict.winner.as_deref(), Some("bob"));
        assert_eq!(arb.action_results[1].success, ActionOutcome::Success);
        assert_eq!(arb.action_results[0].success, ActionOutcome::Partial);
        assert_eq!(arb.action_results[2].reason, "contested");
        assert_eq!(arb.environment_changes.len(), 1);
        assert_eq!(arb.environment_changes[0].agent_id, "bob");
    }

    #[test]
    fn mutual_attack_weaker_side_fails() {
        let actions = vec![
            AgentAction::new("alice", "attack", "bob"),
            AgentAction::new("bob", "attack", "alice"),
        ];
        let w = world(json!({"alice": 2.0, "bob": 7.0}));
        let arb = WorldMaster::new().arbitrate("r-1", &actions, &w);
        assert_eq!(arb.conflicts_resolved[0].kind, ConflictKind::MutualAttack);
        assert_eq!(arb.action_results[0].success, ActionOutcome::Failure);
        assert_eq!(arb.action_results[0].reason, "overpowered");
        assert_eq!(arb.action_results[1].success, ActionOutcome::Success);
    }

    #[test]
    fn mutual_attack_between_equals_is_stalemate() {
        let actions = vec![
            AgentAction::new("alice", "attack", "bob"),
            AgentAction::new("bob", "attack", "alice"),
        ];
        let arb = WorldMaster::new().arbitrate("r-1", &actions, &WorldState::default());
        assert!(arb.conflicts_resolved[0].winner.is_none());
        assert!(arb
            .action_results
            .iter()
            .all(|r| r.success == ActionOutcome::Partial && r.reason == "stalemate"));
        assert!(arb.environment_changes.is_empty());
    }

    #[test]
    fn attack_validity_follows_power_and_position() {
        let w: WorldState = serde_json::from_value(json!({
            "power_levels": {"alice": 1.0, "bob": 3.0, "carol": 4.0},
            "position_advantage": {"carol": false}
        }))
        .unwrap();
        let dm = WorldMaster::new();
        let weak = SubmittedAction::number("r", &[AgentAction::new("alice", "attack", "bob")]);
        assert_eq!(dm.check_action_validity(&weak[0], &w).reason, "power_mismatch");
        let exposed = SubmittedAction::number("r", &[AgentAction::new("carol", "attack", "bob")]);
        assert_eq!(dm.check_action_validity(&exposed[0], &w).reason, "position_disadvantage");
    }

    struct NoFleeing;

    impl ActionRule for NoFleeing {
        fn name(&self) -> &str {
            "no_fleeing"
        }

        fn allows(&self, action: &SubmittedAction, _world: &WorldState) -> bool {
            action.action.action_type != "flee"
        }
    }

    #[test]
    fn rules_veto_actions() {
        let dm = WorldMaster::new().with_rule(Arc::new(NoFleeing));
        let arb = dm.arbitrate(
            "r-1",
            &[AgentAction::new("alice", "flee", "forest")],
            &WorldState::default(),
        );
        assert_eq!(arb.action_results[0].success, ActionOutcome::Failure);
        assert_eq!(arb.action_results[0].reason, "rule_violation");
        assert!(arb.environment_changes.is_empty());
    }

    #[test]
    fn movement_is_a_location_change() {
        let arb = WorldMaster::new().arbitrate(
            "r-1",
            &[AgentAction::new("alice", "flee", "forest")],
            &WorldState::default(),
        );
        assert_eq!(arb.environment_changes[0].kind, ChangeKind::LocationChange);
    }

    #[test]
    fn rearbitration_is_deterministic() {
        let actions = vec![
            AgentAction::new("bob", "investigate", "vault"),
            AgentAction::new("alice", "investigate", "vault"),
            AgentAction::new("alice", "attack", "carol"),
            AgentAction::new("carol", "attack", "alice"),
        ];
        let w = world(json!({"carol": 2.0}));
        let dm = WorldMaster::new();
        assert_eq!(dm.arbitrate("r-9", &actions, &w), dm.arbitrate("r-9", &actions, &w));
    }
}
