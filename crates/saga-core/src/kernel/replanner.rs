//! Anchor replanner - restores a feasible route when an anchor drifts out of reach.

use std::sync::Arc;

use crate::config::ReplanConfig;
use crate::error::Result;
use crate::model::{
    Anchor, BridgeChapter, ConstraintType, ReplanReason, ReplanRequest, ReplanResult, WorldState,
};
use crate::state::DependencyMatrix;
use crate::store::SimulationStore;

/// How far the world is from an anchor's conditions.
#[derive(Debug, Clone, PartialEq)]
pub struct GapAnalysis {
    /// Share of conditions missing, in [0, 1].
    pub severity: f64,
    pub missing_conditions: Vec<String>,
}

/// What a replan may invalidate: the branch's dependency matrix and the
/// sequence of the scene being played.
#[derive(Debug, Clone)]
pub struct ImpactScope {
    pub matrix: Arc<DependencyMatrix>,
    pub current_seq: u32,
}

pub struct AnchorReplanner {
    store: Arc<dyn SimulationStore>,
    config: ReplanConfig,
}

impl AnchorReplanner {
    pub fn new(store: Arc<dyn SimulationStore>, config: ReplanConfig) -> Self {
        Self { store, config }
    }

    pub fn analyze_gap(world: &WorldState, conditions: &[String]) -> GapAnalysis {
        let missing_conditions: Vec<String> = conditions
            .iter()
            .filter(|c| !world.is_satisfied(c))
            .cloned()
            .collect();
        let total = conditions.len().max(1);
        GapAnalysis {
            severity: missing_conditions.len() as f64 / total as f64,
            missing_conditions,
        }
    }

    /// Replan toward `anchor` using whatever it currently lacks.
    ///
    /// Fails with a validation error when nothing is missing: a replan
    /// needs a cause.
    pub async fn replan_route(
        &self,
        current_scene: &str,
        anchor: &Anchor,
        world: &WorldState,
    ) -> Result<ReplanResult> {
        let request = ReplanRequest::new(
            current_scene,
            anchor.id.clone(),
            world.clone(),
            anchor.unmet_conditions(world),
        )?;
        self.replan(&request, anchor, None).await
    }

    /// Replan for an explicit request. Invalidated scenes are scoped
    /// before any chapter is proposed.
    pub async fn replan(
        &self,
        request: &ReplanRequest,
        anchor: &Anchor,
        scope: Option<&ImpactScope>,
    ) -> Result<ReplanResult> {
        let invalidated_scenes = match scope {
            Some(scope) => {
                let impacted = scope.matrix.get_impacted_scenes(&request.changed_entities);
                scope.matrix.filter_scenes_after(&impacted, scope.current_seq)
            }
            None => Vec::new(),
        };

        let gap = Self::analyze_gap(&request.world_state_snapshot, &anchor.required_conditions);

        let mut result = if gap.severity < self.config.recoverable_severity {
            let chapters = self.bridge_chapters(request.failed_conditions());
            let chapters = self.materialize(anchor, chapters).await?;
            ReplanResult::from_reason(true, chapters, None, ReplanReason::Recoverable)
        } else {
            match anchor.constraint_type {
                ConstraintType::Soft => {
                    let softened = Anchor {
                        constraint_type: ConstraintType::Soft,
                        ..anchor.clone()
                    };
                    ReplanResult::from_reason(true, Vec::new(), Some(softened), ReplanReason::SoftAnchor)
                }
                ConstraintType::Flexible => {
                    let equivalent = Anchor {
                        required_conditions: anchor
                            .required_conditions
                            .iter()
                            .filter(|c| !gap.missing_conditions.contains(c))
                            .cloned()
                            .collect(),
                        description: if anchor.description.is_empty() {
                            "equivalent checkpoint".to_string()
                        } else {
                            format!("{} (equivalent)", anchor.description)
                        },
                        ..anchor.clone()
                    };
                    ReplanResult::from_reason(
                        true,
                        Vec::new(),
                        Some(equivalent),
                        ReplanReason::FlexibleAnchor,
                    )
                }
                ConstraintType::Hard => ReplanResult::from_reason(
                    false,
                    Vec::new(),
                    None,
                    ReplanReason::HardAnchorUnreachable,
                ),
            }
        };
        result.invalidated_scenes = invalidated_scenes;

        tracing::info!(
            scene_id = %request.current_scene_id,
            anchor_id = %anchor.id,
            severity = gap.severity,
            success = result.success,
            reason = %result.reason(),
            invalidated = result.invalidated_scenes.len(),
            "Replanned route"
        );
        Ok(result)
    }

    fn bridge_chapters(&self, missing: &[String]) -> Vec<BridgeChapter> {
        missing
            .iter()
            .take(self.config.max_bridge_chapters)
            .enumerate()
            .map(|(i, goal)| BridgeChapter {
                id: None,
                title: format!("bridge_{}", i + 1),
                goal: goal.clone(),
            })
            .collect()
    }

    /// Persist bridging chapters under the story's latest act, creating one
    /// if the story has none. Anchors without a root stay proposals.
    async fn materialize(
        &self,
        anchor: &Anchor,
        mut chapters: Vec<BridgeChapter>,
    ) -> Result<Vec<BridgeChapter>> {
        let Some(root_id) = anchor.root_id.as_deref() else {
            return Ok(chapters);
        };
        if chapters.is_empty() {
            return Ok(chapters);
        }

        let acts = self.store.list_acts(root_id).await?;
        let act = match acts.into_iter().last() {
            Some(act) => act,
            None => {
                self.store
                    .create_act(root_id, 1, "Bridge", "restore the route to the next anchor", "tense")
                    .await?
            }
        };

        let existing = self.store.list_chapters(&act.id).await?;
        let mut seq = existing.iter().map(|c| c.sequence).max().unwrap_or(0);
        for chapter in &mut chapters {
            seq += 1;
            let record = self
                .store
                .create_chapter(&act.id, seq, &chapter.title, &chapter.goal)
                .await?;
            chapter.id = Some(record.id);
        }
        Ok(chapters)
    }
}
