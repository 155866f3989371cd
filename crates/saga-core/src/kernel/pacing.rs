//! Advisory outputs of the world master: pacing directives and sensory seeds.

use sha2::{Digest, Sha256};

use super::arbitrator::WorldMaster;
use crate::error::Result;
use crate::model::{PacingDirective, PacingKind, SceneContext, SeedType, SensorySeed, SimulationRoundResult};

/// Rounds considered by pacing.
const PACING_WINDOW: usize = 3;

/// Average info gain over the window below which an incident is injected.
const STALL_INFO_GAIN: f64 = 0.2;

const SEED_TYPES: [SeedType; 4] = [
    SeedType::Weather,
    SeedType::AmbientSound,
    SeedType::CharacterGesture,
    SeedType::ObjectDetail,
];

fn detail_pool(seed_type: SeedType) -> &'static [&'static str] {
    match seed_type {
        SeedType::Weather => &[
            "a thin drizzle beads on the windows",
            "wind worries at loose shutters",
            "fog hangs low over the street",
            "the air is heavy before a storm",
        ],
        SeedType::AmbientSound => &[
            "a dog barks somewhere far off",
            "floorboards creak overhead",
            "a kettle starts to whistle",
            "distant bells mark the hour",
        ],
        SeedType::CharacterGesture => &[
            "fingers drum against a sleeve",
            "a glance slides toward the door",
            "shoulders stiffen for a moment",
            "a thumb traces the edge of a ring",
        ],
        SeedType::ObjectDetail => &[
            "a candle gutters in its dish",
            "dust outlines a missing frame",
            "a letter lies face down on the desk",
            "a chipped cup still holds warm tea",
        ],
    }
}

impl WorldMaster {
    /// Pacing over the last rounds: stalled information asks for an incident,
    /// strictly falling drama asks for escalation.
    pub fn monitor_pacing(&self, rounds: &[SimulationRoundResult]) -> PacingDirective {
        let recent = &rounds[rounds.len().saturating_sub(PACING_WINDOW)..];
        if recent.is_empty() {
            return PacingDirective::none();
        }

        let avg_info_gain = recent.iter().map(|r| r.info_gain).sum::<f64>() / recent.len() as f64;
        if avg_info_gain < STALL_INFO_GAIN {
            return PacingDirective::new(PacingKind::InjectIncident, "stagnation");
        }

        let deescalating = recent.len() == PACING_WINDOW
            && recent
                .windows(2)
                .all(|pair| pair[0].drama_score > pair[1].drama_score);
        if deescalating {
            return PacingDirective::new(PacingKind::ForceEscalation, "deescalation");
        }

        PacingDirective::none()
    }

    /// One or two seeds derived from a digest of the scene, so an unchanged
    /// scene always yields the same seeds.
    pub fn inject_sensory_seeds(&self, scene: &SceneContext) -> Result<Vec<SensorySeed>> {
        // serde_json maps are ordered by key, so the encoding is canonical
        let encoded = serde_json::to_vec(scene.as_map())?;
        let digest = Sha256::digest(&encoded);

        let seed_value = u32::from_be_bytes([digest[0], digest[1], digest[2], digest[3]]) as usize;
        let seed_count = 1 + seed_value % 2;
        let offset = seed_value % SEED_TYPES.len();

        let text = |key: &str| scene.get(key).and_then(|v| v.as_str()).filter(|s| !s.is_empty());
        let weather = text("weather");
        let mood = text("mood");
        let char_id = text("char_id").or_else(|| text("character_id"));

        let mut seeds = Vec::with_capacity(seed_count);
        for idx in 0..seed_count {
            let seed_type = SEED_TYPES[(offset + idx) % SEED_TYPES.len()];
            let pool = detail_pool(seed_type);
            let mut detail = pool[digest[4 + idx] as usize % pool.len()].to_string();

            match (seed_type, weather, mood) {
                (SeedType::Weather, Some(w), _) => detail = format!("the smell of {w} seeps into the air"),
                (SeedType::AmbientSound, _, Some(m)) => detail = format!("{detail}; the mood turns {m}"),
                _ => {}
            }

            seeds.push(SensorySeed {
                seed_type,
                detail,
                char_id: match seed_type {
                    SeedType::CharacterGesture => char_id.map(str::to_string),
                    _ => None,
                },
            });
        }

        tracing::trace!(seeds = seeds.len(), digest = %hex::encode(&digest[..4]), "Sensory seeds");
        Ok(seeds)
    }
}
