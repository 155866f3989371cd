//! Dependency matrix - which scenes reference which story entities.

use std::collections::{BTreeSet, HashMap, HashSet};

use crate::store::SceneEntityIndex;

/// Inverted index `entity → {scene}` built from the forward `scene → [entity]` index.
#[derive(Debug, Clone, Default)]
pub struct DependencyMatrix {
    entity_to_scenes: HashMap<String, HashSet<String>>,
    scene_sequences: HashMap<String, u32>,
}

impl DependencyMatrix {
    /// Build the inverted index in one pass over all references.
    pub fn from_scene_entities<S, E>(scene_entities: &HashMap<S, Vec<E>>) -> Self
    where
        S: AsRef<str>,
        E: AsRef<str>,
    {
        let mut entity_to_scenes: HashMap<String, HashSet<String>> = HashMap::new();
        for (scene_id, entities) in scene_entities {
            for entity_id in entities {
                entity_to_scenes
                    .entry(AsRef::<str>::as_ref(entity_id).to_string())
                    .or_default()
                    .insert(AsRef::<str>::as_ref(scene_id).to_string());
            }
        }
        Self {
            entity_to_scenes,
            scene_sequences: HashMap::new(),
        }
    }

    pub fn with_sequences(mut self, scene_sequences: HashMap<String, u32>) -> Self {
        self.scene_sequences = scene_sequences;
        self
    }

    pub fn from_index(index: &SceneEntityIndex) -> Self {
        Self::from_scene_entities(&index.scene_entities)
            .with_sequences(index.scene_sequences.clone())
    }

    /// Union of scenes referencing any of `entity_ids`, sorted. Unknown entities touch nothing.
    pub fn get_impacted_scenes<E: AsRef<str>>(&self, entity_ids: &[E]) -> Vec<String> {
        let impacted: BTreeSet<&String> = entity_ids
            .iter()
            .filter_map(|id| self.entity_to_scenes.get(AsRef::<str>::as_ref(id)))
            .flatten()
            .collect();
        impacted.into_iter().cloned().collect()
    }

    /// Keep scenes sequenced strictly after `min_seq`.
    ///
    /// Scenes without a known sequence are dropped: they cannot be shown to
    /// lie in the future, and the past is never rewritten.
    pub fn filter_scenes_after<S: AsRef<str>>(&self, scene_ids: &[S], min_seq: u32) -> Vec<String> {
        scene_ids
            .iter()
            .map(AsRef::<str>::as_ref)
            .filter(|id| {
                self.scene_sequences
                    .get(*id)
                    .map_or(false, |seq| *seq > min_seq)
            })
            .map(str::to_string)
            .collect()
    }

    pub fn sequence_of(&self, scene_id: &str) -> Option<u32> {
        self.scene_sequences.get(scene_id).copied()
    }

    pub fn entity_count(&self) -> usize {
        self.entity_to_scenes.len()
    }
}
