//! Entity resolution feeding the dependency matrix's forward index.

use std::collections::{BTreeSet, HashMap};

use serde_json::json;

use crate::adapters::StructuredGenerator;
use crate::error::Result;

/// Resolve raw mentions per scene into entity ids with one gateway call.
///
/// Mentions the gateway cannot resolve are dropped; each scene lists an
/// entity once, in first-mention order.
pub async fn resolve_scene_entities(
    generator: &dyn StructuredGenerator,
    scene_mentions: &HashMap<String, Vec<String>>,
) -> Result<HashMap<String, Vec<String>>> {
    let mentions: BTreeSet<&str> = scene_mentions
        .values()
        .flatten()
        .map(String::as_str)
        .collect();
    if mentions.is_empty() {
        return Ok(scene_mentions.keys().map(|s| (s.clone(), Vec::new())).collect());
    }

    let resolved = generator
        .generate_structured(&json!({ "mentions": mentions }))
        .await?;

    let mut forward = HashMap::with_capacity(scene_mentions.len());
    for (scene_id, raw) in scene_mentions {
        let mut entities: Vec<String> = Vec::new();
        for mention in raw {
            match resolved.get(mention) {
                Some(entity) if !entities.contains(entity) => entities.push(entity.clone()),
                Some(_) => {}
                None => tracing::debug!(scene_id = %scene_id, mention = %mention, "Unresolved mention"),
            }
        }
        forward.insert(scene_id.clone(), entities);
    }
    Ok(forward)
}
