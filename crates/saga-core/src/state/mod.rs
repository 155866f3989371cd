//! Shared story state - entity/scene dependency index and its build cache.

mod cache;
mod entities;
mod matrix;

pub use cache::DependencyMatrixCache;
pub use entities::resolve_scene_entities;
pub use matrix::DependencyMatrix;
