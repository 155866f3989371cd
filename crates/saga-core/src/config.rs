//! Kernel configuration loading and management.

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::error::SagaError;

/// Floor for any generation or decision timeout, in seconds.
pub const MIN_TIMEOUT_SECONDS: u64 = 600;

/// Main configuration, loaded from .saga/config.yaml
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SagaConfig {
    /// Config version
    pub version: Option<String>,

    /// Round loop tuning
    pub simulation: SimulationConfig,

    /// Generation backend and timeouts
    pub generation: GenerationConfig,

    /// Bounds on the number of scenes in a story
    pub scenes: SceneBounds,

    /// Replanning tuning
    pub replan: ReplanConfig,
}

/// Round loop configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    /// Hard cap on rounds per scene
    pub max_rounds: u32,

    /// Consecutive stagnant rounds before the scene halts
    pub stagnation_ceiling: u32,

    /// Info gain below this counts as no new information
    pub info_gain_floor: f64,

    /// Distance above which convergence may be needed
    pub convergence_threshold: f64,

    /// Rounds remaining at or below which convergence is enforced
    pub safety_margin_rounds: u32,

    /// Distance above which a hard anchor is replanned immediately
    pub replan_distance: f64,

    /// Convergence score that ends the scene
    pub end_scene_score: f64,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            max_rounds: 5,
            stagnation_ceiling: 3,
            info_gain_floor: 0.1,
            convergence_threshold: 0.7,
            safety_margin_rounds: 2,
            replan_distance: 0.9,
            end_scene_score: 0.9,
        }
    }
}

/// Generation backend configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationConfig {
    /// Backend name ("scripted" drives agents from the scene file)
    pub backend: Option<String>,

    /// Per-call timeout; must be at least MIN_TIMEOUT_SECONDS
    pub timeout_secs: u64,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            backend: Some("scripted".to_string()),
            timeout_secs: MIN_TIMEOUT_SECONDS,
        }
    }
}

impl GenerationConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SceneBounds {
    pub min_count: u32,
    pub max_count: u32,
}

impl Default for SceneBounds {
    fn default() -> Self {
        Self {
            min_count: 50,
            max_count: 100,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReplanConfig {
    /// Maximum bridging chapters proposed per replan
    pub max_bridge_chapters: usize,

    /// Gap severity below which the route is recoverable
    pub recoverable_severity: f64,
}

impl Default for ReplanConfig {
    fn default() -> Self {
        Self {
            max_bridge_chapters: 3,
            recoverable_severity: 0.7,
        }
    }
}

fn unit_interval(name: &str, value: f64) -> Result<(), SagaError> {
    if (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(SagaError::config(format!("{name} must be in [0, 1], got {value}")))
    }
}

impl SagaConfig {
    /// Load configuration from a YAML file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config from {}", path.display()))?;
        let mut config: Self = serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse config from {}", path.display()))?;
        config.apply_env_overrides(|name| std::env::var(name).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Load from project root (looks for .saga/config.yaml)
    pub fn load_from_project(project_root: &Path) -> Result<Self> {
        let config_path = project_root.join(".saga/config.yaml");
        if config_path.exists() {
            Self::load(&config_path)
        } else {
            let mut config = Self::default();
            config.apply_env_overrides(|name| std::env::var(name).ok())?;
            config.validate()?;
            Ok(config)
        }
    }

    /// Apply SAGA_* overrides. `lookup` is injected so tests need not touch the process env.
    pub fn apply_env_overrides<F>(&mut self, lookup: F) -> Result<(), SagaError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let positive = |name: &str| -> Result<Option<u64>, SagaError> {
            match lookup(name) {
                None => Ok(None),
                Some(raw) => {
                    let value: u64 = raw
                        .trim()
                        .parse()
                        .map_err(|_| SagaError::config(format!("{name} must be an integer")))?;
                    if value == 0 {
                        return Err(SagaError::config(format!("{name} must be > 0")));
                    }
                    Ok(Some(value))
                }
            }
        };

        if let Some(secs) = positive("SAGA_TIMEOUT_SECONDS")? {
            self.generation.timeout_secs = secs;
        }
        if let Some(min) = positive("SAGA_SCENE_MIN_COUNT")? {
            self.scenes.min_count = u32::try_from(min)
                .map_err(|_| SagaError::config("SAGA_SCENE_MIN_COUNT is out of range"))?;
        }
        if let Some(max) = positive("SAGA_SCENE_MAX_COUNT")? {
            self.scenes.max_count = u32::try_from(max)
                .map_err(|_| SagaError::config("SAGA_SCENE_MAX_COUNT is out of range"))?;
        }
        if let Some(backend) = lookup("SAGA_LLM_BACKEND") {
            self.generation.backend = Some(backend);
        }
        Ok(())
    }

    /// Reject misconfiguration before anything runs.
    pub fn validate(&self) -> Result<(), SagaError> {
        if self.generation.timeout_secs < MIN_TIMEOUT_SECONDS {
            return Err(SagaError::config(format!(
                "generation timeout must be >= {MIN_TIMEOUT_SECONDS}s, got {}s",
                self.generation.timeout_secs
            )));
        }
        match self.generation.backend.as_deref().map(str::trim) {
            Some(name) if !name.is_empty() => {}
            _ => return Err(SagaError::config("llm backend is required")),
        }
        if self.scenes.min_count == 0 || self.scenes.max_count == 0 {
            return Err(SagaError::config("scene counts must be > 0"));
        }
        if self.scenes.min_count > self.scenes.max_count {
            return Err(SagaError::config(
                "scene min_count must be <= max_count",
            ));
        }

        let sim = &self.simulation;
        if sim.max_rounds == 0 {
            return Err(SagaError::config("max_rounds must be >= 1"));
        }
        if sim.stagnation_ceiling == 0 {
            return Err(SagaError::config("stagnation_ceiling must be >= 1"));
        }
        unit_interval("info_gain_floor", sim.info_gain_floor)?;
        unit_interval("convergence_threshold", sim.convergence_threshold)?;
        unit_interval("replan_distance", sim.replan_distance)?;
        unit_interval("end_scene_score", sim.end_scene_score)?;
        unit_interval("recoverable_severity", self.replan.recoverable_severity)?;
        if !self.loop_can_bridge() {
            tracing::warn!(
                convergence_threshold = sim.convergence_threshold,
                recoverable_severity = self.replan.recoverable_severity,
                "Round loop replans only above the convergence threshold; bridging chapters are unreachable"
            );
        }
        Ok(())
    }

    /// Whether a replan triggered by the round loop can end in bridging
    /// chapters. The loop replans only when distance exceeds the convergence
    /// threshold, and gap severity is the same measure as distance.
    pub fn loop_can_bridge(&self) -> bool {
        self.simulation.convergence_threshold < self.replan.recoverable_severity
    }
}

/// Default config written by `saga init`.
pub const DEFAULT_CONFIG_YAML: &str = r#"# Saga simulation configuration

# The loop replans a hard anchor only once its distance exceeds
# convergence_threshold. Gap severity equals that distance, so bridging
# chapters need convergence_threshold < replan.recoverable_severity. With
# the values below every loop replan is either soft/flexible relaxation or
# hard_anchor_unreachable.
simulation:
  max_rounds: 5
  stagnation_ceiling: 3
  info_gain_floor: 0.1
  convergence_threshold: 0.7
  safety_margin_rounds: 2
  replan_distance: 0.9
  end_scene_score: 0.9

generation:
  backend: scripted
  # never below 600
  timeout_secs: 600

scenes:
  min_count: 50
  max_count: 100

replan:
  max_bridge_chapters: 3
  recoverable_severity: 0.7
"#;
