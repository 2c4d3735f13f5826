use crate::error::StagePlanError;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Longest accepted stage, one day
pub const MAX_DURATION_SECS: i64 = 24 * 60 * 60;
/// Longest accepted capture interval, one hour
pub const MAX_INTERVAL_MS: i64 = 60 * 60 * 1000;

/// Stage definition as it appears in configuration files. Every field is
/// optional here so that a missing field can be reported by name.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RawStageConfig {
    pub identifier: Option<String>,
    pub label: Option<String>,
    pub description: Option<String>,
    pub prompts: Option<Vec<String>>,
    pub duration_secs: Option<i64>,
    pub interval_ms: Option<i64>,
}

/// Validated, immutable definition of one capture stage
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StageConfig {
    /// Short identifier, used for folder and file names
    pub identifier: String,
    /// Human readable label shown while the stage runs
    pub label: String,
    pub description: String,
    /// Messages played by the prompt sequencer before recording
    pub prompts: Vec<String>,
    pub duration_secs: u64,
    pub interval_ms: u64,
}

impl StageConfig {
    pub fn duration(&self) -> Duration {
        Duration::from_secs(self.duration_secs)
    }

    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    /// Number of capture ticks the stage is configured for
    pub fn configured_frames(&self) -> u64 {
        self.duration_secs.saturating_mul(1000) / self.interval_ms.max(1)
    }

    /// Sub-folder name for this stage at the given zero-based position
    pub fn folder_name(&self, index: usize) -> String {
        format!("stage_{}_{}", index + 1, self.identifier)
    }

    fn from_raw(stage: usize, raw: &RawStageConfig) -> Result<Self, StagePlanError> {
        let identifier = raw
            .identifier
            .as_ref()
            .ok_or(StagePlanError::MissingField {
                stage,
                field: "identifier",
            })?
            .trim()
            .to_string();

        if identifier.is_empty() {
            return Err(StagePlanError::InvalidField {
                stage,
                field: "identifier",
                reason: "must not be empty".to_string(),
            });
        }

        if identifier
            .chars()
            .any(|c| matches!(c, '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|'))
            || identifier == "."
            || identifier == ".."
        {
            return Err(StagePlanError::InvalidField {
                stage,
                field: "identifier",
                reason: format!("'{}' cannot be used as a folder name", identifier),
            });
        }

        let label = raw.label.clone().unwrap_or_else(|| identifier.clone());
        let description = raw.description.clone().unwrap_or_default();

        let prompts = raw.prompts.clone().ok_or(StagePlanError::MissingField {
            stage,
            field: "prompts",
        })?;

        let duration_secs = bounded(stage, "duration_secs", raw.duration_secs, MAX_DURATION_SECS)?;
        let interval_ms = bounded(stage, "interval_ms", raw.interval_ms, MAX_INTERVAL_MS)?;

        Ok(Self {
            identifier,
            label,
            description,
            prompts,
            duration_secs,
            interval_ms,
        })
    }
}

fn bounded(
    stage: usize,
    field: &'static str,
    value: Option<i64>,
    max: i64,
) -> Result<u64, StagePlanError> {
    match value {
        None => Err(StagePlanError::MissingField { stage, field }),
        Some(v) if v <= 0 => Err(StagePlanError::NonPositive {
            stage,
            field,
            value: v,
        }),
        Some(v) if v > max => Err(StagePlanError::TooLarge {
            stage,
            field,
            value: v,
            max,
        }),
        Some(v) => Ok(v as u64),
    }
}

/// Ordered, validated list of stages for one capture session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagePlan {
    stages: Vec<StageConfig>,
}

impl StagePlan {
    /// Validate raw stage definitions. Nothing is returned unless every stage
    /// is valid.
    pub fn from_raw(raw: &[RawStageConfig]) -> Result<Self, StagePlanError> {
        if raw.is_empty() {
            return Err(StagePlanError::Empty);
        }

        let stages = raw
            .iter()
            .enumerate()
            .map(|(i, stage)| StageConfig::from_raw(i + 1, stage))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self { stages })
    }

    /// The built-in five stage eye capture plan
    pub fn eye_default() -> Self {
        Self::from_raw(&default_raw_stages()).unwrap_or_else(|_| Self { stages: Vec::new() })
    }

    pub fn stages(&self) -> &[StageConfig] {
        &self.stages
    }

    pub fn get(&self, index: usize) -> Option<&StageConfig> {
        self.stages.get(index)
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }
}

fn raw_stage(
    identifier: &str,
    label: &str,
    description: &str,
    prompts: &[&str],
    duration_secs: i64,
    interval_ms: i64,
) -> RawStageConfig {
    RawStageConfig {
        identifier: Some(identifier.to_string()),
        label: Some(label.to_string()),
        description: Some(description.to_string()),
        prompts: Some(prompts.iter().map(|p| p.to_string()).collect()),
        duration_secs: Some(duration_secs),
        interval_ms: Some(interval_ms),
    }
}

/// Raw form of the default plan, also used for `--print-config`
pub fn default_raw_stages() -> Vec<RawStageConfig> {
    vec![
        raw_stage(
            "blink",
            "Normal blinking",
            "Eyes open, look around and blink normally",
            &[
                "Keep your eyes normally open",
                "Look around and blink as usual",
                "Stay relaxed",
            ],
            30,
            300,
        ),
        raw_stage(
            "closed",
            "Eyes closed",
            "Close your eyes and keep them closed",
            &[
                "Please close your eyes",
                "Keep them closed",
                "Relax the muscles around your eyes",
            ],
            32,
            400,
        ),
        raw_stage(
            "wide_blink",
            "Deliberate blinking",
            "Make large, deliberate blinks",
            &[
                "Please blink with large movements",
                "Squeeze your eyes shut, then open wide",
                "Keep repeating the blink",
            ],
            30,
            250,
        ),
        raw_stage(
            "rolling",
            "Eye rolling",
            "Move your eyes left, right, up and down without turning your head",
            &[
                "Move your eyes left, right, up and down",
                "Do not turn your head, only your eyes",
                "Move your eyes slowly",
            ],
            32,
            350,
        ),
        raw_stage(
            "half_open",
            "Half open",
            "Slowly narrow your eyes as if you were getting sleepy",
            &[
                "Keep your eyes half open",
                "Like when you are about to fall asleep",
                "Your eyelids may droop slightly",
            ],
            30,
            500,
        ),
    ]
}
