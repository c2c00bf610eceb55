//! Scale configurations: one prompt template per supported `max_points`.
//!
//! Building a configuration is cheap but must happen at most once per scale
//! for the lifetime of a [`ScaleCache`], even when many evaluations race for
//! the same scale. The cache is an ordinary value shared through an `Arc`;
//! callers decide its lifetime.

use crate::backend::ScoringPrompt;
use crate::error::EvaluationError;
use crate::types::CriterionRequest;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};
use tracing::debug;

/// The closed set of scales a criterion may be marked on.
pub const SUPPORTED_SCALES: [u32; SCALE_COUNT] = [1, 2, 3, 4, 6, 10];

const SCALE_COUNT: usize = 6;

/// Prompt template for one scale.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScaleConfiguration {
    pub max_points: u32,
    /// Stable identifier, e.g. `criterion_marker_4`.
    pub name: String,
    pub instructions: String,
    pub score_description: String,
    pub reasoning_description: String,
}

impl ScaleConfiguration {
    /// Build the template for a scale. Callers should go through
    /// [`ScaleCache::get`], which validates the scale first.
    pub fn build(max_points: u32) -> Self {
        Self {
            max_points,
            name: format!("criterion_marker_{max_points}"),
            instructions: format!(
                "Grade a code snippet according to how well it meets a specific criterion \
                 on a scale of 0-{max_points}. Judge only the stated criterion; ignore style \
                 unless the criterion asks for it."
            ),
            score_description: format!("Numeric grade between 0-{max_points}"),
            reasoning_description: "Brief explanation of the score".to_string(),
        }
    }

    /// Render the prompt for a single criterion request.
    pub fn render(&self, request: &CriterionRequest) -> ScoringPrompt {
        let system = format!(
            "{}\n\nRespond in exactly this format:\nReasoning: <{}>\nScore: <{}, integer only>",
            self.instructions, self.reasoning_description, self.score_description
        );
        let user = format!(
            "Task description:\n{}\n\nCriterion:\n{}\n\nStudent code:\n```python\n{}\n```",
            request.task_description.trim(),
            request.criterion.trim(),
            request.code.trim_end()
        );
        ScoringPrompt { system, user }
    }
}

/// Returns the slot index of a supported scale.
fn slot_index(max_points: u32) -> Option<usize> {
    SUPPORTED_SCALES.iter().position(|s| *s == max_points)
}

/// True when `max_points` is one of [`SUPPORTED_SCALES`].
pub fn is_supported_scale(max_points: u32) -> bool {
    slot_index(max_points).is_some()
}

/// Lazily built, concurrency-safe cache of scale configurations.
#[derive(Debug)]
pub struct ScaleCache {
    slots: [OnceLock<Arc<ScaleConfiguration>>; SCALE_COUNT],
    builds: AtomicUsize,
}

impl ScaleCache {
    pub fn new() -> Self {
        Self {
            slots: std::array::from_fn(|_| OnceLock::new()),
            builds: AtomicUsize::new(0),
        }
    }

    /// Get the configuration for `max_points`, building it on first use.
    pub fn get(&self, max_points: u32) -> Result<Arc<ScaleConfiguration>, EvaluationError> {
        let index = slot_index(max_points).ok_or(EvaluationError::UnsupportedScale { max_points })?;
        let config = self.slots[index].get_or_init(|| {
            self.builds.fetch_add(1, Ordering::Relaxed);
            debug!(max_points, "Building scale configuration");
            Arc::new(ScaleConfiguration::build(max_points))
        });
        Ok(Arc::clone(config))
    }

    /// Number of configurations built so far.
    pub fn build_count(&self) -> usize {
        self.builds.load(Ordering::Relaxed)
    }
}

impl Default for ScaleCache {
    fn default() -> Self {
        Self::new()
    }
}
