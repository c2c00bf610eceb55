//! Confidence scoring for parsed responses.
//!
//! Confidence starts at 1.0 and each observed weakness subtracts a fixed
//! penalty. Penalties are additive and the total is clamped to `[0, 1]`, so
//! adding a penalty can never raise confidence.

use crate::parser::ResponseShape;

/// The score could not be read as a number at all.
pub const NON_NUMERIC_PENALTY: f64 = 0.7;
/// The response gave no discernible reasoning.
pub const MISSING_REASONING_PENALTY: f64 = 0.2;
/// The value had to be clamped into range.
pub const CLAMPED_PENALTY: f64 = 0.3;
/// The score field was not a bare number and the value was dug out of prose.
pub const HEURISTIC_PENALTY: f64 = 0.3;

/// Weaknesses observed while reading a response.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConfidenceSignals {
    pub non_numeric: bool,
    pub missing_reasoning: bool,
    pub clamped: bool,
    pub heuristic: bool,
}

impl ConfidenceSignals {
    /// Signals for a response shape, before numeric parsing.
    pub fn from_shape(shape: &ResponseShape, min_reasoning_chars: usize) -> Self {
        Self {
            missing_reasoning: shape.reasoning.trim().chars().count() < min_reasoning_chars,
            heuristic: !shape.score_is_bare_number(),
            ..Self::default()
        }
    }

    pub fn confidence(&self) -> f64 {
        let mut confidence = 1.0;
        if self.non_numeric {
            confidence -= NON_NUMERIC_PENALTY;
        }
        if self.missing_reasoning {
            confidence -= MISSING_REASONING_PENALTY;
        }
        if self.clamped {
            confidence -= CLAMPED_PENALTY;
        }
        if self.heuristic {
            confidence -= HEURISTIC_PENALTY;
        }
        f64::clamp(confidence, 0.0, 1.0)
    }

    pub fn penalty_count(&self) -> usize {
        [self.non_numeric, self.missing_reasoning, self.clamped, self.heuristic]
            .iter()
            .filter(|set| **set)
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::split_response;

    #[test]
    fn test_clean_response_is_fully_confident() {
        let shape = split_response("Reasoning: Handles every edge case.\nScore: 3");
        let signals = ConfidenceSignals::from_shape(&shape, 10);
        assert_eq!(signals.penalty_count(), 0);
        assert_eq!(signals.confidence(), 1.0);
    }

    #[test]
    fn test_missing_reasoning_penalty() {
        let shape = split_response("Score: 3");
        let signals = ConfidenceSignals::from_shape(&shape, 10);
        assert!(signals.missing_reasoning);
        assert!((signals.confidence() - 0.8).abs() < 1e-9);
    }

    #[test]
    fn test_heuristic_and_clamped_stack() {
        let signals = ConfidenceSignals {
            clamped: true,
            heuristic: true,
            ..Default::default()
        };
        assert!((signals.confidence() - 0.4).abs() < 1e-9);
    }

    #[test]
    fn test_all_penalties_clamp_to_zero() {
        let signals = ConfidenceSignals {
            non_numeric: true,
            missing_reasoning: true,
            clamped: true,
            heuristic: true,
        };
        assert_eq!(signals.confidence(), 0.0);
        assert_eq!(signals.penalty_count(), 4);
    }
}
