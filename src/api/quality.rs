use crate::models::BatchStats;

/// Decides whether a processed batch is worth saving
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct QualityGate {
    /// Percent of frames with a detected pose
    pub min_success_rate: f64,
    /// Percent of successful frames showing the expected exercise
    pub min_correct_exercise_rate: f64,
}

impl Default for QualityGate {
    fn default() -> Self {
        Self {
            min_success_rate: 30.0,
            min_correct_exercise_rate: 40.0,
        }
    }
}

impl QualityGate {
    pub fn is_save_worthy(&self, stats: &BatchStats) -> bool {
        stats.success_rate > self.min_success_rate
            && stats.correct_exercise_rate > self.min_correct_exercise_rate
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::summarize;

    fn stats(success_rate: f64, correct_exercise_rate: f64) -> BatchStats {
        let mut stats = summarize(&[]);
        stats.success_rate = success_rate;
        stats.correct_exercise_rate = correct_exercise_rate;
        stats
    }

    #[test]
    fn test_gate_requires_both_rates() {
        let gate = QualityGate::default();

        assert!(gate.is_save_worthy(&stats(80.0, 62.5)));
        assert!(!gate.is_save_worthy(&stats(30.0, 90.0)));
        assert!(!gate.is_save_worthy(&stats(90.0, 40.0)));
    }
}
