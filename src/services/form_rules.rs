/// Form Rule Engine
///
/// Per-exercise rule tables (metric -> acceptable range, ideal, severity)
/// and their evaluation against a frame's angles:
/// - a rule passes when `min <= value <= max`
/// - the form score is the product of `(1 - severity)` over failed rules
/// - issue messages name the direction and flag large deviations
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

use crate::models::{
    round_to, AngleMetric, AngleSet, ExerciseKind, FormCheck, FormIssue, FormRule,
};

#[derive(Error, Debug, PartialEq)]
pub enum RuleTableError {
    #[error("No rules defined for {0}")]
    MissingExercise(ExerciseKind),
    #[error("Rule {metric} for {exercise} is invalid: {reason}")]
    InvalidRule {
        exercise: ExerciseKind,
        metric: AngleMetric,
        reason: String,
    },
    #[error("Rule {metric} is defined twice for {exercise}")]
    DuplicateRule {
        exercise: ExerciseKind,
        metric: AngleMetric,
    },
    #[error("Failed to parse rule table: {0}")]
    Parse(String),
}

/// One entry of an exercise's rule list
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RuleEntry {
    pub metric: AngleMetric,
    #[serde(flatten)]
    pub rule: FormRule,
}

/// Rules per exercise, evaluated in table order. Immutable once built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FormRuleSet {
    rules: HashMap<ExerciseKind, Vec<RuleEntry>>,
}

impl FormRuleSet {
    /// Build and validate a rule table
    pub fn new(rules: HashMap<ExerciseKind, Vec<RuleEntry>>) -> Result<Self, RuleTableError> {
        let table = Self { rules };
        table.validate()?;
        Ok(table)
    }

    /// Parse a JSON rule table: `{"pushup": [{"metric": "elbow_angle", "min": .., ..}], ..}`
    pub fn from_json(json: &str) -> Result<Self, RuleTableError> {
        let rules: HashMap<ExerciseKind, Vec<RuleEntry>> =
            serde_json::from_str(json).map_err(|e| RuleTableError::Parse(e.to_string()))?;
        Self::new(rules)
    }

    /// Reference thresholds for all supported exercises
    pub fn reference() -> Self {
        use AngleMetric::*;

        let table = |entries: &[(AngleMetric, f64, f64, f64, f64)]| -> Vec<RuleEntry> {
            entries
                .iter()
                .map(|&(metric, min, max, ideal, severity)| RuleEntry {
                    metric,
                    rule: FormRule::new(min, max, ideal, severity),
                })
                .collect()
        };

        let mut rules = HashMap::new();
        rules.insert(
            ExerciseKind::Pushup,
            table(&[
                (ElbowAngle, 80.0, 120.0, 90.0, 0.3),
                (BackAngle, -10.0, 10.0, 0.0, 0.4),
                (HipAlignment, 0.3, 0.7, 0.5, 0.2),
                (ShoulderStability, 0.6, 1.0, 0.8, 0.1),
            ]),
        );
        rules.insert(
            ExerciseKind::ShoulderPress,
            table(&[
                (ArmExtension, 160.0, 180.0, 170.0, 0.3),
                (BackStraightness, -5.0, 5.0, 0.0, 0.4),
                (CoreEngagement, 0.7, 1.0, 0.9, 0.2),
                (WristAlignment, -10.0, 10.0, 0.0, 0.1),
            ]),
        );
        rules.insert(
            ExerciseKind::TBarRow,
            table(&[
                (BackAngle, 10.0, 30.0, 20.0, 0.3),
                (ElbowAngle, 70.0, 110.0, 90.0, 0.3),
                (HipHinge, 20.0, 40.0, 30.0, 0.2),
                (ShoulderRetraction, 0.6, 1.0, 0.8, 0.2),
            ]),
        );

        Self { rules }
    }

    pub fn rules_for(&self, exercise: ExerciseKind) -> &[RuleEntry] {
        self.rules.get(&exercise).map(Vec::as_slice).unwrap_or(&[])
    }

    fn validate(&self) -> Result<(), RuleTableError> {
        for exercise in ExerciseKind::ALL {
            let entries = self
                .rules
                .get(&exercise)
                .filter(|entries| !entries.is_empty())
                .ok_or(RuleTableError::MissingExercise(exercise))?;

            for (position, entry) in entries.iter().enumerate() {
                let rule = entry.rule;
                let invalid = |reason: &str| RuleTableError::InvalidRule {
                    exercise,
                    metric: entry.metric,
                    reason: reason.to_string(),
                };

                if ![rule.min, rule.max, rule.ideal, rule.severity].iter().all(|v| v.is_finite()) {
                    return Err(invalid("values must be finite"));
                }
                if rule.min > rule.max {
                    return Err(invalid("min is greater than max"));
                }
                if rule.ideal < rule.min || rule.ideal > rule.max {
                    return Err(invalid("ideal lies outside [min, max]"));
                }
                if rule.severity <= 0.0 || rule.severity > 1.0 {
                    return Err(invalid("severity must be in (0, 1]"));
                }
                if entries[..position].iter().any(|e| e.metric == entry.metric) {
                    return Err(RuleTableError::DuplicateRule {
                        exercise,
                        metric: entry.metric,
                    });
                }
            }
        }
        Ok(())
    }
}

impl Default for FormRuleSet {
    fn default() -> Self {
        Self::reference()
    }
}

/// Evaluates angle sets against a shared rule table
#[derive(Debug, Clone)]
pub struct FormRuleEngine {
    rules: Arc<FormRuleSet>,
    far_from_ideal_ratio: f64,
}

impl FormRuleEngine {
    pub fn new(rules: Arc<FormRuleSet>) -> Self {
        Self {
            rules,
            far_from_ideal_ratio: 0.5,
        }
    }

    /// Deviation (as a fraction of the ideal) past which an issue is "far from ideal"
    pub fn with_far_from_ideal_ratio(mut self, ratio: f64) -> Self {
        self.far_from_ideal_ratio = ratio.max(0.0);
        self
    }

    pub fn rules(&self) -> &FormRuleSet {
        &self.rules
    }

    /// Check one frame's angles against the exercise's rules
    pub fn check(&self, angles: &AngleSet, exercise: ExerciseKind) -> FormCheck {
        let mut issues = Vec::new();
        let mut score = 1.0;

        for entry in self.rules.rules_for(exercise) {
            let rule = entry.rule;
            let actual = angles.get(entry.metric).unwrap_or(0.0);
            if rule.contains(actual) {
                continue;
            }

            let (direction, difference) = if actual < rule.min {
                ("too low", rule.min - actual)
            } else {
                ("too high", actual - rule.max)
            };

            let mut message = format!("{} {}", entry.metric.label(), direction);
            if difference > rule.ideal.abs() * self.far_from_ideal_ratio {
                message.push_str(" (far from ideal)");
            }

            score *= 1.0 - rule.severity;
            issues.push(FormIssue {
                rule_name: entry.metric,
                message,
                actual: round_to(actual, 1),
                expected_range: format!("{} - {}", rule.min, rule.max),
                severity: rule.severity,
                difference: round_to(difference, 1),
            });
        }

        FormCheck {
            is_correct: issues.is_empty(),
            score: f64::max(score, 0.0),
            issues,
        }
    }
}
