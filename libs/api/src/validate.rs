//! Spec validation.
//!
//! Runs at the admission boundary (spec apply), before any reconciliation.
//! A spec that fails here never reaches the strategy engine and never
//! mutates status.

use thiserror::Error;

use crate::{RolloutSpec, Step, Strategy};

/// Malformed-spec errors, reported at admission.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("rollout name cannot be empty")]
    EmptyName,

    #[error("spec.replicas must be >= 0, got {0}")]
    NegativeReplicas(i32),

    #[error("template image cannot be empty")]
    EmptyImage,

    #[error("step {index}: weight {weight} out of range [0, 100]")]
    WeightOutOfRange { index: usize, weight: i32 },

    #[error("step {index}: analysis template name cannot be empty")]
    EmptyTemplateName { index: usize },

    #[error("step {index}: experiment steps require the experiment controller, which is not configured")]
    ExperimentUnsupported { index: usize },

    #[error("blue_green pre-promotion analysis template name cannot be empty")]
    EmptyBlueGreenTemplateName,

    #[error("malformed spec: {0}")]
    Malformed(String),
}

/// Validate a rollout spec.
pub fn validate_spec(spec: &RolloutSpec) -> Result<(), ValidationError> {
    if spec.name.trim().is_empty() {
        return Err(ValidationError::EmptyName);
    }
    if spec.replicas < 0 {
        return Err(ValidationError::NegativeReplicas(spec.replicas));
    }
    if spec.template.image.trim().is_empty() {
        return Err(ValidationError::EmptyImage);
    }

    match &spec.strategy {
        Strategy::Canary(canary) => {
            for (index, step) in canary.steps.iter().enumerate() {
                validate_step(index, step)?;
            }
        }
        Strategy::BlueGreen(bg) => {
            if let Some(analysis) = &bg.pre_promotion_analysis {
                if analysis.template_name.trim().is_empty() {
                    return Err(ValidationError::EmptyBlueGreenTemplateName);
                }
            }
        }
    }

    Ok(())
}

fn validate_step(index: usize, step: &Step) -> Result<(), ValidationError> {
    match step {
        Step::SetWeight { weight } => {
            if !(0..=100).contains(weight) {
                return Err(ValidationError::WeightOutOfRange {
                    index,
                    weight: *weight,
                });
            }
        }
        Step::Pause { .. } => {}
        Step::Analysis(analysis) => {
            if analysis.template_name.trim().is_empty() {
                return Err(ValidationError::EmptyTemplateName { index });
            }
        }
        Step::Experiment { .. } => {
            return Err(ValidationError::ExperimentUnsupported { index });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;
    use crate::{CanarySpec, PodTemplate};

    fn base_spec(steps: Vec<Step>) -> RolloutSpec {
        RolloutSpec {
            name: "api".to_string(),
            replicas: 3,
            template: PodTemplate {
                image: "registry.test/api:v1".to_string(),
                command: vec![],
                env: BTreeMap::new(),
            },
            workload_ref: None,
            strategy: Strategy::Canary(CanarySpec { steps }),
            restarted_at: None,
        }
    }

    #[test]
    fn accepts_well_formed_spec() {
        let spec = base_spec(vec![
            Step::SetWeight { weight: 20 },
            Step::Pause { duration_secs: None },
        ]);
        assert_eq!(validate_spec(&spec), Ok(()));
    }

    #[test]
    fn rejects_out_of_range_weight() {
        let spec = base_spec(vec![Step::SetWeight { weight: 120 }]);
        assert_eq!(
            validate_spec(&spec),
            Err(ValidationError::WeightOutOfRange {
                index: 0,
                weight: 120
            })
        );
    }

    #[test]
    fn rejects_negative_replicas() {
        let mut spec = base_spec(vec![]);
        spec.replicas = -1;
        assert_eq!(
            validate_spec(&spec),
            Err(ValidationError::NegativeReplicas(-1))
        );
    }

    #[test]
    fn rejects_experiment_steps() {
        let spec = base_spec(vec![Step::Experiment {
            name: "shadow".to_string(),
        }]);
        assert!(matches!(
            validate_spec(&spec),
            Err(ValidationError::ExperimentUnsupported { index: 0 })
        ));
    }

    #[test]
    fn rejects_empty_analysis_template_name() {
        let spec = base_spec(vec![Step::Analysis(crate::AnalysisStepSpec {
            template_name: "  ".to_string(),
            args: BTreeMap::new(),
        })]);
        assert!(matches!(
            validate_spec(&spec),
            Err(ValidationError::EmptyTemplateName { index: 0 })
        ));
    }
}
