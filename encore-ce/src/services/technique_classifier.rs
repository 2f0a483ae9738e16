//! Technique classifier used when no model is configured

use super::inference::{ModelError, TechniqueClassifier};

/// Always reports the model as unavailable, so jobs run without labels
#[derive(Debug, Default)]
pub struct UnavailableTechniqueClassifier;

impl TechniqueClassifier for UnavailableTechniqueClassifier {
    fn classify(&self, _samples: &[f32], _sample_rate: u32) -> Result<Vec<String>, ModelError> {
        Err(ModelError::Unavailable(
            "no technique classification model configured".to_string(),
        ))
    }
}
