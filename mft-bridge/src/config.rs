//! Bridge configuration and the fixed tensor contract of each model.

use std::path::{Path, PathBuf};

pub const CLASSIFIER_MODEL_PATH: &str = "model/classifier_model.tflite";
pub const NER_MODEL_PATH: &str = "model/ner_model.tflite";

pub const CLASSIFIER_INPUT_LEN: usize = 128;
pub const CLASSIFIER_CLASSES: usize = 2;
pub const NER_INPUT_LEN: usize = 256;
pub const NER_LABELS: usize = 11;

/// Where the packaged artifacts live.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BridgeConfig {
    pub asset_root: PathBuf,
    pub classifier_path: String,
    pub ner_path: String,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            asset_root: PathBuf::from("assets"),
            classifier_path: CLASSIFIER_MODEL_PATH.to_string(),
            ner_path: NER_MODEL_PATH.to_string(),
        }
    }
}

impl BridgeConfig {
    pub fn new<P: AsRef<Path>>(asset_root: P) -> Self {
        Self {
            asset_root: asset_root.as_ref().to_path_buf(),
            ..Self::default()
        }
    }
}

/// Which of the two bridged models a call targets.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ModelKind {
    Classifier,
    Ner,
}

/// Input/output shapes a model must expose, batch dimension included.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ModelContract {
    pub kind: ModelKind,
    pub name: &'static str,
    pub input_len: usize,
    pub output_shape: &'static [usize],
}

impl ModelContract {
    pub fn input_shape(&self) -> [usize; 2] {
        [1, self.input_len]
    }

    /// Number of scores after flattening.
    pub fn output_len(&self) -> usize {
        self.output_shape.iter().product()
    }
}

pub const CLASSIFIER: ModelContract = ModelContract {
    kind: ModelKind::Classifier,
    name: "classifier",
    input_len: CLASSIFIER_INPUT_LEN,
    output_shape: &[1, CLASSIFIER_CLASSES],
};

pub const NER: ModelContract = ModelContract {
    kind: ModelKind::Ner,
    name: "ner",
    input_len: NER_INPUT_LEN,
    output_shape: &[1, NER_INPUT_LEN, NER_LABELS],
};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn output_lengths() {
        assert_eq!(CLASSIFIER.output_len(), 2);
        assert_eq!(NER.output_len(), 2816);
    }

    #[test]
    fn default_paths() {
        let config = BridgeConfig::new("/data/app");
        assert_eq!(config.asset_root, PathBuf::from("/data/app"));
        assert_eq!(config.classifier_path, CLASSIFIER_MODEL_PATH);
        assert_eq!(config.ner_path, NER_MODEL_PATH);
    }
}
