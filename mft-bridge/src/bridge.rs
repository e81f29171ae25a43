//! Lifecycle and execution contract for the classifier and entity models.
//!
//! The bridge moves `Uninitialized -> Ready -> Closed`. Initialization either
//! yields both interpreters or neither; every run is validated against the
//! model's fixed input length before the interpreter is touched.

use crate::config::{BridgeConfig, ModelContract, ModelKind, CLASSIFIER, NER};
use crate::error::{BridgeError, InitError, InputFault};
use crate::store::{ModelArtifact, ModelStore};
use mft_core::model::{CompactInterpreter, Interpreter, ModelError};
use ndarray::{Array2, ArrayD, ArrayView2};
use std::panic::{catch_unwind, AssertUnwindSafe};
use tracing::{debug, error, info, warn};

/// Builds an interpreter from a mapped artifact.
pub trait InterpreterFactory: Send {
    fn build(&self, artifact: ModelArtifact) -> Result<Box<dyn Interpreter>, ModelError>;
}

/// Runs artifacts in the compact graph format.
#[derive(Clone, Copy, Debug, Default)]
pub struct CompactRuntime;

impl InterpreterFactory for CompactRuntime {
    fn build(&self, artifact: ModelArtifact) -> Result<Box<dyn Interpreter>, ModelError> {
        Ok(Box::new(CompactInterpreter::new(artifact)?))
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BridgeState {
    Uninitialized,
    Ready,
    Closed,
}

/// Flat scores returned by a run.
#[derive(Clone, Debug, PartialEq)]
pub struct InferenceResult {
    scores: Vec<f32>,
    dims: Vec<usize>,
}

impl InferenceResult {
    pub fn scores(&self) -> &[f32] {
        &self.scores
    }

    pub fn into_scores(self) -> Vec<f32> {
        self.scores
    }

    pub fn len(&self) -> usize {
        self.scores.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scores.is_empty()
    }

    /// Logical shape without the batch dimension: `[2]` or `[256, 11]`.
    pub fn dims(&self) -> &[usize] {
        &self.dims
    }

    /// Reshape into `[rows, cols]`; a rank-1 result becomes a single row.
    pub fn to_grid(&self) -> Array2<f32> {
        let (rows, cols) = match self.dims.as_slice() {
            [rows, cols] => (*rows, *cols),
            _ => (1, self.scores.len()),
        };
        Array2::from_shape_fn((rows, cols), |(i, j)| self.scores[i * cols + j])
    }
}

/// Shapes of one loaded model.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ModelInfo {
    pub name: &'static str,
    pub input_shape: Vec<usize>,
    pub output_shape: Vec<usize>,
}

struct Models {
    classifier: Box<dyn Interpreter>,
    ner: Box<dyn Interpreter>,
}

impl Models {
    fn get_mut(&mut self, kind: ModelKind) -> &mut Box<dyn Interpreter> {
        match kind {
            ModelKind::Classifier => &mut self.classifier,
            ModelKind::Ner => &mut self.ner,
        }
    }
}

enum Slot {
    Uninitialized,
    Ready(Models),
    Closed,
}

/// Owns the two interpreter handles. Methods take `&mut self`, so calls into
/// one bridge are serialized by the borrow checker.
pub struct InferenceBridge {
    config: BridgeConfig,
    store: ModelStore,
    factory: Box<dyn InterpreterFactory>,
    slot: Slot,
}

impl InferenceBridge {
    pub fn new(config: BridgeConfig) -> Self {
        Self::with_factory(config, CompactRuntime)
    }

    pub fn with_factory<F: InterpreterFactory + 'static>(config: BridgeConfig, factory: F) -> Self {
        let store = ModelStore::new(&config.asset_root);
        Self {
            config,
            store,
            factory: Box::new(factory),
            slot: Slot::Uninitialized,
        }
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    pub fn state(&self) -> BridgeState {
        match self.slot {
            Slot::Uninitialized => BridgeState::Uninitialized,
            Slot::Ready(_) => BridgeState::Ready,
            Slot::Closed => BridgeState::Closed,
        }
    }

    /// Load both models. Returns false and stays uninitialized on any error.
    pub fn initialize(&mut self) -> bool {
        match self.try_initialize() {
            Ok(()) => true,
            Err(err) => {
                error!(error = %err, "error loading models");
                false
            }
        }
    }

    /// Like [`initialize`](Self::initialize) but reports the cause.
    pub fn try_initialize(&mut self) -> Result<(), InitError> {
        match self.slot {
            Slot::Ready(_) => {
                debug!("bridge already initialized");
                return Ok(());
            }
            Slot::Closed => return Err(InitError::Closed),
            Slot::Uninitialized => {}
        }

        let classifier = self.load(&CLASSIFIER, &self.config.classifier_path)?;
        // A failure here drops `classifier`, releasing its mapping.
        let ner = self.load(&NER, &self.config.ner_path)?;
        self.slot = Slot::Ready(Models { classifier, ner });
        info!(root = %self.config.asset_root.display(), "models loaded");
        Ok(())
    }

    fn load(&self, contract: &ModelContract, path: &str) -> Result<Box<dyn Interpreter>, InitError> {
        let artifact = self.store.load(path)?;
        let model = contract.name;
        let interpreter = catch_unwind(AssertUnwindSafe(|| self.factory.build(artifact)))
            .map_err(|_| InitError::Panicked { model })?
            .map_err(|source| InitError::Construct { model, source })?;

        let input_ok = interpreter.input_shape() == contract.input_shape().as_slice();
        let output_ok = interpreter.output_shape() == contract.output_shape;
        if !input_ok || !output_ok {
            return Err(InitError::ContractMismatch {
                model,
                expected_input: contract.input_shape().to_vec(),
                expected_output: contract.output_shape.to_vec(),
                actual_input: interpreter.input_shape().to_vec(),
                actual_output: interpreter.output_shape().to_vec(),
            });
        }
        debug!(model, path, "interpreter constructed");
        Ok(interpreter)
    }

    /// Score a 128-token sequence; two floats in training label order.
    /// Scores may be infinite for an identity head but are never NaN.
    pub fn classify(&mut self, tokens: &[i32]) -> Result<InferenceResult, BridgeError> {
        self.execute(&CLASSIFIER, tokens)
    }

    /// Score a 256-token sequence; 256 x 11 floats, position-major.
    pub fn extract_entities(&mut self, tokens: &[i32]) -> Result<InferenceResult, BridgeError> {
        self.execute(&NER, tokens)
    }

    fn execute(&mut self, contract: &ModelContract, tokens: &[i32]) -> Result<InferenceResult, BridgeError> {
        let result = self.run_checked(contract, tokens);
        match &result {
            Err(BridgeError::InvalidInput(fault)) => {
                warn!(model = contract.name, %fault, "rejected inference call");
            }
            Err(BridgeError::Inference(reason)) => {
                error!(model = contract.name, %reason, "error during inference");
            }
            Ok(_) => {}
        }
        result
    }

    fn run_checked(&mut self, contract: &ModelContract, tokens: &[i32]) -> Result<InferenceResult, BridgeError> {
        if tokens.len() != contract.input_len {
            return Err(BridgeError::InvalidInput(InputFault::Length {
                expected: contract.input_len,
                actual: tokens.len(),
            }));
        }
        let models = match &mut self.slot {
            Slot::Ready(models) => models,
            _ => return Err(BridgeError::InvalidInput(InputFault::NotReady)),
        };

        let input = ArrayView2::from_shape((1, contract.input_len), tokens)
            .map_err(|e| BridgeError::Inference(e.to_string()))?;
        let interpreter = models.get_mut(contract.kind);
        let output = catch_unwind(AssertUnwindSafe(|| interpreter.run(input)))
            .map_err(|_| BridgeError::Inference(format!("{} interpreter panicked", contract.name)))?
            .map_err(|e| BridgeError::Inference(e.to_string()))?;
        flatten(contract, output)
    }

    /// Shapes of the loaded models; empty unless ready.
    pub fn describe(&self) -> Vec<ModelInfo> {
        let Slot::Ready(models) = &self.slot else {
            return Vec::new();
        };
        [(&CLASSIFIER, &models.classifier), (&NER, &models.ner)]
            .into_iter()
            .map(|(contract, interpreter)| ModelInfo {
                name: contract.name,
                input_shape: interpreter.input_shape().to_vec(),
                output_shape: interpreter.output_shape().to_vec(),
            })
            .collect()
    }

    /// Release both interpreters and their artifacts. Safe to repeat.
    pub fn shutdown(&mut self) {
        if let Slot::Ready(_) = std::mem::replace(&mut self.slot, Slot::Closed) {
            info!("models released");
        }
    }
}

/// Flatten a `[1, ..]` output into row-major scores: for the entity model the
/// outer order is token position and the inner order is label.
fn flatten(contract: &ModelContract, output: ArrayD<f32>) -> Result<InferenceResult, BridgeError> {
    if output.shape() != contract.output_shape {
        return Err(BridgeError::Inference(format!(
            "malformed output shape {:?}, expected {:?}",
            output.shape(),
            contract.output_shape
        )));
    }
    // `iter` walks logical order whatever the memory layout.
    let scores: Vec<f32> = output.iter().copied().collect();
    // Infinite logits are legitimate for an identity head; NaN never is.
    if let Some(idx) = scores.iter().position(|v| v.is_nan()) {
        return Err(BridgeError::Inference(format!("NaN score at index {}", idx)));
    }
    Ok(InferenceResult {
        scores,
        dims: contract.output_shape[1..].to_vec(),
    })
}
