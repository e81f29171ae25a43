//! On-device inference bridge for SMS classification and entity extraction.
//!
//! The host tokenizes message bodies into fixed-length sequences and calls
//! [`InferenceBridge::classify`] or [`InferenceBridge::extract_entities`];
//! the bridge owns both model interpreters and returns raw scores.

pub mod bridge;
pub mod capture;
pub mod channel;
pub mod config;
pub mod error;
pub mod ffi;
pub mod store;

pub use bridge::{BridgeState, CompactRuntime, InferenceBridge, InferenceResult, InterpreterFactory, ModelInfo};
pub use capture::{InboxProvider, MessageCapture, MessageSource, SmsReceiver};
pub use config::BridgeConfig;
pub use error::{BridgeError, InitError, InputFault, StoreError};
pub use ffi::*;
pub use store::{ModelArtifact, ModelStore};
