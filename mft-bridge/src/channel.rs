//! Method-call dispatch for the host application.
//!
//! Each channel maps a method name plus arguments onto one bridge or capture
//! operation and answers with a success payload, a coded error or
//! `NotImplemented`.

use crate::bridge::{InferenceBridge, InferenceResult};
use crate::capture::{MessageCapture, MessageSource};
use crate::error::{BridgeError, INVALID_ARGS};
use mft_core::inbox::SmsMessage;

pub const INFERENCE_CHANNEL: &str = "com.mftracker.app/tflite";
pub const SMS_CHANNEL: &str = "com.mftracker.app/sms";

#[derive(Clone, Debug, Default, PartialEq)]
pub struct Arguments {
    pub tokens: Option<Vec<i32>>,
    pub start_date: Option<i64>,
}

impl Arguments {
    pub fn tokens(tokens: Vec<i32>) -> Self {
        Self {
            tokens: Some(tokens),
            ..Self::default()
        }
    }

    pub fn start_date(start_date: i64) -> Self {
        Self {
            start_date: Some(start_date),
            ..Self::default()
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum Payload {
    Bool(bool),
    Floats(Vec<f32>),
    Messages(Vec<SmsMessage>),
}

#[derive(Clone, Debug, PartialEq)]
pub enum Reply {
    Success(Payload),
    Error { code: &'static str, message: String },
    NotImplemented,
}

impl Reply {
    fn error(code: &'static str, message: impl Into<String>) -> Self {
        Reply::Error {
            code,
            message: message.into(),
        }
    }
}

type RunFn = fn(&mut InferenceBridge, &[i32]) -> Result<InferenceResult, BridgeError>;

/// Dispatches `initialize`, `classifySMS` and `extractEntities`.
pub struct InferenceChannel {
    bridge: InferenceBridge,
}

impl InferenceChannel {
    pub fn new(bridge: InferenceBridge) -> Self {
        Self { bridge }
    }

    pub fn bridge(&self) -> &InferenceBridge {
        &self.bridge
    }

    pub fn handle(&mut self, method: &str, args: &Arguments) -> Reply {
        match method {
            "initialize" => Reply::Success(Payload::Bool(self.bridge.initialize())),
            "classifySMS" => self.run(args, InferenceBridge::classify, "Classification failed"),
            "extractEntities" => {
                self.run(args, InferenceBridge::extract_entities, "NER extraction failed")
            }
            _ => Reply::NotImplemented,
        }
    }

    fn run(&mut self, args: &Arguments, op: RunFn, failure: &str) -> Reply {
        let Some(tokens) = args.tokens.as_deref() else {
            return Reply::error(INVALID_ARGS, "Invalid tokens or handler not initialized");
        };
        match op(&mut self.bridge, tokens) {
            Ok(result) => Reply::Success(Payload::Floats(result.into_scores())),
            Err(err @ BridgeError::InvalidInput(_)) => Reply::error(
                err.code(),
                format!("Invalid tokens or handler not initialized: {}", err),
            ),
            Err(err) => Reply::error(err.code(), failure),
        }
    }

    /// Release the bridge's models.
    pub fn close(&mut self) {
        self.bridge.shutdown();
    }
}

/// Dispatches `getAllSms`.
pub struct SmsChannel<S> {
    capture: MessageCapture<S>,
}

impl<S: MessageSource> SmsChannel<S> {
    pub fn new(capture: MessageCapture<S>) -> Self {
        Self { capture }
    }

    pub fn handle(&self, method: &str, args: &Arguments) -> Reply {
        match method {
            "getAllSms" => {
                let start_date = args.start_date.unwrap_or(0);
                Reply::Success(Payload::Messages(self.capture.get_all_messages(start_date)))
            }
            _ => Reply::NotImplemented,
        }
    }
}
