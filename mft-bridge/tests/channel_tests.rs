use mft_bridge::capture::{CaptureError, MessageCapture, MessageSource};
use mft_bridge::channel::{Arguments, InferenceChannel, Payload, Reply, SmsChannel, INFERENCE_CHANNEL, SMS_CHANNEL};
use mft_bridge::config::{BridgeConfig, CLASSIFIER_INPUT_LEN, NER_INPUT_LEN, NER_LABELS};
use mft_bridge::{BridgeState, InferenceBridge};
use mft_core::inbox::SmsMessage;
use mft_core::model::{CompactGraph, GraphSpec};
use tempfile::{tempdir, TempDir};

fn demo_assets() -> TempDir {
    let dir = tempdir().unwrap();
    let config = BridgeConfig::new(dir.path());
    CompactGraph::random(GraphSpec::sequence_classifier(CLASSIFIER_INPUT_LEN, 2).with_vocab(32).with_dim(4))
        .save(dir.path().join(&config.classifier_path))
        .unwrap();
    CompactGraph::random(GraphSpec::token_classifier(NER_INPUT_LEN, NER_LABELS).with_vocab(32).with_dim(4))
        .save(dir.path().join(&config.ner_path))
        .unwrap();
    dir
}

fn error_code(reply: &Reply) -> Option<&'static str> {
    match reply {
        Reply::Error { code, .. } => Some(*code),
        _ => None,
    }
}

#[test]
fn inference_channel_round_trip() {
    let assets = demo_assets();
    let mut channel = InferenceChannel::new(InferenceBridge::new(BridgeConfig::new(assets.path())));

    let uninit = channel.handle("classifySMS", &Arguments::tokens(vec![0; 128]));
    assert_eq!(error_code(&uninit), Some("INVALID_ARGS"));

    assert_eq!(channel.handle("initialize", &Arguments::default()), Reply::Success(Payload::Bool(true)));
    assert_eq!(channel.bridge().state(), BridgeState::Ready);

    match channel.handle("classifySMS", &Arguments::tokens(vec![1; 128])) {
        Reply::Success(Payload::Floats(scores)) => assert_eq!(scores.len(), 2),
        other => panic!("unexpected reply: {:?}", other),
    }
    match channel.handle("extractEntities", &Arguments::tokens(vec![1; 256])) {
        Reply::Success(Payload::Floats(scores)) => assert_eq!(scores.len(), 2816),
        other => panic!("unexpected reply: {:?}", other),
    }

    channel.close();
    assert_eq!(channel.bridge().state(), BridgeState::Closed);
}

#[test]
fn inference_channel_argument_errors() {
    let assets = demo_assets();
    let mut channel = InferenceChannel::new(InferenceBridge::new(BridgeConfig::new(assets.path())));
    channel.handle("initialize", &Arguments::default());

    let missing = channel.handle("classifySMS", &Arguments::default());
    assert_eq!(error_code(&missing), Some("INVALID_ARGS"));
    let short = channel.handle("extractEntities", &Arguments::tokens(vec![0; 128]));
    assert_eq!(error_code(&short), Some("INVALID_ARGS"));
    let oov = channel.handle("classifySMS", &Arguments::tokens(vec![-1; 128]));
    assert_eq!(
        oov,
        Reply::Error {
            code: "INFERENCE_ERROR",
            message: "Classification failed".into()
        }
    );
    assert_eq!(channel.handle("unknown", &Arguments::default()), Reply::NotImplemented);
}

#[test]
fn failed_initialize_reports_false() {
    let dir = tempdir().unwrap();
    let mut channel = InferenceChannel::new(InferenceBridge::new(BridgeConfig::new(dir.path())));
    assert_eq!(channel.handle("initialize", &Arguments::default()), Reply::Success(Payload::Bool(false)));
}

struct Denied;

impl MessageSource for Denied {
    fn query_inbox(&self, _start_date: i64) -> Result<Vec<SmsMessage>, CaptureError> {
        Err(CaptureError::PermissionDenied)
    }
}

struct Fixed(Vec<SmsMessage>);

impl MessageSource for Fixed {
    fn query_inbox(&self, _start_date: i64) -> Result<Vec<SmsMessage>, CaptureError> {
        Ok(self.0.clone())
    }
}

#[test]
fn sms_channel_get_all_sms() {
    let channel = SmsChannel::new(MessageCapture::new(Fixed(vec![
        SmsMessage::new("a", "one", 10),
        SmsMessage::new("b", "two", 20),
    ])));
    let reply = channel.handle("getAllSms", &Arguments::start_date(15));
    assert_eq!(reply, Reply::Success(Payload::Messages(vec![SmsMessage::new("b", "two", 20)])));

    // missing start date reads everything
    match channel.handle("getAllSms", &Arguments::default()) {
        Reply::Success(Payload::Messages(all)) => assert_eq!(all.len(), 2),
        other => panic!("unexpected reply: {:?}", other),
    }
    assert_eq!(channel.handle("deleteSms", &Arguments::default()), Reply::NotImplemented);
}

#[test]
fn sms_channel_hides_permission_errors() {
    let channel = SmsChannel::new(MessageCapture::new(Denied));
    assert_eq!(
        channel.handle("getAllSms", &Arguments::start_date(0)),
        Reply::Success(Payload::Messages(Vec::new()))
    );
}

#[test]
fn channel_names_match_host_registration() {
    assert_eq!(INFERENCE_CHANNEL, "com.mftracker.app/tflite");
    assert_eq!(SMS_CHANNEL, "com.mftracker.app/sms");
}
