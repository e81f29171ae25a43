use mft_bridge::config::{BridgeConfig, CLASSIFIER_INPUT_LEN, NER_INPUT_LEN, NER_LABELS};
use mft_bridge::*;
use mft_core::model::{CompactGraph, GraphSpec};
use std::ffi::CString;
use tempfile::tempdir;

#[test]
fn ffi_bridge_lifecycle() {
    let dir = tempdir().unwrap();
    let config = BridgeConfig::new(dir.path());
    CompactGraph::random(GraphSpec::sequence_classifier(CLASSIFIER_INPUT_LEN, 2).with_vocab(16).with_dim(4))
        .save(dir.path().join(&config.classifier_path))
        .unwrap();
    CompactGraph::random(GraphSpec::token_classifier(NER_INPUT_LEN, NER_LABELS).with_vocab(16).with_dim(4))
        .save(dir.path().join(&config.ner_path))
        .unwrap();

    let root = CString::new(dir.path().to_str().unwrap()).unwrap();
    let bridge = mft_bridge_new(root.as_ptr());
    assert!(!bridge.is_null());

    let tokens = vec![0i32; 128];
    let mut out = vec![0f32; 4];
    let mut out_len = 0usize;

    let status = mft_bridge_classify(bridge, tokens.as_ptr(), tokens.len(), out.as_mut_ptr(), out.len(), &mut out_len);
    assert_eq!(status, MFT_INVALID_ARGS);

    assert!(mft_bridge_initialize(bridge));
    let status = mft_bridge_classify(bridge, tokens.as_ptr(), tokens.len(), out.as_mut_ptr(), out.len(), &mut out_len);
    assert_eq!(status, MFT_OK);
    assert_eq!(out_len, 2);
    assert!((out[0] + out[1] - 1.0).abs() < 1e-4);

    let ner_tokens = vec![1i32; 256];
    let mut small = vec![0f32; 10];
    let status = mft_bridge_extract_entities(
        bridge,
        ner_tokens.as_ptr(),
        ner_tokens.len(),
        small.as_mut_ptr(),
        small.len(),
        &mut out_len,
    );
    assert_eq!(status, MFT_INVALID_ARGS);

    let mut grid = vec![0f32; 2816];
    let status = mft_bridge_extract_entities(
        bridge,
        ner_tokens.as_ptr(),
        ner_tokens.len(),
        grid.as_mut_ptr(),
        grid.len(),
        &mut out_len,
    );
    assert_eq!(status, MFT_OK);
    assert_eq!(out_len, 2816);

    let oov = vec![99i32; 128];
    let status = mft_bridge_classify(bridge, oov.as_ptr(), oov.len(), out.as_mut_ptr(), out.len(), &mut out_len);
    assert_eq!(status, MFT_INFERENCE_ERROR);

    mft_bridge_shutdown(bridge);
    mft_bridge_shutdown(bridge);
    mft_bridge_free(bridge);
}

#[test]
fn ffi_tolerates_null_handles() {
    assert!(mft_bridge_new(std::ptr::null()).is_null());
    assert!(!mft_bridge_initialize(std::ptr::null_mut()));
    let mut out_len = 0usize;
    let status = mft_bridge_classify(
        std::ptr::null_mut(),
        std::ptr::null(),
        0,
        std::ptr::null_mut(),
        0,
        &mut out_len,
    );
    assert_eq!(status, MFT_INVALID_ARGS);
    mft_bridge_shutdown(std::ptr::null_mut());
    mft_bridge_free(std::ptr::null_mut());
}
