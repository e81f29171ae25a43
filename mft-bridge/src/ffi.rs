use crate::bridge::{InferenceBridge, InferenceResult};
use crate::config::BridgeConfig;
use crate::error::BridgeError;
use std::ffi::CStr;
use std::os::raw::{c_char, c_int};

pub const MFT_OK: c_int = 0;
pub const MFT_INVALID_ARGS: c_int = 1;
pub const MFT_INFERENCE_ERROR: c_int = 2;

#[no_mangle]
pub extern "C" fn mft_bridge_new(asset_root: *const c_char) -> *mut InferenceBridge {
    if asset_root.is_null() {
        return std::ptr::null_mut();
    }
    let c_str = unsafe { CStr::from_ptr(asset_root) };
    let config = BridgeConfig::new(c_str.to_string_lossy().into_owned());
    Box::into_raw(Box::new(InferenceBridge::new(config)))
}

#[no_mangle]
pub extern "C" fn mft_bridge_initialize(bridge: *mut InferenceBridge) -> bool {
    if bridge.is_null() {
        return false;
    }
    let bridge = unsafe { &mut *bridge };
    bridge.initialize()
}

/// Classify 128 tokens into `out` (capacity `out_cap`, at least 2).
#[no_mangle]
pub extern "C" fn mft_bridge_classify(
    bridge: *mut InferenceBridge,
    tokens: *const i32,
    len: usize,
    out: *mut f32,
    out_cap: usize,
    out_len: *mut usize,
) -> c_int {
    run(bridge, tokens, len, out, out_cap, out_len, InferenceBridge::classify)
}

/// Extract entity scores for 256 tokens into `out` (at least 2816 floats).
#[no_mangle]
pub extern "C" fn mft_bridge_extract_entities(
    bridge: *mut InferenceBridge,
    tokens: *const i32,
    len: usize,
    out: *mut f32,
    out_cap: usize,
    out_len: *mut usize,
) -> c_int {
    run(bridge, tokens, len, out, out_cap, out_len, InferenceBridge::extract_entities)
}

fn run(
    bridge: *mut InferenceBridge,
    tokens: *const i32,
    len: usize,
    out: *mut f32,
    out_cap: usize,
    out_len: *mut usize,
    op: fn(&mut InferenceBridge, &[i32]) -> Result<InferenceResult, BridgeError>,
) -> c_int {
    if bridge.is_null() || tokens.is_null() || out.is_null() || out_len.is_null() {
        return MFT_INVALID_ARGS;
    }
    let bridge = unsafe { &mut *bridge };
    let input = unsafe { std::slice::from_raw_parts(tokens, len) };
    let result = match op(bridge, input) {
        Ok(result) => result,
        Err(BridgeError::InvalidInput(_)) => return MFT_INVALID_ARGS,
        Err(BridgeError::Inference(_)) => return MFT_INFERENCE_ERROR,
    };
    let scores = result.scores();
    if scores.len() > out_cap {
        return MFT_INVALID_ARGS;
    }
    unsafe {
        std::ptr::copy_nonoverlapping(scores.as_ptr(), out, scores.len());
        *out_len = scores.len();
    }
    MFT_OK
}

#[no_mangle]
pub extern "C" fn mft_bridge_shutdown(bridge: *mut InferenceBridge) {
    if !bridge.is_null() {
        unsafe { (*bridge).shutdown() }
    }
}

#[no_mangle]
pub extern "C" fn mft_bridge_free(bridge: *mut InferenceBridge) {
    if !bridge.is_null() {
        unsafe { drop(Box::from_raw(bridge)); }
    }
}
