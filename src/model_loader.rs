//! Model Loader (C8, spec.md §6).
//!
//! Given a bundle directory, canonicalizes and restricts it to an
//! allowlist root, rejects relative traversal and empty paths, validates
//! file existence and size, and constructs the three native backend
//! handles for `enc.onnx`, `erb_dec.onnx`, `df_dec.onnx`.
//!
//! Grounded on the teacher's `InferenceEngine::new` existence check
//! (`inference.rs`), generalized with explicit canonicalization against an
//! allowlist because the spec requires it and the teacher's loader (which
//! loads one arbitrary path, no bundle concept) does not.

use crate::backend::NativeBackend;
use crate::error::{EnhanceError, EnhanceResult};

use std::path::{Path, PathBuf};

const MAX_MODEL_BYTES: u64 = 1 << 30; // 1 GiB

const ENCODER_INPUTS: [&str; 2] = ["erb_feat", "spec_feat"];
const STATE_OUTPUTS: [&str; 7] = ["e0", "e1", "e2", "e3", "emb", "c0", "lsnr"];

/// Loaded native backends for the three DeepFilterNet models.
pub struct ModelBundle {
    pub encoder: NativeBackend,
    pub erb_decoder: NativeBackend,
    pub df_decoder: NativeBackend,
}

/// Resolves a bundle directory against an allowlist root, rejecting empty
/// paths and any traversal outside the allowlist.
fn resolve_bundle_dir(allowlist_root: &Path, bundle_dir: &Path) -> EnhanceResult<PathBuf> {
    if bundle_dir.as_os_str().is_empty() {
        return Err(EnhanceError::ModelLoadFailed {
            reason: "empty model bundle path".into(),
        });
    }

    let root = allowlist_root.canonicalize().map_err(|e| EnhanceError::ModelLoadFailed {
        reason: format!("allowlist root {} does not exist: {e}", allowlist_root.display()),
    })?;

    let candidate = if bundle_dir.is_absolute() {
        bundle_dir.to_path_buf()
    } else {
        root.join(bundle_dir)
    };

    let resolved = candidate.canonicalize().map_err(|e| EnhanceError::ModelLoadFailed {
        reason: format!("model bundle path {} does not exist: {e}", candidate.display()),
    })?;

    if !resolved.starts_with(&root) {
        return Err(EnhanceError::ModelLoadFailed {
            reason: format!(
                "model bundle path {} escapes allowlist root {}",
                resolved.display(),
                root.display()
            ),
        });
    }

    Ok(resolved)
}

fn validate_model_file(path: &Path) -> EnhanceResult<()> {
    let meta = std::fs::metadata(path).map_err(|e| EnhanceError::ModelLoadFailed {
        reason: format!("model file {} not found: {e}", path.display()),
    })?;
    if !meta.is_file() {
        return Err(EnhanceError::ModelLoadFailed {
            reason: format!("{} is not a regular file", path.display()),
        });
    }
    if meta.len() > MAX_MODEL_BYTES {
        return Err(EnhanceError::ModelLoadFailed {
            reason: format!(
                "model file {} is {} bytes, exceeds the {} byte limit",
                path.display(),
                meta.len(),
                MAX_MODEL_BYTES
            ),
        });
    }
    Ok(())
}

/// Load the three DeepFilterNet3 models from `bundle_dir`, which must
/// resolve (after canonicalization) to a subdirectory of `allowlist_root`.
pub fn load_bundle(allowlist_root: &Path, bundle_dir: &Path) -> EnhanceResult<ModelBundle> {
    let dir = resolve_bundle_dir(allowlist_root, bundle_dir)?;

    let enc_path = dir.join("enc.onnx");
    let erb_dec_path = dir.join("erb_dec.onnx");
    let df_dec_path = dir.join("df_dec.onnx");

    validate_model_file(&enc_path)?;
    validate_model_file(&erb_dec_path)?;
    validate_model_file(&df_dec_path)?;

    let state_outputs: Vec<String> = STATE_OUTPUTS.iter().map(|s| s.to_string()).collect();
    let state_inputs = state_outputs.clone();

    let encoder = NativeBackend::load(
        &enc_path,
        ENCODER_INPUTS.iter().map(|s| s.to_string()).collect(),
        state_outputs.clone(),
    )?;
    let erb_decoder = NativeBackend::load(&erb_dec_path, state_inputs.clone(), vec!["m".to_string()])?;
    let df_decoder = NativeBackend::load(&df_dec_path, state_inputs, vec!["coefs".to_string()])?;

    Ok(ModelBundle { encoder, erb_decoder, df_decoder })
}
