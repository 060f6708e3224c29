//! Error taxonomy for the enhancement pipeline.

use thiserror::Error;

/// Errors reachable from [`crate::Pipeline::process`] and its collaborators.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EnhanceError {
    /// Missing/oversized/untrusted model file, or backend initialization failure.
    #[error("model load failed: {reason}")]
    ModelLoadFailed { reason: String },

    /// `|audio| < N_fft` or `|audio| > F_s * D_max`.
    #[error("invalid audio length: {len} samples ({reason})")]
    InvalidAudioLength { len: usize, reason: String },

    /// NaN, infinity, or over-amplitude sample detected in the input.
    #[error("invalid audio values: {reason}")]
    InvalidAudioValues { reason: String },

    /// STFT frame not `K` bins; mask length mismatch; coefficient count
    /// mismatch; unexpected feature count.
    #[error("shape mismatch: expected {expected}, got {got}")]
    ShapeMismatch { expected: String, got: String },

    /// Required named tensor absent from a backend result.
    #[error("missing output tensor: {name}")]
    MissingOutput { name: String },

    /// Non-finite values in decoder outputs.
    #[error("invalid numeric values in {source}")]
    InvalidNumeric { source: String },

    /// Catch-all for internal invariant violations.
    #[error("processing failed: {0}")]
    ProcessingFailed(String),
}

/// Result type for the enhancement pipeline.
pub type EnhanceResult<T> = Result<T, EnhanceError>;
