//! # speech-enhance
//!
//! Real-time, monaural, 48kHz speech enhancement: an STFT/ISTFT front end
//! with constant-overlap-add reconstruction, an ERB psychoacoustic
//! filterbank and low-frequency spectral feature extractor, and a
//! frame-synchronous inference driver running an encoder, an ERB-mask
//! decoder, and a deep-filter-coefficient decoder, in the style of
//! DeepFilterNet3.
//!
//! ## Architecture
//!
//! - [`fft`]: cached complex FFT plan (C1).
//! - [`stft`]: windowed analysis/synthesis with overlap-add (C2).
//! - [`erb`]: psychoacoustic filterbank + feature extractor (C3).
//! - [`spectral_features`]: low-frequency complex feature extractor for the
//!   deep filter path (C4).
//! - [`deep_filter`]: ERB masking + complex time-domain FIR (C5).
//! - [`pipeline`]: the per-call orchestrator and public [`Pipeline`] API (C6).
//! - [`backend`]: the narrow inference capability, with mock and `tract-onnx`
//!   backed implementations (C7).
//! - [`model_loader`]: allowlisted model bundle resolution and loading (C8).
//!
//! ## Real-time considerations
//!
//! `process` does a fixed amount of work per call (one STFT frame in, one
//! hop out) and never allocates inside the STFT engine's hot path; encoder
//! and decoder calls dominate latency and are owned entirely by the
//! [`backend::InferenceBackend`] implementation in use.

#![allow(dead_code)]

pub mod backend;
pub mod config;
pub mod deep_filter;
pub mod erb;
pub mod error;
pub mod fft;
pub mod model_loader;
pub mod pipeline;
pub mod spectral_features;
pub mod spectrum;
pub mod stft;

pub use backend::{GpuStub, InferenceBackend, MockDfDecoder, MockEncoder, MockErbDecoder, NativeBackend, Tensor};
pub use config::Config;
pub use error::{EnhanceError, EnhanceResult};
pub use model_loader::{load_bundle, ModelBundle};
pub use pipeline::{Pipeline, PipelineState};
