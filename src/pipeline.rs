//! Enhancement Pipeline (C6).
//!
//! The frame-synchronous orchestrator: STFT → features → inference →
//! masking/filtering → ISTFT → overlap buffer → one-hop output. Owns its
//! STFT engine, feature extractors, and overlap buffer exclusively; the
//! inference backends are referenced behind the [`crate::backend::InferenceBackend`]
//! capability and their session ownership stays opaque to the pipeline.

use crate::backend::{InferenceBackend, Tensor, STATE_KEYS};
use crate::config::Config;
use crate::deep_filter;
use crate::erb::{ErbFeatureExtractor, ErbFilterbank};
use crate::error::{EnhanceError, EnhanceResult};
use crate::model_loader::{self, ModelBundle};
use crate::spectral_features::SpectralFeatureExtractor;
use crate::stft::StftEngine;

use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Coarse pipeline state, derived from the overlap buffer and neural state
/// slot rather than tracked explicitly; `Error` is transient (set on the
/// last failed call, cleared on the next successful one or on `reset`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    /// No prior successful inference.
    Fresh,
    /// Overlap buffer non-empty or neural state present.
    Streaming,
    /// The last call to `process` failed. Not sticky — the next call is
    /// attempted normally regardless of this state.
    Error,
}

/// Resources guarded by the processing lock: the overlap buffer and,
/// implicitly through [`StftEngine`]'s own internal lock, the STFT scratch
/// buffers.
struct ProcessingResources {
    overlap: VecDeque<f32>,
}

/// Frame-synchronous real-time speech enhancement pipeline.
pub struct Pipeline {
    config: Config,
    stft: StftEngine,
    #[allow(dead_code)]
    erb_fb: Arc<ErbFilterbank>,
    erb_extractor: ErbFeatureExtractor,
    spec_extractor: SpectralFeatureExtractor,

    encoder: Box<dyn InferenceBackend>,
    erb_decoder: Box<dyn InferenceBackend>,
    df_decoder: Box<dyn InferenceBackend>,

    /// Guards the overlap buffer and (via `StftEngine`) STFT scratch.
    processing: Mutex<ProcessingResources>,
    /// Guards the neural state bundle. Never nested with `processing`.
    state: Mutex<Option<HashMap<String, Tensor>>>,
    last_error: AtomicBool,
}

impl Pipeline {
    /// Build a pipeline from explicit backend handles (typically one
    /// [`crate::backend::MockEncoder`]/[`crate::backend::MockErbDecoder`]/
    /// [`crate::backend::MockDfDecoder`] triple for tests, or three
    /// [`crate::backend::NativeBackend`]s from [`Pipeline::with_default_models`]).
    pub fn new(
        config: Config,
        encoder: Box<dyn InferenceBackend>,
        erb_decoder: Box<dyn InferenceBackend>,
        df_decoder: Box<dyn InferenceBackend>,
    ) -> Self {
        config.validate();

        let stft = StftEngine::new(config.n_fft, config.n_hop);
        let erb_fb = Arc::new(ErbFilterbank::new(
            config.sample_rate,
            config.n_fft,
            config.erb_bands,
            config.f_min,
            config.erb_f_max(),
        ));
        let erb_extractor = ErbFeatureExtractor::new(erb_fb.clone());
        let spec_extractor = SpectralFeatureExtractor::new(config.df_bands);

        Self {
            config,
            stft,
            erb_fb,
            erb_extractor,
            spec_extractor,
            encoder,
            erb_decoder,
            df_decoder,
            processing: Mutex::new(ProcessingResources { overlap: VecDeque::new() }),
            state: Mutex::new(None),
            last_error: AtomicBool::new(false),
        }
    }

    /// Build a pipeline from native ONNX models discovered under
    /// `bundle_dir`, which must resolve to a subdirectory of
    /// `allowlist_root` (see [`crate::model_loader`]).
    pub fn with_default_models(
        config: Config,
        allowlist_root: &Path,
        bundle_dir: &Path,
    ) -> EnhanceResult<Self> {
        let ModelBundle { encoder, erb_decoder, df_decoder } =
            model_loader::load_bundle(allowlist_root, bundle_dir)?;
        Ok(Self::new(config, Box::new(encoder), Box::new(erb_decoder), Box::new(df_decoder)))
    }

    /// Current configuration.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Coarse pipeline state (see [`PipelineState`]).
    pub fn state(&self) -> PipelineState {
        if self.last_error.load(Ordering::SeqCst) {
            return PipelineState::Error;
        }
        let overlap_nonempty = !self.processing.lock().overlap.is_empty();
        let has_neural_state = self.state.lock().is_some();
        if overlap_nonempty || has_neural_state {
            PipelineState::Streaming
        } else {
            PipelineState::Fresh
        }
    }

    /// Clear neural state and the overlap buffer. Infallible. Acquires the
    /// processing and state locks independently, never nested.
    pub fn reset(&self) {
        self.processing.lock().overlap.clear();
        *self.state.lock() = None;
        self.last_error.store(false, Ordering::SeqCst);
    }

    fn validate_input(&self, audio: &[f32]) -> EnhanceResult<()> {
        if audio.len() < self.config.n_fft {
            return Err(EnhanceError::InvalidAudioLength {
                len: audio.len(),
                reason: format!("shorter than n_fft ({})", self.config.n_fft),
            });
        }
        let max_samples = self.config.max_samples();
        if audio.len() > max_samples {
            return Err(EnhanceError::InvalidAudioLength {
                len: audio.len(),
                reason: format!("exceeds max duration ({max_samples} samples)"),
            });
        }
        for &s in audio {
            if !s.is_finite() {
                return Err(EnhanceError::InvalidAudioValues { reason: "non-finite sample".into() });
            }
            if s.abs() > self.config.max_amplitude {
                return Err(EnhanceError::InvalidAudioValues {
                    reason: format!("sample magnitude {} exceeds max_amplitude {}", s.abs(), self.config.max_amplitude),
                });
            }
        }
        Ok(())
    }

    /// Single-call entry point. Returns exactly `n_hop` samples.
    pub fn process(&self, audio: &[f32]) -> EnhanceResult<Vec<f32>> {
        let result = self.process_inner(audio);
        self.last_error.store(result.is_err(), Ordering::SeqCst);
        result
    }

    fn process_inner(&self, audio: &[f32]) -> EnhanceResult<Vec<f32>> {
        self.validate_input(audio)?;

        // STFT + feature extraction under the processing lock.
        let (mut spectrum, erb_feat, spec_feat, frames) = {
            let _guard = self.processing.lock();
            let spectrum = self.stft.transform(audio);
            let frames = spectrum.frames();
            if frames == 0 || spectrum.bins() != self.stft.bins() {
                return Err(EnhanceError::ShapeMismatch {
                    expected: format!("{} bins", self.stft.bins()),
                    got: format!("{} frames x {} bins", frames, spectrum.bins()),
                });
            }

            let erb_raw = self.erb_extractor.extract(&spectrum)?;
            let erb_feat = self.erb_extractor.normalize(&erb_raw, frames, self.config.erb_alpha);

            let spec_raw = self.spec_extractor.extract(&spectrum);
            let spec_feat = self.spec_extractor.normalize(&spec_raw, frames, self.config.spec_alpha);

            (spectrum, erb_feat, spec_feat, frames)
        };

        // Encoder.
        let encoder_inputs = build_encoder_inputs(
            &erb_feat,
            &spec_feat,
            frames,
            self.config.erb_bands,
            self.config.df_bands,
        )?;
        let encoder_out = self.encoder.run(&encoder_inputs)?;
        for key in STATE_KEYS {
            if !encoder_out.contains_key(key) {
                return Err(EnhanceError::MissingOutput { name: key.to_string() });
            }
        }
        if encoder_out.values().any(|t| t.data.iter().any(|v| !v.is_finite())) {
            return Err(EnhanceError::InvalidNumeric { source: "encoder state bundle".into() });
        }

        // Decoders.
        let mask_out = self.erb_decoder.run(&encoder_out)?;
        let mask = mask_out
            .get("m")
            .ok_or_else(|| EnhanceError::MissingOutput { name: "m".into() })?;
        let expected_mask_len = frames * self.stft.bins();
        if mask.data.len() != expected_mask_len {
            return Err(EnhanceError::ShapeMismatch {
                expected: expected_mask_len.to_string(),
                got: mask.data.len().to_string(),
            });
        }
        if mask.data.iter().any(|v| !v.is_finite()) {
            return Err(EnhanceError::InvalidNumeric { source: "erb decoder mask".into() });
        }

        let coef_out = self.df_decoder.run(&encoder_out)?;
        let coefs = coef_out
            .get("coefs")
            .ok_or_else(|| EnhanceError::MissingOutput { name: "coefs".into() })?;
        let expected_coef_len = frames * self.config.df_bands * self.config.df_order;
        if coefs.data.len() != expected_coef_len {
            return Err(EnhanceError::ShapeMismatch {
                expected: expected_coef_len.to_string(),
                got: coefs.data.len().to_string(),
            });
        }
        if coefs.data.iter().any(|v| !v.is_finite()) {
            return Err(EnhanceError::InvalidNumeric { source: "df decoder coefficients".into() });
        }

        // Filtering.
        deep_filter::apply(&mut spectrum, &mask.data, &coefs.data, self.config.df_bands, self.config.df_order)?;

        // Every fallible step has now succeeded; commit the new neural
        // state wholesale. Committing any earlier would leave stale state
        // behind a later `ShapeMismatch`/`InvalidNumeric` error, contradicting
        // the "errors leave prior state unchanged" contract.
        *self.state.lock() = Some(encoder_out);

        // ISTFT + overlap buffer under the processing lock.
        let hop = {
            let istft = self.stft.inverse(&spectrum)?;
            let mut guard = self.processing.lock();
            guard.overlap.extend(istft);
            emit_one_hop(&mut guard.overlap, self.config.n_hop)
        };

        Ok(hop)
    }

    /// Chunked convenience: a sliding window of stride `n_hop` over `audio`.
    /// Inputs shorter than `n_fft` pass through unchanged. The trailing
    /// remainder (shorter than `n_fft`) is reflect-padded, processed, and
    /// truncated back to the remainder length. Per-chunk errors fall back
    /// to passing the original chunk through rather than dropping it, so
    /// the output length always remains a prefix of the input length.
    pub fn process_buffer(&self, audio: &[f32]) -> EnhanceResult<Vec<f32>> {
        let n_fft = self.config.n_fft;
        let n_hop = self.config.n_hop;

        if audio.len() < n_fft {
            return Ok(audio.to_vec());
        }

        let mut out = Vec::with_capacity(audio.len());
        let mut pos = 0usize;
        while pos + n_fft <= audio.len() {
            let chunk = &audio[pos..pos + n_fft];
            match self.process(chunk) {
                Ok(hop) => out.extend(hop),
                Err(e) => {
                    log::warn!(target: "pipeline", "process_buffer: chunk at {pos} failed ({e}), passing through");
                    out.extend_from_slice(&chunk[..n_hop]);
                }
            }
            pos += n_hop;
        }

        let remainder = audio.len() - pos;
        if remainder > 0 {
            let tail = &audio[pos..];
            let padded = reflect_pad(tail, n_fft);
            match self.process(&padded) {
                Ok(hop) => {
                    let take = remainder.min(hop.len());
                    out.extend_from_slice(&hop[..take]);
                }
                Err(e) => {
                    log::warn!(target: "pipeline", "process_buffer: trailing chunk failed ({e}), passing through");
                    out.extend_from_slice(tail);
                }
            }
        }

        Ok(out)
    }
}

fn emit_one_hop(overlap: &mut VecDeque<f32>, n_hop: usize) -> Vec<f32> {
    if overlap.len() >= n_hop {
        overlap.drain(..n_hop).collect()
    } else {
        let avail = overlap.len();
        let mut out = vec![0.0f32; n_hop];
        let start = n_hop - avail;
        for (i, v) in overlap.drain(..).enumerate() {
            out[start + i] = v;
        }
        out
    }
}

/// Mirror-reflect `tail` up to `target_len` (numpy `reflect` mode: the edge
/// sample is not repeated before bouncing back).
fn reflect_pad(tail: &[f32], target_len: usize) -> Vec<f32> {
    let n = tail.len();
    if n == 0 {
        return vec![0.0; target_len];
    }
    let mut out = Vec::with_capacity(target_len);
    out.extend_from_slice(tail);
    if n == 1 {
        out.resize(target_len, tail[0]);
        return out;
    }

    let mut idx = n as isize - 2;
    let mut dir = -1isize;
    while out.len() < target_len {
        out.push(tail[idx as usize]);
        if idx == 0 || idx == n as isize - 1 {
            dir = -dir;
        }
        idx += dir;
    }
    out
}

fn build_encoder_inputs(
    erb_feat: &[f32],
    spec_feat: &[f32],
    frames: usize,
    erb_bands: usize,
    df_bands: usize,
) -> EnhanceResult<HashMap<String, Tensor>> {
    let erb_tensor = Tensor::new(vec![1, 1, frames as i64, erb_bands as i64], erb_feat.to_vec())?;

    // spec_feat arrives time-major (frame, channel, bin); the model wants
    // channel-major [1, 2, T, B_df].
    let mut transposed = vec![0.0f32; frames * 2 * df_bands];
    for t in 0..frames {
        for c in 0..2 {
            let src = &spec_feat[t * 2 * df_bands + c * df_bands..t * 2 * df_bands + (c + 1) * df_bands];
            let dst_start = c * frames * df_bands + t * df_bands;
            transposed[dst_start..dst_start + df_bands].copy_from_slice(src);
        }
    }
    let spec_tensor = Tensor::new(vec![1, 2, frames as i64, df_bands as i64], transposed)?;

    let mut inputs = HashMap::new();
    inputs.insert("erb_feat".to_string(), erb_tensor);
    inputs.insert("spec_feat".to_string(), spec_tensor);
    Ok(inputs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{MockDfDecoder, MockEncoder, MockErbDecoder};
    use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};

    /// Encoder whose state-bundle fill value increments on every call, so a
    /// test can tell which call's output ended up committed to `self.state`.
    struct CountingEncoder {
        calls: AtomicUsize,
    }

    impl CountingEncoder {
        fn new() -> Self {
            Self { calls: AtomicUsize::new(0) }
        }
    }

    impl InferenceBackend for CountingEncoder {
        fn input_names(&self) -> Vec<String> {
            vec!["erb_feat".into(), "spec_feat".into()]
        }

        fn output_names(&self) -> Vec<String> {
            STATE_KEYS.iter().map(|s| s.to_string()).collect()
        }

        fn run(&self, inputs: &HashMap<String, Tensor>) -> EnhanceResult<HashMap<String, Tensor>> {
            let t = inputs["erb_feat"].shape[2].max(1);
            let fill = (self.calls.fetch_add(1, AtomicOrdering::SeqCst) + 1) as f32;
            let mut out = HashMap::new();
            for key in STATE_KEYS {
                out.insert(key.to_string(), Tensor::filled(vec![1, t, 8], fill));
            }
            Ok(out)
        }
    }

    /// DF decoder that succeeds on its first call and returns a wrong-length
    /// coefficient tensor (triggering `ShapeMismatch`) on every call after.
    struct FlakyDfDecoder {
        calls: AtomicUsize,
        df_bands: usize,
        df_order: usize,
    }

    impl FlakyDfDecoder {
        fn new(df_bands: usize, df_order: usize) -> Self {
            Self { calls: AtomicUsize::new(0), df_bands, df_order }
        }
    }

    impl InferenceBackend for FlakyDfDecoder {
        fn input_names(&self) -> Vec<String> {
            STATE_KEYS.iter().map(|s| s.to_string()).collect()
        }

        fn output_names(&self) -> Vec<String> {
            vec!["coefs".into()]
        }

        fn run(&self, inputs: &HashMap<String, Tensor>) -> EnhanceResult<HashMap<String, Tensor>> {
            let t = inputs["e0"].shape[1].max(0) as usize;
            let call = self.calls.fetch_add(1, AtomicOrdering::SeqCst);
            let mut out = HashMap::new();
            let len = if call == 0 { t * self.df_bands * self.df_order } else { 1 };
            out.insert("coefs".to_string(), Tensor { shape: vec![len as i64], data: vec![0.0; len] });
            Ok(out)
        }
    }

    fn seed_pipeline(config: Config) -> Pipeline {
        let bins = config.num_bins();
        let df_bands = config.df_bands;
        let df_order = config.df_order;
        Pipeline::new(
            config,
            Box::new(MockEncoder::new(0.1)),
            Box::new(MockErbDecoder::new(0.8, bins)),
            Box::new(MockDfDecoder::new(0.01, df_bands, df_order)),
        )
    }

    fn identity_pipeline(config: Config) -> Pipeline {
        let bins = config.num_bins();
        let df_bands = config.df_bands;
        let df_order = config.df_order;
        Pipeline::new(
            config,
            Box::new(MockEncoder::new(0.1)),
            Box::new(MockErbDecoder::new(1.0, bins)),
            Box::new(MockDfDecoder::identity(df_bands, df_order)),
        )
    }

    #[test]
    fn s1_silence_in_silence_out() {
        let pipeline = seed_pipeline(Config::default());
        let out = pipeline.process(&vec![0.0f32; 960]).unwrap();
        assert_eq!(out.len(), 480);
        assert!(out.iter().all(|&v| v == 0.0));
    }

    #[test]
    fn s2_unit_impulse_is_bounded_and_finite() {
        let pipeline = seed_pipeline(Config::default());
        let mut audio = vec![0.0f32; 960];
        audio[0] = 1.0;
        let out = pipeline.process(&audio).unwrap();
        assert_eq!(out.len(), 480);
        assert!(out.iter().all(|v| v.is_finite() && v.abs() <= 1.0));
        assert!(out[0].abs() < 0.1);
    }

    #[test]
    fn s6_rejects_nan_then_recovers() {
        let pipeline = seed_pipeline(Config::default());
        let mut audio = vec![0.0f32; 960];
        audio[10] = f32::NAN;
        let err = pipeline.process(&audio).unwrap_err();
        assert!(matches!(err, EnhanceError::InvalidAudioValues { .. }));
        assert_eq!(pipeline.state(), PipelineState::Error);

        pipeline.reset();
        let fresh = seed_pipeline(Config::default());
        let a = pipeline.process(&vec![0.3f32; 960]).unwrap();
        let b = fresh.process(&vec![0.3f32; 960]).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn decoder_failure_after_a_successful_call_does_not_commit_partial_state() {
        let config = Config::default();
        let bins = config.num_bins();
        let pipeline = Pipeline::new(
            config.clone(),
            Box::new(CountingEncoder::new()),
            Box::new(MockErbDecoder::new(0.8, bins)),
            Box::new(FlakyDfDecoder::new(config.df_bands, config.df_order)),
        );

        let audio = vec![0.1f32; 960];
        pipeline.process(&audio).unwrap();
        let state_after_success = pipeline.state.lock().clone().unwrap();

        let err = pipeline.process(&audio).unwrap_err();
        assert!(matches!(err, EnhanceError::ShapeMismatch { .. }));

        let state_after_failure = pipeline.state.lock().clone().unwrap();
        assert_eq!(
            state_after_success, state_after_failure,
            "a later decoder failure must not overwrite state committed by a prior successful call"
        );
    }

    #[test]
    fn boundary_exact_n_fft_leaves_n_fft_minus_hop_in_overlap() {
        let pipeline = seed_pipeline(Config::default());
        pipeline.process(&vec![0.1f32; 960]).unwrap();
        let remaining = pipeline.processing.lock().overlap.len();
        assert_eq!(remaining, 960 - 480);
    }

    #[test]
    fn boundary_short_input_is_rejected() {
        let pipeline = seed_pipeline(Config::default());
        let err = pipeline.process(&vec![0.0f32; 959]).unwrap_err();
        assert!(matches!(err, EnhanceError::InvalidAudioLength { .. }));
    }

    #[test]
    fn process_buffer_short_input_passes_through() {
        let pipeline = seed_pipeline(Config::default());
        let audio = vec![0.25f32; 100];
        let out = pipeline.process_buffer(&audio).unwrap();
        assert_eq!(out, audio);
    }

    #[test]
    fn process_buffer_preserves_length_with_reflect_tail() {
        let pipeline = identity_pipeline(Config::default());
        let audio = vec![0.1f32; 960 + 480 * 3 + 200]; // remainder of 200 samples
        let out = pipeline.process_buffer(&audio).unwrap();
        assert_eq!(out.len(), audio.len());
    }

    #[test]
    fn chunked_matches_process_buffer_over_interior() {
        let config = Config::default();
        let k = 3usize;
        let len = config.n_fft + k * config.n_hop;
        let audio: Vec<f32> = (0..len).map(|i| ((i as f32) * 0.001).sin() * 0.2).collect();

        let chunked_pipeline = identity_pipeline(config.clone());
        let mut chunked_out = Vec::new();
        let mut pos = 0;
        while pos + config.n_fft <= audio.len() {
            chunked_out.extend(chunked_pipeline.process(&audio[pos..pos + config.n_fft]).unwrap());
            pos += config.n_hop;
        }

        let whole_pipeline = identity_pipeline(config.clone());
        let whole_out = whole_pipeline.process_buffer(&audio).unwrap();

        let interior = config.n_fft;
        for i in interior..chunked_out.len() {
            assert!((chunked_out[i] - whole_out[i]).abs() < 1e-3, "mismatch at {i}");
        }
    }
}
