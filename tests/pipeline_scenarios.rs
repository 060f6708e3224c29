//! Pipeline Scenario Tests
//!
//! Exercises the full [`speech_enhance::Pipeline`] end to end with
//! deterministic mock backends. Verifies:
//! - Silence/impulse passthrough behavior
//! - Mask attenuation and identity-filter passthrough
//! - Chunked vs. whole-buffer equivalence
//! - NaN rejection and non-sticky error recovery
//! - `reset()` reproducibility and boundary lengths

use speech_enhance::backend::{MockDfDecoder, MockEncoder, MockErbDecoder};
use speech_enhance::{Config, EnhanceError, Pipeline, PipelineState};

const SAMPLE_RATE: f32 = 48000.0;

fn generate_sine(samples: usize, freq_hz: f32, amp: f32) -> Vec<f32> {
    (0..samples)
        .map(|i| amp * (2.0 * std::f32::consts::PI * freq_hz * i as f32 / SAMPLE_RATE).sin())
        .collect()
}

fn is_valid_signal(signal: &[f32]) -> bool {
    signal.iter().all(|x| x.is_finite())
}

fn rms(signal: &[f32]) -> f32 {
    let sum: f32 = signal.iter().map(|x| x * x).sum();
    (sum / signal.len() as f32).sqrt()
}

fn seeded_pipeline(config: Config) -> Pipeline {
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

fn passthrough_pipeline(config: Config) -> Pipeline {
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

fn attenuating_pipeline(config: Config, gain: f32) -> Pipeline {
    let bins = config.num_bins();
    let df_bands = config.df_bands;
    let df_order = config.df_order;
    Pipeline::new(
        config,
        Box::new(MockEncoder::new(0.1)),
        Box::new(MockErbDecoder::new(gain, bins)),
        Box::new(MockDfDecoder::identity(df_bands, df_order)),
    )
}

// ═══════════════════════════════════════════════════════════════════════════════
// SEED SCENARIOS (S1-S6)
// ═══════════════════════════════════════════════════════════════════════════════

#[test]
fn s1_silence_in_silence_out() {
    let pipeline = seeded_pipeline(Config::default());
    let out = pipeline.process(&vec![0.0f32; 960]).unwrap();
    assert_eq!(out.len(), 480);
    assert!(out.iter().all(|&v| v == 0.0), "silent input must produce exact silence");
}

#[test]
fn s2_unit_impulse_stays_bounded_and_finite() {
    let pipeline = seeded_pipeline(Config::default());
    let mut audio = vec![0.0f32; 960];
    audio[0] = 1.0;
    let out = pipeline.process(&audio).unwrap();
    assert!(is_valid_signal(&out));
    assert!(out.iter().all(|v| v.abs() <= 1.0 + 1e-3));
}

#[test]
fn s3_sine_passthrough_with_identity_mask_and_coefs() {
    let pipeline = passthrough_pipeline(Config::default());
    let audio = generate_sine(960 * 6, 1000.0, 0.3);
    let out = pipeline.process_buffer(&audio).unwrap();

    assert!(is_valid_signal(&out));
    let input_rms = rms(&audio[960..out.len().min(audio.len())]);
    let output_rms = rms(&out[960..]);
    assert!(
        (output_rms - input_rms).abs() / input_rms < 0.05,
        "expected near-identity passthrough: input_rms={input_rms}, output_rms={output_rms}"
    );
}

#[test]
fn s4_mask_attenuation_scales_output_rms() {
    let pipeline = attenuating_pipeline(Config::default(), 0.5);
    let audio = generate_sine(960 * 6, 1000.0, 0.3);
    let out = pipeline.process_buffer(&audio).unwrap();

    let input_rms = rms(&audio[960..out.len().min(audio.len())]);
    let output_rms = rms(&out[960..]);
    assert!(
        (output_rms - 0.5 * input_rms).abs() / input_rms < 0.05,
        "expected ~0.5x RMS: input_rms={input_rms}, output_rms={output_rms}"
    );
}

#[test]
fn s5_chunked_calls_match_process_buffer_over_interior() {
    let config = Config::default();
    let k = 4usize;
    let len = config.n_fft + k * config.n_hop;
    let audio = generate_sine(len, 800.0, 0.2);

    let chunked = passthrough_pipeline(config.clone());
    let mut chunked_out = Vec::new();
    let mut pos = 0;
    while pos + config.n_fft <= audio.len() {
        chunked_out.extend(chunked.process(&audio[pos..pos + config.n_fft]).unwrap());
        pos += config.n_hop;
    }

    let whole = passthrough_pipeline(config.clone());
    let whole_out = whole.process_buffer(&audio).unwrap();

    let interior_start = config.n_fft;
    let interior_end = chunked_out.len();
    for i in interior_start..interior_end {
        assert!(
            (chunked_out[i] - whole_out[i]).abs() < 1e-3,
            "chunked/whole mismatch at sample {i}: {} vs {}",
            chunked_out[i],
            whole_out[i]
        );
    }
}

#[test]
fn s6_nan_is_rejected_and_state_is_unchanged() {
    let config = Config::default();
    let reference = seeded_pipeline(config.clone());
    let under_test = seeded_pipeline(config);

    let clean = vec![0.2f32; 960];
    let expected = reference.process(&clean).unwrap();

    let mut poisoned = clean.clone();
    poisoned[500] = f32::NAN;
    let err = under_test.process(&poisoned).unwrap_err();
    assert!(matches!(err, EnhanceError::InvalidAudioValues { .. }));
    assert_eq!(under_test.state(), PipelineState::Error);

    let got = under_test.process(&clean).unwrap();
    assert_eq!(got, expected, "a rejected call must not perturb subsequent output");
}

// ═══════════════════════════════════════════════════════════════════════════════
// UNIVERSAL / BOUNDARY INVARIANTS
// ═══════════════════════════════════════════════════════════════════════════════

#[test]
fn every_call_emits_exactly_n_hop_samples() {
    let pipeline = seeded_pipeline(Config::default());
    for amp in [0.0, 0.1, 0.3, 0.9] {
        let out = pipeline.process(&vec![amp; 960]).unwrap();
        assert_eq!(out.len(), 480);
    }
}

#[test]
fn reset_makes_subsequent_processing_bit_for_bit_reproducible() {
    let pipeline = seeded_pipeline(Config::default());
    let audio = generate_sine(960, 440.0, 0.4);

    let first = pipeline.process(&audio).unwrap();
    pipeline.reset();
    assert_eq!(pipeline.state(), PipelineState::Fresh);
    let second = pipeline.process(&audio).unwrap();

    assert_eq!(first, second);
}

#[test]
fn below_n_fft_length_is_rejected() {
    let pipeline = seeded_pipeline(Config::default());
    let err = pipeline.process(&vec![0.0f32; 100]).unwrap_err();
    assert!(matches!(err, EnhanceError::InvalidAudioLength { .. }));
}

#[test]
fn above_max_duration_is_rejected() {
    let mut config = Config::default();
    config.max_duration_s = 0.01; // 480 samples at 48kHz
    let pipeline = seeded_pipeline(config);
    let err = pipeline.process(&vec![0.0f32; 960]).unwrap_err();
    assert!(matches!(err, EnhanceError::InvalidAudioLength { .. }));
}

#[test]
fn over_amplitude_sample_is_rejected() {
    let pipeline = seeded_pipeline(Config::default());
    let mut audio = vec![0.0f32; 960];
    audio[50] = 1e6;
    let err = pipeline.process(&audio).unwrap_err();
    assert!(matches!(err, EnhanceError::InvalidAudioValues { .. }));
}

#[test]
fn process_buffer_never_drops_input_shorter_than_n_fft() {
    let pipeline = seeded_pipeline(Config::default());
    let audio = generate_sine(300, 440.0, 0.2);
    let out = pipeline.process_buffer(&audio).unwrap();
    assert_eq!(out, audio);
}

#[test]
fn process_buffer_output_length_matches_input_length_with_remainder() {
    let config = Config::default();
    let pipeline = passthrough_pipeline(config.clone());
    let len = config.n_fft + 2 * config.n_hop + 137;
    let audio = generate_sine(len, 600.0, 0.2);
    let out = pipeline.process_buffer(&audio).unwrap();
    assert_eq!(out.len(), audio.len());
    assert!(is_valid_signal(&out));
}

#[test]
fn fresh_pipeline_reports_fresh_state() {
    let pipeline = seeded_pipeline(Config::default());
    assert_eq!(pipeline.state(), PipelineState::Fresh);
}

#[test]
fn streaming_state_after_first_successful_call() {
    let pipeline = seeded_pipeline(Config::default());
    pipeline.process(&vec![0.1f32; 960]).unwrap();
    assert_eq!(pipeline.state(), PipelineState::Streaming);
}
