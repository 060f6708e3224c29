//! Spectral Feature Extractor (C4).
//!
//! Selects the first `B_df` complex bins per frame as a two-channel tensor
//! and applies a per-frame magnitude-based unit-scale normalization (no
//! mean subtraction — the deep filter needs the raw complex structure of
//! the low frequencies, not a compressed summary).

const VARIANCE_EPS: f32 = 1e-6;

use crate::spectrum::Spectrum;

/// Extracts and normalizes the low-frequency complex feature tensor.
pub struct SpectralFeatureExtractor {
    df_bands: usize,
}

impl SpectralFeatureExtractor {
    pub fn new(df_bands: usize) -> Self {
        Self { df_bands }
    }

    pub fn df_bands(&self) -> usize {
        self.df_bands
    }

    /// `extract`: shape `[frames, 2, df_bands]` flattened as
    /// `(frame, channel, bin)` time-major; channel 0 is real, channel 1 is
    /// imaginary. Right-padded with zeros if the spectrum has fewer than
    /// `df_bands` bins.
    pub fn extract(&self, spectrum: &Spectrum) -> Vec<f32> {
        let frames = spectrum.frames();
        let b = self.df_bands;
        let mut out = vec![0.0f32; frames * 2 * b];
        let avail = b.min(spectrum.bins());

        for t in 0..frames {
            let re = spectrum.frame_re(t);
            let im = spectrum.frame_im(t);
            let frame_out = &mut out[t * 2 * b..(t + 1) * 2 * b];
            frame_out[0..avail].copy_from_slice(&re[0..avail]);
            frame_out[b..b + avail].copy_from_slice(&im[0..avail]);
        }

        out
    }

    /// `normalize`: per-frame unit-scale (not unit-mean) scaling by `alpha`.
    pub fn normalize(&self, features: &[f32], frames: usize, alpha: f32) -> Vec<f32> {
        let b = self.df_bands;
        debug_assert_eq!(features.len(), frames * 2 * b);
        let mut out = vec![0.0f32; features.len()];

        for t in 0..frames {
            let frame = &features[t * 2 * b..(t + 1) * 2 * b];
            let (re, im) = frame.split_at(b);

            let mut mean_mag = 0.0f32;
            let mut mean_sq = 0.0f32;
            for (r, i) in re.iter().zip(im.iter()) {
                let mag = (r * r + i * i).max(0.0).sqrt();
                mean_mag += mag;
                mean_sq += mag * mag;
            }
            mean_mag /= b as f32;
            mean_sq /= b as f32;
            let var = (mean_sq - mean_mag * mean_mag).max(VARIANCE_EPS);
            let std = var.sqrt();
            let scale = alpha / std;

            let out_frame = &mut out[t * 2 * b..(t + 1) * 2 * b];
            for (o, &v) in out_frame.iter_mut().zip(frame.iter()) {
                *o = v * scale;
            }
        }

        out
    }
}
