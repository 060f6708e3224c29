//! ERB Filterbank + Feature Extractor (C3).
//!
//! Builds a perceptually-motivated ERB-scaled triangular filterbank once
//! (grounded on `DeepFilterNet::create_erb_filterbank`/`hz_to_erb`/
//! `erb_to_hz` in the teacher, generalized to the spec's literal Glasberg &
//! Moore 1990 constants), and projects per-frame magnitude spectra onto it
//! with per-frame running normalization.

use crate::error::{EnhanceError, EnhanceResult};
use crate::spectrum::Spectrum;

use ndarray::Array2;

const VARIANCE_EPS: f32 = 1e-6;

/// Hz -> ERB scale, Glasberg & Moore (1990).
pub fn hz_to_erb(hz: f32) -> f32 {
    21.4 * (1.0 + 0.00437 * hz).log10()
}

/// ERB scale -> Hz, inverse of [`hz_to_erb`].
pub fn erb_to_hz(erb: f32) -> f32 {
    (10f32.powf(erb / 21.4) - 1.0) / 0.00437
}

/// ERB-scale critical bandwidth at center frequency `hz`.
fn erb_bandwidth(hz: f32) -> f32 {
    24.7 * (0.00437 * hz + 1.0)
}

/// Immutable, shared ERB filterbank: `H` of shape `[erb_bands, bins]`.
pub struct ErbFilterbank {
    bins: usize,
    bands: usize,
    /// Row-major, `bands * bins` non-negative weights, each row summing to 1.
    weights: Array2<f32>,
}

impl ErbFilterbank {
    /// Construct the filterbank once. `bins = n_fft / 2 + 1`.
    pub fn new(sample_rate: u32, n_fft: usize, bands: usize, f_min: f32, f_max: f32) -> Self {
        let bins = n_fft / 2 + 1;
        let bin_hz = |k: usize| k as f32 * sample_rate as f32 / n_fft as f32;

        let erb_min = hz_to_erb(f_min);
        let erb_max = hz_to_erb(f_max);
        let step = (erb_max - erb_min) / (bands + 1) as f32;

        let mut weights = Array2::<f32>::zeros((bands, bins));
        for band in 0..bands {
            let center_erb = erb_min + (band + 1) as f32 * step;
            let center_hz = erb_to_hz(center_erb);
            let bandwidth = erb_bandwidth(center_hz);

            for k in 0..bins {
                let dist = (bin_hz(k) - center_hz).abs();
                let gain = 1.0 - dist / bandwidth;
                if gain > 0.0 {
                    weights[[band, k]] = gain;
                }
            }

            let sum: f32 = weights.row(band).sum();
            if sum > 0.0 {
                let mut row = weights.row_mut(band);
                row /= sum;
            }
        }

        debug_assert!(weights.iter().all(|v| v.is_finite() && *v >= 0.0));

        Self { bins, bands, weights }
    }

    /// Number of ERB bands, `B_erb`.
    pub fn bands(&self) -> usize {
        self.bands
    }

    /// Number of positive-frequency bins, `K`.
    pub fn bins(&self) -> usize {
        self.bins
    }

    /// Every row sums to 1 within `tol`, all entries finite and non-negative.
    pub fn is_valid(&self, tol: f32) -> bool {
        self.weights.iter().all(|v| v.is_finite() && *v >= 0.0)
            && (0..self.bands).all(|b| (self.weights.row(b).sum() - 1.0).abs() < tol)
    }

    fn project_frame(&self, magnitude: &[f32], out: &mut [f32]) {
        for (band, o) in out.iter_mut().enumerate() {
            let row = self.weights.row(band);
            *o = row
                .iter()
                .zip(magnitude.iter())
                .map(|(w, m)| w * m)
                .sum();
        }
    }
}

/// Projects STFT spectra onto the ERB filterbank and applies per-frame
/// unit normalization.
pub struct ErbFeatureExtractor {
    fb: std::sync::Arc<ErbFilterbank>,
}

impl ErbFeatureExtractor {
    pub fn new(fb: std::sync::Arc<ErbFilterbank>) -> Self {
        Self { fb }
    }

    /// `extract`: magnitude-projected ERB energy per frame, shape
    /// `[frames, bands]` flattened time-major. Returns an empty result
    /// (zero frames) and logs if `re`/`im` frame counts disagree — which
    /// cannot happen given [`Spectrum`]'s invariant, but is checked anyway
    /// since this is a documented failure mode in the spec.
    pub fn extract(&self, spectrum: &Spectrum) -> EnhanceResult<Vec<f32>> {
        if spectrum.bins() != self.fb.bins() {
            log::warn!(target: "erb", "bin count mismatch: fb={}, spectrum={}", self.fb.bins(), spectrum.bins());
            return Ok(Vec::new());
        }

        let frames = spectrum.frames();
        let bands = self.fb.bands();
        let mut out = vec![0.0f32; frames * bands];
        let mut magnitude = vec![0.0f32; spectrum.bins()];

        for t in 0..frames {
            let re = spectrum.frame_re(t);
            let im = spectrum.frame_im(t);
            for (m, (&r, &i)) in magnitude.iter_mut().zip(re.iter().zip(im.iter())) {
                *m = (r * r + i * i).max(0.0).sqrt();
            }
            self.fb.project_frame(&magnitude, &mut out[t * bands..(t + 1) * bands]);
        }

        Ok(out)
    }

    /// `normalize`: per-frame mean-subtracted, std-divided scaling by `alpha`.
    pub fn normalize(&self, erb: &[f32], frames: usize, alpha: f32) -> Vec<f32> {
        let bands = self.fb.bands();
        debug_assert_eq!(erb.len(), frames * bands);
        let mut out = vec![0.0f32; erb.len()];

        for t in 0..frames {
            let row = &erb[t * bands..(t + 1) * bands];
            let mean = row.iter().sum::<f32>() / bands as f32;
            let var = row.iter().map(|v| (v - mean).powi(2)).sum::<f32>() / bands as f32;
            let std = var.max(VARIANCE_EPS).sqrt();

            let out_row = &mut out[t * bands..(t + 1) * bands];
            for (o, &e) in out_row.iter_mut().zip(row.iter()) {
                *o = alpha * (e - mean) / std;
            }
        }

        out
    }
}
