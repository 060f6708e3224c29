//! Engine configuration.
//!
//! `Config` is a construction-time parameter bundle: immutable once a
//! [`crate::Pipeline`] is built from it. Invariant violations here are
//! construction-time and therefore panic rather than return a `Result` —
//! see the spec's design notes on exceptions vs. typed results.

/// Immutable pipeline configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// Sample rate in Hz.
    pub sample_rate: u32,
    /// STFT window / FFT size.
    pub n_fft: usize,
    /// STFT hop size. Must equal `n_fft / 2` (50% overlap, COLA with a
    /// denormalized Hann window).
    pub n_hop: usize,
    /// Number of ERB bands.
    pub erb_bands: usize,
    /// Number of low-frequency bins covered by the deep filter.
    pub df_bands: usize,
    /// Deep-filter FIR order. Must be odd for symmetric centering.
    pub df_order: usize,
    /// If `true`, the deep filter only looks backward in time (causal);
    /// if `false` (default) it centers its taps, matching the offline
    /// training convention. With a single buffered frame at a time the
    /// lookahead taps always see zero, so this mainly documents intent.
    pub df_causal: bool,
    /// ERB feature normalization scale (`alpha`).
    pub erb_alpha: f32,
    /// Spectral (deep-filter-path) feature normalization scale (`alpha`).
    pub spec_alpha: f32,
    /// Minimum ERB center frequency, Hz.
    pub f_min: f32,
    /// Maximum ERB center frequency, Hz (clamped to `sample_rate / 2`).
    pub f_max: f32,
    /// Maximum accepted input duration, seconds.
    pub max_duration_s: f32,
    /// Maximum accepted absolute sample amplitude.
    pub max_amplitude: f32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            sample_rate: 48_000,
            n_fft: 960,
            n_hop: 480,
            erb_bands: 32,
            df_bands: 96,
            df_order: 5,
            df_causal: false,
            erb_alpha: 0.9,
            spec_alpha: 0.6,
            f_min: 50.0,
            f_max: 20_000.0,
            max_duration_s: 3600.0,
            max_amplitude: 10.0,
        }
    }
}

impl Config {
    /// Number of positive-frequency bins, `N_fft / 2 + 1`.
    pub fn num_bins(&self) -> usize {
        self.n_fft / 2 + 1
    }

    /// Effective upper ERB edge frequency: `min(f_max, sample_rate / 2)`.
    pub fn erb_f_max(&self) -> f32 {
        self.f_max.min(self.sample_rate as f32 / 2.0)
    }

    /// Maximum accepted number of audio samples in a single `process` call.
    pub fn max_samples(&self) -> usize {
        (self.sample_rate as f32 * self.max_duration_s) as usize
    }

    /// Validate the invariants in the data model. Panics on violation —
    /// these are construction-time configuration bugs, not runtime errors.
    pub fn validate(&self) {
        assert_eq!(
            self.n_hop,
            self.n_fft / 2,
            "n_hop must equal n_fft / 2 (COLA requires 50% overlap)"
        );
        assert!(self.n_fft % 2 == 0, "n_fft must be even");
        assert!(self.df_order % 2 == 1, "df_order must be odd");
        assert!(self.erb_bands > 0, "erb_bands must be positive");
        assert!(self.df_bands > 0, "df_bands must be positive");
        assert!(
            self.df_bands <= self.num_bins(),
            "df_bands must not exceed the number of positive-frequency bins"
        );
        assert!(self.f_min > 0.0 && self.f_min < self.erb_f_max(),
            "f_min must be positive and below the effective ERB upper edge");
        assert!(self.max_duration_s > 0.0, "max_duration_s must be positive");
        assert!(self.max_amplitude > 0.0, "max_amplitude must be positive");
    }
}
