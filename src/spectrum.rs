//! Flat, time-major complex spectrum representation.
//!
//! A multi-frame STFT spectrum is stored as two parallel `Vec<f32>` of
//! length `frames * bins`, never as a `Vec<Vec<f32>>` or any pointer-linked
//! structure — per the spec's "arena + indices, never linked-list
//! structures" guidance, every frame/bin pair is reached by plain index
//! arithmetic, checked where a size product could overflow.

use crate::error::{EnhanceError, EnhanceResult};

/// A time-major sequence of complex STFT frames, `re`/`im` each of length
/// `frames * bins`.
#[derive(Debug, Clone, PartialEq)]
pub struct Spectrum {
    frames: usize,
    bins: usize,
    pub re: Vec<f32>,
    pub im: Vec<f32>,
}

impl Spectrum {
    /// Allocate a zeroed spectrum of `frames * bins` complex values.
    pub fn zeros(frames: usize, bins: usize) -> Self {
        let len = frames * bins;
        Self {
            frames,
            bins,
            re: vec![0.0; len],
            im: vec![0.0; len],
        }
    }

    /// Build from existing flat buffers, checking their lengths match
    /// `frames * bins` (per the "|re| == |im| == K" per-frame invariant,
    /// generalized across all frames at once).
    pub fn from_parts(frames: usize, bins: usize, re: Vec<f32>, im: Vec<f32>) -> EnhanceResult<Self> {
        let expected = frames
            .checked_mul(bins)
            .ok_or_else(|| EnhanceError::ProcessingFailed("spectrum size overflow".into()))?;
        if re.len() != expected || im.len() != expected {
            return Err(EnhanceError::ShapeMismatch {
                expected: format!("{expected} ({frames}x{bins})"),
                got: format!("re={}, im={}", re.len(), im.len()),
            });
        }
        Ok(Self { frames, bins, re, im })
    }

    /// Number of frames, `T`.
    pub fn frames(&self) -> usize {
        self.frames
    }

    /// Number of positive-frequency bins, `K`.
    pub fn bins(&self) -> usize {
        self.bins
    }

    /// Real channel of frame `t`.
    pub fn frame_re(&self, t: usize) -> &[f32] {
        &self.re[t * self.bins..(t + 1) * self.bins]
    }

    /// Imaginary channel of frame `t`.
    pub fn frame_im(&self, t: usize) -> &[f32] {
        &self.im[t * self.bins..(t + 1) * self.bins]
    }

    /// Mutable real channel of frame `t`.
    pub fn frame_re_mut(&mut self, t: usize) -> &mut [f32] {
        let bins = self.bins;
        &mut self.re[t * bins..(t + 1) * bins]
    }

    /// Mutable imaginary channel of frame `t`.
    pub fn frame_im_mut(&mut self, t: usize) -> &mut [f32] {
        let bins = self.bins;
        &mut self.im[t * bins..(t + 1) * bins]
    }

    /// `true` if every sample in both channels is finite.
    pub fn is_finite(&self) -> bool {
        self.re.iter().chain(self.im.iter()).all(|x| x.is_finite())
    }
}
