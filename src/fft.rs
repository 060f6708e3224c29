//! FFT Plan (C1).
//!
//! A thin wrapper over a cached pair of `rustfft` complex-to-complex plans,
//! keyed on a fixed transform size `n2` (here always equal to `n_fft`, which
//! is already a power of two for the spec's default configuration). Plans
//! are immutable after construction — cold-set, hot-read — so `FftPlan` is
//! `Send + Sync` without any internal locking of its own; callers that share
//! scratch buffers across threads are responsible for their own
//! synchronization (see [`crate::stft::StftEngine`]).

use num_complex::Complex32;
use rustfft::{Fft, FftPlanner};
use std::sync::Arc;

/// A cached forward/inverse complex FFT pair for a fixed transform size.
pub struct FftPlan {
    n2: usize,
    forward: Arc<dyn Fft<f32>>,
    inverse: Arc<dyn Fft<f32>>,
}

impl FftPlan {
    /// Build a plan for transform size `n2`. `n2` should be a power of two;
    /// `rustfft` supports arbitrary sizes but the STFT engine only ever
    /// requests `next_pow2(n_fft)`.
    pub fn new(n2: usize) -> Self {
        let mut planner = FftPlanner::<f32>::new();
        let forward = planner.plan_fft_forward(n2);
        let inverse = planner.plan_fft_inverse(n2);
        Self { n2, forward, inverse }
    }

    /// Transform size this plan was built for.
    pub fn size(&self) -> usize {
        self.n2
    }

    /// Forward transform, in place. `buf.len()` must equal `self.size()`.
    /// Does not allocate.
    pub fn forward(&self, buf: &mut [Complex32]) {
        debug_assert_eq!(buf.len(), self.n2);
        self.forward.process(buf);
    }

    /// Inverse transform, in place, unscaled (the caller divides by
    /// `self.size()`). `buf.len()` must equal `self.size()`.
    pub fn inverse(&self, buf: &mut [Complex32]) {
        debug_assert_eq!(buf.len(), self.n2);
        self.inverse.process(buf);
    }
}
