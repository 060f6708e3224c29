//! STFT Engine (C2).
//!
//! Windowed framing, forward/inverse STFT with overlap-add and window-sum
//! normalization. Scratch buffers are pre-sized and reused across calls
//! under a `parking_lot::Mutex`, matching spec.md §4.2/§5's "forward and
//! inverse must serialize on an internal lock because scratch buffers are
//! reused".

use crate::error::{EnhanceError, EnhanceResult};
use crate::fft::FftPlan;
use crate::spectrum::Spectrum;

use num_complex::Complex32;
use parking_lot::Mutex;
use std::sync::Arc;

const WINDOW_SUM_EPS: f32 = 1e-10;

/// Periodic (denormalized, peak-1) Hann window of length `n`, satisfying
/// COLA at 50% hop with unit interior gain.
fn hann_denorm(n: usize) -> Vec<f32> {
    if n == 1 {
        return vec![1.0];
    }
    (0..n)
        .map(|i| 0.5 - 0.5 * (2.0 * std::f32::consts::PI * i as f32 / n as f32).cos())
        .collect()
}

struct Scratch {
    /// Complex working buffer of length `n2`, reused per frame.
    buf: Vec<Complex32>,
}

/// The real-time STFT/ISTFT front end.
pub struct StftEngine {
    n_fft: usize,
    n_hop: usize,
    bins: usize,
    window: Vec<f32>,
    plan: Arc<FftPlan>,
    scratch: Mutex<Scratch>,
}

impl StftEngine {
    /// Build an engine for the given FFT size and hop. `n2` (the FFT plan's
    /// transform size) is taken equal to `n_fft`: `rustfft` supports
    /// arbitrary transform sizes via mixed-radix algorithms, so the
    /// zero-pad-to-next-power-of-two step in the spec's literal
    /// description is a no-op here and is elided rather than performed and
    /// immediately undone.
    pub fn new(n_fft: usize, n_hop: usize) -> Self {
        let plan = Arc::new(FftPlan::new(n_fft));
        Self {
            n_fft,
            n_hop,
            bins: n_fft / 2 + 1,
            window: hann_denorm(n_fft),
            plan,
            scratch: Mutex::new(Scratch {
                buf: vec![Complex32::new(0.0, 0.0); n_fft],
            }),
        }
    }

    /// Positive-frequency bin count, `K`.
    pub fn bins(&self) -> usize {
        self.bins
    }

    /// FFT / window size.
    pub fn n_fft(&self) -> usize {
        self.n_fft
    }

    /// Hop size.
    pub fn n_hop(&self) -> usize {
        self.n_hop
    }

    /// Number of complete frames obtainable from `len` samples, or `None`
    /// if `len < n_fft`.
    pub fn frame_count(&self, len: usize) -> Option<usize> {
        if len < self.n_fft {
            return None;
        }
        Some(1 + (len - self.n_fft) / self.n_hop)
    }

    /// Forward STFT. Returns an empty (`0` frame) spectrum if
    /// `audio.len() < n_fft`.
    pub fn transform(&self, audio: &[f32]) -> Spectrum {
        let frames = match self.frame_count(audio.len()) {
            Some(t) => t,
            None => return Spectrum::zeros(0, self.bins),
        };

        let mut spec = Spectrum::zeros(frames, self.bins);
        let mut scratch = self.scratch.lock();

        for t in 0..frames {
            let start = t * self.n_hop;
            let frame = &audio[start..start + self.n_fft];

            for (i, (&s, &w)) in frame.iter().zip(self.window.iter()).enumerate() {
                scratch.buf[i] = Complex32::new(s * w, 0.0);
            }

            self.plan.forward(&mut scratch.buf);

            if scratch.buf[..self.bins].iter().any(|c| !c.re.is_finite() || !c.im.is_finite()) {
                log::warn!(target: "stft", "frame {t} produced non-finite FFT output, skipping");
                continue;
            }

            let re_out = spec.frame_re_mut(t);
            let im_out = spec.frame_im_mut(t);
            for (i, c) in scratch.buf[..self.bins].iter().enumerate() {
                re_out[i] = c.re;
                im_out[i] = c.im;
            }
        }

        spec
    }

    /// Inverse STFT with overlap-add and window-sum normalization. Returns
    /// a buffer of length `(frames - 1) * n_hop + n_fft`, or an empty
    /// buffer for a zero-frame spectrum.
    pub fn inverse(&self, spectrum: &Spectrum) -> EnhanceResult<Vec<f32>> {
        if spectrum.bins() != self.bins {
            return Err(EnhanceError::ShapeMismatch {
                expected: self.bins.to_string(),
                got: spectrum.bins().to_string(),
            });
        }

        let frames = spectrum.frames();
        if frames == 0 {
            return Ok(Vec::new());
        }

        let out_len = (frames - 1)
            .checked_mul(self.n_hop)
            .and_then(|v| v.checked_add(self.n_fft))
            .ok_or_else(|| EnhanceError::ProcessingFailed("ISTFT output length overflow".into()))?;

        let mut output = vec![0.0f32; out_len];
        let mut window_sum = vec![0.0f32; out_len];
        let mut scratch = self.scratch.lock();
        let n2 = self.plan.size();

        for t in 0..frames {
            let re = spectrum.frame_re(t);
            let im = spectrum.frame_im(t);

            for c in scratch.buf.iter_mut() {
                *c = Complex32::new(0.0, 0.0);
            }
            for i in 0..self.bins {
                scratch.buf[i] = Complex32::new(re[i], im[i]);
            }
            // Hermitian symmetry: negative-frequency bins mirror the
            // positive ones (bin 0 / Nyquist are not mirrored).
            for i in 1..self.bins.saturating_sub(1) {
                scratch.buf[n2 - i] = Complex32::new(re[i], -im[i]);
            }

            self.plan.inverse(&mut scratch.buf);

            let norm = 1.0 / n2 as f32;
            let start = t * self.n_hop;
            for i in 0..self.n_fft {
                let sample = scratch.buf[i].re * norm * self.window[i];
                output[start + i] += sample;
                window_sum[start + i] += self.window[i] * self.window[i];
            }
        }

        for (s, w) in output.iter_mut().zip(window_sum.iter()) {
            if *w <= WINDOW_SUM_EPS {
                *s = 0.0;
            } else {
                *s /= w.max(WINDOW_SUM_EPS);
            }
            if !s.is_finite() {
                *s = 0.0;
            }
        }

        Ok(output)
    }
}
