//! Deep Filtering Kernel (C5).
//!
//! Stage 1 applies a real-valued per-bin ERB mask to the whole spectrum.
//! Stage 2 applies a short complex FIR along the time axis to the first
//! `df_bands` bins, using per-(frame, bin) taps produced by the DF decoder.
//! Index arithmetic for `T * df_bands * df_order` uses checked operations —
//! large `T` and `df_bands` products can overflow 32-bit index math.

use crate::error::{EnhanceError, EnhanceResult};
use crate::spectrum::Spectrum;

/// Applies the ERB mask and deep-filter FIR in place.
///
/// `mask` must have length `spectrum.frames() * spectrum.bins()`.
/// `coeffs` must have length `spectrum.frames() * df_bands * df_order`.
pub fn apply(
    spectrum: &mut Spectrum,
    mask: &[f32],
    coeffs: &[f32],
    df_bands: usize,
    df_order: usize,
) -> EnhanceResult<()> {
    let frames = spectrum.frames();
    let bins = spectrum.bins();

    let expected_mask_len = frames
        .checked_mul(bins)
        .ok_or_else(|| EnhanceError::ProcessingFailed("mask size overflow".into()))?;
    if mask.len() != expected_mask_len {
        return Err(EnhanceError::ShapeMismatch {
            expected: expected_mask_len.to_string(),
            got: mask.len().to_string(),
        });
    }

    let expected_coef_len = frames
        .checked_mul(df_bands)
        .and_then(|v| v.checked_mul(df_order))
        .ok_or_else(|| EnhanceError::ProcessingFailed("coefficient size overflow".into()))?;
    if coeffs.len() != expected_coef_len {
        return Err(EnhanceError::ShapeMismatch {
            expected: expected_coef_len.to_string(),
            got: coeffs.len().to_string(),
        });
    }

    // Stage 1: ERB masking, all bins.
    for (i, (re, im)) in spectrum.re.iter_mut().zip(spectrum.im.iter_mut()).enumerate() {
        let g = mask[i];
        *re *= g;
        *im *= g;
    }

    if df_bands == 0 || frames == 0 {
        return Ok(());
    }

    // Snapshot the masked low-frequency bins before Stage 2 overwrites
    // them in place; the FIR reads neighboring *masked* frames, which
    // would otherwise already be partially filtered by the time we reach
    // them.
    let mut masked_re = vec![0.0f32; frames * df_bands];
    let mut masked_im = vec![0.0f32; frames * df_bands];
    for t in 0..frames {
        let src_re = spectrum.frame_re(t);
        let src_im = spectrum.frame_im(t);
        masked_re[t * df_bands..(t + 1) * df_bands].copy_from_slice(&src_re[..df_bands]);
        masked_im[t * df_bands..(t + 1) * df_bands].copy_from_slice(&src_im[..df_bands]);
    }

    let half = (df_order / 2) as isize;

    for t in 0..frames {
        let dst_re = spectrum.frame_re_mut(t);
        let dst_im = spectrum.frame_im_mut(t);

        for b in 0..df_bands {
            let mut acc_re = 0.0f32;
            let mut acc_im = 0.0f32;

            for k in 0..df_order {
                let src_t = t as isize - half + k as isize;
                if src_t < 0 || src_t >= frames as isize {
                    continue;
                }
                let src_t = src_t as usize;
                let c = coeffs[t * df_bands * df_order + b * df_order + k];
                acc_re += c * masked_re[src_t * df_bands + b];
                acc_im += c * masked_im[src_t * df_bands + b];
            }

            dst_re[b] = acc_re;
            dst_im[b] = acc_im;
        }
    }

    Ok(())
}
