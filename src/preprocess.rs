//! Image preprocessing (§4.B): raw CIS pixel lines to per-note target
//! volumes, an image-wide contrast factor, and optional stereo pan gains.

use crate::config::EngineConfig;
use crate::pan::equal_power_gains;
use std::sync::atomic::Ordering::Relaxed;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PreprocessError {
    #[error("empty pixel input")]
    EmptyInput,
    #[error("channel length mismatch: r={r}, g={g}, b={b}")]
    ChannelLengthMismatch { r: usize, g: usize, b: usize },
}

/// The output of one preprocessing pass, ready to be published into the
/// image→synth double buffer (§3 "Preprocessed frame").
#[derive(Debug, Clone)]
pub struct PreprocessedFrame {
    pub target_volumes: Vec<f32>,
    pub contrast_factor: f32,
    pub pan_gains: Vec<(f32, f32)>,
    /// Monotonic sequence number, not wall-clock time, so tests remain
    /// deterministic without faking the clock.
    pub sequence: u64,
    /// The raw RGB line this frame was derived from, for the display/DMX
    /// tap (§4.J). `None` for synthetic frames (e.g. `silent`) that never
    /// came from a real image line; the tap keeps its previous snapshot
    /// rather than publishing one in that case.
    pub raw_rgb: Option<(Vec<u8>, Vec<u8>, Vec<u8>)>,
}

impl PreprocessedFrame {
    pub fn silent(total_notes: usize) -> Self {
        Self {
            target_volumes: vec![0.0; total_notes],
            contrast_factor: 1.0,
            pan_gains: vec![(std::f32::consts::FRAC_1_SQRT_2, std::f32::consts::FRAC_1_SQRT_2); total_notes],
            sequence: 0,
            raw_rgb: None,
        }
    }
}

/// Preprocesses one assembled image line into a [`PreprocessedFrame`].
///
/// Deterministic and stateless aside from reading `config`. The only failure
/// modes are empty or mismatched-length channel inputs.
pub fn preprocess_line(
    r: &[u8],
    g: &[u8],
    b: &[u8],
    total_notes: usize,
    config: &EngineConfig,
    sequence: u64,
) -> Result<PreprocessedFrame, PreprocessError> {
    if r.is_empty() || g.is_empty() || b.is_empty() {
        return Err(PreprocessError::EmptyInput);
    }
    if r.len() != g.len() || g.len() != b.len() {
        return Err(PreprocessError::ChannelLengthMismatch { r: r.len(), g: g.len(), b: b.len() });
    }

    let pixel_count = r.len();
    let invert = config.invert_intensity.load(Relaxed);
    let non_linear = config.enable_non_linear_mapping.load(Relaxed);
    let gamma = config.gamma.load(Relaxed);

    let mut luminance = Vec::with_capacity(pixel_count);
    let mut pan_diff = Vec::with_capacity(pixel_count);

    let br_weight = config.stereo_blue_red_weight.load(Relaxed);
    let cy_weight = config.stereo_cyan_yellow_weight.load(Relaxed);

    for i in 0..pixel_count {
        let (rf, gf, bf) = (r[i] as f32 / 255.0, g[i] as f32 / 255.0, b[i] as f32 / 255.0);

        let mut v = (rf + gf + bf) / 3.0;
        if invert {
            v = 1.0 - v;
        }
        if non_linear {
            v = v.powf(gamma);
        }
        luminance.push(v.clamp(0.0, 1.0));

        // Cyan/yellow proxies from the green-blue and red-green channel
        // pairs, combined with the direct blue-red axis.
        let cyan = (gf + bf) * 0.5;
        let yellow = (rf + gf) * 0.5;
        let d = br_weight * (bf - rf) + cy_weight * (cyan - yellow);
        pan_diff.push(d);
    }

    let pixels_per_note = (config.pixels_per_note.load(Relaxed) as usize).max(1);

    let target_volumes = average_windows(&luminance, total_notes, pixels_per_note);

    let image_std = population_std(&luminance);
    let contrast_min = config.contrast_min.load(Relaxed);
    let power = config.contrast_adjustment_power.load(Relaxed);
    let contrast_factor = image_std.powf(power).max(contrast_min);

    let amplification = config.stereo_temperature_amplification.load(Relaxed);
    let curve_exponent = config.stereo_temperature_curve_exponent.load(Relaxed);
    let pan_positions = average_windows(&pan_diff, total_notes, pixels_per_note);

    let pan_gains = pan_positions
        .into_iter()
        .map(|d| {
            let d = d.clamp(-1.0, 1.0);
            let shaped = d.signum() * d.abs().powf(curve_exponent) * amplification;
            equal_power_gains(shaped.clamp(-1.0, 1.0))
        })
        .collect();

    Ok(PreprocessedFrame {
        target_volumes,
        contrast_factor,
        pan_gains,
        sequence,
        raw_rgb: Some((r.to_vec(), g.to_vec(), b.to_vec())),
    })
}

/// Averages `values` into `num_windows` buckets of `window` consecutive
/// elements, tolerating a final partial window or an input shorter than
/// `num_windows * window` (pads missing windows with the last available
/// mean, or zero if nothing is available).
fn average_windows(values: &[f32], num_windows: usize, window: usize) -> Vec<f32> {
    let mut out = Vec::with_capacity(num_windows);
    let mut last = 0.0;

    for n in 0..num_windows {
        let start = n * window;
        if start >= values.len() {
            out.push(last);
            continue;
        }
        let end = (start + window).min(values.len());
        let slice = &values[start..end];
        let mean = slice.iter().sum::<f32>() / slice.len() as f32;
        out.push(mean);
        last = mean;
    }

    out
}

fn population_std(values: &[f32]) -> f32 {
    if values.is_empty() {
        return 0.0;
    }
    let mean = values.iter().sum::<f32>() / values.len() as f32;
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f32>() / values.len() as f32;
    variance.sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{EngineConfig, StaticParams};
    use approx::assert_relative_eq;

    fn default_config() -> EngineConfig {
        EngineConfig::new(StaticParams::default())
    }

    #[test]
    fn empty_input_is_an_error() {
        let cfg = default_config();
        let result = preprocess_line(&[], &[], &[], 10, &cfg, 0);
        assert!(result.is_err());
    }

    #[test]
    fn mismatched_lengths_are_an_error() {
        let cfg = default_config();
        let result = preprocess_line(&[1, 2], &[1], &[1, 2], 10, &cfg, 0);
        assert!(result.is_err());
    }

    #[test]
    fn all_zero_pixels_yield_silent_frame_when_not_inverted() {
        let cfg = default_config();
        let pixels = vec![0u8; 100];
        let frame =
            preprocess_line(&pixels, &pixels, &pixels, 10, &cfg, 0).expect("should preprocess");

        assert!(frame.target_volumes.iter().all(|&v| v.abs() < 1e-6));
    }

    #[test]
    fn uniform_gray_yields_zero_image_std_and_contrast_min() {
        let cfg = default_config();
        cfg.contrast_min.store(0.15, Relaxed);
        let pixels = vec![128u8; 100];
        let frame =
            preprocess_line(&pixels, &pixels, &pixels, 10, &cfg, 0).expect("should preprocess");

        assert_relative_eq!(frame.contrast_factor, 0.15, epsilon = 1e-6);
    }

    #[test]
    fn target_volumes_are_bounded() {
        let cfg = default_config();
        let r: Vec<u8> = (0..256).map(|i| (i % 256) as u8).collect();
        let g = r.clone();
        let b = r.clone();
        let frame = preprocess_line(&r, &g, &b, 16, &cfg, 0).expect("should preprocess");

        for v in frame.target_volumes {
            assert!((0.0..=1.0).contains(&v));
        }
    }

    #[test]
    fn centered_pan_diff_yields_center_gains() {
        let cfg = default_config();
        let pixels = vec![100u8; 64];
        let frame =
            preprocess_line(&pixels, &pixels, &pixels, 8, &cfg, 0).expect("should preprocess");

        for (l, r) in frame.pan_gains {
            assert_relative_eq!(l, r, epsilon = 1e-3);
        }
    }
}
