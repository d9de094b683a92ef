//! Equal-power stereo panning (§4.G).

use std::f32::consts::FRAC_PI_4;

/// Maps a pan position `p ∈ [-1, 1]` to equal-power `(left, right)` gains:
/// `L = cos((p+1)·π/4)`, `R = sin((p+1)·π/4)`.
#[inline]
pub fn equal_power_gains(pan: f32) -> (f32, f32) {
    let pan = pan.clamp(-1.0, 1.0);
    let theta = (pan + 1.0) * FRAC_PI_4;
    (theta.cos(), theta.sin())
}

/// Linearly interpolates from `(from_l, from_r)` to `(to_l, to_r)` across
/// `len` samples, writing into `out_l`/`out_r`. Used to avoid zipper noise
/// when a note's pan gains change between buffers.
#[inline]
pub fn ramp_gains(
    out_l: &mut [f32],
    out_r: &mut [f32],
    from: (f32, f32),
    to: (f32, f32),
    len: usize,
) {
    if len == 0 {
        return;
    }
    let step_l = (to.0 - from.0) / len as f32;
    let step_r = (to.1 - from.1) / len as f32;

    let mut l = from.0;
    let mut r = from.1;
    for i in 0..len {
        l += step_l;
        r += step_r;
        out_l[i] = l;
        out_r[i] = r;
    }
}
