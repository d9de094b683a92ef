//! Per-note oscillator state (§3 "Oscillator").
//!
//! An oscillator owns no wave data itself — it is an index plus a handful of
//! smoother/pan state words. The wave table (§4.A) and the per-buffer
//! precomputed sample arrays (§4.E step 3) are read-only inputs supplied by
//! the orchestrator each buffer.

/// Per-note state carried across audio buffers.
#[derive(Debug, Clone, Copy)]
pub struct Oscillator {
    /// Nominal frequency in Hz, used only to derive the frequency-weighted
    /// release coefficient; playback itself is driven by the wave table.
    pub frequency: f32,

    /// Current position within this note's period, always in
    /// `[0, period_len)`.
    pub phase_index: usize,

    /// Smoothed current volume, always in `[0, 1]`.
    pub current_volume: f32,

    /// Precomputed attack coefficient, `(0, 1]`.
    pub alpha_up: f32,
    /// Precomputed frequency-weighted release coefficient, `(0, 1]`.
    pub alpha_down_weighted: f32,

    /// Endpoint gains applied at the end of the previous buffer, used as the
    /// ramp origin for this buffer's pan interpolation (§4.G).
    pub last_left_gain: f32,
    pub last_right_gain: f32,
}

impl Oscillator {
    pub fn new(frequency: f32, initial_phase: usize) -> Self {
        Self {
            frequency,
            phase_index: initial_phase,
            current_volume: 0.0,
            alpha_up: 1.0,
            alpha_down_weighted: 1.0,
            last_left_gain: std::f32::consts::FRAC_1_SQRT_2,
            last_right_gain: std::f32::consts::FRAC_1_SQRT_2,
        }
    }

    /// Commits the phase index reached after `num_samples` increment-then-
    /// read steps of `stride`, wrapped into `[0, period_len)`. The phase is
    /// advanced *before* each sample is read, and the value committed here
    /// is the phase reached after the *last* sample's advance (§9 Open
    /// Question, resolved against the source).
    #[inline]
    pub fn commit_phase(&mut self, stride: u32, num_samples: usize, period_len: usize) {
        let advance = (stride as u64) * (num_samples as u64);
        let new_phase = (self.phase_index as u64 + advance) % period_len as u64;
        self.phase_index = new_phase as usize;
    }
}
