//! The worker inner loop (§4.D): per-note envelope, waveform sampling and
//! stereo panning, run once per audio buffer over a contiguous note range.
//!
//! [`process_note_range`] is the single source of truth for this math. It is
//! called both by the real-time [`crate::pool::WorkerPool`] threads (one
//! call per worker per buffer) and, sequentially over each worker's range,
//! by [`crate::engine::Engine`]'s synchronous render path — so the two can
//! never disagree (§8 Testable Property 5, "worker-count invariance").
//! Workers never lock, never allocate and never log; every array this
//! function touches is handed in by the caller, sized once at construction.

use crate::envelope::{fill_envelope_buffer, EnvelopeCoeffs};
use crate::oscillator::Oscillator;
use crate::pan::ramp_gains;
use crate::pow_approx::UnitPow;
use crate::wavetable::WaveTable;

/// Per-buffer inputs for one worker's note range, already batch-copied out
/// of the image→synth double buffer by the orchestrator (§4.E step 2).
/// Indices here are local to the worker's range, not global note indices.
pub struct WorkerInputs<'a> {
    pub target_volumes: &'a [f32],
    pub pan_gains: &'a [(f32, f32)],
    pub stereo_enabled: bool,
}

/// A worker's partial contribution to the buffer, statically sized to the
/// engine's configured `audio_buffer_size` and cleared (not reallocated) at
/// the start of each call.
#[derive(Debug, Clone)]
pub struct WorkerOutput {
    pub mono: Vec<f32>,
    pub left: Vec<f32>,
    pub right: Vec<f32>,
    pub volume_sum: Vec<f32>,
    pub volume_max: Vec<f32>,
}

impl WorkerOutput {
    pub fn new(buffer_len: usize) -> Self {
        Self {
            mono: vec![0.0; buffer_len],
            left: vec![0.0; buffer_len],
            right: vec![0.0; buffer_len],
            volume_sum: vec![0.0; buffer_len],
            volume_max: vec![0.0; buffer_len],
        }
    }

    fn clear(&mut self) {
        self.mono.fill(0.0);
        self.left.fill(0.0);
        self.right.fill(0.0);
        self.volume_sum.fill(0.0);
        self.volume_max.fill(0.0);
    }
}

/// Scratch arrays reused across buffers by one worker, sized once to the
/// engine's `audio_buffer_size`. Never reallocated in the hot path.
#[derive(Debug, Clone)]
pub struct WorkerScratch {
    wave: Vec<f32>,
    envelope: Vec<f32>,
    left_gain: Vec<f32>,
    right_gain: Vec<f32>,
}

impl WorkerScratch {
    pub fn new(buffer_len: usize) -> Self {
        Self {
            wave: vec![0.0; buffer_len],
            envelope: vec![0.0; buffer_len],
            left_gain: vec![0.0; buffer_len],
            right_gain: vec![0.0; buffer_len],
        }
    }
}

/// Runs the per-note inner loop over `oscillators[range.0..range.1]`,
/// accumulating into `output`. `coeffs` is indexed by *global* note index
/// (shared read-only across all workers); `inputs` is already sliced to
/// this worker's range by the caller.
///
/// Allocates nothing: every scratch and output array is supplied by the
/// caller and reused verbatim buffer after buffer.
#[allow(clippy::too_many_arguments)]
pub fn process_note_range(
    oscillators: &mut [Oscillator],
    range: (usize, usize),
    table: &WaveTable,
    coeffs: &[EnvelopeCoeffs],
    inputs: &WorkerInputs,
    volume_weighting: &UnitPow,
    buffer_len: usize,
    output: &mut WorkerOutput,
    scratch: &mut WorkerScratch,
) {
    output.clear();

    let (start, end) = range;
    debug_assert_eq!(oscillators.len(), end - start);

    for local_idx in 0..oscillators.len() {
        let note_index = start + local_idx;
        let osc = &mut oscillators[local_idx];
        let period = table.period_len(note_index);
        let stride = table.octave_stride(note_index) as usize;
        let note_coeffs = coeffs[note_index];

        // Increment-then-read: phase is advanced before the sample at that
        // position is taken, and the committed value is the phase reached
        // after the buffer's *last* advance (§9 Open Question).
        let mut phase = osc.phase_index;
        for i in 0..buffer_len {
            phase = (phase + stride) % period;
            scratch.wave[i] = table.sample(note_index, phase);
        }
        osc.phase_index = phase;

        let target = inputs.target_volumes[local_idx];
        let v_new = fill_envelope_buffer(
            &mut scratch.envelope[..buffer_len],
            osc.current_volume,
            target,
            note_coeffs,
        );
        osc.current_volume = v_new;

        if inputs.stereo_enabled {
            let to = inputs.pan_gains[local_idx];
            let from = (osc.last_left_gain, osc.last_right_gain);
            ramp_gains(
                &mut scratch.left_gain[..buffer_len],
                &mut scratch.right_gain[..buffer_len],
                from,
                to,
                buffer_len,
            );
            osc.last_left_gain = to.0;
            osc.last_right_gain = to.1;
        }

        for i in 0..buffer_len {
            let envelope_sample = scratch.envelope[i];
            let weighted = envelope_sample * scratch.wave[i];

            output.mono[i] += weighted;
            if inputs.stereo_enabled {
                output.left[i] += weighted * scratch.left_gain[i];
                output.right[i] += weighted * scratch.right_gain[i];
            }

            output.volume_sum[i] += volume_weighting.eval(envelope_sample);
            output.volume_max[i] = output.volume_max[i].max(envelope_sample);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::compute_coeffs;
    use crate::wavetable::WaveTable;
    use approx::assert_relative_eq;

    fn test_setup(
        num_notes: usize,
        buffer_len: usize,
    ) -> (WaveTable, Vec<EnvelopeCoeffs>, Vec<Oscillator>) {
        let table = WaveTable::generate(100.0, 1600.0, num_notes, 48_000.0);
        let coeffs: Vec<_> = (0..table.total_notes())
            .map(|_| compute_coeffs(440.0, 0.01, 0.3, 440.0, 0.3, 48_000.0))
            .collect();
        let oscillators: Vec<_> =
            (0..table.total_notes()).map(|i| Oscillator::new(440.0, i % 7)).collect();
        let _ = buffer_len;
        (table, coeffs, oscillators)
    }

    #[test]
    fn silence_target_settles_to_zero_mono_output() {
        let (table, coeffs, mut oscillators) = test_setup(12, 64);
        let total = table.total_notes();
        let buffer_len = 64;

        let targets = vec![0.0f32; total];
        let pans = vec![(std::f32::consts::FRAC_1_SQRT_2, std::f32::consts::FRAC_1_SQRT_2); total];
        let inputs =
            WorkerInputs { target_volumes: &targets, pan_gains: &pans, stereo_enabled: false };
        let weighting = UnitPow::new(1.0);

        let mut output = WorkerOutput::new(buffer_len);
        let mut scratch = WorkerScratch::new(buffer_len);

        for _ in 0..50 {
            process_note_range(
                &mut oscillators,
                (0, total),
                &table,
                &coeffs,
                &inputs,
                &weighting,
                buffer_len,
                &mut output,
                &mut scratch,
            );
        }

        for &s in &output.mono {
            assert!(s.abs() < 1e-4);
        }
    }

    #[test]
    fn center_pan_gives_equal_left_and_right() {
        let (table, coeffs, mut oscillators) = test_setup(4, 32);
        let total = table.total_notes();
        let buffer_len = 32;

        let targets = vec![1.0f32; total];
        let pans = vec![(std::f32::consts::FRAC_1_SQRT_2, std::f32::consts::FRAC_1_SQRT_2); total];
        let inputs =
            WorkerInputs { target_volumes: &targets, pan_gains: &pans, stereo_enabled: true };
        let weighting = UnitPow::new(1.0);

        let mut output = WorkerOutput::new(buffer_len);
        let mut scratch = WorkerScratch::new(buffer_len);

        for _ in 0..10 {
            process_note_range(
                &mut oscillators,
                (0, total),
                &table,
                &coeffs,
                &inputs,
                &weighting,
                buffer_len,
                &mut output,
                &mut scratch,
            );
        }

        for i in 0..buffer_len {
            let expected = output.mono[i] * std::f32::consts::FRAC_1_SQRT_2;
            assert_relative_eq!(output.left[i], expected, epsilon = 1e-4);
            assert_relative_eq!(output.right[i], expected, epsilon = 1e-4);
        }
    }

    #[test]
    fn splitting_range_across_calls_matches_single_call() {
        let (table, coeffs, oscillators) = test_setup(12, 48);
        let total = table.total_notes();
        let buffer_len = 48;

        let targets: Vec<f32> = (0..total).map(|i| (i as f32 / total as f32)).collect();
        let pans = vec![(0.7f32, 0.3f32); total];
        let weighting = UnitPow::new(1.0);

        // Single-range pass.
        let mut single_osc = oscillators.clone();
        let inputs_full =
            WorkerInputs { target_volumes: &targets, pan_gains: &pans, stereo_enabled: true };
        let mut single_out = WorkerOutput::new(buffer_len);
        let mut single_scratch = WorkerScratch::new(buffer_len);
        process_note_range(
            &mut single_osc,
            (0, total),
            &table,
            &coeffs,
            &inputs_full,
            &weighting,
            buffer_len,
            &mut single_out,
            &mut single_scratch,
        );

        // Two-range pass covering the same notes.
        let mid = total / 2;
        let mut split_osc = oscillators;
        let (left_osc, right_osc) = split_osc.split_at_mut(mid);

        let mut left_out = WorkerOutput::new(buffer_len);
        let mut left_scratch = WorkerScratch::new(buffer_len);
        let left_inputs = WorkerInputs {
            target_volumes: &targets[0..mid],
            pan_gains: &pans[0..mid],
            stereo_enabled: true,
        };
        process_note_range(
            left_osc,
            (0, mid),
            &table,
            &coeffs,
            &left_inputs,
            &weighting,
            buffer_len,
            &mut left_out,
            &mut left_scratch,
        );

        let mut right_out = WorkerOutput::new(buffer_len);
        let mut right_scratch = WorkerScratch::new(buffer_len);
        let right_inputs = WorkerInputs {
            target_volumes: &targets[mid..total],
            pan_gains: &pans[mid..total],
            stereo_enabled: true,
        };
        process_note_range(
            right_osc,
            (mid, total),
            &table,
            &coeffs,
            &right_inputs,
            &weighting,
            buffer_len,
            &mut right_out,
            &mut right_scratch,
        );

        for i in 0..buffer_len {
            let combined_mono = left_out.mono[i] + right_out.mono[i];
            assert_relative_eq!(combined_mono, single_out.mono[i], epsilon = 1e-4);
        }
    }
}
