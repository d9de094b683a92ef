//! The shared sinusoid wave table and its hot-reload machinery (§4.A).
//!
//! One period is generated per base-octave note; every higher octave reuses
//! that same period with an integer stride, so memory is
//! `O(notes_per_octave · average_period)` rather than
//! `O(total_notes · average_period)`.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::f32::consts::TAU;
use std::sync::atomic::{AtomicU8, Ordering::Relaxed};

const MIN_PERIOD_LEN: usize = 2;

/// Builds the RNG used for oscillator phase randomization (§4.A), seeded
/// deterministically when `seed` is given — which §8 Testable Property 5
/// (worker-count invariance) needs so the same `phase_seed` reproduces
/// identical initial phases across independently constructed `Engine`s —
/// or from OS entropy otherwise, as production wants.
pub(crate) fn seeded_rng(seed: Option<u64>) -> StdRng {
    match seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    }
}

/// One period per base-octave note, packed contiguously.
#[derive(Debug, Clone)]
pub struct WaveTable {
    /// Flattened period samples for every base-octave note, back to back.
    samples: Vec<f32>,
    /// Byte offset (in samples) of each base note's period within `samples`.
    offsets: Vec<usize>,
    /// Period length, in samples, of each base note.
    lengths: Vec<usize>,
    notes_per_octave: usize,
    num_octaves: usize,
    /// Bumped every time the table is regenerated; used to assert hot-reload
    /// atomicity in tests (§8 Testable Property 8).
    generation: u64,
}

impl WaveTable {
    /// Builds a table spanning `[f_lo, f_hi]` at `notes_per_octave` commas per
    /// octave, sampled at `sample_rate`.
    pub fn generate(f_lo: f32, f_hi: f32, notes_per_octave: usize, sample_rate: f32) -> Self {
        let notes_per_octave = notes_per_octave.max(1);
        let num_octaves = ((f_hi / f_lo).log2().ceil().max(1.0)) as usize;

        let mut offsets = Vec::with_capacity(notes_per_octave);
        let mut lengths = Vec::with_capacity(notes_per_octave);
        let mut samples = Vec::new();

        for k in 0..notes_per_octave {
            let freq = f_lo * 2f32.powf(k as f32 / notes_per_octave as f32);
            let period_len = (sample_rate / freq).round().max(MIN_PERIOD_LEN as f32) as usize;

            offsets.push(samples.len());
            lengths.push(period_len);

            for i in 0..period_len {
                let phase = i as f32 / period_len as f32;
                samples.push((phase * TAU).sin());
            }
        }

        Self { samples, offsets, lengths, notes_per_octave, num_octaves, generation: 0 }
    }

    pub fn notes_per_octave(&self) -> usize {
        self.notes_per_octave
    }

    pub fn num_octaves(&self) -> usize {
        self.num_octaves
    }

    /// Total number of oscillators this table supports, across all octaves.
    pub fn total_notes(&self) -> usize {
        self.notes_per_octave * self.num_octaves
    }

    /// Period length (in samples) for the given global note index.
    #[inline]
    pub fn period_len(&self, note_index: usize) -> usize {
        self.lengths[note_index % self.notes_per_octave]
    }

    /// Octave stride (the per-sample phase increment contributed by octave
    /// alone; multiplied into the final stride along with any other
    /// per-note modulation).
    #[inline]
    pub fn octave_stride(&self, note_index: usize) -> u32 {
        1u32 << (note_index / self.notes_per_octave)
    }

    /// Samples the waveform at `phase_idx` (already wrapped into
    /// `[0, period_len)`) for the given note.
    #[inline]
    pub fn sample(&self, note_index: usize, phase_idx: usize) -> f32 {
        let base = note_index % self.notes_per_octave;
        self.samples[self.offsets[base] + phase_idx]
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    fn bump_generation(&mut self) {
        self.generation = self.generation.wrapping_add(1);
    }

    /// Total memory used by the table's sample buffer, in elements. Equal to
    /// `Σ_k round(Fs / (f_lo · 2^(k / notes_per_octave)))`, independent of
    /// octave count (§8 Testable Property 2).
    pub fn total_sample_count(&self) -> usize {
        self.samples.len()
    }
}

/// The wave table's hot-reload state machine: `Idle → Pending → Idle`.
///
/// A frequency-range change enters `Pending`; the orchestrator regenerates
/// the table the next time it is about to release workers (while they are
/// blocked at the start barrier), then returns to `Idle`.
#[derive(Debug)]
pub struct HotReloadState {
    state: AtomicU8,
}

const IDLE: u8 = 0;
const PENDING: u8 = 1;

impl Default for HotReloadState {
    fn default() -> Self {
        Self { state: AtomicU8::new(IDLE) }
    }
}

impl HotReloadState {
    /// Requests a wave-table regeneration. Called from the parameter-update
    /// interface when `freq_lo`/`freq_hi` changes.
    pub fn request_reinit(&self) {
        self.state.store(PENDING, Relaxed);
    }

    pub fn is_pending(&self) -> bool {
        self.state.load(Relaxed) == PENDING
    }

    /// Marks the reload as complete, returning to `Idle`. Only the
    /// orchestrator calls this, and only after the new table and randomized
    /// phases are fully in place.
    fn complete(&self) {
        self.state.store(IDLE, Relaxed);
    }
}

/// Regenerates `table` in place from `(f_lo, f_hi, notes_per_octave)` and
/// randomizes every oscillator's phase index, then clears the pending flag.
/// Must only be called while all workers are blocked at the start barrier.
pub fn perform_hot_reload(
    table: &mut WaveTable,
    state: &HotReloadState,
    f_lo: f32,
    f_hi: f32,
    notes_per_octave: usize,
    sample_rate: f32,
    phases: &mut [usize],
    phase_seed: Option<u64>,
) {
    let mut fresh = WaveTable::generate(f_lo, f_hi, notes_per_octave, sample_rate);
    fresh.generation = table.generation.wrapping_add(1);
    *table = fresh;

    let mut rng = seeded_rng(phase_seed);
    for (note_index, phase) in phases.iter_mut().enumerate() {
        let period = table.period_len(note_index);
        *phase = rng.gen_range(0..period);
    }

    state.complete();
}

/// A one-pole smoother toward a binary target, used to mask the hot-reload
/// transition. Time constant is ≈50ms, a fixed engineering constant rather
/// than a musical parameter.
#[derive(Debug, Clone, Copy)]
pub struct GlobalFade {
    level: f32,
    target: f32,
    alpha: f32,
}

const FADE_TAU_SECONDS: f32 = 0.05;

impl GlobalFade {
    pub fn new(sample_rate: f32) -> Self {
        let alpha = 1.0 - (-1.0 / (FADE_TAU_SECONDS * sample_rate)).exp();
        Self { level: 1.0, target: 1.0, alpha }
    }

    pub fn request_fade_out(&mut self) {
        self.target = 0.0;
    }

    pub fn request_fade_in(&mut self) {
        self.target = 1.0;
    }

    #[inline]
    pub fn tick(&mut self) -> f32 {
        self.level += self.alpha * (self.target - self.level);
        self.level
    }

    pub fn level(&self) -> f32 {
        self.level
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_memory_is_independent_of_octave_count() {
        let narrow = WaveTable::generate(100.0, 190.0, 12, 48_000.0);
        let wide = WaveTable::generate(100.0, 12_000.0, 12, 48_000.0);

        let expected: usize = (0..12)
            .map(|k| {
                let f = 100.0 * 2f32.powf(k as f32 / 12.0);
                (48_000.0f32 / f).round().max(2.0) as usize
            })
            .sum();

        assert_eq!(narrow.total_sample_count(), expected);
        assert_eq!(wide.total_sample_count(), expected);
    }

    #[test]
    fn higher_octave_notes_share_period_length_with_base() {
        let table = WaveTable::generate(100.0, 1600.0, 12, 48_000.0);
        let total = table.total_notes();
        assert!(total >= 12 * 4);

        for k in 0..12 {
            let base_len = table.period_len(k);
            let octave_len = table.period_len(k + 12);
            assert_eq!(base_len, octave_len);
        }
    }

    #[test]
    fn octave_stride_doubles_per_octave() {
        let table = WaveTable::generate(100.0, 1600.0, 12, 48_000.0);
        assert_eq!(table.octave_stride(0), 1);
        assert_eq!(table.octave_stride(12), 2);
        assert_eq!(table.octave_stride(24), 4);
    }

    #[test]
    fn hot_reload_state_machine_round_trips() {
        let state = HotReloadState::default();
        assert!(!state.is_pending());
        state.request_reinit();
        assert!(state.is_pending());
        state.complete();
        assert!(!state.is_pending());
    }

    #[test]
    fn global_fade_converges_to_target() {
        let mut fade = GlobalFade::new(48_000.0);
        fade.request_fade_out();
        for _ in 0..48_000 {
            fade.tick();
        }
        assert!(fade.level() < 0.001);

        fade.request_fade_in();
        for _ in 0..48_000 {
            fade.tick();
        }
        assert!(fade.level() > 0.999);
    }
}
