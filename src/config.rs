//! The engine's configuration record.
//!
//! [`EngineConfig`] is the single owned value through which every tunable
//! parameter flows. Fields that are legitimately adjustable at runtime (the
//! "parameter-update interface" of the spec) are stored as lock-free atomics
//! so that [`EngineConfig::set`]-style writes never contend with the audio
//! path; fields fixed for the lifetime of the engine (sample rate, buffer
//! size, worker count, pixel count) are plain values set once at
//! construction.

use atomic::Atomic;
use std::sync::atomic::Ordering::Relaxed;

/// Minimum worker count accepted after clamping.
pub const MIN_WORKERS: usize = 1;
/// Maximum worker count accepted after clamping.
pub const MAX_WORKERS: usize = 16;

/// Minimum attack/release time constant, in seconds.
const MIN_TAU: f32 = 0.0001;
/// Maximum attack/release time constant, in seconds.
const MAX_TAU: f32 = 5.0;

const MIN_RESPONSE_EXPONENT: f32 = 0.1;
const MAX_RESPONSE_EXPONENT: f32 = 8.0;

/// Recognized CIS line lengths, in pixels.
pub const VALID_PIXEL_COUNTS: [usize; 2] = [1728, 3456];

/// Parameters fixed for the lifetime of the engine.
///
/// Changing any of these requires rebuilding the engine; none of them are
/// exposed through the parameter-update interface.
#[derive(Debug, Clone, Copy)]
pub struct StaticParams {
    pub sample_rate: f32,
    pub audio_buffer_size: usize,
    pub pixel_count: usize,
    pub num_workers: usize,
    pub notes_per_octave: usize,
    /// Seeds the oscillator phase-randomization RNG at construction and at
    /// every hot reload (§4.A). `None` draws a fresh seed from the OS's
    /// entropy source each time, as production wants; `Some(seed)` makes
    /// initial phases reproducible, which §8 Testable Property 5 (worker-
    /// count invariance) needs to assert exact cross-worker-count equality
    /// rather than just boundedness.
    pub phase_seed: Option<u64>,
}

impl Default for StaticParams {
    fn default() -> Self {
        Self {
            sample_rate: 48_000.0,
            audio_buffer_size: 512,
            pixel_count: 3456,
            num_workers: 4,
            notes_per_octave: 48,
            phase_seed: None,
        }
    }
}

impl StaticParams {
    /// Clamps out-of-range fields in place, logging a warning for each clamp
    /// applied. Never fails: every field has a safe fallback.
    fn validate(&mut self) {
        if self.num_workers < MIN_WORKERS || self.num_workers > MAX_WORKERS {
            log::warn!(
                "num_workers {} out of range [{MIN_WORKERS}, {MAX_WORKERS}], clamping",
                self.num_workers
            );
            self.num_workers = self.num_workers.clamp(MIN_WORKERS, MAX_WORKERS);
        }

        if !VALID_PIXEL_COUNTS.contains(&self.pixel_count) {
            log::warn!(
                "pixel_count {} is not a recognized CIS line length, falling back to {}",
                self.pixel_count,
                VALID_PIXEL_COUNTS[1]
            );
            self.pixel_count = VALID_PIXEL_COUNTS[1];
        }

        if self.audio_buffer_size == 0 {
            log::warn!("audio_buffer_size was 0, clamping to 64");
            self.audio_buffer_size = 64;
        }

        if self.notes_per_octave == 0 {
            log::warn!("notes_per_octave was 0, clamping to 1");
            self.notes_per_octave = 1;
        }

        if self.sample_rate <= 0.0 {
            log::warn!("sample_rate {} invalid, falling back to 48000", self.sample_rate);
            self.sample_rate = 48_000.0;
        }
    }
}

/// Parameters reachable from the parameter-update interface (MIDI / config
/// layer), stored as atomics so updates never need to lock.
#[derive(Debug)]
pub struct EngineConfig {
    pub static_params: StaticParams,

    pub freq_lo: Atomic<f32>,
    pub freq_hi: Atomic<f32>,

    pub master_volume: Atomic<f32>,

    pub tau_up: Atomic<f32>,
    pub tau_down: Atomic<f32>,
    pub decay_freq_ref: Atomic<f32>,
    pub decay_exponent: Atomic<f32>,

    pub stereo_enabled: Atomic<bool>,

    pub invert_intensity: Atomic<bool>,
    pub enable_non_linear_mapping: Atomic<bool>,
    pub gamma: Atomic<f32>,
    pub pixels_per_note: Atomic<u32>,
    pub contrast_min: Atomic<f32>,
    pub contrast_adjustment_power: Atomic<f32>,

    pub volume_weighting_exponent: Atomic<f32>,
    pub response_exponent: Atomic<f32>,
    pub soft_limit_threshold: Atomic<f32>,
    pub soft_limit_knee: Atomic<f32>,

    pub stereo_blue_red_weight: Atomic<f32>,
    pub stereo_cyan_yellow_weight: Atomic<f32>,
    pub stereo_temperature_amplification: Atomic<f32>,
    pub stereo_temperature_curve_exponent: Atomic<f32>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            static_params: StaticParams::default(),

            freq_lo: Atomic::new(65.41), // C2
            freq_hi: Atomic::new(12_000.0),

            master_volume: Atomic::new(0.8),

            tau_up: Atomic::new(0.01),
            tau_down: Atomic::new(0.3),
            decay_freq_ref: Atomic::new(440.0),
            decay_exponent: Atomic::new(0.3),

            stereo_enabled: Atomic::new(true),

            invert_intensity: Atomic::new(false),
            enable_non_linear_mapping: Atomic::new(true),
            gamma: Atomic::new(1.0),
            pixels_per_note: Atomic::new(1),
            contrast_min: Atomic::new(0.1),
            contrast_adjustment_power: Atomic::new(0.5),

            volume_weighting_exponent: Atomic::new(1.0),
            response_exponent: Atomic::new(2.0),
            soft_limit_threshold: Atomic::new(0.8),
            soft_limit_knee: Atomic::new(0.2),

            stereo_blue_red_weight: Atomic::new(1.0),
            stereo_cyan_yellow_weight: Atomic::new(1.0),
            stereo_temperature_amplification: Atomic::new(1.0),
            stereo_temperature_curve_exponent: Atomic::new(1.0),
        }
    }
}

impl EngineConfig {
    /// Builds a config from explicit static params, applying range
    /// validation to both the static and atomic fields. Clamps silently and
    /// logs a warning per clamp, never fails.
    pub fn new(static_params: StaticParams) -> Self {
        let mut cfg = Self { static_params, ..Self::default() };
        cfg.validate();
        cfg
    }

    /// Re-validates every field, clamping anything out of range. Called once
    /// at construction; the hot path never re-validates.
    pub fn validate(&mut self) {
        self.static_params.validate();

        clamp_atomic_warn(&self.tau_up, MIN_TAU, MAX_TAU, "tau_up");
        clamp_atomic_warn(&self.tau_down, MIN_TAU, MAX_TAU, "tau_down");
        clamp_atomic_warn(
            &self.response_exponent,
            MIN_RESPONSE_EXPONENT,
            MAX_RESPONSE_EXPONENT,
            "response_exponent",
        );
        clamp_atomic_warn(&self.master_volume, 0.0, 1.0, "master_volume");
        clamp_atomic_warn(&self.gamma, 0.1, 8.0, "gamma");
        clamp_atomic_warn(&self.contrast_min, 0.0, 1.0, "contrast_min");
        clamp_atomic_warn(&self.soft_limit_threshold, 0.05, 1.0, "soft_limit_threshold");
        clamp_atomic_warn(&self.soft_limit_knee, 0.001, 1.0, "soft_limit_knee");

        let lo = self.freq_lo.load(Relaxed);
        let hi = self.freq_hi.load(Relaxed);
        if !(lo > 0.0 && hi > lo) {
            log::warn!("freq range [{lo}, {hi}] invalid, resetting to [65.41, 12000.0]");
            self.freq_lo.store(65.41, Relaxed);
            self.freq_hi.store(12_000.0, Relaxed);
        }
    }

    /// Returns the current low/high frequency pair.
    pub fn freq_range(&self) -> (f32, f32) {
        (self.freq_lo.load(Relaxed), self.freq_hi.load(Relaxed))
    }

    pub fn notes_per_octave(&self) -> usize {
        self.static_params.notes_per_octave
    }

    pub fn sample_rate(&self) -> f32 {
        self.static_params.sample_rate
    }

    pub fn audio_buffer_size(&self) -> usize {
        self.static_params.audio_buffer_size
    }

    pub fn num_workers(&self) -> usize {
        self.static_params.num_workers
    }

    pub fn pixel_count(&self) -> usize {
        self.static_params.pixel_count
    }
}

fn clamp_atomic_warn(field: &Atomic<f32>, lo: f32, hi: f32, name: &str) {
    let v = field.load(Relaxed);
    if v < lo || v > hi {
        let clamped = v.clamp(lo, hi);
        log::warn!("{name} = {v} out of range [{lo}, {hi}], clamping to {clamped}");
        field.store(clamped, Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_validates_without_changes() {
        let cfg = EngineConfig::default();
        let (lo, hi) = cfg.freq_range();
        assert!(lo > 0.0 && hi > lo);
        assert_eq!(cfg.num_workers(), 4);
    }

    #[test]
    fn out_of_range_workers_are_clamped() {
        let cfg = EngineConfig::new(StaticParams { num_workers: 99, ..StaticParams::default() });
        assert_eq!(cfg.num_workers(), MAX_WORKERS);
    }

    #[test]
    fn invalid_pixel_count_falls_back() {
        let cfg = EngineConfig::new(StaticParams { pixel_count: 1000, ..StaticParams::default() });
        assert!(VALID_PIXEL_COUNTS.contains(&cfg.pixel_count()));
    }

    #[test]
    fn inverted_freq_range_is_reset() {
        let cfg = EngineConfig::default();
        cfg.freq_lo.store(9000.0, Relaxed);
        cfg.freq_hi.store(100.0, Relaxed);
        let mut cfg = cfg;
        cfg.validate();
        let (lo, hi) = cfg.freq_range();
        assert!(hi > lo);
    }
}
