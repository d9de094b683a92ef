//! The parameter-update interface (§4.J, §6 "Parameter-update interface"):
//! a named set of recognized parameters, each reachable through a normalized
//! `[0, 1]` MIDI-style input mapped to its raw engine value, applied as a
//! single atomic store with no lock and no callback into the synth thread.

use std::sync::atomic::Ordering::Relaxed;

use crate::config::EngineConfig;

/// How a normalized `[0, 1]` input maps onto a parameter's raw range.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ScalingMode {
    /// `raw = lo + normalized * (hi - lo)`.
    Linear,
    /// Logarithmic sweep, appropriate for frequency-like ranges where `lo > 0`.
    Log,
    /// Exponential curve, biasing most of the travel toward the low end.
    Exp,
    /// Snaps to one of `n` evenly-spaced steps across `[lo, hi]`.
    Discrete(u32),
}

/// Maps a normalized `[0, 1]` value to a raw value in `range = (lo, hi)`
/// according to `mode`. Out-of-range inputs are clamped to `[0, 1]` first, so
/// this function never produces a value outside `range`.
pub fn scale(normalized: f32, mode: ScalingMode, range: (f32, f32)) -> f32 {
    let t = normalized.clamp(0.0, 1.0);
    let (lo, hi) = range;

    match mode {
        ScalingMode::Linear => lo + t * (hi - lo),
        ScalingMode::Log => {
            let lo = lo.max(f32::MIN_POSITIVE);
            let hi = hi.max(lo);
            (lo.ln() + t * (hi.ln() - lo.ln())).exp()
        }
        ScalingMode::Exp => {
            // Biases the low end of the travel toward `lo`; `t = 1` still
            // lands exactly on `hi`.
            let shaped = t * t;
            lo + shaped * (hi - lo)
        }
        ScalingMode::Discrete(steps) => {
            let steps = steps.max(1);
            let step = (t * steps as f32).min(steps as f32 - 1.0).floor();
            lo + step / (steps as f32 - 1.0).max(1.0) * (hi - lo)
        }
    }
}

/// One recognized parameter category (§6 "Parameter-update interface").
/// Frequency-range variants additionally require a call to
/// [`crate::engine::Engine::request_frequency_reinit`] after the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ParamId {
    MasterVolume,
    FreqLo,
    FreqHi,
    TauUp,
    TauDown,
    DecayFreqRef,
    DecayExponent,
    StereoEnabled,
    InvertIntensity,
    NonLinearMapping,
    Gamma,
    ContrastMin,
    ContrastAdjustmentPower,
    VolumeWeightingExponent,
    ResponseExponent,
    SoftLimitThreshold,
    SoftLimitKnee,
    StereoBlueRedWeight,
    StereoCyanYellowWeight,
    StereoTemperatureAmplification,
    StereoTemperatureCurveExponent,
}

impl ParamId {
    /// The `(scaling mode, raw range)` a normalized update is mapped through
    /// before being stored, per §6's parameter categories. These ranges
    /// match the clamps [`EngineConfig::validate`] enforces.
    pub fn scaling(self) -> (ScalingMode, (f32, f32)) {
        use ParamId::*;
        match self {
            MasterVolume => (ScalingMode::Linear, (0.0, 1.0)),
            FreqLo => (ScalingMode::Log, (20.0, 2_000.0)),
            FreqHi => (ScalingMode::Log, (2_000.0, 20_000.0)),
            TauUp => (ScalingMode::Log, (0.0001, 5.0)),
            TauDown => (ScalingMode::Log, (0.0001, 5.0)),
            DecayFreqRef => (ScalingMode::Log, (20.0, 20_000.0)),
            DecayExponent => (ScalingMode::Linear, (-2.0, 2.0)),
            StereoEnabled => (ScalingMode::Discrete(2), (0.0, 1.0)),
            InvertIntensity => (ScalingMode::Discrete(2), (0.0, 1.0)),
            NonLinearMapping => (ScalingMode::Discrete(2), (0.0, 1.0)),
            Gamma => (ScalingMode::Exp, (0.1, 8.0)),
            ContrastMin => (ScalingMode::Linear, (0.0, 1.0)),
            ContrastAdjustmentPower => (ScalingMode::Linear, (0.0, 2.0)),
            VolumeWeightingExponent => (ScalingMode::Linear, (0.1, 8.0)),
            ResponseExponent => (ScalingMode::Linear, (0.1, 8.0)),
            SoftLimitThreshold => (ScalingMode::Linear, (0.05, 1.0)),
            SoftLimitKnee => (ScalingMode::Linear, (0.001, 1.0)),
            StereoBlueRedWeight => (ScalingMode::Linear, (0.0, 2.0)),
            StereoCyanYellowWeight => (ScalingMode::Linear, (0.0, 2.0)),
            StereoTemperatureAmplification => (ScalingMode::Linear, (0.0, 4.0)),
            StereoTemperatureCurveExponent => (ScalingMode::Linear, (0.1, 4.0)),
        }
    }

    /// Whether applying this parameter requires a wave-table hot reload.
    fn requires_reinit(self) -> bool {
        matches!(self, ParamId::FreqLo | ParamId::FreqHi)
    }
}

/// Applies a normalized `[0, 1]` update for `id` to `config`: scales it
/// through the parameter's recognized mode/range, then performs a single
/// atomic store. Returns `true` if the update also requires a wave-table
/// hot reload, so the caller can invoke
/// [`crate::engine::Engine::request_frequency_reinit`] (§4.J: "writes to the
/// frequency-range fields additionally call `request_frequency_reinit()`").
pub fn apply_update(config: &EngineConfig, id: ParamId, normalized: f32) -> bool {
    let (mode, range) = id.scaling();
    let raw = scale(normalized, mode, range);

    match id {
        ParamId::MasterVolume => config.master_volume.store(raw, Relaxed),
        ParamId::FreqLo => config.freq_lo.store(raw, Relaxed),
        ParamId::FreqHi => config.freq_hi.store(raw, Relaxed),
        ParamId::TauUp => config.tau_up.store(raw, Relaxed),
        ParamId::TauDown => config.tau_down.store(raw, Relaxed),
        ParamId::DecayFreqRef => config.decay_freq_ref.store(raw, Relaxed),
        ParamId::DecayExponent => config.decay_exponent.store(raw, Relaxed),
        ParamId::StereoEnabled => config.stereo_enabled.store(raw >= 0.5, Relaxed),
        ParamId::InvertIntensity => config.invert_intensity.store(raw >= 0.5, Relaxed),
        ParamId::NonLinearMapping => config.enable_non_linear_mapping.store(raw >= 0.5, Relaxed),
        ParamId::Gamma => config.gamma.store(raw, Relaxed),
        ParamId::ContrastMin => config.contrast_min.store(raw, Relaxed),
        ParamId::ContrastAdjustmentPower => config.contrast_adjustment_power.store(raw, Relaxed),
        ParamId::VolumeWeightingExponent => config.volume_weighting_exponent.store(raw, Relaxed),
        ParamId::ResponseExponent => config.response_exponent.store(raw, Relaxed),
        ParamId::SoftLimitThreshold => config.soft_limit_threshold.store(raw, Relaxed),
        ParamId::SoftLimitKnee => config.soft_limit_knee.store(raw, Relaxed),
        ParamId::StereoBlueRedWeight => config.stereo_blue_red_weight.store(raw, Relaxed),
        ParamId::StereoCyanYellowWeight => config.stereo_cyan_yellow_weight.store(raw, Relaxed),
        ParamId::StereoTemperatureAmplification => {
            config.stereo_temperature_amplification.store(raw, Relaxed)
        }
        ParamId::StereoTemperatureCurveExponent => {
            config.stereo_temperature_curve_exponent.store(raw, Relaxed)
        }
    }

    id.requires_reinit()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StaticParams;
    use approx::assert_relative_eq;

    #[test]
    fn linear_scaling_is_affine() {
        assert_relative_eq!(scale(0.0, ScalingMode::Linear, (10.0, 20.0)), 10.0);
        assert_relative_eq!(scale(1.0, ScalingMode::Linear, (10.0, 20.0)), 20.0);
        assert_relative_eq!(scale(0.5, ScalingMode::Linear, (10.0, 20.0)), 15.0);
    }

    #[test]
    fn log_scaling_hits_endpoints_exactly() {
        assert_relative_eq!(scale(0.0, ScalingMode::Log, (20.0, 20_000.0)), 20.0, epsilon = 1e-2);
        assert_relative_eq!(
            scale(1.0, ScalingMode::Log, (20.0, 20_000.0)),
            20_000.0,
            epsilon = 1.0
        );
    }

    #[test]
    fn discrete_scaling_snaps_to_steps() {
        let a = scale(0.0, ScalingMode::Discrete(3), (0.0, 1.0));
        let b = scale(0.5, ScalingMode::Discrete(3), (0.0, 1.0));
        let c = scale(0.999, ScalingMode::Discrete(3), (0.0, 1.0));
        assert_relative_eq!(a, 0.0);
        assert_relative_eq!(b, 0.5);
        assert_relative_eq!(c, 1.0);
    }

    #[test]
    fn out_of_range_normalized_input_is_clamped() {
        assert_relative_eq!(scale(-5.0, ScalingMode::Linear, (0.0, 10.0)), 0.0);
        assert_relative_eq!(scale(5.0, ScalingMode::Linear, (0.0, 10.0)), 10.0);
    }

    #[test]
    fn applying_master_volume_stores_atomically() {
        let config = EngineConfig::new(StaticParams::default());
        let needs_reinit = apply_update(&config, ParamId::MasterVolume, 0.25);
        assert!(!needs_reinit);
        assert_relative_eq!(config.master_volume.load(Relaxed), 0.25, epsilon = 1e-6);
    }

    #[test]
    fn applying_freq_hi_signals_reinit_required() {
        let config = EngineConfig::new(StaticParams::default());
        let needs_reinit = apply_update(&config, ParamId::FreqHi, 1.0);
        assert!(needs_reinit);
    }

    #[test]
    fn boolean_parameters_round_trip() {
        let config = EngineConfig::new(StaticParams::default());
        apply_update(&config, ParamId::StereoEnabled, 0.0);
        assert!(!config.stereo_enabled.load(Relaxed));
        apply_update(&config, ParamId::StereoEnabled, 1.0);
        assert!(config.stereo_enabled.load(Relaxed));
    }
}
