//! Threaded execution of the worker inner loop (§4.D, §5): wires
//! [`crate::pool::WorkerPool`]'s persistent, barrier-synchronized threads to
//! [`crate::worker::process_note_range`] so production runs the same math as
//! [`crate::engine::Engine::render_buffer`] across real OS threads instead of
//! sequentially on one.
//!
//! State crosses the orchestrator/worker boundary through two
//! [`crate::pool::BarrierSlot`]s: one [`WorkerState`] slot per worker, holding
//! that worker's exclusive oscillator range plus its output/scratch buffers,
//! and a single shared [`SharedState`] slot holding everything every worker
//! reads but none of them own. The orchestrator only ever writes either kind
//! of slot between `pool.join()` and the following `pool.release()`, while
//! every worker thread is blocked at the start barrier; workers only ever
//! read `SharedState` and touch their own `WorkerState` between `release()`
//! and `join()`. That non-overlap is exactly what makes the `unsafe`
//! `BarrierSlot` accesses below sound.

use std::sync::atomic::Ordering::Relaxed;
use std::sync::Arc;

use crate::audio_buffer::SynthAudioBuffer;
use crate::config::EngineConfig;
use crate::display::DisplayTap;
use crate::double_buffer::ImageSynthBuffer;
use crate::envelope::{compute_coeffs, EnvelopeCoeffs};
use crate::engine::{
    normalize_and_limit, CallbackSignal, Engine, EngineParts, EngineStats, NORMALIZER_BASE_LEVEL,
    SAFETY_SCALE, SUM_EPSILON,
};
use crate::error::{EngineError, EngineResult};
use crate::oscillator::Oscillator;
use crate::pool::{BarrierSlot, WorkerPool};
use crate::pow_approx::{ShiftedPow, UnitPow};
use crate::preprocess::PreprocessedFrame;
use crate::wavetable::{perform_hot_reload, GlobalFade, HotReloadState, WaveTable};
use crate::worker::{process_note_range, WorkerInputs, WorkerOutput, WorkerScratch};

/// One worker's exclusively-owned range: its oscillators and its reusable
/// output/scratch buffers. Only the worker thread at its index, and the
/// orchestrator while that worker is blocked at the start barrier, ever
/// touch a given slot.
struct WorkerState {
    range: (usize, usize),
    oscillators: Vec<Oscillator>,
    output: WorkerOutput,
    scratch: WorkerScratch,
}

/// Everything every worker reads but none of them own: the wave table, the
/// envelope coefficients (indexed by global note index), the current
/// preprocessed frame, and the per-buffer scalars derived from `config`.
/// Written once per buffer by the orchestrator before `pool.release()`.
struct SharedState {
    table: WaveTable,
    coeffs: Vec<EnvelopeCoeffs>,
    frame: PreprocessedFrame,
    stereo_enabled: bool,
    pow_volume_weight: UnitPow,
    buffer_len: usize,
}

/// A running real-time synthesis thread and the worker pool driving it,
/// returned by [`Engine::spawn_realtime`].
pub struct RealtimeHandle {
    thread: std::thread::JoinHandle<()>,
}

impl RealtimeHandle {
    /// Requests shutdown via `shutdown_signal` and blocks until the
    /// synthesis thread — and, inside it, every worker thread — has exited.
    pub fn join(self, shutdown_signal: &Arc<CallbackSignal>) {
        shutdown_signal.request_shutdown();
        let _ = self.thread.join();
    }
}

pub(crate) fn spawn(engine: Engine, shutdown_signal: Arc<CallbackSignal>) -> EngineResult<RealtimeHandle> {
    let parts = engine.into_parts();
    let EngineParts {
        config,
        table,
        hot_reload,
        fade,
        oscillators,
        coeffs,
        pow_volume_weight,
        pow_normalize,
        partition,
        worker_outputs,
        worker_scratch,
        image_buffer,
        display_tap,
        synth_audio_l,
        synth_audio_r,
        stats,
        additive,
        stereo_l,
        stereo_r,
        volume_sum,
        volume_max,
    } = parts;

    let num_workers = partition.len();
    let buffer_len = config.audio_buffer_size();
    let total_notes = oscillators.len();

    let mut osc_iter = oscillators.into_iter();
    let worker_states: Vec<Arc<BarrierSlot<WorkerState>>> = partition
        .iter()
        .zip(worker_outputs)
        .zip(worker_scratch)
        .map(|((&range, output), scratch)| {
            let count = range.1 - range.0;
            let oscillators: Vec<Oscillator> = (&mut osc_iter).take(count).collect();
            Arc::new(BarrierSlot::new(WorkerState { range, oscillators, output, scratch }))
        })
        .collect();

    let shared = Arc::new(BarrierSlot::new(SharedState {
        table,
        coeffs,
        frame: PreprocessedFrame::silent(total_notes),
        stereo_enabled: config.stereo_enabled.load(Relaxed),
        pow_volume_weight,
        buffer_len,
    }));

    let pool = {
        let worker_states = worker_states.clone();
        let shared = Arc::clone(&shared);
        WorkerPool::build(num_workers, move |index| {
            // Safety: see the module-level invariant. This closure only
            // runs between a `release()` and the matching `join()`, during
            // which the orchestrator touches neither this worker's slot nor
            // `shared`.
            let state = unsafe { worker_states[index].get_mut() };
            let shared = unsafe { shared.get() };

            let inputs = WorkerInputs {
                target_volumes: &shared.frame.target_volumes[state.range.0..state.range.1],
                pan_gains: &shared.frame.pan_gains[state.range.0..state.range.1],
                stereo_enabled: shared.stereo_enabled,
            };
            process_note_range(
                &mut state.oscillators,
                state.range,
                &shared.table,
                &shared.coeffs,
                &inputs,
                &shared.pow_volume_weight,
                shared.buffer_len,
                &mut state.output,
                &mut state.scratch,
            );
        })?
    };

    let mut orchestrator = Orchestrator {
        config,
        hot_reload,
        fade,
        pow_normalize,
        worker_states,
        shared,
        image_buffer,
        display_tap,
        synth_audio_l,
        synth_audio_r,
        stats,
        sequence: 0,
        additive,
        stereo_l,
        stereo_r,
        volume_sum,
        volume_max,
    };

    let thread = std::thread::Builder::new()
        .name("sp3ctra-synth".into())
        .spawn(move || {
            loop {
                if shutdown_signal.is_shutdown() {
                    break;
                }
                orchestrator.render_one_buffer(&pool);
                shutdown_signal.wait_for_consumption();
            }
            pool.shutdown();
        })
        .map_err(|source| EngineError::WorkerSpawn { index: usize::MAX, source })?;

    Ok(RealtimeHandle { thread })
}

/// Owns everything the orchestrator thread touches directly: the part of
/// [`crate::engine::Engine`]'s state that never crosses into a worker's
/// hands, plus the shared handles used to drive the pool each buffer.
struct Orchestrator {
    config: Arc<EngineConfig>,
    hot_reload: HotReloadState,
    fade: GlobalFade,
    pow_normalize: ShiftedPow,

    worker_states: Vec<Arc<BarrierSlot<WorkerState>>>,
    shared: Arc<BarrierSlot<SharedState>>,

    image_buffer: Arc<ImageSynthBuffer>,
    display_tap: Arc<DisplayTap>,
    synth_audio_l: Arc<SynthAudioBuffer>,
    synth_audio_r: Arc<SynthAudioBuffer>,

    stats: Arc<EngineStats>,
    sequence: u64,

    additive: Vec<f32>,
    stereo_l: Vec<f32>,
    stereo_r: Vec<f32>,
    volume_sum: Vec<f32>,
    volume_max: Vec<f32>,
}

impl Orchestrator {
    /// Runs one buffer's worth of §4.E: the same steps as
    /// [`crate::engine::Engine::render_buffer`], except steps 3-5 (the
    /// per-note inner loop) run on `pool`'s worker threads instead of on
    /// this one.
    fn render_one_buffer(&mut self, pool: &WorkerPool) {
        // Every write below happens while all workers are blocked at the
        // start barrier, either because the pool was just built or because
        // the previous buffer's `pool.join()` already returned.
        if self.hot_reload.is_pending() {
            self.fade.request_fade_out();
            let (freq_lo, freq_hi) = self.config.freq_range();
            let notes_per_octave = self.config.notes_per_octave();
            let sample_rate = self.config.sample_rate();

            let total_notes: usize = self
                .worker_states
                .iter()
                .map(|slot| {
                    let state = unsafe { slot.get() };
                    state.range.1 - state.range.0
                })
                .sum();
            let mut phases = vec![0usize; total_notes];
            for slot in &self.worker_states {
                let state = unsafe { slot.get() };
                for (local, osc) in state.oscillators.iter().enumerate() {
                    phases[state.range.0 + local] = osc.phase_index;
                }
            }

            let shared = unsafe { self.shared.get_mut() };
            perform_hot_reload(
                &mut shared.table,
                &self.hot_reload,
                freq_lo,
                freq_hi,
                notes_per_octave,
                sample_rate,
                &mut phases,
                self.config.static_params.phase_seed,
            );

            let tau_up = self.config.tau_up.load(Relaxed);
            let tau_down = self.config.tau_down.load(Relaxed);
            let freq_ref = self.config.decay_freq_ref.load(Relaxed);
            let beta = self.config.decay_exponent.load(Relaxed);

            for slot in &self.worker_states {
                let state = unsafe { slot.get_mut() };
                for (local, osc) in state.oscillators.iter_mut().enumerate() {
                    let note_index = state.range.0 + local;
                    osc.phase_index = phases[note_index];
                    shared.coeffs[note_index] =
                        compute_coeffs(osc.frequency, tau_up, tau_down, freq_ref, beta, sample_rate);
                }
            }

            self.fade.request_fade_in();
        }

        let frame = self.image_buffer.read();
        self.sequence = self.sequence.wrapping_add(1);
        if let Some((r, g, b)) = &frame.raw_rgb {
            self.display_tap.publish(r, g, b);
        }

        let buffer_len = self.config.audio_buffer_size();
        let stereo_enabled = self.config.stereo_enabled.load(Relaxed);
        let response_exponent = self.config.response_exponent.load(Relaxed);

        {
            let shared = unsafe { self.shared.get_mut() };
            shared
                .pow_volume_weight
                .rebuild(self.config.volume_weighting_exponent.load(Relaxed));
            shared.stereo_enabled = stereo_enabled;
            shared.frame = frame;
        }
        self.pow_normalize.rebuild(NORMALIZER_BASE_LEVEL, 1.0 / response_exponent);

        // Steps 3-5: release every worker to run `process_note_range` over
        // its own range, then wait for all of them to finish.
        pool.release();
        pool.join();

        // Step 6: combine. Every worker is blocked at the next start
        // barrier by now, so their `output`s are safe to read.
        self.additive.fill(0.0);
        self.stereo_l.fill(0.0);
        self.stereo_r.fill(0.0);
        self.volume_sum.fill(0.0);
        self.volume_max.fill(0.0);

        for slot in &self.worker_states {
            let state = unsafe { slot.get() };
            for i in 0..buffer_len {
                self.additive[i] += state.output.mono[i];
                self.stereo_l[i] += state.output.left[i];
                self.stereo_r[i] += state.output.right[i];
                self.volume_sum[i] += state.output.volume_sum[i];
                self.volume_max[i] = self.volume_max[i].max(state.output.volume_max[i]);
            }
        }

        if !stereo_enabled {
            self.stereo_l.copy_from_slice(&self.additive);
            self.stereo_r.copy_from_slice(&self.additive);
        }

        // Step 7: pre-scale.
        for i in 0..buffer_len {
            self.additive[i] *= SAFETY_SCALE;
            self.stereo_l[i] *= SAFETY_SCALE;
            self.stereo_r[i] *= SAFETY_SCALE;
        }

        let soft_limit_threshold = self.config.soft_limit_threshold.load(Relaxed);
        let soft_limit_knee = self.config.soft_limit_knee.load(Relaxed);
        let contrast = {
            let shared = unsafe { self.shared.get() };
            shared.frame.contrast_factor
        };

        // Steps 8-10: normalize, soft-limit, apply contrast + fade.
        for i in 0..buffer_len {
            let sum = self.volume_sum[i];
            let divisor = if sum > SUM_EPSILON {
                self.pow_normalize.eval(sum + NORMALIZER_BASE_LEVEL)
            } else {
                0.0
            };

            let gain = contrast * self.fade.tick();

            if stereo_enabled {
                self.stereo_l[i] = normalize_and_limit(
                    self.stereo_l[i],
                    sum,
                    divisor,
                    soft_limit_threshold,
                    soft_limit_knee,
                ) * gain;
                self.stereo_r[i] = normalize_and_limit(
                    self.stereo_r[i],
                    sum,
                    divisor,
                    soft_limit_threshold,
                    soft_limit_knee,
                ) * gain;
            } else {
                let mono = normalize_and_limit(
                    self.additive[i],
                    sum,
                    divisor,
                    soft_limit_threshold,
                    soft_limit_knee,
                ) * gain;
                self.stereo_l[i] = mono;
                self.stereo_r[i] = mono;
            }

            self.stereo_l[i] = self.stereo_l[i].clamp(-1.0, 1.0);
            self.stereo_r[i] = self.stereo_r[i].clamp(-1.0, 1.0);
        }

        // Step 11: publish to the synth→audio double buffer.
        self.synth_audio_l.publish(&self.stereo_l, self.sequence);
        self.synth_audio_r.publish(&self.stereo_r, self.sequence);

        self.stats.buffers_rendered.fetch_add(1, Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StaticParams;
    use std::time::Duration;

    fn small_config() -> EngineConfig {
        EngineConfig::new(StaticParams {
            sample_rate: 48_000.0,
            audio_buffer_size: 64,
            pixel_count: 1728,
            num_workers: 4,
            notes_per_octave: 12,
            phase_seed: None,
        })
    }

    #[test]
    fn realtime_path_produces_finite_clamped_output() {
        let config = small_config();
        let engine = Engine::new(config).expect("engine should build");
        let total_notes = engine.total_notes();

        let image_buffer = engine.image_buffer();
        let (synth_l, synth_r) = engine.synth_audio_buffers();

        let mut frame = crate::preprocess::PreprocessedFrame::silent(total_notes);
        frame.target_volumes.fill(1.0);
        image_buffer.publish(frame);

        let signal = CallbackSignal::new();
        let handle = engine.spawn_realtime(Arc::clone(&signal)).expect("spawn should succeed");

        let mut left = vec![0.0f32; 64];
        let mut right = vec![0.0f32; 64];
        let mut observed_buffers = 0;
        for _ in 0..50 {
            std::thread::sleep(Duration::from_millis(2));
            signal.signal();
            if synth_l.try_consume(&mut left) {
                observed_buffers += 1;
                for &s in &left {
                    assert!(s.is_finite());
                    assert!((-1.0..=1.0).contains(&s));
                }
            }
            let _ = synth_r.try_consume(&mut right);
        }

        assert!(observed_buffers > 0, "expected at least one rendered buffer");
        handle.join(&signal);
    }

    #[test]
    fn requesting_shutdown_stops_the_synthesis_thread() {
        let config = small_config();
        let engine = Engine::new(config).expect("engine should build");
        let signal = CallbackSignal::new();
        let handle = engine.spawn_realtime(Arc::clone(&signal)).expect("spawn should succeed");

        std::thread::sleep(Duration::from_millis(5));
        signal.request_shutdown();
        handle.join(&signal);

        assert!(signal.is_shutdown());
    }
}
