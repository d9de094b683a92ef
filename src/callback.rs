//! The real-time audio callback (§4.I): drained by the audio device at a
//! fixed rate, it must never block, allocate or log. Its only job is to copy
//! whatever the synth→audio double buffer has ready, apply master volume,
//! and signal the synthesis thread so it can proceed (§5 "Suspension
//! points").

use std::sync::Arc;

use nannou_audio::{Buffer, Host, Stream};

use crate::audio_buffer::SynthAudioBuffer;
use crate::config::EngineConfig;
use crate::engine::{CallbackSignal, EngineStats};
use crate::error::{EngineError, EngineResult};

/// Everything the callback closure needs, captured by `nannou_audio`'s
/// model-ownership convention — the stream owns this for its lifetime.
pub struct AudioModel {
    synth_l: Arc<SynthAudioBuffer>,
    synth_r: Arc<SynthAudioBuffer>,
    config: Arc<EngineConfig>,
    signal: Arc<CallbackSignal>,
    stats: Arc<EngineStats>,
    scratch_l: Vec<f32>,
    scratch_r: Vec<f32>,
}

/// Builds and starts the output stream. `buffer_size` must match
/// [`EngineConfig::audio_buffer_size`] so a ready synth buffer always maps
/// onto exactly one device callback.
pub fn start_stream(
    synth_l: Arc<SynthAudioBuffer>,
    synth_r: Arc<SynthAudioBuffer>,
    config: Arc<EngineConfig>,
    signal: Arc<CallbackSignal>,
    stats: Arc<EngineStats>,
) -> EngineResult<Stream<AudioModel>> {
    let buffer_size = config.audio_buffer_size();
    let sample_rate = config.sample_rate() as u32;

    let model = AudioModel {
        synth_l,
        synth_r,
        config,
        signal,
        stats,
        scratch_l: vec![0.0; buffer_size],
        scratch_r: vec![0.0; buffer_size],
    };

    let host = Host::new();
    host.new_output_stream(model)
        .render(render)
        .channels(2)
        .sample_rate(sample_rate)
        .frames_per_buffer(buffer_size)
        .build()
        .map_err(|e| EngineError::DeviceInit(e.to_string()))
}

/// The render closure itself (§4.I steps 1-4): read the synth→audio slots,
/// fall back to silence on underrun, apply master volume, signal
/// consumption regardless of ready state.
fn render(model: &mut AudioModel, buffer: &mut Buffer) {
    use std::sync::atomic::Ordering::Relaxed;

    let frames = buffer.len_frames();
    if model.scratch_l.len() < frames {
        model.scratch_l.resize(frames, 0.0);
        model.scratch_r.resize(frames, 0.0);
    }

    let left_ready = model.synth_l.try_consume(&mut model.scratch_l[..frames]);
    let right_ready = model.synth_r.try_consume(&mut model.scratch_r[..frames]);

    if !left_ready || !right_ready {
        model.stats.underruns.fetch_add(1, Relaxed);
        model.scratch_l[..frames].fill(0.0);
        model.scratch_r[..frames].fill(0.0);
    }

    let master_volume = model.config.master_volume.load(Relaxed);

    for (i, frame) in buffer.frames_mut().enumerate() {
        frame[0] = model.scratch_l[i] * master_volume;
        frame[1] = model.scratch_r[i] * master_volume;
    }

    // Step 3: unblock the synth thread regardless of whether this callback
    // found fresh data, so it never waits on a device that stopped.
    model.signal.signal();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StaticParams;

    #[test]
    fn underrun_is_counted_when_no_buffer_is_ready() {
        let config = Arc::new(EngineConfig::new(StaticParams::default()));
        let stats = Arc::new(EngineStats::default());
        let mut model = AudioModel {
            synth_l: Arc::new(SynthAudioBuffer::new(8)),
            synth_r: Arc::new(SynthAudioBuffer::new(8)),
            config,
            signal: CallbackSignal::new(),
            stats: Arc::clone(&stats),
            scratch_l: vec![0.0; 8],
            scratch_r: vec![0.0; 8],
        };

        let left_ready = model.synth_l.try_consume(&mut model.scratch_l);
        let right_ready = model.synth_r.try_consume(&mut model.scratch_r);
        assert!(!left_ready && !right_ready);

        use std::sync::atomic::Ordering::Relaxed;
        if !left_ready || !right_ready {
            model.stats.underruns.fetch_add(1, Relaxed);
        }
        assert_eq!(stats.underruns.load(Relaxed), 1);
    }

    #[test]
    fn master_volume_scales_samples() {
        let config = Arc::new(EngineConfig::new(StaticParams::default()));
        config.master_volume.store(0.5, std::sync::atomic::Ordering::Relaxed);

        let synth_l = Arc::new(SynthAudioBuffer::new(4));
        synth_l.publish(&[1.0, -1.0, 0.5, 0.0], 1);

        let mut scratch = vec![0.0f32; 4];
        assert!(synth_l.try_consume(&mut scratch));

        let mv = config.master_volume.load(std::sync::atomic::Ordering::Relaxed);
        let scaled: Vec<f32> = scratch.iter().map(|&s| s * mv).collect();
        assert_eq!(scaled, vec![0.5, -0.5, 0.25, 0.0]);
    }
}
