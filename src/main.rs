//! Thin CLI entry point wiring [`sp3ctra_core::engine::Engine`] to a UDP
//! ingest socket, an audio output device, and command-line configuration
//! (§4.J, §6). Parsing an on-disk INI configuration file is out of this
//! crate's scope (§6 "Configuration input... parsing is an external
//! collaborator"); this binary only exposes the same recognized keys as
//! command-line flags.

use std::net::UdpSocket;
use std::sync::atomic::{AtomicBool, Ordering::Relaxed};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use mimalloc::MiMalloc;

use sp3ctra_core::config::{EngineConfig, StaticParams};
use sp3ctra_core::engine::{CallbackSignal, Engine};
use sp3ctra_core::{callback, ingest};

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

/// Real-time additive wave-table synthesizer driven by scanned image lines.
#[derive(Parser, Debug)]
#[command(name = "sp3ctra", about = "Image-to-sound additive synthesis engine")]
struct Cli {
    /// Audio sample rate, in Hz.
    #[arg(long, default_value_t = 48_000.0)]
    sample_rate: f32,

    /// Audio buffer size, in samples per channel.
    #[arg(long, default_value_t = 512)]
    audio_buffer_size: usize,

    /// CIS line length in pixels; must be 1728 or 3456.
    #[arg(long, default_value_t = 3456)]
    pixel_count: usize,

    /// Number of synthesis worker threads.
    #[arg(long, default_value_t = 4)]
    num_workers: usize,

    /// Notes per octave in the wave table.
    #[arg(long, default_value_t = 48)]
    notes_per_octave: usize,

    /// Low edge of the synthesized frequency range, in Hz.
    #[arg(long, default_value_t = 65.41)]
    freq_lo: f32,

    /// High edge of the synthesized frequency range, in Hz.
    #[arg(long, default_value_t = 12_000.0)]
    freq_hi: f32,

    /// UDP address to listen on for image-line datagrams.
    #[arg(long, default_value = "0.0.0.0:9988")]
    listen_addr: String,

    /// Disable stereo panning; sum all notes to mono on both channels.
    #[arg(long)]
    mono: bool,
}

fn main() -> Result<()> {
    env_logger::init();

    let cli = Cli::parse();

    let static_params = StaticParams {
        sample_rate: cli.sample_rate,
        audio_buffer_size: cli.audio_buffer_size,
        pixel_count: cli.pixel_count,
        num_workers: cli.num_workers,
        notes_per_octave: cli.notes_per_octave,
        phase_seed: None,
    };

    let mut config = EngineConfig::new(static_params);
    config.freq_lo.store(cli.freq_lo, Relaxed);
    config.freq_hi.store(cli.freq_hi, Relaxed);
    config.stereo_enabled.store(!cli.mono, Relaxed);
    config.validate();

    let engine = Engine::new(config).context("failed to build synthesis engine")?;
    let total_notes = engine.total_notes();
    let config = Arc::clone(&engine.config);
    let image_buffer = engine.image_buffer();
    let (synth_l, synth_r) = engine.synth_audio_buffers();
    let stats = engine.stats();

    let shutdown_signal = CallbackSignal::new();
    let realtime = engine
        .spawn_realtime(Arc::clone(&shutdown_signal))
        .context("failed to spawn real-time synthesis threads")?;

    let _stream =
        callback::start_stream(synth_l, synth_r, Arc::clone(&config), Arc::clone(&shutdown_signal), stats)
            .context("failed to start audio output stream")?;

    let socket = UdpSocket::bind(&cli.listen_addr)
        .with_context(|| format!("failed to bind UDP socket on {}", cli.listen_addr))?;
    log::info!("listening for image lines on {}", cli.listen_addr);

    let ingest_shutdown = Arc::new(AtomicBool::new(false));
    let ingest_handle = std::thread::Builder::new()
        .name("sp3ctra-ingest".into())
        .spawn(move || {
            ingest::run(&socket, &config, &image_buffer, total_notes, &ingest_shutdown);
        })
        .context("failed to spawn ingest thread")?;

    // Runs until killed; there is no in-process shutdown trigger yet, so
    // `realtime` and `_stream` simply live for the process's lifetime.
    let _ = ingest_handle.join();
    realtime.join(&shutdown_signal);

    Ok(())
}
