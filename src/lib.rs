//! `sp3ctra_core`: a real-time additive wave-table synthesizer that turns a
//! stream of scanned image lines into sound (§1, §2).
//!
//! The CORE is this library; [`crate::engine::Engine`] is its single entry
//! point. A thin binary wires it to a UDP ingest socket, an audio output
//! device, and a CLI/INI configuration layer — none of which this crate
//! depends on to be testable: [`engine::Engine::render_buffer`] exercises
//! the full synthesis pipeline synchronously, with no thread, socket or
//! audio device required.

pub mod audio_buffer;
pub mod callback;
pub mod config;
pub mod display;
pub mod double_buffer;
pub mod engine;
pub mod envelope;
pub mod error;
pub mod ingest;
pub mod oscillator;
pub mod pan;
pub mod params;
pub mod pool;
pub mod pow_approx;
pub mod preprocess;
pub mod realtime;
pub mod wavetable;
pub mod worker;

#[cfg(feature = "simd")]
pub mod simd;
