//! Error types for engine construction and fatal runtime conditions.
//!
//! Per-buffer conditions (config clamps, UDP misses, underruns, hot-reload in
//! progress) are never represented here — they are recovered locally and
//! reported via logging instead, per the engine's error-handling policy.

use thiserror::Error;

/// Fatal errors that can occur while constructing an [`Engine`](crate::engine::Engine).
///
/// All variants here are construction-time only; nothing in the per-buffer
/// hot path returns a `Result`.
#[derive(Debug, Error)]
pub enum EngineError {
    /// A worker thread failed to spawn.
    #[error("failed to spawn worker thread {index}: {source}")]
    WorkerSpawn {
        index: usize,
        #[source]
        source: std::io::Error,
    },

    /// The configuration record contained a value that could not be
    /// reconciled even after clamping (e.g. zero workers requested on a
    /// platform that cannot recover a sane default).
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// The audio output device failed to open or configure.
    #[error("failed to initialize audio device: {0}")]
    DeviceInit(String),

    /// A barrier or other synchronization primitive failed to initialize.
    #[error("failed to initialize synchronization primitive: {0}")]
    SyncInit(String),
}

/// Convenience alias for fallible engine construction.
pub type EngineResult<T> = Result<T, EngineError>;
