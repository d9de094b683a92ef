//! Display/DMX tap (§4.J "External interfaces", §6 "Display/DMX tap").
//!
//! A read-only snapshot of the RGB line the preprocessor last consumed,
//! refreshed once per audio buffer by the orchestrator. Display and DMX
//! collaborators are not part of this crate; they only ever read these
//! buffers, never write them.

use parking_lot::Mutex;
use std::sync::Arc;

/// Three pixel-count-sized buffers (R, G, B), written once per audio buffer
/// by [`crate::engine::Engine::render_buffer`] and read by any number of
/// external consumers.
#[derive(Debug)]
pub struct DisplayTap {
    r: Mutex<Vec<u8>>,
    g: Mutex<Vec<u8>>,
    b: Mutex<Vec<u8>>,
    pixel_count: usize,
}

impl DisplayTap {
    pub fn new(pixel_count: usize) -> Self {
        Self {
            r: Mutex::new(vec![0; pixel_count]),
            g: Mutex::new(vec![0; pixel_count]),
            b: Mutex::new(vec![0; pixel_count]),
            pixel_count,
        }
    }

    pub fn pixel_count(&self) -> usize {
        self.pixel_count
    }

    /// Publishes a fresh RGB line. Lengths must match `pixel_count`;
    /// mismatched input is silently ignored (the tap keeps its previous
    /// snapshot, consistent with the idempotent-reuse policy applied
    /// everywhere else a fresh frame might be missing, §7).
    pub fn publish(&self, r: &[u8], g: &[u8], b: &[u8]) {
        if r.len() != self.pixel_count || g.len() != self.pixel_count || b.len() != self.pixel_count
        {
            return;
        }
        self.r.lock().copy_from_slice(r);
        self.g.lock().copy_from_slice(g);
        self.b.lock().copy_from_slice(b);
    }

    /// Returns a clone of the current R, G, B snapshot.
    pub fn snapshot(&self) -> (Vec<u8>, Vec<u8>, Vec<u8>) {
        (self.r.lock().clone(), self.g.lock().clone(), self.b.lock().clone())
    }
}

/// Shareable handle returned by [`crate::engine::Engine::display_tap`].
pub type SharedDisplayTap = Arc<DisplayTap>;
