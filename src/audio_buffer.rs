//! The synth→audio double buffer (§3, §4.H): a lock-free two-slot handoff
//! per channel, written by the synthesis thread and drained by the
//! real-time audio callback. No mutex is involved in this path — it is a
//! pure atomic handoff, matching §4.H/§4.I/§5's "no locks held during copy".

use atomic::Atomic;
use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

struct Slot {
    samples: UnsafeCell<Vec<f32>>,
    ready: AtomicBool,
    timestamp: Atomic<u64>,
}

// Safety: see `SynthAudioBuffer`'s doc comment. Exactly one thread writes a
// given slot's `samples` (the synth thread, only while that slot is not the
// active/ready one) and exactly one reads it (the audio callback, only
// after observing `ready == true`), so the `UnsafeCell` is never touched
// concurrently despite this unsafe `Sync` impl — the same pattern as
// `pool::BarrierSlot`.
unsafe impl Sync for Slot {}

impl Slot {
    fn new(buffer_size: usize) -> Self {
        Self {
            samples: UnsafeCell::new(vec![0.0; buffer_size]),
            ready: AtomicBool::new(false),
            timestamp: Atomic::new(0),
        }
    }
}

/// Two slots per channel; at most one slot per channel is `ready` at any
/// time in steady state. The synth thread is the sole writer of the
/// currently-inactive slot; the audio callback is the sole reader/clearer.
/// The `ready` flag's release/acquire pair is the only synchronization
/// needed: the writer's sample copy happens-before its `Release` store to
/// `ready`, and the reader's `Acquire` load of `ready` happens-before its
/// own copy out, so the handoff is safe with zero locks on the hot path.
pub struct SynthAudioBuffer {
    slots: [Slot; 2],
    active_index: AtomicUsize,
}

impl SynthAudioBuffer {
    pub fn new(buffer_size: usize) -> Self {
        Self {
            slots: [Slot::new(buffer_size), Slot::new(buffer_size)],
            active_index: AtomicUsize::new(0),
        }
    }

    /// Writes a freshly synthesized buffer into the inactive slot, marks it
    /// ready, then flips the active index. Called once per audio buffer by
    /// the orchestrator (§4.E step 11).
    pub fn publish(&self, samples: &[f32], timestamp: u64) {
        let idx = self.active_index.load(Ordering::Acquire);
        let write_idx = 1 - idx;
        let slot = &self.slots[write_idx];

        // Safety: this slot is the inactive one, so the callback cannot be
        // reading it; the write below happens-before the `Release` store
        // to `ready` just after it.
        unsafe {
            (*slot.samples.get()).copy_from_slice(samples);
        }
        slot.timestamp.store(timestamp, Ordering::Relaxed);
        slot.ready.store(true, Ordering::Release);
        self.active_index.store(write_idx, Ordering::Release);
    }

    /// Reads and clears the currently-active slot if it is ready. Returns
    /// `None` if no fresh buffer is available (the callback must then emit
    /// silence or hold the last sample, never block).
    pub fn try_consume(&self, out: &mut [f32]) -> bool {
        let idx = self.active_index.load(Ordering::Acquire);
        let slot = &self.slots[idx];

        if !slot.ready.load(Ordering::Acquire) {
            return false;
        }

        // Safety: `ready == true` was just observed via `Acquire`,
        // synchronizing with the writer's `Release` store in `publish`
        // after it finished writing this slot's samples.
        unsafe {
            out.copy_from_slice(&*slot.samples.get());
        }
        slot.ready.store(false, Ordering::Release);
        true
    }

    pub fn active_index(&self) -> usize {
        self.active_index.load(Ordering::Acquire)
    }
}
