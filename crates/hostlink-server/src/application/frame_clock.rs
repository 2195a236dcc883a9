//! Host frame ticks for `SERIAL_FRAME` batches.
//!
//! The host calls [`FrameClock::tick`] once per rendered frame.  Batch code
//! holds a [`FrameWaiter`] and awaits the next tick before running a
//! frame-aligned batch.

use tokio::sync::watch;

/// Publisher side, owned by whatever drives the host's frame loop.
#[derive(Debug)]
pub struct FrameClock {
    frames: watch::Sender<u64>,
}

impl FrameClock {
    pub fn new() -> Self {
        let (frames, _) = watch::channel(0);
        Self { frames }
    }

    /// Marks the start of a new host frame.
    pub fn tick(&self) {
        self.frames.send_modify(|frame| *frame = frame.wrapping_add(1));
    }

    /// Number of ticks so far.
    pub fn frame(&self) -> u64 {
        *self.frames.borrow()
    }

    pub fn waiter(&self) -> FrameWaiter {
        FrameWaiter {
            frames: self.frames.subscribe(),
        }
    }
}

impl Default for FrameClock {
    fn default() -> Self {
        Self::new()
    }
}

/// Subscriber side, cloned into each batch engine.
#[derive(Debug, Clone)]
pub struct FrameWaiter {
    frames: watch::Receiver<u64>,
}

impl FrameWaiter {
    /// Resolves at the next tick after this call.
    ///
    /// Returns immediately once the [`FrameClock`] has been dropped, so a
    /// batch never hangs on a host that stopped rendering.
    pub async fn next_frame(&self) -> u64 {
        let mut frames = self.frames.clone();
        frames.borrow_and_update();
        // An error only means the clock is gone.
        let _ = frames.changed().await;
        let frame = *frames.borrow();
        frame
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
