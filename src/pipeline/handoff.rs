//! Latest-frame handoff between the capture thread and the display thread
//!
//! Three preallocated frames rotate between the writer, the reader and a shared
//! middle slot. `publish` swaps the writer's finished frame into the middle slot
//! and raises the dirty bit in the same atomic word; `take_if_updated` swaps the
//! middle slot out to the reader and clears it. There is no backlog: a frame that
//! is published before the previous one was taken replaces it.

use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crossbeam::sync::{Parker, Unparker};
use crossbeam::utils::CachePadded;

use crate::capture::Frame;

const INDEX_MASK: u8 = 0b011;
const DIRTY: u8 = 0b100;

struct Shared {
    slots: [CachePadded<UnsafeCell<Frame>>; 3],
    /// Index of the middle slot, plus `DIRTY` when it holds an unread frame
    middle: CachePadded<AtomicU8>,
    closed: AtomicBool,
    unparker: Unparker,
}

// The writer, the reader and `middle` always hold three distinct slot indices,
// and a slot is only dereferenced by whoever holds its index.
unsafe impl Sync for Shared {}

/// Create a handoff whose three slots are copies of `template`
pub fn frame_handoff(template: Frame) -> (FrameWriter, FrameReader) {
    let parker = Parker::new();
    let unparker = parker.unparker().clone();

    let shared = Arc::new(Shared {
        slots: [
            CachePadded::new(UnsafeCell::new(template.clone())),
            CachePadded::new(UnsafeCell::new(template.clone())),
            CachePadded::new(UnsafeCell::new(template)),
        ],
        middle: CachePadded::new(AtomicU8::new(1)),
        closed: AtomicBool::new(false),
        unparker,
    });

    (
        FrameWriter {
            shared: Arc::clone(&shared),
            back: 0,
        },
        FrameReader {
            shared,
            front: 2,
            parker,
        },
    )
}

/// Producer half, owned by the capture thread
pub struct FrameWriter {
    shared: Arc<Shared>,
    back: u8,
}

impl FrameWriter {
    /// Frame to decode into. Invisible to the reader until published.
    pub fn frame_mut(&mut self) -> &mut Frame {
        // SAFETY: `back` is owned exclusively by this writer.
        unsafe { &mut *self.shared.slots[self.back as usize].get() }
    }

    /// Make the frame written so far the latest one
    pub fn publish(&mut self) {
        let previous = self
            .shared
            .middle
            .swap(self.back | DIRTY, Ordering::AcqRel);
        self.back = previous & INDEX_MASK;
        self.shared.unparker.unpark();
    }

    /// Tell the reader no more frames will come
    pub fn close(&self) {
        self.shared.closed.store(true, Ordering::Release);
        self.shared.unparker.unpark();
    }
}

impl Drop for FrameWriter {
    fn drop(&mut self) {
        self.close();
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    /// A new frame was taken and is now in [`FrameReader::frame`]
    Updated,
    /// The writer closed without publishing anything further
    Closed,
    TimedOut,
}

/// Consumer half, owned by the display thread
pub struct FrameReader {
    shared: Arc<Shared>,
    front: u8,
    parker: Parker,
}

impl FrameReader {
    /// Take the latest published frame if there is one. Never blocks.
    pub fn take_if_updated(&mut self) -> bool {
        if self.shared.middle.load(Ordering::Relaxed) & DIRTY == 0 {
            return false;
        }
        // Only the reader clears DIRTY, so the slot is still dirty here.
        let previous = self.shared.middle.swap(self.front, Ordering::AcqRel);
        self.front = previous & INDEX_MASK;
        true
    }

    /// The most recently taken frame
    pub fn frame(&self) -> &Frame {
        // SAFETY: `front` is owned exclusively by this reader.
        unsafe { &*self.shared.slots[self.front as usize].get() }
    }

    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::Acquire)
    }

    /// Park until a frame is published, the writer closes, or `timeout` elapses.
    ///
    /// A frame published right before closing is still delivered.
    pub fn wait_for_update(&mut self, timeout: Duration) -> WaitOutcome {
        let deadline = Instant::now() + timeout;
        loop {
            if self.take_if_updated() {
                return WaitOutcome::Updated;
            }
            if self.is_closed() {
                return if self.take_if_updated() {
                    WaitOutcome::Updated
                } else {
                    WaitOutcome::Closed
                };
            }
            let now = Instant::now();
            if now >= deadline {
                return WaitOutcome::TimedOut;
            }
            self.parker.park_timeout(deadline - now);
        }
    }
}
