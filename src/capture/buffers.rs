//! Pool of driver-owned, memory-mapped capture buffers

use std::io;
use std::time::{Duration, Instant};

use tracing::{debug, info, instrument, trace, warn};

use super::device::{CaptureDevice, Dequeued, Readiness};
use crate::error::{DeviceError, SetupError};

/// Who currently owns a buffer's contents
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferState {
    /// Waiting in the driver's queue to be filled
    Queued,
    /// Dequeued by the application, not yet returned
    Held,
}

struct DeviceBuffer<M> {
    memory: M,
    state: BufferState,
}

/// Owns every mapped buffer of one streaming device.
///
/// Each buffer is always either queued to the device or held through a
/// [`BufferLease`]. The lease borrows the pool mutably, so a buffer cannot be
/// read after it has been requeued, and only one can be held at a time.
pub struct DeviceBufferPool<D: CaptureDevice> {
    // Declared before `device` so mappings are released before the device closes.
    buffers: Vec<DeviceBuffer<D::Memory>>,
    device: D,
    streaming: bool,
    torn_down: bool,
}

impl<D: CaptureDevice> DeviceBufferPool<D> {
    /// Request, map and queue `count` buffers, then start streaming.
    #[instrument(skip(device))]
    pub fn initialize(mut device: D, count: u32) -> Result<Self, SetupError> {
        let granted = device
            .request_buffers(count)
            .map_err(SetupError::RequestBuffers)?;
        if granted == 0 {
            return Err(SetupError::NoBuffers);
        }
        if granted != count {
            warn!(requested = count, granted, "Driver adjusted buffer count");
        }

        let mut buffers = Vec::with_capacity(granted as usize);
        for index in 0..granted {
            let memory = device
                .map_buffer(index)
                .map_err(|source| SetupError::Map { index, source })?;
            debug!(index, length = memory.as_ref().len(), "Mapped capture buffer");
            buffers.push(DeviceBuffer {
                memory,
                state: BufferState::Held,
            });
        }

        let mut pool = Self {
            buffers,
            device,
            streaming: false,
            torn_down: false,
        };

        for index in 0..granted {
            pool.device
                .queue(index)
                .map_err(|source| SetupError::Queue { index, source })?;
            pool.buffers[index as usize].state = BufferState::Queued;
        }

        pool.device.stream_on().map_err(SetupError::StreamOn)?;
        pool.streaming = true;

        info!(buffers = granted, "Capture buffers queued, streaming started");
        Ok(pool)
    }

    /// Block until the device has a filled buffer or `timeout` elapses.
    ///
    /// Interrupted waits are retried against the same deadline.
    pub fn wait_ready(&mut self, timeout: Duration) -> Result<Readiness, DeviceError> {
        let deadline = Instant::now() + timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match self.device.wait_ready(remaining) {
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {
                    trace!("Device wait interrupted, retrying");
                }
                Err(e) => return Err(DeviceError::Wait(e)),
                Ok(readiness) => return Ok(readiness),
            }
        }
    }

    /// Claim one filled buffer. It goes back to the device through
    /// [`BufferLease::requeue`].
    pub fn dequeue(&mut self) -> Result<BufferLease<'_, D>, DeviceError> {
        let Dequeued { index, bytes_used } = loop {
            match self.device.dequeue() {
                Ok(dequeued) => break dequeued,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    return Err(DeviceError::NotReady)
                }
                Err(e) => return Err(DeviceError::Dequeue(e)),
            }
        };

        let buffer = self
            .buffers
            .get_mut(index as usize)
            .ok_or(DeviceError::UnknownIndex(index))?;
        if buffer.state != BufferState::Queued {
            return Err(DeviceError::NotQueued(index));
        }
        buffer.state = BufferState::Held;
        let bytes_used = bytes_used.min(buffer.memory.as_ref().len());

        trace!(index, bytes_used, "Dequeued buffer");
        Ok(BufferLease {
            pool: self,
            index,
            bytes_used,
            released: false,
        })
    }

    fn requeue(&mut self, index: u32) -> Result<(), DeviceError> {
        let buffer = self
            .buffers
            .get_mut(index as usize)
            .ok_or(DeviceError::UnknownIndex(index))?;
        if buffer.state != BufferState::Held {
            return Err(DeviceError::NotHeld(index));
        }

        loop {
            match self.device.queue(index) {
                Ok(()) => break,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(source) => return Err(DeviceError::Requeue { index, source }),
            }
        }
        buffer.state = BufferState::Queued;
        trace!(index, "Requeued buffer");
        Ok(())
    }

    /// Stop streaming and unmap every buffer.
    pub fn teardown(mut self) -> Result<(), DeviceError> {
        self.shutdown()
    }

    fn shutdown(&mut self) -> Result<(), DeviceError> {
        if self.torn_down {
            return Ok(());
        }
        self.torn_down = true;

        let result = if self.streaming {
            self.streaming = false;
            self.device.stream_off().map_err(DeviceError::StreamOff)
        } else {
            Ok(())
        };

        // Unmap regardless of how stream-off went
        let count = self.buffers.len();
        self.buffers.clear();
        debug!(buffers = count, "Capture buffers unmapped");
        result
    }

    /// Number of buffers granted by the driver
    pub fn len(&self) -> usize {
        self.buffers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffers.is_empty()
    }

    /// Buffers currently waiting in the driver's queue
    pub fn queued_count(&self) -> usize {
        self.buffers
            .iter()
            .filter(|b| b.state == BufferState::Queued)
            .count()
    }

    pub fn state(&self, index: u32) -> Option<BufferState> {
        self.buffers.get(index as usize).map(|b| b.state)
    }

    pub fn device(&self) -> &D {
        &self.device
    }
}

impl<D: CaptureDevice> Drop for DeviceBufferPool<D> {
    fn drop(&mut self) {
        if let Err(e) = self.shutdown() {
            warn!(error = %e, "Stream teardown on drop failed");
        }
    }
}

/// Exclusive hold on one dequeued buffer.
///
/// Consumed by [`requeue`](Self::requeue). A lease dropped without being
/// requeued returns its buffer on drop.
#[must_use = "a dequeued buffer must be requeued"]
pub struct BufferLease<'p, D: CaptureDevice> {
    pool: &'p mut DeviceBufferPool<D>,
    index: u32,
    bytes_used: usize,
    released: bool,
}

impl<'p, D: CaptureDevice> BufferLease<'p, D> {
    pub fn index(&self) -> u32 {
        self.index
    }

    pub fn bytes_used(&self) -> usize {
        self.bytes_used
    }

    /// The filled part of the buffer
    pub fn data(&self) -> &[u8] {
        &self.pool.buffers[self.index as usize].memory.as_ref()[..self.bytes_used]
    }

    /// Hand the buffer back to the device queue
    pub fn requeue(mut self) -> Result<(), DeviceError> {
        self.released = true;
        self.pool.requeue(self.index)
    }
}

impl<D: CaptureDevice> Drop for BufferLease<'_, D> {
    fn drop(&mut self) {
        if !self.released {
            if let Err(e) = self.pool.requeue(self.index) {
                warn!(index = self.index, error = %e, "Requeue of dropped lease failed");
            }
        }
    }
}
