//! Capture device abstraction used by the buffer pool

use std::io;
use std::time::Duration;

/// Outcome of a successful wait on the device
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Readiness {
    /// At least one filled buffer can be dequeued
    Ready,
    /// The timeout elapsed with no buffer filled
    Timeout,
}

/// A filled buffer claimed from the driver
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Dequeued {
    pub index: u32,
    pub bytes_used: usize,
}

/// Streaming capture device with driver-allocated, memory-mapped buffers.
///
/// Follows the V4L2 streaming I/O protocol: buffers are requested once and
/// mapped, then cycled between the driver's incoming queue and the
/// application until streaming stops. Implementations report raw OS errors;
/// retry policy lives in [`DeviceBufferPool`](super::buffers::DeviceBufferPool).
pub trait CaptureDevice: Send {
    /// A mapping of one device buffer. Dropping it unmaps the buffer.
    type Memory: AsRef<[u8]> + Send;

    /// Ask for `count` buffers, returning how many the driver granted
    fn request_buffers(&mut self, count: u32) -> io::Result<u32>;

    fn map_buffer(&mut self, index: u32) -> io::Result<Self::Memory>;

    /// Give buffer `index` to the driver for filling
    fn queue(&mut self, index: u32) -> io::Result<()>;

    /// Take the next filled buffer. `WouldBlock` when none is ready.
    fn dequeue(&mut self) -> io::Result<Dequeued>;

    /// Block until a buffer is ready or `timeout` elapses.
    ///
    /// Signal delivery surfaces as `ErrorKind::Interrupted`.
    fn wait_ready(&mut self, timeout: Duration) -> io::Result<Readiness>;

    fn stream_on(&mut self) -> io::Result<()>;

    fn stream_off(&mut self) -> io::Result<()>;
}
