pub mod buffers;
pub mod capture_loop;
pub mod decoder;
pub mod device;
pub mod frame;
pub mod v4l2;

pub use buffers::{BufferLease, BufferState, DeviceBufferPool};
pub use capture_loop::{CaptureOptions, CaptureStats, CaptureThread, LoopState, StopHandle};
pub use decoder::{DecodeOutcome, FrameDecoder, FrameHeader, JpegDecoder};
pub use device::{CaptureDevice, Dequeued, Readiness};
pub use frame::{Frame, PixelFormat};
pub use v4l2::{NegotiatedFormat, V4l2Device};
