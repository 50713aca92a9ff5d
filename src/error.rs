//! Error types for the capture pipeline

use std::io;

use thiserror::Error;

/// Unrecoverable failures while bringing the device up.
///
/// A partially initialized buffer set has no degraded mode, so none of these
/// are retried. The caller decides whether to exit.
#[derive(Debug, Error)]
pub enum SetupError {
    #[error("cannot open capture device {path}: {source}")]
    Open { path: String, source: io::Error },

    #[error("failed to query device capabilities: {0}")]
    Query(#[source] io::Error),

    #[error("device does not support streaming video capture")]
    NotCapture,

    #[error("format negotiation failed: {0}")]
    Format(#[source] io::Error),

    #[error("driver did not accept MJPEG (offered {0})")]
    FormatRejected(String),

    #[error("buffer request failed: {0}")]
    RequestBuffers(#[source] io::Error),

    #[error("driver granted no capture buffers")]
    NoBuffers,

    #[error("failed to map buffer {index}: {source}")]
    Map { index: u32, source: io::Error },

    #[error("failed to queue buffer {index}: {source}")]
    Queue { index: u32, source: io::Error },

    #[error("failed to start streaming: {0}")]
    StreamOn(#[source] io::Error),

    #[error("failed to spawn capture thread: {0}")]
    Spawn(#[source] io::Error),

    #[error("capture thread exited before reporting initialization")]
    ThreadLost,
}

/// Device failures during steady-state capture. All of them end the capture loop.
#[derive(Debug, Error)]
pub enum DeviceError {
    #[error("waiting for device failed: {0}")]
    Wait(#[source] io::Error),

    #[error("dequeue failed: {0}")]
    Dequeue(#[source] io::Error),

    /// The driver had nothing to hand out after all. Not fatal.
    #[error("no filled buffer available")]
    NotReady,

    #[error("failed to requeue buffer {index}: {source}")]
    Requeue { index: u32, source: io::Error },

    #[error("failed to stop streaming: {0}")]
    StreamOff(#[source] io::Error),

    #[error("driver returned unknown buffer index {0}")]
    UnknownIndex(u32),

    #[error("buffer {0} is not queued to the device")]
    NotQueued(u32),

    #[error("buffer {0} is not held by the application")]
    NotHeld(u32),
}

/// Failures decoding a single coded frame. The frame is dropped.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("invalid JPEG header: {0}")]
    Header(String),

    #[error("JPEG decompression failed: {0}")]
    Decompress(String),

    #[error("decoded size {actual} does not fit destination of {expected} bytes")]
    BufferSize { expected: usize, actual: usize },
}
