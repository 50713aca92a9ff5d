//! Capture thread: wait for the device, dequeue, decode, publish, requeue
//!
//! The loop runs on one dedicated thread and moves through
//! `Idle -> Running -> Stopping -> Stopped`. The state only ever advances, so a
//! stopped capture cannot be restarted; spawn a new one instead.

use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam::utils::CachePadded;
use tracing::{debug, error, info, trace, warn};

use super::buffers::DeviceBufferPool;
use super::decoder::{DecodeOutcome, FrameDecoder};
use super::device::{CaptureDevice, Readiness};
use crate::error::{DeviceError, SetupError};
use crate::pipeline::FrameWriter;
use crate::CaptureConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum LoopState {
    Idle = 0,
    Running = 1,
    Stopping = 2,
    Stopped = 3,
}

impl From<u8> for LoopState {
    fn from(value: u8) -> Self {
        match value {
            0 => LoopState::Idle,
            1 => LoopState::Running,
            2 => LoopState::Stopping,
            _ => LoopState::Stopped,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CaptureOptions {
    /// Buffers to request from the driver
    pub buffer_count: u32,
    /// Longest single wait for the device. Bounds the latency of a stop request.
    pub wait_timeout: Duration,
    /// Pause after streaming starts, before the first wait
    pub settle: Duration,
}

impl Default for CaptureOptions {
    fn default() -> Self {
        Self {
            buffer_count: 2,
            wait_timeout: Duration::from_secs(2),
            settle: Duration::from_secs(1),
        }
    }
}

impl From<&CaptureConfig> for CaptureOptions {
    fn from(config: &CaptureConfig) -> Self {
        Self {
            buffer_count: config.buffer_count,
            wait_timeout: Duration::from_millis(config.wait_timeout_ms),
            settle: Duration::from_millis(config.settle_ms),
        }
    }
}

/// Snapshot of capture counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CaptureStats {
    pub decoded: u64,
    pub dropped: u64,
    pub timeouts: u64,
}

#[derive(Default)]
struct Status {
    state: AtomicU8,
    decoded: CachePadded<AtomicU64>,
    dropped: CachePadded<AtomicU64>,
    timeouts: CachePadded<AtomicU64>,
}

impl Status {
    fn state(&self) -> LoopState {
        LoopState::from(self.state.load(Ordering::Acquire))
    }

    /// Move forward to `to`; returns the previous state. Never moves backwards.
    fn advance(&self, to: LoopState) -> LoopState {
        LoopState::from(self.state.fetch_max(to as u8, Ordering::AcqRel))
    }

    fn request_stop(&self) {
        if self.advance(LoopState::Stopping) < LoopState::Stopping {
            info!("Capture stop requested");
        }
    }

    fn stats(&self) -> CaptureStats {
        CaptureStats {
            decoded: self.decoded.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            timeouts: self.timeouts.load(Ordering::Relaxed),
        }
    }
}

/// Cloneable handle that asks the capture loop to stop
#[derive(Clone)]
pub struct StopHandle {
    status: Arc<Status>,
}

impl StopHandle {
    pub fn request_stop(&self) {
        self.status.request_stop();
    }
}

/// Owner of the capture thread.
///
/// Dropping it requests a stop and joins the thread, so the thread never
/// outlives its owner.
pub struct CaptureThread {
    status: Arc<Status>,
    handle: Option<JoinHandle<()>>,
}

impl CaptureThread {
    /// Start capturing on a new thread.
    ///
    /// Buffer setup runs on the capture thread; its outcome is reported back
    /// before this returns, so on error no capture thread is left running.
    pub fn spawn<D, Dec>(
        device: D,
        decoder: Dec,
        writer: FrameWriter,
        options: CaptureOptions,
    ) -> Result<Self, SetupError>
    where
        D: CaptureDevice + 'static,
        Dec: FrameDecoder + Send + 'static,
    {
        let status = Arc::new(Status::default());
        let thread_status = Arc::clone(&status);
        let (init_tx, init_rx) = flume::bounded(1);

        let handle = thread::Builder::new()
            .name("capture".into())
            .spawn(move || {
                debug!("Capture thread started, initializing buffers");
                let pool = match DeviceBufferPool::initialize(device, options.buffer_count) {
                    Ok(pool) => pool,
                    Err(e) => {
                        thread_status.advance(LoopState::Stopped);
                        let _ = init_tx.send(Err(e));
                        return;
                    }
                };
                let _ = init_tx.send(Ok(()));
                run(pool, decoder, writer, &options, &thread_status);
            })
            .map_err(SetupError::Spawn)?;

        match init_rx.recv() {
            Ok(Ok(())) => Ok(Self {
                status,
                handle: Some(handle),
            }),
            Ok(Err(e)) => {
                let _ = handle.join();
                Err(e)
            }
            Err(_) => {
                let _ = handle.join();
                Err(SetupError::ThreadLost)
            }
        }
    }

    pub fn state(&self) -> LoopState {
        self.status.state()
    }

    /// False once a stop was requested or the device failed
    pub fn is_running(&self) -> bool {
        self.state() <= LoopState::Running
    }

    /// Ask the loop to stop. Observed at the top of the next iteration, so it
    /// can take up to one wait timeout.
    pub fn request_stop(&self) {
        self.status.request_stop();
    }

    pub fn stop_handle(&self) -> StopHandle {
        StopHandle {
            status: Arc::clone(&self.status),
        }
    }

    pub fn stats(&self) -> CaptureStats {
        self.status.stats()
    }

    /// Wait for the thread to exit without requesting a stop
    pub fn join(&mut self) {
        if let Some(handle) = self.handle.take() {
            debug!("Waiting for capture thread to finish");
            if let Err(e) = handle.join() {
                warn!("Capture thread panicked: {:?}", e);
            }
        }
    }

    /// Request a stop and wait for the thread to exit
    pub fn stop(&mut self) {
        self.request_stop();
        self.join();
    }
}

impl Drop for CaptureThread {
    fn drop(&mut self) {
        if self.handle.is_some() {
            self.stop();
        }
    }
}

fn run<D, Dec>(
    mut pool: DeviceBufferPool<D>,
    mut decoder: Dec,
    mut writer: FrameWriter,
    options: &CaptureOptions,
    status: &Status,
) where
    D: CaptureDevice,
    Dec: FrameDecoder,
{
    if status.advance(LoopState::Running) == LoopState::Idle {
        info!(buffers = pool.len(), "Capture running");
    }

    if !options.settle.is_zero() {
        thread::sleep(options.settle);
    }

    while status.state() == LoopState::Running {
        if let Err(e) = capture_once(&mut pool, &mut decoder, &mut writer, options, status) {
            error!(error = %e, "Capture device failed, stopping");
            status.advance(LoopState::Stopping);
        }
    }

    if let Err(e) = pool.teardown() {
        warn!(error = %e, "Stream teardown failed");
    }
    status.advance(LoopState::Stopped);
    writer.close();

    let stats = status.stats();
    info!(
        decoded = stats.decoded,
        dropped = stats.dropped,
        timeouts = stats.timeouts,
        "Capture stopped"
    );
}

/// One iteration. Only device failures are returned; bad frames are dropped.
fn capture_once<D, Dec>(
    pool: &mut DeviceBufferPool<D>,
    decoder: &mut Dec,
    writer: &mut FrameWriter,
    options: &CaptureOptions,
    status: &Status,
) -> Result<(), DeviceError>
where
    D: CaptureDevice,
    Dec: FrameDecoder,
{
    if pool.wait_ready(options.wait_timeout)? == Readiness::Timeout {
        debug!(timeout = ?options.wait_timeout, "No frame from device");
        status.timeouts.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("camview_wait_timeouts").increment(1);
        return Ok(());
    }

    let lease = match pool.dequeue() {
        Ok(lease) => lease,
        Err(DeviceError::NotReady) => {
            trace!("Spurious wakeup, nothing to dequeue");
            return Ok(());
        }
        Err(e) => return Err(e),
    };

    let decode_start = Instant::now();
    match decoder.decode(lease.data(), writer.frame_mut()) {
        Ok(DecodeOutcome::Decoded) => {
            status.decoded.fetch_add(1, Ordering::Relaxed);
            metrics::counter!("camview_frames_decoded").increment(1);
            metrics::histogram!("camview_decode_time_us")
                .record(decode_start.elapsed().as_micros() as f64);
            // Wakes the reader, so counted first
            writer.publish();
        }
        Ok(DecodeOutcome::Skipped { width, height }) => {
            debug!(width, height, "Frame geometry mismatch, dropping");
            status.dropped.fetch_add(1, Ordering::Relaxed);
            metrics::counter!("camview_frames_dropped").increment(1);
        }
        Err(e) => {
            debug!(index = lease.index(), error = %e, "Undecodable frame, dropping");
            status.dropped.fetch_add(1, Ordering::Relaxed);
            metrics::counter!("camview_frames_dropped").increment(1);
        }
    }

    lease.requeue()
}
