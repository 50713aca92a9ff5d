//! Scripted capture device for pipeline tests
//!
//! Buffers are backed by temporary files mapped twice: once for the pool (what
//! the driver would hand out) and once for the device side, which writes the
//! scripted frame payloads into queued buffers like a driver filling them.

use std::collections::VecDeque;
use std::fs::File;
use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use camview::capture::{CaptureDevice, Dequeued, Readiness};
use image::codecs::jpeg::JpegEncoder;
use image::ExtendedColorType;
use memmap2::MmapMut;

/// What the device does on one wait
#[derive(Debug, Clone)]
pub enum Step {
    /// Fill the next queued buffer with these bytes
    Frame(Vec<u8>),
    /// Nothing arrives; the wait runs to its timeout
    Idle,
    /// The wait is interrupted by a signal
    Interrupt,
    /// The device fails
    Fail,
}

/// Counters shared between a test and its device
#[derive(Default)]
pub struct Probe {
    pub waits: AtomicUsize,
    pub idle_waits: AtomicUsize,
    pub queues: AtomicUsize,
    pub dequeues: AtomicUsize,
    pub stream_on: AtomicUsize,
    pub stream_off: AtomicUsize,
    pub dequeue_order: Mutex<Vec<u32>>,
}

impl Probe {
    pub fn count(counter: &AtomicUsize) -> usize {
        counter.load(Ordering::SeqCst)
    }
}

pub struct ScriptedDevice {
    script: VecDeque<Step>,
    buffer_len: usize,
    files: Vec<File>,
    device_side: Vec<MmapMut>,
    incoming: VecDeque<u32>,
    filled: Option<Dequeued>,
    probe: Arc<Probe>,
}

impl ScriptedDevice {
    pub fn new(buffer_len: usize, script: impl IntoIterator<Item = Step>) -> (Self, Arc<Probe>) {
        let probe = Arc::new(Probe::default());
        (
            Self {
                script: script.into_iter().collect(),
                buffer_len,
                files: Vec::new(),
                device_side: Vec::new(),
                incoming: VecDeque::new(),
                filled: None,
                probe: Arc::clone(&probe),
            },
            probe,
        )
    }
}

impl CaptureDevice for ScriptedDevice {
    type Memory = MmapMut;

    fn request_buffers(&mut self, count: u32) -> io::Result<u32> {
        for _ in 0..count {
            let file = tempfile::tempfile()?;
            file.set_len(self.buffer_len as u64)?;
            let map = unsafe { MmapMut::map_mut(&file)? };
            self.files.push(file);
            self.device_side.push(map);
        }
        Ok(count)
    }

    fn map_buffer(&mut self, index: u32) -> io::Result<MmapMut> {
        let file = self
            .files
            .get(index as usize)
            .ok_or_else(|| io::Error::from(io::ErrorKind::InvalidInput))?;
        unsafe { MmapMut::map_mut(file) }
    }

    fn queue(&mut self, index: u32) -> io::Result<()> {
        assert!(
            !self.incoming.contains(&index),
            "buffer {index} queued twice"
        );
        self.probe.queues.fetch_add(1, Ordering::SeqCst);
        self.incoming.push_back(index);
        Ok(())
    }

    fn dequeue(&mut self) -> io::Result<Dequeued> {
        let filled = self
            .filled
            .take()
            .ok_or_else(|| io::Error::from(io::ErrorKind::WouldBlock))?;
        self.probe.dequeues.fetch_add(1, Ordering::SeqCst);
        self.probe.dequeue_order.lock().unwrap().push(filled.index);
        Ok(filled)
    }

    fn wait_ready(&mut self, timeout: Duration) -> io::Result<Readiness> {
        self.probe.waits.fetch_add(1, Ordering::SeqCst);
        match self.script.pop_front().unwrap_or(Step::Idle) {
            Step::Frame(bytes) => {
                let index = self
                    .incoming
                    .pop_front()
                    .expect("no buffer queued to the device");
                let map = &mut self.device_side[index as usize];
                map[..bytes.len()].copy_from_slice(&bytes);
                self.filled = Some(Dequeued {
                    index,
                    bytes_used: bytes.len(),
                });
                Ok(Readiness::Ready)
            }
            Step::Idle => {
                self.probe.idle_waits.fetch_add(1, Ordering::SeqCst);
                thread::sleep(timeout);
                Ok(Readiness::Timeout)
            }
            Step::Interrupt => Err(io::Error::from(io::ErrorKind::Interrupted)),
            Step::Fail => Err(io::Error::from_raw_os_error(libc::ENODEV)),
        }
    }

    fn stream_on(&mut self) -> io::Result<()> {
        self.probe.stream_on.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn stream_off(&mut self) -> io::Result<()> {
        self.probe.stream_off.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Solid-colour JPEG
pub fn solid_jpeg(width: u32, height: u32, rgb: [u8; 3]) -> Vec<u8> {
    let pixels: Vec<u8> = rgb
        .iter()
        .copied()
        .cycle()
        .take((width * height * 3) as usize)
        .collect();
    let mut out = Vec::new();
    JpegEncoder::new_with_quality(&mut out, 95)
        .encode(&pixels, width, height, ExtendedColorType::Rgb8)
        .unwrap();
    out
}

pub fn close_to(actual: &[u8], expected: [u8; 3]) -> bool {
    actual
        .iter()
        .zip(expected)
        .all(|(&a, e)| (a as i16 - e as i16).abs() <= 8)
}

/// Poll `condition` until it holds or `timeout` passes
pub fn wait_until(timeout: Duration, condition: impl Fn() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(2));
    }
    condition()
}
