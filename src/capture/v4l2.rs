//! V4L2 streaming capture device with memory-mapped buffers
//!
//! Format negotiation goes through the `v4l` crate; the streaming ioctls are
//! issued through its raw `v4l2::ioctl` wrapper so that buffer ownership stays with
//! [`DeviceBufferPool`](super::buffers::DeviceBufferPool).

use std::io;
use std::mem;
use std::os::raw::c_void;
use std::os::fd::BorrowedFd;
use std::os::unix::io::RawFd;
use std::time::Duration;

use memmap2::{MmapMut, MmapOptions};
use nix::poll::{poll, PollFd, PollFlags, PollTimeout};
use tracing::{info, instrument, warn};
use v4l::buffer::Type;
use v4l::capability::Flags as CapFlags;
use v4l::memory::Memory;
use v4l::v4l2::{self, vidioc};
use v4l::v4l_sys::{v4l2_buffer, v4l2_requestbuffers};
use v4l::video::Capture;
use v4l::{Device, FourCC};

use super::device::{CaptureDevice, Dequeued, Readiness};
use crate::error::SetupError;

const MJPEG: &[u8; 4] = b"MJPG";

/// Geometry the driver settled on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NegotiatedFormat {
    pub width: u32,
    pub height: u32,
}

/// An opened V4L2 capture node delivering MJPEG
pub struct V4l2Device {
    // Keeps the descriptor open
    _device: Device,
    fd: RawFd,
}

impl V4l2Device {
    /// Open `path` and negotiate MJPEG at `width`x`height`.
    ///
    /// The driver may pick other dimensions; those are returned and must be
    /// used for the destination frame.
    #[instrument]
    pub fn open(
        path: &str,
        width: u32,
        height: u32,
    ) -> Result<(Self, NegotiatedFormat), SetupError> {
        let device = Device::with_path(path).map_err(|source| SetupError::Open {
            path: path.to_string(),
            source,
        })?;

        let caps = device.query_caps().map_err(SetupError::Query)?;
        info!("Device: {} ({})", caps.card, caps.driver);

        if !caps
            .capabilities
            .contains(CapFlags::VIDEO_CAPTURE | CapFlags::STREAMING)
        {
            return Err(SetupError::NotCapture);
        }

        let mut fmt = device.format().map_err(SetupError::Format)?;
        fmt.width = width;
        fmt.height = height;
        fmt.fourcc = FourCC::new(MJPEG);
        let fmt = device.set_format(&fmt).map_err(SetupError::Format)?;

        if fmt.fourcc != FourCC::new(MJPEG) {
            return Err(SetupError::FormatRejected(fmt.fourcc.to_string()));
        }
        if fmt.width != width || fmt.height != height {
            warn!(
                "Driver is sending image at {}x{} instead of {}x{}",
                fmt.width, fmt.height, width, height
            );
        }

        let fd = device.handle().fd();
        Ok((
            Self {
                _device: device,
                fd,
            },
            NegotiatedFormat {
                width: fmt.width,
                height: fmt.height,
            },
        ))
    }

    fn buffer(index: u32) -> v4l2_buffer {
        // SAFETY: v4l2_buffer is a plain C struct; all-zero is a valid value.
        let mut buf: v4l2_buffer = unsafe { mem::zeroed() };
        buf.index = index;
        buf.type_ = Type::VideoCapture as u32;
        buf.memory = Memory::Mmap as u32;
        buf
    }
}

/// Issue `request` on `fd`, retrying while it is interrupted by a signal
///
/// # Safety
///
/// `arg` must be the argument type `request` is defined for.
unsafe fn xioctl<T>(fd: RawFd, request: vidioc::_IOC_TYPE, arg: &mut T) -> io::Result<()> {
    let arg = arg as *mut T as *mut c_void;
    loop {
        match v4l2::ioctl(fd, request, arg) {
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            result => return result,
        }
    }
}

/// Convert a wait timeout to a poll timeout without truncating it
fn poll_timeout(timeout: Duration) -> io::Result<PollTimeout> {
    PollTimeout::try_from(timeout).map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))
}

impl CaptureDevice for V4l2Device {
    type Memory = MmapMut;

    fn request_buffers(&mut self, count: u32) -> io::Result<u32> {
        // SAFETY: see `buffer`
        let mut req: v4l2_requestbuffers = unsafe { mem::zeroed() };
        req.count = count;
        req.type_ = Type::VideoCapture as u32;
        req.memory = Memory::Mmap as u32;

        unsafe { xioctl(self.fd, vidioc::VIDIOC_REQBUFS, &mut req)? };
        Ok(req.count)
    }

    fn map_buffer(&mut self, index: u32) -> io::Result<MmapMut> {
        let mut buf = Self::buffer(index);
        unsafe { xioctl(self.fd, vidioc::VIDIOC_QUERYBUF, &mut buf)? };

        // SAFETY: `m.offset` is the active union member for MMAP buffers.
        let offset = unsafe { buf.m.offset };
        // SAFETY: the driver owns this memory for the lifetime of the stream;
        // the pool drops every mapping before the device is closed.
        unsafe {
            MmapOptions::new()
                .offset(offset as u64)
                .len(buf.length as usize)
                .map_mut(self.fd)
        }
    }

    fn queue(&mut self, index: u32) -> io::Result<()> {
        let mut buf = Self::buffer(index);
        unsafe { xioctl(self.fd, vidioc::VIDIOC_QBUF, &mut buf) }
    }

    fn dequeue(&mut self) -> io::Result<Dequeued> {
        let mut buf = Self::buffer(0);
        unsafe { xioctl(self.fd, vidioc::VIDIOC_DQBUF, &mut buf)? };
        Ok(Dequeued {
            index: buf.index,
            bytes_used: buf.bytesused as usize,
        })
    }

    fn wait_ready(&mut self, timeout: Duration) -> io::Result<Readiness> {
        // SAFETY: `fd` stays open for as long as `self` exists.
        let fd = unsafe { BorrowedFd::borrow_raw(self.fd) };
        let mut fds = [PollFd::new(fd, PollFlags::POLLIN)];
        match poll(&mut fds, poll_timeout(timeout)?) {
            Ok(0) => Ok(Readiness::Timeout),
            Ok(_) => Ok(Readiness::Ready),
            Err(errno) => Err(errno.into()),
        }
    }

    fn stream_on(&mut self) -> io::Result<()> {
        let mut kind = Type::VideoCapture as libc::c_int;
        unsafe { xioctl(self.fd, vidioc::VIDIOC_STREAMON, &mut kind) }
    }

    fn stream_off(&mut self) -> io::Result<()> {
        let mut kind = Type::VideoCapture as libc::c_int;
        unsafe { xioctl(self.fd, vidioc::VIDIOC_STREAMOFF, &mut kind) }
    }
}
