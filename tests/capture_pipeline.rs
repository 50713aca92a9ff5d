mod common;

use std::time::{Duration, Instant};

use camview::capture::{CaptureOptions, CaptureThread, JpegDecoder, LoopState};
use camview::pipeline::{frame_handoff, FrameReader, WaitOutcome};
use camview::{Frame, PixelFormat, SetupError};
use common::{close_to, solid_jpeg, Probe, ScriptedDevice, Step};

const WIDTH: u32 = 16;
const HEIGHT: u32 = 16;
const BUFFER_LEN: usize = 256 * 1024;

const RED: [u8; 3] = [220, 30, 30];
const GREEN: [u8; 3] = [30, 200, 40];
const BLUE: [u8; 3] = [20, 40, 210];

fn options(wait_timeout: Duration) -> CaptureOptions {
    CaptureOptions {
        buffer_count: 2,
        wait_timeout,
        settle: Duration::ZERO,
    }
}

fn start(
    script: Vec<Step>,
    options: CaptureOptions,
) -> (CaptureThread, FrameReader, std::sync::Arc<Probe>) {
    let (device, probe) = ScriptedDevice::new(BUFFER_LEN, script);
    let (writer, reader) = frame_handoff(Frame::new(WIDTH, HEIGHT, PixelFormat::Rgb24));
    let capture = CaptureThread::spawn(device, JpegDecoder::new(PixelFormat::Rgb24), writer, options)
        .unwrap();
    (capture, reader, probe)
}

#[test]
fn test_latest_frame_wins_when_consumer_is_slow() {
    let (mut capture, mut reader, _probe) = start(
        vec![
            Step::Frame(solid_jpeg(WIDTH, HEIGHT, RED)),
            Step::Frame(solid_jpeg(WIDTH, HEIGHT, GREEN)),
            Step::Frame(solid_jpeg(WIDTH, HEIGHT, BLUE)),
        ],
        options(Duration::from_millis(20)),
    );

    assert!(common::wait_until(Duration::from_secs(5), || {
        capture.stats().decoded == 3
    }));

    assert!(reader.take_if_updated());
    assert!(close_to(reader.frame().pixel(0, 0).unwrap(), BLUE));
    assert!(close_to(reader.frame().pixel(WIDTH - 1, HEIGHT - 1).unwrap(), BLUE));
    assert!(!reader.take_if_updated());

    capture.stop();
    assert_eq!(capture.state(), LoopState::Stopped);
}

#[test]
fn test_device_failure_stops_and_tears_down_once() {
    let mut script: Vec<Step> = (0..4)
        .map(|_| Step::Frame(solid_jpeg(WIDTH, HEIGHT, GREEN)))
        .collect();
    script.push(Step::Fail);
    let (mut capture, mut reader, probe) = start(script, options(Duration::from_millis(20)));

    assert!(common::wait_until(Duration::from_secs(5), || {
        capture.state() == LoopState::Stopped
    }));
    assert!(!capture.is_running());
    assert_eq!(capture.stats().decoded, 4);

    // Last good frame is still delivered, then the handoff reports closed
    assert!(reader.take_if_updated());
    assert!(close_to(reader.frame().pixel(3, 3).unwrap(), GREEN));
    assert_eq!(
        reader.wait_for_update(Duration::from_millis(100)),
        WaitOutcome::Closed
    );

    capture.stop();
    drop(capture);
    assert_eq!(Probe::count(&probe.stream_on), 1);
    assert_eq!(Probe::count(&probe.stream_off), 1);
    // Initial queue of both buffers plus one requeue per decoded frame
    assert_eq!(Probe::count(&probe.queues), 2 + 4);
    assert_eq!(Probe::count(&probe.waits), 5);
    // Two buffers cycle in the order the device hands them back
    assert_eq!(Probe::count(&probe.dequeues), 4);
    assert_eq!(*probe.dequeue_order.lock().unwrap(), vec![0, 1, 0, 1]);
}

#[test]
fn test_stop_while_waiting_is_bounded_by_timeout() {
    let wait_timeout = Duration::from_millis(300);
    let (mut capture, reader, probe) = start(Vec::new(), options(wait_timeout));

    assert!(common::wait_until(Duration::from_secs(5), || {
        Probe::count(&probe.idle_waits) >= 1
    }));

    let begin = Instant::now();
    capture.stop();
    let elapsed = begin.elapsed();

    assert_eq!(capture.state(), LoopState::Stopped);
    // The blocked wait is not cut short, and nothing waits past it
    assert!(elapsed > wait_timeout / 4, "stop took {elapsed:?}");
    assert!(
        elapsed < wait_timeout + Duration::from_millis(250),
        "stop took {elapsed:?}"
    );
    assert_eq!(Probe::count(&probe.stream_off), 1);
    assert!(reader.is_closed());
    assert_eq!(capture.stats().decoded, 0);
}

#[test]
fn test_mismatched_geometry_is_dropped() {
    let (mut capture, mut reader, _probe) = start(
        vec![
            Step::Frame(solid_jpeg(800, 600, RED)),
            Step::Frame(solid_jpeg(WIDTH, HEIGHT, GREEN)),
        ],
        options(Duration::from_millis(20)),
    );

    assert_eq!(
        reader.wait_for_update(Duration::from_secs(5)),
        WaitOutcome::Updated
    );
    assert!(close_to(reader.frame().pixel(0, 0).unwrap(), GREEN));

    let stats = capture.stats();
    assert_eq!(stats.dropped, 1);
    assert_eq!(stats.decoded, 1);
    assert!(capture.is_running());
    capture.stop();
}

#[test]
fn test_corrupt_frame_is_dropped_and_capture_continues() {
    let (mut capture, mut reader, probe) = start(
        vec![
            Step::Frame(vec![0xFF, 0xD8, 0x00, 0x13, 0x37]),
            Step::Frame(solid_jpeg(WIDTH, HEIGHT, BLUE)),
        ],
        options(Duration::from_millis(20)),
    );

    assert_eq!(
        reader.wait_for_update(Duration::from_secs(5)),
        WaitOutcome::Updated
    );
    assert!(close_to(reader.frame().pixel(8, 8).unwrap(), BLUE));
    assert_eq!(capture.stats().dropped, 1);

    capture.stop();
    // Dropped frames are requeued too
    assert_eq!(Probe::count(&probe.queues), 2 + 2);
}

#[test]
fn test_interrupted_wait_is_transparent() {
    let (mut capture, mut reader, probe) = start(
        vec![Step::Interrupt, Step::Frame(solid_jpeg(WIDTH, HEIGHT, RED))],
        options(Duration::from_millis(500)),
    );

    assert_eq!(
        reader.wait_for_update(Duration::from_secs(5)),
        WaitOutcome::Updated
    );
    assert!(close_to(reader.frame().pixel(1, 1).unwrap(), RED));
    assert!(capture.is_running());
    assert!(Probe::count(&probe.waits) >= 2);
    assert_eq!(capture.stats().decoded, 1);
    capture.stop();
}

#[test]
fn test_setup_failure_is_reported_by_spawn() {
    let (device, probe) = ScriptedDevice::new(BUFFER_LEN, Vec::new());
    let (writer, reader) = frame_handoff(Frame::new(WIDTH, HEIGHT, PixelFormat::Rgb24));
    let result = CaptureThread::spawn(
        device,
        JpegDecoder::new(PixelFormat::Rgb24),
        writer,
        CaptureOptions {
            buffer_count: 0,
            ..options(Duration::from_millis(20))
        },
    );

    assert!(matches!(result, Err(SetupError::NoBuffers)));
    assert!(reader.is_closed());
    assert_eq!(Probe::count(&probe.stream_on), 0);
    assert_eq!(Probe::count(&probe.waits), 0);
}

#[test]
fn test_drop_stops_capture() {
    let (capture, reader, probe) = start(Vec::new(), options(Duration::from_millis(20)));
    assert!(common::wait_until(Duration::from_secs(5), || {
        Probe::count(&probe.waits) >= 1
    }));

    drop(capture);
    assert!(reader.is_closed());
    assert_eq!(Probe::count(&probe.stream_off), 1);
}
