//! camview: live MJPEG webcam viewer

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use camview::capture::{CaptureOptions, CaptureThread, JpegDecoder, V4l2Device};
use camview::display::Sdl2Display;
use camview::pipeline::{frame_handoff, WaitOutcome};
use camview::{utils, Config, Frame};
use clap::Parser;
use color_eyre::{
    eyre::{bail, eyre},
    Result,
};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "camview")]
#[command(about = "Show a V4L2 MJPEG camera in a window")]
#[command(version)]
struct Cli {
    /// Requested frame width
    #[arg(requires = "height")]
    width: Option<u32>,

    /// Requested frame height
    height: Option<u32>,

    /// Capture device node, or `auto`
    #[arg(short, long)]
    device: Option<String>,

    /// TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Number of driver buffers
    #[arg(long)]
    buffers: Option<u32>,

    /// Longest device wait in milliseconds
    #[arg(long)]
    timeout_ms: Option<u64>,
}

impl Cli {
    fn apply(&self, config: &mut Config) {
        if let (Some(width), Some(height)) = (self.width, self.height) {
            config.capture.width = width;
            config.capture.height = height;
        }
        if let Some(device) = &self.device {
            config.capture.device = device.clone();
        }
        if let Some(buffers) = self.buffers {
            config.capture.buffer_count = buffers;
        }
        if let Some(timeout_ms) = self.timeout_ms {
            config.capture.wait_timeout_ms = timeout_ms;
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize error handling and logging
    color_eyre::install()?;
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("camview=info")),
        )
        .with_timer(tracing_subscriber::fmt::time::uptime())
        .init();

    info!("camview launching...");

    let cli = Cli::parse();
    let mut config = Config::load(cli.config.as_deref())?;
    cli.apply(&mut config);

    if config.capture.device == "auto" {
        config.capture.device = utils::auto_detect_device().await?;
    }
    info!("Using capture device: {}", config.capture.device);
    camview::CONFIG.store(Arc::new(config));
    let config = camview::CONFIG.load_full();

    // Negotiate the format; the driver has the final say on dimensions
    let (device, negotiated) = V4l2Device::open(
        &config.capture.device,
        config.capture.width,
        config.capture.height,
    )?;
    let frame = Frame::new(
        negotiated.width,
        negotiated.height,
        config.capture.pixel_format,
    );

    let (writer, mut reader) = frame_handoff(frame);
    let decoder = JpegDecoder::new(config.capture.pixel_format);
    let mut capture = CaptureThread::spawn(
        device,
        decoder,
        writer,
        CaptureOptions::from(&config.capture),
    )?;

    let interrupted = Arc::new(AtomicBool::new(false));
    {
        let stop = capture.stop_handle();
        let interrupted = Arc::clone(&interrupted);
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Interrupt received");
                interrupted.store(true, Ordering::Release);
                stop.request_stop();
            }
        });
    }

    // Get first frame
    let first_frame_timeout = Duration::from_millis(config.display.first_frame_timeout_ms);
    match reader.wait_for_update(first_frame_timeout) {
        WaitOutcome::Updated => {}
        WaitOutcome::Closed => bail!("Capture stopped before delivering a frame"),
        WaitOutcome::TimedOut => bail!("No frame within {:?}", first_frame_timeout),
    }
    info!(frame = ?reader.frame(), "First frame received");

    // Show image
    let sdl_context = sdl2::init().map_err(|e| eyre!(e))?;
    let mut display = Sdl2Display::new(&sdl_context, &config.display, reader.frame())?;
    let result = display.run(&sdl_context, &mut reader, || {
        interrupted.load(Ordering::Acquire)
    });

    capture.stop();
    info!(stats = ?capture.stats(), "camview shutting down");
    result
}
