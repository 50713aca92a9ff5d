use std::path::Path;

use color_eyre::{eyre::eyre, Result};
use tracing::{debug, info};
use v4l::{capability::Flags, video::Capture, Device, FourCC};

/// Highest `/dev/videoN` index probed
const MAX_VIDEO_NODES: u32 = 10;

/// Find the first capture node that streams MJPEG
pub async fn auto_detect_device() -> Result<String> {
    tokio::task::spawn_blocking(probe_devices).await?
}

fn probe_devices() -> Result<String> {
    info!("Auto-detecting capture devices...");

    for i in 0..MAX_VIDEO_NODES {
        let path = format!("/dev/video{}", i);
        if !Path::new(&path).exists() {
            continue;
        }

        let Ok(dev) = Device::with_path(&path) else {
            debug!("Cannot open {}", path);
            continue;
        };
        let Ok(caps) = dev.query_caps() else {
            continue;
        };
        if !caps
            .capabilities
            .contains(Flags::VIDEO_CAPTURE | Flags::STREAMING)
        {
            continue;
        }

        if let Ok(formats) = dev.enum_formats() {
            if formats.iter().any(|fmt| fmt.fourcc == FourCC::new(b"MJPG")) {
                info!("Found MJPEG device: {} - {}", path, caps.card);
                return Ok(path);
            }
            debug!("{} has no MJPEG format", path);
        }
    }

    Err(eyre!("No MJPEG capture device found"))
}
