//! SDL2 Window Display Module
//! Shows the latest captured frame and keeps the window responsive.
//! Rendering is driven by polling the frame handoff; capture never waits on it.

use std::thread;
use std::time::Duration;

use color_eyre::{eyre::eyre, Result};
use sdl2::event::Event;
use sdl2::keyboard::Keycode;
use sdl2::pixels::PixelFormatEnum;
use sdl2::render::{Canvas, Texture, TextureCreator};
use sdl2::video::{Window, WindowContext};
use tracing::{debug, info};

use crate::capture::{Frame, PixelFormat};
use crate::pipeline::FrameReader;
use crate::DisplayConfig;

/// SDL2 Window Display
/// Window size and texture format are fixed by the frame it is created for.
pub struct Sdl2Display {
    canvas: Canvas<Window>,
    texture_creator: TextureCreator<WindowContext>,
    width: u32,
    height: u32,
    format: PixelFormatEnum,
    poll_interval: Duration,
}

impl Sdl2Display {
    pub fn new(sdl_context: &sdl2::Sdl, config: &DisplayConfig, frame: &Frame) -> Result<Self> {
        let video_subsystem = sdl_context.video().map_err(|e| eyre!(e))?;

        let window = video_subsystem
            .window(&config.title, frame.width(), frame.height())
            .position_centered()
            .resizable()
            .build()?;

        let canvas = window.into_canvas().present_vsync().build()?;
        let texture_creator = canvas.texture_creator();

        Ok(Self {
            canvas,
            texture_creator,
            width: frame.width(),
            height: frame.height(),
            format: texture_format(frame.format()),
            poll_interval: Duration::from_millis(config.poll_interval_ms),
        })
    }

    /// Run until the window is closed or `should_quit` returns true.
    ///
    /// Redraws only when the reader reports a new frame. Once capture stops
    /// the last frame stays on screen.
    pub fn run(
        &mut self,
        sdl_context: &sdl2::Sdl,
        reader: &mut FrameReader,
        should_quit: impl Fn() -> bool,
    ) -> Result<()> {
        let mut event_pump = sdl_context.event_pump().map_err(|e| eyre!(e))?;
        let mut texture = self
            .texture_creator
            .create_texture_streaming(self.format, self.width, self.height)
            .map_err(|e| eyre!(e))?;

        render(&mut self.canvas, &mut texture, reader.frame())?;

        let mut rendered = 1u64;
        'running: loop {
            for event in event_pump.poll_iter() {
                match event {
                    Event::Quit { .. }
                    | Event::KeyDown {
                        keycode: Some(Keycode::Escape),
                        ..
                    } => {
                        info!("Quit event received");
                        break 'running;
                    }
                    _ => {}
                }
            }

            if should_quit() {
                info!("Quit requested");
                break;
            }

            if reader.take_if_updated() {
                render(&mut self.canvas, &mut texture, reader.frame())?;
                rendered += 1;
            }

            thread::sleep(self.poll_interval);
        }

        debug!(rendered, "Display loop finished");
        Ok(())
    }
}

fn texture_format(format: PixelFormat) -> PixelFormatEnum {
    match format {
        PixelFormat::Rgb24 => PixelFormatEnum::RGB24,
        PixelFormat::Bgr24 => PixelFormatEnum::BGR24,
    }
}

fn render(canvas: &mut Canvas<Window>, texture: &mut Texture, frame: &Frame) -> Result<()> {
    texture
        .update(None, frame.data(), frame.stride())
        .map_err(|e| eyre!(e))?;

    canvas.clear();
    canvas.copy(texture, None, None).map_err(|e| eyre!(e))?;
    canvas.present();
    Ok(())
}
