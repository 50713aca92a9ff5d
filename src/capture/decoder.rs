use zune_jpeg::zune_core::colorspace::ColorSpace;
use zune_jpeg::zune_core::options::DecoderOptions;

use super::frame::{Frame, PixelFormat};
use crate::error::DecodeError;

/// What a coded frame declares about itself, read without decoding pixels
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub width: u32,
    pub height: u32,
    /// Components in the coded image (1 = grayscale, 3 = YCbCr, 4 = CMYK)
    pub components: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeOutcome {
    /// The destination payload was fully overwritten
    Decoded,
    /// Geometry did not match the destination; nothing was written
    Skipped { width: u32, height: u32 },
}

/// Decompresses coded frames into a preallocated [`Frame`].
///
/// Instances are created once and reused for every frame of a stream. They
/// are driven from the capture thread only.
pub trait FrameDecoder {
    fn read_header(&mut self, src: &[u8]) -> Result<FrameHeader, DecodeError>;

    /// Decompress `src` straight into `dst`'s existing storage
    fn decode_into(&mut self, src: &[u8], dst: &mut Frame) -> Result<(), DecodeError>;

    /// Decode `src` if its geometry matches `dst`, otherwise leave `dst` untouched
    fn decode(&mut self, src: &[u8], dst: &mut Frame) -> Result<DecodeOutcome, DecodeError> {
        let header = self.read_header(src)?;
        if header.width != dst.width() || header.height != dst.height() {
            return Ok(DecodeOutcome::Skipped {
                width: header.width,
                height: header.height,
            });
        }
        self.decode_into(src, dst)?;
        Ok(DecodeOutcome::Decoded)
    }
}

/// MJPEG decoder backed by zune-jpeg
pub struct JpegDecoder {
    options: DecoderOptions,
    format: PixelFormat,
}

impl JpegDecoder {
    pub fn new(format: PixelFormat) -> Self {
        let colorspace = match format {
            PixelFormat::Rgb24 => ColorSpace::RGB,
            PixelFormat::Bgr24 => ColorSpace::BGR,
        };
        Self {
            options: DecoderOptions::default().jpeg_set_out_colorspace(colorspace),
            format,
        }
    }

    pub fn format(&self) -> PixelFormat {
        self.format
    }
}

impl FrameDecoder for JpegDecoder {
    fn read_header(&mut self, src: &[u8]) -> Result<FrameHeader, DecodeError> {
        let mut decoder = zune_jpeg::JpegDecoder::new_with_options(src, self.options);
        decoder
            .decode_headers()
            .map_err(|e| DecodeError::Header(e.to_string()))?;

        let (width, height) = decoder
            .dimensions()
            .ok_or_else(|| DecodeError::Header("missing frame dimensions".into()))?;
        let components = decoder
            .get_input_colorspace()
            .map(|c| c.num_components())
            .unwrap_or(0);

        Ok(FrameHeader {
            width: width as u32,
            height: height as u32,
            components,
        })
    }

    fn decode_into(&mut self, src: &[u8], dst: &mut Frame) -> Result<(), DecodeError> {
        debug_assert_eq!(dst.format(), self.format);

        let mut decoder = zune_jpeg::JpegDecoder::new_with_options(src, self.options);
        decoder
            .decode_headers()
            .map_err(|e| DecodeError::Header(e.to_string()))?;

        let needed = decoder
            .output_buffer_size()
            .ok_or_else(|| DecodeError::Header("missing frame dimensions".into()))?;
        if needed != dst.len() {
            return Err(DecodeError::BufferSize {
                expected: dst.len(),
                actual: needed,
            });
        }

        decoder
            .decode_into(dst.data_mut())
            .map_err(|e| DecodeError::Decompress(e.to_string()))
    }
}
