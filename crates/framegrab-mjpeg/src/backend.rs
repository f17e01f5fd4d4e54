//! [`JpegDecompressor`] backed by the `jpeg-decoder` crate.
//!
//! `jpeg-decoder` always upsamples chroma, so native-resolution component
//! samples are rebuilt by box-filtering the upsampled YCbCr output back down
//! to each component's sampling grid. The result approximates the coded
//! chroma samples: luma is exact, while chroma can differ by a few levels
//! from what a decoder exposing raw DCT output would return.

use std::io;

use jpeg_decoder::{ColorTransform, Decoder, PixelFormat};

use crate::decompress::{
    ComponentInfo, DecodeFault, DecodedImage, FaultKind, ImageHeader, JpegDecompressor,
    OutputColor, RawComponent, RawImage, DCT_SIZE,
};
use crate::segment;

/// Neutral chroma value for gray sources.
const CHROMA_ZERO: u8 = 128;

#[derive(Debug, Default, Clone, Copy)]
pub struct JpegDecoderBackend;

impl JpegDecoderBackend {
    pub fn new() -> Self {
        Self
    }
}

impl JpegDecompressor for JpegDecoderBackend {
    fn name(&self) -> &'static str {
        "jpeg-decoder"
    }

    fn read_header(&mut self, jpeg: &[u8]) -> Result<ImageHeader, DecodeFault> {
        let mut decoder = Decoder::new(jpeg);
        decoder.read_info().map_err(classify)?;
        let info = decoder
            .info()
            .ok_or_else(|| DecodeFault::new(FaultKind::NoImage, "no frame header"))?;

        let mut header = segment::frame_header(jpeg)?;
        header.width = u32::from(info.width);
        header.height = u32::from(info.height);
        Ok(header)
    }

    fn decode(&mut self, jpeg: &[u8], color: OutputColor) -> Result<DecodedImage, DecodeFault> {
        let mut decoder = Decoder::new(jpeg);
        if color != OutputColor::Rgb {
            decoder.set_color_transform(ColorTransform::None);
        }
        let pixels = decoder.decode().map_err(classify)?;
        let info = decoder
            .info()
            .ok_or_else(|| DecodeFault::new(FaultKind::NoImage, "no frame header"))?;

        let data = match (info.pixel_format, color) {
            (PixelFormat::L8, OutputColor::Gray) => pixels,
            (PixelFormat::L8, OutputColor::Rgb) => pixels.iter().flat_map(|&l| [l, l, l]).collect(),
            (PixelFormat::L8, OutputColor::YCbCr) => pixels
                .iter()
                .flat_map(|&l| [l, CHROMA_ZERO, CHROMA_ZERO])
                .collect(),
            // Untransformed three-component data: Y is the first channel
            (PixelFormat::RGB24, OutputColor::Gray) => {
                pixels.chunks_exact(3).map(|px| px[0]).collect()
            }
            (PixelFormat::RGB24, _) => pixels,
            (other, _) => {
                return Err(DecodeFault::format(format!(
                    "unsupported pixel format {other:?}"
                )))
            }
        };

        Ok(DecodedImage {
            width: u32::from(info.width),
            height: u32::from(info.height),
            channels: color.channels(),
            data,
        })
    }

    fn decode_raw(&mut self, jpeg: &[u8]) -> Result<RawImage, DecodeFault> {
        let header = segment::frame_header(jpeg)?;

        let mut decoder = Decoder::new(jpeg);
        decoder.set_color_transform(ColorTransform::None);
        let pixels = decoder.decode().map_err(classify)?;
        let info = decoder
            .info()
            .ok_or_else(|| DecodeFault::new(FaultKind::NoImage, "no frame header"))?;

        let channels = match info.pixel_format {
            PixelFormat::L8 => 1,
            PixelFormat::RGB24 => 3,
            other => {
                return Err(DecodeFault::format(format!(
                    "unsupported pixel format {other:?}"
                )))
            }
        };
        if header.components.len() != channels {
            return Err(DecodeFault::format(format!(
                "frame header lists {} components, decoder produced {channels}",
                header.components.len()
            )));
        }

        let plane = Plane {
            pixels: &pixels,
            width: usize::from(info.width),
            height: usize::from(info.height),
            channels,
        };
        let max_h = header.components.iter().map(|c| c.h_samp).max().unwrap_or(1);
        let max_v = header.components.iter().map(|c| c.v_samp).max().unwrap_or(1);
        let components = header
            .components
            .iter()
            .enumerate()
            .map(|(index, c)| plane.downsample(index, c, max_h, max_v))
            .collect();

        Ok(RawImage {
            width: u32::from(info.width),
            height: u32::from(info.height),
            components,
        })
    }
}

/// Upsampled interleaved decoder output.
struct Plane<'a> {
    pixels: &'a [u8],
    width: usize,
    height: usize,
    channels: usize,
}

impl Plane<'_> {
    fn sample(&self, x: usize, y: usize, channel: usize) -> u32 {
        let x = x.min(self.width - 1);
        let y = y.min(self.height - 1);
        u32::from(self.pixels[(y * self.width + x) * self.channels + channel])
    }

    /// Average `channel` over each component sample's footprint; rows and
    /// columns past the image edge replicate the last sample.
    fn downsample(&self, channel: usize, c: &ComponentInfo, max_h: u8, max_v: u8) -> RawComponent {
        let fx = usize::from((max_h / c.h_samp.max(1)).max(1));
        let fy = usize::from((max_v / c.v_samp.max(1)).max(1));
        let comp_w = self.width.div_ceil(fx);
        let comp_h = self.height.div_ceil(fy);
        let width_in_blocks = comp_w.div_ceil(DCT_SIZE);
        let height_in_blocks = comp_h.div_ceil(DCT_SIZE);
        let stride = width_in_blocks * DCT_SIZE;
        let area = (fx * fy) as u32;

        let mut samples = Vec::with_capacity(stride * height_in_blocks * DCT_SIZE);
        for y in 0..height_in_blocks * DCT_SIZE {
            let cy = y.min(comp_h - 1) * fy;
            for x in 0..stride {
                let cx = x.min(comp_w - 1) * fx;
                let mut sum = 0;
                for dy in 0..fy {
                    for dx in 0..fx {
                        sum += self.sample(cx + dx, cy + dy, channel);
                    }
                }
                samples.push(((sum + area / 2) / area) as u8);
            }
        }

        RawComponent {
            h_samp: c.h_samp,
            v_samp: c.v_samp,
            width_in_blocks,
            height_in_blocks,
            samples,
        }
    }
}

/// Map a library error onto a fault.
///
/// Frames handed to the backend were already delimited through their EOI,
/// so running out of bytes here means the frame itself is damaged.
fn classify(err: jpeg_decoder::Error) -> DecodeFault {
    match err {
        jpeg_decoder::Error::Io(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
            DecodeFault::format(format!("frame data ends early: {e}"))
        }
        jpeg_decoder::Error::Format(msg) => DecodeFault::format(msg),
        other => DecodeFault::format(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_downsample_420_chroma() {
        // 4x2 image, channel 1 holds x * 10
        let mut pixels = Vec::new();
        for _y in 0..2 {
            for x in 0..4u8 {
                pixels.extend_from_slice(&[0, x * 10, 0]);
            }
        }
        let plane = Plane {
            pixels: &pixels,
            width: 4,
            height: 2,
            channels: 3,
        };
        let chroma = ComponentInfo { id: 2, h_samp: 1, v_samp: 1 };
        let c = plane.downsample(1, &chroma, 2, 2);
        assert_eq!((c.width_in_blocks, c.height_in_blocks), (1, 1));
        assert_eq!(c.row(0)[0], 5);
        assert_eq!(c.row(0)[1], 25);
        // Padding replicates the last column and row
        assert_eq!(c.row(0)[7], 25);
        assert_eq!(c.row(7)[1], 25);
    }

    #[test]
    fn test_garbage_is_format_fault() {
        let fault = JpegDecoderBackend::new()
            .decode(&[0xFF, 0xD8, 0x00, 0x01, 0xFF, 0xD9], OutputColor::Rgb)
            .unwrap_err();
        assert!(!fault.is_eof_like());
    }
}
