//! Decoder for MJPEG-in-Matroska (`V_MS/VFW/FOURCC`) tracks.
//!
//! Every SimpleBlock holds one complete JPEG image, so each payload is run
//! through a fresh [`MjpegSource`] over the borrowed bytes.

use framegrab_core::{MjpegConfig, Result};
use framegrab_mjpeg::segment::SOI;
use framegrab_mjpeg::{Layout, MjpegSource, PixelType};
use framegrab_mkv::Frame;

use crate::{FrameDecoder, Picture};

#[derive(Debug, Clone)]
pub struct MjpegFrameDecoder {
    config: MjpegConfig,
}

impl Default for MjpegFrameDecoder {
    fn default() -> Self {
        Self::with_config(&MjpegConfig::default())
    }
}

impl MjpegFrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use the retry and buffering settings of `config`.
    ///
    /// Block payloads start with the image itself, so any custom boundary
    /// string is replaced by the SOI marker.
    pub fn with_config(config: &MjpegConfig) -> Self {
        Self {
            config: MjpegConfig {
                separator: SOI.to_vec(),
                ..config.clone()
            },
        }
    }
}

impl FrameDecoder for MjpegFrameDecoder {
    fn name(&self) -> &'static str {
        "mjpeg"
    }

    /// The picture timestamp is the camera time from the JPEG comment
    /// marker, or the block's pts when the image carries none.
    fn decode(&mut self, frame: &Frame<'_>, out: &mut Vec<u8>, grey: bool) -> Result<Option<Picture>> {
        if frame.data.is_empty() {
            return Ok(None);
        }

        let pixel_type = if grey { PixelType::Gray } else { PixelType::Rgb };
        let mut source =
            MjpegSource::from_reader(frame.data, pixel_type, Layout::Interleaved, &self.config)?;
        let Some(image) = source.next_frame()? else {
            tracing::debug!(pts = frame.pts, len = frame.data.len(), "block holds no JPEG image");
            return Ok(None);
        };

        let geometry = image.header.geometry;
        out.clear();
        out.extend_from_slice(image.pixels);
        Ok(Some(Picture {
            timestamp: image.header.timestamp.map_or(frame.pts, |t| t.as_micros()),
            width: geometry.width,
            height: geometry.height,
            channels: geometry.channels,
        }))
    }
}
