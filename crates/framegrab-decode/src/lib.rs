//! # framegrab-decode
//!
//! Decode service for frames produced by [`framegrab_mkv::MkvSource`].
//!
//! A [`FrameDecoder`] consumes one compressed access unit at a time and
//! writes the resulting picture into a caller-owned buffer, either as
//! packed RGB24 or as 8-bit gray. Two implementations exist:
//!
//! - [`MjpegFrameDecoder`] for `V_MS/VFW/FOURCC` tracks, which runs every
//!   block payload through the MJPEG demuxer
//! - `H264Decoder` for `V_MPEG4/ISO/AVC` tracks, backed by FFmpeg and only
//!   available with the `ffmpeg` feature
//!
//! [`open_decoder`] picks the right one from the track's codec id.

use std::fmt;

use framegrab_core::{Error, Result};
use framegrab_mkv::elements::{CODEC_H264, CODEC_VFW};
use framegrab_mkv::{Frame, MkvSource};

#[cfg(feature = "ffmpeg")]
pub mod h264;
pub mod mjpeg;

#[cfg(feature = "ffmpeg")]
pub use h264::H264Decoder;
pub use mjpeg::MjpegFrameDecoder;

/// Geometry and timestamp of a picture written by [`FrameDecoder::decode`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Picture {
    /// Picture timestamp in microseconds. For H.264 this is the pts of the
    /// unit the picture was coded in, which may be an earlier unit than the
    /// one just passed to `decode`.
    pub timestamp: u64,
    pub width: u32,
    pub height: u32,
    /// Bytes per pixel: 1 for gray, 3 for RGB24.
    pub channels: usize,
}

impl Picture {
    /// Number of bytes the picture occupies in the output buffer.
    pub fn byte_len(&self) -> usize {
        self.width as usize * self.height as usize * self.channels
    }
}

/// One open decoder instance.
///
/// Dropping the decoder releases everything it holds.
pub trait FrameDecoder: Send {
    /// Short backend name for diagnostics.
    fn name(&self) -> &'static str;

    /// Decode one access unit into `out`, replacing its contents.
    ///
    /// Returns `Ok(None)` when the unit produced no picture (the decoder
    /// is still buffering, or the payload is empty). `out` is only valid
    /// when a [`Picture`] is returned.
    fn decode(&mut self, frame: &Frame<'_>, out: &mut Vec<u8>, grey: bool) -> Result<Option<Picture>>;

    /// Hand out a picture still held after the last unit was sent.
    ///
    /// Call repeatedly at end of input until it returns `Ok(None)`.
    /// Decoders without delay hold nothing.
    fn flush(&mut self, _out: &mut Vec<u8>, _grey: bool) -> Result<Option<Picture>> {
        Ok(None)
    }

    /// Forget buffered input and pictures, e.g. after a seek.
    fn reset(&mut self) {}
}

impl fmt::Debug for dyn FrameDecoder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FrameDecoder").field("name", &self.name()).finish()
    }
}

/// Open the decoder matching the codec of `source`'s video track.
///
/// Track metadata is picked up while the source walks the file, so at least
/// one [`MkvSource::next_frame`] or [`MkvSource::estimate_offset`] call must
/// precede this.
pub fn open_decoder<B: AsRef<[u8]>>(source: &MkvSource<B>) -> Result<Box<dyn FrameDecoder>> {
    match source.codec_id() {
        Some(CODEC_VFW) => Ok(Box::new(MjpegFrameDecoder::new())),
        Some(CODEC_H264) => open_h264(source),
        Some(other) => Err(Error::unsupported(format!("codec {other}"))),
        None => Err(Error::format("video track has no codec id")),
    }
}

#[cfg(feature = "ffmpeg")]
fn open_h264<B: AsRef<[u8]>>(source: &MkvSource<B>) -> Result<Box<dyn FrameDecoder>> {
    let codec_private = source
        .codec_private()
        .ok_or_else(|| Error::format("H.264 track without CodecPrivate"))?;
    Ok(Box::new(H264Decoder::open(codec_private)?))
}

#[cfg(not(feature = "ffmpeg"))]
fn open_h264<B: AsRef<[u8]>>(_source: &MkvSource<B>) -> Result<Box<dyn FrameDecoder>> {
    Err(Error::unsupported(
        "H.264 decoding requires the `ffmpeg` feature",
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use framegrab_mkv::fixtures::MkvBuilder;

    fn walked(data: Vec<u8>) -> MkvSource<Vec<u8>> {
        let mut src = MkvSource::from_bytes(data);
        while src.next_frame().unwrap().is_some() {}
        src
    }

    #[test]
    fn test_picks_mjpeg_decoder() {
        let data = MkvBuilder::new().codec(CODEC_VFW, &[]).build();
        let decoder = open_decoder(&walked(data)).unwrap();
        assert_eq!(decoder.name(), "mjpeg");
    }

    #[test]
    fn test_unknown_codec_is_unsupported() {
        let data = MkvBuilder::new().codec("V_VP9", &[]).build();
        let err = open_decoder(&walked(data)).unwrap_err();
        assert_matches!(err, Error::Unsupported(_));
    }

    #[cfg(not(feature = "ffmpeg"))]
    #[test]
    fn test_h264_without_ffmpeg_is_unsupported() {
        let data = MkvBuilder::new().codec(CODEC_H264, &[1, 2, 3]).build();
        let err = open_decoder(&walked(data)).unwrap_err();
        assert_matches!(err, Error::Unsupported(_));
    }

    #[test]
    fn test_missing_codec_id_is_format_error() {
        let src = MkvSource::from_bytes(Vec::new());
        assert_matches!(open_decoder(&src).unwrap_err(), Error::FileFormat(_));
    }

    #[test]
    fn test_picture_byte_len() {
        let picture = Picture {
            timestamp: 0,
            width: 4,
            height: 2,
            channels: 3,
        };
        assert_eq!(picture.byte_len(), 24);
    }
}
