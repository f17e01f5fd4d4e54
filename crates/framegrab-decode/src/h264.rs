//! H.264 decoding through the FFmpeg libraries (`ffmpeg-the-third`).
//!
//! The decoder is initialized from the track's CodecPrivate (an
//! `AVCDecoderConfigurationRecord`) and converts every picture to RGB24 or
//! GRAY8 at its native size.
//!
//! Pictures leave the decoder in presentation order and possibly several
//! access units late. They are queued and handed out one per call, each
//! carrying the pts of the packet it came from.

use std::collections::VecDeque;
use std::sync::OnceLock;

use ffmpeg::format::Pixel;
use ffmpeg::software::scaling;
use ffmpeg_the_third as ffmpeg;
use framegrab_core::{Error, Result};
use framegrab_mkv::Frame;

use crate::{FrameDecoder, Picture};

static FFMPEG_INIT: OnceLock<std::result::Result<(), String>> = OnceLock::new();

/// Register the FFmpeg codecs once per process.
fn init_ffmpeg() -> Result<()> {
    FFMPEG_INIT
        .get_or_init(|| ffmpeg::init().map_err(|e| e.to_string()))
        .clone()
        .map_err(|e| Error::decode(format!("FFmpeg initialization failed: {e}")))
}

/// Cached conversion context, rebuilt when the picture format changes.
struct Converter {
    source: (Pixel, u32, u32),
    target: Pixel,
    context: scaling::Context,
}

pub struct H264Decoder {
    decoder: ffmpeg::decoder::Video,
    /// Decoded pictures not yet handed out.
    queue: VecDeque<ffmpeg::frame::Video>,
    /// End of stream was signalled; the decoder needs a reset before input.
    draining: bool,
    picture: ffmpeg::frame::Video,
    converted: ffmpeg::frame::Video,
    converter: Option<Converter>,
}

// SAFETY: the FFmpeg contexts are owned exclusively by this value and only
// touched through `&mut self`.
unsafe impl Send for H264Decoder {}

impl H264Decoder {
    /// Open a decoder configured by `codec_private`.
    pub fn open(codec_private: &[u8]) -> Result<Self> {
        init_ffmpeg()?;

        let codec = ffmpeg::decoder::find(ffmpeg::codec::Id::H264)
            .ok_or_else(|| Error::unsupported("FFmpeg build has no H.264 decoder"))?;
        let mut context = ffmpeg::codec::context::Context::new_with_codec(codec);
        set_extradata(&mut context, codec_private)?;

        let decoder = context
            .decoder()
            .video()
            .map_err(|e| Error::decode(format!("failed to open H.264 decoder: {e}")))?;
        tracing::debug!(extradata = codec_private.len(), "opened H.264 decoder");

        Ok(Self {
            decoder,
            queue: VecDeque::new(),
            draining: false,
            picture: ffmpeg::frame::Video::empty(),
            converted: ffmpeg::frame::Video::empty(),
            converter: None,
        })
    }

    fn converter(&mut self, target: Pixel) -> Result<&mut scaling::Context> {
        let source = (self.picture.format(), self.picture.width(), self.picture.height());
        let stale = self
            .converter
            .as_ref()
            .map_or(true, |c| c.source != source || c.target != target);
        if stale {
            let (format, width, height) = source;
            let context = scaling::Context::get(
                format,
                width,
                height,
                target,
                width,
                height,
                scaling::Flags::BILINEAR,
            )
            .map_err(|e| Error::decode(format!("no conversion from {format:?}: {e}")))?;
            self.converter = Some(Converter {
                source,
                target,
                context,
            });
        }
        match self.converter.as_mut() {
            Some(converter) => Ok(&mut converter.context),
            None => Err(Error::fail("scaler missing after initialization")),
        }
    }
}

impl H264Decoder {
    fn receive_all(&mut self) {
        loop {
            let mut picture = ffmpeg::frame::Video::empty();
            if self.decoder.receive_frame(&mut picture).is_err() {
                break;
            }
            self.queue.push_back(picture);
        }
    }

    /// Convert the oldest queued picture into `out`.
    fn emit(&mut self, out: &mut Vec<u8>, grey: bool) -> Result<Option<Picture>> {
        let Some(picture) = self.queue.pop_front() else {
            return Ok(None);
        };
        self.picture = picture;
        let timestamp = self
            .picture
            .pts()
            .or_else(|| self.picture.timestamp())
            .and_then(|pts| u64::try_from(pts).ok())
            .ok_or_else(|| Error::decode("decoded picture carries no timestamp"))?;

        let (target, channels) = if grey {
            (Pixel::GRAY8, 1)
        } else {
            (Pixel::RGB24, 3)
        };
        let mut converted = std::mem::replace(&mut self.converted, ffmpeg::frame::Video::empty());
        let run = self
            .converter(target)?
            .run(&self.picture, &mut converted)
            .map_err(|e| Error::decode(format!("pixel conversion failed: {e}")));
        self.converted = converted;
        run?;

        let width = self.converted.width();
        let height = self.converted.height();
        let row_len = width as usize * channels;
        let stride = self.converted.stride(0);
        out.clear();
        for row in self.converted.data(0).chunks(stride).take(height as usize) {
            out.extend_from_slice(&row[..row_len.min(row.len())]);
        }

        Ok(Some(Picture {
            timestamp,
            width,
            height,
            channels,
        }))
    }
}

impl FrameDecoder for H264Decoder {
    fn name(&self) -> &'static str {
        "ffmpeg-h264"
    }

    fn decode(&mut self, frame: &Frame<'_>, out: &mut Vec<u8>, grey: bool) -> Result<Option<Picture>> {
        if frame.data.is_empty() {
            return self.emit(out, grey);
        }
        if self.draining {
            self.reset();
        }

        let mut packet = ffmpeg::Packet::copy(frame.data);
        packet.set_pts(Some(frame.pts as i64));
        self.decoder
            .send_packet(&packet)
            .map_err(|e| Error::decode(format!("H.264 packet at pts {}: {e}", frame.pts)))?;
        self.receive_all();
        self.emit(out, grey)
    }

    fn flush(&mut self, out: &mut Vec<u8>, grey: bool) -> Result<Option<Picture>> {
        if !self.draining {
            self.draining = true;
            self.decoder
                .send_eof()
                .map_err(|e| Error::decode(format!("H.264 end of stream: {e}")))?;
            self.receive_all();
        }
        self.emit(out, grey)
    }

    fn reset(&mut self) {
        self.decoder.flush();
        self.queue.clear();
        self.draining = false;
    }
}

/// Copy `bytes` into the context's extradata, allocated the way FFmpeg
/// expects (zeroed padding after the payload).
fn set_extradata(context: &mut ffmpeg::codec::context::Context, bytes: &[u8]) -> Result<()> {
    if bytes.is_empty() {
        return Ok(());
    }
    let size = i32::try_from(bytes.len())
        .map_err(|_| Error::format(format!("CodecPrivate of {} bytes", bytes.len())))?;
    let padding = ffmpeg::ffi::AV_INPUT_BUFFER_PADDING_SIZE as usize;

    unsafe {
        let buf = ffmpeg::ffi::av_mallocz(bytes.len() + padding) as *mut u8;
        if buf.is_null() {
            return Err(Error::fail("failed to allocate decoder extradata"));
        }
        std::ptr::copy_nonoverlapping(bytes.as_ptr(), buf, bytes.len());
        let ctx = context.as_mut_ptr();
        (*ctx).extradata = buf;
        (*ctx).extradata_size = size;
    }
    Ok(())
}
