//! Frame-level access to camera recordings.
//!
//! [`Video::open`] picks the demuxer from the file extension. Both flavours
//! build (or load) a frame index on open, so `len` is known up front and any
//! frame can be fetched by position.

use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use framegrab_core::{Config, Error, Result};
use framegrab_decode::{open_decoder, FrameDecoder, MjpegFrameDecoder, Picture};
use framegrab_mjpeg::{jpeg_info, CameraInfo, Layout, MjpegFrame, MjpegSource, PixelType};
use framegrab_mkv::MkvSource;

use crate::index::{self, MjpegIndex, MkvIndex};

const MICROS_PER_SEC: f64 = 1_000_000.0;

/// A decoded picture plus its timing.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedFrame {
    /// Position of the frame in the index (for [`MkvVideo::frame`] and
    /// [`MjpegVideo::frame`]) or in decode order (for the iterators).
    pub index: usize,
    /// Presentation time in microseconds.
    pub pts: u64,
    /// Picture timestamp in seconds.
    pub timestamp: f64,
    /// Estimated camera wall-clock time in seconds, 0 when unknown.
    pub systime: f64,
    pub width: u32,
    pub height: u32,
    /// Bytes per pixel: 1 for grey, 3 for RGB.
    pub channels: usize,
    pub pixels: Vec<u8>,
}

fn systime_secs(pts: u64, offset: Option<i64>) -> f64 {
    match offset {
        Some(offset) => (pts as f64 + offset as f64) / MICROS_PER_SEC,
        None => 0.0,
    }
}

// ---------------------------------------------------------------------------
// Video
// ---------------------------------------------------------------------------

/// A recording of either supported container.
pub enum Video {
    Mkv(MkvVideo),
    Mjpeg(MjpegVideo),
}

impl Video {
    /// Open `path` with the default configuration. `grey` selects 8-bit
    /// grey output instead of RGB.
    pub fn open<P: AsRef<Path>>(path: P, grey: bool) -> Result<Self> {
        Self::open_with_config(path, grey, &Config::default())
    }

    /// Open `path`, choosing the demuxer from its extension: `.mkv` for
    /// Matroska, `.mjpg`/`.mjpeg` for raw MJPEG streams.
    pub fn open_with_config<P: AsRef<Path>>(path: P, grey: bool, config: &Config) -> Result<Self> {
        let path = path.as_ref();
        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase);
        match extension.as_deref() {
            Some("mkv") => MkvVideo::open_with_config(path, grey, config).map(Self::Mkv),
            Some("mjpg" | "mjpeg") => MjpegVideo::open_with_config(path, grey, config).map(Self::Mjpeg),
            _ => Err(Error::unsupported(format!(
                "unknown video format: {}",
                path.display()
            ))),
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Self::Mkv(v) => v.len(),
            Self::Mjpeg(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Decode the frame at position `index`.
    pub fn frame(&mut self, index: usize) -> Result<DecodedFrame> {
        match self {
            Self::Mkv(v) => v.frame(index),
            Self::Mjpeg(v) => v.frame(index),
        }
    }

    /// Decode every frame from the start of the recording.
    pub fn frames(&mut self) -> Result<Box<dyn Iterator<Item = Result<DecodedFrame>> + '_>> {
        Ok(match self {
            Self::Mkv(v) => Box::new(v.frames()?),
            Self::Mjpeg(v) => Box::new(v.frames()?),
        })
    }

    /// Camera serial number: the MAC address for Matroska, the serial from
    /// the JPEG comment for MJPEG.
    pub fn serial_number(&self) -> Option<&str> {
        match self {
            Self::Mkv(v) => v.mac(),
            Self::Mjpeg(v) => v.serial_number(),
        }
    }
}

// ---------------------------------------------------------------------------
// Matroska
// ---------------------------------------------------------------------------

pub struct MkvVideo {
    source: MkvSource,
    decoder: Box<dyn FrameDecoder>,
    index: MkvIndex,
    grey: bool,
    buffer: Vec<u8>,
}

impl MkvVideo {
    pub fn open<P: AsRef<Path>>(path: P, grey: bool) -> Result<Self> {
        Self::open_with_config(path, grey, &Config::default())
    }

    pub fn open_with_config<P: AsRef<Path>>(path: P, grey: bool, config: &Config) -> Result<Self> {
        let path = path.as_ref();
        let mut source = MkvSource::open(path)?;
        let index = index::load_or_build(path, &config.index, || MkvIndex::build(&mut source))?;
        source.set_systime_offset(index.systime_offset);

        // Track headers precede the first cluster
        rewind(&mut source)?;
        source.next_frame()?;
        let decoder: Box<dyn FrameDecoder> = if source.is_mjpeg() {
            Box::new(MjpegFrameDecoder::with_config(&config.mjpeg))
        } else {
            open_decoder(&source)?
        };
        rewind(&mut source)?;

        tracing::debug!(
            path = %path.display(),
            frames = index.frames.len(),
            decoder = decoder.name(),
            "opened mkv video"
        );
        Ok(Self {
            source,
            decoder,
            index,
            grey,
            buffer: Vec::new(),
        })
    }

    pub fn len(&self) -> usize {
        self.index.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.frames.is_empty()
    }

    pub fn index(&self) -> &MkvIndex {
        &self.index
    }

    pub fn width(&self) -> u64 {
        self.source.width()
    }

    pub fn height(&self) -> u64 {
        self.source.height()
    }

    /// Camera MAC address as twelve upper-case hex digits.
    pub fn mac(&self) -> Option<&str> {
        self.index.mac.as_deref()
    }

    /// Camera clock offset in microseconds, if the recording carries vendor
    /// clock samples.
    pub fn systime_offset(&self) -> Option<i64> {
        self.index.systime_offset
    }

    /// Estimated wall-clock time in seconds of every indexed frame.
    pub fn systimes(&self) -> Vec<f64> {
        self.index
            .frames
            .iter()
            .map(|f| systime_secs(f.pts, self.index.systime_offset))
            .collect()
    }

    /// Decode the frame at position `index` of the pts-ordered index.
    ///
    /// Decoding starts at the cluster of the closest key frame before it and
    /// runs forward. For MJPEG tracks the requested block itself is decoded;
    /// otherwise the picture whose timestamp equals the frame's pts is
    /// returned, however late the decoder emits it.
    pub fn frame(&mut self, index: usize) -> Result<DecodedFrame> {
        let (Some(target), Some(key)) = (
            self.index.frames.get(index).copied(),
            self.index.key_frame_before(index),
        ) else {
            return Err(Error::illegal_argument(format!(
                "frame {index} out of range for {} frames",
                self.index.frames.len()
            )));
        };
        let start = self.index.frames[key].offset;
        let offset = self.index.systime_offset;
        self.source.seek(start)?;
        self.decoder.reset();

        if self.index.mjpeg_mode {
            let mut reached = false;
            while let Some(frame) = self.source.next_frame()? {
                reached |= frame.pts == target.pts;
                if !reached {
                    continue;
                }
                if let Some(picture) = self.decoder.decode(&frame, &mut self.buffer, self.grey)? {
                    return Ok(decoded(index, target.pts, offset, picture, &self.buffer));
                }
            }
        } else {
            loop {
                let picture = match self.source.next_frame()? {
                    Some(frame) => self.decoder.decode(&frame, &mut self.buffer, self.grey)?,
                    None => match self.decoder.flush(&mut self.buffer, self.grey)? {
                        Some(picture) => Some(picture),
                        None => break,
                    },
                };
                if let Some(picture) = picture.filter(|p| p.timestamp == target.pts) {
                    return Ok(decoded(index, target.pts, offset, picture, &self.buffer));
                }
            }
        }
        Err(Error::fail(format!(
            "frame {index} (pts {}) not found after offset {start}",
            target.pts
        )))
    }

    /// Decode every frame in file order.
    pub fn frames(&mut self) -> Result<MkvFrames<'_>> {
        rewind(&mut self.source)?;
        self.decoder.reset();
        Ok(MkvFrames {
            video: self,
            produced: 0,
            draining: false,
            done: false,
        })
    }
}

fn rewind<B: AsRef<[u8]>>(source: &mut MkvSource<B>) -> Result<()> {
    if source.is_empty() {
        Ok(())
    } else {
        source.seek(0)
    }
}

fn decoded(index: usize, pts: u64, offset: Option<i64>, picture: Picture, pixels: &[u8]) -> DecodedFrame {
    DecodedFrame {
        index,
        pts,
        timestamp: picture.timestamp as f64 / MICROS_PER_SEC,
        systime: systime_secs(pts, offset),
        width: picture.width,
        height: picture.height,
        channels: picture.channels,
        pixels: pixels.to_vec(),
    }
}

/// Iterator returned by [`MkvVideo::frames`].
pub struct MkvFrames<'a> {
    video: &'a mut MkvVideo,
    produced: usize,
    /// The source is exhausted; pictures still held by the decoder remain.
    draining: bool,
    done: bool,
}

impl MkvFrames<'_> {
    fn next_picture(&mut self) -> Result<Option<(u64, Picture)>> {
        let video = &mut *self.video;
        while !self.draining {
            let frame = match video.source.next_frame() {
                Ok(Some(frame)) => frame,
                Ok(None) => {
                    self.draining = true;
                    break;
                }
                Err(e) => {
                    self.done = true;
                    return Err(e);
                }
            };
            if let Some(picture) = video.decoder.decode(&frame, &mut video.buffer, video.grey)? {
                // MJPEG pictures carry camera time, not the block pts
                let pts = if video.index.mjpeg_mode {
                    frame.pts
                } else {
                    picture.timestamp
                };
                return Ok(Some((pts, picture)));
            }
        }
        Ok(video
            .decoder
            .flush(&mut video.buffer, video.grey)?
            .map(|picture| (picture.timestamp, picture)))
    }
}

impl Iterator for MkvFrames<'_> {
    type Item = Result<DecodedFrame>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.next_picture() {
            Ok(Some((pts, picture))) => {
                let video = &*self.video;
                let item = decoded(
                    self.produced,
                    pts,
                    video.index.systime_offset,
                    picture,
                    &video.buffer,
                );
                self.produced += 1;
                Some(Ok(item))
            }
            Ok(None) => {
                self.done = true;
                None
            }
            Err(e) => Some(Err(e)),
        }
    }
}

// ---------------------------------------------------------------------------
// MJPEG
// ---------------------------------------------------------------------------

pub struct MjpegVideo {
    source: MjpegSource<File>,
    index: MjpegIndex,
    camera: Option<CameraInfo>,
}

impl MjpegVideo {
    pub fn open<P: AsRef<Path>>(path: P, grey: bool) -> Result<Self> {
        Self::open_with_config(path, grey, &Config::default())
    }

    pub fn open_with_config<P: AsRef<Path>>(path: P, grey: bool, config: &Config) -> Result<Self> {
        let path = path.as_ref();
        let pixel_type = if grey { PixelType::Gray } else { PixelType::Rgb };
        let source = MjpegSource::open_with_config(path, pixel_type, Layout::Interleaved, &config.mjpeg)?;
        let index = index::load_or_build(path, &config.index, || {
            let file = File::open(path).map_err(|e| Error::from_open(path, e))?;
            MjpegIndex::build(BufReader::new(file), &config.mjpeg)
        })?;

        let camera = match jpeg_info(path) {
            Ok(info) => info.camera,
            Err(e) => {
                tracing::debug!(path = %path.display(), "no camera details: {e}");
                None
            }
        };

        Ok(Self {
            source,
            index,
            camera,
        })
    }

    pub fn len(&self) -> usize {
        self.index.offsets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.offsets.is_empty()
    }

    pub fn index(&self) -> &MjpegIndex {
        &self.index
    }

    pub fn camera(&self) -> Option<&CameraInfo> {
        self.camera.as_ref()
    }

    pub fn hardware_id(&self) -> Option<&str> {
        self.camera.as_ref().map(|c| c.hardware_id.as_str())
    }

    pub fn serial_number(&self) -> Option<&str> {
        self.camera.as_ref().map(|c| c.serial_number.as_str())
    }

    pub fn firmware_version(&self) -> Option<&str> {
        self.camera.as_ref().map(|c| c.firmware_version.as_str())
    }

    /// Decode the frame starting at the `index`-th indexed offset.
    pub fn frame(&mut self, index: usize) -> Result<DecodedFrame> {
        let Some(&offset) = self.index.offsets.get(index) else {
            return Err(Error::illegal_argument(format!(
                "frame {index} out of range for {} frames",
                self.index.offsets.len()
            )));
        };
        self.source.seek(offset)?;
        match self.source.next_frame()? {
            Some(frame) if frame.header.start_position == offset => Ok(mjpeg_decoded(index, frame)),
            // The indexed frame was damaged and the source moved on
            Some(frame) => Err(Error::format(format!(
                "frame {index} at offset {offset} is damaged, next good frame is at {}",
                frame.header.start_position
            ))),
            None => Err(Error::fail(format!("no frame at offset {offset}"))),
        }
    }

    /// Decode every frame from the start of the stream.
    pub fn frames(&mut self) -> Result<MjpegFrames<'_>> {
        self.source.seek(0)?;
        Ok(MjpegFrames {
            source: &mut self.source,
            produced: 0,
            done: false,
        })
    }
}

/// Without a camera timestamp every time field is 0.
fn mjpeg_decoded(index: usize, frame: MjpegFrame<'_>) -> DecodedFrame {
    let geometry = frame.header.geometry;
    let (pts, timestamp) = frame
        .header
        .timestamp
        .map_or((0, 0.0), |t| (t.as_micros(), t.as_secs_f64()));
    DecodedFrame {
        index,
        pts,
        timestamp,
        systime: timestamp,
        width: geometry.width,
        height: geometry.height,
        channels: geometry.channels,
        pixels: frame.pixels.to_vec(),
    }
}

/// Iterator returned by [`MjpegVideo::frames`].
///
/// Damaged frames surface as errors; iteration continues past them unless
/// the error is not a stream fault.
pub struct MjpegFrames<'a> {
    source: &'a mut MjpegSource<File>,
    produced: usize,
    done: bool,
}

impl Iterator for MjpegFrames<'_> {
    type Item = Result<DecodedFrame>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.source.next_frame() {
            Ok(Some(frame)) => {
                let item = mjpeg_decoded(self.produced, frame);
                self.produced += 1;
                Some(Ok(item))
            }
            Ok(None) => {
                self.done = true;
                None
            }
            Err(e) => {
                self.done = !matches!(e, Error::FileFormat(_));
                Some(Err(e))
            }
        }
    }
}
