//! The MJPEG demuxer.
//!
//! Reading a frame is a two-step affair: [`MjpegSource::read_next_header`]
//! finds the next frame, delimits it and reports its geometry, then
//! [`MjpegSource::read_next_data`] decodes it into the source's pixel buffer.
//!
//! Damaged frames are skipped by advancing one byte and searching again. At
//! most `retry_budget` consecutive damaged frames are tolerated; the next one
//! is a fatal [`Error::FileFormat`]. A fully decoded frame resets the count.

use std::fs::File;
use std::io::{Read, Seek};
use std::path::Path;

use framegrab_core::{Error, MjpegConfig, Result};

use crate::backend::JpegDecoderBackend;
use crate::decompress::{DecodeFault, ImageHeader, JpegDecompressor, OutputColor};
use crate::input::InputBuffer;
use crate::segment::{self, CameraInfo, JpegSegments, Timestamp, SOI};
use crate::unpack;

/// Pixel format of decoded frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelType {
    Gray,
    YCbCr,
    Rgb,
    Bgr,
}

impl PixelType {
    pub fn channels(self) -> usize {
        match self {
            Self::Gray => 1,
            Self::YCbCr | Self::Rgb | Self::Bgr => 3,
        }
    }

    fn output_color(self) -> OutputColor {
        match self {
            Self::Gray => OutputColor::Gray,
            Self::YCbCr => OutputColor::YCbCr,
            Self::Rgb | Self::Bgr => OutputColor::Rgb,
        }
    }
}

/// Memory layout of decoded frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Layout {
    /// Row-major pixels, channels interleaved.
    Interleaved,
    /// Y plane, then (for YCbCr) the subsampled Cb and Cr planes.
    Planar,
}

/// Demuxer state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    /// Looking for the next frame separator.
    SeekMarker,
    /// Delimiting the frame and parsing its header.
    Header,
    /// A header was returned; the frame waits to be decoded.
    Data,
    /// The last frame was decoded, or the stream is exhausted.
    Done,
    /// A damaged frame was skipped; the next header read resynchronizes.
    Retry,
    /// The retry budget was exhausted.
    Fatal,
}

/// Output geometry, fixed by the first frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Geometry {
    pub width: u32,
    pub height: u32,
    pub channels: usize,
}

/// What [`MjpegSource::read_next_header`] learned about a frame.
#[derive(Debug, Clone, PartialEq)]
pub struct FrameHeader {
    pub geometry: Geometry,
    /// Camera timestamp from the frame's comment segment.
    pub timestamp: Option<Timestamp>,
    /// Stream offset of the frame's SOI marker.
    pub start_position: u64,
}

/// A decoded frame borrowing the source's pixel buffer.
#[derive(Debug, Clone, PartialEq)]
pub struct MjpegFrame<'a> {
    pub header: FrameHeader,
    /// Stream offset one past the frame's EOI marker.
    pub stop_position: u64,
    pub pixels: &'a [u8],
}

/// Header and camera details of a single JPEG image.
#[derive(Debug, Clone, PartialEq)]
pub struct JpegInfo {
    pub width: u32,
    pub height: u32,
    pub timestamp: Option<Timestamp>,
    pub camera: Option<CameraInfo>,
}

pub struct MjpegSource<R, D = JpegDecoderBackend> {
    input: InputBuffer<R>,
    decompressor: D,
    pixel_type: PixelType,
    layout: Layout,
    separator: Vec<u8>,
    retry_budget: u32,
    refill_limit: u32,
    state: State,
    failures: u32,
    geometry: Option<Geometry>,
    /// Length of the delimited frame at the input cursor while in `Data`.
    pending: usize,
    pixels: Vec<u8>,
    timestamp: Option<Timestamp>,
    camera: Option<CameraInfo>,
    start_position: u64,
    stop_position: u64,
}

impl MjpegSource<File> {
    /// Open an MJPEG file with the default configuration.
    pub fn open<P: AsRef<Path>>(path: P, pixel_type: PixelType, layout: Layout) -> Result<Self> {
        Self::open_with_config(path, pixel_type, layout, &MjpegConfig::default())
    }

    pub fn open_with_config<P: AsRef<Path>>(
        path: P,
        pixel_type: PixelType,
        layout: Layout,
        config: &MjpegConfig,
    ) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|e| Error::from_open(path, e))?;
        tracing::debug!(path = %path.display(), ?pixel_type, ?layout, "opened mjpeg source");
        Self::from_reader(file, pixel_type, layout, config)
    }
}

impl<R: Read> MjpegSource<R> {
    pub fn from_reader(
        reader: R,
        pixel_type: PixelType,
        layout: Layout,
        config: &MjpegConfig,
    ) -> Result<Self> {
        Self::with_decompressor(reader, JpegDecoderBackend::new(), pixel_type, layout, config)
    }
}

impl<R: Read, D: JpegDecompressor> MjpegSource<R, D> {
    /// Build a source around a specific decompression backend.
    ///
    /// Planar output exists for gray and YCbCr only; other combinations are
    /// rejected with [`Error::IllegalArgument`].
    pub fn with_decompressor(
        reader: R,
        decompressor: D,
        pixel_type: PixelType,
        layout: Layout,
        config: &MjpegConfig,
    ) -> Result<Self> {
        if layout == Layout::Planar && !matches!(pixel_type, PixelType::Gray | PixelType::YCbCr) {
            return Err(Error::illegal_argument(format!(
                "planar output is only available for gray and YCbCr, not {pixel_type:?}"
            )));
        }

        Ok(Self {
            input: InputBuffer::new(reader, config.buffer_size),
            decompressor,
            pixel_type,
            layout,
            separator: config.effective_separator().to_vec(),
            retry_budget: config.retry_budget,
            refill_limit: config.refill_failure_limit,
            state: State::SeekMarker,
            failures: 0,
            geometry: None,
            pending: 0,
            pixels: Vec::new(),
            timestamp: None,
            camera: None,
            start_position: 0,
            stop_position: 0,
        })
    }

    pub fn state(&self) -> State {
        self.state
    }

    /// Consecutive damaged frames since the last decoded one.
    pub fn failures(&self) -> u32 {
        self.failures
    }

    /// Output geometry, once the first frame fixed it.
    pub fn geometry(&self) -> Option<Geometry> {
        self.geometry
    }

    pub fn pixel_type(&self) -> PixelType {
        self.pixel_type
    }

    pub fn layout(&self) -> Layout {
        self.layout
    }

    /// Timestamp of the current frame.
    pub fn timestamp(&self) -> Option<Timestamp> {
        self.timestamp
    }

    /// Latest camera description seen in the stream.
    pub fn camera(&self) -> Option<&CameraInfo> {
        self.camera.as_ref()
    }

    pub fn start_position(&self) -> u64 {
        self.start_position
    }

    pub fn stop_position(&self) -> u64 {
        self.stop_position
    }

    /// Pixels of the last decoded frame.
    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    /// Find the next frame and parse its header.
    ///
    /// Returns [`Error::Eof`] when the stream is exhausted. After a fatal
    /// error the search restarts just past the offending frame.
    pub fn read_next_header(&mut self) -> Result<FrameHeader> {
        match self.state {
            State::Fatal => {
                tracing::debug!("restarting frame search after a fatal error");
                self.failures = 0;
            }
            // The previous header's frame was never decoded
            State::Data => self.input.consume(self.pending),
            _ => {}
        }
        self.pending = 0;

        loop {
            self.state = State::SeekMarker;
            if !self.seek_frame()? {
                self.state = State::Done;
                return Err(Error::Eof);
            }

            self.state = State::Header;
            self.start_position = self.input.position();
            match self.parse_header() {
                Ok((segments, header)) => return self.accept_header(segments, header),
                Err(fault) => self.recover(fault)?,
            }
        }
    }

    /// Decode the frame announced by the last header into the pixel buffer.
    ///
    /// A frame whose data turns out to be damaged is skipped, and the
    /// following frames are tried until one decodes or the retry budget is
    /// spent. The header accessors then describe the frame actually decoded.
    /// [`Error::Eof`] means the stream ended before any frame decoded.
    pub fn read_next_data(&mut self) -> Result<&[u8]> {
        if self.state != State::Data {
            return Err(Error::illegal_argument(format!(
                "no frame header pending (state {:?})",
                self.state
            )));
        }
        while !self.decode_pending()? {
            self.read_next_header()?;
        }
        Ok(&self.pixels)
    }

    /// Read and decode the next frame; `None` at end of stream.
    pub fn next_frame(&mut self) -> Result<Option<MjpegFrame<'_>>> {
        loop {
            let header = match self.read_next_header() {
                Ok(header) => header,
                Err(Error::Eof) => return Ok(None),
                Err(e) => return Err(e),
            };
            match self.decode_pending() {
                Ok(true) => {
                    return Ok(Some(MjpegFrame {
                        header,
                        stop_position: self.stop_position,
                        pixels: &self.pixels,
                    }))
                }
                Ok(false) => {}
                Err(Error::Eof) => return Ok(None),
                Err(e) => return Err(e),
            }
        }
    }

    /// Decode the pending frame. `Ok(false)` means it was damaged and
    /// skipped, leaving the source in [`State::Retry`].
    fn decode_pending(&mut self) -> Result<bool> {
        let Some(geometry) = self.geometry else {
            return Err(Error::illegal_argument("no frame geometry"));
        };

        let jpeg = &self.input.available()[..self.pending];
        let unpacked = match self.layout {
            Layout::Interleaved => self
                .decompressor
                .decode(jpeg, self.pixel_type.output_color())
                .map(|image| {
                    if image.width != geometry.width
                        || image.height != geometry.height
                        || image.channels != geometry.channels
                    {
                        return Err(Error::format(format!(
                            "decoder produced {}x{}x{}, header said {}x{}x{}",
                            image.width,
                            image.height,
                            image.channels,
                            geometry.width,
                            geometry.height,
                            geometry.channels
                        )));
                    }
                    unpack::interleaved(&image, self.pixel_type == PixelType::Bgr, &mut self.pixels);
                    Ok(())
                }),
            Layout::Planar => self
                .decompressor
                .decode_raw(jpeg)
                .map(|raw| unpack::planar(&raw, self.pixel_type == PixelType::Gray, &mut self.pixels)),
        };

        let unpacked = match unpacked {
            Ok(unpacked) => unpacked,
            Err(fault) => {
                self.recover(fault)?;
                return Ok(false);
            }
        };

        self.input.consume(self.pending);
        self.pending = 0;
        self.stop_position = self.input.position();
        if let Err(e) = unpacked {
            self.state = State::SeekMarker;
            return Err(e);
        }

        self.failures = 0;
        self.state = State::Done;
        Ok(true)
    }

    fn seek_frame(&mut self) -> Result<bool> {
        if !self.input.seek_marker(&self.separator, self.refill_limit)? {
            return Ok(false);
        }
        if self.separator[..] != SOI {
            // Custom boundary: the image follows it
            self.input.consume(self.separator.len());
            return Ok(self.input.seek_marker(&SOI, self.refill_limit)?);
        }
        Ok(true)
    }

    fn parse_header(&mut self) -> std::result::Result<(JpegSegments, ImageHeader), DecodeFault> {
        let segments = segment::walk_frame(&mut self.input)?;
        let jpeg = &self.input.available()[..segments.len];
        let header = self.decompressor.read_header(jpeg)?;
        Ok((segments, header))
    }

    fn accept_header(&mut self, segments: JpegSegments, header: ImageHeader) -> Result<FrameHeader> {
        let geometry = Geometry {
            width: header.width,
            height: header.height,
            channels: self.pixel_type.channels(),
        };

        match self.geometry {
            None => {
                tracing::debug!(
                    width = geometry.width,
                    height = geometry.height,
                    channels = geometry.channels,
                    "fixed mjpeg output geometry"
                );
                self.geometry = Some(geometry);
            }
            Some(fixed) if fixed != geometry => {
                tracing::warn!(
                    got = ?geometry,
                    expected = ?fixed,
                    offset = self.start_position,
                    "frame geometry changed"
                );
                self.input.consume(segments.len);
                self.state = State::SeekMarker;
                return Err(Error::format(format!(
                    "frame is {}x{}x{}, expected {}x{}x{}",
                    geometry.width,
                    geometry.height,
                    geometry.channels,
                    fixed.width,
                    fixed.height,
                    fixed.channels
                )));
            }
            Some(_) => {}
        }

        self.timestamp = segments.timestamp();
        if let Some(camera) = segments.camera() {
            self.camera = Some(camera);
        }
        self.pending = segments.len;
        self.state = State::Data;

        Ok(FrameHeader {
            geometry,
            timestamp: self.timestamp,
            start_position: self.start_position,
        })
    }

    /// Classify a fault: end of stream, another attempt, or fatal.
    fn recover(&mut self, fault: DecodeFault) -> Result<()> {
        self.pending = 0;
        if fault.is_eof_like() {
            tracing::debug!(%fault, offset = self.start_position, "mjpeg stream ended");
            self.state = State::Done;
            return Err(Error::Eof);
        }

        self.failures += 1;
        // Resynchronize one byte past the damaged frame's marker
        self.input.consume(1);
        if self.failures > self.retry_budget {
            tracing::warn!(
                failures = self.failures,
                %fault,
                offset = self.start_position,
                "mjpeg retry budget exhausted"
            );
            self.state = State::Fatal;
            return Err(Error::format(format!(
                "corrupt frame at offset {} after {} attempts: {fault}",
                self.start_position, self.failures
            )));
        }

        tracing::debug!(
            attempt = self.failures,
            %fault,
            offset = self.start_position,
            "skipping damaged mjpeg frame"
        );
        self.state = State::Retry;
        Ok(())
    }
}

impl<R: Read + Seek, D: JpegDecompressor> MjpegSource<R, D> {
    /// Reposition the stream at `offset`, dropping buffered input and any
    /// pending frame. Typically `offset` is a previous frame's
    /// [`FrameHeader::start_position`].
    pub fn seek(&mut self, offset: u64) -> Result<()> {
        self.input
            .seek(offset)
            .map_err(|e| Error::fail(format!("seek to {offset} failed: {e}")))?;
        self.pending = 0;
        self.state = State::SeekMarker;
        Ok(())
    }
}

/// Read the first frame header of a JPEG or MJPEG file.
pub fn jpeg_info<P: AsRef<Path>>(path: P) -> Result<JpegInfo> {
    let mut source = MjpegSource::open(path, PixelType::Gray, Layout::Planar)?;
    let header = source.read_next_header()?;
    Ok(JpegInfo {
        width: header.geometry.width,
        height: header.geometry.height,
        timestamp: header.timestamp,
        camera: source.camera,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decompress::{
        ComponentInfo, DecodedImage, FaultKind, RawComponent, RawImage, DCT_SIZE,
    };
    use assert_matches::assert_matches;
    use std::io::Cursor;

    /// Decompressor that trusts the segment walker for headers and fabricates
    /// pixel data from the declared sampling factors.
    struct Synthetic {
        fail_decode: bool,
    }

    impl JpegDecompressor for Synthetic {
        fn name(&self) -> &'static str {
            "synthetic"
        }

        fn read_header(&mut self, jpeg: &[u8]) -> std::result::Result<ImageHeader, DecodeFault> {
            segment::frame_header(jpeg)
        }

        fn decode(
            &mut self,
            jpeg: &[u8],
            color: OutputColor,
        ) -> std::result::Result<DecodedImage, DecodeFault> {
            if self.fail_decode {
                return Err(DecodeFault::format("bad entropy data"));
            }
            let h = segment::frame_header(jpeg)?;
            let channels = color.channels();
            let data = (0..h.width * h.height)
                .flat_map(|i| (0..channels).map(move |c| (i as usize * channels + c) as u8))
                .collect();
            Ok(DecodedImage {
                width: h.width,
                height: h.height,
                channels,
                data,
            })
        }

        fn decode_raw(&mut self, jpeg: &[u8]) -> std::result::Result<RawImage, DecodeFault> {
            let h = segment::frame_header(jpeg)?;
            let max_h = h.components.iter().map(|c| c.h_samp).max().unwrap();
            let max_v = h.components.iter().map(|c| c.v_samp).max().unwrap();
            let components = h
                .components
                .iter()
                .enumerate()
                .map(|(i, c)| {
                    let w = (h.width as usize * c.h_samp as usize).div_ceil(max_h as usize);
                    let rows = (h.height as usize * c.v_samp as usize).div_ceil(max_v as usize);
                    let wib = w.div_ceil(DCT_SIZE);
                    let hib = rows.div_ceil(DCT_SIZE);
                    RawComponent {
                        h_samp: c.h_samp,
                        v_samp: c.v_samp,
                        width_in_blocks: wib,
                        height_in_blocks: hib,
                        samples: vec![i as u8 + 1; wib * hib * DCT_SIZE * DCT_SIZE],
                    }
                })
                .collect();
            Ok(RawImage {
                width: h.width,
                height: h.height,
                components,
            })
        }
    }

    /// A structurally valid frame with the given sampling factors.
    fn frame(width: u16, height: u16, sampling: &[(u8, u8)]) -> Vec<u8> {
        let mut j = SOI.to_vec();
        let len = 8 + 3 * sampling.len() as u16;
        j.extend_from_slice(&[0xFF, 0xC0]);
        j.extend_from_slice(&len.to_be_bytes());
        j.push(8);
        j.extend_from_slice(&height.to_be_bytes());
        j.extend_from_slice(&width.to_be_bytes());
        j.push(sampling.len() as u8);
        for (i, (h, v)) in sampling.iter().enumerate() {
            j.extend_from_slice(&[i as u8 + 1, h << 4 | v, 0]);
        }
        j.extend_from_slice(&[0xFF, 0xDA, 0x00, 0x02, 0x42, 0x42, 0xFF, 0xD9]);
        j
    }

    const YUV420: &[(u8, u8)] = &[(2, 2), (1, 1), (1, 1)];
    const YUV422: &[(u8, u8)] = &[(2, 1), (1, 1), (1, 1)];

    fn source(
        data: Vec<u8>,
        pixel_type: PixelType,
        layout: Layout,
    ) -> MjpegSource<Cursor<Vec<u8>>, Synthetic> {
        MjpegSource::with_decompressor(
            Cursor::new(data),
            Synthetic { fail_decode: false },
            pixel_type,
            layout,
            &MjpegConfig::default(),
        )
        .unwrap()
    }

    #[test]
    fn test_planar_rgb_is_illegal() {
        for pixel_type in [PixelType::Rgb, PixelType::Bgr] {
            let result = MjpegSource::with_decompressor(
                Cursor::new(Vec::new()),
                Synthetic { fail_decode: false },
                pixel_type,
                Layout::Planar,
                &MjpegConfig::default(),
            );
            assert_matches!(result.err(), Some(Error::IllegalArgument(_)));
        }
    }

    #[test]
    fn test_planar_420_plane_sizes() {
        let mut src = source(frame(16, 16, YUV420), PixelType::YCbCr, Layout::Planar);
        src.read_next_header().unwrap();
        let pixels = src.read_next_data().unwrap();
        assert_eq!(pixels.len(), 256 + 64 + 64);
        assert!(pixels[..256].iter().all(|&v| v == 1));
        assert!(pixels[256..320].iter().all(|&v| v == 2));
        assert!(pixels[320..].iter().all(|&v| v == 3));
    }

    #[test]
    fn test_planar_422_plane_sizes() {
        let mut src = source(frame(16, 16, YUV422), PixelType::YCbCr, Layout::Planar);
        src.read_next_header().unwrap();
        assert_eq!(src.read_next_data().unwrap().len(), 256 + 128 + 128);
    }

    #[test]
    fn test_planar_gray_keeps_luma_only() {
        let mut src = source(frame(16, 16, YUV420), PixelType::Gray, Layout::Planar);
        src.read_next_header().unwrap();
        assert_eq!(src.read_next_data().unwrap().len(), 256);

        let mut src = source(frame(16, 8, &[(1, 1)]), PixelType::Gray, Layout::Planar);
        src.read_next_header().unwrap();
        assert_eq!(src.read_next_data().unwrap().len(), 128);
    }

    #[test]
    fn test_planar_unsupported_sampling() {
        for sampling in [&[(1, 1), (1, 1), (1, 1)][..], &[(1, 1)][..], &[(2, 2), (1, 2), (1, 1)][..]] {
            let mut src = source(frame(16, 16, sampling), PixelType::YCbCr, Layout::Planar);
            src.read_next_header().unwrap();
            assert_matches!(src.read_next_data(), Err(Error::FileFormat(_)));
        }
    }

    #[test]
    fn test_interleaved_geometry() {
        let mut src = source(frame(4, 2, YUV420), PixelType::Rgb, Layout::Interleaved);
        let header = src.read_next_header().unwrap();
        assert_eq!(
            header.geometry,
            Geometry { width: 4, height: 2, channels: 3 }
        );
        assert_eq!(src.state(), State::Data);
        assert_eq!(src.read_next_data().unwrap().len(), 24);
        assert_eq!(src.state(), State::Done);
    }

    #[test]
    fn test_bgr_swaps_channels() {
        let mut src = source(frame(2, 1, YUV420), PixelType::Bgr, Layout::Interleaved);
        src.read_next_header().unwrap();
        assert_eq!(src.read_next_data().unwrap(), &[2, 1, 0, 5, 4, 3]);
    }

    #[test]
    fn test_geometry_mismatch_is_format_error() {
        let mut data = frame(16, 16, YUV420);
        data.extend(frame(32, 16, YUV420));
        data.extend(frame(16, 16, YUV420));
        let mut src = source(data, PixelType::Gray, Layout::Interleaved);

        src.read_next_header().unwrap();
        src.read_next_data().unwrap();
        assert_matches!(src.read_next_header(), Err(Error::FileFormat(_)));
        // The odd frame is skipped, the stream continues
        let header = src.read_next_header().unwrap();
        assert_eq!(header.geometry.width, 16);
    }

    #[test]
    fn test_data_without_header_is_illegal() {
        let mut src = source(frame(16, 16, YUV420), PixelType::Gray, Layout::Interleaved);
        assert_matches!(src.read_next_data(), Err(Error::IllegalArgument(_)));
    }

    #[test]
    fn test_skipped_data_is_dropped() {
        let mut data = frame(8, 8, YUV420);
        let second = data.len() as u64;
        data.extend(frame(8, 8, YUV420));
        let mut src = source(data, PixelType::Gray, Layout::Interleaved);
        src.read_next_header().unwrap();
        let header = src.read_next_header().unwrap();
        assert_eq!(header.start_position, second);
    }

    #[test]
    fn test_decode_fault_consumes_retry() {
        let mut src = MjpegSource::with_decompressor(
            Cursor::new(frame(8, 8, YUV420)),
            Synthetic { fail_decode: true },
            PixelType::Rgb,
            Layout::Interleaved,
            &MjpegConfig::default(),
        )
        .unwrap();
        src.read_next_header().unwrap();
        // The only frame is skipped, so the retry runs into the stream end
        assert_matches!(src.read_next_data(), Err(Error::Eof));
        assert_eq!(src.failures(), 1);
        assert_eq!(src.state(), State::Done);
    }

    #[test]
    fn test_decode_faults_exhaust_budget() {
        let mut data = Vec::new();
        for _ in 0..5 {
            data.extend(frame(8, 8, YUV420));
        }
        let mut src = MjpegSource::with_decompressor(
            Cursor::new(data),
            Synthetic { fail_decode: true },
            PixelType::Gray,
            Layout::Interleaved,
            &MjpegConfig::default(),
        )
        .unwrap();
        assert_matches!(src.next_frame(), Err(Error::FileFormat(_)));
        assert_eq!(src.failures(), 4);
        assert_eq!(src.state(), State::Fatal);
    }

    #[test]
    fn test_end_of_input_fault() {
        let fault = DecodeFault::new(FaultKind::EndOfInput, "eof");
        let mut src = source(Vec::new(), PixelType::Gray, Layout::Interleaved);
        assert_matches!(src.recover(fault), Err(Error::Eof));
        assert_eq!(src.failures(), 0);
        assert_eq!(src.state(), State::Done);
    }

    #[test]
    fn test_component_info_from_frame() {
        let header = segment::frame_header(&frame(16, 16, YUV422)).unwrap();
        assert_eq!(
            header.components[0],
            ComponentInfo { id: 1, h_samp: 2, v_samp: 1 }
        );
    }
}
