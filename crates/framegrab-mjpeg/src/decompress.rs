//! Boundary between the demuxer and the JPEG decompression library.
//!
//! The demuxer never sees library errors directly: every backend reports
//! failures as a [`DecodeFault`], already classified as end-of-stream or as
//! a damaged frame that is worth resynchronizing past.

/// Edge length of a JPEG DCT block.
pub const DCT_SIZE: usize = 8;

/// Why a frame could not be decoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultKind {
    /// The stream ended before the frame did.
    EndOfInput,
    /// The frame header declares a zero-sized image.
    EmptyImage,
    /// The datastream contains no image at all.
    NoImage,
    /// Anything else: bad markers, bad tables, bad entropy data.
    Format,
}

/// A classified decompression failure.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct DecodeFault {
    pub kind: FaultKind,
    pub message: String,
}

impl DecodeFault {
    pub fn new(kind: FaultKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn end_of_input(message: impl Into<String>) -> Self {
        Self::new(FaultKind::EndOfInput, message)
    }

    pub fn format(message: impl Into<String>) -> Self {
        Self::new(FaultKind::Format, message)
    }

    /// Faults that mean the stream is exhausted rather than damaged.
    pub fn is_eof_like(&self) -> bool {
        matches!(
            self.kind,
            FaultKind::EndOfInput | FaultKind::EmptyImage | FaultKind::NoImage
        )
    }
}

/// Sampling factors of one frame component, as declared in the SOF segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ComponentInfo {
    pub id: u8,
    pub h_samp: u8,
    pub v_samp: u8,
}

/// Frame geometry known after the header has been parsed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageHeader {
    pub width: u32,
    pub height: u32,
    pub components: Vec<ComponentInfo>,
}

/// Colour space of interleaved output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputColor {
    Gray,
    YCbCr,
    Rgb,
}

impl OutputColor {
    pub fn channels(self) -> usize {
        match self {
            Self::Gray => 1,
            Self::YCbCr | Self::Rgb => 3,
        }
    }
}

/// Fully upsampled, interleaved pixels.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedImage {
    pub width: u32,
    pub height: u32,
    pub channels: usize,
    pub data: Vec<u8>,
}

/// Samples of one component at native resolution, padded out to whole DCT
/// blocks in both directions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawComponent {
    pub h_samp: u8,
    pub v_samp: u8,
    pub width_in_blocks: usize,
    pub height_in_blocks: usize,
    pub samples: Vec<u8>,
}

impl RawComponent {
    /// Bytes per sample row.
    pub fn stride(&self) -> usize {
        self.width_in_blocks * DCT_SIZE
    }

    /// Number of sample rows.
    pub fn rows(&self) -> usize {
        self.height_in_blocks * DCT_SIZE
    }

    pub fn row(&self, y: usize) -> &[u8] {
        let stride = self.stride();
        &self.samples[y * stride..(y + 1) * stride]
    }
}

/// Per-component, non-upsampled decoder output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawImage {
    pub width: u32,
    pub height: u32,
    pub components: Vec<RawComponent>,
}

/// A JPEG decompression backend.
///
/// Each call receives one complete frame, SOI through EOI.
pub trait JpegDecompressor {
    /// Backend name for diagnostics.
    fn name(&self) -> &'static str;

    /// Parse the frame headers without decoding entropy data.
    fn read_header(&mut self, jpeg: &[u8]) -> Result<ImageHeader, DecodeFault>;

    /// Decode to interleaved pixels in `color`.
    fn decode(&mut self, jpeg: &[u8], color: OutputColor) -> Result<DecodedImage, DecodeFault>;

    /// Decode to per-component samples at their native resolution.
    fn decode_raw(&mut self, jpeg: &[u8]) -> Result<RawImage, DecodeFault>;
}
