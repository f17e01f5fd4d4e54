//! JPEG marker segment walker.
//!
//! Delimits one frame in the input stream (SOI through EOI) without decoding
//! it, collecting the frame header and any comment segments on the way.
//! Camera firmware stores a wall-clock timestamp and a device description in
//! comment segments.

use std::io::Read;

use crate::decompress::{ComponentInfo, DecodeFault, FaultKind, ImageHeader};
use crate::input::InputBuffer;

/// Start-of-image marker.
pub const SOI: [u8; 2] = [0xFF, 0xD8];

const MARKER_SOI: u8 = 0xD8;
const MARKER_EOI: u8 = 0xD9;
const MARKER_SOS: u8 = 0xDA;
const MARKER_COM: u8 = 0xFE;
const MARKER_TEM: u8 = 0x01;

/// Comment payload prefix of the timestamp record.
const COMMENT_TIMESTAMP: [u8; 2] = [0x0A, 0x01];
/// Comment payload prefix of the camera description record.
const COMMENT_CAMERA: [u8; 2] = [0x0A, 0x00];

/// Extent and metadata of one frame at the input cursor.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JpegSegments {
    /// Frame length in bytes, SOI through EOI inclusive.
    pub len: usize,
    pub header: Option<ImageHeader>,
    /// Payloads of all COM segments, in stream order.
    pub comments: Vec<Vec<u8>>,
}

impl JpegSegments {
    /// Timestamp from the last comment that carries one.
    pub fn timestamp(&self) -> Option<Timestamp> {
        self.comments.iter().rev().find_map(|c| Timestamp::from_comment(c))
    }

    /// Camera description from the last comment that carries one.
    pub fn camera(&self) -> Option<CameraInfo> {
        self.comments.iter().rev().find_map(|c| CameraInfo::from_comment(c))
    }
}

/// Exposure time reported by the camera.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Timestamp {
    pub secs: u32,
    pub usecs: u32,
}

impl Timestamp {
    /// Parse `0A 01 <u32 BE seconds> <hundredths>`.
    pub fn from_comment(payload: &[u8]) -> Option<Self> {
        if payload.len() < 7 || payload[..2] != COMMENT_TIMESTAMP {
            return None;
        }
        Some(Self {
            secs: u32::from_be_bytes([payload[2], payload[3], payload[4], payload[5]]),
            usecs: u32::from(payload[6]) * 10_000,
        })
    }

    pub fn as_micros(&self) -> u64 {
        u64::from(self.secs) * 1_000_000 + u64::from(self.usecs)
    }

    pub fn as_secs_f64(&self) -> f64 {
        f64::from(self.secs) + f64::from(self.usecs) / 1_000_000.0
    }
}

/// Device description embedded by the camera.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CameraInfo {
    /// Two-byte hardware id, upper-case hex.
    pub hardware_id: String,
    /// `major.minor.patch`.
    pub firmware_version: String,
    /// Six-byte serial number (the camera MAC), upper-case hex.
    pub serial_number: String,
}

impl CameraInfo {
    /// Parse `0A 00 <hwid:2> <firmware:3> <serial:6>`.
    pub fn from_comment(payload: &[u8]) -> Option<Self> {
        if payload.len() < 13 || payload[..2] != COMMENT_CAMERA {
            return None;
        }
        Some(Self {
            hardware_id: hex::encode_upper(&payload[2..4]),
            firmware_version: format!("{}.{}.{}", payload[4], payload[5], payload[6]),
            serial_number: hex::encode_upper(&payload[7..13]),
        })
    }
}

/// Delimit the frame starting at the input cursor.
///
/// The cursor is not moved; the whole frame is left buffered in
/// `input.available()[..len]`.
pub fn walk_frame<R: Read>(input: &mut InputBuffer<R>) -> Result<JpegSegments, DecodeFault> {
    let mut segments = JpegSegments::default();

    need(input, 2)?;
    if input.available()[..2] != SOI {
        return Err(DecodeFault::format("frame does not start with SOI"));
    }

    let mut o = 2;
    loop {
        need(input, o + 2)?;
        let bytes = input.available();
        if bytes[o] != 0xFF {
            return Err(DecodeFault::format(format!(
                "expected a marker at frame offset {o}, found {:#04x}",
                bytes[o]
            )));
        }
        let marker = bytes[o + 1];
        match marker {
            // Fill byte before a marker
            0xFF => {
                o += 1;
                continue;
            }
            MARKER_EOI => {
                if segments.header.is_none() {
                    return Err(DecodeFault::new(
                        FaultKind::NoImage,
                        "frame ends without a frame header",
                    ));
                }
                segments.len = o + 2;
                return Ok(segments);
            }
            MARKER_SOI => {
                return Err(DecodeFault::format(format!(
                    "unexpected SOI at frame offset {o}"
                )));
            }
            MARKER_TEM | 0xD0..=0xD7 => {
                o += 2;
                continue;
            }
            _ => {}
        }

        need(input, o + 4)?;
        let bytes = input.available();
        let len = usize::from(u16::from_be_bytes([bytes[o + 2], bytes[o + 3]]));
        if len < 2 {
            return Err(DecodeFault::format(format!(
                "segment {marker:#04x} declares length {len}"
            )));
        }
        need(input, o + 2 + len)?;
        let payload = &input.available()[o + 4..o + 2 + len];

        match marker {
            MARKER_COM => segments.comments.push(payload.to_vec()),
            0xC0..=0xCF if !matches!(marker, 0xC4 | 0xC8 | 0xCC) => {
                segments.header = Some(parse_frame_header(payload)?);
            }
            _ => {}
        }
        o += 2 + len;

        if marker == MARKER_SOS {
            o = skip_entropy_data(input, o)?;
        }
    }
}

/// Frame header of an in-memory JPEG image.
pub fn frame_header(jpeg: &[u8]) -> Result<ImageHeader, DecodeFault> {
    let mut input = InputBuffer::new(jpeg, jpeg.len());
    walk_frame(&mut input)?
        .header
        .ok_or_else(|| DecodeFault::new(FaultKind::NoImage, "no frame header"))
}

/// Parse an SOFn payload: precision, height, width, then one
/// `(id, h << 4 | v, table)` triple per component.
fn parse_frame_header(payload: &[u8]) -> Result<ImageHeader, DecodeFault> {
    if payload.len() < 6 {
        return Err(DecodeFault::format("frame header too short"));
    }
    let height = u16::from_be_bytes([payload[1], payload[2]]);
    let width = u16::from_be_bytes([payload[3], payload[4]]);
    let count = usize::from(payload[5]);
    let table = payload
        .get(6..6 + 3 * count)
        .ok_or_else(|| DecodeFault::format("frame header component table truncated"))?;

    if width == 0 || height == 0 {
        return Err(DecodeFault::new(
            FaultKind::EmptyImage,
            format!("empty image {width}x{height}"),
        ));
    }

    let components = table
        .chunks_exact(3)
        .map(|c| ComponentInfo {
            id: c[0],
            h_samp: c[1] >> 4,
            v_samp: c[1] & 0x0F,
        })
        .collect::<Vec<_>>();
    if components.iter().any(|c| c.h_samp == 0 || c.v_samp == 0) {
        return Err(DecodeFault::format("zero sampling factor"));
    }

    Ok(ImageHeader {
        width: u32::from(width),
        height: u32::from(height),
        components,
    })
}

/// Advance past entropy-coded data to the next real marker.
///
/// Stuffed `FF 00` pairs and restart markers belong to the scan.
fn skip_entropy_data<R: Read>(input: &mut InputBuffer<R>, mut o: usize) -> Result<usize, DecodeFault> {
    loop {
        need(input, o + 2)?;
        let bytes = input.available();
        let Some(i) = bytes[o..].iter().position(|&b| b == 0xFF) else {
            o = bytes.len();
            continue;
        };
        o += i;
        need(input, o + 2)?;
        match input.available()[o + 1] {
            0x00 | 0xD0..=0xD7 => o += 2,
            0xFF => o += 1,
            _ => return Ok(o),
        }
    }
}

fn need<R: Read>(input: &mut InputBuffer<R>, n: usize) -> Result<(), DecodeFault> {
    match input.fill_to(n) {
        Ok(true) => Ok(()),
        Ok(false) => Err(DecodeFault::end_of_input("stream ended inside a JPEG frame")),
        Err(e) => {
            tracing::warn!(error = %e, "read failed inside a JPEG frame");
            Err(DecodeFault::end_of_input(format!("read failed: {e}")))
        }
    }
}
