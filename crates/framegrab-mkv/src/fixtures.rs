//! Builders for small synthetic Matroska files, used by tests and benches.

use crate::ebml::{encode_id, encode_size};
use crate::elements;
use crate::vendor::{MAC_TAG, MARKER, SIGNATURE, TIME_TAG};

/// Serialize one element: ID, size, body.
///
/// # Panics
///
/// If `body` is too large for an 8-byte EBML size (2^56 - 1 bytes or more).
pub fn element(id: u64, body: &[u8]) -> Vec<u8> {
    let mut out = encode_id(id);
    out.extend(encode_size(body.len() as u64).expect("fixture element too large"));
    out.extend_from_slice(body);
    out
}

/// Serialize an unsigned integer element using the fewest bytes.
pub fn uint_element(id: u64, value: u64) -> Vec<u8> {
    let width = (8 - value.leading_zeros() as usize / 8).max(1);
    element(id, &value.to_be_bytes()[8 - width..])
}

/// A track-1 SimpleBlock element.
pub fn simple_block(relative: i16, key_frame: bool, payload: &[u8]) -> Vec<u8> {
    let mut body = vec![elements::TRACK_ONE];
    body.extend_from_slice(&relative.to_be_bytes());
    body.push(if key_frame { 0x80 } else { 0x00 });
    body.extend_from_slice(payload);
    element(elements::SIMPLE_BLOCK, &body)
}

/// A camera frame payload carrying vendor metadata followed by `picture`.
pub fn vendor_payload(mac: Option<[u8; 6]>, secs: u32, hundredths: u8, picture: &[u8]) -> Vec<u8> {
    let mut p = vec![0x00, 0x00, 0x00, 0x2C];
    p.extend_from_slice(&SIGNATURE);
    p.push(0x28);
    p.extend_from_slice(&MARKER);
    if let Some(mac) = mac {
        p.extend_from_slice(&MAC_TAG);
        p.extend_from_slice(&[0x00; 5]);
        p.extend_from_slice(&mac);
    }
    p.extend_from_slice(&TIME_TAG);
    p.extend_from_slice(&secs.to_be_bytes());
    p.push(hundredths);
    p.extend_from_slice(&[0x80; 8]);
    p.extend_from_slice(picture);
    p
}

/// Assembles an EBML header and a Segment with one video track.
#[derive(Debug, Clone)]
pub struct MkvBuilder {
    time_scale: u64,
    codec_id: String,
    codec_private: Vec<u8>,
    width: u64,
    height: u64,
    clusters: Vec<Vec<u8>>,
}

impl Default for MkvBuilder {
    fn default() -> Self {
        Self {
            time_scale: 1_000_000,
            codec_id: elements::CODEC_H264.to_string(),
            codec_private: Vec::new(),
            width: 320,
            height: 240,
            clusters: Vec::new(),
        }
    }
}

impl MkvBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn time_scale(mut self, time_scale: u64) -> Self {
        self.time_scale = time_scale;
        self
    }

    pub fn codec(mut self, codec_id: &str, codec_private: &[u8]) -> Self {
        self.codec_id = codec_id.to_string();
        self.codec_private = codec_private.to_vec();
        self
    }

    pub fn dimensions(mut self, width: u64, height: u64) -> Self {
        self.width = width;
        self.height = height;
        self
    }

    /// Append a cluster with base `timecode` holding serialized `blocks`.
    pub fn cluster(mut self, timecode: u64, blocks: Vec<Vec<u8>>) -> Self {
        let mut body = uint_element(elements::TIMECODE, timecode);
        for block in blocks {
            body.extend(block);
        }
        self.clusters.push(element(elements::CLUSTER, &body));
        self
    }

    pub fn build(&self) -> Vec<u8> {
        let mut out = element(elements::EBML_HEADER, &uint_element(0x4282, 0x6D));

        let info = element(
            elements::INFO,
            &uint_element(elements::TIMECODE_SCALE, self.time_scale),
        );

        let mut video = uint_element(elements::PIXEL_WIDTH, self.width);
        video.extend(uint_element(elements::PIXEL_HEIGHT, self.height));

        let mut entry = uint_element(elements::TRACK_NUMBER, 1);
        entry.extend(uint_element(elements::TRACK_TYPE, elements::TRACK_TYPE_VIDEO));
        entry.extend(element(elements::CODEC_ID, self.codec_id.as_bytes()));
        if !self.codec_private.is_empty() {
            entry.extend(element(elements::CODEC_PRIVATE, &self.codec_private));
        }
        entry.extend(element(elements::VIDEO, &video));
        let tracks = element(elements::TRACKS, &element(elements::TRACK_ENTRY, &entry));

        let mut segment = info;
        segment.extend(tracks);
        for cluster in &self.clusters {
            segment.extend_from_slice(cluster);
        }
        out.extend(element(elements::SEGMENT, &segment));
        out
    }
}
