//! Matroska frame demuxer.
//!
//! A single loop walks the EBML element tree of a memory-mapped file. Master
//! elements are entered, the handful of leaves that matter update the running
//! parse state, and every SimpleBlock becomes a [`Frame`] that borrows its
//! payload straight out of the mapping.
//!
//! When read from the start of the file the track fields (codec private data,
//! codec id, pixel size) are filled from the Tracks element before the first
//! cluster. The timing fields (`time_scale`, `time_offset`, `cluster_offset`)
//! are overwritten as each new cluster is entered and never reset otherwise.

use std::fs::File;
use std::ops::Range;
use std::path::Path;

use framegrab_core::{Error, Result};
use memmap2::Mmap;

use crate::clock::ClockEstimator;
use crate::ebml::EbmlReader;
use crate::elements::{self, TRACK_ONE};
use crate::vendor::{self, MacAddress};

/// Matroska default for `TimecodeScale` (1 ms ticks).
pub const DEFAULT_TIME_SCALE: u64 = 1_000_000;

/// Size of the SimpleBlock header: track VINT, relative timecode, flags.
const BLOCK_HEADER_LEN: usize = 4;

/// One encoded frame, borrowed from the source's buffer.
///
/// The borrow ends at the next mutating call on the [`MkvSource`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Frame<'a> {
    /// Presentation time in microseconds.
    pub pts: u64,
    /// Estimated camera wall-clock time in microseconds, 0 if unknown.
    pub systime: u64,
    /// Compressed access unit.
    pub data: &'a [u8],
    /// Byte offset of the cluster containing this frame.
    pub offset: usize,
    pub key_frame: bool,
}

/// Per-cluster timing state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Timing {
    time_scale: u64,
    time_offset: u64,
    cluster_offset: usize,
}

impl Default for Timing {
    fn default() -> Self {
        Self {
            time_scale: DEFAULT_TIME_SCALE,
            time_offset: 0,
            cluster_offset: 0,
        }
    }
}

/// Video track description collected from the Tracks element.
#[derive(Debug, Clone, Default)]
struct TrackState {
    number: Option<u64>,
    track_type: Option<u64>,
    codec_id: Option<String>,
    codec_private: Option<Range<usize>>,
    width: u64,
    height: u64,
}

/// Position-independent description of a frame found by the scan loop.
#[derive(Debug, Clone)]
struct FrameSlot {
    pts: u64,
    systime: u64,
    payload: Range<usize>,
    offset: usize,
    key_frame: bool,
}

/// A Matroska source over a byte buffer, normally a read-only file mapping.
pub struct MkvSource<B = Mmap> {
    data: B,
    pos: usize,
    timing: Timing,
    track: TrackState,
    mac: Option<MacAddress>,
    clock: ClockEstimator,
}

impl MkvSource<Mmap> {
    /// Map `path` read-only and position the cursor at its first byte.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|e| Error::from_open(path, e))?;
        // SAFETY: the mapping is read-only and owned by the source; frames
        // borrow from it and cannot outlive it.
        let map = unsafe { Mmap::map(&file)? };
        tracing::debug!(path = %path.display(), len = map.len(), "opened mkv source");
        Ok(Self::from_bytes(map))
    }
}

impl<B: AsRef<[u8]>> MkvSource<B> {
    /// Wrap an in-memory buffer.
    pub fn from_bytes(data: B) -> Self {
        Self {
            data,
            pos: 0,
            timing: Timing::default(),
            track: TrackState::default(),
            mac: None,
            clock: ClockEstimator::new(),
        }
    }

    /// Total length of the underlying buffer.
    pub fn len(&self) -> usize {
        self.data.as_ref().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Current cursor byte offset.
    pub fn position(&self) -> usize {
        self.pos
    }

    /// Nanoseconds per scaled timecode tick.
    pub fn time_scale(&self) -> u64 {
        self.timing.time_scale
    }

    /// Byte offset of the most recently entered cluster.
    pub fn cluster_offset(&self) -> usize {
        self.timing.cluster_offset
    }

    /// Decoder initialization data from the track's CodecPrivate element.
    pub fn codec_private(&self) -> Option<&[u8]> {
        let range = self.track.codec_private.clone()?;
        self.data.as_ref().get(range)
    }

    pub fn codec_id(&self) -> Option<&str> {
        self.track.codec_id.as_deref()
    }

    /// Whether the track stores MJPEG frames in VfW compatibility mode.
    pub fn is_mjpeg(&self) -> bool {
        self.codec_id() == Some(elements::CODEC_VFW)
    }

    pub fn width(&self) -> u64 {
        self.track.width
    }

    pub fn height(&self) -> u64 {
        self.track.height
    }

    pub fn track_number(&self) -> Option<u64> {
        self.track.number
    }

    pub fn track_type(&self) -> Option<u64> {
        self.track.track_type
    }

    /// Camera MAC address from the last vendor block that carried one.
    pub fn mac(&self) -> Option<MacAddress> {
        self.mac
    }

    /// Vendor clock statistics.
    pub fn clock(&self) -> &ClockEstimator {
        &self.clock
    }

    /// The active camera clock offset in microseconds.
    pub fn systime_offset(&self) -> Option<i64> {
        self.clock.average()
    }

    /// Install a previously estimated clock offset.
    pub fn set_systime_offset(&mut self, offset: Option<i64>) {
        self.clock.set_average(offset);
    }

    /// Move the cursor to `offset`, typically a cluster offset from a [`Frame`].
    pub fn seek(&mut self, offset: usize) -> Result<()> {
        if offset >= self.len() {
            return Err(Error::fail(format!(
                "seek to {offset} outside of {} byte source",
                self.len()
            )));
        }
        self.pos = offset;
        Ok(())
    }

    /// Read the next frame, or `None` at the end of the buffer.
    pub fn next_frame(&mut self) -> Result<Option<Frame<'_>>> {
        let Some(slot) = self.advance()? else {
            return Ok(None);
        };
        Ok(Some(Frame {
            pts: slot.pts,
            systime: slot.systime,
            data: &self.data.as_ref()[slot.payload],
            offset: slot.offset,
            key_frame: slot.key_frame,
        }))
    }

    /// Scan every remaining frame to fix the camera clock offset.
    ///
    /// The cursor and cluster timing state are restored afterwards, so
    /// iteration resumes where it was. Returns the offset in microseconds,
    /// 0 if no vendor clock samples were found.
    pub fn estimate_offset(&mut self) -> Result<i64> {
        let saved_pos = self.pos;
        let saved_timing = self.timing;

        let scanned = loop {
            match self.advance() {
                Ok(Some(_)) => continue,
                Ok(None) => break Ok(()),
                Err(e) => break Err(e),
            }
        };

        self.pos = saved_pos;
        self.timing = saved_timing;
        scanned?;

        let offset = self.clock.resolve();
        tracing::debug!(
            samples = self.clock.samples(),
            offset,
            "estimated camera clock offset"
        );
        Ok(offset)
    }

    /// Walk elements until the next usable SimpleBlock.
    fn advance(&mut self) -> Result<Option<FrameSlot>> {
        while self.pos < self.len() {
            let data = self.data.as_ref();
            let mut r = EbmlReader::new(data, self.pos);
            let element_offset = self.pos;
            let id = r.read_id();
            let size = r.read_size();

            match id {
                elements::CLUSTER => {
                    self.timing.cluster_offset = element_offset;
                }
                id if elements::is_descended(id) => {}
                elements::TIMECODE_SCALE => {
                    if let Some(v) = r.read_uint(size) {
                        self.timing.time_scale = v;
                    }
                }
                elements::TIMECODE => {
                    if let Some(v) = r.read_uint(size) {
                        self.timing.time_offset = v;
                    }
                }
                elements::SIMPLE_BLOCK => {
                    let block = r.take(size);
                    self.pos = r.position();
                    if let Some(block) = block {
                        if let Some(slot) = self.read_simple_block(block)? {
                            return Ok(Some(slot));
                        }
                    }
                    continue;
                }
                elements::CODEC_STATE => {
                    return Err(Error::unsupported(format!(
                        "CodecState element at offset {element_offset}"
                    )));
                }
                elements::CODEC_PRIVATE => {
                    if let Some(range) = r.take(size) {
                        self.track.codec_private = Some(range);
                    }
                }
                elements::CODEC_ID => {
                    if let Some(range) = r.take(size) {
                        let id = String::from_utf8_lossy(&data[range]);
                        self.track.codec_id = Some(id.trim_end_matches('\0').to_string());
                    }
                }
                elements::TRACK_NUMBER => {
                    if let Some(v) = r.read_uint(size) {
                        self.track.number = Some(v);
                    }
                }
                elements::TRACK_TYPE => {
                    if let Some(v) = r.read_uint(size) {
                        self.track.track_type = Some(v);
                    }
                }
                elements::PIXEL_WIDTH => {
                    if let Some(v) = r.read_uint(size) {
                        self.track.width = v;
                    }
                }
                elements::PIXEL_HEIGHT => {
                    if let Some(v) = r.read_uint(size) {
                        self.track.height = v;
                    }
                }
                _ => r.skip(size),
            }

            self.pos = r.position();
        }

        Ok(None)
    }

    /// Parse one SimpleBlock occupying `block` in the buffer.
    ///
    /// Returns `None` for blocks that must not be yielded: too short to
    /// carry a header, or carrying damaged vendor metadata.
    fn read_simple_block(&mut self, block: Range<usize>) -> Result<Option<FrameSlot>> {
        let data = self.data.as_ref();
        let header = &data[block.clone()];
        if header.len() < BLOCK_HEADER_LEN {
            tracing::trace!(offset = block.start, "SimpleBlock shorter than its header");
            return Ok(None);
        }
        if header[0] != TRACK_ONE {
            return Err(Error::format(format!(
                "SimpleBlock for track vint {:#04x} at offset {}; only track 1 is supported",
                header[0], block.start
            )));
        }

        let relative = i16::from_be_bytes([header[1], header[2]]);
        let pts = scaled_pts(self.timing.time_offset, relative, self.timing.time_scale);
        let systime = self.clock.systime_for(pts);
        let key_frame = header[3] & 0x80 != 0;
        let payload = block.start + BLOCK_HEADER_LEN..block.end;

        let report = vendor::inspect(&data[payload.clone()]);
        if let Some(mac) = report.mac {
            self.mac = Some(mac);
        }
        if let Some(vendor_systime) = report.clock.systime() {
            self.clock.record(vendor_systime, pts);
        }
        if report.is_damaged() {
            return Ok(None);
        }

        Ok(Some(FrameSlot {
            pts,
            systime,
            payload,
            offset: self.timing.cluster_offset,
            key_frame,
        }))
    }
}

/// `(cluster timecode + relative timecode) * time_scale / 1000`, i.e. the
/// scaled nanosecond tick count converted to microseconds.
pub fn scaled_pts(time_offset: u64, relative: i16, time_scale: u64) -> u64 {
    let ticks = i128::from(time_offset) + i128::from(relative);
    (ticks * i128::from(time_scale) / 1000).clamp(0, u64::MAX.into()) as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::{simple_block, MkvBuilder};
    use assert_matches::assert_matches;

    #[test]
    fn test_scaled_pts() {
        assert_eq!(scaled_pts(40, 5, 1_000_000), 45_000);
        assert_eq!(scaled_pts(0, -5, 1_000_000), 0);
        assert_eq!(scaled_pts(1, -1, 1_000_000), 0);
        assert_eq!(scaled_pts(3, 0, 500), 1);
    }

    #[test]
    fn test_empty_source() {
        let mut src = MkvSource::from_bytes(Vec::new());
        assert!(src.is_empty());
        assert!(src.next_frame().unwrap().is_none());
        assert_matches!(src.seek(0), Err(Error::Fail(_)));
    }

    #[test]
    fn test_track_fields() {
        let bytes = MkvBuilder::new()
            .codec(elements::CODEC_H264, &[0x01, 0x64, 0x00, 0x1F])
            .dimensions(640, 480)
            .cluster(0, vec![simple_block(0, true, &[0xAB; 8])])
            .build();
        let mut src = MkvSource::from_bytes(bytes);
        let frame = src.next_frame().unwrap().unwrap();
        assert_eq!(frame.data, &[0xAB; 8]);
        assert!(frame.key_frame);
        assert_eq!(src.codec_id(), Some(elements::CODEC_H264));
        assert_eq!(src.codec_private(), Some(&[0x01, 0x64, 0x00, 0x1F][..]));
        assert_eq!((src.width(), src.height()), (640, 480));
        assert_eq!(src.track_number(), Some(1));
        assert_eq!(src.track_type(), Some(elements::TRACK_TYPE_VIDEO));
        assert!(!src.is_mjpeg());
    }

    #[test]
    fn test_wrong_track_is_format_error() {
        let mut block = simple_block(0, false, &[1, 2, 3]);
        // [id, size, track vint, ...]
        block[2] = 0x82;
        let bytes = MkvBuilder::new().cluster(0, vec![block]).build();
        let mut src = MkvSource::from_bytes(bytes);
        assert_matches!(src.next_frame(), Err(Error::FileFormat(_)));
    }

    #[test]
    fn test_codec_state_is_unsupported() {
        let mut bytes = MkvBuilder::new().build();
        bytes.extend_from_slice(&[0xA4, 0x81, 0x00]);
        let mut src = MkvSource::from_bytes(bytes);
        assert_matches!(src.next_frame(), Err(Error::Unsupported(_)));
    }

    #[test]
    fn test_truncated_block_ends_stream() {
        let mut bytes = MkvBuilder::new()
            .cluster(0, vec![simple_block(0, true, &[1, 2, 3, 4])])
            .build();
        // Cut the last payload byte: the block now overruns the buffer
        bytes.pop();
        let mut src = MkvSource::from_bytes(bytes);
        assert!(src.next_frame().unwrap().is_none());
        assert_eq!(src.position(), src.len());
    }

    #[test]
    fn test_short_block_is_skipped() {
        let bytes = MkvBuilder::new()
            .cluster(
                0,
                vec![
                    crate::fixtures::element(elements::SIMPLE_BLOCK, &[0x81, 0x00]),
                    simple_block(1, false, &[9]),
                ],
            )
            .build();
        let mut src = MkvSource::from_bytes(bytes);
        let frame = src.next_frame().unwrap().unwrap();
        assert_eq!(frame.pts, 1_000);
        assert_eq!(frame.data, &[9]);
    }

    #[test]
    fn test_unknown_elements_are_skipped() {
        let mut bytes = crate::fixtures::element(0x4286, &[0x01]);
        bytes.extend(
            MkvBuilder::new()
                .cluster(7, vec![simple_block(0, true, &[5])])
                .build(),
        );
        let mut src = MkvSource::from_bytes(bytes);
        assert_eq!(src.next_frame().unwrap().unwrap().pts, 7_000);
    }

    #[test]
    fn test_seek_out_of_range() {
        let bytes = MkvBuilder::new().build();
        let len = bytes.len();
        let mut src = MkvSource::from_bytes(bytes);
        assert!(src.seek(len - 1).is_ok());
        assert_matches!(src.seek(len), Err(Error::Fail(_)));
    }

    #[test]
    fn test_open_missing_file() {
        let err = MkvSource::open("/definitely/not/here.mkv").err().unwrap();
        assert_matches!(err, Error::FileNotFound(_));
    }
}
