//! Matroska element IDs understood by the demuxer.
//!
//! Only the elements needed to locate the frames of a single video track are
//! listed; everything else is skipped by its declared size.

// =============================================================================
// Top level
// =============================================================================

/// EBML header (skipped).
pub const EBML_HEADER: u64 = 0x1A45_DFA3;
/// Segment (the root container for all Matroska data).
pub const SEGMENT: u64 = 0x1853_8067;

// =============================================================================
// Segment information
// =============================================================================

/// Segment Info.
pub const INFO: u64 = 0x1549_A966;
/// Nanoseconds per scaled timecode tick.
pub const TIMECODE_SCALE: u64 = 0x2A_D7B1;

// =============================================================================
// Clusters
// =============================================================================

/// Cluster.
pub const CLUSTER: u64 = 0x1F43_B675;
/// Cluster base timecode.
pub const TIMECODE: u64 = 0xE7;
/// SimpleBlock.
pub const SIMPLE_BLOCK: u64 = 0xA3;
/// CodecState (not supported).
pub const CODEC_STATE: u64 = 0xA4;

// =============================================================================
// Tracks
// =============================================================================

/// Tracks.
pub const TRACKS: u64 = 0x1654_AE6B;
/// TrackEntry.
pub const TRACK_ENTRY: u64 = 0xAE;
/// TrackNumber.
pub const TRACK_NUMBER: u64 = 0xD7;
/// TrackType.
pub const TRACK_TYPE: u64 = 0x83;
/// CodecPrivate.
pub const CODEC_PRIVATE: u64 = 0x63A2;
/// CodecID.
pub const CODEC_ID: u64 = 0x86;
/// Video settings.
pub const VIDEO: u64 = 0xE0;
/// PixelWidth.
pub const PIXEL_WIDTH: u64 = 0xB0;
/// PixelHeight.
pub const PIXEL_HEIGHT: u64 = 0xBA;

/// Master elements whose children the demuxer walks into.
pub fn is_descended(id: u64) -> bool {
    matches!(id, SEGMENT | INFO | CLUSTER | TRACKS | TRACK_ENTRY | VIDEO)
}

// =============================================================================
// Codec IDs
// =============================================================================

/// H.264 in Matroska.
pub const CODEC_H264: &str = "V_MPEG4/ISO/AVC";
/// Video-for-Windows compatibility mode, used by cameras for MJPEG.
pub const CODEC_VFW: &str = "V_MS/VFW/FOURCC";

/// Track type value for video tracks.
pub const TRACK_TYPE_VIDEO: u64 = 0x01;

/// The only accepted SimpleBlock track number, as its one-byte VINT.
pub const TRACK_ONE: u8 = 0x81;
