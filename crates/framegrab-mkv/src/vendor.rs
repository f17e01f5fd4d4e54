//! Vendor metadata embedded in camera SimpleBlocks.
//!
//! Some network cameras prepend an H.264 SEI message to their frames that
//! carries the camera MAC address and a sample of the camera system clock
//! (1/100 s resolution). Layout after the 4-byte NAL length prefix:
//!
//! ```text
//! 06 05 <len>                      SEI, user data unregistered
//! AA * 16                          marker
//! [00 0D 0A 00 <5 bytes> <6 MAC>]  optional MAC record
//! 00 0D 0A 01 <u32 BE secs> <u8>   clock record, then >= 8 trailer bytes
//! ```

use std::fmt;

/// SEI NAL type + payload type that introduce the vendor block.
pub const SIGNATURE: [u8; 2] = [0x06, 0x05];
/// Marker preceding the vendor records.
pub const MARKER: [u8; 16] = [0xAA; 16];
/// Tag of the MAC address record.
pub const MAC_TAG: [u8; 4] = [0x00, 0x0D, 0x0A, 0x00];
/// Tag of the clock record.
pub const TIME_TAG: [u8; 4] = [0x00, 0x0D, 0x0A, 0x01];

const SUB_HEADER_LEN: usize = 4;
const MAC_RESERVED_LEN: usize = 5;
const MAC_LEN: usize = 6;
/// Seconds plus hundredths.
const CLOCK_LEN: usize = 5;
/// Bytes that must follow the clock tag for the block to be yielded.
const MIN_CLOCK_TAIL: usize = 13;

/// Camera MAC address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MacAddress(pub [u8; MAC_LEN]);

impl MacAddress {
    /// Twelve upper-case hex digits, no separators.
    pub fn to_hex(&self) -> String {
        hex::encode_upper(self.0)
    }
}

impl fmt::Display for MacAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

/// Outcome of looking for the clock record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ClockSample {
    /// No vendor clock record in this block.
    #[default]
    Absent,
    /// Camera system time in microseconds.
    Valid(u64),
    /// A clock tag was found but the record or its trailer is cut short.
    /// Holds the time when all of its bytes made it.
    Truncated(Option<u64>),
}

impl ClockSample {
    /// Camera system time in microseconds, if the record carried one.
    pub fn systime(self) -> Option<u64> {
        match self {
            Self::Valid(systime) | Self::Truncated(Some(systime)) => Some(systime),
            Self::Truncated(None) | Self::Absent => None,
        }
    }
}

/// Everything the extractor found in one block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct VendorReport {
    pub mac: Option<MacAddress>,
    pub clock: ClockSample,
}

impl VendorReport {
    /// Whether the block should be withheld from callers.
    pub fn is_damaged(&self) -> bool {
        matches!(self.clock, ClockSample::Truncated(_))
    }
}

/// Inspect a SimpleBlock frame payload for vendor metadata.
pub fn inspect(payload: &[u8]) -> VendorReport {
    let mut report = VendorReport::default();

    let Some(body) = payload.get(SUB_HEADER_LEN..) else {
        return report;
    };
    if body.len() <= SIGNATURE.len() + 1 || body[..SIGNATURE.len()] != SIGNATURE {
        return report;
    }

    // Signature plus the SEI payload size byte
    let mut pos = SIGNATURE.len() + 1;
    let Some(found) = body[pos..].windows(MARKER.len()).position(|w| w == MARKER) else {
        return report;
    };
    pos += found + MARKER.len();

    if body[pos..].starts_with(&MAC_TAG) {
        pos += MAC_TAG.len();
        let mac_start = pos + MAC_RESERVED_LEN;
        if let Some(bytes) = body.get(mac_start..mac_start + MAC_LEN) {
            let mut mac = [0u8; MAC_LEN];
            mac.copy_from_slice(bytes);
            report.mac = Some(MacAddress(mac));
        }
        pos = (mac_start + MAC_LEN).min(body.len());
    }

    if !body[pos..].starts_with(&TIME_TAG) {
        return report;
    }
    pos += TIME_TAG.len();

    let tail = &body[pos..];
    let systime = tail.get(..CLOCK_LEN).map(|t| {
        let seconds = u32::from_be_bytes([t[0], t[1], t[2], t[3]]);
        u64::from(seconds) * 1_000_000 + u64::from(t[4]) * 10_000
    });
    tracing::trace!(?systime, "vendor clock sample");

    report.clock = match systime {
        Some(systime) if tail.len() >= MIN_CLOCK_TAIL => ClockSample::Valid(systime),
        _ => {
            tracing::warn!(
                available = tail.len(),
                "vendor clock record is truncated; block withheld"
            );
            ClockSample::Truncated(systime)
        }
    };
    report
}

#[cfg(test)]
mod tests {
    use super::*;

    fn block(mac: Option<[u8; 6]>, secs: u32, hundredths: u8, trailer: usize) -> Vec<u8> {
        let mut p = vec![0, 0, 0, 0x40];
        p.extend_from_slice(&SIGNATURE);
        p.push(0x3C);
        p.extend_from_slice(&MARKER);
        if let Some(mac) = mac {
            p.extend_from_slice(&MAC_TAG);
            p.extend_from_slice(&[0x01, 0x02, 0x03, 0x04, 0x05]);
            p.extend_from_slice(&mac);
        }
        p.extend_from_slice(&TIME_TAG);
        p.extend_from_slice(&secs.to_be_bytes());
        p.push(hundredths);
        p.extend(std::iter::repeat(0x80).take(trailer));
        p
    }

    #[test]
    fn test_plain_block_has_no_metadata() {
        let report = inspect(&[0, 0, 0, 5, 0x65, 0x88, 0x84, 0x00]);
        assert_eq!(report, VendorReport::default());
        assert!(!report.is_damaged());
    }

    #[test]
    fn test_short_payload() {
        assert_eq!(inspect(&[0, 0]), VendorReport::default());
        assert_eq!(inspect(&[0, 0, 0, 1, 0x06, 0x05]), VendorReport::default());
    }

    #[test]
    fn test_clock_record() {
        let report = inspect(&block(None, 1_445_859_308, 97, 8));
        assert_eq!(report.mac, None);
        assert_eq!(
            report.clock,
            ClockSample::Valid(1_445_859_308 * 1_000_000 + 970_000)
        );
    }

    #[test]
    fn test_mac_and_clock_records() {
        let mac = [0x00, 0x40, 0x8C, 0x0A, 0xBC, 0xDE];
        let report = inspect(&block(Some(mac), 10, 1, 8));
        assert_eq!(report.mac, Some(MacAddress(mac)));
        assert_eq!(report.mac.unwrap().to_hex(), "00408C0ABCDE");
        assert_eq!(report.clock, ClockSample::Valid(10_010_000));
    }

    #[test]
    fn test_truncated_trailer_is_damaged() {
        let report = inspect(&block(None, 10, 0, 7));
        assert_eq!(report.clock, ClockSample::Truncated(Some(10_000_000)));
        assert_eq!(report.clock.systime(), Some(10_000_000));
        assert!(report.is_damaged());
    }

    #[test]
    fn test_truncated_clock_bytes_carry_no_time() {
        let mut p = block(None, 10, 0, 0);
        p.truncate(p.len() - 2);
        let report = inspect(&p);
        assert_eq!(report.clock, ClockSample::Truncated(None));
        assert_eq!(report.clock.systime(), None);
        assert!(report.is_damaged());
    }

    #[test]
    fn test_marker_found_after_padding() {
        let mut p = block(None, 2, 50, 8);
        // Insert filler between the SEI header and the marker
        p.splice(7..7, [0x11, 0x22, 0x33]);
        assert_eq!(inspect(&p).clock, ClockSample::Valid(2_500_000));
    }

    #[test]
    fn test_signature_without_marker() {
        let mut p = vec![0, 0, 0, 9, 0x06, 0x05, 0x10];
        p.extend_from_slice(&[0x55; 20]);
        assert_eq!(inspect(&p), VendorReport::default());
    }

    #[test]
    fn test_mac_display_zero_pads() {
        let mac = MacAddress([0x0A, 0x0B, 0x0C, 0x00, 0x01, 0xFF]);
        assert_eq!(mac.to_string(), "0A0B0C0001FF");
    }
}
