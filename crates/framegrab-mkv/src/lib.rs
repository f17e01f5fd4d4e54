//! # framegrab-mkv
//!
//! Frame-level Matroska demuxer for single-track camera recordings.
//!
//! The file is memory-mapped and walked element by element; every
//! SimpleBlock of track 1 is yielded as a [`Frame`] borrowing its payload
//! from the mapping. Frames from some network cameras carry a vendor SEI
//! block with the camera MAC address and a coarse wall-clock sample; those
//! samples are averaged into a clock offset that turns each presentation
//! time into an estimated system time.
//!
//! ## Example
//!
//! ```no_run
//! use framegrab_mkv::MkvSource;
//!
//! let mut src = MkvSource::open("recording.mkv")?;
//! let offset = src.estimate_offset()?;
//! println!("camera clock offset: {offset} us");
//!
//! while let Some(frame) = src.next_frame()? {
//!     println!("{} {} {} bytes", frame.pts, frame.systime, frame.data.len());
//! }
//! # Ok::<(), framegrab_core::Error>(())
//! ```

pub mod clock;
pub mod demuxer;
pub mod ebml;
pub mod elements;
pub mod fixtures;
pub mod vendor;

pub use clock::ClockEstimator;
pub use demuxer::{Frame, MkvSource, DEFAULT_TIME_SCALE};
pub use vendor::{ClockSample, MacAddress, VendorReport};
