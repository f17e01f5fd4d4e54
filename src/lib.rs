//! Framegrab - frame-accurate access to network camera recordings
//!
//! Opens Matroska files (H.264 or MJPEG video, optionally carrying the
//! camera's embedded clock samples) and raw MJPEG streams, indexes their
//! frames and decodes any of them by position.
//!
//! ```no_run
//! use framegrab::Video;
//!
//! let mut video = Video::open("recording.mkv", false)?;
//! println!("{} frames", video.len());
//! let frame = video.frame(video.len() / 2)?;
//! println!("{}x{} at {:.3}", frame.width, frame.height, frame.systime);
//! # Ok::<(), framegrab::Error>(())
//! ```
//!
//! The building blocks live in their own crates and are re-exported here:
//! [`mkv`] and [`mjpeg`] for the demuxers, [`decode`] for the decoders.

pub mod index;
pub mod video;

pub use framegrab_core::{Config, Error, IndexConfig, MjpegConfig, Result, ResultCode};
pub use framegrab_decode as decode;
pub use framegrab_mjpeg as mjpeg;
pub use framegrab_mkv as mkv;

pub use index::{index_path, FrameEntry, MjpegIndex, MkvIndex, INDEX_VERSION};
pub use video::{DecodedFrame, MjpegFrames, MjpegVideo, MkvFrames, MkvVideo, Video};
