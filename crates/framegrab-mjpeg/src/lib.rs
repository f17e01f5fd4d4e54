//! # framegrab-mjpeg
//!
//! Demuxer for Motion-JPEG streams as recorded by network cameras: a plain
//! concatenation of JPEG images, optionally with boundary strings between
//! them, where each image may carry the camera's wall-clock time in a
//! comment segment.
//!
//! Frames are located by searching for a separator, delimited by walking
//! their marker segments and decoded through a [`JpegDecompressor`] backend
//! (by default [`JpegDecoderBackend`]). Output is either interleaved
//! (gray, YCbCr, RGB, BGR) or planar YCbCr with 4:2:0 or 4:2:2 chroma.
//!
//! ```no_run
//! use framegrab_mjpeg::{Layout, MjpegSource, PixelType};
//!
//! let mut src = MjpegSource::open("camera.mjpg", PixelType::Rgb, Layout::Interleaved)?;
//! while let Some(frame) = src.next_frame()? {
//!     let ts = frame.header.timestamp.map(|t| t.as_secs_f64()).unwrap_or_default();
//!     println!("{ts:.2}: {} bytes", frame.pixels.len());
//! }
//! # Ok::<(), framegrab_core::Error>(())
//! ```

pub mod backend;
pub mod decompress;
pub mod input;
pub mod segment;
pub mod source;
pub mod unpack;

pub use backend::JpegDecoderBackend;
pub use decompress::{DecodeFault, FaultKind, JpegDecompressor};
pub use segment::{CameraInfo, Timestamp};
pub use source::{
    jpeg_info, FrameHeader, Geometry, JpegInfo, Layout, MjpegFrame, MjpegSource, PixelType, State,
};
