//! Persisted frame indexes.
//!
//! Building an index means walking the whole recording once, so the result
//! is cached as JSON next to the video (`<video>.idx`). A cached index is
//! used only when it parses and carries the current [`INDEX_VERSION`];
//! anything else triggers a rebuild.

use std::ffi::OsString;
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use framegrab_core::{Error, IndexConfig, MjpegConfig, Result};
use framegrab_mjpeg::{Layout, MjpegSource, PixelType};
use framegrab_mkv::MkvSource;

/// Bumped whenever the serialized layout changes.
pub const INDEX_VERSION: u32 = 4;

/// Path of the cached index for `video`.
pub fn index_path(video: &Path) -> PathBuf {
    let mut name = OsString::from(video.as_os_str());
    name.push(".idx");
    PathBuf::from(name)
}

/// A serializable index with a format version.
pub trait Versioned: Serialize + DeserializeOwned {
    fn version(&self) -> u32;
}

/// One Matroska frame as seen by the demuxer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameEntry {
    /// Presentation time in microseconds.
    pub pts: u64,
    /// Byte offset of the cluster holding the frame.
    pub offset: usize,
    pub key_frame: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MkvIndex {
    pub version: u32,
    /// Frames ordered by pts.
    pub frames: Vec<FrameEntry>,
    /// Camera clock offset in microseconds, if vendor samples were found.
    pub systime_offset: Option<i64>,
    /// The track holds JPEG images rather than H.264.
    pub mjpeg_mode: bool,
    /// Camera MAC address as twelve hex digits.
    #[serde(default)]
    pub mac: Option<String>,
}

impl Versioned for MkvIndex {
    fn version(&self) -> u32 {
        self.version
    }
}

impl MkvIndex {
    /// Walk every frame of `source` from its first byte.
    ///
    /// Also fixes the source's clock offset; the cursor is left at the end.
    pub fn build<B: AsRef<[u8]>>(source: &mut MkvSource<B>) -> Result<Self> {
        rewind(source)?;
        let offset = source.estimate_offset()?;
        let systime_offset = (source.clock().samples() > 0).then_some(offset);

        let mut frames = Vec::new();
        while let Some(frame) = source.next_frame()? {
            frames.push(FrameEntry {
                pts: frame.pts,
                offset: frame.offset,
                key_frame: frame.key_frame,
            });
        }
        frames.sort_by_key(|f| f.pts);

        tracing::debug!(
            frames = frames.len(),
            key_frames = frames.iter().filter(|f| f.key_frame).count(),
            ?systime_offset,
            "indexed mkv"
        );
        Ok(Self {
            version: INDEX_VERSION,
            frames,
            systime_offset,
            mjpeg_mode: source.is_mjpeg(),
            mac: source.mac().map(|m| m.to_hex()),
        })
    }

    /// Position of the closest key frame at or before `index`, falling back
    /// to the first frame when none precedes it.
    pub fn key_frame_before(&self, index: usize) -> Option<usize> {
        let head = self.frames.get(..=index)?;
        Some(head.iter().rposition(|f| f.key_frame).unwrap_or(0))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MjpegIndex {
    pub version: u32,
    /// Stream offset of every frame's first byte.
    pub offsets: Vec<u64>,
}

impl Versioned for MjpegIndex {
    fn version(&self) -> u32 {
        self.version
    }
}

impl MjpegIndex {
    /// Record the start offset of every frame in `reader`.
    ///
    /// Only headers are parsed. Frames the demuxer rejects are left out and
    /// the scan continues at the next search point.
    pub fn build<R: std::io::Read>(reader: R, config: &MjpegConfig) -> Result<Self> {
        let mut source =
            MjpegSource::from_reader(reader, PixelType::Gray, Layout::Interleaved, config)?;
        let mut offsets = Vec::new();
        let mut rejected = 0usize;
        loop {
            match source.read_next_header() {
                Ok(header) => offsets.push(header.start_position),
                Err(Error::Eof) => break,
                Err(Error::FileFormat(msg)) => {
                    rejected += 1;
                    tracing::warn!(offset = source.start_position(), "skipping frame: {msg}");
                }
                Err(e) => return Err(e),
            }
        }
        tracing::debug!(frames = offsets.len(), rejected, "indexed mjpeg");
        Ok(Self {
            version: INDEX_VERSION,
            offsets,
        })
    }
}

/// Read a cached index, or `None` if it is missing, unreadable or stale.
pub fn load<T: Versioned>(path: &Path) -> Option<T> {
    let content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
        Err(e) => {
            tracing::warn!("Failed to read index {}: {e}", path.display());
            return None;
        }
    };
    match serde_json::from_str::<T>(&content) {
        Ok(index) if index.version() == INDEX_VERSION => Some(index),
        Ok(index) => {
            tracing::info!(
                "Index {} has version {}, expected {INDEX_VERSION}; rebuilding",
                path.display(),
                index.version()
            );
            None
        }
        Err(e) => {
            tracing::warn!("Failed to parse index {}: {e}", path.display());
            None
        }
    }
}

/// Write `index` to `path` atomically: a temporary file in the same
/// directory is renamed over the target.
pub fn save<T: Versioned>(path: &Path, index: &T) -> Result<()> {
    let dir = match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    };
    let json = serde_json::to_vec(index).map_err(|e| Error::Index(e.to_string()))?;

    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    tmp.write_all(&json)?;
    tmp.persist(path)
        .map_err(|e| Error::Index(format!("failed to replace {}: {}", path.display(), e.error)))?;
    Ok(())
}

/// Return the cached index for `video`, building and caching it when
/// needed. Failing to write the cache is logged and otherwise ignored.
pub fn load_or_build<T, F>(video: &Path, config: &IndexConfig, build: F) -> Result<T>
where
    T: Versioned,
    F: FnOnce() -> Result<T>,
{
    if !config.enabled {
        return build();
    }

    let path = index_path(video);
    if !config.reindex {
        if let Some(index) = load(&path) {
            tracing::debug!(path = %path.display(), "using cached index");
            return Ok(index);
        }
    }

    let index = build()?;
    if let Err(e) = save(&path, &index) {
        tracing::warn!("Failed to save index {}: {e}", path.display());
    }
    Ok(index)
}

fn rewind<B: AsRef<[u8]>>(source: &mut MkvSource<B>) -> Result<()> {
    if source.is_empty() {
        Ok(())
    } else {
        source.seek(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use framegrab_mkv::fixtures::{simple_block, MkvBuilder};

    fn entry(pts: u64, key_frame: bool) -> FrameEntry {
        FrameEntry {
            pts,
            offset: 0,
            key_frame,
        }
    }

    fn mkv_index(frames: Vec<FrameEntry>) -> MkvIndex {
        MkvIndex {
            version: INDEX_VERSION,
            frames,
            systime_offset: None,
            mjpeg_mode: false,
            mac: None,
        }
    }

    #[test]
    fn test_index_path_appends_suffix() {
        assert_eq!(index_path(Path::new("/v/cam.mkv")), PathBuf::from("/v/cam.mkv.idx"));
    }

    #[test]
    fn test_key_frame_before() {
        let index = mkv_index(vec![
            entry(0, true),
            entry(40, false),
            entry(80, true),
            entry(120, false),
        ]);
        assert_eq!(index.key_frame_before(1), Some(0));
        assert_eq!(index.key_frame_before(2), Some(2));
        assert_eq!(index.key_frame_before(3), Some(2));
        assert_eq!(index.key_frame_before(4), None);

        let no_keys = mkv_index(vec![entry(0, false), entry(40, false)]);
        assert_eq!(no_keys.key_frame_before(1), Some(0));
    }

    #[test]
    fn test_build_sorts_by_pts() {
        let bytes = MkvBuilder::new()
            .cluster(0, vec![simple_block(40, false, &[1]), simple_block(0, true, &[2])])
            .cluster(80, vec![simple_block(0, true, &[3])])
            .build();
        let mut source = MkvSource::from_bytes(bytes);
        let index = MkvIndex::build(&mut source).unwrap();

        let pts: Vec<u64> = index.frames.iter().map(|f| f.pts).collect();
        assert_eq!(pts, [0, 40_000, 80_000]);
        assert!(index.frames[0].key_frame);
        assert_eq!(index.frames[0].offset, index.frames[1].offset);
        assert!(index.frames[2].offset > index.frames[0].offset);
        assert_eq!(index.systime_offset, None);
        assert!(!index.mjpeg_mode);
    }

    #[test]
    fn test_save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cam.mkv.idx");
        let index = mkv_index(vec![entry(0, true)]);
        save(&path, &index).unwrap();
        assert_eq!(load::<MkvIndex>(&path), Some(index));
    }

    #[test]
    fn test_stale_or_garbled_index_is_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cam.mjpg.idx");

        assert_eq!(load::<MjpegIndex>(&path), None);

        std::fs::write(&path, r#"{"version": 3, "offsets": [0, 100]}"#).unwrap();
        assert_eq!(load::<MjpegIndex>(&path), None);

        std::fs::write(&path, "not json").unwrap();
        assert_eq!(load::<MjpegIndex>(&path), None);

        std::fs::write(&path, r#"{"version": 4, "offsets": [0, 100]}"#).unwrap();
        assert_eq!(load::<MjpegIndex>(&path).unwrap().offsets, [0, 100]);
    }

    #[test]
    fn test_load_or_build_caches() {
        let dir = tempfile::tempdir().unwrap();
        let video = dir.path().join("cam.mjpg");
        let config = IndexConfig::default();

        let built = load_or_build(&video, &config, || {
            Ok(MjpegIndex {
                version: INDEX_VERSION,
                offsets: vec![7],
            })
        })
        .unwrap();
        assert!(index_path(&video).exists());

        let cached: MjpegIndex =
            load_or_build(&video, &config, || Err(Error::fail("should not rebuild"))).unwrap();
        assert_eq!(cached, built);

        let reindex = IndexConfig {
            reindex: true,
            ..IndexConfig::default()
        };
        let rebuilt: MjpegIndex = load_or_build(&video, &reindex, || {
            Ok(MjpegIndex {
                version: INDEX_VERSION,
                offsets: vec![9],
            })
        })
        .unwrap();
        assert_eq!(rebuilt.offsets, [9]);
    }

    #[test]
    fn test_disabled_index_is_not_written() {
        let dir = tempfile::tempdir().unwrap();
        let video = dir.path().join("cam.mjpg");
        let config = IndexConfig {
            enabled: false,
            ..IndexConfig::default()
        };
        load_or_build(&video, &config, || {
            Ok(MjpegIndex {
                version: INDEX_VERSION,
                offsets: Vec::new(),
            })
        })
        .unwrap();
        assert!(!index_path(&video).exists());
    }
}
