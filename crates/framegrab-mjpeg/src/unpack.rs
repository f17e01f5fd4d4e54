//! Copy decoder output into the caller-visible pixel layouts.

use framegrab_core::{Error, Result};

use crate::decompress::{ComponentInfo, DecodedImage, RawComponent, RawImage};

/// Chroma subsampling accepted for planar output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Subsampling {
    /// Chroma halved horizontally.
    S422,
    /// Chroma halved in both directions.
    S420,
}

impl Subsampling {
    /// Detect the layout from frame component sampling factors: three
    /// components, luma `2x1` or `2x2`, both chroma components `1x1`.
    pub fn detect(components: &[ComponentInfo]) -> Option<Self> {
        let [y, cb, cr] = components else {
            return None;
        };
        if y.h_samp != 2 || [cb, cr].iter().any(|c| c.h_samp != 1 || c.v_samp != 1) {
            return None;
        }
        match y.v_samp {
            1 => Some(Self::S422),
            2 => Some(Self::S420),
            _ => None,
        }
    }

    /// Size of each chroma plane for a `width x height` image.
    pub fn chroma_size(self, width: usize, height: usize) -> (usize, usize) {
        match self {
            Self::S422 => (width / 2, height),
            Self::S420 => (width / 2, height / 2),
        }
    }
}

/// Copy interleaved pixels row by row, swapping the first and third byte
/// of every pixel when `swap_rb` is set.
pub fn interleaved(image: &DecodedImage, swap_rb: bool, out: &mut Vec<u8>) {
    let row_len = image.width as usize * image.channels;
    out.clear();
    if row_len == 0 {
        return;
    }
    for row in image.data.chunks_exact(row_len).take(image.height as usize) {
        if swap_rb && image.channels == 3 {
            for px in row.chunks_exact(3) {
                out.extend_from_slice(&[px[2], px[1], px[0]]);
            }
        } else {
            out.extend_from_slice(row);
        }
    }
}

/// Reassemble raw component samples into contiguous planes.
///
/// Gray output keeps only the luma plane. YCbCr output appends Cb and Cr,
/// each sized per [`Subsampling::chroma_size`]. A single-component frame is
/// accepted for gray output only; everything else must be 4:2:2 or 4:2:0.
pub fn planar(raw: &RawImage, gray: bool, out: &mut Vec<u8>) -> Result<()> {
    let width = raw.width as usize;
    let height = raw.height as usize;
    out.clear();

    if gray && raw.components.len() == 1 {
        return copy_plane(&raw.components[0], width, height, out);
    }

    let sampling: Vec<ComponentInfo> = raw
        .components
        .iter()
        .map(|c| ComponentInfo {
            id: 0,
            h_samp: c.h_samp,
            v_samp: c.v_samp,
        })
        .collect();
    let Some(subsampling) = Subsampling::detect(&sampling) else {
        let factors: Vec<String> = sampling
            .iter()
            .map(|c| format!("{}x{}", c.h_samp, c.v_samp))
            .collect();
        tracing::warn!(factors = %factors.join(","), "unsupported chroma sampling");
        return Err(Error::format(format!(
            "planar output needs 4:2:2 or 4:2:0 YCbCr, got sampling {}",
            factors.join(",")
        )));
    };

    copy_plane(&raw.components[0], width, height, out)?;
    if gray {
        return Ok(());
    }
    let (cw, ch) = subsampling.chroma_size(width, height);
    copy_plane(&raw.components[1], cw, ch, out)?;
    copy_plane(&raw.components[2], cw, ch, out)
}

/// Crop the DCT-aligned rows of `component` to `width x height`.
fn copy_plane(component: &RawComponent, width: usize, height: usize, out: &mut Vec<u8>) -> Result<()> {
    if component.stride() < width
        || component.rows() < height
        || component.samples.len() < component.stride() * component.rows()
    {
        return Err(Error::format(format!(
            "component of {}x{} blocks cannot hold a {width}x{height} plane",
            component.width_in_blocks, component.height_in_blocks
        )));
    }
    for y in 0..height {
        out.extend_from_slice(&component.row(y)[..width]);
    }
    Ok(())
}
