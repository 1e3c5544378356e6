//! Raw video frames
//!
//! Frames travel from the decoder to the encoder as planar I420 (YUV 4:2:0):
//! a full-resolution luma plane followed by two quarter-resolution chroma
//! planes. `Bytes` keeps hand-offs between threads copy-free.

use std::time::Duration;

use bytes::Bytes;

/// Decoded picture in planar I420 layout
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct I420Frame {
    pub width: u32,
    pub height: u32,
    /// Y plane, then U plane, then V plane
    pub data: Bytes,
}

impl I420Frame {
    /// Wrap a buffer, checking that it holds exactly one picture
    pub fn new(width: u32, height: u32, data: Bytes) -> Option<Self> {
        if data.len() != Self::buffer_size(width, height) {
            return None;
        }
        Some(Self {
            width,
            height,
            data,
        })
    }

    /// Bytes needed for one picture of the given size
    ///
    /// Chroma planes round odd dimensions up.
    pub fn buffer_size(width: u32, height: u32) -> usize {
        let luma = width as usize * height as usize;
        let chroma = chroma_dim(width) * chroma_dim(height);
        luma + 2 * chroma
    }

    pub fn y_plane(&self) -> &[u8] {
        &self.data[..self.luma_len()]
    }

    pub fn u_plane(&self) -> &[u8] {
        let start = self.luma_len();
        &self.data[start..start + self.chroma_len()]
    }

    pub fn v_plane(&self) -> &[u8] {
        let start = self.luma_len() + self.chroma_len();
        &self.data[start..start + self.chroma_len()]
    }

    fn luma_len(&self) -> usize {
        self.width as usize * self.height as usize
    }

    fn chroma_len(&self) -> usize {
        chroma_dim(self.width) * chroma_dim(self.height)
    }
}

fn chroma_dim(dim: u32) -> usize {
    (dim as usize).div_ceil(2)
}

/// Paced frame handed to a [`super::FrameSink`]
#[derive(Debug, Clone)]
pub struct VideoFrame {
    /// Position within the current loop cycle, starting at 0
    pub index: u64,
    /// `index / fps`
    pub timestamp: Duration,
    /// Display duration of this frame (`1 / fps`)
    pub duration: Duration,
    pub picture: I420Frame,
}
