//! Demux/decode seam
//!
//! The video source only needs a handful of operations from a media library:
//! open a file, describe its video stream, pull decoded I420 pictures,
//! rewind. Keeping them behind traits lets the pacing loop run against an
//! in-memory decoder in tests.

use std::path::Path;

use super::frame::I420Frame;
use crate::error::Result;

/// Properties of the selected video stream
#[derive(Debug, Clone, PartialEq)]
pub struct StreamInfo {
    pub width: u32,
    pub height: u32,
    /// Average frame rate reported by the container
    pub avg_frame_rate: Option<f64>,
    /// Nominal (real base) frame rate reported by the container
    pub nominal_frame_rate: Option<f64>,
    /// Codec name, if known
    pub codec: Option<String>,
}

/// Opened video stream producing decoded pictures
///
/// Implementations release their resources on drop.
pub trait VideoDecoder: Send {
    /// Stream description captured at open time
    fn info(&self) -> &StreamInfo;

    /// Read, decode and convert the next picture
    ///
    /// `Ok(None)` signals end of stream.
    fn read_frame(&mut self) -> Result<Option<I420Frame>>;

    /// Rewind to the first frame
    fn seek_to_start(&mut self) -> Result<()>;

    /// Drop any pictures buffered inside the decoder
    fn flush(&mut self);
}

/// Opens media files
pub trait MediaOpener: Send + Sync {
    fn open(&self, path: &Path) -> Result<Box<dyn VideoDecoder>>;
}
