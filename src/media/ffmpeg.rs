//! ffmpeg-backed decoder
//!
//! Probing goes through `ffprobe -of json`; decoding runs `ffmpeg` writing
//! raw `yuv420p` pictures to stdout, read back one fixed-size frame at a
//! time. Rewinding restarts the decoder process.
//!
//! Pictures are cropped down to even dimensions on the way out, since 4:2:0
//! chroma and the H.264 encoder both need them.

use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdout, Command, Stdio};

/// Rounds odd widths and heights down to the nearest even value
const EVEN_SIZE_FILTER: &str = "scale=trunc(iw/2)*2:trunc(ih/2)*2";

use bytes::BytesMut;
use serde::Deserialize;

use super::decoder::{MediaOpener, StreamInfo, VideoDecoder};
use super::frame::I420Frame;
use super::pacing::parse_rate;
use crate::error::{ResourceError, Result};

/// Opens files by probing and decoding them with ffmpeg executables
#[derive(Debug, Clone)]
pub struct FfmpegOpener {
    ffmpeg: PathBuf,
    ffprobe: PathBuf,
}

impl FfmpegOpener {
    pub fn new(ffmpeg: impl Into<PathBuf>, ffprobe: impl Into<PathBuf>) -> Self {
        Self {
            ffmpeg: ffmpeg.into(),
            ffprobe: ffprobe.into(),
        }
    }

    fn probe(&self, path: &Path) -> Result<StreamInfo> {
        let output = Command::new(&self.ffprobe)
            .args([
                "-v",
                "error",
                "-select_streams",
                "v:0",
                "-show_entries",
                "stream=codec_name,width,height,avg_frame_rate,r_frame_rate",
                "-of",
                "json",
            ])
            .arg(path)
            .stdin(Stdio::null())
            .output()
            .map_err(|e| ResourceError::Probe(format!("failed to run ffprobe: {}", e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(ResourceError::Probe(stderr.trim().to_owned()).into());
        }

        parse_probe(&output.stdout, path)
    }
}

impl Default for FfmpegOpener {
    fn default() -> Self {
        Self::new("ffmpeg", "ffprobe")
    }
}

impl MediaOpener for FfmpegOpener {
    fn open(&self, path: &Path) -> Result<Box<dyn VideoDecoder>> {
        if !path.is_file() {
            return Err(ResourceError::FileNotFound(path.to_path_buf()).into());
        }

        let info = self.probe(path)?;
        let decoder = FfmpegDecoder::spawn(self.ffmpeg.clone(), path.to_path_buf(), info)?;

        tracing::debug!(
            path = %path.display(),
            width = decoder.info.width,
            height = decoder.info.height,
            codec = ?decoder.info.codec,
            "Opened video file"
        );

        Ok(Box::new(decoder))
    }
}

#[derive(Debug, Deserialize)]
struct ProbeOutput {
    #[serde(default)]
    streams: Vec<ProbeStream>,
}

#[derive(Debug, Deserialize)]
struct ProbeStream {
    codec_name: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    avg_frame_rate: Option<String>,
    r_frame_rate: Option<String>,
}

fn parse_probe(json: &[u8], path: &Path) -> Result<StreamInfo> {
    let probe: ProbeOutput = serde_json::from_slice(json)
        .map_err(|e| ResourceError::Probe(format!("unreadable ffprobe output: {}", e)))?;

    let stream = probe
        .streams
        .into_iter()
        .next()
        .ok_or_else(|| ResourceError::NoVideoStream(path.to_path_buf()))?;

    // Must agree with EVEN_SIZE_FILTER, or frame reads lose alignment
    let (width, height) = match (stream.width, stream.height) {
        (Some(w), Some(h)) if w >= 2 && h >= 2 => (w & !1, h & !1),
        _ => return Err(ResourceError::NoVideoStream(path.to_path_buf()).into()),
    };

    Ok(StreamInfo {
        width,
        height,
        avg_frame_rate: stream.avg_frame_rate.as_deref().and_then(parse_rate),
        nominal_frame_rate: stream.r_frame_rate.as_deref().and_then(parse_rate),
        codec: stream.codec_name,
    })
}

/// Decoder backed by a running `ffmpeg` process
pub struct FfmpegDecoder {
    ffmpeg: PathBuf,
    path: PathBuf,
    info: StreamInfo,
    frame_size: usize,
    child: Child,
    stdout: ChildStdout,
}

impl FfmpegDecoder {
    fn spawn(ffmpeg: PathBuf, path: PathBuf, info: StreamInfo) -> Result<Self> {
        let (child, stdout) = spawn_decoder(&ffmpeg, &path)?;
        let frame_size = I420Frame::buffer_size(info.width, info.height);
        Ok(Self {
            ffmpeg,
            path,
            info,
            frame_size,
            child,
            stdout,
        })
    }

    fn kill(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

fn decoder_command(ffmpeg: &Path, path: &Path) -> Command {
    let mut command = Command::new(ffmpeg);
    command
        .args(["-v", "error", "-nostdin", "-i"])
        .arg(path)
        .args(["-map", "0:v:0", "-vf", EVEN_SIZE_FILTER])
        .args(["-f", "rawvideo", "-pix_fmt", "yuv420p", "-"]);
    command
}

fn spawn_decoder(ffmpeg: &Path, path: &Path) -> Result<(Child, ChildStdout)> {
    let mut child = decoder_command(ffmpeg, path)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .map_err(|e| ResourceError::Decoder(format!("failed to run ffmpeg: {}", e)))?;

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| ResourceError::Decoder("ffmpeg stdout unavailable".into()))?;

    Ok((child, stdout))
}

impl VideoDecoder for FfmpegDecoder {
    fn info(&self) -> &StreamInfo {
        &self.info
    }

    fn read_frame(&mut self) -> Result<Option<I420Frame>> {
        let mut buf = BytesMut::zeroed(self.frame_size);
        match self.stdout.read_exact(&mut buf) {
            Ok(()) => Ok(I420Frame::new(self.info.width, self.info.height, buf.freeze())),
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Ok(None),
            Err(e) => Err(ResourceError::Decoder(e.to_string()).into()),
        }
    }

    fn seek_to_start(&mut self) -> Result<()> {
        self.kill();
        let (child, stdout) = spawn_decoder(&self.ffmpeg, &self.path)?;
        self.child = child;
        self.stdout = stdout;
        Ok(())
    }

    fn flush(&mut self) {
        // Frames are read whole from the pipe; nothing is buffered here.
    }
}

impl Drop for FfmpegDecoder {
    fn drop(&mut self) {
        self.kill();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_probe() {
        let json = br#"{
            "programs": [],
            "streams": [{
                "codec_name": "h264",
                "width": 1280,
                "height": 720,
                "r_frame_rate": "30/1",
                "avg_frame_rate": "30000/1001"
            }]
        }"#;

        let info = parse_probe(json, Path::new("a.mp4")).unwrap();
        assert_eq!(info.width, 1280);
        assert_eq!(info.height, 720);
        assert_eq!(info.codec.as_deref(), Some("h264"));
        assert_eq!(info.nominal_frame_rate, Some(30.0));
        assert!((info.avg_frame_rate.unwrap() - 29.97).abs() < 0.01);
    }

    #[test]
    fn test_odd_dimensions_rounded_down() {
        let json = br#"{"streams": [{"width": 853, "height": 481, "avg_frame_rate": "25/1"}]}"#;
        let info = parse_probe(json, Path::new("odd.mp4")).unwrap();
        assert_eq!((info.width, info.height), (852, 480));

        let tiny = br#"{"streams": [{"width": 1, "height": 480}]}"#;
        assert!(parse_probe(tiny, Path::new("tiny.mp4")).is_err());
    }

    #[test]
    fn test_decoder_crops_to_even_size() {
        let command = decoder_command(Path::new("ffmpeg"), Path::new("odd.mp4"));
        let args: Vec<_> = command
            .get_args()
            .map(|arg| arg.to_string_lossy().into_owned())
            .collect();

        let vf = args.iter().position(|arg| arg == "-vf").unwrap();
        assert_eq!(args[vf + 1], EVEN_SIZE_FILTER);
        // Filter applies to the output, after the input
        let input = args.iter().position(|arg| arg == "-i").unwrap();
        assert!(input < vf);
        assert_eq!(args.last().map(String::as_str), Some("-"));
    }

    #[test]
    fn test_parse_probe_without_video() {
        let err = parse_probe(br#"{"streams": []}"#, Path::new("a.mp3")).unwrap_err();
        assert!(matches!(
            err,
            crate::Error::Resource(ResourceError::NoVideoStream(_))
        ));
    }

    #[test]
    fn test_parse_probe_unknown_rate() {
        let json = br#"{"streams": [{"width": 2, "height": 2, "avg_frame_rate": "0/0"}]}"#;
        let info = parse_probe(json, Path::new("a.mkv")).unwrap();
        assert_eq!(info.avg_frame_rate, None);
        assert_eq!(info.nominal_frame_rate, None);
    }

    #[test]
    fn test_open_missing_file() {
        let opener = FfmpegOpener::default();
        let err = opener
            .open(Path::new("/nonexistent/definitely-missing.mp4"))
            .err()
            .unwrap();
        assert!(matches!(
            err,
            crate::Error::Resource(ResourceError::FileNotFound(_))
        ));
    }
}
