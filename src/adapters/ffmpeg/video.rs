use anyhow::{anyhow, Context, Result};
use image::RgbImage;
use serde::Deserialize;
use std::io::{ErrorKind, Read, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command, Stdio};
use std::thread::JoinHandle;

use crate::application::ports::{FrameSink, FrameSource, VideoCodecPort, VideoInfo};
use crate::domain::errors::{DomainError, DomainResult};

const FALLBACK_FPS: f64 = 25.0;

/// Video decode and encode through `ffmpeg`/`ffprobe` child processes
/// exchanging raw RGB24 frames over pipes.
pub struct FfmpegCodec {
    ffmpeg: String,
    ffprobe: String,
}

impl FfmpegCodec {
    pub fn new() -> Self {
        Self { ffmpeg: "ffmpeg".into(), ffprobe: "ffprobe".into() }
    }

    pub fn with_binaries(ffmpeg: impl Into<String>, ffprobe: impl Into<String>) -> Self {
        Self { ffmpeg: ffmpeg.into(), ffprobe: ffprobe.into() }
    }

    fn stream_info(&self, source: &Path) -> Result<VideoInfo> {
        let output = Command::new(&self.ffprobe)
            .args(["-v", "error", "-select_streams", "v:0", "-show_entries"])
            .arg("stream=width,height,avg_frame_rate,r_frame_rate")
            .args(["-of", "json"])
            .arg(source)
            .stdin(Stdio::null())
            .output()
            .with_context(|| format!("cannot run {}", self.ffprobe))?;
        if !output.status.success() {
            return Err(anyhow!("{}", String::from_utf8_lossy(&output.stderr).trim()));
        }
        parse_stream_info(&output.stdout)
    }
}

impl Default for FfmpegCodec {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Deserialize)]
struct StreamReport {
    #[serde(default)]
    streams: Vec<StreamEntry>,
}

#[derive(Deserialize)]
struct StreamEntry {
    width: Option<u32>,
    height: Option<u32>,
    avg_frame_rate: Option<String>,
    r_frame_rate: Option<String>,
}

/// Reads the first video stream of an `ffprobe -of json` report.
pub fn parse_stream_info(json: &[u8]) -> Result<VideoInfo> {
    let report: StreamReport = serde_json::from_slice(json)?;
    let stream = report.streams.into_iter().next().ok_or_else(|| anyhow!("no video stream"))?;
    let (Some(width), Some(height)) = (stream.width, stream.height) else {
        return Err(anyhow!("video stream has no frame size"));
    };
    if width == 0 || height == 0 {
        return Err(anyhow!("video stream has an empty frame size"));
    }
    let fps = [stream.avg_frame_rate, stream.r_frame_rate]
        .iter()
        .flatten()
        .find_map(|r| parse_frame_rate(r))
        .unwrap_or(FALLBACK_FPS);
    Ok(VideoInfo { width, height, fps })
}

/// Parses `"30000/1001"` or `"25"`. Zero or malformed rates give `None`.
pub fn parse_frame_rate(raw: &str) -> Option<f64> {
    let fps = match raw.split_once('/') {
        Some((num, den)) => {
            let den: f64 = den.trim().parse().ok()?;
            if den == 0.0 {
                return None;
            }
            num.trim().parse::<f64>().ok()? / den
        }
        None => raw.trim().parse().ok()?,
    };
    (fps.is_finite() && fps > 0.0).then_some(fps)
}

/// Encoder arguments picked from the target container.
pub fn encoder_args(target: &Path) -> Vec<&'static str> {
    let ext = target
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();
    let mut args = match ext.as_str() {
        "mpg" | "mpeg" => vec!["-c:v", "mpeg2video", "-q:v", "3"],
        "wmv" => vec!["-c:v", "wmv2", "-q:v", "3"],
        _ => vec![
            "-c:v", "libx264", "-preset", "veryfast", "-pix_fmt", "yuv420p",
            "-vf", "pad=ceil(iw/2)*2:ceil(ih/2)*2",
        ],
    };
    if matches!(ext.as_str(), "mp4" | "mov" | "m4v") {
        args.extend(["-movflags", "+faststart"]);
    }
    args
}

fn spawn_failed(bin: &str, e: std::io::Error) -> DomainError {
    DomainError::OperationFailed(format!("cannot start {bin}: {e}"))
}

impl VideoCodecPort for FfmpegCodec {
    fn open_reader(&self, source: &Path) -> DomainResult<(Box<dyn FrameSource>, VideoInfo)> {
        let info = self
            .stream_info(source)
            .map_err(|e| DomainError::Upload(format!("{} is not a readable video: {e}", source.display())))?;

        let mut child = Command::new(&self.ffmpeg)
            .args(["-v", "error", "-i"])
            .arg(source)
            .args(["-an", "-f", "rawvideo", "-pix_fmt", "rgb24", "-"])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| spawn_failed(&self.ffmpeg, e))?;
        let (Some(stdout), Some(stderr)) = (child.stdout.take(), child.stderr.take()) else {
            let _ = child.kill();
            let _ = child.wait();
            return Err(DomainError::OperationFailed("ffmpeg pipes not captured".into()));
        };

        tracing::debug!("Decoding {} ({}x{} @ {:.2} fps)", source.display(), info.width, info.height, info.fps);
        let reader = FfmpegReader {
            child: Some(child),
            stdout,
            stderr: Some(collect_stderr(stderr)),
            source: source.to_path_buf(),
            width: info.width,
            height: info.height,
        };
        Ok((Box::new(reader), info))
    }

    fn open_writer(&self, target: &Path, info: &VideoInfo) -> DomainResult<Box<dyn FrameSink>> {
        let mut child = Command::new(&self.ffmpeg)
            .args(["-v", "error", "-y", "-f", "rawvideo", "-pix_fmt", "rgb24", "-s"])
            .arg(format!("{}x{}", info.width, info.height))
            .arg("-r")
            .arg(format!("{:.3}", info.fps))
            .args(["-i", "-", "-an"])
            .args(encoder_args(target))
            .arg(target)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| spawn_failed(&self.ffmpeg, e))?;
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| DomainError::OperationFailed("ffmpeg stdin not captured".into()))?;

        Ok(Box::new(FfmpegWriter { child: Some(child), stdin: Some(stdin), size: (info.width, info.height) }))
    }

    fn transcode_for_browser(&self, source: &Path, target: &Path) -> DomainResult<()> {
        if let Some(dir) = target.parent() {
            std::fs::create_dir_all(dir)
                .map_err(|e| DomainError::OperationFailed(format!("cannot create {}: {e}", dir.display())))?;
        }
        let output = Command::new(&self.ffmpeg)
            .args(["-v", "error", "-y", "-i"])
            .arg(source)
            .arg("-an")
            .args(encoder_args(target))
            .arg(target)
            .stdin(Stdio::null())
            .output()
            .map_err(|e| spawn_failed(&self.ffmpeg, e))?;
        if !output.status.success() {
            return Err(DomainError::OperationFailed(format!(
                "transcoding {} failed: {}",
                source.display(),
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        tracing::info!("Playback copy written to {}", target.display());
        Ok(())
    }
}

/// Drains stderr on its own thread so a chatty decoder never blocks on a full pipe.
fn collect_stderr(mut stderr: ChildStderr) -> JoinHandle<String> {
    std::thread::spawn(move || {
        let mut raw = Vec::new();
        let _ = stderr.read_to_end(&mut raw);
        String::from_utf8_lossy(&raw).into_owned()
    })
}

struct FfmpegReader {
    child: Option<Child>,
    stdout: ChildStdout,
    stderr: Option<JoinHandle<String>>,
    source: PathBuf,
    width: u32,
    height: u32,
}

impl FfmpegReader {
    /// Reaps the decoder once its output is exhausted. A non-zero exit means
    /// the stream ended because decoding failed, not because the file did.
    fn finish_decode(&mut self) -> DomainResult<()> {
        let Some(mut child) = self.child.take() else {
            return Ok(());
        };
        let status = child
            .wait()
            .map_err(|e| DomainError::OperationFailed(format!("waiting for decoder failed: {e}")))?;
        let stderr = self.stderr.take().and_then(|h| h.join().ok()).unwrap_or_default();
        if status.success() {
            return Ok(());
        }
        Err(DomainError::Upload(format!(
            "decoding {} failed ({status}): {}",
            self.source.display(),
            stderr.trim()
        )))
    }
}

impl FrameSource for FfmpegReader {
    fn next_frame(&mut self) -> DomainResult<Option<RgbImage>> {
        let mut buf = vec![0u8; self.width as usize * self.height as usize * 3];
        match self.stdout.read_exact(&mut buf) {
            Ok(()) => {}
            // A truncated last frame counts as end of stream.
            Err(e) if e.kind() == ErrorKind::UnexpectedEof => {
                self.finish_decode()?;
                return Ok(None);
            }
            Err(e) => return Err(DomainError::OperationFailed(format!("reading decoded frame failed: {e}"))),
        }
        RgbImage::from_raw(self.width, self.height, buf)
            .map(Some)
            .ok_or_else(|| DomainError::OperationFailed("decoded frame has the wrong size".into()))
    }
}

impl Drop for FfmpegReader {
    fn drop(&mut self) {
        if let Some(mut child) = self.child.take() {
            let _ = child.kill();
            let _ = child.wait();
        }
        if let Some(stderr) = self.stderr.take() {
            let _ = stderr.join();
        }
    }
}

struct FfmpegWriter {
    child: Option<Child>,
    stdin: Option<ChildStdin>,
    size: (u32, u32),
}

impl FrameSink for FfmpegWriter {
    fn write_frame(&mut self, frame: &RgbImage) -> DomainResult<()> {
        if frame.dimensions() != self.size {
            return Err(DomainError::InvalidInput(format!(
                "frame is {}x{}, writer expects {}x{}",
                frame.width(), frame.height(), self.size.0, self.size.1
            )));
        }
        let stdin = self
            .stdin
            .as_mut()
            .ok_or_else(|| DomainError::OperationFailed("video writer already closed".into()))?;
        stdin
            .write_all(frame.as_raw())
            .map_err(|e| DomainError::OperationFailed(format!("encoder rejected frame: {e}")))
    }

    fn finish(mut self: Box<Self>) -> DomainResult<()> {
        // Closing stdin lets the encoder flush and write the trailer.
        drop(self.stdin.take());
        let Some(child) = self.child.take() else {
            return Ok(());
        };
        let output = child
            .wait_with_output()
            .map_err(|e| DomainError::OperationFailed(format!("waiting for encoder failed: {e}")))?;
        if !output.status.success() {
            return Err(DomainError::OperationFailed(format!(
                "encoder failed: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        Ok(())
    }
}

impl Drop for FfmpegWriter {
    fn drop(&mut self) {
        drop(self.stdin.take());
        if let Some(mut child) = self.child.take() {
            let _ = child.kill();
            let _ = child.wait();
        }
    }
}
