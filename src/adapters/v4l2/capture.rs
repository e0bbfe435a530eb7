use anyhow::{anyhow, Result};
use image::{ImageFormat, RgbImage};
use v4l::format::FourCC;
use v4l::io::mmap::Stream;
use v4l::io::traits::CaptureStream;
use v4l::video::Capture;
use v4l::Device;

use crate::application::ports::{CameraPort, FrameSource};
use crate::domain::camera::{CameraId, CameraMode};
use crate::domain::errors::{DomainError, DomainResult};

/// Memory-mapped V4L2 capture. Dropping it stops streaming and closes the device node.
pub struct V4l2Capture {
    stream: Stream<'static>,
    fourcc: FourCC,
    width: u32,
    height: u32,
}

impl V4l2Capture {
    /// Opens the device and negotiates format, size and frame interval.
    pub fn open(camera: &CameraId, mode: &CameraMode) -> Result<Self> {
        let dev = Device::with_path(&camera.path)?;

        let b = mode.format.as_bytes();
        if b.len() != 4 {
            return Err(anyhow!("FourCC must be 4 characters, got {:?}", mode.format));
        }
        let mut fmt = dev.format()?;
        fmt.fourcc = FourCC::new(&[b[0], b[1], b[2], b[3]]);
        fmt.width = mode.size.width;
        fmt.height = mode.size.height;

        // The driver may adjust to the closest supported values.
        let actual_fmt = dev.set_format(&fmt)?;

        let mut params = dev.params()?;
        params.interval.numerator = 1;
        params.interval.denominator = mode.fps.max(1);
        let _ = dev.set_params(&params);

        // The stream holds its own handle to the device.
        let stream = Stream::with_buffers(&dev, v4l::buffer::Type::VideoCapture, 4)?;

        tracing::info!(
            "Camera {} opened: {}x{} [{}] at {} FPS",
            camera.path, actual_fmt.width, actual_fmt.height, actual_fmt.fourcc, mode.fps
        );

        Ok(Self {
            stream,
            fourcc: actual_fmt.fourcc,
            width: actual_fmt.width,
            height: actual_fmt.height,
        })
    }

    pub fn next_rgb(&mut self) -> Result<RgbImage> {
        let (data, _) = self.stream.next()?;
        let fcc_str = self.fourcc.str().map_err(|_| anyhow!("invalid FourCC"))?;

        match fcc_str {
            "MJPG" => Ok(image::load_from_memory_with_format(data, ImageFormat::Jpeg)?.to_rgb8()),
            "YUYV" => Ok(yuyv_to_rgb(data, self.width, self.height)),
            _ => Err(anyhow!("camera format {} is not supported", fcc_str)),
        }
    }
}

impl FrameSource for V4l2Capture {
    fn next_frame(&mut self) -> DomainResult<Option<RgbImage>> {
        self.next_rgb()
            .map(Some)
            .map_err(|e| DomainError::Camera(format!("frame capture failed: {e}")))
    }
}

/// Opens the configured device for each webcam session.
pub struct V4l2Camera;

impl V4l2Camera {
    pub fn new() -> Self {
        Self
    }
}

impl Default for V4l2Camera {
    fn default() -> Self {
        Self::new()
    }
}

impl CameraPort for V4l2Camera {
    fn open(&self, camera: &CameraId, mode: &CameraMode) -> DomainResult<Box<dyn FrameSource>> {
        let capture = V4l2Capture::open(camera, mode)
            .map_err(|e| DomainError::Camera(format!("cannot open {}: {e}", camera.path)))?;
        Ok(Box::new(capture))
    }
}

/// YUYV (YUV 4:2:2) to RGB with BT.601 coefficients.
fn yuyv_to_rgb(yuyv: &[u8], w: u32, h: u32) -> RgbImage {
    let mut out = RgbImage::new(w, h);

    // Each 4-byte block [Y0, U, Y1, V] encodes two pixels sharing U and V.
    for (i, chunk) in yuyv.chunks_exact(4).enumerate() {
        let u = chunk[1] as f32 - 128.0;
        let v = chunk[3] as f32 - 128.0;

        let pixel_idx = i as u32 * 2;
        let x = pixel_idx % w;
        let y = pixel_idx / w;
        if y >= h {
            break;
        }
        out.put_pixel(x, y, yuv_pixel(chunk[0] as f32, u, v));
        if x + 1 < w {
            out.put_pixel(x + 1, y, yuv_pixel(chunk[2] as f32, u, v));
        }
    }
    out
}

fn yuv_pixel(y: f32, u: f32, v: f32) -> image::Rgb<u8> {
    let r = (y + 1.402 * v).clamp(0.0, 255.0) as u8;
    let g = (y - 0.344136 * u - 0.714136 * v).clamp(0.0, 255.0) as u8;
    let b = (y + 1.772 * u).clamp(0.0, 255.0) as u8;
    image::Rgb([r, g, b])
}
