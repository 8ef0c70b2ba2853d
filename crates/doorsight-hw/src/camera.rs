//! V4L2 still capture via the `v4l` crate.
//!
//! Alternative to `libcamera-still` for USB webcams. Negotiates the
//! requested resolution, discards warmup frames while auto-exposure settles,
//! and writes the first usable frame as JPEG.

use crate::capture::{prepare_output, verify_output, Capture, CaptureError, CaptureSettings};
use crate::frame::{self, Frame};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use v4l::buffer::Type as BufType;
use v4l::io::traits::CaptureStream;
use v4l::prelude::*;
use v4l::video::Capture as _;
use v4l::FourCC;

/// Extra frames tried after warmup when the scene is still dark.
const DARK_RETRIES: usize = 3;

#[derive(Error, Debug)]
pub enum CameraError {
    #[error("device not found: {0}")]
    DeviceNotFound(String),
    #[error("device busy")]
    DeviceBusy,
    #[error("capture failed: {0}")]
    CaptureFailed(String),
    #[error("format negotiation failed: {0}")]
    FormatNegotiationFailed(String),
    #[error("device does not support video capture")]
    StreamingNotSupported,
    #[error("no frame within {0:?}")]
    TimedOut(Duration),
}

/// Negotiated pixel format for the camera.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    /// YUYV 4:2:2 packed (2 bytes/pixel).
    Yuyv,
    /// 8-bit grayscale (1 byte/pixel).
    Grey,
    /// Motion-JPEG; each buffer is a complete JPEG image.
    Mjpg,
}

/// V4L2 camera device handle.
pub struct Camera {
    device: Device,
    pub width: u32,
    pub height: u32,
    pub device_path: String,
    pixel_format: PixelFormat,
    warmup_frames: usize,
    /// Longest wait for any single frame.
    frame_timeout: Duration,
}

impl Camera {
    /// Open a V4L2 device (e.g., "/dev/video0") at the requested resolution.
    pub fn open(device_path: &str, settings: CaptureSettings, warmup_frames: usize) -> Result<Self, CameraError> {
        if !Path::new(device_path).exists() {
            return Err(CameraError::DeviceNotFound(device_path.to_string()));
        }

        let device = Device::with_path(device_path).map_err(|e| {
            if e.raw_os_error() == Some(16) || e.to_string().contains("busy") {
                CameraError::DeviceBusy
            } else {
                CameraError::DeviceNotFound(format!("{device_path}: {e}"))
            }
        })?;

        let caps = device
            .query_caps()
            .map_err(|e| CameraError::CaptureFailed(format!("failed to query capabilities: {e}")))?;
        if !caps.capabilities.contains(v4l::capability::Flags::VIDEO_CAPTURE) {
            return Err(CameraError::StreamingNotSupported);
        }

        let mut fmt = device
            .format()
            .map_err(|e| CameraError::FormatNegotiationFailed(format!("failed to get format: {e}")))?;
        fmt.fourcc = FourCC::new(b"YUYV");
        fmt.width = settings.width;
        fmt.height = settings.height;

        let negotiated = device
            .set_format(&fmt)
            .map_err(|e| CameraError::FormatNegotiationFailed(format!("failed to set format: {e}")))?;

        let pixel_format = match &negotiated.fourcc.repr {
            b"YUYV" => PixelFormat::Yuyv,
            b"GREY" => PixelFormat::Grey,
            b"MJPG" => PixelFormat::Mjpg,
            _ => {
                return Err(CameraError::FormatNegotiationFailed(format!(
                    "unsupported pixel format: {:?} (need YUYV, GREY, or MJPG)",
                    negotiated.fourcc
                )))
            }
        };

        tracing::info!(
            device = device_path,
            card = %caps.card,
            width = negotiated.width,
            height = negotiated.height,
            format = ?pixel_format,
            "camera opened"
        );

        Ok(Self {
            device,
            width: negotiated.width,
            height: negotiated.height,
            device_path: device_path.to_string(),
            pixel_format,
            warmup_frames,
            frame_timeout: Duration::from_millis(settings.timeout_ms),
        })
    }

    /// Stream until a non-dark frame arrives (after warmup) and return it as RGB.
    /// If every attempt is dark the last frame is returned anyway.
    pub fn grab(&self) -> Result<Frame, CameraError> {
        let mut stream = MmapStream::with_buffers(&self.device, BufType::VideoCapture, 4)
            .map_err(|e| CameraError::CaptureFailed(format!("failed to create mmap stream: {e}")))?;
        stream.set_timeout(self.frame_timeout);

        let attempts = self.warmup_frames + 1 + DARK_RETRIES;
        let mut last = None;
        for attempt in 0..attempts {
            let (buf, meta) = stream
                .next()
                .map_err(|e| dequeue_error(e, self.frame_timeout))?;
            if attempt < self.warmup_frames {
                continue;
            }

            let frame = Frame {
                data: self.to_rgb(buf)?,
                width: self.width,
                height: self.height,
                sequence: meta.sequence,
            };
            if !frame.is_dark(0.95) {
                return Ok(frame);
            }
            tracing::debug!(seq = meta.sequence, "skipping dark frame");
            last = Some(frame);
        }

        tracing::warn!(device = %self.device_path, "only dark frames captured; using the last one");
        last.ok_or_else(|| CameraError::CaptureFailed("no frame captured".into()))
    }

    fn to_rgb(&self, buf: &[u8]) -> Result<Vec<u8>, CameraError> {
        let converted = match self.pixel_format {
            PixelFormat::Yuyv => frame::yuyv_to_rgb(buf, self.width, self.height),
            PixelFormat::Grey => frame::grey_to_rgb(buf, self.width, self.height),
            PixelFormat::Mjpg => {
                return image::load_from_memory_with_format(buf, image::ImageFormat::Jpeg)
                    .map(|img| img.to_rgb8().into_raw())
                    .map_err(|e| CameraError::CaptureFailed(format!("MJPG decode failed: {e}")));
            }
        };
        converted.map_err(|e| CameraError::CaptureFailed(e.to_string()))
    }
}

fn dequeue_error(e: std::io::Error, timeout: Duration) -> CameraError {
    if e.kind() == std::io::ErrorKind::TimedOut {
        CameraError::TimedOut(timeout)
    } else {
        CameraError::CaptureFailed(format!("failed to dequeue buffer: {e}"))
    }
}

/// A stalled device is reported like a stalled capture process.
fn capture_error(e: CameraError, device_path: &str) -> CaptureError {
    match e {
        CameraError::TimedOut(after) => CaptureError::TimedOut {
            program: device_path.to_string(),
            after,
        },
        other => other.into(),
    }
}

impl Capture for Camera {
    fn capture(&mut self, output: &Path) -> Result<(), CaptureError> {
        prepare_output(output)?;
        let frame = self.grab().map_err(|e| capture_error(e, &self.device_path))?;
        tracing::debug!(seq = frame.sequence, brightness = frame.avg_brightness(), "v4l2 frame captured");
        frame.save_jpeg(output)?;
        verify_output(output)
    }
}
