//! Frame type and pixel conversion — YUYV/GREY to RGB, dark detection.

use image::{ImageFormat, RgbImage};
use std::path::Path;

/// A captured RGB camera frame.
#[derive(Clone)]
pub struct Frame {
    /// Packed RGB pixel data (width * height * 3 bytes).
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub sequence: u32,
}

impl Frame {
    /// Average luma (0.0–255.0).
    pub fn avg_brightness(&self) -> f32 {
        if self.data.is_empty() {
            return 0.0;
        }
        let pixels = self.data.len() / 3;
        self.data.chunks_exact(3).map(|p| luma(p) as f32).sum::<f32>() / pixels as f32
    }

    /// True if more than `threshold_pct` of the pixels are near black.
    pub fn is_dark(&self, threshold_pct: f32) -> bool {
        is_dark_frame(&self.data, threshold_pct)
    }

    /// Encode the frame as JPEG at `path`, replacing any existing file.
    pub fn save_jpeg(self, path: &Path) -> Result<(), FrameError> {
        let (width, height, actual) = (self.width, self.height, self.data.len());
        let image = RgbImage::from_raw(width, height, self.data).ok_or(FrameError::InvalidLength {
            expected: (width * height * 3) as usize,
            actual,
        })?;
        image.save_with_format(path, ImageFormat::Jpeg)?;
        Ok(())
    }
}

/// BT.601 integer luma of one RGB pixel.
fn luma(p: &[u8]) -> u8 {
    ((p[0] as u32 * 77 + p[1] as u32 * 150 + p[2] as u32 * 29) >> 8) as u8
}

/// BT.601 YUV → RGB for one pixel.
fn yuv_to_rgb(y: u8, u: u8, v: u8) -> [u8; 3] {
    let c = y as f32 - 16.0;
    let d = u as f32 - 128.0;
    let e = v as f32 - 128.0;
    let clamp = |x: f32| x.round().clamp(0.0, 255.0) as u8;
    [
        clamp(1.164 * c + 1.596 * e),
        clamp(1.164 * c - 0.392 * d - 0.813 * e),
        clamp(1.164 * c + 2.017 * d),
    ]
}

/// Convert packed YUYV (4:2:2) to RGB.
///
/// Every 4 bytes `[Y0, U, Y1, V]` carry two pixels sharing one chroma pair.
pub fn yuyv_to_rgb(yuyv: &[u8], width: u32, height: u32) -> Result<Vec<u8>, FrameError> {
    let expected = (width * height * 2) as usize;
    if yuyv.len() < expected {
        return Err(FrameError::InvalidLength {
            expected,
            actual: yuyv.len(),
        });
    }

    let mut rgb = Vec::with_capacity((width * height * 3) as usize);
    for quad in yuyv[..expected].chunks_exact(4) {
        rgb.extend_from_slice(&yuv_to_rgb(quad[0], quad[1], quad[3]));
        rgb.extend_from_slice(&yuv_to_rgb(quad[2], quad[1], quad[3]));
    }
    Ok(rgb)
}

/// Replicate 8-bit grayscale into RGB.
pub fn grey_to_rgb(grey: &[u8], width: u32, height: u32) -> Result<Vec<u8>, FrameError> {
    let expected = (width * height) as usize;
    if grey.len() < expected {
        return Err(FrameError::InvalidLength {
            expected,
            actual: grey.len(),
        });
    }
    Ok(grey[..expected].iter().flat_map(|&g| [g, g, g]).collect())
}

/// Returns true if more than `threshold_pct` of RGB pixels have luma below 32.
pub fn is_dark_frame(rgb: &[u8], threshold_pct: f32) -> bool {
    let pixels = rgb.len() / 3;
    if pixels == 0 {
        return true;
    }
    let dark = rgb.chunks_exact(3).filter(|p| luma(p) < 32).count();
    (dark as f32 / pixels as f32) > threshold_pct
}

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("invalid frame length: expected {expected}, got {actual}")]
    InvalidLength { expected: usize, actual: usize },
    #[error("image encode failed: {0}")]
    Encode(#[from] image::ImageError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_yuyv_neutral_chroma_is_grey() {
        // Y=16 is black, Y=235 is white in studio range.
        let yuyv = vec![16, 128, 235, 128];
        let rgb = yuyv_to_rgb(&yuyv, 2, 1).unwrap();
        assert_eq!(rgb, vec![0, 0, 0, 255, 255, 255]);
    }

    #[test]
    fn test_yuyv_output_length() {
        let yuyv = vec![128u8; 4 * 2 * 2];
        let rgb = yuyv_to_rgb(&yuyv, 4, 2).unwrap();
        assert_eq!(rgb.len(), 4 * 2 * 3);
    }

    #[test]
    fn test_yuyv_invalid_length() {
        assert!(matches!(
            yuyv_to_rgb(&[100, 128], 2, 1),
            Err(FrameError::InvalidLength { expected: 4, actual: 2 })
        ));
    }

    #[test]
    fn test_grey_to_rgb() {
        let rgb = grey_to_rgb(&[10, 200], 2, 1).unwrap();
        assert_eq!(rgb, vec![10, 10, 10, 200, 200, 200]);
    }

    #[test]
    fn test_dark_frame_all_black() {
        assert!(is_dark_frame(&vec![0u8; 300], 0.95));
    }

    #[test]
    fn test_dark_frame_normal() {
        assert!(!is_dark_frame(&vec![128u8; 300], 0.95));
    }

    #[test]
    fn test_dark_frame_empty() {
        assert!(is_dark_frame(&[], 0.95));
    }

    #[test]
    fn test_dark_frame_borderline_bright() {
        // 94% dark, 6% bright → not dark
        let mut rgb = vec![10u8; 940 * 3];
        rgb.extend(vec![128u8; 60 * 3]);
        assert!(!is_dark_frame(&rgb, 0.95));
    }

    #[test]
    fn test_save_jpeg_overwrites() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("still.jpg");
        std::fs::write(&path, b"stale").unwrap();

        let frame = Frame { data: vec![200u8; 8 * 8 * 3], width: 8, height: 8, sequence: 0 };
        assert!((frame.avg_brightness() - 200.0).abs() < 1.0);
        frame.save_jpeg(&path).unwrap();

        let reloaded = image::open(&path).unwrap();
        assert_eq!((reloaded.width(), reloaded.height()), (8, 8));
    }
}
