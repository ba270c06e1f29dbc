//! Frame conversion: YUYV to grayscale, dark-frame detection, image files.

use facefind_core::Frame;
use std::path::Path;

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("YUYV buffer truncated: need {needed} bytes for the frame, got {got}")]
    Truncated { needed: usize, got: usize },
    #[error("image decode failed: {0}")]
    Decode(#[from] image::ImageError),
}

/// Luma plane of a packed YUYV 4:2:2 buffer: every even byte is a Y sample.
pub fn yuyv_to_grayscale(yuyv: &[u8], width: u32, height: u32) -> Result<Vec<u8>, FrameError> {
    let pixels = width as usize * height as usize;
    let needed = pixels * 2;
    let packed = yuyv.get(..needed).ok_or(FrameError::Truncated {
        needed,
        got: yuyv.len(),
    })?;
    Ok(packed.chunks_exact(2).map(|pair| pair[0]).collect())
}

/// Luma below which a pixel counts as black.
const BLACK_LEVEL: u8 = 32;

/// Share of pixels below `BLACK_LEVEL`; an empty frame is fully dark.
pub fn dark_fraction(gray: &[u8]) -> f32 {
    if gray.is_empty() {
        return 1.0;
    }
    let black = gray.iter().filter(|&&p| p < BLACK_LEVEL).count();
    black as f32 / gray.len() as f32
}

/// Decode an image file (JPEG, PNG, ...) into a grayscale frame.
pub fn load_image_frame(path: &Path) -> Result<Frame, FrameError> {
    let luma = image::open(path)?.to_luma8();
    let (width, height) = luma.dimensions();
    Ok(Frame {
        data: luma.into_raw(),
        width,
        height,
        sequence: 0,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_luma_extracted_from_yuyv() {
        // 2x2 frame, two YUYV macropixels per row.
        let yuyv = [10, 1, 20, 2, 30, 3, 40, 4, 50, 5, 60, 6, 70, 7, 80, 8];
        assert_eq!(yuyv_to_grayscale(&yuyv, 2, 2).unwrap(), vec![10, 20, 30, 40]);
    }

    #[test]
    fn test_trailing_padding_ignored() {
        let yuyv = [9, 0, 8, 0, 0xff, 0xff];
        assert_eq!(yuyv_to_grayscale(&yuyv, 2, 1).unwrap(), vec![9, 8]);
    }

    #[test]
    fn test_truncated_yuyv_rejected() {
        let err = yuyv_to_grayscale(&[1, 2, 3], 2, 1).unwrap_err();
        assert!(matches!(err, FrameError::Truncated { needed: 4, got: 3 }));
    }

    #[test]
    fn test_dark_fraction() {
        assert_eq!(dark_fraction(&[]), 1.0);
        assert_eq!(dark_fraction(&[0, 31, 32, 255]), 0.5);
        assert_eq!(dark_fraction(&[200; 16]), 0.0);
    }

    #[test]
    fn test_load_image_frame() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("selfie.png");
        image::GrayImage::from_fn(4, 3, |x, y| image::Luma([(x * 10 + y) as u8]))
            .save(&path)
            .unwrap();

        let frame = load_image_frame(&path).unwrap();
        assert_eq!((frame.width, frame.height), (4, 3));
        assert_eq!(frame.data.len(), 12);
        assert_eq!(&frame.data[..4], &[0, 10, 20, 30]);
    }

    #[test]
    fn test_load_image_frame_missing_file() {
        let err = load_image_frame(Path::new("/nonexistent/selfie.jpg")).unwrap_err();
        assert!(matches!(err, FrameError::Decode(_)));
    }
}
