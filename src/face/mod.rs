//! Face geometry and detection backends.
//!
//! Detectors report boxes in source-video pixels; the stability check works
//! in overlay pixels, so every box goes through [`to_overlay`] first.

pub mod stability;
#[cfg(feature = "rustface")]
pub mod rustface_backend;

use thiserror::Error;

pub use stability::{FrameVerdict, StabilityTracker};
#[cfg(feature = "rustface")]
pub use rustface_backend::RustfaceDetector;

#[derive(Error, Debug)]
pub enum DetectorError {
    #[error("Failed to load detector model: {0}")]
    Model(String),
    #[error("No detector model configured")]
    NoModel,
}

/// Axis-aligned face rectangle.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FaceBox {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl FaceBox {
    pub fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn area(&self) -> f64 {
        self.width * self.height
    }

    pub fn center(&self) -> (f64, f64) {
        (self.x + self.width / 2.0, self.y + self.height / 2.0)
    }

    pub fn scaled(&self, sx: f64, sy: f64) -> Self {
        Self {
            x: self.x * sx,
            y: self.y * sy,
            width: self.width * sx,
            height: self.height * sy,
        }
    }

    /// Mirror horizontally inside a surface of `width` pixels
    pub fn mirrored(&self, width: f64) -> Self {
        Self {
            x: width - self.x - self.width,
            ..*self
        }
    }
}

/// Dimensions of the alignment overlay (or of a source frame).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Size {
    pub width: f64,
    pub height: f64,
}

impl Size {
    pub fn new(width: f64, height: f64) -> Self {
        Self { width, height }
    }

    pub fn center(&self) -> (f64, f64) {
        (self.width / 2.0, self.height / 2.0)
    }

    pub fn is_empty(&self) -> bool {
        self.width <= 0.0 || self.height <= 0.0
    }
}

/// Pick the candidate with the largest area; ties keep the earliest box.
pub fn best_candidate(faces: &[FaceBox]) -> Option<FaceBox> {
    let mut iter = faces.iter();
    let mut best = *iter.next()?;
    for face in iter {
        if face.area() > best.area() {
            best = *face;
        }
    }
    Some(best)
}

/// Select the best candidate and scale it from source-frame pixels to overlay pixels.
pub fn to_overlay(faces: &[FaceBox], source: Size, overlay: Size) -> Option<FaceBox> {
    if source.is_empty() {
        return None;
    }
    let best = best_candidate(faces)?;
    Some(best.scaled(overlay.width / source.width, overlay.height / source.height))
}

/// Pluggable face detection backend.
///
/// `gray` is a row-major 8-bit luma buffer of `width` × `height` bytes.
/// Boxes are returned in the same pixel space.
pub trait FaceDetector {
    fn detect(&mut self, gray: &[u8], width: u32, height: u32) -> Vec<FaceBox>;
}

/// Build the detector configured for this install.
#[cfg(feature = "rustface")]
pub fn load_detector(
    model: Option<&std::path::Path>,
) -> Result<Option<Box<dyn FaceDetector>>, DetectorError> {
    let path = model.ok_or(DetectorError::NoModel)?;
    let detector = RustfaceDetector::from_file(path)?;
    Ok(Some(Box::new(detector)))
}

/// Built without a detector backend: the kiosk runs in manual/timer mode.
#[cfg(not(feature = "rustface"))]
pub fn load_detector(
    _model: Option<&std::path::Path>,
) -> Result<Option<Box<dyn FaceDetector>>, DetectorError> {
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_largest_area_wins() {
        let faces = [
            FaceBox::new(0.0, 0.0, 10.0, 10.0),
            FaceBox::new(50.0, 50.0, 30.0, 40.0),
            FaceBox::new(5.0, 5.0, 20.0, 20.0),
        ];
        assert_eq!(best_candidate(&faces), Some(faces[1]));
        assert_eq!(best_candidate(&[]), None);
    }

    #[test]
    fn test_scale_to_overlay() {
        let faces = [FaceBox::new(100.0, 50.0, 200.0, 100.0)];
        let scaled = to_overlay(
            &faces,
            Size::new(1920.0, 1080.0),
            Size::new(960.0, 540.0),
        )
        .unwrap();
        assert_eq!(scaled, FaceBox::new(50.0, 25.0, 100.0, 50.0));
    }

    #[test]
    fn test_empty_source_yields_nothing() {
        let faces = [FaceBox::new(1.0, 1.0, 1.0, 1.0)];
        assert!(to_overlay(&faces, Size::new(0.0, 0.0), Size::new(10.0, 10.0)).is_none());
    }

    #[test]
    fn test_mirror() {
        let face = FaceBox::new(10.0, 5.0, 20.0, 20.0);
        assert_eq!(face.mirrored(100.0), FaceBox::new(70.0, 5.0, 20.0, 20.0));
    }
}
