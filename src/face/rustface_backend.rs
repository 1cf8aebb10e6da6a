use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use super::{DetectorError, FaceBox, FaceDetector};

/// Face detector backed by the `rustface` crate (SeetaFace engine).
pub struct RustfaceDetector {
    detector: Box<dyn rustface::Detector>,
}

impl RustfaceDetector {
    /// Load a SeetaFace frontal model (`seeta_fd_frontal_v1.0.bin`) from disk.
    pub fn from_file(path: &Path) -> Result<Self, DetectorError> {
        let file = File::open(path)
            .map_err(|e| DetectorError::Model(format!("{}: {}", path.display(), e)))?;
        let model = rustface::read_model(BufReader::new(file))
            .map_err(|e| DetectorError::Model(format!("{}: {}", path.display(), e)))?;

        let mut detector = rustface::create_detector_with_model(model);
        detector.set_min_face_size(40);
        detector.set_score_thresh(2.0);
        detector.set_pyramid_scale_factor(0.8);
        detector.set_slide_window_step(4, 4);

        log::info!("Loaded face detector model from {}", path.display());
        Ok(Self { detector })
    }
}

impl FaceDetector for RustfaceDetector {
    fn detect(&mut self, gray: &[u8], width: u32, height: u32) -> Vec<FaceBox> {
        let faces = self
            .detector
            .detect(&rustface::ImageData::new(gray, width, height));

        faces
            .iter()
            .map(|face| {
                let bbox = face.bbox();
                FaceBox::new(
                    bbox.x() as f64,
                    bbox.y() as f64,
                    bbox.width() as f64,
                    bbox.height() as f64,
                )
            })
            .collect()
    }
}
