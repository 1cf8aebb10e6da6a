//! Consecutive-frame stability gate for auto-capture.

use super::{FaceBox, Size};
use crate::config;

/// Placement verdict for a single frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameVerdict {
    pub face: Option<FaceBox>,
    pub centered: bool,
    pub big_enough: bool,
}

impl FrameVerdict {
    /// Judge a face box against the overlay. No face is never ok.
    pub fn judge(face: Option<FaceBox>, overlay: Size) -> Self {
        let Some(face) = face else {
            return Self {
                face: None,
                centered: false,
                big_enough: false,
            };
        };
        if overlay.is_empty() {
            return Self {
                face: Some(face),
                centered: false,
                big_enough: false,
            };
        }

        let (cx, cy) = overlay.center();
        let (fx, fy) = face.center();
        let centered = (fx - cx).abs() < config::CENTER_TOLERANCE * overlay.width
            && (fy - cy).abs() < config::CENTER_TOLERANCE * overlay.height;
        let big_enough = face.height / overlay.height >= config::MIN_FACE_RATIO;

        Self {
            face: Some(face),
            centered,
            big_enough,
        }
    }

    pub fn ok(&self) -> bool {
        self.centered && self.big_enough
    }
}

/// Counts consecutive ok frames and fires once the streak reaches the threshold.
#[derive(Debug, Clone)]
pub struct StabilityTracker {
    stable_frames: u32,
    threshold: u32,
}

impl Default for StabilityTracker {
    fn default() -> Self {
        Self::new(config::STABLE_FRAMES)
    }
}

impl StabilityTracker {
    pub fn new(threshold: u32) -> Self {
        Self {
            stable_frames: 0,
            threshold: threshold.max(1),
        }
    }

    pub fn stable_frames(&self) -> u32 {
        self.stable_frames
    }

    pub fn reset(&mut self) {
        self.stable_frames = 0;
    }

    /// Feed one frame's verdict. Returns true exactly on the frame that
    /// completes the streak; the counter restarts from zero afterwards.
    pub fn observe(&mut self, verdict: &FrameVerdict) -> bool {
        if !verdict.ok() {
            self.stable_frames = 0;
            return false;
        }

        self.stable_frames += 1;
        if self.stable_frames >= self.threshold {
            self.stable_frames = 0;
            return true;
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn overlay() -> Size {
        Size::new(1000.0, 800.0)
    }

    /// Box centred on the overlay with the given height fraction
    fn centered_box(height_ratio: f64) -> FaceBox {
        let h = 800.0 * height_ratio;
        let w = h * 0.75;
        FaceBox::new(500.0 - w / 2.0, 400.0 - h / 2.0, w, h)
    }

    fn good() -> FrameVerdict {
        FrameVerdict::judge(Some(centered_box(0.20)), overlay())
    }

    fn bad() -> FrameVerdict {
        FrameVerdict::judge(None, overlay())
    }

    #[test]
    fn test_verdict_geometry() {
        assert!(good().ok());

        let small = FrameVerdict::judge(Some(centered_box(0.10)), overlay());
        assert!(small.centered);
        assert!(!small.big_enough);
        assert!(!small.ok());

        // Centre 200px right of the overlay centre: outside 18% of 1000
        let mut off = centered_box(0.25);
        off.x += 200.0;
        let verdict = FrameVerdict::judge(Some(off), overlay());
        assert!(!verdict.centered);
        assert!(verdict.big_enough);

        // 170px right is still inside the window
        let mut near = centered_box(0.25);
        near.x += 170.0;
        assert!(FrameVerdict::judge(Some(near), overlay()).centered);
    }

    #[test]
    fn test_fires_once_after_eighth_frame() {
        let mut tracker = StabilityTracker::default();
        let fired: Vec<bool> = (0..8).map(|_| tracker.observe(&good())).collect();
        assert_eq!(fired.iter().filter(|f| **f).count(), 1);
        assert!(fired[7]);
        assert_eq!(tracker.stable_frames(), 0);
    }

    #[test]
    fn test_seven_then_bad_never_fires() {
        let mut tracker = StabilityTracker::default();
        for _ in 0..7 {
            assert!(!tracker.observe(&good()));
        }
        assert!(!tracker.observe(&bad()));
        assert_eq!(tracker.stable_frames(), 0);
        for _ in 0..7 {
            assert!(!tracker.observe(&good()));
        }
        assert!(tracker.observe(&good()));
    }

    #[test]
    fn test_small_face_never_fires() {
        let mut tracker = StabilityTracker::default();
        let small = FrameVerdict::judge(Some(centered_box(0.10)), overlay());
        for _ in 0..500 {
            assert!(!tracker.observe(&small));
        }
    }

    #[test]
    fn test_long_streak_fires_every_threshold() {
        let mut tracker = StabilityTracker::default();
        let fires = (0..24).filter(|_| tracker.observe(&good())).count();
        assert_eq!(fires, 3);
    }
}
