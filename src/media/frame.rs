//! RGBA camera frames and the conversions the kiosk needs from them.

use std::io::Cursor;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use image::{ImageFormat, RgbaImage};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum FrameError {
    #[error("Frame buffer does not match {width}x{height} RGBA")]
    BadBuffer { width: u32, height: u32 },
    #[error("PNG encoding failed: {0}")]
    Encode(#[from] image::ImageError),
}

/// A tightly packed RGBA frame
#[derive(Debug, Clone)]
pub struct Frame {
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

impl Frame {
    pub fn new(data: Vec<u8>, width: u32, height: u32) -> Self {
        Self {
            data,
            width,
            height,
        }
    }

    /// Nearest-neighbour copy no wider than `max_width`, keeping the aspect ratio.
    pub fn downscaled(&self, max_width: u32) -> Frame {
        if self.width <= max_width || self.width == 0 {
            return self.clone();
        }
        let target_width = max_width.max(1);
        let target_height = ((self.height as u64 * target_width as u64) / self.width as u64).max(1) as u32;

        let mut output = vec![0u8; (target_width * target_height * 4) as usize];
        let x_ratio = self.width as f64 / target_width as f64;
        let y_ratio = self.height as f64 / target_height as f64;

        for y in 0..target_height {
            for x in 0..target_width {
                let src_x = (x as f64 * x_ratio) as u32;
                let src_y = (y as f64 * y_ratio) as u32;
                let src_idx = ((src_y * self.width + src_x) * 4) as usize;
                let dst_idx = ((y * target_width + x) * 4) as usize;

                if src_idx + 3 < self.data.len() {
                    output[dst_idx..dst_idx + 4].copy_from_slice(&self.data[src_idx..src_idx + 4]);
                }
            }
        }

        Frame::new(output, target_width, target_height)
    }

    /// 8-bit luma plane (BT.601 weights) for the face detector
    pub fn to_gray(&self) -> Vec<u8> {
        self.data
            .chunks_exact(4)
            .map(|px| ((77 * px[0] as u32 + 150 * px[1] as u32 + 29 * px[2] as u32) >> 8) as u8)
            .collect()
    }

    /// Encode losslessly as a `data:image/png;base64,...` URI
    pub fn to_png_data_uri(&self) -> Result<String, FrameError> {
        let image = RgbaImage::from_raw(self.width, self.height, self.data.clone()).ok_or(
            FrameError::BadBuffer {
                width: self.width,
                height: self.height,
            },
        )?;

        let mut png = Cursor::new(Vec::new());
        image.write_to(&mut png, ImageFormat::Png)?;
        Ok(format!("data:image/png;base64,{}", BASE64.encode(png.into_inner())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn solid(width: u32, height: u32, rgba: [u8; 4]) -> Frame {
        let data = rgba.iter().copied().cycle().take((width * height * 4) as usize).collect();
        Frame::new(data, width, height)
    }

    #[test]
    fn test_gray_weights() {
        let white = solid(2, 2, [255, 255, 255, 255]);
        assert_eq!(white.to_gray(), vec![255; 4]);
        let black = solid(2, 1, [0, 0, 0, 255]);
        assert_eq!(black.to_gray(), vec![0, 0]);
    }

    #[test]
    fn test_downscale_keeps_aspect() {
        let frame = solid(1920, 1080, [10, 20, 30, 255]);
        let small = frame.downscaled(640);
        assert_eq!((small.width, small.height), (640, 360));
        assert_eq!(small.data.len(), 640 * 360 * 4);
        assert_eq!(&small.data[0..4], &[10, 20, 30, 255]);

        let tiny = solid(320, 240, [0; 4]);
        assert_eq!(tiny.downscaled(640).width, 320);
    }

    #[test]
    fn test_png_data_uri() {
        let uri = solid(4, 3, [200, 100, 50, 255]).to_png_data_uri().unwrap();
        let payload = uri.strip_prefix("data:image/png;base64,").unwrap();
        let bytes = BASE64.decode(payload).unwrap();
        let decoded = image::load_from_memory(&bytes).unwrap().to_rgba8();
        assert_eq!(decoded.dimensions(), (4, 3));
        assert_eq!(decoded.get_pixel(3, 2).0, [200, 100, 50, 255]);
    }

    #[test]
    fn test_short_buffer_rejected() {
        let frame = Frame::new(vec![0; 10], 4, 4);
        assert!(matches!(
            frame.to_png_data_uri(),
            Err(FrameError::BadBuffer { width: 4, height: 4 })
        ));
    }
}
