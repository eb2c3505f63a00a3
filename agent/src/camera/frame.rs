//! Captured frame

use std::io::Cursor;

use base64::Engine;
use chrono::{DateTime, Utc};
use image::{DynamicImage, ImageFormat, ImageReader};

use crate::camera::resolution::Resolution;
use crate::camera::settings::CameraSettings;
use crate::errors::AgentError;

/// A JPEG-encoded frame with its decoded dimensions
#[derive(Debug, Clone)]
pub struct Frame {
    pub jpeg: Vec<u8>,
    pub resolution: Resolution,
    pub captured_at: DateTime<Utc>,
}

impl Frame {
    /// Wrap JPEG bytes, reading the dimensions from the image header
    pub fn from_jpeg(jpeg: Vec<u8>) -> Result<Self, AgentError> {
        if jpeg.is_empty() {
            return Err(AgentError::CameraError("empty frame".to_string()));
        }
        let (width, height) = ImageReader::new(Cursor::new(&jpeg))
            .with_guessed_format()?
            .into_dimensions()?;
        if width == 0 || height == 0 {
            return Err(AgentError::CameraError("frame has no pixels".to_string()));
        }
        Ok(Self {
            jpeg,
            resolution: Resolution::new(width, height),
            captured_at: Utc::now(),
        })
    }

    /// Apply software brightness and contrast adjustment.
    ///
    /// Brightness 0.5 and contrast 1.0 are neutral; the frame is returned
    /// untouched in that case.
    pub fn adjusted(self, settings: &CameraSettings) -> Result<Self, AgentError> {
        if !settings.needs_adjustment() {
            return Ok(self);
        }

        let mut rgb = image::load_from_memory(&self.jpeg)?.to_rgb8();
        let offset = (settings.brightness - 0.5) * 2.0 * 100.0;
        let contrast = settings.contrast;

        for channel in rgb.iter_mut() {
            let bright = (*channel as f64 + offset).clamp(0.0, 255.0) / 255.0;
            let value = ((bright - 0.5) * contrast + 0.5).clamp(0.0, 1.0);
            *channel = (value * 255.0) as u8;
        }

        let mut jpeg = Vec::new();
        DynamicImage::ImageRgb8(rgb).write_to(&mut Cursor::new(&mut jpeg), ImageFormat::Jpeg)?;

        Ok(Self {
            jpeg,
            resolution: self.resolution,
            captured_at: self.captured_at,
        })
    }

    /// Encode as a `data:` URI for previews
    pub fn to_data_uri(&self) -> String {
        let encoded = base64::engine::general_purpose::STANDARD.encode(&self.jpeg);
        format!("data:image/jpeg;base64,{}", encoded)
    }
}

#[cfg(test)]
pub(crate) fn test_jpeg(width: u32, height: u32) -> Vec<u8> {
    let img = image::RgbImage::from_pixel(width, height, image::Rgb([120, 80, 40]));
    let mut jpeg = Vec::new();
    DynamicImage::ImageRgb8(img)
        .write_to(&mut Cursor::new(&mut jpeg), ImageFormat::Jpeg)
        .unwrap();
    jpeg
}
