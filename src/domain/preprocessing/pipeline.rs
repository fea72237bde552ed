//! Image decoding and tensor preparation

use image::imageops::{self, FilterType};
use image::{ColorType, DynamicImage, GrayImage, ImageFormat, ImageReader};
use ndarray::Array4;
use serde::Serialize;
use std::io::Cursor;

use super::config::{ColorMode, PreprocessingConfig};
use crate::domain::classifier::has_extension;
use crate::domain::DomainError;

/// File extensions accepted for image uploads
pub const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "bmp"];

/// Resampling filter for the square resize (bicubic)
const RESIZE_FILTER: FilterType = FilterType::CatmullRom;

/// What the user sees next to the uploaded image preview
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ImageInfo {
    pub width: u32,
    pub height: u32,
    pub mode: String,
    pub format: Option<String>,
}

/// Validate an image upload's file name
pub fn validate_image_file_name(file_name: &str) -> Result<(), DomainError> {
    if has_extension(file_name, IMAGE_EXTENSIONS) {
        Ok(())
    } else {
        Err(DomainError::validation(format!(
            "Image file '{}' must be one of: {}",
            file_name,
            IMAGE_EXTENSIONS.join(", ")
        )))
    }
}

/// Decode image bytes, sniffing the format from the content
pub fn decode_image(bytes: &[u8]) -> Result<(DynamicImage, ImageInfo), DomainError> {
    let reader = ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()
        .map_err(|e| DomainError::inference_from("Could not read image", &e))?;

    let format = reader.format();
    let image = reader
        .decode()
        .map_err(|e| DomainError::inference_from("Could not decode image", &e))?;

    let info = ImageInfo {
        width: image.width(),
        height: image.height(),
        mode: mode_name(image.color()).to_string(),
        format: format.map(format_name),
    };

    Ok((image, info))
}

/// Turn a decoded image into a `(1, S, S, C)` tensor with values in `[0, 1]`.
///
/// Colour conversion happens before the resize; grayscale uses ITU-R 601-2
/// luma weights.
pub fn preprocess(image: &DynamicImage, config: &PreprocessingConfig) -> Array4<f32> {
    let size = config.image_size.pixels();
    let shape = config.tensor_shape();

    match config.color_mode {
        ColorMode::Grayscale => {
            let gray = imageops::resize(&luma(image), size, size, RESIZE_FILTER);
            Array4::from_shape_fn(shape, |(_, y, x, _)| {
                scale(gray.get_pixel(x as u32, y as u32)[0])
            })
        }
        ColorMode::Rgb => {
            let rgb = imageops::resize(&image.to_rgb8(), size, size, RESIZE_FILTER);
            Array4::from_shape_fn(shape, |(_, y, x, c)| {
                scale(rgb.get_pixel(x as u32, y as u32)[c])
            })
        }
    }
}

fn scale(value: u8) -> f32 {
    f32::from(value) / 255.0
}

/// Single-channel luminance; alpha is dropped
fn luma(image: &DynamicImage) -> GrayImage {
    if let DynamicImage::ImageLuma8(gray) = image {
        return gray.clone();
    }

    let rgb = image.to_rgb8();
    GrayImage::from_fn(rgb.width(), rgb.height(), |x, y| {
        let [r, g, b] = rgb.get_pixel(x, y).0;
        let weighted = u32::from(r) * 19595 + u32::from(g) * 38470 + u32::from(b) * 7471;
        image::Luma([((weighted + 0x8000) >> 16) as u8])
    })
}

fn mode_name(color: ColorType) -> &'static str {
    match color {
        ColorType::L8 => "L",
        ColorType::La8 => "LA",
        ColorType::Rgb8 => "RGB",
        ColorType::Rgba8 => "RGBA",
        ColorType::L16 => "I;16",
        ColorType::La16 => "LA;16",
        ColorType::Rgb16 | ColorType::Rgb32F => "RGB;16",
        ColorType::Rgba16 | ColorType::Rgba32F => "RGBA;16",
        _ => "unknown",
    }
}

fn format_name(format: ImageFormat) -> String {
    match format {
        ImageFormat::Jpeg => "JPEG".to_string(),
        ImageFormat::Png => "PNG".to_string(),
        ImageFormat::Bmp => "BMP".to_string(),
        other => format!("{:?}", other).to_uppercase(),
    }
}
