//! Preprocessing domain - settings and the image-to-tensor pipeline

mod config;
mod pipeline;

pub use config::{ColorMode, ImageSize, PreprocessingConfig, SUPPORTED_IMAGE_SIZES};
pub use pipeline::{decode_image, preprocess, validate_image_file_name, ImageInfo, IMAGE_EXTENSIONS};

#[cfg(test)]
pub(crate) use pipeline::testing;
