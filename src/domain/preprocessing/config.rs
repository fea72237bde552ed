//! Preprocessing settings chosen per session

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::domain::DomainError;

/// Square target sizes offered to the user, in pixels
pub const SUPPORTED_IMAGE_SIZES: [u32; 4] = [128, 224, 256, 299];

/// Edge length of the square the image is resized to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub struct ImageSize(u32);

impl ImageSize {
    pub fn new(pixels: u32) -> Result<Self, DomainError> {
        if SUPPORTED_IMAGE_SIZES.contains(&pixels) {
            Ok(Self(pixels))
        } else {
            Err(DomainError::validation(format!(
                "Image size {} is not supported; choose one of {:?}",
                pixels, SUPPORTED_IMAGE_SIZES
            )))
        }
    }

    pub fn pixels(&self) -> u32 {
        self.0
    }
}

impl Default for ImageSize {
    fn default() -> Self {
        Self(SUPPORTED_IMAGE_SIZES[0])
    }
}

impl TryFrom<u32> for ImageSize {
    type Error = DomainError;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<ImageSize> for u32 {
    fn from(size: ImageSize) -> Self {
        size.0
    }
}

impl fmt::Display for ImageSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Channel layout fed to the model
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ColorMode {
    #[default]
    #[serde(alias = "grayscale", alias = "GRAYSCALE", alias = "L")]
    Grayscale,
    #[serde(rename = "RGB", alias = "rgb", alias = "Rgb")]
    Rgb,
}

impl ColorMode {
    pub fn channels(&self) -> usize {
        match self {
            Self::Grayscale => 1,
            Self::Rgb => 3,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Grayscale => "Grayscale",
            Self::Rgb => "RGB",
        }
    }
}

impl fmt::Display for ColorMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ColorMode {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "grayscale" | "greyscale" | "gray" | "l" => Ok(Self::Grayscale),
            "rgb" => Ok(Self::Rgb),
            other => Err(DomainError::validation(format!(
                "Unknown color mode '{}'; expected Grayscale or RGB",
                other
            ))),
        }
    }
}

/// The (size, color mode) pair that turns an image into a model input
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PreprocessingConfig {
    pub image_size: ImageSize,
    pub color_mode: ColorMode,
}

impl PreprocessingConfig {
    pub fn new(image_size: ImageSize, color_mode: ColorMode) -> Self {
        Self {
            image_size,
            color_mode,
        }
    }

    /// Tensor shape produced for one image: `[1, S, S, C]`
    pub fn tensor_shape(&self) -> [usize; 4] {
        let size = self.image_size.pixels() as usize;
        [1, size, size, self.color_mode.channels()]
    }
}
