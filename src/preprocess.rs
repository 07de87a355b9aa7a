//! Image preprocessing.
//!
//! Turns an image source into the NHWC `[1, H, W, 3]` float buffer an
//! architecture expects: decode, resize to the architecture's resolution,
//! then apply that architecture's normalization.

use std::path::{Path, PathBuf};

use base64::Engine;
use image::imageops::FilterType;
use image::{DynamicImage, ImageReader};
use ndarray::{Array4, ArrayD};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::model::Architecture;

/// ImageNet channel means in BGR order, 0-255 scale.
const CAFFE_MEAN_BGR: [f32; 3] = [103.939, 116.779, 123.68];
/// ImageNet channel statistics in RGB order, 0-1 scale.
const TORCH_MEAN: [f32; 3] = [0.485, 0.456, 0.406];
const TORCH_STD: [f32; 3] = [0.229, 0.224, 0.225];

/// Pixel normalization applied after resizing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Normalization {
    /// Raw 0-255 RGB; the model rescales internally
    Identity,
    /// `x / 127.5 - 1`, range [-1, 1]
    Symmetric,
    /// RGB -> BGR, then subtract the ImageNet BGR mean
    Caffe,
    /// `x / 255`, subtract ImageNet mean, divide by std
    Torch,
}

impl Normalization {
    /// Normalize one RGB pixel (0-255) into the three model channels.
    fn apply(&self, [r, g, b]: [f32; 3]) -> [f32; 3] {
        match self {
            Self::Identity => [r, g, b],
            Self::Symmetric => [r / 127.5 - 1.0, g / 127.5 - 1.0, b / 127.5 - 1.0],
            Self::Caffe => [
                b - CAFFE_MEAN_BGR[0],
                g - CAFFE_MEAN_BGR[1],
                r - CAFFE_MEAN_BGR[2],
            ],
            Self::Torch => {
                let rgb = [r, g, b];
                let mut out = [0.0; 3];
                for c in 0..3 {
                    out[c] = (rgb[c] / 255.0 - TORCH_MEAN[c]) / TORCH_STD[c];
                }
                out
            }
        }
    }
}

/// Where an image comes from.
#[derive(Debug, Clone)]
pub enum ImageSource {
    Path(PathBuf),
    Bytes(Vec<u8>),
    /// `data:image/...;base64,...`
    DataUrl(String),
}

impl From<&Path> for ImageSource {
    fn from(path: &Path) -> Self {
        Self::Path(path.to_path_buf())
    }
}

impl From<PathBuf> for ImageSource {
    fn from(path: PathBuf) -> Self {
        Self::Path(path)
    }
}

impl From<&str> for ImageSource {
    fn from(path: &str) -> Self {
        Self::Path(PathBuf::from(path))
    }
}

impl From<Vec<u8>> for ImageSource {
    fn from(bytes: Vec<u8>) -> Self {
        Self::Bytes(bytes)
    }
}

/// Check that `path` names a readable regular file.
pub fn validate_image_path(path: &Path) -> Result<()> {
    let rendered = path.to_string_lossy();
    if rendered.trim().is_empty() {
        return Err(Error::InvalidImageSource("image path is empty".into()));
    }
    if rendered.starts_with("data:") {
        return Err(Error::InvalidImageSource(
            "data URL passed as a file path; the image was not uploaded".into(),
        ));
    }
    if !path.exists() {
        return Err(Error::ImageNotFound(path.to_path_buf()));
    }
    if !path.is_file() {
        return Err(Error::InvalidImageSource(format!(
            "path is not a file: {}",
            path.display()
        )));
    }
    Ok(())
}

fn decode_data_url(data_url: &str) -> Result<Vec<u8>> {
    let base64_prefix = ";base64,";
    match data_url.find(base64_prefix) {
        Some(idx) => base64::engine::general_purpose::STANDARD
            .decode(&data_url[idx + base64_prefix.len()..])
            .map_err(|_| Error::InvalidBase64),
        None => Err(Error::InvalidImageSource(
            "data URL is not base64 encoded".into(),
        )),
    }
}

/// Decode an image source into pixels.
pub fn decode_image(source: &ImageSource) -> Result<DynamicImage> {
    match source {
        ImageSource::Path(path) => {
            validate_image_path(path)?;
            Ok(image::open(path)?)
        }
        ImageSource::Bytes(bytes) => Ok(image::load_from_memory(bytes)?),
        ImageSource::DataUrl(url) => Ok(image::load_from_memory(&decode_data_url(url)?)?),
    }
}

/// Resize and normalize an already-decoded image into a model input.
pub fn prepare(image: &DynamicImage, architecture: Architecture) -> ArrayD<f32> {
    let (width, height) = architecture.input_size();
    let normalization = architecture.normalization();
    let rgb = image.resize_exact(width, height, FilterType::Nearest).to_rgb8();

    let mut buffer = Array4::<f32>::zeros((1, height as usize, width as usize, 3));
    for (x, y, pixel) in rgb.enumerate_pixels() {
        let [r, g, b] = pixel.0;
        let channels = normalization.apply([r as f32, g as f32, b as f32]);
        for (c, value) in channels.into_iter().enumerate() {
            buffer[[0, y as usize, x as usize, c]] = value;
        }
    }
    buffer.into_dyn()
}

/// Decode `source` and build the input buffer for `architecture`.
pub fn build_input(source: &ImageSource, architecture: Architecture) -> Result<ArrayD<f32>> {
    let image = decode_image(source)?;
    Ok(prepare(&image, architecture))
}

/// Basic facts about an image file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageMetadata {
    pub file_size: u64,
    pub width: u32,
    pub height: u32,
    pub format: String,
}

/// Read size, dimensions and format without decoding pixel data.
pub fn image_metadata(path: &Path) -> Result<ImageMetadata> {
    validate_image_path(path)?;
    let file_size = std::fs::metadata(path)?.len();

    let reader = ImageReader::open(path)?.with_guessed_format()?;
    let format = reader
        .format()
        .map(|f| format!("{:?}", f).to_uppercase())
        .unwrap_or_else(|| "UNKNOWN".to_string());
    let (width, height) = reader.into_dimensions()?;

    Ok(ImageMetadata {
        file_size,
        width,
        height,
        format,
    })
}
