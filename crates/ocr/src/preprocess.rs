use image::{DynamicImage, GrayImage, ImageBuffer, Rgba, RgbaImage};
use std::path::Path;
use thiserror::Error;

/// Intensities strictly below this become black, everything else white.
pub const BINARIZE_THRESHOLD: u8 = 128;

const BLACK: Rgba<u8> = Rgba([0, 0, 0, 255]);
const WHITE: Rgba<u8> = Rgba([255, 255, 255, 255]);

#[derive(Debug, Error)]
pub enum PreprocessError {
    #[error("Failed to decode image: {0}")]
    Decode(#[source] image::ImageError),
    #[error("Failed to write processed image: {0}")]
    Encode(#[source] image::ImageError),
}

/// Decode PNG / JPEG bytes into a pixel grid.
pub fn decode(data: &[u8]) -> Result<DynamicImage, PreprocessError> {
    image::load_from_memory(data).map_err(PreprocessError::Decode)
}

/// Decode, binarize, and write the result to `dest` as PNG.
/// Returns the dimensions of the written image.
pub fn prepare_for_ocr(data: &[u8], dest: &Path) -> Result<(u32, u32), PreprocessError> {
    let binarized = normalize(decode(data)?);
    write_png(&binarized, dest)?;
    Ok(binarized.dimensions())
}

/// Grayscale + hard threshold.
pub fn normalize(img: DynamicImage) -> RgbaImage {
    binarize(&to_grayscale(&img))
}

/// 8-bit luminance using the decoder's standard RGB-to-luma weights.
pub fn to_grayscale(img: &DynamicImage) -> GrayImage {
    img.to_luma8()
}

/// Map every pixel to pure black or pure white, fully opaque.
pub fn binarize(gray: &GrayImage) -> RgbaImage {
    ImageBuffer::from_fn(gray.width(), gray.height(), |x, y| {
        if gray.get_pixel(x, y)[0] < BINARIZE_THRESHOLD {
            BLACK
        } else {
            WHITE
        }
    })
}

pub fn write_png(img: &RgbaImage, path: &Path) -> Result<(), PreprocessError> {
    img.save_with_format(path, image::ImageFormat::Png)
        .map_err(PreprocessError::Encode)
}
