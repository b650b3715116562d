use std::io::Cursor;

use image::{DynamicImage, GrayImage, ImageFormat, Luma};
use imageproc::filter::median_filter;

use crate::error::ProcessError;

/// Luma value above which a pixel becomes white.
pub const BINARIZE_THRESHOLD: u8 = 128;

/// Radius of the median filter run after binarization (3x3 window).
pub const DENOISE_RADIUS: u32 = 1;

fn load(image_data: &[u8]) -> Result<DynamicImage, ProcessError> {
    image::load_from_memory(image_data)
        .map_err(|e| ProcessError::CorruptInput(format!("Failed to load image: {}", e)))
}

fn encode_png(img: &DynamicImage) -> Result<Vec<u8>, ProcessError> {
    let mut png_data = Vec::new();
    img.write_to(&mut Cursor::new(&mut png_data), ImageFormat::Png)
        .map_err(|e| ProcessError::OcrFailed(format!("Failed to convert image: {}", e)))?;
    Ok(png_data)
}

/// Re-encodes any supported raster format as PNG for Tesseract.
pub fn to_png(image_data: &[u8]) -> Result<Vec<u8>, ProcessError> {
    encode_png(&load(image_data)?)
}

/// Grayscale conversion followed by fixed-threshold binarization.
pub fn binarize(img: &DynamicImage, threshold: u8) -> GrayImage {
    let mut gray = img.to_luma8();
    for pixel in gray.pixels_mut() {
        let Luma([value]) = *pixel;
        *pixel = Luma([if value > threshold { 255 } else { 0 }]);
    }
    gray
}

/// Median filter that removes isolated specks left by binarization.
pub fn denoise(img: &GrayImage) -> GrayImage {
    median_filter(img, DENOISE_RADIUS, DENOISE_RADIUS)
}

/// Cleans a scan up for recognition and returns it as PNG bytes.
pub fn preprocess(image_data: &[u8]) -> Result<Vec<u8>, ProcessError> {
    let _span = tracing::debug_span!("processor.preprocess").entered();

    let img = load(image_data)?;
    let binary = binarize(&img, BINARIZE_THRESHOLD);
    encode_png(&DynamicImage::ImageLuma8(denoise(&binary)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};

    fn sample_png() -> Vec<u8> {
        let mut img = RgbImage::new(5, 1);
        img.put_pixel(0, 0, Rgb([0, 0, 0]));
        img.put_pixel(1, 0, Rgb([100, 100, 100]));
        img.put_pixel(2, 0, Rgb([128, 128, 128]));
        img.put_pixel(3, 0, Rgb([200, 200, 200]));
        img.put_pixel(4, 0, Rgb([255, 255, 255]));
        let mut bytes = Vec::new();
        DynamicImage::ImageRgb8(img)
            .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
            .unwrap();
        bytes
    }

    #[test]
    fn test_binarize_threshold() {
        let img = image::load_from_memory(&sample_png()).unwrap();
        let binary = binarize(&img, BINARIZE_THRESHOLD);
        let values: Vec<u8> = binary.pixels().map(|p| p.0[0]).collect();
        assert_eq!(values, vec![0, 0, 0, 255, 255]);
    }

    #[test]
    fn test_denoise_removes_isolated_speck() {
        let mut img = GrayImage::from_pixel(9, 9, Luma([255]));
        for y in 1..=3 {
            for x in 1..=3 {
                img.put_pixel(x, y, Luma([0]));
            }
        }
        img.put_pixel(6, 6, Luma([0]));

        let cleaned = denoise(&img);
        assert_eq!(cleaned.get_pixel(6, 6).0[0], 255);
        assert_eq!(cleaned.get_pixel(2, 2).0[0], 0);
    }

    #[test]
    fn test_preprocess_produces_grayscale_png() {
        let out = preprocess(&sample_png()).unwrap();
        let decoded = image::load_from_memory(&out).unwrap();
        assert_eq!(decoded.color(), image::ColorType::L8);
        assert_eq!(decoded.width(), 5);
    }

    #[test]
    fn test_to_png_keeps_dimensions() {
        let out = to_png(&sample_png()).unwrap();
        let decoded = image::load_from_memory(&out).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (5, 1));
    }

    #[test]
    fn test_invalid_image_is_corrupt_input() {
        match preprocess(b"not an image") {
            Err(ProcessError::CorruptInput(msg)) => assert!(msg.contains("Failed to load image")),
            other => panic!("expected CorruptInput, got {:?}", other.map(|v| v.len())),
        }
    }
}
