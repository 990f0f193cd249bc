//! Image decoding and tensor preparation.
//!
//! Every embedder feeds the same tensor: the image decoded from its sniffed
//! format, converted to RGB, resized so the shorter side equals `resize`,
//! center-cropped to `crop`×`crop`, then normalized per channel with the
//! ImageNet statistics. The layout is `[1, 3, crop, crop]` (NCHW).

use image::imageops::{self, FilterType};
use image::RgbImage;
use ndarray::Array4;

use cinematch_core::config::EmbeddingConfig;
use cinematch_core::error::EmbedError;

/// Per-channel mean used for normalization (RGB order).
pub const IMAGENET_MEAN: [f32; 3] = [0.485, 0.456, 0.406];
/// Per-channel standard deviation used for normalization (RGB order).
pub const IMAGENET_STD: [f32; 3] = [0.229, 0.224, 0.225];

/// Deterministic resize, crop and normalize pipeline.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Preprocessor {
    resize: u32,
    crop: u32,
}

impl Preprocessor {
    /// `crop` is clamped to `resize` so the crop always fits.
    pub fn new(resize: u32, crop: u32) -> Self {
        let resize = resize.max(1);
        Self {
            resize,
            crop: crop.clamp(1, resize),
        }
    }

    pub fn from_config(config: &EmbeddingConfig) -> Self {
        Self::new(config.resize, config.crop)
    }

    pub fn crop(&self) -> u32 {
        self.crop
    }

    /// Decode arbitrary image bytes into RGB.
    pub fn decode(&self, bytes: &[u8]) -> Result<RgbImage, EmbedError> {
        if bytes.is_empty() {
            return Err(EmbedError::Decode("empty image payload".to_string()));
        }
        let img = image::load_from_memory(bytes).map_err(|e| EmbedError::Decode(e.to_string()))?;
        if img.width() == 0 || img.height() == 0 {
            return Err(EmbedError::Decode("image has no pixels".to_string()));
        }
        Ok(img.to_rgb8())
    }

    /// Shorter side to `resize`, then a centered `crop` square.
    ///
    /// The crop window is cut in source coordinates before any scaling, so
    /// the resized buffer is never larger than `crop`×`crop` whatever the
    /// aspect ratio.
    pub fn resize_and_crop(&self, rgb: &RgbImage) -> RgbImage {
        let (w, h) = rgb.dimensions();
        let side = source_window(w.min(h), self.resize, self.crop);
        let left = (w - side) / 2;
        let top = (h - side) / 2;
        let window = imageops::crop_imm(rgb, left, top, side, side).to_image();
        imageops::resize(&window, self.crop, self.crop, FilterType::Triangle)
    }

    /// Full pipeline from encoded bytes to a normalized NCHW tensor.
    pub fn tensor(&self, bytes: &[u8]) -> Result<Array4<f32>, EmbedError> {
        let rgb = self.decode(bytes)?;
        let cropped = self.resize_and_crop(&rgb);
        Ok(normalize(&cropped))
    }
}

impl Default for Preprocessor {
    fn default() -> Self {
        Self::new(256, 224)
    }
}

/// Side of the source square that maps onto the crop after scaling
/// `short` to `resize`.
fn source_window(short: u32, resize: u32, crop: u32) -> u32 {
    let side = (short as f64 * crop as f64 / resize as f64).round() as u32;
    side.clamp(1, short)
}

fn normalize(rgb: &RgbImage) -> Array4<f32> {
    let (w, h) = rgb.dimensions();
    let mut tensor = Array4::<f32>::zeros((1, 3, h as usize, w as usize));
    for (x, y, pixel) in rgb.enumerate_pixels() {
        for c in 0..3 {
            let value = pixel.0[c] as f32 / 255.0;
            tensor[[0, c, y as usize, x as usize]] = (value - IMAGENET_MEAN[c]) / IMAGENET_STD[c];
        }
    }
    tensor
}

#[cfg(test)]
pub(crate) mod test_images {
    use image::{ImageFormat, Rgb, RgbImage};
    use std::io::Cursor;

    /// Encode a `w`×`h` image filled by `paint` in the given format.
    pub fn encode(w: u32, h: u32, format: ImageFormat, paint: impl Fn(u32, u32) -> [u8; 3]) -> Vec<u8> {
        let img = RgbImage::from_fn(w, h, |x, y| Rgb(paint(x, y)));
        let mut out = Cursor::new(Vec::new());
        img.write_to(&mut out, format).unwrap();
        out.into_inner()
    }

    pub fn solid_png(w: u32, h: u32, rgb: [u8; 3]) -> Vec<u8> {
        encode(w, h, ImageFormat::Png, |_, _| rgb)
    }

    pub fn gradient_png(w: u32, h: u32) -> Vec<u8> {
        encode(w, h, ImageFormat::Png, |x, y| {
            [(x * 255 / w.max(1)) as u8, (y * 255 / h.max(1)) as u8, 96]
        })
    }
}

#[cfg(test)]
mod tests {
    use super::test_images::*;
    use super::*;
    use image::ImageFormat;

    #[test]
    fn test_tensor_shape() {
        let pre = Preprocessor::default();
        let tensor = pre.tensor(&gradient_png(300, 450)).unwrap();
        assert_eq!(tensor.shape(), &[1, 3, 224, 224]);
    }

    #[test]
    fn test_landscape_and_portrait_crop_to_square() {
        let pre = Preprocessor::new(32, 24);
        for (w, h) in [(100, 40), (40, 100), (24, 24), (7, 3)] {
            let rgb = pre.decode(&gradient_png(w, h)).unwrap();
            let cropped = pre.resize_and_crop(&rgb);
            assert_eq!(cropped.dimensions(), (24, 24), "input {}x{}", w, h);
        }
    }

    #[test]
    fn test_normalization_uses_channel_statistics() {
        let pre = Preprocessor::new(8, 8);
        let tensor = pre.tensor(&solid_png(8, 8, [255, 0, 128])).unwrap();

        let expected_r = (1.0 - IMAGENET_MEAN[0]) / IMAGENET_STD[0];
        let expected_g = (0.0 - IMAGENET_MEAN[1]) / IMAGENET_STD[1];
        let expected_b = (128.0 / 255.0 - IMAGENET_MEAN[2]) / IMAGENET_STD[2];
        assert!((tensor[[0, 0, 3, 3]] - expected_r).abs() < 1e-5);
        assert!((tensor[[0, 1, 3, 3]] - expected_g).abs() < 1e-5);
        assert!((tensor[[0, 2, 3, 3]] - expected_b).abs() < 1e-5);
    }

    #[test]
    fn test_format_is_sniffed() {
        let pre = Preprocessor::new(16, 16);
        let jpeg = encode(20, 20, ImageFormat::Jpeg, |_, _| [10, 200, 30]);
        let png = solid_png(20, 20, [10, 200, 30]);
        assert!(pre.tensor(&jpeg).is_ok());
        assert!(pre.tensor(&png).is_ok());
    }

    #[test]
    fn test_identical_bytes_identical_tensor() {
        let pre = Preprocessor::default();
        let bytes = gradient_png(320, 480);
        assert_eq!(pre.tensor(&bytes).unwrap(), pre.tensor(&bytes).unwrap());
    }

    #[test]
    fn test_garbage_is_decode_error() {
        let pre = Preprocessor::default();
        assert!(matches!(pre.tensor(b"definitely not an image"), Err(EmbedError::Decode(_))));
        assert!(matches!(pre.tensor(&[]), Err(EmbedError::Decode(_))));
    }

    #[test]
    fn test_extreme_aspect_ratio_stays_bounded() {
        let pre = Preprocessor::default();
        let sliver = solid_png(1, 40_000, [40, 80, 120]);
        let tensor = pre.tensor(&sliver).unwrap();
        assert_eq!(tensor.shape(), &[1, 3, 224, 224]);

        let wide = pre.decode(&solid_png(40_000, 1, [40, 80, 120])).unwrap();
        assert_eq!(pre.resize_and_crop(&wide).dimensions(), (224, 224));
    }

    #[test]
    fn test_source_window_tracks_crop_ratio() {
        assert_eq!(source_window(512, 256, 224), 448);
        assert_eq!(source_window(256, 256, 224), 224);
        assert_eq!(source_window(1, 256, 224), 1);
    }

    #[test]
    fn test_crop_clamped_to_resize() {
        let pre = Preprocessor::new(10, 50);
        assert_eq!(pre.crop(), 10);
    }
}
