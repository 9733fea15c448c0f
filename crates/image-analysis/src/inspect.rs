//! CPU-side image inspection: digest, perceptual hash, quality metrics

use image::DynamicImage;
use img_hash::{HashAlg, HasherConfig};
use magazine_common::{ImageQuality, PerceptualHash};

/// blake3 digest of the raw bytes, hex encoded
pub fn content_digest(bytes: &[u8]) -> String {
    blake3::hash(bytes).to_hex().to_string()
}

/// Decode bytes into an image
pub fn decode(bytes: &[u8]) -> Result<DynamicImage, String> {
    image::load_from_memory(bytes).map_err(|e| format!("Failed to decode image: {e}"))
}

/// Gradient hash of `hash_size` x `hash_size` bits
pub fn perceptual_hash(image: &DynamicImage, hash_size: u32) -> Result<PerceptualHash, String> {
    // img_hash works on its own image 0.23 types; hand the pixels over raw
    let rgba = image.to_rgba8();
    let (width, height) = rgba.dimensions();

    use img_hash::image::{ImageBuffer, Rgba};
    let img_old: ImageBuffer<Rgba<u8>, Vec<u8>> = ImageBuffer::from_raw(width, height, rgba.into_raw())
        .ok_or_else(|| "Failed to convert image buffer".to_string())?;
    let img = img_hash::image::DynamicImage::ImageRgba8(img_old);

    let hasher = HasherConfig::new()
        .hash_alg(HashAlg::Gradient)
        .hash_size(hash_size, hash_size)
        .to_hasher();

    Ok(PerceptualHash {
        hash_size,
        bytes: hasher.hash_image(&img).as_bytes().to_vec(),
    })
}

/// Sharpness, contrast and exposure of the grey-level image
pub fn assess_quality(image: &DynamicImage) -> ImageQuality {
    let gray = image.to_luma8();
    let (width, height) = gray.dimensions();
    let n = f64::from(width) * f64::from(height);
    if n == 0.0 {
        return ImageQuality {
            width,
            height,
            sharpness: 0.0,
            contrast: 0.0,
            brightness: 0.0,
            overall: 0.0,
        };
    }

    let (mean, std) = mean_std(gray.as_raw().iter().map(|&v| f64::from(v)), n);

    let laplacian = imageproc::filter::laplacian_filter(&gray);
    let (_, lap_std) = mean_std(laplacian.as_raw().iter().map(|&v| f64::from(v)), n);
    let lap_variance = lap_std * lap_std;

    let sharpness = (lap_variance / 1000.0).min(1.0) as f32;
    let contrast = (std / 255.0).min(1.0) as f32;
    let brightness = (mean / 255.0) as f32;
    let exposure = 1.0 - ((brightness - 0.5).abs() * 2.0);

    ImageQuality {
        width,
        height,
        sharpness,
        contrast,
        brightness,
        overall: (sharpness + contrast + exposure) / 3.0,
    }
}

fn mean_std(values: impl Iterator<Item = f64>, n: f64) -> (f64, f64) {
    let (sum, sum_sq) = values.fold((0.0, 0.0), |(s, sq), v| (s + v, sq + v * v));
    let mean = sum / n;
    let variance = (sum_sq / n - mean * mean).max(0.0);
    (mean, variance.sqrt())
}

/// Content type from the object key's extension
pub fn mime_for_key(key: &str) -> &'static str {
    let ext = key
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "png" => "image/png",
        "gif" => "image/gif",
        "webp" => "image/webp",
        _ => "image/jpeg",
    }
}
