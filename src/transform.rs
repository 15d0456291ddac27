pub mod params;
pub mod pipeline;

pub use params::{resolve_config, FitMode, ImageConfig};
pub use pipeline::{
    build_pipeline, builtin_factories, builtin_factories_bounded, OutputOptions, Transform,
    TransformFactory,
};

use crate::config::{ImageFormat, DEFAULT_QUALITY};
use crate::ImageServeError;
use bytes::Bytes;
use image::codecs::avif::AvifEncoder;
use image::codecs::jpeg::JpegEncoder;
use image::{DynamicImage, ExtendedColorType};
use image::GenericImageView;
use image::ImageEncoder;
use std::io::Cursor;
use std::sync::Arc;

/// Format and dimensions of an encoded image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageMetadata {
    pub format: ImageFormat,
    pub width: u32,
    pub height: u32,
}

/// Encoded image bytes, plus metadata once a pass through [`execute`] has
/// attached it.
#[derive(Debug, Clone)]
pub struct ImageHandle {
    bytes: Bytes,
    metadata: Option<ImageMetadata>,
}

impl ImageHandle {
    pub fn new(bytes: impl Into<Bytes>) -> Self {
        Self { bytes: bytes.into(), metadata: None }
    }

    pub fn bytes(&self) -> &Bytes {
        &self.bytes
    }

    pub fn into_bytes(self) -> Bytes {
        self.bytes
    }

    pub fn metadata(&self) -> Option<&ImageMetadata> {
        self.metadata.as_ref()
    }
}

/// Runs `transforms` in order over `handle`.
///
/// With no transforms and no EXIF removal the bytes are left untouched and
/// only metadata is attached; this is how cache hits and pass-through
/// requests get their content type without re-running a pipeline. AVIF
/// sources take this path even when EXIF removal is requested. Anything
/// else decodes, transforms and re-encodes on the blocking pool. The encoders
/// write no EXIF, so re-encoding is what strips it.
pub async fn execute(
    transforms: Vec<Arc<dyn Transform>>,
    handle: ImageHandle,
    remove_exif: bool,
) -> Result<ImageHandle, ImageServeError> {
    // no AVIF decoder is linked
    let reencode = remove_exif && sniff_format(&handle.bytes) != Some(ImageFormat::avif);
    if transforms.is_empty() && !reencode {
        if handle.metadata.is_some() {
            return Ok(handle);
        }
        let metadata = probe(&handle.bytes)?;
        return Ok(ImageHandle { metadata: Some(metadata), ..handle });
    }

    tokio::task::spawn_blocking(move || run_pipeline(&transforms, &handle.bytes))
        .await
        .map_err(|e| ImageServeError::InternalError(e.to_string()))?
}

fn run_pipeline(
    transforms: &[Arc<dyn Transform>],
    bytes: &[u8],
) -> Result<ImageHandle, ImageServeError> {
    let (mut img, source_format) = decode_image(bytes)?;
    let mut output = OutputOptions {
        format: source_format.unwrap_or(ImageFormat::png),
        quality: DEFAULT_QUALITY,
    };

    for transform in transforms {
        tracing::trace!("Applying transform {}", transform.name());
        img = transform.apply(img, &mut output)?;
    }

    let encoded = encode_image(&img, output.format, output.quality)?;
    let (width, height) = img.dimensions();
    Ok(ImageHandle {
        bytes: Bytes::from(encoded),
        metadata: Some(ImageMetadata { format: output.format, width, height }),
    })
}

/// Reads format and dimensions from encoded bytes without decoding pixels.
pub fn probe(bytes: &[u8]) -> Result<ImageMetadata, ImageServeError> {
    let format = sniff_format(bytes)
        .ok_or_else(|| ImageServeError::TransformError("Unrecognized image data".into()))?;

    let (width, height) = match format {
        // No AVIF decoder is linked; the size lives in the `ispe` property.
        ImageFormat::avif => avif_dimensions(bytes)
            .ok_or_else(|| ImageServeError::TransformError("AVIF without ispe box".into()))?,
        other => image::ImageReader::with_format(Cursor::new(bytes), codec_format(other))
            .into_dimensions()
            .map_err(|e| ImageServeError::TransformError(e.to_string()))?,
    };

    Ok(ImageMetadata { format, width, height })
}

/// Detects a supported format from magic bytes.
pub fn sniff_format(bytes: &[u8]) -> Option<ImageFormat> {
    match image::guess_format(bytes) {
        Ok(image::ImageFormat::Jpeg) => Some(ImageFormat::jpeg),
        Ok(image::ImageFormat::Png) => Some(ImageFormat::png),
        Ok(image::ImageFormat::WebP) => Some(ImageFormat::webp),
        Ok(image::ImageFormat::Avif) => Some(ImageFormat::avif),
        Ok(image::ImageFormat::Gif) => Some(ImageFormat::gif),
        Ok(_) => None,
        // ftyp boxes vary in size, which the magic-number table does not cover
        Err(_) => match bytes.get(4..12) {
            Some(b"ftypavif") | Some(b"ftypavis") => Some(ImageFormat::avif),
            _ => None,
        },
    }
}

fn avif_dimensions(bytes: &[u8]) -> Option<(u32, u32)> {
    let pos = bytes.windows(4).position(|w| w == b"ispe")?;
    // box type, then 4 bytes of version/flags
    let body = bytes.get(pos + 8..pos + 16)?;
    let width = u32::from_be_bytes(body[0..4].try_into().ok()?);
    let height = u32::from_be_bytes(body[4..8].try_into().ok()?);
    (width > 0 && height > 0).then_some((width, height))
}

fn codec_format(format: ImageFormat) -> image::ImageFormat {
    match format {
        ImageFormat::jpeg => image::ImageFormat::Jpeg,
        ImageFormat::png => image::ImageFormat::Png,
        ImageFormat::webp => image::ImageFormat::WebP,
        ImageFormat::avif => image::ImageFormat::Avif,
        ImageFormat::gif => image::ImageFormat::Gif,
    }
}

/// Decodes raw image bytes into memory-resident representation.
///
/// # Returns
/// Tuple of `(DynamicImage, Option<ImageFormat>)` where format is detected
/// when it matches a supported output format.
///
/// # Errors
/// Returns `ImageServeError::TransformError` if the format cannot be detected
/// from magic bytes or the data is corrupted.
pub fn decode_image(bytes: &[u8]) -> Result<(DynamicImage, Option<ImageFormat>), ImageServeError> {
    let guessed = image::guess_format(bytes)
        .map_err(|e| ImageServeError::TransformError(e.to_string()))?;

    let img = image::load_from_memory_with_format(bytes, guessed)
        .map_err(|e| ImageServeError::TransformError(e.to_string()))?;

    Ok((img, sniff_format(bytes)))
}

/// Resizes an image toward `w` x `h` according to `fit`.
///
/// When only one dimension is given the other follows the source aspect
/// ratio. With neither, the image is returned unchanged.
///
/// - `Cover`: fill the box exactly, cropping the overflow
/// - `Contain`: fit inside the box, preserving aspect ratio
/// - `Fill`: stretch to the box
/// - `Inside`: like `Contain`, but never enlarge
/// - `Outside`: cover the box, preserving aspect ratio, without cropping
///
/// Output dimensions are clamped to `1..=max` on each axis, so the pixel
/// buffer never outgrows `max.0 * max.1`.
pub fn resize_image(
    img: DynamicImage,
    w: Option<u32>,
    h: Option<u32>,
    fit: FitMode,
    max: (u32, u32),
) -> DynamicImage {
    let (orig_w, orig_h) = img.dimensions();

    let (target_w, target_h) = match (w, h) {
        (None, None) => return img,
        (Some(w), Some(h)) => (w, h),
        (Some(w), None) => (w, scale(orig_h, w, orig_w)),
        (None, Some(h)) => (scale(orig_w, h, orig_h), h),
    };
    let (max_w, max_h) = (max.0.max(1), max.1.max(1));
    let (target_w, target_h) = (target_w.clamp(1, max_w), target_h.clamp(1, max_h));

    // Lanczos3 provides best quality for downsampling
    let filter = image::imageops::FilterType::Lanczos3;
    match fit {
        FitMode::Cover => img.resize_to_fill(target_w, target_h, filter),
        FitMode::Contain => img.resize(target_w, target_h, filter),
        FitMode::Fill => img.resize_exact(target_w, target_h, filter),
        FitMode::Inside => {
            if orig_w <= target_w && orig_h <= target_h {
                img
            } else {
                img.resize(target_w, target_h, filter)
            }
        }
        FitMode::Outside => {
            let ratio = f64::max(
                target_w as f64 / orig_w as f64,
                target_h as f64 / orig_h as f64,
            );
            // covering the box may still overshoot the bounds on the other axis
            let ratio = ratio
                .min(max_w as f64 / orig_w as f64)
                .min(max_h as f64 / orig_h as f64);
            let out_w = ((orig_w as f64 * ratio).round() as u32).clamp(1, max_w);
            let out_h = ((orig_h as f64 * ratio).round() as u32).clamp(1, max_h);
            img.resize_exact(out_w, out_h, filter)
        }
    }
}

fn scale(other: u32, target: u32, along: u32) -> u32 {
    let ratio = target as f32 / along.max(1) as f32;
    ((other as f32 * ratio).round() as u32).max(1)
}

/// Encodes image to specified format with quality control.
///
/// - **JPEG**: RGB color space, DCT-based lossy compression
/// - **PNG**: lossless, keeps alpha when present
/// - **WebP**: RGBA lossy encoding via libwebp
/// - **AVIF**: RGBA with AV1 compression (slowest, best compression)
/// - **GIF**: single frame, RGBA palette quantization
///
/// Quality is clamped to [1, 100] and ignored by lossless formats.
pub fn encode_image(
    img: &DynamicImage,
    fmt: ImageFormat,
    quality: u8,
) -> Result<Vec<u8>, ImageServeError> {
    let mut out = Vec::new();
    let q = quality.clamp(1, 100);

    match fmt {
        ImageFormat::jpeg => {
            let rgb = img.to_rgb8();
            let (w, h) = rgb.dimensions();
            let enc = JpegEncoder::new_with_quality(&mut out, q);
            enc.write_image(rgb.as_raw(), w, h, ExtendedColorType::Rgb8)
                .map_err(|e| ImageServeError::TransformError(e.to_string()))?;
        }
        ImageFormat::png => {
            let converted = if img.color().has_alpha() {
                DynamicImage::ImageRgba8(img.to_rgba8())
            } else {
                DynamicImage::ImageRgb8(img.to_rgb8())
            };
            converted
                .write_to(&mut Cursor::new(&mut out), image::ImageFormat::Png)
                .map_err(|e| ImageServeError::TransformError(e.to_string()))?;
        }
        ImageFormat::webp => {
            let rgba = img.to_rgba8();
            let (w, h) = rgba.dimensions();
            let encoded = webp::Encoder::from_rgba(rgba.as_raw(), w, h).encode(q as f32);
            out.extend_from_slice(&encoded);
        }
        ImageFormat::avif => {
            let rgba = img.to_rgba8();
            let (w, h) = rgba.dimensions();
            // Speed 4 balances encoding time and compression ratio
            let enc = AvifEncoder::new_with_speed_quality(&mut out, 4, q);
            enc.write_image(rgba.as_raw(), w, h, ExtendedColorType::Rgba8)
                .map_err(|e| ImageServeError::TransformError(e.to_string()))?;
        }
        ImageFormat::gif => {
            DynamicImage::ImageRgba8(img.to_rgba8())
                .write_to(&mut Cursor::new(&mut out), image::ImageFormat::Gif)
                .map_err(|e| ImageServeError::TransformError(e.to_string()))?;
        }
    }

    Ok(out)
}
