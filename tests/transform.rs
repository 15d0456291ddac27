use image::GenericImageView;
use imageserve::config::ImageFormat;
use imageserve::params::RequestDescriptor;
use imageserve::transform::{
    build_pipeline, builtin_factories, execute, resolve_config, ImageHandle,
};

fn png_bytes(w: u32, h: u32) -> Vec<u8> {
    let img = image::DynamicImage::new_rgba8(w, h);
    let mut png = Vec::new();
    img.write_to(&mut std::io::Cursor::new(&mut png), image::ImageFormat::Png)
        .unwrap();
    png
}

/// `ftyp` + `ispe` boxes only: enough to identify and size, not to decode.
fn avif_bytes(w: u32, h: u32) -> Vec<u8> {
    let mut bytes = vec![0, 0, 0, 0x18];
    bytes.extend_from_slice(b"ftypavif\0\0\0\0mif1miaf");
    bytes.extend_from_slice(&[0, 0, 0, 0x14]);
    bytes.extend_from_slice(b"ispe\0\0\0\0");
    bytes.extend_from_slice(&w.to_be_bytes());
    bytes.extend_from_slice(&h.to_be_bytes());
    bytes
}

fn pipeline_for(query: &[(&str, &str)]) -> Vec<std::sync::Arc<dyn imageserve::transform::Transform>> {
    let params = query.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
    let request = RequestDescriptor::new("/a.png", params);
    let factories = builtin_factories();
    resolve_config(&request, &factories)
        .map(|config| build_pipeline(&config, &factories))
        .unwrap_or_default()
}

#[tokio::test]
async fn empty_pipeline_only_probes() {
    let png = png_bytes(30, 20);
    let out = execute(Vec::new(), ImageHandle::new(png.clone()), false).await.unwrap();

    assert_eq!(out.bytes().as_ref(), png.as_slice());
    let meta = out.metadata().unwrap();
    assert_eq!((meta.format, meta.width, meta.height), (ImageFormat::png, 30, 20));
}

#[tokio::test]
async fn remove_exif_reencodes_without_ops() {
    let png = png_bytes(8, 8);
    let out = execute(Vec::new(), ImageHandle::new(png), true).await.unwrap();
    let meta = out.metadata().unwrap();
    assert_eq!((meta.format, meta.width, meta.height), (ImageFormat::png, 8, 8));
    assert!(image::load_from_memory(out.bytes()).is_ok());
}

#[tokio::test]
async fn resize_then_convert() {
    let transforms = pipeline_for(&[("w", "40"), ("format", "jpeg"), ("q", "60")]);
    let names: Vec<_> = transforms.iter().map(|t| t.name()).collect();
    assert_eq!(names, vec!["resize", "format"]);

    let out = execute(transforms, ImageHandle::new(png_bytes(80, 60)), false)
        .await
        .unwrap();
    let meta = out.metadata().unwrap();
    assert_eq!((meta.format, meta.width, meta.height), (ImageFormat::jpeg, 40, 30));

    let decoded = image::load_from_memory_with_format(out.bytes(), image::ImageFormat::Jpeg).unwrap();
    assert_eq!(decoded.dimensions(), (40, 30));
}

#[tokio::test]
async fn rotate_swaps_dimensions() {
    let transforms = pipeline_for(&[("rotate", "90"), ("format", "png")]);
    let out = execute(transforms, ImageHandle::new(png_bytes(10, 4)), false)
        .await
        .unwrap();
    let meta = out.metadata().unwrap();
    assert_eq!((meta.width, meta.height), (4, 10));
}

#[tokio::test]
async fn same_format_without_quality_is_a_noop() {
    assert!(pipeline_for(&[("format", "png"), ("v", "2")]).is_empty());
}

#[tokio::test]
async fn corrupt_source_is_an_error() {
    let transforms = pipeline_for(&[("w", "10"), ("format", "png")]);
    let result = execute(transforms, ImageHandle::new(&b"garbage"[..]), false).await;
    assert!(result.is_err());
}

#[tokio::test]
async fn huge_resize_request_is_bounded() {
    let transforms = pipeline_for(&[("w", "4000000000"), ("h", "1"), ("fit", "fill"), ("format", "png")]);
    let out = execute(transforms, ImageHandle::new(png_bytes(2, 2)), false)
        .await
        .unwrap();
    let meta = out.metadata().unwrap();
    assert_eq!((meta.width, meta.height), (4096, 1));
}

#[tokio::test]
async fn avif_source_kept_as_is_under_exif_removal() {
    let avif = avif_bytes(320, 200);
    let out = execute(Vec::new(), ImageHandle::new(avif.clone()), true).await.unwrap();

    assert_eq!(out.bytes().as_ref(), avif.as_slice());
    let meta = out.metadata().unwrap();
    assert_eq!((meta.format, meta.width, meta.height), (ImageFormat::avif, 320, 200));
}
