//! Transform operations and the factories that build them from directives.
//!
//! Each [`TransformFactory`] declares the directive names it understands and
//! turns a resolved [`ImageConfig`] into at most one [`Transform`]. The
//! pipeline for a request is every factory's output, in registration order.

use crate::config::{ImageFormat, DEFAULT_MAX_DIMENSION};
use crate::transform::{resize_image, FitMode, ImageConfig};
use crate::ImageServeError;
use image::DynamicImage;
use std::sync::Arc;

/// Encoder settings that transforms may change along the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutputOptions {
    pub format: ImageFormat,
    pub quality: u8,
}

/// A single image operation.
pub trait Transform: Send + Sync {
    fn name(&self) -> &'static str;

    fn apply(
        &self,
        image: DynamicImage,
        output: &mut OutputOptions,
    ) -> Result<DynamicImage, ImageServeError>;
}

/// Builds a [`Transform`] from the directives it recognizes.
pub trait TransformFactory: Send + Sync {
    /// Directive names this factory reads.
    fn directives(&self) -> &[&'static str];

    /// Returns `None` when the config does not call for this operation.
    fn create(&self, config: &ImageConfig) -> Option<Arc<dyn Transform>>;
}

/// Built-in factories, in application order, with the default output bounds.
pub fn builtin_factories() -> Vec<Arc<dyn TransformFactory>> {
    builtin_factories_bounded(DEFAULT_MAX_DIMENSION, DEFAULT_MAX_DIMENSION)
}

/// Built-in factories whose resize output never exceeds
/// `max_width` x `max_height`.
pub fn builtin_factories_bounded(max_width: u32, max_height: u32) -> Vec<Arc<dyn TransformFactory>> {
    vec![
        Arc::new(RotateFactory),
        Arc::new(FlagFactory { directive: "flip", op: DynamicImage::flipv }),
        Arc::new(FlagFactory { directive: "flop", op: DynamicImage::fliph }),
        Arc::new(ResizeFactory { max_width, max_height }),
        Arc::new(BlurFactory),
        Arc::new(FlagFactory { directive: "grayscale", op: DynamicImage::grayscale }),
        Arc::new(FlagFactory { directive: "invert", op: invert }),
        Arc::new(FormatFactory),
    ]
}

/// Instantiates the transforms `config` asks for.
pub fn build_pipeline(
    config: &ImageConfig,
    factories: &[Arc<dyn TransformFactory>],
) -> Vec<Arc<dyn Transform>> {
    factories.iter().filter_map(|f| f.create(config)).collect()
}

fn invert(img: &DynamicImage) -> DynamicImage {
    let mut out = img.clone();
    out.invert();
    out
}

struct ResizeFactory {
    max_width: u32,
    max_height: u32,
}

struct Resize {
    width: Option<u32>,
    height: Option<u32>,
    fit: FitMode,
    bounds: (u32, u32),
}

impl TransformFactory for ResizeFactory {
    fn directives(&self) -> &[&'static str] {
        &["w", "width", "h", "height", "fit"]
    }

    fn create(&self, config: &ImageConfig) -> Option<Arc<dyn Transform>> {
        let width = config
            .parse::<u32>(&["w", "width"])
            .filter(|w| *w > 0)
            .map(|w| w.min(self.max_width));
        let height = config
            .parse::<u32>(&["h", "height"])
            .filter(|h| *h > 0)
            .map(|h| h.min(self.max_height));
        if width.is_none() && height.is_none() {
            return None;
        }
        let fit = config.parse(&["fit"]).unwrap_or_default();
        Some(Arc::new(Resize {
            width,
            height,
            fit,
            bounds: (self.max_width, self.max_height),
        }))
    }
}

impl Transform for Resize {
    fn name(&self) -> &'static str {
        "resize"
    }

    fn apply(&self, image: DynamicImage, _output: &mut OutputOptions) -> Result<DynamicImage, ImageServeError> {
        Ok(resize_image(image, self.width, self.height, self.fit, self.bounds))
    }
}

struct RotateFactory;

struct Rotate {
    quarter_turns: u8,
}

impl TransformFactory for RotateFactory {
    fn directives(&self) -> &[&'static str] {
        &["rotate"]
    }

    // Only right angles are supported; anything else is ignored.
    fn create(&self, config: &ImageConfig) -> Option<Arc<dyn Transform>> {
        let degrees = config.parse::<i32>(&["rotate"])?.rem_euclid(360);
        match degrees {
            90 | 180 | 270 => Some(Arc::new(Rotate { quarter_turns: (degrees / 90) as u8 })),
            _ => None,
        }
    }
}

impl Transform for Rotate {
    fn name(&self) -> &'static str {
        "rotate"
    }

    fn apply(&self, image: DynamicImage, _output: &mut OutputOptions) -> Result<DynamicImage, ImageServeError> {
        Ok(match self.quarter_turns {
            1 => image.rotate90(),
            2 => image.rotate180(),
            _ => image.rotate270(),
        })
    }
}

struct BlurFactory;

struct Blur {
    sigma: f32,
}

impl TransformFactory for BlurFactory {
    fn directives(&self) -> &[&'static str] {
        &["blur"]
    }

    fn create(&self, config: &ImageConfig) -> Option<Arc<dyn Transform>> {
        let sigma = config.parse::<f32>(&["blur"]).filter(|s| s.is_finite() && *s > 0.0)?;
        Some(Arc::new(Blur { sigma: sigma.min(100.0) }))
    }
}

impl Transform for Blur {
    fn name(&self) -> &'static str {
        "blur"
    }

    fn apply(&self, image: DynamicImage, _output: &mut OutputOptions) -> Result<DynamicImage, ImageServeError> {
        Ok(image.blur(self.sigma))
    }
}

/// Boolean directives that map onto a single pixel operation.
struct FlagFactory {
    directive: &'static str,
    op: fn(&DynamicImage) -> DynamicImage,
}

struct Flag {
    name: &'static str,
    op: fn(&DynamicImage) -> DynamicImage,
}

impl TransformFactory for FlagFactory {
    fn directives(&self) -> &[&'static str] {
        std::slice::from_ref(&self.directive)
    }

    fn create(&self, config: &ImageConfig) -> Option<Arc<dyn Transform>> {
        config
            .flag(self.directive)
            .then(|| Arc::new(Flag { name: self.directive, op: self.op }) as Arc<dyn Transform>)
    }
}

impl Transform for Flag {
    fn name(&self) -> &'static str {
        self.name
    }

    fn apply(&self, image: DynamicImage, _output: &mut OutputOptions) -> Result<DynamicImage, ImageServeError> {
        Ok((self.op)(&image))
    }
}

struct FormatFactory;

struct Format {
    format: ImageFormat,
    quality: Option<u8>,
}

impl TransformFactory for FormatFactory {
    fn directives(&self) -> &[&'static str] {
        &["format", "quality", "q"]
    }

    // Re-encoding into the source format at default quality is not a transform.
    fn create(&self, config: &ImageConfig) -> Option<Arc<dyn Transform>> {
        let format = config.output_format();
        let quality = config.quality();
        if format == config.source_format() && quality.is_none() {
            return None;
        }
        Some(Arc::new(Format { format, quality }))
    }
}

impl Transform for Format {
    fn name(&self) -> &'static str {
        "format"
    }

    fn apply(&self, image: DynamicImage, output: &mut OutputOptions) -> Result<DynamicImage, ImageServeError> {
        output.format = self.format;
        if let Some(q) = self.quality {
            output.quality = q;
        }
        Ok(image)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AllowList, DEFAULT_QUALITY};
    use crate::params::normalize;
    use crate::transform::resolve_config;
    use image::GenericImageView;

    fn pipeline_for(uri: &str) -> Vec<Arc<dyn Transform>> {
        let factories = builtin_factories();
        let req = normalize(uri, &AllowList::Any).unwrap();
        resolve_config(&req, &factories)
            .map(|cfg| build_pipeline(&cfg, &factories))
            .unwrap_or_default()
    }

    fn names(pipeline: &[Arc<dyn Transform>]) -> Vec<&'static str> {
        pipeline.iter().map(|t| t.name()).collect()
    }

    #[test]
    fn pass_through_has_empty_pipeline() {
        assert!(pipeline_for("/a.png?v=2").is_empty());
        assert!(pipeline_for("/a.png?format=png").is_empty());
        assert!(pipeline_for("/a.jpg?format=jpeg").is_empty());
    }

    #[test]
    fn operations_follow_factory_order() {
        let pipeline = pipeline_for("/a.png?format=webp&grayscale&w=10&rotate=90&flip");
        assert_eq!(names(&pipeline), vec!["rotate", "flip", "resize", "grayscale", "format"]);
    }

    #[test]
    fn invalid_values_ignored() {
        assert!(pipeline_for("/a.png?w=abc").is_empty());
        assert!(pipeline_for("/a.png?w=0").is_empty());
        assert!(pipeline_for("/a.png?rotate=45").is_empty());
        assert!(pipeline_for("/a.png?blur=-1").is_empty());
    }

    #[test]
    fn quality_alone_reencodes() {
        let pipeline = pipeline_for("/a.jpg?quality=40");
        assert_eq!(names(&pipeline), vec!["format"]);

        let mut output = OutputOptions { format: ImageFormat::jpeg, quality: DEFAULT_QUALITY };
        pipeline[0].apply(DynamicImage::new_rgb8(1, 1), &mut output).unwrap();
        assert_eq!(output, OutputOptions { format: ImageFormat::jpeg, quality: 40 });
    }

    #[test]
    fn oversized_dimensions_are_clamped() {
        let factories = builtin_factories_bounded(300, 200);
        let req = normalize("/a.png?w=4000000000&h=1&fit=fill", &AllowList::Any).unwrap();
        let cfg = resolve_config(&req, &factories).unwrap();
        let pipeline = build_pipeline(&cfg, &factories);
        assert_eq!(names(&pipeline), vec!["resize"]);

        let mut output = OutputOptions { format: ImageFormat::png, quality: DEFAULT_QUALITY };
        let img = pipeline[0].apply(DynamicImage::new_rgb8(2, 2), &mut output).unwrap();
        assert_eq!(img.dimensions(), (300, 1));
    }

    #[test]
    fn rotate_and_resize_apply() {
        let mut output = OutputOptions { format: ImageFormat::png, quality: DEFAULT_QUALITY };
        let mut img = DynamicImage::new_rgb8(40, 20);
        for t in pipeline_for("/a.png?rotate=-90&h=10") {
            img = t.apply(img, &mut output).unwrap();
        }
        assert_eq!(img.dimensions(), (5, 10));
    }
}
