use crate::config::ImageFormat;
use crate::params::RequestDescriptor;
use crate::transform::TransformFactory;
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

/// Fit modes for resizing into a `w` x `h` box
#[derive(Debug, PartialEq, Eq, Clone, Copy, Default)]
pub enum FitMode {
    #[default]
    Cover,
    Contain,
    Fill,
    Inside,
    Outside,
}

impl fmt::Display for FitMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FitMode::Cover => write!(f, "cover"),
            FitMode::Contain => write!(f, "contain"),
            FitMode::Fill => write!(f, "fill"),
            FitMode::Inside => write!(f, "inside"),
            FitMode::Outside => write!(f, "outside"),
        }
    }
}

impl FromStr for FitMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "cover" => Ok(FitMode::Cover),
            "contain" => Ok(FitMode::Contain),
            "fill" => Ok(FitMode::Fill),
            "inside" => Ok(FitMode::Inside),
            "outside" => Ok(FitMode::Outside),
            _ => Err(format!("Invalid fit mode: {}", s)),
        }
    }
}

/// The recognized directives of one request, in canonical order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageConfig {
    directives: Vec<(String, String)>,
    source_format: ImageFormat,
}

impl ImageConfig {
    pub fn new(directives: Vec<(String, String)>, source_format: ImageFormat) -> Self {
        Self { directives, source_format }
    }

    /// First value of a directive.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.directives
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// First value among several aliases, earliest alias first.
    pub fn get_any(&self, keys: &[&str]) -> Option<&str> {
        keys.iter().find_map(|k| self.get(k))
    }

    pub fn contains(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    /// Parses a directive, treating unparsable values as absent.
    pub fn parse<T: FromStr>(&self, keys: &[&str]) -> Option<T> {
        self.get_any(keys).and_then(|v| v.parse().ok())
    }

    /// Presence flag: `flip`, `flip=` and `flip=true` are set; `flip=false` and `flip=0` are not.
    pub fn flag(&self, key: &str) -> bool {
        match self.get(key) {
            Some(v) => !matches!(v.to_ascii_lowercase().as_str(), "false" | "0" | "no"),
            None => false,
        }
    }

    pub fn directives(&self) -> &[(String, String)] {
        &self.directives
    }

    pub fn source_format(&self) -> ImageFormat {
        self.source_format
    }

    /// The requested `format`, or the source format when absent or unknown.
    pub fn output_format(&self) -> ImageFormat {
        self.parse(&["format"]).unwrap_or(self.source_format)
    }

    /// `quality` when it is within 1..=100.
    pub fn quality(&self) -> Option<u8> {
        self.parse::<u8>(&["quality", "q"]).filter(|q| (1..=100).contains(q))
    }
}

/// Keeps the directives some factory recognizes.
///
/// Returns `None` when nothing is recognized; the request is then served
/// through an empty pipeline.
pub fn resolve_config(
    request: &RequestDescriptor,
    factories: &[Arc<dyn TransformFactory>],
) -> Option<ImageConfig> {
    let source_format = request.source_format()?;
    let known: BTreeSet<&str> = factories
        .iter()
        .flat_map(|f| f.directives().iter().copied())
        .collect();

    let directives: Vec<(String, String)> = request
        .search_params
        .iter()
        .filter(|(k, _)| known.contains(k.as_str()))
        .cloned()
        .collect();

    if directives.is_empty() {
        return None;
    }
    Some(ImageConfig::new(directives, source_format))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AllowList;
    use crate::params::normalize;
    use crate::transform::builtin_factories;

    fn config_for(uri: &str) -> Option<ImageConfig> {
        let req = normalize(uri, &AllowList::Any).unwrap();
        resolve_config(&req, &builtin_factories())
    }

    #[test]
    fn unrecognized_directives_are_dropped() {
        let cfg = config_for("/a.png?w=10&utm_source=mail").unwrap();
        assert_eq!(
            cfg.directives(),
            &[("format".to_string(), "png".to_string()), ("w".to_string(), "10".to_string())]
        );
    }

    #[test]
    fn output_format_defaults_to_source() {
        let cfg = config_for("/a.png?w=10").unwrap();
        assert_eq!(cfg.output_format(), ImageFormat::png);

        let cfg = config_for("/a.png?format=webp").unwrap();
        assert_eq!(cfg.output_format(), ImageFormat::webp);

        let cfg = config_for("/a.jpg?format=tiff&w=5").unwrap();
        assert_eq!(cfg.output_format(), ImageFormat::jpeg);
    }

    #[test]
    fn quality_bounds() {
        assert_eq!(config_for("/a.jpg?quality=60").unwrap().quality(), Some(60));
        assert_eq!(config_for("/a.jpg?quality=0").unwrap().quality(), None);
        assert_eq!(config_for("/a.jpg?quality=150").unwrap().quality(), None);
    }

    #[test]
    fn flags() {
        let cfg = config_for("/a.jpg?flip&flop=false&grayscale=true").unwrap();
        assert!(cfg.flag("flip"));
        assert!(!cfg.flag("flop"));
        assert!(cfg.flag("grayscale"));
        assert!(!cfg.flag("invert"));
    }

    #[test]
    fn no_configuration_without_recognized_directives() {
        let req = RequestDescriptor::new("/a.png", vec![("v".into(), "3".into())]);
        assert!(resolve_config(&req, &builtin_factories()).is_none());
    }
}
