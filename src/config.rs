use crate::fetch::SourceLoader;
use crate::params::RequestDescriptor;
use crate::transform::TransformFactory;
use http::HeaderMap;
use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;

/// Default encoder quality when no `quality` directive is present.
pub const DEFAULT_QUALITY: u8 = 80;
pub const DEFAULT_MAX_INPUT_SIZE: usize = 16 * 1024 * 1024;
/// Largest width or height a resize may produce.
pub const DEFAULT_MAX_DIMENSION: u32 = 4096;

#[allow(non_camel_case_types)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Deserialize, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageFormat {
    jpeg,
    png,
    webp,
    avif,
    gif,
}

impl std::fmt::Display for ImageFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ImageFormat::jpeg => write!(f, "jpeg"),
            ImageFormat::png => write!(f, "png"),
            ImageFormat::webp => write!(f, "webp"),
            ImageFormat::avif => write!(f, "avif"),
            ImageFormat::gif => write!(f, "gif"),
        }
    }
}

impl std::str::FromStr for ImageFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "jpeg" | "jpg" => Ok(ImageFormat::jpeg),
            "png" => Ok(ImageFormat::png),
            "webp" => Ok(ImageFormat::webp),
            "avif" => Ok(ImageFormat::avif),
            "gif" => Ok(ImageFormat::gif),
            _ => Err(format!("Invalid format: {}", s)),
        }
    }
}

impl ImageFormat {
    /// Maps a file extension (without the dot) to a format.
    pub fn from_extension(ext: &str) -> Option<Self> {
        ext.parse().ok()
    }

    pub fn content_type(&self) -> &'static str {
        match self {
            ImageFormat::jpeg => "image/jpeg",
            ImageFormat::png => "image/png",
            ImageFormat::gif => "image/gif",
            ImageFormat::webp => "image/webp",
            ImageFormat::avif => "image/avif",
        }
    }
}

/// A configuration value that is either fixed or computed from the request.
#[derive(Clone)]
pub enum PerRequest<T> {
    Static(T),
    Computed(Arc<dyn Fn(&RequestDescriptor) -> T + Send + Sync>),
}

impl<T: Clone> PerRequest<T> {
    pub fn computed<F>(f: F) -> Self
    where
        F: Fn(&RequestDescriptor) -> T + Send + Sync + 'static,
    {
        PerRequest::Computed(Arc::new(f))
    }

    pub fn resolve(&self, request: &RequestDescriptor) -> T {
        match self {
            PerRequest::Static(value) => value.clone(),
            PerRequest::Computed(f) => f(request),
        }
    }
}

impl<T: std::fmt::Debug> std::fmt::Debug for PerRequest<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PerRequest::Static(value) => f.debug_tuple("Static").field(value).finish(),
            PerRequest::Computed(_) => f.write_str("Computed(..)"),
        }
    }
}

/// Restricts which query parameters a deployment accepts.
#[derive(Clone, Default)]
pub enum AllowList {
    #[default]
    Any,
    Names(BTreeSet<String>),
    Predicate(Arc<dyn Fn(&str, &str) -> bool + Send + Sync>),
}

impl AllowList {
    pub fn names<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        AllowList::Names(names.into_iter().map(Into::into).collect())
    }

    pub fn predicate<F>(f: F) -> Self
    where
        F: Fn(&str, &str) -> bool + Send + Sync + 'static,
    {
        AllowList::Predicate(Arc::new(f))
    }

    pub fn permits(&self, key: &str, value: &str) -> bool {
        match self {
            AllowList::Any => true,
            AllowList::Names(names) => names.contains(key),
            AllowList::Predicate(f) => f(key, value),
        }
    }
}

impl std::fmt::Debug for AllowList {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AllowList::Any => f.write_str("Any"),
            AllowList::Names(names) => f.debug_tuple("Names").field(names).finish(),
            AllowList::Predicate(_) => f.write_str("Predicate(..)"),
        }
    }
}

/// Where transformed images are persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheBackend {
    Disabled,
    /// One file per entry under the directory.
    Disk(PathBuf),
    /// A sled database rooted at the directory.
    Sled(PathBuf),
}

#[derive(Clone)]
pub struct ImageServeConfig {
    pub cache: CacheBackend,
    pub public_dir: PathBuf,
    pub root_dir: PathBuf,
    pub remove_exif: PerRequest<bool>,
    pub headers: PerRequest<HeaderMap>,
    pub extra_transforms: Vec<Arc<dyn TransformFactory>>,
    pub allow: AllowList,
    /// Consulted before the filesystem fallback.
    pub loader: Option<Arc<dyn SourceLoader>>,
    pub max_input_size: usize, // bytes
    pub max_width: u32,
    pub max_height: u32,
    pub coalesce_requests: bool,
}

impl Default for ImageServeConfig {
    fn default() -> Self {
        Self {
            cache: CacheBackend::Disk(PathBuf::from("./cache")),
            public_dir: PathBuf::from("./public"),
            root_dir: PathBuf::from("."),
            remove_exif: PerRequest::Static(true),
            headers: PerRequest::Static(HeaderMap::new()),
            extra_transforms: Vec::new(),
            allow: AllowList::Any,
            loader: None,
            max_input_size: DEFAULT_MAX_INPUT_SIZE,
            max_width: DEFAULT_MAX_DIMENSION,
            max_height: DEFAULT_MAX_DIMENSION,
            coalesce_requests: false,
        }
    }
}

impl std::fmt::Debug for ImageServeConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImageServeConfig")
            .field("cache", &self.cache)
            .field("public_dir", &self.public_dir)
            .field("root_dir", &self.root_dir)
            .field("remove_exif", &self.remove_exif)
            .field("headers", &self.headers)
            .field("extra_transforms", &self.extra_transforms.len())
            .field("allow", &self.allow)
            .field("loader", &self.loader.is_some())
            .field("max_input_size", &self.max_input_size)
            .field("max_width", &self.max_width)
            .field("max_height", &self.max_height)
            .field("coalesce_requests", &self.coalesce_requests)
            .finish()
    }
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Max input size must be > 0")] InvalidMaxInput,
    #[error("Max output dimensions must be > 0")] InvalidMaxDimension,
    #[error("Cache directory cannot be empty")] EmptyCacheDir,
    #[error("Unknown cache backend: {0}")] UnknownCacheBackend(String),
    #[error("Invalid value for {0}: {1}")] InvalidValue(&'static str, String),
}

impl ImageServeConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_input_size == 0 { return Err(ConfigError::InvalidMaxInput); }
        if self.max_width == 0 || self.max_height == 0 { return Err(ConfigError::InvalidMaxDimension); }
        match &self.cache {
            CacheBackend::Disk(dir) | CacheBackend::Sled(dir) if dir.as_os_str().is_empty() => {
                Err(ConfigError::EmptyCacheDir)
            }
            _ => Ok(()),
        }
    }

    /// Builds a configuration from `IMAGESERVE_*` environment variables,
    /// falling back to [`Default`] for anything unset.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub(crate) fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut cfg = Self::default();

        let cache_dir = lookup("IMAGESERVE_CACHE_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("./cache"));
        cfg.cache = match lookup("IMAGESERVE_CACHE").as_deref() {
            None | Some("disk") => CacheBackend::Disk(cache_dir),
            Some("sled") => CacheBackend::Sled(cache_dir),
            Some("off") | Some("disabled") | Some("false") => CacheBackend::Disabled,
            Some(other) => return Err(ConfigError::UnknownCacheBackend(other.to_string())),
        };

        if let Some(dir) = lookup("IMAGESERVE_PUBLIC_DIR") { cfg.public_dir = dir.into(); }
        if let Some(dir) = lookup("IMAGESERVE_ROOT_DIR") { cfg.root_dir = dir.into(); }
        if let Some(v) = lookup("IMAGESERVE_REMOVE_EXIF") {
            cfg.remove_exif = PerRequest::Static(parse_bool("IMAGESERVE_REMOVE_EXIF", &v)?);
        }
        if let Some(v) = lookup("IMAGESERVE_COALESCE") {
            cfg.coalesce_requests = parse_bool("IMAGESERVE_COALESCE", &v)?;
        }
        if let Some(v) = lookup("IMAGESERVE_MAX_INPUT_SIZE") {
            cfg.max_input_size = v
                .parse()
                .map_err(|_| ConfigError::InvalidValue("IMAGESERVE_MAX_INPUT_SIZE", v))?;
        }
        if let Some(v) = lookup("IMAGESERVE_MAX_WIDTH") {
            cfg.max_width = v
                .parse()
                .map_err(|_| ConfigError::InvalidValue("IMAGESERVE_MAX_WIDTH", v))?;
        }
        if let Some(v) = lookup("IMAGESERVE_MAX_HEIGHT") {
            cfg.max_height = v
                .parse()
                .map_err(|_| ConfigError::InvalidValue("IMAGESERVE_MAX_HEIGHT", v))?;
        }
        if let Some(v) = lookup("IMAGESERVE_ALLOW") {
            cfg.allow = AllowList::names(
                v.split(',').map(str::trim).filter(|s| !s.is_empty()).map(String::from),
            );
        }

        Ok(cfg)
    }
}

fn parse_bool(name: &'static str, value: &str) -> Result<bool, ConfigError> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidValue(name, value.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn defaults_validate() {
        assert!(ImageServeConfig::default().validate().is_ok());
    }

    #[test]
    fn zero_input_size_rejected() {
        let cfg = ImageServeConfig { max_input_size: 0, ..Default::default() };
        assert!(matches!(cfg.validate(), Err(ConfigError::InvalidMaxInput)));
    }

    #[test]
    fn output_bounds_from_env() {
        let cfg = ImageServeConfig::from_lookup(lookup_from(&[
            ("IMAGESERVE_MAX_WIDTH", "2048"),
        ]))
        .unwrap();
        assert_eq!((cfg.max_width, cfg.max_height), (2048, DEFAULT_MAX_DIMENSION));

        let cfg = ImageServeConfig { max_height: 0, ..Default::default() };
        assert!(matches!(cfg.validate(), Err(ConfigError::InvalidMaxDimension)));
        assert!(ImageServeConfig::from_lookup(lookup_from(&[("IMAGESERVE_MAX_HEIGHT", "big")])).is_err());
    }

    #[test]
    fn env_selects_backend() {
        let cfg = ImageServeConfig::from_lookup(lookup_from(&[
            ("IMAGESERVE_CACHE", "sled"),
            ("IMAGESERVE_CACHE_DIR", "/tmp/imgs"),
        ]))
        .unwrap();
        assert_eq!(cfg.cache, CacheBackend::Sled(PathBuf::from("/tmp/imgs")));

        let cfg = ImageServeConfig::from_lookup(lookup_from(&[("IMAGESERVE_CACHE", "off")])).unwrap();
        assert_eq!(cfg.cache, CacheBackend::Disabled);

        assert!(ImageServeConfig::from_lookup(lookup_from(&[("IMAGESERVE_CACHE", "redis")])).is_err());
    }

    #[test]
    fn env_allow_list_and_flags() {
        let cfg = ImageServeConfig::from_lookup(lookup_from(&[
            ("IMAGESERVE_ALLOW", "w, h,format"),
            ("IMAGESERVE_REMOVE_EXIF", "no"),
            ("IMAGESERVE_COALESCE", "1"),
        ]))
        .unwrap();
        assert!(cfg.allow.permits("w", "10"));
        assert!(cfg.allow.permits("format", "webp"));
        assert!(!cfg.allow.permits("blur", "3"));
        assert!(cfg.coalesce_requests);
        let req = RequestDescriptor::new("/a.png", Vec::new());
        assert!(!cfg.remove_exif.resolve(&req));
    }

    #[test]
    fn per_request_computed() {
        let policy = PerRequest::computed(|req: &RequestDescriptor| req.path.starts_with("/private"));
        assert!(policy.resolve(&RequestDescriptor::new("/private/a.jpg", Vec::new())));
        assert!(!policy.resolve(&RequestDescriptor::new("/public/a.jpg", Vec::new())));
    }

    #[test]
    fn format_parsing() {
        assert_eq!("JPG".parse::<ImageFormat>().unwrap(), ImageFormat::jpeg);
        assert_eq!(ImageFormat::from_extension("webp"), Some(ImageFormat::webp));
        assert_eq!(ImageFormat::from_extension("bmp"), None);
        assert_eq!(ImageFormat::avif.content_type(), "image/avif");
        assert_eq!(ImageFormat::png.content_type(), "image/png");
    }
}
