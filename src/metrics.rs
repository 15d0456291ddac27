use std::sync::atomic::{AtomicU64, Ordering};

/// Global metrics tracking
pub struct Metrics {
    pub cache_hits: AtomicU64,
    pub cache_misses: AtomicU64,
    pub transforms: AtomicU64,
    pub passthroughs: AtomicU64,
    pub not_modified: AtomicU64,
    pub errors: AtomicU64,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            cache_hits: AtomicU64::new(0),
            cache_misses: AtomicU64::new(0),
            transforms: AtomicU64::new(0),
            passthroughs: AtomicU64::new(0),
            not_modified: AtomicU64::new(0),
            errors: AtomicU64::new(0),
        }
    }

    pub fn record_hit(&self) { self.cache_hits.fetch_add(1, Ordering::Relaxed); }
    pub fn record_miss(&self) { self.cache_misses.fetch_add(1, Ordering::Relaxed); }
    pub fn record_transform(&self) { self.transforms.fetch_add(1, Ordering::Relaxed); }
    pub fn record_passthrough(&self) { self.passthroughs.fetch_add(1, Ordering::Relaxed); }
    pub fn record_not_modified(&self) { self.not_modified.fetch_add(1, Ordering::Relaxed); }
    pub fn record_error(&self) { self.errors.fetch_add(1, Ordering::Relaxed); }

    /// Prometheus text exposition format.
    pub fn render(&self) -> String {
        let counters = [
            ("cache_hits_total", "Total number of cache hits", &self.cache_hits),
            ("cache_misses_total", "Total number of cache misses", &self.cache_misses),
            ("transforms_total", "Total number of image transformations", &self.transforms),
            ("passthroughs_total", "Requests handed to the next handler", &self.passthroughs),
            ("not_modified_total", "Responses answered with 304", &self.not_modified),
            ("errors_total", "Total number of errors", &self.errors),
        ];

        let mut out = String::new();
        for (name, help, value) in counters {
            out.push_str(&format!(
                "# HELP imageserve_{name} {help}\n# TYPE imageserve_{name} counter\nimageserve_{name} {}\n",
                value.load(Ordering::Relaxed)
            ));
        }
        out
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

lazy_static::lazy_static! {
    pub static ref METRICS: Metrics = Metrics::new();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_every_counter() {
        let metrics = Metrics::new();
        metrics.record_hit();
        metrics.record_hit();
        metrics.record_error();

        let text = metrics.render();
        assert!(text.contains("imageserve_cache_hits_total 2\n"));
        assert!(text.contains("imageserve_errors_total 1\n"));
        assert!(text.contains("# TYPE imageserve_not_modified_total counter"));
        assert_eq!(text.lines().filter(|l| !l.starts_with('#')).count(), 6);
    }
}
