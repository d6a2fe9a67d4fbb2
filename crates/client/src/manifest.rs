//! The asset manifest: URLs guaranteed to be cached at install time.

use reqwest::Url;

use crate::fetch::is_same_origin;
use sitecache_core::Error;

/// A fixed ordered list of same-origin URLs seeded at install time.
///
/// Built once from configured origin-relative paths; static for the process
/// lifetime.
#[derive(Debug, Clone)]
pub struct AssetManifest {
    urls: Vec<Url>,
}

impl AssetManifest {
    /// Resolve origin-relative paths against the origin, preserving order.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidUrl` if a path cannot be joined onto the
    /// origin or resolves outside it.
    pub fn from_paths(origin: &Url, paths: &[String]) -> Result<Self, Error> {
        let mut urls = Vec::with_capacity(paths.len());
        for path in paths {
            let url = origin
                .join(path)
                .map_err(|e| Error::InvalidUrl(format!("{path}: {e}")))?;
            if !is_same_origin(origin, &url) {
                return Err(Error::InvalidUrl(format!("{path}: escapes origin {origin}")));
            }
            urls.push(url);
        }
        Ok(Self { urls })
    }

    /// The manifest URLs, in install order.
    pub fn urls(&self) -> &[Url] {
        &self.urls
    }

    pub fn len(&self) -> usize {
        self.urls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.urls.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_paths_resolves_against_origin() {
        let origin = Url::parse("https://example.com").unwrap();
        let paths = vec!["/".to_string(), "/index.html".to_string(), "/css/style.css".to_string()];
        let manifest = AssetManifest::from_paths(&origin, &paths).unwrap();

        assert_eq!(manifest.len(), 3);
        assert_eq!(manifest.urls()[0].as_str(), "https://example.com/");
        assert_eq!(manifest.urls()[1].as_str(), "https://example.com/index.html");
        assert_eq!(manifest.urls()[2].as_str(), "https://example.com/css/style.css");
    }

    #[test]
    fn test_from_paths_preserves_order() {
        let origin = Url::parse("http://localhost:8000").unwrap();
        let paths = vec!["/js/main.js".to_string(), "/".to_string()];
        let manifest = AssetManifest::from_paths(&origin, &paths).unwrap();

        assert_eq!(manifest.urls()[0].path(), "/js/main.js");
        assert_eq!(manifest.urls()[1].path(), "/");
    }

    #[test]
    fn test_from_paths_rejects_escaping_origin() {
        let origin = Url::parse("https://example.com").unwrap();
        let paths = vec!["https://evil.example.net/x".to_string()];
        let result = AssetManifest::from_paths(&origin, &paths);
        assert!(matches!(result, Err(Error::InvalidUrl(_))));
    }

    #[test]
    fn test_from_paths_rejects_other_port_on_same_host() {
        let origin = Url::parse("http://localhost:8000").unwrap();
        let paths = vec!["http://localhost:9000/x".to_string()];
        let result = AssetManifest::from_paths(&origin, &paths);
        assert!(matches!(result, Err(Error::InvalidUrl(_))));
    }

    #[test]
    fn test_empty_manifest() {
        let origin = Url::parse("https://example.com").unwrap();
        let manifest = AssetManifest::from_paths(&origin, &[]).unwrap();
        assert!(manifest.is_empty());
    }
}
