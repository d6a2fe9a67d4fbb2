//! The cache manager: install, activate, and the request path.
//!
//! Implements a cache-first-with-background-revalidation policy over a
//! versioned response store. Only same-origin GETs participate; everything
//! else is forwarded to the network untouched. The store and the network
//! client are injected handles, never globals, so the manager is testable
//! against fakes.

use std::sync::{Arc, Mutex};

use bytes::Bytes;
use reqwest::{Method, Url};

use crate::fetch::{Fetch, FetchResponse, is_same_origin};
use crate::manifest::AssetManifest;
use sitecache_core::store::entry_key;
use sitecache_core::{AppConfig, CacheStore, CachedResponse, Error};

/// Manager lifecycle, mirroring a service worker's install/activate phases.
///
/// `Installing -> Waiting` once the manifest write has finished (or the
/// attempt has failed); `Waiting -> Active` once stale generations have been
/// evicted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Installing,
    Waiting,
    Active,
}

/// An intercepted request.
#[derive(Debug, Clone)]
pub struct Request {
    pub method: Method,
    pub url: Url,
}

impl Request {
    pub fn get(url: Url) -> Self {
        Self { method: Method::GET, url }
    }
}

/// Where a response was resolved from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Source {
    Cache,
    Network,
}

/// A resolved response, delivered exactly once per request.
#[derive(Debug, Clone)]
pub struct Response {
    pub url: Url,
    pub status: u16,
    pub content_type: Option<String>,
    pub body: Bytes,
    pub source: Source,
}

impl Response {
    fn from_entry(url: Url, entry: CachedResponse) -> Self {
        Self {
            url,
            status: entry.status,
            content_type: entry.content_type,
            body: Bytes::from(entry.body),
            source: Source::Cache,
        }
    }

    fn from_network(fetched: FetchResponse) -> Self {
        Self {
            url: fetched.url,
            status: fetched.status.as_u16(),
            content_type: fetched.content_type,
            body: fetched.bytes,
            source: Source::Network,
        }
    }
}

/// Outcome of activation.
#[derive(Debug, Clone)]
pub struct ActivationReport {
    /// Generation tags that were evicted.
    pub evicted: Vec<String>,
}

/// Offline cache manager for a single origin.
pub struct CacheManager {
    store: CacheStore,
    fetcher: Arc<dyn Fetch>,
    origin: Url,
    version: String,
    manifest: AssetManifest,
    state: Mutex<LifecycleState>,
}

impl CacheManager {
    pub fn new(
        store: CacheStore,
        fetcher: Arc<dyn Fetch>,
        origin: Url,
        version: impl Into<String>,
        manifest: AssetManifest,
    ) -> Self {
        Self {
            store,
            fetcher,
            origin,
            version: version.into(),
            manifest,
            state: Mutex::new(LifecycleState::Installing),
        }
    }

    /// Build a manager from loaded configuration.
    pub fn from_config(store: CacheStore, fetcher: Arc<dyn Fetch>, config: &AppConfig) -> Result<Self, Error> {
        let origin = config
            .origin_url()
            .map_err(|e| Error::InvalidUrl(e.to_string()))?;
        let manifest = AssetManifest::from_paths(&origin, &config.precache)?;
        Ok(Self::new(store, fetcher, origin, config.cache_version.clone(), manifest))
    }

    /// Current lifecycle state.
    pub fn state(&self) -> LifecycleState {
        *self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn set_state(&self, next: LifecycleState) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        let prev = *state;
        tracing::debug!(from = ?prev, to = ?next, "lifecycle transition");
        *state = next;
    }

    /// Current generation tag.
    pub fn version(&self) -> &str {
        &self.version
    }

    /// Seed the store with the asset manifest, all-or-nothing.
    ///
    /// Every manifest URL must fetch with a success status. On any failure
    /// the whole attempt fails and nothing is written: no entries, no
    /// generation marker. Failed installs are not retried automatically.
    pub async fn install(&self) -> Result<(), Error> {
        self.set_state(LifecycleState::Installing);
        tracing::info!(
            generation = %self.version,
            assets = self.manifest.len(),
            "installing asset manifest"
        );

        let result = match self.fetch_manifest().await {
            Ok(entries) => {
                let written = self.store.install_generation(&self.version, &entries).await;
                if written.is_ok() {
                    tracing::info!(generation = %self.version, entries = entries.len(), "manifest installed");
                }
                written
            }
            Err(err) => Err(err),
        };
        if let Err(err) = &result {
            tracing::warn!(generation = %self.version, %err, "manifest install failed, nothing cached");
        }

        // The install attempt is over either way; a failed attempt still
        // reaches the waiting state so activation can run.
        self.set_state(LifecycleState::Waiting);
        result
    }

    async fn fetch_manifest(&self) -> Result<Vec<CachedResponse>, Error> {
        let mut entries = Vec::with_capacity(self.manifest.len());
        for url in self.manifest.urls() {
            let fetched = self
                .fetcher
                .fetch(Method::GET, url)
                .await
                .map_err(|e| Error::InstallFailed(format!("{url}: {e}")))?;
            if !fetched.status.is_success() {
                return Err(Error::InstallFailed(format!("{url}: status {}", fetched.status.as_u16())));
            }
            entries.push(self.entry_from(&fetched));
        }
        Ok(entries)
    }

    /// Evict every generation not matching the current tag, then go active.
    ///
    /// After this completes, at most one generation remains in the store and
    /// it is the current one, so no client ever mixes assets from two
    /// generations.
    pub async fn activate(&self) -> Result<ActivationReport, Error> {
        let mut evicted = Vec::new();
        for tag in self.store.list_generations().await? {
            if tag != self.version {
                let deleted = self.store.delete_generation(&tag).await?;
                tracing::info!(generation = %tag, entries = deleted, "evicted stale generation");
                evicted.push(tag);
            }
        }

        self.set_state(LifecycleState::Active);
        tracing::info!(generation = %self.version, evicted = evicted.len(), "cache manager active");
        Ok(ActivationReport { evicted })
    }

    /// Resolve a request, cache-first with background revalidation.
    ///
    /// Non-GET and cross-origin requests are forwarded and never touch the
    /// store. Forwarding still goes through the injected fetcher, so its
    /// timeout and byte limits apply, and a `Request` carries no body.
    /// Cache hits resolve immediately; the refresh runs as
    /// a detached task and only affects future lookups. Cold misses go to
    /// the network and are cached only on a success status; transport
    /// failures propagate unchanged.
    pub async fn handle_request(&self, request: Request) -> Result<Response, Error> {
        if request.method != Method::GET || !is_same_origin(&self.origin, &request.url) {
            tracing::debug!(method = %request.method, url = %request.url, "pass-through request");
            let fetched = self.fetcher.fetch(request.method, &request.url).await?;
            return Ok(Response::from_network(fetched));
        }

        let key = entry_key(request.method.as_str(), request.url.as_str());

        if let Some(entry) = self.store.get_entry(&self.version, &key).await? {
            tracing::debug!(url = %request.url, "cache hit");
            // The response is finalized before the refresh is spawned, so
            // this caller can never observe its own revalidation.
            let response = Response::from_entry(request.url.clone(), entry);
            self.spawn_revalidation(request.url, key);
            return Ok(response);
        }

        tracing::debug!(url = %request.url, "cache miss");
        let fetched = self.fetcher.fetch(Method::GET, &request.url).await?;
        if fetched.status.is_success() {
            self.store.put_entry(&self.entry_from(&fetched)).await?;
        }
        Ok(Response::from_network(fetched))
    }

    /// Refresh a cached entry from the network, detached from the caller.
    ///
    /// Every failure in here is deliberately discarded: the entry keeps its
    /// last good value until some later revalidation succeeds.
    fn spawn_revalidation(&self, url: Url, key: String) {
        let store = self.store.clone();
        let fetcher = Arc::clone(&self.fetcher);
        let version = self.version.clone();

        tokio::spawn(async move {
            match fetcher.fetch(Method::GET, &url).await {
                Ok(fetched) if fetched.status.is_success() => {
                    let entry = build_entry(&version, &key, &fetched);
                    if let Err(err) = store.put_entry(&entry).await {
                        tracing::debug!(url = %url, %err, "revalidation write failed, entry unchanged");
                    } else {
                        tracing::debug!(url = %url, "revalidated cache entry");
                    }
                }
                Ok(fetched) => {
                    tracing::debug!(
                        url = %url,
                        status = fetched.status.as_u16(),
                        "revalidation returned non-success, entry unchanged"
                    );
                }
                Err(err) => {
                    tracing::debug!(url = %url, %err, "revalidation fetch failed, entry unchanged");
                }
            }
        });
    }

    fn entry_from(&self, fetched: &FetchResponse) -> CachedResponse {
        let key = entry_key(Method::GET.as_str(), fetched.url.as_str());
        build_entry(&self.version, &key, fetched)
    }
}

fn build_entry(generation: &str, key: &str, fetched: &FetchResponse) -> CachedResponse {
    CachedResponse {
        generation: generation.to_string(),
        key: key.to_string(),
        method: Method::GET.as_str().to_string(),
        url: fetched.url.to_string(),
        status: fetched.status.as_u16(),
        content_type: fetched.content_type.clone(),
        headers_json: fetched.headers_json(),
        body: fetched.bytes.to_vec(),
        stored_at: chrono::Utc::now().to_rfc3339(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use reqwest::StatusCode;
    use reqwest::header::HeaderMap;
    use std::collections::HashMap;
    use std::time::Duration;
    use tokio::time::timeout;

    const ORIGIN: &str = "https://example.com";

    fn origin() -> Url {
        Url::parse(ORIGIN).unwrap()
    }

    fn canned(url: &Url, status: u16, body: &str) -> FetchResponse {
        FetchResponse {
            url: url.clone(),
            final_url: url.clone(),
            status: StatusCode::from_u16(status).unwrap(),
            content_type: Some("text/plain".to_string()),
            bytes: Bytes::copy_from_slice(body.as_bytes()),
            headers: HeaderMap::new(),
            fetch_ms: 1,
        }
    }

    /// Serves canned (status, body) pairs by URL and records every call.
    struct FakeFetch {
        routes: Mutex<HashMap<String, (u16, String)>>,
        calls: Mutex<Vec<(Method, String)>>,
    }

    impl FakeFetch {
        fn new(routes: &[(&str, u16, &str)]) -> Self {
            Self {
                routes: Mutex::new(
                    routes
                        .iter()
                        .map(|(url, status, body)| ((*url).to_string(), (*status, (*body).to_string())))
                        .collect(),
                ),
                calls: Mutex::new(Vec::new()),
            }
        }

        fn calls(&self) -> Vec<(Method, String)> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Fetch for FakeFetch {
        async fn fetch(&self, method: Method, url: &Url) -> Result<FetchResponse, Error> {
            self.calls.lock().unwrap().push((method, url.to_string()));
            let routes = self.routes.lock().unwrap();
            match routes.get(url.as_str()) {
                Some((status, body)) => Ok(canned(url, *status, body)),
                None => Err(Error::Http(format!("no route for {url}"))),
            }
        }
    }

    /// Never resolves; stands in for an unreachable or stalled network.
    struct HangingFetch;

    #[async_trait]
    impl Fetch for HangingFetch {
        async fn fetch(&self, _method: Method, _url: &Url) -> Result<FetchResponse, Error> {
            std::future::pending().await
        }
    }

    /// Always fails with a transport error.
    struct FailingFetch;

    #[async_trait]
    impl Fetch for FailingFetch {
        async fn fetch(&self, _method: Method, url: &Url) -> Result<FetchResponse, Error> {
            Err(Error::Http(format!("connection refused: {url}")))
        }
    }

    async fn make_manager(fetcher: Arc<dyn Fetch>, paths: &[&str]) -> CacheManager {
        let store = CacheStore::open_in_memory().await.unwrap();
        let paths: Vec<String> = paths.iter().map(|p| (*p).to_string()).collect();
        let manifest = AssetManifest::from_paths(&origin(), &paths).unwrap();
        CacheManager::new(store, fetcher, origin(), "v1", manifest)
    }

    fn seed_entry(url: &str, body: &str) -> CachedResponse {
        CachedResponse {
            generation: "v1".to_string(),
            key: entry_key("GET", url),
            method: "GET".to_string(),
            url: url.to_string(),
            status: 200,
            content_type: Some("text/plain".to_string()),
            headers_json: None,
            body: body.as_bytes().to_vec(),
            stored_at: chrono::Utc::now().to_rfc3339(),
        }
    }

    async fn wait_for_body(manager: &CacheManager, key: &str, expected: &[u8]) {
        for _ in 0..200 {
            if let Some(entry) = manager.store.get_entry("v1", key).await.unwrap()
                && entry.body == expected
            {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("store never reached expected body");
    }

    #[tokio::test]
    async fn test_install_populates_all_manifest_assets() {
        let fetcher = Arc::new(FakeFetch::new(&[
            ("https://example.com/", 200, "<html>"),
            ("https://example.com/index.html", 200, "<html>"),
            ("https://example.com/css/style.css", 200, "body{}"),
        ]));
        let manager = make_manager(fetcher, &["/", "/index.html", "/css/style.css"]).await;

        manager.install().await.unwrap();

        assert_eq!(manager.state(), LifecycleState::Waiting);
        assert!(manager.store.is_installed("v1").await.unwrap());
        for url in manager.manifest.urls() {
            let key = entry_key("GET", url.as_str());
            assert!(manager.store.has_entry("v1", &key).await.unwrap());
        }
    }

    #[tokio::test]
    async fn test_install_all_or_nothing_on_fetch_failure() {
        // /css/style.css has no route, so its fetch fails
        let fetcher = Arc::new(FakeFetch::new(&[("https://example.com/", 200, "<html>")]));
        let manager = make_manager(fetcher, &["/", "/css/style.css"]).await;

        let result = manager.install().await;

        assert!(matches!(result, Err(Error::InstallFailed(_))));
        assert!(!manager.store.is_installed("v1").await.unwrap());
        assert_eq!(manager.store.count_entries("v1").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_install_all_or_nothing_on_non_success_status() {
        let fetcher = Arc::new(FakeFetch::new(&[
            ("https://example.com/", 200, "<html>"),
            ("https://example.com/images/profile.jpg", 404, "not found"),
        ]));
        let manager = make_manager(fetcher, &["/", "/images/profile.jpg"]).await;

        let result = manager.install().await;

        assert!(matches!(result, Err(Error::InstallFailed(_))));
        assert_eq!(manager.store.count_entries("v1").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_activate_evicts_stale_generations() {
        let fetcher = Arc::new(FakeFetch::new(&[("https://example.com/", 200, "<html>")]));
        let manager = make_manager(fetcher, &["/"]).await;

        // leftovers from two earlier deployments
        let mut old = seed_entry("https://example.com/", "stale");
        old.generation = "v0".to_string();
        manager.store.put_entry(&old).await.unwrap();
        manager
            .store
            .install_generation("portfolio-old", &[])
            .await
            .unwrap();

        manager.install().await.unwrap();
        let report = manager.activate().await.unwrap();

        assert_eq!(manager.state(), LifecycleState::Active);
        assert_eq!(report.evicted.len(), 2);
        assert_eq!(manager.store.list_generations().await.unwrap(), vec!["v1".to_string()]);
    }

    #[tokio::test]
    async fn test_cache_first_resolves_while_network_hangs() {
        let manager = make_manager(Arc::new(HangingFetch), &[]).await;
        let url = "https://example.com/css/style.css";
        manager.store.put_entry(&seed_entry(url, "cached-css")).await.unwrap();

        let request = Request::get(Url::parse(url).unwrap());
        let response = timeout(Duration::from_millis(500), manager.handle_request(request))
            .await
            .expect("cached entry must resolve without waiting on the network")
            .unwrap();

        assert_eq!(response.source, Source::Cache);
        assert_eq!(response.status, 200);
        assert_eq!(&response.body[..], b"cached-css");
    }

    #[tokio::test]
    async fn test_revalidation_updates_store_but_not_caller() {
        let url = "https://example.com/index.html";
        let fetcher = Arc::new(FakeFetch::new(&[(url, 200, "B")]));
        let manager = make_manager(fetcher, &[]).await;
        manager.store.put_entry(&seed_entry(url, "A")).await.unwrap();

        let response = manager
            .handle_request(Request::get(Url::parse(url).unwrap()))
            .await
            .unwrap();

        // caller got the cached value, untouched by the refresh
        assert_eq!(&response.body[..], b"A");
        assert_eq!(response.source, Source::Cache);

        // the detached refresh lands "B" for future lookups
        wait_for_body(&manager, &entry_key("GET", url), b"B").await;

        let second = manager
            .handle_request(Request::get(Url::parse(url).unwrap()))
            .await
            .unwrap();
        assert_eq!(&second.body[..], b"B");
        assert_eq!(second.source, Source::Cache);
    }

    #[tokio::test]
    async fn test_revalidation_failure_keeps_entry() {
        let url = "https://example.com/js/main.js";
        let manager = make_manager(Arc::new(FailingFetch), &[]).await;
        manager.store.put_entry(&seed_entry(url, "good")).await.unwrap();

        let response = manager
            .handle_request(Request::get(Url::parse(url).unwrap()))
            .await
            .unwrap();
        assert_eq!(&response.body[..], b"good");

        // give the doomed refresh a moment, then confirm nothing changed
        tokio::time::sleep(Duration::from_millis(50)).await;
        let entry = manager
            .store
            .get_entry("v1", &entry_key("GET", url))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(entry.body, b"good".to_vec());
    }

    #[tokio::test]
    async fn test_cold_miss_fetches_and_caches() {
        let url = "https://example.com/images/profile.jpg";
        let fetcher = Arc::new(FakeFetch::new(&[(url, 200, "jpeg-bytes")]));
        let manager = make_manager(fetcher, &[]).await;

        let response = manager
            .handle_request(Request::get(Url::parse(url).unwrap()))
            .await
            .unwrap();

        assert_eq!(response.source, Source::Network);
        assert_eq!(&response.body[..], b"jpeg-bytes");
        assert!(
            manager
                .store
                .has_entry("v1", &entry_key("GET", url))
                .await
                .unwrap()
        );
    }

    #[tokio::test]
    async fn test_cold_miss_failure_propagates_and_writes_nothing() {
        let url = "https://example.com/images/new-video.mp4";
        let manager = make_manager(Arc::new(FailingFetch), &[]).await;

        let result = manager.handle_request(Request::get(Url::parse(url).unwrap())).await;

        assert!(matches!(result, Err(Error::Http(_))));
        assert!(
            !manager
                .store
                .has_entry("v1", &entry_key("GET", url))
                .await
                .unwrap()
        );
    }

    #[tokio::test]
    async fn test_non_success_response_not_cached() {
        let url = "https://example.com/missing.html";
        let fetcher = Arc::new(FakeFetch::new(&[(url, 404, "not found")]));
        let manager = make_manager(fetcher, &[]).await;

        let response = manager
            .handle_request(Request::get(Url::parse(url).unwrap()))
            .await
            .unwrap();

        assert_eq!(response.status, 404);
        assert_eq!(response.source, Source::Network);
        assert!(
            !manager
                .store
                .has_entry("v1", &entry_key("GET", url))
                .await
                .unwrap()
        );
    }

    #[tokio::test]
    async fn test_post_bypasses_cache_entirely() {
        let url = "https://example.com/index.html";
        let fetcher = Arc::new(FakeFetch::new(&[(url, 200, "network-body")]));
        let manager = make_manager(Arc::clone(&fetcher) as Arc<dyn Fetch>, &[]).await;
        manager.store.put_entry(&seed_entry(url, "cached-body")).await.unwrap();

        let request = Request { method: Method::POST, url: Url::parse(url).unwrap() };
        let response = manager.handle_request(request).await.unwrap();

        // the cached GET entry is ignored and left untouched
        assert_eq!(response.source, Source::Network);
        assert_eq!(&response.body[..], b"network-body");
        assert_eq!(fetcher.calls(), vec![(Method::POST, url.to_string())]);
        let entry = manager
            .store
            .get_entry("v1", &entry_key("GET", url))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(entry.body, b"cached-body".to_vec());
        assert_eq!(manager.store.count_entries("v1").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_cross_origin_bypasses_cache() {
        let url = "https://cdn.example.net/lib.js";
        let fetcher = Arc::new(FakeFetch::new(&[(url, 200, "lib")]));
        let manager = make_manager(Arc::clone(&fetcher) as Arc<dyn Fetch>, &[]).await;

        let response = manager
            .handle_request(Request::get(Url::parse(url).unwrap()))
            .await
            .unwrap();

        assert_eq!(response.source, Source::Network);
        assert_eq!(manager.store.count_entries("v1").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_cross_origin_failure_propagates() {
        let manager = make_manager(Arc::new(FailingFetch), &[]).await;
        let request = Request::get(Url::parse("https://cdn.example.net/lib.js").unwrap());

        let result = manager.handle_request(request).await;
        assert!(matches!(result, Err(Error::Http(_))));
    }

    #[tokio::test]
    async fn test_from_config_builds_manifest() {
        let store = CacheStore::open_in_memory().await.unwrap();
        let config = AppConfig::default();
        let manager = CacheManager::from_config(store, Arc::new(FailingFetch), &config).unwrap();

        assert_eq!(manager.version(), "portfolio-v1");
        assert_eq!(manager.manifest.len(), config.precache.len());
        assert_eq!(manager.state(), LifecycleState::Installing);
    }
}
