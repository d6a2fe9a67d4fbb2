//! Client-side cache layer for sitecache.
//!
//! This crate provides the HTTP fetch client, the asset manifest, and the
//! cache manager implementing the install / activate / handle-request
//! lifecycle over a versioned response store.

pub mod fetch;
pub mod manager;
pub mod manifest;

pub use fetch::{Fetch, FetchClient, FetchConfig, FetchResponse};
pub use manager::{ActivationReport, CacheManager, LifecycleState, Request, Response, Source};
pub use manifest::AssetManifest;
