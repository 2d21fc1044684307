//! Author-supplied assets and image load states.
//!
//! Loading an image means fetching its bytes and checking that they look like an image.
//! States are cached per URL, so the stability wait after a preload is instant.

use async_trait::async_trait;
use base64::prelude::*;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AssetKind {
    Image,
    Video,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Asset {
    #[serde(rename = "type")]
    pub kind: AssetKind,
    pub url: String,
    #[serde(default)]
    pub alt_description: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ImageState {
    Loaded,
    Errored,
}

#[async_trait]
pub trait ImageLoader: Send + Sync {
    /// Settles `url` to loaded or errored. Never fails.
    async fn load(&self, url: &str) -> ImageState;
}

pub struct HttpImageLoader {
    client: reqwest::Client,
}

impl HttpImageLoader {
    pub fn new(timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_default();
        Self { client }
    }
}

#[async_trait]
impl ImageLoader for HttpImageLoader {
    async fn load(&self, url: &str) -> ImageState {
        if let Some(data) = url.strip_prefix("data:") {
            return decode_data_uri(data);
        }
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            debug!(url, "image source has no fetchable scheme");
            return ImageState::Errored;
        }
        let response = match self.client.get(url).send().await {
            Ok(response) => response,
            Err(e) => {
                debug!(url, error = %e, "image fetch failed");
                return ImageState::Errored;
            }
        };
        match response.error_for_status() {
            Ok(response) => match response.bytes().await {
                Ok(bytes) => classify(&bytes),
                Err(_) => ImageState::Errored,
            },
            Err(e) => {
                debug!(url, error = %e, "image fetch returned an error status");
                ImageState::Errored
            }
        }
    }
}

fn decode_data_uri(data: &str) -> ImageState {
    let Some((meta, payload)) = data.split_once(',') else {
        return ImageState::Errored;
    };
    if let Some(mime) = meta.strip_suffix(";base64") {
        return match BASE64_STANDARD.decode(payload.trim()) {
            Ok(bytes) if mime.starts_with("image/svg") => svg_state(&bytes),
            Ok(bytes) => classify(&bytes),
            Err(_) => ImageState::Errored,
        };
    }
    if meta.starts_with("image/svg") {
        ImageState::Loaded
    } else {
        ImageState::Errored
    }
}

fn svg_state(bytes: &[u8]) -> ImageState {
    let head = String::from_utf8_lossy(&bytes[..bytes.len().min(512)]).to_ascii_lowercase();
    if head.contains("<svg") {
        ImageState::Loaded
    } else {
        ImageState::Errored
    }
}

fn classify(bytes: &[u8]) -> ImageState {
    if image::guess_format(bytes).is_ok() {
        ImageState::Loaded
    } else {
        svg_state(bytes)
    }
}

/// Image states by URL, backed by an [`ImageLoader`].
pub struct AssetCache {
    states: DashMap<String, ImageState>,
    loader: Arc<dyn ImageLoader>,
}

impl AssetCache {
    pub fn new(loader: Arc<dyn ImageLoader>) -> Self {
        Self {
            states: DashMap::new(),
            loader,
        }
    }

    pub fn state(&self, url: &str) -> Option<ImageState> {
        self.states.get(url).map(|s| *s)
    }

    pub async fn settle(&self, url: &str) -> ImageState {
        if let Some(state) = self.state(url) {
            return state;
        }
        let state = self.loader.load(url).await;
        self.states.insert(url.to_string(), state);
        state
    }

    /// Settles every URL concurrently. Dropping the returned future aborts loads in flight.
    pub async fn settle_all(self: &Arc<Self>, urls: &[String]) -> Vec<ImageState> {
        let mut loads = JoinSet::new();
        for url in urls {
            let cache = Arc::clone(self);
            let url = url.clone();
            loads.spawn(async move { cache.settle(&url).await });
        }
        let mut states = Vec::with_capacity(urls.len());
        while let Some(result) = loads.join_next().await {
            states.push(result.unwrap_or(ImageState::Errored));
        }
        states
    }

    /// Starts loading the image assets in the background. Failures only show up as
    /// `Errored` states.
    pub fn preload(self: &Arc<Self>, assets: &[Asset]) {
        for asset in assets.iter().filter(|a| a.kind == AssetKind::Image) {
            let cache = Arc::clone(self);
            let url = asset.url.clone();
            tokio::spawn(async move {
                let state = cache.settle(&url).await;
                debug!(url = %url, ?state, "asset preloaded");
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const PNG_1X1: &str = "iVBORw0KGgoAAAANSUhEUgAAAAEAAAABCAYAAAAfFcSJAAAADUlEQVR42mNkYPhfDwAChwGA60e6kgAAAABJRU5ErkJggg==";

    #[tokio::test]
    async fn test_data_uris_are_classified_without_network() {
        let loader = HttpImageLoader::new(Duration::from_secs(1));
        assert_eq!(
            loader.load(&format!("data:image/png;base64,{}", PNG_1X1)).await,
            ImageState::Loaded
        );
        assert_eq!(
            loader.load("data:image/png;base64,bm90IGFuIGltYWdl").await,
            ImageState::Errored
        );
        assert_eq!(
            loader.load("data:image/svg+xml,<svg xmlns='http://www.w3.org/2000/svg'/>").await,
            ImageState::Loaded
        );
        assert_eq!(loader.load("/relative/banner.png").await, ImageState::Errored);
    }

    struct CountingLoader(AtomicUsize);

    #[async_trait]
    impl ImageLoader for CountingLoader {
        async fn load(&self, _url: &str) -> ImageState {
            self.0.fetch_add(1, Ordering::SeqCst);
            ImageState::Loaded
        }
    }

    #[tokio::test]
    async fn test_settled_states_are_cached() {
        let loader = Arc::new(CountingLoader(AtomicUsize::new(0)));
        let cache = Arc::new(AssetCache::new(loader.clone()));
        let urls = vec!["a.png".to_string(), "b.png".to_string()];
        assert_eq!(cache.settle_all(&urls).await.len(), 2);
        assert_eq!(cache.settle("a.png").await, ImageState::Loaded);
        assert_eq!(loader.0.load(Ordering::SeqCst), 2);
        assert_eq!(cache.state("b.png"), Some(ImageState::Loaded));
    }

    #[test]
    fn test_asset_deserializes_from_camel_case() {
        let asset: Asset = serde_json::from_str(
            r#"{"type":"image","url":"https://cdn.example/banner.png","altDescription":"winter sale"}"#,
        )
        .unwrap();
        assert_eq!(asset.kind, AssetKind::Image);
        assert_eq!(asset.alt_description.as_deref(), Some("winter sale"));
    }
}
