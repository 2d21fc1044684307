use crate::assets::{AssetCache, ImageState};
use crate::config::PreviewConfig;
use crate::context::RenderHandle;
use crate::worker::Job;
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;
use tracing::debug;

/// How the wait for a stable render ended. Never an error: a context that will not settle
/// is analysed as-is once the ceiling passes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StabilityReport {
    pub frames: u32,
    pub images: usize,
    pub images_errored: usize,
    /// `false` when the image ceiling cut the wait short.
    pub settled: bool,
    pub elapsed_ms: u64,
}

/// Ticks at least two frames, then waits for every `<img>` to load or error, bounded by the
/// configured ceiling.
pub async fn wait_for_stable(
    handle: &RenderHandle,
    assets: &Arc<AssetCache>,
    config: &PreviewConfig,
) -> StabilityReport {
    let started = Instant::now();

    let mut frames = 0;
    for _ in 0..config.animation_frames.max(2) {
        if handle.frame().await.is_err() {
            break;
        }
        frames += 1;
    }

    let sources = handle
        .request(|reply| Job::ImageSources { reply })
        .await
        .unwrap_or_default();

    let (settled, images_errored) =
        match tokio::time::timeout(config.stability_ceiling(), assets.settle_all(&sources)).await
        {
            Ok(states) => (
                true,
                states.iter().filter(|s| **s == ImageState::Errored).count(),
            ),
            Err(_) => {
                debug!(
                    handle = %handle.id(),
                    images = sources.len(),
                    ceiling_ms = config.stability_ceiling_ms,
                    "image wait hit the ceiling"
                );
                (false, 0)
            }
        };

    StabilityReport {
        frames,
        images: sources.len(),
        images_errored,
        settled,
        elapsed_ms: started.elapsed().as_millis() as u64,
    }
}
