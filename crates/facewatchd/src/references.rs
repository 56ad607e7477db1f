use facewatch_core::{
    build_reference_set, FaceMatcher, FaceModel, FetchError, ImageFetcher, MatcherSlot,
    ReferenceStore,
};
use serde::Serialize;
use std::sync::Arc;

/// Size of the reference set produced by a rebuild.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RebuildSummary {
    pub identities: usize,
    pub descriptors: usize,
}

/// Rebuilds the reference set from the store and installs a fresh matcher.
pub struct ReferenceIndex {
    store: Arc<dyn ReferenceStore>,
    fetcher: Arc<dyn ImageFetcher>,
    model: Arc<dyn FaceModel>,
    slot: Arc<MatcherSlot>,
    threshold: f32,
    // Overlapping rebuilds would race on the final swap.
    rebuilding: tokio::sync::Mutex<()>,
}

impl ReferenceIndex {
    pub fn new(
        store: Arc<dyn ReferenceStore>,
        fetcher: Arc<dyn ImageFetcher>,
        model: Arc<dyn FaceModel>,
        slot: Arc<MatcherSlot>,
        threshold: f32,
    ) -> Self {
        Self {
            store,
            fetcher,
            model,
            slot,
            threshold,
            rebuilding: tokio::sync::Mutex::new(()),
        }
    }

    /// Reload the photo list and replace the installed matcher.
    ///
    /// If the list cannot be loaded the current matcher stays in place. A
    /// list that yields no descriptors removes the matcher, so recognition
    /// reports `unavailable` until a later rebuild succeeds.
    pub async fn rebuild(&self) -> Result<RebuildSummary, FetchError> {
        let _serial = self.rebuilding.lock().await;

        let photos = self.store.list().await?;
        tracing::info!(photos = photos.len(), "rebuilding reference index");

        let set = build_reference_set(&photos, self.fetcher.as_ref(), self.model.as_ref()).await;
        let summary = RebuildSummary {
            identities: set.len(),
            descriptors: set.descriptor_count(),
        };

        let matcher = FaceMatcher::new(set, self.threshold);
        if matcher.is_none() {
            tracing::warn!("no usable reference faces; recognition unavailable");
        }
        let previous = self.slot.replace(matcher);

        tracing::info!(
            identities = summary.identities,
            descriptors = summary.descriptors,
            replaced = previous.is_some(),
            "reference index installed"
        );
        Ok(summary)
    }
}
