//! Reference index building.
//!
//! Turns the reference photo list into a [`ReferenceSet`]. One bad entry
//! (unreachable image, provider failure, no face) never aborts the build; it
//! is logged and dropped.

use crate::provider::FaceModel;
use crate::types::ReferenceSet;
use async_trait::async_trait;
use image::RgbImage;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// One labeled reference photo from the reference store.
///
/// Store rows name the identity `identity_id` or `id`, as text or number.
/// When both keys are present `identity_id` wins; other fields are ignored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "PhotoRow")]
pub struct ReferencePhoto {
    pub identity_id: String,
    pub image_url: String,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum Key {
    Text(String),
    Signed(i64),
    Unsigned(u64),
}

impl From<Key> for String {
    fn from(key: Key) -> Self {
        match key {
            Key::Text(s) => s,
            Key::Signed(n) => n.to_string(),
            Key::Unsigned(n) => n.to_string(),
        }
    }
}

#[derive(Deserialize)]
struct PhotoRow {
    identity_id: Option<Key>,
    id: Option<Key>,
    image_url: String,
}

impl TryFrom<PhotoRow> for ReferencePhoto {
    type Error = String;

    fn try_from(row: PhotoRow) -> Result<Self, Self::Error> {
        let key = row
            .identity_id
            .or(row.id)
            .ok_or_else(|| format!("reference photo {} has no identity_id or id", row.image_url))?;
        Ok(Self {
            identity_id: key.into(),
            image_url: row.image_url,
        })
    }
}

#[derive(Error, Debug)]
pub enum FetchError {
    #[error("request to {url} failed: {message}")]
    Transport { url: String, message: String },
    #[error("{url} answered with status {status}")]
    Status { url: String, status: u16 },
    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to decode image {url}: {message}")]
    Decode { url: String, message: String },
    #[error("malformed reference list: {0}")]
    Malformed(String),
}

/// Loads reference images by URL.
#[async_trait]
pub trait ImageFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<RgbImage, FetchError>;
}

/// Supplies the ordered list of reference photos.
#[async_trait]
pub trait ReferenceStore: Send + Sync {
    async fn list(&self) -> Result<Vec<ReferencePhoto>, FetchError>;
}

/// Build a reference set from the given photos, in list order.
///
/// Entries whose image cannot be fetched, whose provider call fails, or that
/// contain no face contribute nothing. An empty result is a valid outcome.
pub async fn build_reference_set(
    photos: &[ReferencePhoto],
    fetcher: &dyn ImageFetcher,
    model: &dyn FaceModel,
) -> ReferenceSet {
    let mut set = ReferenceSet::new();
    let mut skipped = 0usize;

    for photo in photos {
        let image = match fetcher.fetch(&photo.image_url).await {
            Ok(image) => image,
            Err(err) => {
                tracing::warn!(
                    identity = %photo.identity_id,
                    url = %photo.image_url,
                    error = %err,
                    "reference image fetch failed; skipping"
                );
                skipped += 1;
                continue;
            }
        };

        match model.detect_and_describe(&image).await {
            Ok(Some(face)) => {
                tracing::debug!(
                    identity = %photo.identity_id,
                    confidence = face.region.confidence,
                    dim = face.descriptor.dimension(),
                    "reference descriptor extracted"
                );
                set.insert(&photo.identity_id, face.descriptor);
            }
            Ok(None) => {
                tracing::debug!(
                    identity = %photo.identity_id,
                    url = %photo.image_url,
                    "no face in reference image; skipping"
                );
                skipped += 1;
            }
            Err(err) => {
                tracing::warn!(
                    identity = %photo.identity_id,
                    url = %photo.image_url,
                    error = %err,
                    "reference descriptor extraction failed; skipping"
                );
                skipped += 1;
            }
        }
    }

    tracing::info!(
        photos = photos.len(),
        identities = set.len(),
        descriptors = set.descriptor_count(),
        skipped,
        "reference set built"
    );

    set
}
