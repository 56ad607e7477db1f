use serde::{Deserialize, Serialize};
use std::fmt;

/// Bounding box for a detected face, in pixel coordinates of the source image.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub confidence: f32,
}

/// Face descriptor vector (128-dimensional for the usual face models).
///
/// The dimensionality is fixed by the face model provider; every descriptor
/// compared against another must come from the same provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FaceDescriptor {
    pub values: Vec<f32>,
}

impl FaceDescriptor {
    pub fn new(values: Vec<f32>) -> Self {
        Self { values }
    }

    pub fn dimension(&self) -> usize {
        self.values.len()
    }

    /// Compute Euclidean distance between two descriptors.
    ///
    /// Always non-negative; 0.0 for identical descriptors.
    pub fn euclidean_distance(&self, other: &FaceDescriptor) -> f32 {
        self.values
            .iter()
            .zip(other.values.iter())
            .map(|(a, b)| (a - b).powi(2))
            .sum::<f32>()
            .sqrt()
    }
}

/// A face found by the provider: where it is, and what it looks like.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectedFace {
    pub region: BoundingBox,
    pub descriptor: FaceDescriptor,
}

/// All descriptors known for one identity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LabeledDescriptor {
    pub identity_id: String,
    pub descriptors: Vec<FaceDescriptor>,
}

/// Ordered, read-only collection of labeled descriptors used as ground truth.
///
/// Built once by the reference index builder and then only read; a rebuild
/// produces a new set instead of editing this one.
#[derive(Debug, Clone, Default)]
pub struct ReferenceSet {
    entries: Vec<LabeledDescriptor>,
}

impl ReferenceSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a descriptor for an identity, appending to the identity's existing
    /// entry when there is one. Identities keep first-appearance order.
    pub fn insert(&mut self, identity_id: &str, descriptor: FaceDescriptor) {
        match self
            .entries
            .iter_mut()
            .find(|entry| entry.identity_id == identity_id)
        {
            Some(entry) => entry.descriptors.push(descriptor),
            None => self.entries.push(LabeledDescriptor {
                identity_id: identity_id.to_string(),
                descriptors: vec![descriptor],
            }),
        }
    }

    pub fn entries(&self) -> &[LabeledDescriptor] {
        &self.entries
    }

    /// Number of identities.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Total number of descriptors across all identities.
    pub fn descriptor_count(&self) -> usize {
        self.entries.iter().map(|e| e.descriptors.len()).sum()
    }

    /// True when there is nothing to match against.
    pub fn is_empty(&self) -> bool {
        self.descriptor_count() == 0
    }
}

impl FromIterator<(String, FaceDescriptor)> for ReferenceSet {
    fn from_iter<I: IntoIterator<Item = (String, FaceDescriptor)>>(iter: I) -> Self {
        let mut set = ReferenceSet::new();
        for (identity_id, descriptor) in iter {
            set.insert(&identity_id, descriptor);
        }
        set
    }
}

/// Identity decided by the matcher.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Identity {
    Known(String),
    Unknown,
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Identity::Known(id) => f.write_str(id),
            Identity::Unknown => f.write_str("unknown"),
        }
    }
}

/// Result of matching a query descriptor against a reference set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchResult {
    pub identity: Identity,
    /// Euclidean distance to the closest reference descriptor. Reported on
    /// rejects too, for threshold tuning.
    pub distance: f32,
}

impl MatchResult {
    pub fn is_known(&self) -> bool {
        matches!(self.identity, Identity::Known(_))
    }
}
