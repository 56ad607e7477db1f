//! facewatch-core: Face descriptor matching engine.
//!
//! Builds a reference index from labeled photos through an opaque face model
//! provider, and classifies query descriptors against it by Euclidean distance.

pub mod matcher;
pub mod provider;
pub mod reference;
pub mod types;

pub use matcher::{FaceMatcher, MatcherSlot, DEFAULT_MATCH_THRESHOLD};
pub use provider::{FaceModel, ProviderError};
pub use reference::{
    build_reference_set, FetchError, ImageFetcher, ReferencePhoto, ReferenceStore,
};
pub use types::{
    BoundingBox, DetectedFace, FaceDescriptor, Identity, LabeledDescriptor, MatchResult,
    ReferenceSet,
};
