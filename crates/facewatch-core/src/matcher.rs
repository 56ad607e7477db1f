//! Best-match decision over a reference set.
//!
//! A [`FaceMatcher`] only exists for a non-empty reference set. It is shared
//! through a [`MatcherSlot`], which hands out immutable snapshots and is
//! replaced wholesale on every rebuild.

use crate::types::{FaceDescriptor, Identity, MatchResult, ReferenceSet};
use std::sync::{Arc, PoisonError, RwLock};

/// Distance at or below which a match is accepted as known.
pub const DEFAULT_MATCH_THRESHOLD: f32 = 0.6;

/// Euclidean nearest-neighbour matcher over an immutable reference set.
#[derive(Debug)]
pub struct FaceMatcher {
    references: ReferenceSet,
    threshold: f32,
}

impl FaceMatcher {
    /// Build a matcher, or `None` when the set holds no descriptor at all.
    pub fn new(references: ReferenceSet, threshold: f32) -> Option<Self> {
        if references.is_empty() {
            return None;
        }
        Some(Self {
            references,
            threshold,
        })
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    pub fn references(&self) -> &ReferenceSet {
        &self.references
    }

    /// Find the closest reference descriptor across all identities.
    ///
    /// Every stored descriptor is compared; the first one reaching the global
    /// minimum wins, so ties resolve in reference-set order.
    pub fn find_best(&self, query: &FaceDescriptor) -> MatchResult {
        let mut best_distance = f32::INFINITY;
        let mut best_identity: Option<&str> = None;

        for entry in self.references.entries() {
            for reference in &entry.descriptors {
                let distance = query.euclidean_distance(reference);
                if distance < best_distance {
                    best_distance = distance;
                    best_identity = Some(entry.identity_id.as_str());
                }
            }
        }

        match best_identity {
            Some(id) if best_distance <= self.threshold => MatchResult {
                identity: Identity::Known(id.to_string()),
                distance: best_distance,
            },
            _ => MatchResult {
                identity: Identity::Unknown,
                // Stays infinite when no distance was finite.
                distance: best_distance,
            },
        }
    }
}

/// Shared cell holding the current matcher, if any.
///
/// Readers get an `Arc` snapshot that stays valid while a rebuild swaps in a
/// new matcher, so an in-flight match never sees a half-built set.
#[derive(Debug, Default)]
pub struct MatcherSlot {
    current: RwLock<Option<Arc<FaceMatcher>>>,
}

impl MatcherSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the installed matcher.
    pub fn load(&self) -> Option<Arc<FaceMatcher>> {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Install a new matcher (or none), returning the previous one.
    pub fn replace(&self, matcher: Option<FaceMatcher>) -> Option<Arc<FaceMatcher>> {
        let next = matcher.map(Arc::new);
        let mut guard = self.current.write().unwrap_or_else(PoisonError::into_inner);
        std::mem::replace(&mut *guard, next)
    }

    pub fn is_ready(&self) -> bool {
        self.load().is_some()
    }
}
