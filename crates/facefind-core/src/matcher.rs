//! Euclidean descriptor matching over one event's photo set.

use crate::types::{Descriptor, Photo, PhotoId};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Notice surfaced to the attendee when nothing matched.
pub const NO_MATCH_NOTICE: &str = "No matches found. Showing all photos.";

#[derive(Error, Debug, PartialEq)]
pub enum MatchError {
    #[error("query descriptor has {actual} dimensions, expected {expected}")]
    QueryLength { expected: usize, actual: usize },
}

/// What to do with a photo whose descriptor has not been computed yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnresolvedPolicy {
    /// Show it: never hide a photo that might contain the attendee.
    #[default]
    Include,
    /// Hide it: only show photos with a confirmed match.
    Exclude,
}

impl UnresolvedPolicy {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "include" => Some(UnresolvedPolicy::Include),
            "exclude" => Some(UnresolvedPolicy::Exclude),
            _ => None,
        }
    }
}

/// Tunable matching parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MatchConfig {
    /// A candidate matches iff its distance is strictly below this value.
    pub threshold: f32,
    /// Expected length of every descriptor produced by the extractor.
    pub descriptor_len: usize,
    pub unresolved: UnresolvedPolicy,
}

impl Default for MatchConfig {
    fn default() -> Self {
        Self {
            threshold: 0.6,
            descriptor_len: 128,
            unresolved: UnresolvedPolicy::Include,
        }
    }
}

/// One gallery entry offered to the matcher.
#[derive(Debug, Clone, Copy)]
pub struct Candidate<'a> {
    pub photo_id: &'a PhotoId,
    pub descriptor: Option<&'a Descriptor>,
}

impl<'a> From<&'a Photo> for Candidate<'a> {
    fn from(photo: &'a Photo) -> Self {
        Self {
            photo_id: &photo.id,
            descriptor: photo.descriptor.as_ref(),
        }
    }
}

/// Strategy for comparing a query descriptor against a gallery.
pub trait Matcher {
    /// Return the ids of matching candidates in candidate order.
    fn matches(&self, query: &Descriptor, candidates: &[Candidate<'_>]) -> Result<Vec<PhotoId>, MatchError>;
}

/// Threshold matcher over Euclidean distance.
///
/// Visits every candidate exactly once: O(N·D) per query, no index.
#[derive(Debug, Clone, Copy, Default)]
pub struct EuclideanMatcher {
    pub config: MatchConfig,
}

impl EuclideanMatcher {
    pub fn new(config: MatchConfig) -> Self {
        Self { config }
    }

    fn is_match(&self, query: &Descriptor, candidate: &Candidate<'_>) -> bool {
        let stored = match candidate.descriptor {
            Some(d) if !d.is_empty() => d,
            _ => return self.config.unresolved == UnresolvedPolicy::Include,
        };
        if stored.len() != query.len() {
            tracing::warn!(
                photo_id = %candidate.photo_id,
                stored = stored.len(),
                expected = query.len(),
                "descriptor length mismatch; treating photo as unresolved"
            );
            return self.config.unresolved == UnresolvedPolicy::Include;
        }
        query.euclidean_distance(stored) < self.config.threshold
    }
}

impl Matcher for EuclideanMatcher {
    fn matches(&self, query: &Descriptor, candidates: &[Candidate<'_>]) -> Result<Vec<PhotoId>, MatchError> {
        if query.len() != self.config.descriptor_len {
            return Err(MatchError::QueryLength {
                expected: self.config.descriptor_len,
                actual: query.len(),
            });
        }

        let matched: Vec<PhotoId> = candidates
            .iter()
            .filter(|c| self.is_match(query, c))
            .map(|c| c.photo_id.clone())
            .collect();

        tracing::debug!(
            candidates = candidates.len(),
            matched = matched.len(),
            threshold = self.config.threshold,
            "match complete"
        );
        Ok(matched)
    }
}

/// How a filter result relates to the full candidate set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterKind {
    /// Some, but not all, candidates matched.
    Subset,
    /// Every candidate matched.
    Complete,
    /// Nothing matched; the full set is shown instead.
    NoMatchFallback,
}

/// Caller-visible result of a search over the gallery.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GalleryFilter {
    pub photo_ids: Vec<PhotoId>,
    pub kind: FilterKind,
}

impl GalleryFilter {
    pub fn is_fallback(&self) -> bool {
        self.kind == FilterKind::NoMatchFallback
    }

    /// True when the filter actually narrows the gallery.
    pub fn is_narrowing(&self) -> bool {
        self.kind == FilterKind::Subset
    }

    pub fn notice(&self) -> Option<&'static str> {
        self.is_fallback().then_some(NO_MATCH_NOTICE)
    }
}

/// Run the matcher and apply the empty-result fallback.
pub fn filter_gallery(
    matcher: &dyn Matcher,
    query: &Descriptor,
    candidates: &[Candidate<'_>],
) -> Result<GalleryFilter, MatchError> {
    let matched = matcher.matches(query, candidates)?;

    let filter = if matched.is_empty() {
        GalleryFilter {
            photo_ids: candidates.iter().map(|c| c.photo_id.clone()).collect(),
            kind: FilterKind::NoMatchFallback,
        }
    } else if matched.len() == candidates.len() {
        GalleryFilter {
            photo_ids: matched,
            kind: FilterKind::Complete,
        }
    } else {
        GalleryFilter {
            photo_ids: matched,
            kind: FilterKind::Subset,
        }
    };

    tracing::info!(
        candidates = candidates.len(),
        shown = filter.photo_ids.len(),
        kind = ?filter.kind,
        "gallery filtered"
    );
    Ok(filter)
}
