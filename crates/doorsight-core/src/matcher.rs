//! Probe-versus-gallery identity decisions.
//!
//! Two policies exist. [`FirstMatchMatcher`] returns the earliest gallery
//! entry within tolerance and is the default. [`NearestMatcher`] returns the
//! closest entry within tolerance and must be selected explicitly.

use crate::types::{Embedding, Gallery, MatchResult};
use serde::Deserialize;
use std::fmt;
use std::str::FromStr;

/// Euclidean tolerance between L2-normalised ArcFace embeddings.
/// Equivalent to a cosine similarity of roughly 0.4.
pub const DEFAULT_TOLERANCE: f32 = 1.1;

/// Strategy for deciding which gallery identity a probe belongs to.
pub trait Matcher {
    fn find(&self, probe: &Embedding, gallery: &Gallery) -> MatchResult;
}

/// Earliest entry (in scan order) whose distance is within tolerance wins.
///
/// If two identities both pass for the same probe, the one scanned first is
/// returned. Entries after the first hit are not evaluated.
#[derive(Debug, Clone, Copy)]
pub struct FirstMatchMatcher {
    pub tolerance: f32,
}

impl Default for FirstMatchMatcher {
    fn default() -> Self {
        Self {
            tolerance: DEFAULT_TOLERANCE,
        }
    }
}

impl Matcher for FirstMatchMatcher {
    fn find(&self, probe: &Embedding, gallery: &Gallery) -> MatchResult {
        gallery
            .iter()
            .enumerate()
            .find(|(_, entry)| probe.distance(&entry.encoding) <= self.tolerance)
            .map(|(index, entry)| {
                tracing::debug!(index, label = %entry.label, "first gallery entry within tolerance");
                MatchResult::Identified(entry.label.clone())
            })
            .unwrap_or(MatchResult::Unknown)
    }
}

/// Smallest distance within tolerance wins; equal distances keep the earlier entry.
#[derive(Debug, Clone, Copy)]
pub struct NearestMatcher {
    pub tolerance: f32,
}

impl Default for NearestMatcher {
    fn default() -> Self {
        Self {
            tolerance: DEFAULT_TOLERANCE,
        }
    }
}

impl Matcher for NearestMatcher {
    fn find(&self, probe: &Embedding, gallery: &Gallery) -> MatchResult {
        let mut best: Option<(f32, &str)> = None;

        for entry in gallery {
            let distance = probe.distance(&entry.encoding);
            if distance > self.tolerance {
                continue;
            }
            if best.map_or(true, |(d, _)| distance < d) {
                best = Some((distance, &entry.label));
            }
        }

        match best {
            Some((distance, label)) => {
                tracing::debug!(distance, label, "nearest gallery entry within tolerance");
                MatchResult::Identified(label.to_string())
            }
            None => MatchResult::Unknown,
        }
    }
}

/// Configurable matcher selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchPolicy {
    #[default]
    First,
    Nearest,
}

impl MatchPolicy {
    pub fn matcher(self, tolerance: f32) -> Box<dyn Matcher + Send> {
        match self {
            MatchPolicy::First => Box::new(FirstMatchMatcher { tolerance }),
            MatchPolicy::Nearest => Box::new(NearestMatcher { tolerance }),
        }
    }
}

impl FromStr for MatchPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "first" => Ok(MatchPolicy::First),
            "nearest" => Ok(MatchPolicy::Nearest),
            other => Err(format!("unknown match policy {other:?} (expected first or nearest)")),
        }
    }
}

impl fmt::Display for MatchPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MatchPolicy::First => f.write_str("first"),
            MatchPolicy::Nearest => f.write_str("nearest"),
        }
    }
}
