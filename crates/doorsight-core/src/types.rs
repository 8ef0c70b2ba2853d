use serde::{Deserialize, Serialize};

/// Bounding box for a detected face, with optional facial landmarks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub confidence: f32,
    /// Five-point facial landmarks: [left_eye, right_eye, nose, left_mouth, right_mouth].
    pub landmarks: Option<[(f32, f32); 5]>,
}

/// Face feature vector (512-dimensional and L2-normalised for ArcFace).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Embedding {
    pub values: Vec<f32>,
    /// Model version that produced this embedding (e.g., "w600k_r50").
    pub model_version: Option<String>,
}

impl Embedding {
    pub fn new(values: Vec<f32>) -> Self {
        Self {
            values,
            model_version: None,
        }
    }

    /// False only when both embeddings name a model and the names differ.
    pub fn same_model(&self, other: &Embedding) -> bool {
        match (&self.model_version, &other.model_version) {
            (Some(a), Some(b)) => a == b,
            _ => true,
        }
    }

    /// Euclidean distance to another embedding.
    ///
    /// Embeddings of different length or from different named models are
    /// never comparable: the distance is `f32::INFINITY`.
    pub fn distance(&self, other: &Embedding) -> f32 {
        if self.values.len() != other.values.len() || !self.same_model(other) {
            return f32::INFINITY;
        }
        self.values
            .iter()
            .zip(other.values.iter())
            .map(|(a, b)| (a - b).powi(2))
            .sum::<f32>()
            .sqrt()
    }

    /// Cosine similarity in [-1, 1]. Higher = more similar.
    pub fn similarity(&self, other: &Embedding) -> f32 {
        let mut dot = 0.0f32;
        let mut norm_a = 0.0f32;
        let mut norm_b = 0.0f32;

        for (a, b) in self.values.iter().zip(other.values.iter()) {
            dot += a * b;
            norm_a += a * a;
            norm_b += b * b;
        }

        let denom = norm_a.sqrt() * norm_b.sqrt();
        if denom > 0.0 { dot / denom } else { 0.0 }
    }
}

/// One known face: the identity label (the gallery folder name) and the
/// encoding taken from one reference photo.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GalleryEntry {
    pub label: String,
    pub encoding: Embedding,
}

/// Ordered reference set of known faces. Entry order is scan order and is
/// significant for first-match-wins matching.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Gallery {
    entries: Vec<GalleryEntry>,
}

impl Gallery {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn push(&mut self, label: impl Into<String>, encoding: Embedding) {
        self.entries.push(GalleryEntry {
            label: label.into(),
            encoding,
        });
    }

    pub fn entries(&self) -> &[GalleryEntry] {
        &self.entries
    }

    pub fn iter(&self) -> std::slice::Iter<'_, GalleryEntry> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Distinct labels in first-seen order.
    pub fn labels(&self) -> Vec<&str> {
        let mut labels: Vec<&str> = Vec::new();
        for entry in &self.entries {
            if !labels.contains(&entry.label.as_str()) {
                labels.push(&entry.label);
            }
        }
        labels
    }
}

impl FromIterator<GalleryEntry> for Gallery {
    fn from_iter<I: IntoIterator<Item = GalleryEntry>>(iter: I) -> Self {
        Self {
            entries: iter.into_iter().collect(),
        }
    }
}

impl<'a> IntoIterator for &'a Gallery {
    type Item = &'a GalleryEntry;
    type IntoIter = std::slice::Iter<'a, GalleryEntry>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}

/// Identity decision for one probe.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum MatchResult {
    Identified(String),
    Unknown,
}

impl MatchResult {
    pub fn label(&self) -> Option<&str> {
        match self {
            MatchResult::Identified(label) => Some(label),
            MatchResult::Unknown => None,
        }
    }

    /// Notification caption for this decision.
    pub fn caption(&self) -> String {
        match self {
            MatchResult::Identified(label) => format!("{label} is waiting outside."),
            MatchResult::Unknown => "Unknown person is waiting outside.".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_distance_identical() {
        let a = Embedding::new(vec![0.6, 0.8]);
        assert!(a.distance(&a).abs() < 1e-6);
    }

    #[test]
    fn test_distance_unit_orthogonal() {
        let a = Embedding::new(vec![1.0, 0.0]);
        let b = Embedding::new(vec![0.0, 1.0]);
        assert!((a.distance(&b) - 2.0f32.sqrt()).abs() < 1e-6);
    }

    #[test]
    fn test_distance_length_mismatch_is_infinite() {
        let a = Embedding::new(vec![1.0, 0.0]);
        let b = Embedding::new(vec![1.0, 0.0, 0.0]);
        assert_eq!(a.distance(&b), f32::INFINITY);
    }

    #[test]
    fn test_distance_across_models_is_infinite() {
        let mut a = Embedding::new(vec![1.0, 0.0]);
        let mut b = Embedding::new(vec![1.0, 0.0]);
        a.model_version = Some("w600k_r50".into());
        assert_eq!(a.distance(&b), 0.0, "unnamed model is comparable");

        b.model_version = Some("glint360k_r100".into());
        assert!(!a.same_model(&b));
        assert_eq!(a.distance(&b), f32::INFINITY);
    }

    #[test]
    fn test_cosine_similarity_opposite() {
        let a = Embedding::new(vec![1.0, 0.0]);
        let b = Embedding::new(vec![-1.0, 0.0]);
        assert!((a.similarity(&b) + 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_similarity_zero_vector() {
        let a = Embedding::new(vec![0.0, 0.0]);
        let b = Embedding::new(vec![1.0, 0.0]);
        assert_eq!(a.similarity(&b), 0.0);
    }

    #[test]
    fn test_caption_identified() {
        let result = MatchResult::Identified("Alice".into());
        assert_eq!(result.caption(), "Alice is waiting outside.");
        assert_eq!(result.label(), Some("Alice"));
    }

    #[test]
    fn test_caption_unknown() {
        assert_eq!(
            MatchResult::Unknown.caption(),
            "Unknown person is waiting outside."
        );
        assert_eq!(MatchResult::Unknown.label(), None);
    }

    #[test]
    fn test_gallery_labels_dedup_in_order() {
        let mut gallery = Gallery::new();
        gallery.push("bob", Embedding::new(vec![1.0]));
        gallery.push("alice", Embedding::new(vec![2.0]));
        gallery.push("bob", Embedding::new(vec![3.0]));
        assert_eq!(gallery.len(), 3);
        assert_eq!(gallery.labels(), vec!["bob", "alice"]);
    }
}
