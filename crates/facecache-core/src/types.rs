use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Bounding box for a detected face, with optional facial landmarks.
///
/// Coordinates are in pixels of the image handed to the detector, i.e. after
/// orientation correction and downscaling.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub confidence: f32,
    /// Five-point facial landmarks: [left_eye, right_eye, nose, left_mouth, right_mouth].
    pub landmarks: Option<[(f32, f32); 5]>,
}

/// Face embedding vector (512-dimensional for ArcFace).
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

    /// Number of dimensions.
    pub fn dim(&self) -> usize {
        self.values.len()
    }

    /// Compute cosine similarity between two embeddings.
    ///
    /// Returns a value in [-1, 1]. Higher = more similar.
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

    /// Compute Euclidean distance between two embeddings.
    pub fn euclidean_distance(&self, other: &Embedding) -> f32 {
        self.values
            .iter()
            .zip(other.values.iter())
            .map(|(a, b)| (a - b).powi(2))
            .sum::<f32>()
            .sqrt()
    }
}

/// Result of one directory load: embeddings and the identity each belongs to.
///
/// `encodings[i]` was extracted from an image in the directory `names[i]`.
/// Both lists only grow together, so they always have the same length. The
/// per-identity grouping is derived on demand and never stored.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct EncodingTable {
    encodings: Vec<Embedding>,
    names: Vec<String>,
}

impl EncodingTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn push(&mut self, name: impl Into<String>, embedding: Embedding) {
        self.encodings.push(embedding);
        self.names.push(name.into());
    }

    /// Embeddings in load order.
    pub fn encodings(&self) -> &[Embedding] {
        &self.encodings
    }

    /// Identity names, parallel to [`encodings`](Self::encodings).
    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn len(&self) -> usize {
        self.encodings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.encodings.is_empty()
    }

    /// Iterate `(identity, embedding)` pairs in load order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Embedding)> {
        self.names
            .iter()
            .map(String::as_str)
            .zip(self.encodings.iter())
    }

    /// Group embeddings by identity, preserving load order within each identity.
    pub fn by_identity(&self) -> BTreeMap<String, Vec<Embedding>> {
        let mut grouped: BTreeMap<String, Vec<Embedding>> = BTreeMap::new();
        for (name, embedding) in self.iter() {
            grouped
                .entry(name.to_string())
                .or_default()
                .push(embedding.clone());
        }
        grouped
    }

    /// Number of embeddings per identity.
    pub fn counts(&self) -> BTreeMap<&str, usize> {
        let mut counts = BTreeMap::new();
        for name in &self.names {
            *counts.entry(name.as_str()).or_insert(0) += 1;
        }
        counts
    }
}

/// Result of matching a probe embedding against an encoding table.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MatchResult {
    pub matched: bool,
    /// Cosine similarity of the best entry [-1, 1].
    pub similarity: f32,
    /// Identity of the best entry, set only when `matched`.
    pub identity: Option<String>,
}

/// Strategy for comparing a probe embedding against a loaded encoding table.
pub trait Matcher {
    fn compare(&self, probe: &Embedding, table: &EncodingTable, threshold: f32) -> MatchResult;
}

/// Cosine similarity matcher. Scans every entry and keeps the best one.
pub struct CosineMatcher;

impl Matcher for CosineMatcher {
    fn compare(&self, probe: &Embedding, table: &EncodingTable, threshold: f32) -> MatchResult {
        let mut best_sim = f32::NEG_INFINITY;
        let mut best_idx: Option<usize> = None;

        for (i, embedding) in table.encodings().iter().enumerate() {
            let sim = probe.similarity(embedding);
            if sim > best_sim {
                best_sim = sim;
                best_idx = Some(i);
            }
        }

        match best_idx {
            Some(idx) if best_sim >= threshold => MatchResult {
                matched: true,
                similarity: best_sim,
                identity: Some(table.names()[idx].clone()),
            },
            _ => MatchResult {
                matched: false,
                similarity: if best_sim == f32::NEG_INFINITY { 0.0 } else { best_sim },
                identity: None,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn emb(values: &[f32]) -> Embedding {
        Embedding::new(values.to_vec())
    }

    fn table(entries: &[(&str, &[f32])]) -> EncodingTable {
        let mut t = EncodingTable::new();
        for (name, values) in entries {
            t.push(*name, emb(values));
        }
        t
    }

    #[test]
    fn test_cosine_similarity_identical() {
        let a = emb(&[1.0, 0.0, 0.0]);
        let b = emb(&[1.0, 0.0, 0.0]);
        assert!((a.similarity(&b) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_similarity_orthogonal() {
        let a = emb(&[1.0, 0.0]);
        let b = emb(&[0.0, 1.0]);
        assert!(a.similarity(&b).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_similarity_zero_vector() {
        let a = emb(&[0.0, 0.0]);
        let b = emb(&[1.0, 0.0]);
        assert_eq!(a.similarity(&b), 0.0);
    }

    #[test]
    fn test_euclidean_distance() {
        let a = emb(&[0.0, 0.0]);
        let b = emb(&[3.0, 4.0]);
        assert!((a.euclidean_distance(&b) - 5.0).abs() < 1e-6);
    }

    #[test]
    fn test_table_lists_stay_parallel() {
        let t = table(&[("alice", &[1.0]), ("bob", &[2.0]), ("alice", &[3.0])]);
        assert_eq!(t.encodings().len(), t.names().len());
        assert_eq!(t.len(), 3);
        assert_eq!(t.names(), &["alice", "bob", "alice"]);
    }

    #[test]
    fn test_by_identity_matches_parallel_lists() {
        let t = table(&[
            ("alice", &[1.0]),
            ("bob", &[2.0]),
            ("alice", &[3.0]),
            ("carol", &[4.0]),
        ]);
        let grouped = t.by_identity();

        for name in t.names() {
            let expected: Vec<Embedding> = t
                .iter()
                .filter(|(n, _)| n == name)
                .map(|(_, e)| e.clone())
                .collect();
            assert_eq!(grouped[name.as_str()], expected, "grouping for {name}");
        }
        assert_eq!(grouped.len(), 3);
        assert_eq!(grouped["alice"], vec![emb(&[1.0]), emb(&[3.0])]);
    }

    #[test]
    fn test_empty_table() {
        let t = EncodingTable::new();
        assert!(t.is_empty());
        assert!(t.by_identity().is_empty());
        assert!(t.counts().is_empty());
    }

    #[test]
    fn test_counts() {
        let t = table(&[("alice", &[1.0]), ("bob", &[2.0]), ("alice", &[3.0])]);
        let counts = t.counts();
        assert_eq!(counts["alice"], 2);
        assert_eq!(counts["bob"], 1);
    }

    #[test]
    fn test_cosine_matcher_picks_best_entry() {
        let t = table(&[
            ("decoy1", &[0.0, 1.0, 0.0]),
            ("decoy2", &[0.0, 0.0, 1.0]),
            ("match", &[1.0, 0.0, 0.0]),
        ]);
        let result = CosineMatcher.compare(&emb(&[1.0, 0.0, 0.0]), &t, 0.5);
        assert!(result.matched);
        assert_eq!(result.identity.as_deref(), Some("match"));
        assert!((result.similarity - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_matcher_below_threshold() {
        let t = table(&[("other", &[0.0, 1.0, 0.0])]);
        let result = CosineMatcher.compare(&emb(&[1.0, 0.0, 0.0]), &t, 0.5);
        assert!(!result.matched);
        assert!(result.identity.is_none());
        assert!(result.similarity.abs() < 1e-6);
    }

    #[test]
    fn test_cosine_matcher_empty_table() {
        let result = CosineMatcher.compare(&emb(&[1.0, 0.0]), &EncodingTable::new(), 0.5);
        assert!(!result.matched);
        assert_eq!(result.similarity, 0.0);
    }
}
