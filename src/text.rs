//! String similarity and name normalization for entity resolution
//!
//! Fuzzy matching runs on small candidate buckets, so the kernels favor
//! simplicity: a two-row Levenshtein with an early length-ratio cutoff.

use rust_stemmers::{Algorithm, Stemmer};

/// Levenshtein edit distance using the two-row rolling table
pub fn levenshtein(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();

    if a.is_empty() {
        return b.len();
    }
    if b.is_empty() {
        return a.len();
    }

    let mut prev: Vec<usize> = (0..=b.len()).collect();
    let mut curr: Vec<usize> = vec![0; b.len() + 1];

    for (i, ca) in a.iter().enumerate() {
        curr[0] = i + 1;
        for (j, cb) in b.iter().enumerate() {
            let cost = usize::from(ca != cb);
            curr[j + 1] = (prev[j + 1] + 1).min(curr[j] + 1).min(prev[j] + cost);
        }
        std::mem::swap(&mut prev, &mut curr);
    }

    prev[b.len()]
}

/// Normalized string similarity in [0, 1]
///
/// `1 - distance / max_len`; two empty strings are identical (1.0).
pub fn string_similarity(a: &str, b: &str) -> f64 {
    let len_a = a.chars().count();
    let len_b = b.chars().count();
    let max_len = len_a.max(len_b);
    if max_len == 0 {
        return 1.0;
    }

    // Length ratio bounds similarity from above; skip the table when even a
    // perfect alignment could not reach the caller's plausible range.
    let min_len = len_a.min(len_b);
    if (min_len as f64) / (max_len as f64) < 0.3 {
        return (min_len as f64) / (max_len as f64);
    }

    1.0 - (levenshtein(a, b) as f64) / (max_len as f64)
}

/// Batch similarity of one needle against many candidates
pub fn string_similarity_batch(needle: &str, candidates: &[&str]) -> Vec<f64> {
    candidates
        .iter()
        .map(|c| string_similarity(needle, c))
        .collect()
}

/// Entity name normalizer: collapse whitespace, lowercase, Porter-stem
///
/// The stemmed form is the index bucket key; fuzzy comparison then runs only
/// within a bucket.
pub struct NameNormalizer {
    stemmer: Stemmer,
}

impl Default for NameNormalizer {
    fn default() -> Self {
        Self::new()
    }
}

impl NameNormalizer {
    pub fn new() -> Self {
        Self {
            stemmer: Stemmer::create(Algorithm::English),
        }
    }

    /// Lowercased, whitespace-collapsed form used for display-level matching
    pub fn normalize(&self, name: &str) -> String {
        name.split_whitespace()
            .map(|w| w.to_lowercase())
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Stemmed index key for bucket lookup
    pub fn index_key(&self, name: &str) -> String {
        self.normalize(name)
            .split_whitespace()
            .map(|w| self.stemmer.stem(w).to_string())
            .collect::<Vec<_>>()
            .join(" ")
    }
}
