//! Exact inner-product search over unit vectors.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// Scale `v` to unit L2 norm. A zero vector is left as is (norm taken as 1).
pub fn normalize_in_place(v: &mut [f32]) {
    let norm2: f32 = v.iter().map(|x| x * x).sum();
    let norm = if norm2 > 0.0 { norm2.sqrt() } else { 1.0 };
    for x in v.iter_mut() {
        *x /= norm;
    }
}

pub fn normalized(mut v: Vec<f32>) -> Vec<f32> {
    normalize_in_place(&mut v);
    v
}

pub fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

/// Vectors in insertion order; position `i` pairs with metadata record `i`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FlatIpIndex {
    dim: usize,
    vectors: Vec<Vec<f32>>,
}

impl FlatIpIndex {
    pub fn new(dim: usize) -> Self {
        Self {
            dim,
            vectors: Vec::new(),
        }
    }

    pub(crate) fn from_parts(dim: usize, vectors: Vec<Vec<f32>>) -> Self {
        Self { dim, vectors }
    }

    pub(crate) fn vectors(&self) -> &[Vec<f32>] {
        &self.vectors
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    pub fn len(&self) -> usize {
        self.vectors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vectors.is_empty()
    }

    /// Caller guarantees `vector.len() == self.dim()`.
    pub fn push(&mut self, vector: Vec<f32>) {
        debug_assert_eq!(vector.len(), self.dim);
        self.vectors.push(vector);
    }

    /// Positions and scores of the `k` best matches, best first.
    ///
    /// Equal scores keep insertion order.
    pub fn search(&self, query: &[f32], k: usize) -> Vec<(usize, f32)> {
        let k = k.min(self.vectors.len());
        if k == 0 {
            return Vec::new();
        }
        let mut scored: Vec<(usize, f32)> = self
            .vectors
            .iter()
            .enumerate()
            .map(|(i, v)| (i, dot(query, v)))
            .collect();
        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(Ordering::Equal));
        scored.truncate(k);
        scored
    }
}
