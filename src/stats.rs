//! Shared numeric primitives for the pipeline.
//!
//! Every downstream stage leans on the same handful of operations: cosine
//! similarity over unit vectors, a temperature-scaled soft-max, Shannon
//! entropy, and percentile estimation. They live here so each stage computes
//! them identically and the invariants can be tested once.

/// Dot product of two equal-length vectors.
///
/// Inputs are L2-normalized by the embedding adapter, so this IS cosine
/// similarity for substrate vectors.
pub fn dot(a: &[f32], b: &[f32]) -> f32 {
    debug_assert_eq!(a.len(), b.len());
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

/// Cosine similarity with explicit normalization, for vectors that may not
/// be unit length. Returns 0.0 when either vector is all-zero.
pub fn cosine(a: &[f32], b: &[f32]) -> f32 {
    let na = dot(a, a).sqrt();
    let nb = dot(b, b).sqrt();
    if na == 0.0 || nb == 0.0 {
        return 0.0;
    }
    (dot(a, b) / (na * nb)).clamp(-1.0, 1.0)
}

/// L2-normalize a vector in place. All-zero vectors are left untouched.
pub fn l2_normalize(v: &mut [f32]) {
    let norm = dot(v, v).sqrt();
    if norm > 0.0 {
        for x in v.iter_mut() {
            *x /= norm;
        }
    }
}

/// Element-wise mean of a set of equal-length vectors.
/// Returns `None` for an empty set.
pub fn mean_vector(vectors: &[&[f32]]) -> Option<Vec<f32>> {
    let first = vectors.first()?;
    let mut mean = vec![0.0f32; first.len()];
    for v in vectors {
        for (m, x) in mean.iter_mut().zip(v.iter()) {
            *m += x;
        }
    }
    let n = vectors.len() as f32;
    for m in mean.iter_mut() {
        *m /= n;
    }
    Some(mean)
}

/// Temperature-scaled soft-max over a score vector.
///
/// Uses the max-shift trick for numerical stability; the result always sums
/// to 1 (within float tolerance) for non-empty input. Temperature must be
/// positive; the config layer validates this.
pub fn softmax(scores: &[f64], temperature: f64) -> Vec<f64> {
    if scores.is_empty() {
        return Vec::new();
    }
    let max = scores.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
    let exps: Vec<f64> = scores
        .iter()
        .map(|s| ((s - max) / temperature).exp())
        .collect();
    let sum: f64 = exps.iter().sum();
    exps.into_iter().map(|e| e / sum).collect()
}

/// Shannon entropy in bits of a weight vector.
///
/// Weights are normalized internally; zero weights contribute nothing.
/// Returns 0.0 for empty or all-zero input.
pub fn shannon_entropy_bits(weights: &[f64]) -> f64 {
    let total: f64 = weights.iter().filter(|w| **w > 0.0).sum();
    if total <= 0.0 {
        return 0.0;
    }
    let mut h = 0.0;
    for w in weights.iter().filter(|w| **w > 0.0) {
        let p = w / total;
        h -= p * p.log2();
    }
    h.max(0.0)
}

/// Percentile by nearest-rank with linear interpolation between ranks.
///
/// `p` is in [0, 100]. The input need not be sorted. Returns 0.0 for an
/// empty slice (the degenerate-substrate path relies on this).
pub fn percentile(values: &[f64], p: f64) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let mut sorted: Vec<f64> = values.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    if sorted.len() == 1 {
        return sorted[0];
    }
    let rank = (p.clamp(0.0, 100.0) / 100.0) * (sorted.len() - 1) as f64;
    let lo = rank.floor() as usize;
    let hi = rank.ceil() as usize;
    if lo == hi {
        sorted[lo]
    } else {
        let frac = rank - lo as f64;
        sorted[lo] * (1.0 - frac) + sorted[hi] * frac
    }
}

/// Mean and population standard deviation. Returns (0.0, 0.0) for empty input.
pub fn mean_stddev(values: &[f64]) -> (f64, f64) {
    if values.is_empty() {
        return (0.0, 0.0);
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let var = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
    (mean, var.sqrt())
}

/// Replace a non-finite value with `None`.
pub fn finite(x: f64) -> Option<f64> {
    x.is_finite().then_some(x)
}
