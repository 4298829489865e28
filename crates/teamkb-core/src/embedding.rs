//! Vector utilities shared by the embedding providers and the stores.
//!
//! Concrete embedding clients (mock, OpenAI, Gemini) live in the `teamkb`
//! app crate; this module only holds the pure helpers they and the stores
//! rely on.

/// Serialize an embedding for the `embedding` BLOB column: every
/// component as four little-endian bytes, in order.
///
/// ```rust
/// use teamkb_core::embedding::{blob_to_vec, vec_to_blob};
///
/// let stored = vec_to_blob(&[0.5, -1.0]);
/// assert_eq!(stored.len(), 8);
/// assert_eq!(blob_to_vec(&stored), vec![0.5, -1.0]);
/// ```
pub fn vec_to_blob(vec: &[f32]) -> Vec<u8> {
    vec.iter().flat_map(|v| v.to_le_bytes()).collect()
}

/// Inverse of [`vec_to_blob`]. Trailing bytes that do not form a whole
/// component are ignored.
pub fn blob_to_vec(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .filter_map(|b| b.try_into().ok().map(f32::from_le_bytes))
        .collect()
}

/// Cosine of the angle between `a` and `b`.
///
/// Mismatched lengths, empty input and zero vectors all score `0.0`.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.is_empty() || a.len() != b.len() {
        return 0.0;
    }
    let (dot, aa, bb) = a
        .iter()
        .zip(b)
        .fold((0.0f32, 0.0f32, 0.0f32), |(d, x2, y2), (x, y)| {
            (d + x * y, x2 + x * x, y2 + y * y)
        });
    let norms = (aa * bb).sqrt();
    if norms < f32::EPSILON {
        0.0
    } else {
        dot / norms
    }
}

/// Cosine distance (`1 - similarity`), the ordering key for retrieval.
/// Smaller is closer.
pub fn cosine_distance(a: &[f32], b: &[f32]) -> f32 {
    1.0 - cosine_similarity(a, b)
}

/// Force a vector to exactly `dims` entries: truncate longer vectors,
/// zero-pad shorter ones.
pub fn fit_dimension(mut vec: Vec<f32>, dims: usize) -> Vec<f32> {
    vec.resize(dims, 0.0);
    vec
}

/// Scale a vector to unit L2 norm. Zero vectors are returned unchanged.
pub fn l2_normalize(vec: &mut [f32]) {
    let norm = vec.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > f32::EPSILON {
        for x in vec.iter_mut() {
            *x /= norm;
        }
    }
}

/// Rough token estimate (four characters per token) used when a provider
/// does not report usage.
pub fn approx_tokens<S: AsRef<str>>(texts: &[S]) -> i64 {
    let chars: usize = texts.iter().map(|t| t.as_ref().chars().count()).sum();
    (chars / 4) as i64
}
