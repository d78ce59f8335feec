use crate::error::VectorError;
use crate::indexer::extract::SourceFunction;
use crate::storage::function_store::StoredFunction;

#[derive(Debug, Clone, PartialEq)]
pub struct SearchHit {
    pub function: SourceFunction,
    /// `1 - cosine_similarity`; 0 is most similar.
    pub distance: f32,
    pub last_updated: u64,
}

/// Ranked nearest-neighbour lookup over stored function vectors.
pub trait SimilarityIndex {
    fn search(&self, query: &[f32], limit: usize) -> Result<Vec<SearchHit>, VectorError>;
}

/// Cosine similarity of two equal-length, non-zero vectors.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> Result<f32, VectorError> {
    if a.len() != b.len() {
        return Err(VectorError::DimensionMismatch {
            expected: a.len(),
            actual: b.len(),
        });
    }

    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;
    for (x, y) in a.iter().zip(b) {
        let (x, y) = (f64::from(*x), f64::from(*y));
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return Err(VectorError::ZeroMagnitude);
    }

    Ok((dot / (norm_a.sqrt() * norm_b.sqrt())).clamp(-1.0, 1.0) as f32)
}

pub fn cosine_distance(a: &[f32], b: &[f32]) -> Result<f32, VectorError> {
    Ok(1.0 - cosine_similarity(a, b)?)
}

/// Brute-force ranking over `records` in iteration order.
///
/// Records without a vector are skipped. Equal distances keep input order.
pub fn rank(
    records: &[StoredFunction],
    query: &[f32],
    limit: usize,
) -> Result<Vec<SearchHit>, VectorError> {
    if limit == 0 || records.is_empty() {
        return Ok(Vec::new());
    }

    let mut scored = Vec::with_capacity(records.len());
    for record in records {
        let Some(vector) = record.embedding.as_deref() else {
            continue;
        };
        scored.push((record, cosine_distance(query, vector)?));
    }

    scored.sort_by(|a, b| a.1.total_cmp(&b.1));
    scored.truncate(limit);

    Ok(scored
        .into_iter()
        .map(|(record, distance)| SearchHit {
            function: record.function.clone(),
            distance,
            last_updated: record.last_updated,
        })
        .collect())
}
