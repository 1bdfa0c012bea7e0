//! Vector codec and similarity helpers.
//!
//! Embeddings are stored as little-endian f32 BLOBs. Similarity is computed
//! in-process over candidate rows fetched through indexed filters; candidate
//! pools are bounded upstream so the scan stays small.

use athena_core::error::{Error, Result};

/// Encode a vector as a little-endian f32 BLOB
#[must_use]
pub fn encode_vector(vector: &[f32]) -> Vec<u8> {
    let mut blob = Vec::with_capacity(vector.len() * 4);
    for value in vector {
        blob.extend_from_slice(&value.to_le_bytes());
    }
    blob
}

/// Decode a BLOB back into a vector, checking alignment
pub fn decode_vector(blob: &[u8]) -> Result<Vec<f32>> {
    if blob.len() % 4 != 0 {
        return Err(Error::Storage(format!(
            "embedding blob length {} is not a multiple of 4",
            blob.len()
        )));
    }
    Ok(blob
        .chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect())
}

/// Decode and enforce the configured dimension
pub fn decode_vector_checked(blob: &[u8], expected_dimension: usize) -> Result<Vec<f32>> {
    let vector = decode_vector(blob)?;
    if vector.len() != expected_dimension {
        return Err(Error::DimensionMismatch {
            expected: expected_dimension,
            actual: vector.len(),
        });
    }
    Ok(vector)
}

/// Cosine similarity re-exported for row scoring
#[must_use]
pub fn cosine(a: &[f32], b: &[f32]) -> f32 {
    athena_core::embed::cosine_similarity(a, b)
}

/// Inner product for callers that pre-normalize
#[must_use]
pub fn inner_product(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip() {
        let vector = vec![0.25f32, -1.5, 3.75, 0.0];
        let blob = encode_vector(&vector);
        assert_eq!(blob.len(), 16);
        assert_eq!(decode_vector(&blob).unwrap(), vector);
    }

    #[test]
    fn test_misaligned_blob_rejected() {
        assert!(decode_vector(&[1, 2, 3]).is_err());
    }

    #[test]
    fn test_dimension_check() {
        let blob = encode_vector(&[1.0, 2.0]);
        assert!(decode_vector_checked(&blob, 2).is_ok());
        let err = decode_vector_checked(&blob, 3).unwrap_err();
        assert!(matches!(err, Error::DimensionMismatch { .. }));
    }

    #[test]
    fn test_inner_product() {
        assert_eq!(inner_product(&[1.0, 2.0], &[3.0, 4.0]), 11.0);
        assert_eq!(inner_product(&[1.0], &[1.0, 2.0]), 0.0);
    }
}
