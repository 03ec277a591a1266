//! Record encoding shared by the store backends.
//!
//! Vectors are packed as little-endian `f32` so that a round-trip is bit-exact,
//! and every record carries a SHA-256 of the packed bytes.

use rollcall_core::Embedding;
use sha2::{Digest, Sha256};
use thiserror::Error;

#[derive(Error, Debug, PartialEq)]
pub enum CodecError {
    #[error("embeddings have mixed dimensions ({first} and {other})")]
    MixedDimensions { first: usize, other: usize },
    #[error("embedding contains non-finite values")]
    NonFinite,
    #[error("expected {expected} bytes for {count}x{dimension} vectors, got {actual}")]
    LengthMismatch {
        dimension: usize,
        count: usize,
        expected: usize,
        actual: usize,
    },
    #[error("checksum mismatch")]
    ChecksumMismatch,
}

/// Packed form of a person's embeddings.
#[derive(Debug, Clone, PartialEq)]
pub struct PackedVectors {
    pub dimension: usize,
    pub count: usize,
    pub bytes: Vec<u8>,
}

impl PackedVectors {
    pub fn checksum(&self) -> String {
        checksum(&self.bytes)
    }
}

pub fn checksum(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}

pub fn pack(embeddings: &[Embedding]) -> Result<PackedVectors, CodecError> {
    let dimension = embeddings.first().map_or(0, Embedding::dim);
    let mut bytes = Vec::with_capacity(dimension * embeddings.len() * std::mem::size_of::<f32>());
    for embedding in embeddings {
        if embedding.dim() != dimension {
            return Err(CodecError::MixedDimensions {
                first: dimension,
                other: embedding.dim(),
            });
        }
        if !embedding.is_finite() {
            return Err(CodecError::NonFinite);
        }
        for value in &embedding.values {
            bytes.extend_from_slice(&value.to_le_bytes());
        }
    }
    Ok(PackedVectors {
        dimension,
        count: embeddings.len(),
        bytes,
    })
}

/// Unpack and verify a stored record.
pub fn unpack(packed: &PackedVectors, expected_checksum: &str) -> Result<Vec<Embedding>, CodecError> {
    let expected = packed
        .dimension
        .checked_mul(packed.count)
        .and_then(|n| n.checked_mul(std::mem::size_of::<f32>()))
        .unwrap_or(usize::MAX);
    if packed.bytes.len() != expected {
        return Err(CodecError::LengthMismatch {
            dimension: packed.dimension,
            count: packed.count,
            expected,
            actual: packed.bytes.len(),
        });
    }
    if packed.checksum() != expected_checksum {
        return Err(CodecError::ChecksumMismatch);
    }
    if packed.count == 0 {
        return Ok(Vec::new());
    }
    if packed.dimension == 0 {
        return Ok(vec![Embedding::new(Vec::new()); packed.count]);
    }
    let row_bytes = packed
        .dimension
        .checked_mul(std::mem::size_of::<f32>())
        .ok_or(CodecError::LengthMismatch {
            dimension: packed.dimension,
            count: packed.count,
            expected: usize::MAX,
            actual: packed.bytes.len(),
        })?;

    packed
        .bytes
        .chunks_exact(row_bytes)
        .map(|row| {
            let values: Vec<f32> = row
                .chunks_exact(4)
                .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
                .collect();
            let embedding = Embedding::new(values);
            if embedding.is_finite() {
                Ok(embedding)
            } else {
                Err(CodecError::NonFinite)
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn awkward() -> Vec<Embedding> {
        vec![
            Embedding::new(vec![0.1, -0.2, 1.0e-30, f32::MIN_POSITIVE]),
            Embedding::new(vec![f32::MAX, f32::MIN, 0.333_333_34, -0.0]),
        ]
    }

    #[test]
    fn test_round_trip_is_bit_exact() {
        let original = awkward();
        let packed = pack(&original).unwrap();
        assert_eq!(packed.dimension, 4);
        assert_eq!(packed.count, 2);
        let restored = unpack(&packed, &packed.checksum()).unwrap();
        for (a, b) in original.iter().zip(&restored) {
            let bits_a: Vec<u32> = a.values.iter().map(|v| v.to_bits()).collect();
            let bits_b: Vec<u32> = b.values.iter().map(|v| v.to_bits()).collect();
            assert_eq!(bits_a, bits_b);
        }
    }

    #[test]
    fn test_empty_set() {
        let packed = pack(&[]).unwrap();
        assert_eq!(packed.count, 0);
        assert!(unpack(&packed, &packed.checksum()).unwrap().is_empty());
    }

    #[test]
    fn test_pack_rejects_mixed_dimensions() {
        let err = pack(&[Embedding::new(vec![0.0]), Embedding::new(vec![0.0, 1.0])]).unwrap_err();
        assert_eq!(err, CodecError::MixedDimensions { first: 1, other: 2 });
    }

    #[test]
    fn test_pack_rejects_nan() {
        assert_eq!(pack(&[Embedding::new(vec![f32::NAN])]).unwrap_err(), CodecError::NonFinite);
    }

    #[test]
    fn test_unpack_detects_flipped_byte() {
        let mut packed = pack(&awkward()).unwrap();
        let sum = packed.checksum();
        packed.bytes[3] ^= 0x01;
        assert_eq!(unpack(&packed, &sum).unwrap_err(), CodecError::ChecksumMismatch);
    }

    #[test]
    fn test_unpack_empty_with_huge_dimension() {
        let packed = PackedVectors {
            dimension: 1 << 62,
            count: 0,
            bytes: Vec::new(),
        };
        assert!(unpack(&packed, &checksum(&[])).unwrap().is_empty());
    }

    #[test]
    fn test_unpack_rejects_overflowing_shape() {
        let packed = PackedVectors {
            dimension: usize::MAX / 2,
            count: 3,
            bytes: vec![0; 12],
        };
        let sum = packed.checksum();
        assert!(matches!(
            unpack(&packed, &sum),
            Err(CodecError::LengthMismatch { expected: usize::MAX, .. })
        ));
    }

    #[test]
    fn test_unpack_detects_truncation() {
        let mut packed = pack(&awkward()).unwrap();
        packed.bytes.truncate(10);
        assert!(matches!(
            unpack(&packed, "irrelevant"),
            Err(CodecError::LengthMismatch { expected: 32, actual: 10, .. })
        ));
    }
}
