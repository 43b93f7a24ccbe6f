//! Cache keys and source geometry fingerprints

use std::fmt;

use sha2::{Digest, Sha256};

use crate::dataset::BackendKind;

/// 16-byte hash identifying the source geometry of a spatial filter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct SourceFingerprint([u8; 16]);

impl SourceFingerprint {
    /// Fingerprint for filters without a source geometry
    pub fn none() -> Self {
        Self([0; 16])
    }

    pub fn from_raw(bytes: [u8; 16]) -> Self {
        Self(bytes)
    }

    /// SHA-256 of the bytes, truncated to 16 bytes
    pub fn from_bytes(bytes: &[u8]) -> Self {
        let digest = Sha256::digest(bytes);
        let mut out = [0u8; 16];
        out.copy_from_slice(&digest[..16]);
        Self(out)
    }

    /// Fingerprint of several geometries (e.g. WKT), order-sensitive
    pub fn of_geometries<'a>(geometries: impl IntoIterator<Item = &'a str>) -> Self {
        let mut hasher = Sha256::new();
        for geometry in geometries {
            hasher.update((geometry.len() as u64).to_le_bytes());
            hasher.update(geometry.as_bytes());
        }
        let digest = hasher.finalize();
        let mut out = [0u8; 16];
        out.copy_from_slice(&digest[..16]);
        Self(out)
    }

    pub fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        self.0.iter().map(|b| format!("{:02x}", b)).collect()
    }
}

impl fmt::Display for SourceFingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

/// Identity of a built filter expression
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    dataset_id: String,
    predicates: Vec<String>,
    /// Bit pattern of the buffer value, with -0.0 folded into 0.0
    buffer_bits: Option<u64>,
    source_fingerprint: SourceFingerprint,
    backend: BackendKind,
}

impl CacheKey {
    /// Predicate names are sorted and deduplicated
    pub fn new<S: Into<String>>(
        dataset_id: impl Into<String>,
        predicates: impl IntoIterator<Item = S>,
        buffer: Option<f64>,
        source_fingerprint: SourceFingerprint,
        backend: BackendKind,
    ) -> Self {
        let mut predicates: Vec<String> = predicates.into_iter().map(Into::into).collect();
        predicates.sort();
        predicates.dedup();
        Self {
            dataset_id: dataset_id.into(),
            predicates,
            buffer_bits: buffer.map(canonical_bits),
            source_fingerprint,
            backend,
        }
    }

    pub fn dataset_id(&self) -> &str {
        &self.dataset_id
    }

    pub fn predicates(&self) -> &[String] {
        &self.predicates
    }

    pub fn buffer(&self) -> Option<f64> {
        self.buffer_bits.map(f64::from_bits)
    }

    pub fn source_fingerprint(&self) -> SourceFingerprint {
        self.source_fingerprint
    }

    pub fn backend(&self) -> BackendKind {
        self.backend
    }
}

fn canonical_bits(value: f64) -> u64 {
    if value == 0.0 {
        0.0f64.to_bits()
    } else if value.is_nan() {
        f64::NAN.to_bits()
    } else {
        value.to_bits()
    }
}
