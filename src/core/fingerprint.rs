//! DS-009: BLAKE3 fingerprints for compiled graphs.
//!
//! The fingerprint covers layers and inter-layer edges serialized as JSON, so
//! two runs over the same configuration produce the same value.

use super::error::{CompileError, Result};
use super::types::{Edge, LayerDescriptor};
use serde::Serialize;

/// Hash a string. Returns `"blake3:{hex}"`.
pub fn hash_string(s: &str) -> String {
    format!("blake3:{}", blake3::hash(s.as_bytes()).to_hex())
}

#[derive(Serialize)]
struct Canonical<'a> {
    layers: &'a [LayerDescriptor],
    edges: &'a [Edge],
}

/// Fingerprint of a compiled graph body.
pub fn fingerprint_graph(layers: &[LayerDescriptor], edges: &[Edge]) -> Result<String> {
    let json = serde_json::to_string(&Canonical { layers, edges })
        .map_err(|e| CompileError::Parse(format!("cannot serialize graph: {}", e)))?;
    Ok(hash_string(&json))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ds009_hash_string_deterministic() {
        let h1 = hash_string("hello");
        let h2 = hash_string("hello");
        assert_eq!(h1, h2);
        assert!(h1.starts_with("blake3:"));
        assert_eq!(h1.len(), 7 + 64);
    }

    #[test]
    fn test_ds009_hash_string_differs() {
        assert_ne!(hash_string("a"), hash_string("b"));
    }

    #[test]
    fn test_ds009_fingerprint_edges_change_hash() {
        let empty = fingerprint_graph(&[], &[]).unwrap();
        let one = fingerprint_graph(&[], &[Edge::new("a", "b")]).unwrap();
        assert_ne!(empty, one);
        assert_eq!(one, fingerprint_graph(&[], &[Edge::new("a", "b")]).unwrap());
    }
}
