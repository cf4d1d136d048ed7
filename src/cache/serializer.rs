//! Entry Serializers
//!
//! Codecs that turn a [`CacheEntry`] into the bytes stored by the distributed
//! backend. JSON is the baseline; the compressed and MessagePack variants
//! round-trip every value JSON can represent.

use crate::cache::compression::{CompressionConfig, FrameCodec};
use crate::cache::entry::CacheEntry;
use crate::error::{Error, Result};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Trait for entry codecs
pub trait EntrySerializer: Send + Sync {
    /// Codec name for logs
    fn name(&self) -> &'static str;

    /// Encode an entry
    fn serialize(&self, entry: &CacheEntry) -> Result<Bytes>;

    /// Decode an entry
    fn deserialize(&self, bytes: &[u8]) -> Result<CacheEntry>;
}

/// Plain JSON
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonSerializer;

impl EntrySerializer for JsonSerializer {
    fn name(&self) -> &'static str {
        "json"
    }

    fn serialize(&self, entry: &CacheEntry) -> Result<Bytes> {
        serde_json::to_vec(entry)
            .map(Bytes::from)
            .map_err(|e| Error::Serialization(format!("JSON encode failed: {}", e)))
    }

    fn deserialize(&self, bytes: &[u8]) -> Result<CacheEntry> {
        serde_json::from_slice(bytes)
            .map_err(|e| Error::Serialization(format!("JSON decode failed: {}", e)))
    }
}

/// JSON wrapped in a compression frame
pub struct CompressedSerializer {
    codec: FrameCodec,
}

impl CompressedSerializer {
    pub fn new(config: CompressionConfig) -> Self {
        Self {
            codec: FrameCodec::new(config),
        }
    }
}

impl EntrySerializer for CompressedSerializer {
    fn name(&self) -> &'static str {
        "compressed"
    }

    fn serialize(&self, entry: &CacheEntry) -> Result<Bytes> {
        let json = JsonSerializer.serialize(entry)?;
        Ok(self.codec.encode(&json))
    }

    fn deserialize(&self, bytes: &[u8]) -> Result<CacheEntry> {
        let json = self.codec.decode(bytes)?;
        JsonSerializer.deserialize(&json)
    }
}

/// MessagePack with named fields
#[derive(Debug, Default, Clone, Copy)]
pub struct MessagePackSerializer;

impl EntrySerializer for MessagePackSerializer {
    fn name(&self) -> &'static str {
        "msgpack"
    }

    fn serialize(&self, entry: &CacheEntry) -> Result<Bytes> {
        rmp_serde::to_vec_named(entry)
            .map(Bytes::from)
            .map_err(|e| Error::Serialization(format!("MessagePack encode failed: {}", e)))
    }

    fn deserialize(&self, bytes: &[u8]) -> Result<CacheEntry> {
        rmp_serde::from_slice(bytes)
            .map_err(|e| Error::Serialization(format!("MessagePack decode failed: {}", e)))
    }
}

/// Serializer selection as it appears in configuration
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum SerializerKind {
    #[default]
    Json,
    Compressed(CompressionConfig),
    Msgpack,
}

impl SerializerKind {
    /// Instantiate the configured serializer
    pub fn build(&self) -> Arc<dyn EntrySerializer> {
        match self {
            SerializerKind::Json => Arc::new(JsonSerializer),
            SerializerKind::Compressed(config) => Arc::new(CompressedSerializer::new(config.clone())),
            SerializerKind::Msgpack => Arc::new(MessagePackSerializer),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::compression::CompressionAlgorithm;
    use serde_json::json;
    use std::time::Duration;

    fn sample_entry() -> CacheEntry {
        let mut entry = CacheEntry::new(
            json!({
                "id": 18446744073709551615u64,
                "balance": -12.5,
                "name": "alice",
                "roles": ["admin", "ops"],
                "profile": {"active": true, "nickname": null},
                "note": "lorem ipsum dolor sit amet ".repeat(80),
            }),
            Duration::from_millis(90_500),
        )
        .with_tags(["users", "tenant:7"]);
        entry.hits = 4;
        entry.metadata.insert("source".into(), json!("db"));
        entry
    }

    #[test]
    fn test_every_serializer_is_lossless() {
        let kinds = [
            SerializerKind::Json,
            SerializerKind::Msgpack,
            SerializerKind::Compressed(CompressionConfig::default()),
            SerializerKind::Compressed(CompressionConfig {
                algorithm: CompressionAlgorithm::Zstd,
                min_size_bytes: 0,
                level: 5,
            }),
        ];
        let entry = sample_entry();

        for kind in kinds {
            let serializer = kind.build();
            let bytes = serializer.serialize(&entry).unwrap();
            let decoded = serializer.deserialize(&bytes).unwrap();
            assert_eq!(decoded, entry, "{} must round-trip", serializer.name());
        }
    }

    #[test]
    fn test_compressed_is_smaller_than_json() {
        let entry = sample_entry();
        let json = JsonSerializer.serialize(&entry).unwrap();
        let compressed = SerializerKind::Compressed(CompressionConfig::default())
            .build()
            .serialize(&entry)
            .unwrap();
        assert!(compressed.len() < json.len());
    }

    #[test]
    fn test_garbage_is_a_serialization_error() {
        let err = JsonSerializer.deserialize(b"not json").unwrap_err();
        assert!(matches!(err, Error::Serialization(_)));
        assert!(MessagePackSerializer.deserialize(&[0xc1]).is_err());
    }

    #[test]
    fn test_kind_from_config() {
        let kind: SerializerKind = serde_json::from_value(json!({"kind": "msgpack"})).unwrap();
        assert_eq!(kind, SerializerKind::Msgpack);

        let kind: SerializerKind =
            serde_json::from_value(json!({"kind": "compressed", "algorithm": "snappy"})).unwrap();
        match kind {
            SerializerKind::Compressed(config) => {
                assert_eq!(config.algorithm, CompressionAlgorithm::Snappy);
                assert_eq!(config.min_size_bytes, 1024);
            }
            other => panic!("unexpected serializer kind {:?}", other),
        }
    }
}
