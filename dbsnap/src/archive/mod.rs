//! Archive format: a gzip-compressed JSON document with `metadata` and `data`.
//!
//! ```json
//! {
//!   "metadata": { "database": "marketplace", "createdAt": "...", "collectionCount": 2,
//!                 "backupMethod": "driver-native", "formatVersion": "2.0" },
//!   "data": { "users": [ { "_id": { "$oid": "..." }, "name": "Alice" } ], "orders": [] }
//! }
//! ```

pub mod codec;
pub mod naming;

use crate::utils::errors::{BackupError, Result};
use chrono::{DateTime, Utc};
use codec::TaggingPolicy;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use mongodb::bson::Document;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::io::{Read, Write};
use std::path::Path;

pub const BACKUP_METHOD: &str = "driver-native";
pub const FORMAT_VERSION: &str = "2.0";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArchiveMetadata {
    pub database: String,
    pub created_at: DateTime<Utc>,
    pub collection_count: usize,
    pub backup_method: String,
    pub format_version: String,
}

impl ArchiveMetadata {
    pub fn new(database: &str, created_at: DateTime<Utc>, collection_count: usize) -> Self {
        Self {
            database: database.to_string(),
            created_at,
            collection_count,
            backup_method: BACKUP_METHOD.to_string(),
            format_version: FORMAT_VERSION.to_string(),
        }
    }
}

/// A decoded archive: identifiers are real `ObjectId`s again.
#[derive(Debug, Clone, PartialEq)]
pub struct Archive {
    pub metadata: ArchiveMetadata,
    pub data: BTreeMap<String, Vec<Document>>,
}

/// An archive parsed as JSON but not decoded, so tagged and untagged
/// identifiers can still be told apart.
#[derive(Debug, Clone)]
pub struct RawArchive {
    pub metadata: ArchiveMetadata,
    pub data: Map<String, Value>,
}

impl Archive {
    pub fn document_count(&self) -> usize {
        self.data.values().map(Vec::len).sum()
    }

    /// Encode with the given tagging policy into uncompressed JSON bytes.
    pub fn to_json_bytes(&self, policy: TaggingPolicy) -> Result<Vec<u8>> {
        let mut data = Map::with_capacity(self.data.len());
        for (name, docs) in &self.data {
            let encoded = docs
                .iter()
                .map(|doc| codec::encode_document(doc, policy))
                .collect();
            data.insert(name.clone(), Value::Array(encoded));
        }

        let mut root = Map::with_capacity(2);
        root.insert("metadata".into(), serde_json::to_value(&self.metadata)?);
        root.insert("data".into(), Value::Object(data));
        Ok(serde_json::to_vec(&Value::Object(root))?)
    }

    /// Decompress, parse and decode an archive.
    pub fn from_compressed(bytes: &[u8]) -> Result<Self> {
        let raw = RawArchive::from_compressed(bytes)?;
        raw.decode()
    }
}

impl RawArchive {
    pub fn from_compressed(bytes: &[u8]) -> Result<Self> {
        let json = decompress(bytes)?;
        Self::from_json_bytes(&json)
    }

    pub fn from_json_bytes(json: &[u8]) -> Result<Self> {
        let root: Value = serde_json::from_slice(json)
            .map_err(|e| BackupError::CorruptArchive(format!("invalid JSON: {e}")))?;
        let Value::Object(mut root) = root else {
            return Err(BackupError::CorruptArchive("archive root is not an object".into()));
        };

        let metadata = root
            .remove("metadata")
            .ok_or_else(|| BackupError::CorruptArchive("missing 'metadata'".into()))?;
        let metadata: ArchiveMetadata = serde_json::from_value(metadata)
            .map_err(|e| BackupError::CorruptArchive(format!("invalid metadata: {e}")))?;

        let data = match root.remove("data") {
            Some(Value::Object(data)) => data,
            Some(_) => return Err(BackupError::CorruptArchive("'data' is not an object".into())),
            None => return Err(BackupError::CorruptArchive("missing 'data'".into())),
        };

        Ok(Self { metadata, data })
    }

    pub fn document_count(&self) -> usize {
        self.data
            .values()
            .map(|docs| docs.as_array().map_or(0, Vec::len))
            .sum()
    }

    /// Decode every collection, turning tagged values back into BSON types.
    pub fn decode(self) -> Result<Archive> {
        let mut data = BTreeMap::new();
        for (name, docs) in self.data {
            let Value::Array(docs) = docs else {
                return Err(BackupError::CorruptArchive(format!(
                    "collection '{name}' is not an array"
                )));
            };
            let decoded = docs
                .into_iter()
                .map(codec::decode_document)
                .collect::<Result<Vec<_>>>()
                .map_err(|e| match e {
                    BackupError::CorruptArchive(msg) => {
                        BackupError::CorruptArchive(format!("collection '{name}': {msg}"))
                    }
                    other => other,
                })?;
            data.insert(name, decoded);
        }
        Ok(Archive {
            metadata: self.metadata,
            data,
        })
    }
}

pub fn compress(data: &[u8]) -> Result<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::with_capacity(data.len() / 4), Compression::default());
    encoder.write_all(data)?;
    Ok(encoder.finish()?)
}

pub fn decompress(data: &[u8]) -> Result<Vec<u8>> {
    let mut decoder = GzDecoder::new(data);
    let mut out = Vec::new();
    decoder
        .read_to_end(&mut out)
        .map_err(|e| BackupError::CorruptArchive(format!("decompression failed: {e}")))?;
    Ok(out)
}

/// Read an archive file's bytes, mapping a missing file to `NotFound`.
pub async fn read_archive_bytes(path: &Path) -> Result<Vec<u8>> {
    match tokio::fs::read(path).await {
        Ok(bytes) => Ok(bytes),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            Err(BackupError::NotFound(path.display().to_string()))
        }
        Err(e) => Err(e.into()),
    }
}

/// Read and parse an archive without decoding identifiers.
pub async fn read_raw_archive(path: &Path) -> Result<RawArchive> {
    let bytes = read_archive_bytes(path).await?;
    tokio::task::spawn_blocking(move || RawArchive::from_compressed(&bytes)).await?
}

/// Read, parse and fully decode an archive.
pub async fn read_archive(path: &Path) -> Result<Archive> {
    let bytes = read_archive_bytes(path).await?;
    tokio::task::spawn_blocking(move || Archive::from_compressed(&bytes)).await?
}
