//! Data Store Metadata
//!
//! The first entry of a Data Store chain establishes the chain and describes
//! the data stored on it.
//!
//! Its ext ids are the name ids of the chain, see [`name_ids`]:
//!
//! | Index | Content |
//! | ----: | ------- |
//! | 0     | The protocol name `data-store` |
//! | 1     | The 32 byte sha256d hash of the uncompressed data |
//! | 2..   | Optional application defined namespace |
//!
//! Its content is JSON:
//!
//! ```json
//! {
//!   "data-store": "1.0",
//!   "size": 102400,
//!   "compression": { "format": "gzip", "size": 102458 },
//!   "dbi-start": "<hex entry hash of the first DBI entry>",
//!   "metadata": { "any": "application json" }
//! }
//! ```
//!
//! `compression` and `metadata` are omitted when not used.
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::value::RawValue;
use thiserror::Error;

use crate::entry::{compute_chain_id, Entry};
use crate::hash::Bytes32;

pub const PROTOCOL: &str = "data-store";
pub const VERSION: &str = "1.0";

#[derive(Error, Debug)]
pub enum MetadataError {
    #[error("invalid len(ExtIDs): {0}")]
    ExtIdCount(usize),
    #[error("ExtIDs[0]: invalid protocol")]
    Protocol,
    #[error("ExtIDs[1]: invalid data hash length {0}")]
    DataHashLength(usize),
    #[error("ExtIDs do not reproduce the chain id {0}")]
    ChainId(Bytes32),
    #[error("Content: invalid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Content: unsupported \"version\" {0:?}")]
    Version(String),
    #[error("Content: invalid \"size\"")]
    Size,
    #[error("Content: missing \"dbi-start\"")]
    DbiStart,
    #[error("Content: unsupported \"compression\".\"format\" {0:?}")]
    Format(String),
    #[error("Content: invalid \"compression\".\"size\"")]
    CompressionSize,
}

/// Compression format of the stored data.
///
/// Formats are matched case-insensitively. Anything else parses into
/// `Unsupported` so that it can be rejected with a [`MetadataError::Format`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Format {
    Gzip,
    Zlib,
    Unsupported(String),
}

impl From<String> for Format {
    fn from(format: String) -> Self {
        match format.to_lowercase().as_str() {
            "gzip" => Format::Gzip,
            "zlib" => Format::Zlib,
            _ => Format::Unsupported(format),
        }
    }
}

impl From<Format> for String {
    fn from(format: Format) -> Self {
        format.to_string()
    }
}

impl FromStr for Format {
    type Err = MetadataError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match Format::from(s.to_string()) {
            Format::Unsupported(x) => Err(MetadataError::Format(x)),
            x => Ok(x),
        }
    }
}

impl fmt::Display for Format {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Format::Gzip => write!(f, "gzip"),
            Format::Zlib => write!(f, "zlib"),
            Format::Unsupported(x) => write!(f, "{}", x),
        }
    }
}

/// How the data is stored on chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Compression {
    pub format: Format,

    /// The compressed size, what is actually stored on chain.
    pub size: u64,
}

impl Compression {
    pub fn new(format: Format, size: u64) -> Self {
        Compression { format, size }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Metadata {
    /// The sha256d hash of the uncompressed data, carried in the ext ids.
    #[serde(skip)]
    pub data_hash: Bytes32,

    #[serde(rename = "data-store")]
    pub version: String,

    /// Uncompressed size of the data.
    pub size: u64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compression: Option<Compression>,

    /// Entry hash of the head of the DBI linked list.
    #[serde(rename = "dbi-start")]
    pub dbi_start: Option<Bytes32>,

    #[serde(rename = "metadata", default, skip_serializing_if = "Option::is_none")]
    pub app_metadata: Option<Box<RawValue>>,
}

/// The name ids of a Data Store chain, pass to
/// [`compute_chain_id`](crate::entry::compute_chain_id) to get the chain id.
pub fn name_ids<T: AsRef<[u8]>>(data_hash: &Bytes32, namespace: &[T]) -> Vec<Vec<u8>> {
    let mut ids = vec![PROTOCOL.as_bytes().to_vec(), data_hash.as_bytes().to_vec()];
    ids.extend(namespace.iter().map(|ns| ns.as_ref().to_vec()));
    ids
}

pub fn chain_id<T: AsRef<[u8]>>(data_hash: &Bytes32, namespace: &[T]) -> Bytes32 {
    compute_chain_id(&name_ids(data_hash, namespace))
}

impl Metadata {
    pub fn new(data_hash: Bytes32, size: u64) -> Self {
        Metadata {
            data_hash,
            version: VERSION.to_string(),
            size,
            compression: None,
            dbi_start: None,
            app_metadata: None,
        }
    }

    /// Size of the data as stored on chain.
    pub fn stored_size(&self) -> u64 {
        match &self.compression {
            Some(c) => c.size,
            None => self.size,
        }
    }

    /// Parse and validate the Metadata from the first entry of a Data Store
    /// chain.
    pub fn from_entry(entry: &Entry) -> Result<Metadata, MetadataError> {
        if entry.ext_ids.len() < 2 {
            return Err(MetadataError::ExtIdCount(entry.ext_ids.len()));
        }
        if entry.ext_ids[0] != PROTOCOL.as_bytes() {
            return Err(MetadataError::Protocol);
        }

        let data_hash = Bytes32::from_slice(&entry.ext_ids[1])
            .ok_or(MetadataError::DataHashLength(entry.ext_ids[1].len()))?;

        if compute_chain_id(&entry.ext_ids) != entry.chain_id {
            return Err(MetadataError::ChainId(entry.chain_id));
        }

        let mut md: Metadata = serde_json::from_slice(&entry.content)?;
        md.data_hash = data_hash;
        md.validate()?;

        Ok(md)
    }

    /// Checks the version, size and compression settings.
    pub fn validate_settings(&self) -> Result<(), MetadataError> {
        if self.version != VERSION {
            return Err(MetadataError::Version(self.version.clone()));
        }

        // Zero size data is prohibited
        if self.size == 0 {
            return Err(MetadataError::Size);
        }

        if let Some(compression) = &self.compression {
            if let Format::Unsupported(x) = &compression.format {
                return Err(MetadataError::Format(x.clone()));
            }
            if compression.size == 0 {
                return Err(MetadataError::CompressionSize);
            }
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), MetadataError> {
        self.validate_settings()?;
        if self.dbi_start.is_none() {
            return Err(MetadataError::DbiStart);
        }
        Ok(())
    }
}

#[cfg(test)]
mod test_metadata {
    use super::*;
    use crate::hash::sha256d;

    fn first_entry(namespace: &[&[u8]], content: &str) -> Entry {
        let data_hash = sha256d(b"data");
        let ids = name_ids(&data_hash, namespace);
        Entry::new(compute_chain_id(&ids), ids, content.as_bytes().to_vec())
    }

    fn dbi_start() -> String {
        sha256d(b"dbi").to_hex()
    }

    fn content(body: &str) -> String {
        format!(r#"{{"data-store":"1.0","dbi-start":"{}",{}}}"#, dbi_start(), body)
    }

    #[test]
    fn json_layout() {
        let mut md = Metadata::new(sha256d(b"data"), 100);
        md.dbi_start = Some(sha256d(b"dbi"));
        assert_eq!(
            serde_json::to_string(&md).unwrap(),
            format!(r#"{{"data-store":"1.0","size":100,"dbi-start":"{}"}}"#, dbi_start())
        );

        md.compression = Some(Compression::new(Format::Zlib, 50));
        md.app_metadata = Some(RawValue::from_string(r#"{"a":1}"#.to_string()).unwrap());
        assert_eq!(
            serde_json::to_string(&md).unwrap(),
            format!(
                r#"{{"data-store":"1.0","size":100,"compression":{{"format":"zlib","size":50}},"dbi-start":"{}","metadata":{{"a":1}}}}"#,
                dbi_start()
            )
        );
    }

    #[test]
    fn parse() {
        let entry = first_entry(
            &[b"app", b"ns"],
            &content(r#""size":12,"compression":{"format":"GZip","size":30},"metadata":[1,2]"#),
        );
        let md = Metadata::from_entry(&entry).unwrap();

        // Data hash comes from the same ext id that is length checked
        assert_eq!(md.data_hash, sha256d(b"data"));
        assert_eq!(md.size, 12);
        assert_eq!(md.stored_size(), 30);
        assert_eq!(md.compression, Some(Compression::new(Format::Gzip, 30)));
        assert_eq!(md.dbi_start, Some(sha256d(b"dbi")));
        assert_eq!(md.app_metadata.unwrap().get(), "[1,2]");
    }

    #[test]
    fn bad_ext_ids() {
        let mut entry = first_entry(&[], &content(r#""size":12"#));

        entry.ext_ids[0] = b"data-stor".to_vec();
        assert!(matches!(
            Metadata::from_entry(&entry),
            Err(MetadataError::Protocol)
        ));

        entry.ext_ids = vec![PROTOCOL.as_bytes().to_vec(), vec![1; 31]];
        assert!(matches!(
            Metadata::from_entry(&entry),
            Err(MetadataError::DataHashLength(31))
        ));

        entry.ext_ids.truncate(1);
        assert!(matches!(
            Metadata::from_entry(&entry),
            Err(MetadataError::ExtIdCount(1))
        ));
    }

    #[test]
    fn chain_id_mismatch() {
        let mut entry = first_entry(&[b"app"], &content(r#""size":12"#));
        entry.ext_ids.pop();
        assert!(matches!(
            Metadata::from_entry(&entry),
            Err(MetadataError::ChainId(_))
        ));
    }

    #[test]
    fn bad_content() {
        let cases = [
            (r#"{"data-store":"2.0","size":1,"dbi-start":null}"#.to_string(), "version"),
            (content(r#""size":0"#), "size"),
            (r#"{"data-store":"1.0","size":1}"#.to_string(), "dbi-start"),
            (content(r#""size":1,"compression":{"format":"zstd","size":1}"#), "format"),
            (content(r#""size":1,"compression":{"format":"gzip","size":0}"#), "compression size"),
            ("not json".to_string(), "json"),
        ];

        for (json, what) in cases.iter() {
            let entry = first_entry(&[], json);
            let res = Metadata::from_entry(&entry);
            let ok = match (*what, &res) {
                ("version", Err(MetadataError::Version(_))) => true,
                ("size", Err(MetadataError::Size)) => true,
                ("dbi-start", Err(MetadataError::DbiStart)) => true,
                ("format", Err(MetadataError::Format(f))) => f == "zstd",
                ("compression size", Err(MetadataError::CompressionSize)) => true,
                ("json", Err(MetadataError::Json(_))) => true,
                _ => false,
            };
            assert!(ok, "{}: {:?}", what, res);
        }
    }

    #[test]
    fn format_from_str() {
        assert_eq!("ZLIB".parse::<Format>().unwrap(), Format::Zlib);
        assert!("lz4".parse::<Format>().is_err());
    }

    #[test]
    fn namespace_changes_chain_id() {
        let hash = sha256d(b"data");
        let empty: [&[u8]; 0] = [];
        assert_ne!(chain_id(&hash, &empty), chain_id(&hash, &[b"app"]));
        assert_eq!(chain_id(&hash, &[b"app"]), chain_id(&hash, &[b"app".to_vec()]));
    }
}
