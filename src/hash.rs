use std::fmt;
use std::io::{copy, Read, Write};
use std::str::FromStr;

use serde::de::{self, Unexpected, Visitor};
use serde::Deserialize;
use serde::Deserializer;
use serde::Serialize;
use serde::Serializer;
use sha2::{Digest, Sha256};

pub const HASH_SIZE: usize = 32;

/// A 32 byte identifier, used for entry hashes, chain ids and data hashes.
#[derive(PartialEq, Eq, PartialOrd, Ord, Clone, Copy, Default, Hash)]
pub struct Bytes32(pub [u8; HASH_SIZE]);

impl Bytes32 {
    pub fn as_bytes(&self) -> &[u8; HASH_SIZE] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn from_hex(hash: &str) -> Result<Self, hex::FromHexError> {
        let mut bytes = [0u8; HASH_SIZE];
        hex::decode_to_slice(hash, &mut bytes)?;
        Ok(Bytes32(bytes))
    }

    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        bytes.try_into().ok().map(Bytes32)
    }
}

impl FromStr for Bytes32 {
    type Err = hex::FromHexError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Bytes32::from_hex(s)
    }
}

impl fmt::Display for Bytes32 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl fmt::Debug for Bytes32 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Bytes32({})", self.to_hex())
    }
}

pub fn sha256(data: &[u8]) -> Bytes32 {
    Bytes32(Sha256::digest(data).into())
}

/// Hash of a hash, the integrity digest for the stored data.
pub fn sha256d(data: &[u8]) -> Bytes32 {
    sha256(sha256(data).as_bytes())
}

pub fn data_hash<R: Read>(data: &mut R) -> Result<Bytes32, std::io::Error> {
    let mut hash = Sha256::new();
    copy(data, &mut hash)?;
    Ok(sha256(&hash.finalize()))
}

/// Passes everything through to the inner writer while hashing it.
pub struct HashWriter<W: Write> {
    inner: W,
    hash: Sha256,
}

impl<W: Write> HashWriter<W> {
    pub fn new(writer: W) -> Self {
        HashWriter {
            inner: writer,
            hash: Sha256::new(),
        }
    }

    /// Returns the inner writer and the sha256d of all bytes written.
    pub fn finalize(self) -> (W, Bytes32) {
        (self.inner, sha256(&self.hash.finalize()))
    }
}

impl<W: Write> Write for HashWriter<W> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let len = self.inner.write(buf)?;
        self.hash.update(&buf[..len]);
        Ok(len)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.inner.flush()
    }
}

// Serde impls, hex strings on the wire
impl Serialize for Bytes32 {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

struct Bytes32Visitor;

impl Visitor<'_> for Bytes32Visitor {
    type Value = Bytes32;

    fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
        write!(formatter, "a hex string encoding 32 bytes")
    }

    fn visit_str<E: de::Error>(self, v: &str) -> Result<Self::Value, E> {
        Bytes32::from_hex(v).map_err(|_| de::Error::invalid_value(Unexpected::Str(v), &self))
    }
}

impl<'de> Deserialize<'de> for Bytes32 {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Bytes32, D::Error> {
        deserializer.deserialize_str(Bytes32Visitor)
    }
}
