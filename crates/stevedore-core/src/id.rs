use std::fmt;

use serde::{Deserialize, Serialize};

/// One-character prefix of data pack blobs.
pub const PACK_BLOB_PREFIX_DATA: char = 'p';
/// One-character prefix of metadata (special) pack blobs.
pub const PACK_BLOB_PREFIX_SPECIAL: char = 'q';
/// One-character prefix of index blobs.
pub const INDEX_BLOB_PREFIX: char = 'n';
/// One-character prefix of manifest blobs.
pub const MANIFEST_BLOB_PREFIX: char = 'm';

/// Identifier of a blob at the storage backend: a prefix character followed
/// by a hex string (e.g. `p3f9a…`).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BlobId(String);

impl BlobId {
    pub fn new(id: impl Into<String>) -> Self {
        BlobId(id.into())
    }

    /// Generate a random blob id with the given prefix character.
    pub fn random(prefix: char) -> Self {
        let mut bytes = [0u8; 16];
        rand::RngCore::fill_bytes(&mut rand::thread_rng(), &mut bytes);
        BlobId(format!("{prefix}{}", hex::encode(bytes)))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn prefix(&self) -> Option<char> {
        self.0.chars().next()
    }

    pub fn has_prefix(&self, prefix: &str) -> bool {
        self.0.starts_with(prefix)
    }

    /// True for `p`/`q` pack blobs — the only garbage-collection candidates.
    pub fn is_pack(&self) -> bool {
        matches!(
            self.prefix(),
            Some(PACK_BLOB_PREFIX_DATA) | Some(PACK_BLOB_PREFIX_SPECIAL)
        )
    }
}

impl fmt::Display for BlobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for BlobId {
    fn from(s: &str) -> Self {
        BlobId(s.to_string())
    }
}

/// Identifier of a deduplicated content: an optional one-letter prefix in
/// `g..=z` (metadata contents) followed by a lowercase hex digest. Bare hex
/// ids are data contents and live in `p` packs; prefixed ids live in `q`
/// packs.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContentId(String);

impl ContentId {
    pub fn new(id: impl Into<String>) -> Self {
        ContentId(id.into())
    }

    /// Compute a content id from payload bytes: BLAKE2b-256 hex digest, with
    /// an optional metadata prefix letter.
    pub fn from_payload(prefix: Option<char>, data: &[u8]) -> Self {
        use blake2::digest::consts::U32;
        use blake2::{Blake2b, Digest};

        let digest = Blake2b::<U32>::digest(data);
        match prefix {
            Some(p) => ContentId(format!("{p}{}", hex::encode(digest))),
            None => ContentId(hex::encode(digest)),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The metadata prefix letter, if any. Data contents return `None`.
    pub fn prefix(&self) -> Option<char> {
        match self.0.chars().next() {
            Some(c) if c.is_ascii_lowercase() && !c.is_ascii_hexdigit() => Some(c),
            _ => None,
        }
    }

    /// The pack-blob prefix this content's payload is written under.
    pub fn pack_prefix(&self) -> char {
        if self.prefix().is_some() {
            PACK_BLOB_PREFIX_SPECIAL
        } else {
            PACK_BLOB_PREFIX_DATA
        }
    }
}

impl fmt::Display for ContentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ContentId {
    fn from(s: &str) -> Self {
        ContentId(s.to_string())
    }
}

/// Identifier of a manifest entry.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ManifestId(String);

impl ManifestId {
    pub fn new(id: impl Into<String>) -> Self {
        ManifestId(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ManifestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Inclusive range of content ids, compared lexicographically.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentIdRange {
    pub min: ContentId,
    pub max: ContentId,
}

impl ContentIdRange {
    /// Range covering every content id.
    pub fn all() -> Self {
        ContentIdRange {
            min: ContentId::new(""),
            max: ContentId::new("\u{7f}"),
        }
    }

    /// Range covering only prefixed (metadata) content ids.
    pub fn all_prefixed() -> Self {
        ContentIdRange {
            min: ContentId::new("g"),
            max: ContentId::new("\u{7f}"),
        }
    }

    pub fn contains(&self, id: &ContentId) -> bool {
        *id >= self.min && *id <= self.max
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_id_prefix_detection() {
        assert_eq!(ContentId::new("k0a1b2c").prefix(), Some('k'));
        assert_eq!(ContentId::new("0a1b2c").prefix(), None);
        assert_eq!(ContentId::new("abc123").prefix(), None); // a-f are hex
        assert_eq!(ContentId::new("g12345").prefix(), Some('g'));
    }

    #[test]
    fn content_pack_prefix() {
        assert_eq!(ContentId::new("deadbeef").pack_prefix(), 'p');
        assert_eq!(ContentId::new("kdeadbeef").pack_prefix(), 'q');
    }

    #[test]
    fn range_contains() {
        let r = ContentIdRange::all_prefixed();
        assert!(r.contains(&ContentId::new("kabc")));
        assert!(!r.contains(&ContentId::new("abc")));
        assert!(ContentIdRange::all().contains(&ContentId::new("abc")));
    }

    #[test]
    fn blob_id_pack_detection() {
        assert!(BlobId::new("p123").is_pack());
        assert!(BlobId::new("q123").is_pack());
        assert!(!BlobId::new("n123").is_pack());
        assert!(!BlobId::new("m123").is_pack());
    }

    #[test]
    fn random_blob_id_has_prefix() {
        let id = BlobId::random('p');
        assert_eq!(id.prefix(), Some('p'));
        assert_eq!(id.as_str().len(), 33);
    }
}
