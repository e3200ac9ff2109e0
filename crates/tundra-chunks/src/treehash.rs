//! SHA-256 tree hashing over 1 MiB leaves
//!
//! Each 1 MiB leaf (the last may be shorter) is hashed with SHA-256, then
//! adjacent digests are paired left to right and hashed again until a single
//! root remains. An odd node at the end of a level is carried up unchanged.
//!
//! Because part sizes are 1 MiB × 2^k, the tree hash of a whole archive equals
//! `combine` applied to the tree hashes of its parts, in order.

use rayon::prelude::*;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};
use std::fmt;
use tokio::io::{AsyncRead, AsyncReadExt};
use tundra_core::{TundraError, TundraResult, ONE_MIB};

/// Leaf size in bytes
pub const LEAF_SIZE: usize = ONE_MIB as usize;

/// A 32-byte SHA-256 tree hash, displayed as 64 lowercase hex chars
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct HashDigest([u8; 32]);

impl HashDigest {
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        HashDigest(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Parse a 64-char hex string
    pub fn from_hex(s: &str) -> TundraResult<Self> {
        let mut out = [0u8; 32];
        hex::decode_to_slice(s, &mut out)
            .map_err(|e| anyhow::anyhow!("invalid tree hash hex '{}': {}", s, e))?;
        Ok(HashDigest(out))
    }
}

impl fmt::Display for HashDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for HashDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "HashDigest({})", self.to_hex())
    }
}

impl Serialize for HashDigest {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for HashDigest {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        HashDigest::from_hex(&s).map_err(serde::de::Error::custom)
    }
}

fn sha256(data: &[u8]) -> HashDigest {
    HashDigest(Sha256::digest(data).into())
}

fn parent(left: &HashDigest, right: &HashDigest) -> HashDigest {
    let mut hasher = Sha256::new();
    hasher.update(left.0);
    hasher.update(right.0);
    HashDigest(hasher.finalize().into())
}

/// Reduce an ordered list of digests to a single root by pairwise combination.
///
/// Applied to leaf digests this yields the tree hash of the span; applied to
/// the tree hashes of consecutive aligned parts it yields the tree hash of
/// their concatenation.
pub fn combine(nodes: &[HashDigest]) -> TundraResult<HashDigest> {
    let mut level: Vec<HashDigest> = nodes.to_vec();
    if level.is_empty() {
        return Err(TundraError::EmptySpan);
    }

    while level.len() > 1 {
        level = level
            .chunks(2)
            .map(|pair| match pair {
                [left, right] => parent(left, right),
                _ => pair[0],
            })
            .collect();
    }

    Ok(level[0])
}

/// Tree hash of an in-memory span.
///
/// Leaves of multi-MiB spans are hashed in parallel; the result is identical
/// to the sequential computation.
pub fn tree_hash(data: &[u8]) -> TundraResult<HashDigest> {
    if data.is_empty() {
        return Err(TundraError::EmptySpan);
    }
    if data.len() <= LEAF_SIZE {
        return Ok(sha256(data));
    }

    let leaves: Vec<HashDigest> = data.par_chunks(LEAF_SIZE).map(sha256).collect();
    combine(&leaves)
}

/// Incremental tree hasher accepting input in arbitrarily sized slices
#[derive(Clone, Default)]
pub struct TreeHasher {
    leaves: Vec<HashDigest>,
    current: Sha256,
    filled: usize,
    total: u64,
}

impl TreeHasher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&mut self, mut data: &[u8]) {
        self.total += data.len() as u64;
        while !data.is_empty() {
            let take = (LEAF_SIZE - self.filled).min(data.len());
            self.current.update(&data[..take]);
            self.filled += take;
            data = &data[take..];

            if self.filled == LEAF_SIZE {
                self.flush_leaf();
            }
        }
    }

    /// Bytes fed so far
    pub fn bytes_hashed(&self) -> u64 {
        self.total
    }

    pub fn finish(mut self) -> TundraResult<HashDigest> {
        if self.filled > 0 {
            self.flush_leaf();
        }
        combine(&self.leaves)
    }

    fn flush_leaf(&mut self) {
        let leaf = std::mem::take(&mut self.current).finalize();
        self.leaves.push(HashDigest(leaf.into()));
        self.filled = 0;
    }
}

/// Tree hash of the next `length` bytes of `reader`, read one leaf at a time.
///
/// A reader that ends before `length` bytes yields `SourceRead(UnexpectedEof)`.
pub async fn digest_reader<R>(reader: &mut R, length: u64) -> TundraResult<HashDigest>
where
    R: AsyncRead + Unpin,
{
    if length == 0 {
        return Err(TundraError::EmptySpan);
    }

    let mut hasher = TreeHasher::new();
    let mut buf = vec![0u8; LEAF_SIZE.min(length as usize)];
    let mut remaining = length;

    while remaining > 0 {
        let want = (remaining as usize).min(LEAF_SIZE);
        reader
            .read_exact(&mut buf[..want])
            .await
            .map_err(TundraError::SourceRead)?;
        hasher.update(&buf[..want]);
        remaining -= want as u64;
    }

    tracing::trace!(length, "tree hash over reader complete");
    hasher.finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn make_data(size: usize) -> Vec<u8> {
        (0..size).map(|i| (i.wrapping_mul(31) ^ (i >> 7)) as u8).collect()
    }

    #[test]
    fn single_leaf_is_plain_sha256() {
        let data = make_data(1000);
        assert_eq!(tree_hash(&data).unwrap(), sha256(&data));

        let exact = make_data(LEAF_SIZE);
        assert_eq!(tree_hash(&exact).unwrap(), sha256(&exact));
    }

    #[test]
    fn known_vector_for_short_input() {
        // SHA-256("abc")
        assert_eq!(
            tree_hash(b"abc").unwrap().to_hex(),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn two_leaves_hash_their_concatenated_digests() {
        let data = make_data(2 * LEAF_SIZE);
        let (a, b) = data.split_at(LEAF_SIZE);
        let expected = parent(&sha256(a), &sha256(b));
        assert_eq!(tree_hash(&data).unwrap(), expected);
    }

    #[test]
    fn odd_leaf_is_carried_up() {
        let data = make_data(3 * LEAF_SIZE);
        let a = sha256(&data[..LEAF_SIZE]);
        let b = sha256(&data[LEAF_SIZE..2 * LEAF_SIZE]);
        let c = sha256(&data[2 * LEAF_SIZE..]);
        let expected = parent(&parent(&a, &b), &c);
        assert_eq!(tree_hash(&data).unwrap(), expected);
    }

    #[test]
    fn short_final_leaf() {
        let data = make_data(LEAF_SIZE + 17);
        let expected = parent(&sha256(&data[..LEAF_SIZE]), &sha256(&data[LEAF_SIZE..]));
        assert_eq!(tree_hash(&data).unwrap(), expected);
    }

    #[test]
    fn empty_span_is_rejected() {
        assert!(matches!(tree_hash(&[]), Err(TundraError::EmptySpan)));
        assert!(matches!(combine(&[]), Err(TundraError::EmptySpan)));
        assert!(matches!(TreeHasher::new().finish(), Err(TundraError::EmptySpan)));
    }

    #[test]
    fn streaming_matches_one_shot_across_leaf_boundaries() {
        let data = make_data(5 * LEAF_SIZE / 2);
        let mut hasher = TreeHasher::new();
        for piece in data.chunks(300_007) {
            hasher.update(piece);
        }
        assert_eq!(hasher.bytes_hashed(), data.len() as u64);
        assert_eq!(hasher.finish().unwrap(), tree_hash(&data).unwrap());
    }

    #[test]
    fn composing_aligned_parts_matches_whole() {
        // 2 MiB parts over a 5.5 MiB span: parts of 2, 2, 1.5 MiB
        let data = make_data(11 * LEAF_SIZE / 2);
        let parts: Vec<HashDigest> = data
            .chunks(2 * LEAF_SIZE)
            .map(|p| tree_hash(p).unwrap())
            .collect();
        assert_eq!(combine(&parts).unwrap(), tree_hash(&data).unwrap());
    }

    #[test]
    fn hex_roundtrip_and_rejects_garbage() {
        let h = tree_hash(b"tundra").unwrap();
        let back = HashDigest::from_hex(&h.to_hex()).unwrap();
        assert_eq!(h, back);
        assert!(HashDigest::from_hex("zz").is_err());
        assert!(HashDigest::from_hex(&"ab".repeat(31)).is_err());
    }

    #[test]
    fn serde_uses_hex_string() {
        let h = tree_hash(b"tundra").unwrap();
        let json = serde_json::to_string(&h).unwrap();
        assert_eq!(json, format!("\"{}\"", h.to_hex()));
        let back: HashDigest = serde_json::from_str(&json).unwrap();
        assert_eq!(back, h);
    }

    #[tokio::test]
    async fn reader_digest_matches_slice_digest() {
        let data = make_data(3 * LEAF_SIZE + 5);
        let mut reader = std::io::Cursor::new(data.clone());
        let h = digest_reader(&mut reader, data.len() as u64).await.unwrap();
        assert_eq!(h, tree_hash(&data).unwrap());
    }

    #[tokio::test]
    async fn reader_digest_covers_only_requested_length() {
        let data = make_data(LEAF_SIZE + 100);
        let mut reader = std::io::Cursor::new(data.clone());
        let h = digest_reader(&mut reader, LEAF_SIZE as u64).await.unwrap();
        assert_eq!(h, tree_hash(&data[..LEAF_SIZE]).unwrap());
    }

    #[tokio::test]
    async fn short_reader_is_a_source_error() {
        let mut reader = std::io::Cursor::new(vec![1u8; 10]);
        let err = digest_reader(&mut reader, 20).await.unwrap_err();
        assert!(matches!(err, TundraError::SourceRead(_)));
    }

    proptest! {
        #[test]
        fn tree_hash_is_deterministic(data in proptest::collection::vec(any::<u8>(), 1..=4096)) {
            let h1 = tree_hash(&data).unwrap();
            let h2 = tree_hash(&data).unwrap();
            prop_assert_eq!(h1, h2, "tree hash must be deterministic for same input");
        }

        #[test]
        fn streaming_split_point_is_irrelevant(
            data in proptest::collection::vec(any::<u8>(), 1..=4096),
            split in 0usize..=4096,
        ) {
            let split = split.min(data.len());
            let mut hasher = TreeHasher::new();
            hasher.update(&data[..split]);
            hasher.update(&data[split..]);
            prop_assert_eq!(hasher.finish().unwrap(), tree_hash(&data).unwrap());
        }
    }
}
