//! tundra-chunks: part range calculation and SHA-256 tree hashing
//!
//! # Overview
//! - `range`: half-open-inclusive byte ranges for the n-th part of a stream
//! - `treehash`: hierarchical SHA-256 digest over 1 MiB leaves, the integrity
//!   checksum the backend verifies for every part and every archive

pub mod range;
pub mod treehash;

// Convenience re-exports for the most common operations
pub use range::{part_count, part_ranges, range, PartRanges};
pub use treehash::{combine, digest_reader, tree_hash, HashDigest, TreeHasher};
