use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{TundraError, TundraResult};

/// Tree-hash leaf size and the unit every part size is a multiple of
pub const ONE_MIB: u64 = 1024 * 1024;

/// Largest power-of-two exponent accepted by the backend (1 MiB << 12 = 4 GiB)
const MAX_PART_SHIFT: u32 = 12;

/// Size of one multipart upload part: 1 MiB × 2^k, 0 <= k <= 12
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u64", into = "u64")]
pub struct PartSize(u64);

impl PartSize {
    pub const ONE_MIB: PartSize = PartSize(ONE_MIB);

    pub fn new(bytes: u64) -> TundraResult<Self> {
        if bytes == 0 || bytes % ONE_MIB != 0 {
            return Err(TundraError::InvalidPartSize(bytes));
        }
        let mib = bytes / ONE_MIB;
        if !mib.is_power_of_two() || mib.trailing_zeros() > MAX_PART_SHIFT {
            return Err(TundraError::InvalidPartSize(bytes));
        }
        Ok(PartSize(bytes))
    }

    pub fn from_mib(mib: u64) -> TundraResult<Self> {
        let bytes = mib
            .checked_mul(ONE_MIB)
            .ok_or(TundraError::InvalidPartSize(u64::MAX))?;
        Self::new(bytes)
    }

    pub fn bytes(self) -> u64 {
        self.0
    }

    /// Number of 1 MiB tree-hash leaves in a full part
    pub fn leaves(self) -> u64 {
        self.0 / ONE_MIB
    }
}

impl Default for PartSize {
    fn default() -> Self {
        PartSize::ONE_MIB
    }
}

impl TryFrom<u64> for PartSize {
    type Error = TundraError;

    fn try_from(bytes: u64) -> TundraResult<Self> {
        PartSize::new(bytes)
    }
}

impl From<PartSize> for u64 {
    fn from(p: PartSize) -> u64 {
        p.0
    }
}

impl fmt::Display for PartSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}MiB", self.leaves())
    }
}

/// Inclusive byte range `[start, end]` within a stream of `total` bytes.
///
/// `total` is `None` when the final stream length is not yet known, which
/// renders as `*` in a Content-Range header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ByteRange {
    pub start: u64,
    pub end: u64,
    pub total: Option<u64>,
}

impl ByteRange {
    /// Number of bytes covered (always >= 1)
    pub fn len(&self) -> u64 {
        self.end - self.start + 1
    }

    pub fn is_empty(&self) -> bool {
        false
    }

    /// Same range with the total length withheld
    pub fn without_total(self) -> Self {
        ByteRange { total: None, ..self }
    }

    /// `bytes 0-1048575/2621440`, or `bytes 0-1048575/*` when the total is unknown
    pub fn content_range(&self) -> String {
        match self.total {
            Some(total) => format!("bytes {}-{}/{}", self.start, self.end, total),
            None => format!("bytes {}-{}/*", self.start, self.end),
        }
    }

    /// `bytes=0-1048575`, as sent in a Range request header
    pub fn http_range(&self) -> String {
        format!("bytes={}-{}", self.start, self.end)
    }
}

impl fmt::Display for ByteRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.content_range())
    }
}

/// Outcome of a finished multipart upload, as reported by the backend
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchiveReceipt {
    pub archive_id: String,
    /// Whole-archive tree hash, lowercase hex
    pub checksum: String,
    pub location: String,
}

/// A completed retrieval job whose output can be fetched by range
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetrievalJob {
    pub job_id: String,
    /// Set for archive-retrieval jobs
    pub archive_id: Option<String>,
    pub archive_size: Option<u64>,
    /// Set for inventory-retrieval jobs
    pub inventory_size: Option<u64>,
}
