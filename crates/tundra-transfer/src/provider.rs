//! Capabilities the transfer engine consumes but never implements itself.
//!
//! A backend (see tundra-storage) provides the multipart context and the
//! ranged fetch. Byte sources and sinks are plain tokio I/O traits.

use async_trait::async_trait;
use bytes::Bytes;
use tundra_chunks::HashDigest;
use tundra_core::{ArchiveReceipt, ByteRange, PartSize, TundraResult};

/// Opens remote multipart upload contexts
#[async_trait]
pub trait MultipartProvider: Send + Sync {
    type Upload: MultipartUpload;

    async fn open(
        &self,
        part_size: PartSize,
        description: Option<&str>,
    ) -> TundraResult<Self::Upload>;
}

/// One open multipart upload on the remote side
#[async_trait]
pub trait MultipartUpload: Send {
    /// Opaque identifier assigned by the backend
    fn upload_id(&self) -> &str;

    async fn submit_part(
        &mut self,
        range: ByteRange,
        checksum: HashDigest,
        body: Bytes,
    ) -> TundraResult<()>;

    async fn complete(
        &mut self,
        total_size: u64,
        checksum: HashDigest,
    ) -> TundraResult<ArchiveReceipt>;
}

/// Returns the bytes of a retrieval job's output for an inclusive range
#[async_trait]
pub trait RangedFetch: Send + Sync {
    async fn fetch(&self, range: ByteRange) -> TundraResult<Bytes>;
}

