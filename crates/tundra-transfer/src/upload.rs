//! Multipart archive upload
//!
//! The source is read strictly in order, one part at a time:
//!   read part → tree hash → range → submit (blocking until acknowledged)
//! and the upload is finalized with the archive length and its whole-archive
//! tree hash. Nothing is retried here; the first failure ends the session and
//! any remote context already opened is left for the backend to expire.

use bytes::Bytes;
use std::io::SeekFrom;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncSeek, AsyncSeekExt};
use tracing::{debug, info};
use tundra_chunks::{combine, digest_reader, part_count, range, tree_hash, HashDigest};
use tundra_core::config::FinalChecksum;
use tundra_core::{ArchiveReceipt, ByteRange, PartSize, TundraError, TundraResult};

use crate::provider::{MultipartProvider, MultipartUpload};
use crate::ProgressFn;

/// Options for a single upload
pub struct UploadOptions<'a> {
    pub part_size: PartSize,
    pub description: Option<String>,
    pub final_checksum: FinalChecksum,
    pub progress: Option<&'a ProgressFn>,
}

impl Default for UploadOptions<'_> {
    fn default() -> Self {
        Self {
            part_size: PartSize::ONE_MIB,
            description: None,
            final_checksum: FinalChecksum::Compose,
            progress: None,
        }
    }
}

/// One unit of an upload, handed to the backend and then dropped
#[derive(Debug, Clone)]
pub struct Part {
    pub range: ByteRange,
    pub checksum: HashDigest,
    pub body: Bytes,
}

/// Result of a finished upload
#[derive(Debug, Clone)]
pub struct UploadResult {
    pub archive: ArchiveReceipt,
    pub total_size: u64,
    pub checksum: HashDigest,
    pub parts: usize,
}

/// Read the part starting at `start`: up to `part_size` bytes, fewer for the last one.
async fn read_part<S>(source: &mut S, start: u64, part_size: PartSize, total: u64) -> TundraResult<Part>
where
    S: AsyncRead + Unpin,
{
    let range = range(start, part_size.bytes(), total);
    let mut body = vec![0u8; range.len() as usize];
    source
        .read_exact(&mut body)
        .await
        .map_err(TundraError::SourceRead)?;

    let checksum = tree_hash(&body)?;
    Ok(Part {
        range,
        checksum,
        body: Bytes::from(body),
    })
}

/// Upload everything in `source` as one archive.
///
/// The source length is taken by seeking to its end; the source is then
/// rewound and read from offset 0. An empty source is rejected before any
/// remote context is opened.
pub async fn upload<P, S>(
    provider: &P,
    source: &mut S,
    opts: &UploadOptions<'_>,
) -> TundraResult<UploadResult>
where
    P: MultipartProvider,
    S: AsyncRead + AsyncSeek + Unpin + Send,
{
    let total = source
        .seek(SeekFrom::End(0))
        .await
        .map_err(TundraError::SourceRead)?;
    source.rewind().await.map_err(TundraError::SourceRead)?;

    if total == 0 {
        return Err(TundraError::EmptySpan);
    }

    let part_size = opts.part_size;
    let mut multipart = provider
        .open(part_size, opts.description.as_deref())
        .await?;

    info!(
        upload_id = multipart.upload_id(),
        total,
        part_size = %part_size,
        "multipart upload opened"
    );

    let part_total = part_count(total, part_size.bytes());
    let mut part_digests = Vec::with_capacity(part_total as usize);
    let mut start = 0u64;

    while start < total {
        let part = read_part(source, start, part_size, total).await?;
        let next_start = part.range.end + 1;

        debug!(range = %part.range, checksum = %part.checksum, "submitting part");
        multipart
            .submit_part(part.range, part.checksum, part.body)
            .await?;
        part_digests.push(part.checksum);

        if let Some(cb) = opts.progress {
            cb(
                next_start,
                total,
                &format!("part {}/{part_total}", part_digests.len()),
            );
        }
        start = next_start;
    }

    let checksum = match opts.final_checksum {
        FinalChecksum::Compose => combine(&part_digests)?,
        FinalChecksum::Reread => {
            source.rewind().await.map_err(TundraError::SourceRead)?;
            digest_reader(source, total).await?
        }
    };

    let archive = multipart.complete(total, checksum).await?;

    info!(
        archive_id = %archive.archive_id,
        total,
        parts = part_digests.len(),
        %checksum,
        "upload complete"
    );

    Ok(UploadResult {
        archive,
        total_size: total,
        checksum,
        parts: part_digests.len(),
    })
}
