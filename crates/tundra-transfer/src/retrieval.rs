//! Ranged download of retrieval-job output
//!
//! Output is fetched one part at a time in increasing offset order and each
//! chunk is written to the sink as soon as it arrives. No checksum is checked
//! on the received bytes and nothing is resumable: a failed download restarts
//! from offset 0.

use std::path::{Path, PathBuf};
use tokio::io::{AsyncWrite, AsyncWriteExt, BufWriter};
use tracing::{debug, info, warn};
use tundra_chunks::{part_count, part_ranges};
use tundra_core::{PartSize, RetrievalJob, TundraError, TundraResult};

use crate::provider::RangedFetch;
use crate::ProgressFn;

/// Fetch `total_size` bytes in `part_size` ranges and append them to `sink`.
///
/// Returns the number of bytes written. The sink is flushed on success.
pub async fn download<F, W>(
    fetch: &F,
    total_size: u64,
    part_size: PartSize,
    sink: &mut W,
    progress: Option<&ProgressFn>,
) -> TundraResult<u64>
where
    F: RangedFetch + ?Sized,
    W: AsyncWrite + Unpin,
{
    let parts = part_count(total_size, part_size.bytes());
    let mut written = 0u64;

    for (i, range) in part_ranges(total_size, part_size.bytes()).enumerate() {
        let chunk = fetch.fetch(range).await?;
        if chunk.len() as u64 != range.len() {
            warn!(
                range = %range,
                received = chunk.len(),
                "fetched chunk length differs from requested range"
            );
        }
        debug!(range = %range, bytes = chunk.len(), "fetched");

        sink.write_all(&chunk).await.map_err(TundraError::Sink)?;
        written += chunk.len() as u64;

        if let Some(cb) = progress {
            cb(written, total_size, &format!("part {}/{parts}", i + 1));
        }
    }

    sink.flush().await.map_err(TundraError::Sink)?;
    Ok(written)
}

/// Download into `dest` via a temporary sibling, renamed into place on success.
async fn download_to_file<F>(
    fetch: &F,
    total_size: u64,
    part_size: PartSize,
    dest: &Path,
    progress: Option<&ProgressFn>,
) -> TundraResult<u64>
where
    F: RangedFetch + ?Sized,
{
    if let Some(parent) = dest.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(TundraError::Sink)?;
    }

    let tmp = temp_path(dest);
    let file = tokio::fs::File::create(&tmp)
        .await
        .map_err(TundraError::Sink)?;
    let mut writer = BufWriter::new(file);

    let result = download(fetch, total_size, part_size, &mut writer, progress).await;
    drop(writer);

    match result {
        Ok(bytes) => {
            tokio::fs::rename(&tmp, dest)
                .await
                .map_err(TundraError::Sink)?;
            Ok(bytes)
        }
        Err(e) => {
            if let Err(cleanup) = tokio::fs::remove_file(&tmp).await {
                warn!(path = %tmp.display(), "removing partial download: {cleanup}");
            }
            Err(e)
        }
    }
}

/// Sibling of `dest` that keeps its full file name
fn temp_path(dest: &Path) -> PathBuf {
    let mut name = dest.file_name().unwrap_or_default().to_os_string();
    name.push(".tundra_tmp");
    dest.with_file_name(name)
}

/// Download an archive-retrieval job's output to `{base_path}/{archive_id}.tar.gz`.
///
/// Returns `None` if the job carries no archive id.
pub async fn download_retrieved_archive<F>(
    fetch: &F,
    job: &RetrievalJob,
    part_size: PartSize,
    base_path: &Path,
    progress: Option<&ProgressFn>,
) -> TundraResult<Option<PathBuf>>
where
    F: RangedFetch + ?Sized,
{
    let Some(archive_id) = job.archive_id.as_deref() else {
        return Ok(None);
    };
    let size = job.archive_size.ok_or_else(|| {
        TundraError::Transport(format!("job {} reports no archive size", job.job_id))
    })?;

    let path = base_path.join(format!("{archive_id}.tar.gz"));
    let bytes = download_to_file(fetch, size, part_size, &path, progress).await?;

    info!(job_id = %job.job_id, archive_id, bytes, path = %path.display(), "archive downloaded");
    Ok(Some(path))
}

/// Download an inventory-retrieval job's output to `inventory_path`.
pub async fn download_retrieved_inventory<F>(
    fetch: &F,
    job: &RetrievalJob,
    part_size: PartSize,
    inventory_path: &Path,
    progress: Option<&ProgressFn>,
) -> TundraResult<PathBuf>
where
    F: RangedFetch + ?Sized,
{
    let size = job.inventory_size.ok_or_else(|| {
        TundraError::Transport(format!("job {} reports no inventory size", job.job_id))
    })?;

    let bytes = download_to_file(fetch, size, part_size, inventory_path, progress).await?;

    info!(job_id = %job.job_id, bytes, path = %inventory_path.display(), "inventory downloaded");
    Ok(inventory_path.to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use bytes::Bytes;
    use std::sync::Mutex;
    use tempfile::TempDir;
    use tundra_core::{ByteRange, ONE_MIB};

    /// Serves slices of an in-memory blob and records every requested range
    struct BlobFetch {
        data: Vec<u8>,
        requests: Mutex<Vec<ByteRange>>,
        /// Zero-based index of the fetch that fails
        fail_at: Option<usize>,
    }

    impl BlobFetch {
        fn new(data: Vec<u8>) -> Self {
            Self {
                data,
                requests: Mutex::new(Vec::new()),
                fail_at: None,
            }
        }
    }

    #[async_trait]
    impl RangedFetch for BlobFetch {
        async fn fetch(&self, range: ByteRange) -> TundraResult<Bytes> {
            let mut requests = self.requests.lock().unwrap();
            if self.fail_at == Some(requests.len()) {
                return Err(TundraError::Transport("job output expired".into()));
            }
            requests.push(range);
            Ok(Bytes::copy_from_slice(
                &self.data[range.start as usize..=range.end as usize],
            ))
        }
    }

    fn make_data(size: usize) -> Vec<u8> {
        (0..size).map(|i| (i.wrapping_mul(13) ^ (i >> 5)) as u8).collect()
    }

    #[tokio::test]
    async fn fetches_three_ranges_in_order() {
        let data = make_data(2_621_440);
        let fetch = BlobFetch::new(data.clone());
        let mut sink = Vec::new();

        let n = download(&fetch, 2_621_440, PartSize::ONE_MIB, &mut sink, None)
            .await
            .unwrap();

        assert_eq!(n, 2_621_440);
        assert_eq!(sink, data);
        let ranges: Vec<_> = fetch
            .requests
            .lock()
            .unwrap()
            .iter()
            .map(|r| (r.start, r.end))
            .collect();
        assert_eq!(
            ranges,
            vec![(0, 1_048_575), (1_048_576, 2_097_151), (2_097_152, 2_621_439)]
        );
    }

    #[tokio::test]
    async fn sink_receives_chunks_in_arrival_order() {
        let data = make_data(2 * ONE_MIB as usize + 10);
        let fetch = BlobFetch::new(data.clone());
        let mut sink = tokio_test::io::Builder::new()
            .write(&data[..ONE_MIB as usize])
            .write(&data[ONE_MIB as usize..2 * ONE_MIB as usize])
            .write(&data[2 * ONE_MIB as usize..])
            .build();

        download(&fetch, data.len() as u64, PartSize::ONE_MIB, &mut sink, None)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn zero_size_fetches_nothing() {
        let fetch = BlobFetch::new(Vec::new());
        let mut sink = Vec::new();
        let n = download(&fetch, 0, PartSize::ONE_MIB, &mut sink, None).await.unwrap();
        assert_eq!(n, 0);
        assert!(fetch.requests.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn fetch_failure_aborts() {
        let mut fetch = BlobFetch::new(make_data(3 * ONE_MIB as usize));
        fetch.fail_at = Some(1);
        let mut sink = Vec::new();

        let err = download(&fetch, 3 * ONE_MIB, PartSize::ONE_MIB, &mut sink, None)
            .await
            .unwrap_err();

        assert!(matches!(err, TundraError::Transport(_)));
        assert_eq!(sink.len() as u64, ONE_MIB, "only the first chunk was written");
    }

    #[tokio::test]
    async fn sink_failure_is_reported_as_sink_error() {
        let fetch = BlobFetch::new(make_data(100));
        let mut sink = tokio_test::io::Builder::new()
            .write_error(std::io::Error::other("disk full"))
            .build();

        let err = download(&fetch, 100, PartSize::ONE_MIB, &mut sink, None)
            .await
            .unwrap_err();
        assert!(matches!(err, TundraError::Sink(_)));
    }

    #[tokio::test]
    async fn archive_lands_at_archive_id_path() {
        let tmp = TempDir::new().unwrap();
        let data = make_data(ONE_MIB as usize + 321);
        let fetch = BlobFetch::new(data.clone());
        let job = RetrievalJob {
            job_id: "job-1".into(),
            archive_id: Some("abc123".into()),
            archive_size: Some(data.len() as u64),
            inventory_size: None,
        };

        let path = download_retrieved_archive(&fetch, &job, PartSize::ONE_MIB, &tmp.path().join("out"), None)
            .await
            .unwrap()
            .unwrap();

        assert_eq!(path, tmp.path().join("out/abc123.tar.gz"));
        assert_eq!(std::fs::read(&path).unwrap(), data);
    }

    #[tokio::test]
    async fn job_without_archive_id_downloads_nothing() {
        let tmp = TempDir::new().unwrap();
        let fetch = BlobFetch::new(make_data(10));
        let job = RetrievalJob {
            job_id: "job-2".into(),
            inventory_size: Some(10),
            ..Default::default()
        };

        let path = download_retrieved_archive(&fetch, &job, PartSize::ONE_MIB, tmp.path(), None)
            .await
            .unwrap();
        assert!(path.is_none());
        assert!(fetch.requests.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn inventory_written_to_requested_path() {
        let tmp = TempDir::new().unwrap();
        let inventory = br#"{"VaultARN":"vault/default","ArchiveList":[]}"#.to_vec();
        let fetch = BlobFetch::new(inventory.clone());
        let job = RetrievalJob {
            job_id: "job-3".into(),
            inventory_size: Some(inventory.len() as u64),
            ..Default::default()
        };
        let dest = tmp.path().join("inv/inventory.json");

        let path = download_retrieved_inventory(&fetch, &job, PartSize::ONE_MIB, &dest, None)
            .await
            .unwrap();

        assert_eq!(path, dest);
        assert_eq!(std::fs::read(&dest).unwrap(), inventory);
    }

    #[tokio::test]
    async fn failed_download_leaves_no_file_behind() {
        let tmp = TempDir::new().unwrap();
        let mut fetch = BlobFetch::new(make_data(2 * ONE_MIB as usize));
        fetch.fail_at = Some(1);
        let job = RetrievalJob {
            job_id: "job-4".into(),
            archive_id: Some("broken".into()),
            archive_size: Some(2 * ONE_MIB),
            inventory_size: None,
        };

        let err = download_retrieved_archive(&fetch, &job, PartSize::ONE_MIB, tmp.path(), None)
            .await
            .unwrap_err();
        assert!(matches!(err, TundraError::Transport(_)));

        let leftovers: Vec<_> = std::fs::read_dir(tmp.path()).unwrap().collect();
        assert!(leftovers.is_empty(), "no partial or temp file may remain");
    }

    #[test]
    fn temp_files_keep_the_full_destination_name() {
        let a = temp_path(Path::new("out/x.a"));
        let b = temp_path(Path::new("out/x.b"));
        assert_ne!(a, b);
        assert_eq!(a, PathBuf::from("out/x.a.tundra_tmp"));
        assert_eq!(
            temp_path(Path::new("abc.tar.gz")),
            PathBuf::from("abc.tar.gz.tundra_tmp")
        );
    }
}
