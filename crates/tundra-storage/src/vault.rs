//! Cold-storage vault on top of an OpenDAL Operator
//!
//! Layout under `{vault}/`:
//!   uploads/{upload_id}/{start:020}   staged parts of an open multipart upload
//!   archives/{archive_id}             completed archive bytes
//!   archives/{archive_id}.json        ArchiveMeta
//!   inventory/{job_id}.json           inventory job output
//!
//! Every submitted part and every completed archive is re-hashed here and
//! rejected with `ChecksumMismatch` if the client's tree hash disagrees.

use async_trait::async_trait;
use bytes::Bytes;
use opendal::{EntryMode, Operator};
use serde::{Deserialize, Serialize};
use std::fmt::Display;
use tracing::{debug, info, warn};
use tundra_chunks::{tree_hash, HashDigest};
use tundra_core::{ArchiveReceipt, ByteRange, PartSize, RetrievalJob, TundraError, TundraResult};
use tundra_transfer::{MultipartProvider, MultipartUpload, RangedFetch};

fn storage_err<C: Display>(context: C) -> impl FnOnce(opendal::Error) -> TundraError {
    move |e| TundraError::Transport(format!("{context}: {e}"))
}

fn now_secs() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// Metadata stored next to every completed archive
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchiveMeta {
    pub archive_id: String,
    pub description: Option<String>,
    pub size: u64,
    /// Tree hash, lowercase hex
    pub checksum: String,
    pub created_at: u64,
}

#[derive(Debug, Serialize, Deserialize)]
struct Inventory {
    vault: String,
    inventory_date: u64,
    archive_list: Vec<ArchiveMeta>,
}

/// A named vault inside an OpenDAL operator
#[derive(Clone)]
pub struct Vault {
    op: Operator,
    name: String,
}

impl Vault {
    pub fn new(op: Operator, name: impl Into<String>) -> Self {
        Self {
            op,
            name: name.into(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn operator(&self) -> &Operator {
        &self.op
    }

    fn uploads_dir(&self, upload_id: &str) -> String {
        format!("{}/uploads/{upload_id}/", self.name)
    }

    fn archive_path(&self, archive_id: &str) -> String {
        format!("{}/archives/{archive_id}", self.name)
    }

    fn meta_path(&self, archive_id: &str) -> String {
        format!("{}/archives/{archive_id}.json", self.name)
    }

    /// Staged part files of an upload as `(start_offset, path)`, sorted by offset
    async fn staged_parts(&self, upload_id: &str) -> TundraResult<Vec<(u64, String)>> {
        let dir = self.uploads_dir(upload_id);
        let entries = self
            .op
            .list(&dir)
            .await
            .map_err(storage_err(format!("listing {dir}")))?;

        let mut parts: Vec<(u64, String)> = entries
            .into_iter()
            .filter(|e| e.metadata().mode() == EntryMode::FILE)
            .filter_map(|e| {
                let start = e.name().parse::<u64>().ok()?;
                Some((start, e.path().to_string()))
            })
            .collect();
        parts.sort_by_key(|(start, _)| *start);
        Ok(parts)
    }

    /// Discard a multipart upload and all of its staged parts
    pub async fn abort(&self, upload_id: &str) -> TundraResult<()> {
        for (_, path) in self.staged_parts(upload_id).await? {
            self.op
                .delete(&path)
                .await
                .map_err(storage_err(format!("deleting {path}")))?;
        }
        self.remove_upload_dir(upload_id).await;
        info!(vault = %self.name, upload_id, "multipart upload aborted");
        Ok(())
    }

    // Empty directories linger on hierarchical backends and would count as pending.
    async fn remove_upload_dir(&self, upload_id: &str) {
        let dir = self.uploads_dir(upload_id);
        if let Err(e) = self.op.delete(&dir).await {
            warn!(dir = %dir, "removing upload directory: {e}");
        }
    }

    /// Metadata of every archive in the vault, ordered by archive id
    pub async fn list_archives(&self) -> TundraResult<Vec<ArchiveMeta>> {
        let dir = format!("{}/archives/", self.name);
        let entries = match self.op.list(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == opendal::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(storage_err(format!("listing {dir}"))(e)),
        };

        let mut archives = Vec::new();
        for entry in entries {
            if entry.metadata().mode() != EntryMode::FILE || !entry.name().ends_with(".json") {
                continue;
            }
            let raw = self
                .op
                .read(entry.path())
                .await
                .map_err(storage_err(format!("reading {}", entry.path())))?;
            let meta: ArchiveMeta = serde_json::from_slice(&raw.to_bytes())
                .map_err(|e| TundraError::Transport(format!("parsing {}: {e}", entry.path())))?;
            archives.push(meta);
        }
        archives.sort_by(|a, b| a.archive_id.cmp(&b.archive_id));
        Ok(archives)
    }

    /// Number of multipart uploads with staged parts
    pub async fn pending_uploads(&self) -> TundraResult<usize> {
        let dir = format!("{}/uploads/", self.name);
        match self.op.list(&dir).await {
            Ok(entries) => Ok(entries
                .iter()
                .filter(|e| e.metadata().mode() == EntryMode::DIR && e.path() != dir)
                .count()),
            Err(e) if e.kind() == opendal::ErrorKind::NotFound => Ok(0),
            Err(e) => Err(storage_err(format!("listing {dir}"))(e)),
        }
    }

    /// Start an archive-retrieval job; its output is the archive bytes
    pub async fn archive_job(&self, archive_id: &str) -> TundraResult<VaultJob> {
        let meta_path = self.meta_path(archive_id);
        let raw = self
            .op
            .read(&meta_path)
            .await
            .map_err(storage_err(format!("reading {meta_path}")))?;
        let meta: ArchiveMeta = serde_json::from_slice(&raw.to_bytes())
            .map_err(|e| TundraError::Transport(format!("parsing {meta_path}: {e}")))?;

        let job = RetrievalJob {
            job_id: uuid::Uuid::new_v4().to_string(),
            archive_id: Some(meta.archive_id),
            archive_size: Some(meta.size),
            inventory_size: None,
        };
        debug!(job_id = %job.job_id, archive_id, "archive retrieval job ready");

        Ok(VaultJob {
            op: self.op.clone(),
            path: self.archive_path(archive_id),
            job,
        })
    }

    /// Start an inventory-retrieval job; its output is a JSON listing of all archives
    pub async fn inventory_job(&self) -> TundraResult<VaultJob> {
        let inventory = Inventory {
            vault: self.name.clone(),
            inventory_date: now_secs(),
            archive_list: self.list_archives().await?,
        };
        let body = serde_json::to_vec_pretty(&inventory)
            .map_err(|e| TundraError::Other(anyhow::anyhow!("serializing inventory: {e}")))?;

        let job_id = uuid::Uuid::new_v4().to_string();
        let path = format!("{}/inventory/{job_id}.json", self.name);
        let size = body.len() as u64;
        self.op
            .write(&path, body)
            .await
            .map_err(storage_err(format!("writing {path}")))?;

        debug!(job_id = %job_id, archives = inventory.archive_list.len(), "inventory retrieval job ready");
        Ok(VaultJob {
            op: self.op.clone(),
            path,
            job: RetrievalJob {
                job_id,
                inventory_size: Some(size),
                ..Default::default()
            },
        })
    }
}

#[async_trait]
impl MultipartProvider for Vault {
    type Upload = VaultUpload;

    async fn open(
        &self,
        part_size: PartSize,
        description: Option<&str>,
    ) -> TundraResult<VaultUpload> {
        let upload_id = uuid::Uuid::new_v4().simple().to_string();
        info!(vault = %self.name, upload_id = %upload_id, part_size = %part_size, "initiating multipart upload");
        Ok(VaultUpload {
            vault: self.clone(),
            upload_id,
            part_size,
            description: description.map(str::to_string),
        })
    }
}

/// An open multipart upload staged in the vault
pub struct VaultUpload {
    vault: Vault,
    upload_id: String,
    part_size: PartSize,
    description: Option<String>,
}

impl VaultUpload {
    fn reject(range: &ByteRange, reason: impl Into<String>) -> TundraError {
        TundraError::InvalidRange {
            range: range.content_range(),
            reason: reason.into(),
        }
    }
}

#[async_trait]
impl MultipartUpload for VaultUpload {
    fn upload_id(&self) -> &str {
        &self.upload_id
    }

    async fn submit_part(
        &mut self,
        range: ByteRange,
        checksum: HashDigest,
        body: Bytes,
    ) -> TundraResult<()> {
        let part_size = self.part_size.bytes();
        if range.end < range.start {
            return Err(Self::reject(&range, "end precedes start"));
        }
        if range.start % part_size != 0 {
            return Err(Self::reject(&range, "start is not aligned to the part size"));
        }
        if range.len() > part_size {
            return Err(Self::reject(&range, "range is larger than the part size"));
        }
        if body.len() as u64 != range.len() {
            return Err(Self::reject(
                &range,
                format!("body is {} bytes, range covers {}", body.len(), range.len()),
            ));
        }

        let actual = tree_hash(&body)?;
        if actual != checksum {
            return Err(TundraError::ChecksumMismatch {
                expected: checksum.to_hex(),
                actual: actual.to_hex(),
            });
        }

        let path = format!("{}{:020}", self.vault.uploads_dir(&self.upload_id), range.start);
        self.vault
            .op
            .write(&path, body)
            .await
            .map_err(storage_err(format!("writing {path}")))?;

        debug!(upload_id = %self.upload_id, range = %range, "part staged");
        Ok(())
    }

    async fn complete(
        &mut self,
        total_size: u64,
        checksum: HashDigest,
    ) -> TundraResult<ArchiveReceipt> {
        let parts = self.vault.staged_parts(&self.upload_id).await?;
        let part_size = self.part_size.bytes();
        let part_total = parts.len();

        let staged_max = (part_total as u64).saturating_mul(part_size);
        if total_size > staged_max {
            return Err(TundraError::InvalidRange {
                range: format!("bytes 0-*/{total_size}"),
                reason: format!("{part_total} staged parts hold at most {staged_max} bytes"),
            });
        }

        let mut assembled = Vec::with_capacity(total_size as usize);
        for (i, (start, path)) in parts.iter().enumerate() {
            if *start != assembled.len() as u64 {
                return Err(TundraError::InvalidRange {
                    range: format!("bytes {start}-*/{total_size}"),
                    reason: format!("expected a part starting at {}", assembled.len()),
                });
            }
            let data = self
                .vault
                .op
                .read(path)
                .await
                .map_err(storage_err(format!("reading {path}")))?
                .to_bytes();
            if i + 1 < part_total && data.len() as u64 != part_size {
                return Err(TundraError::InvalidRange {
                    range: format!("bytes {start}-*/{total_size}"),
                    reason: "only the last part may be shorter than the part size".into(),
                });
            }
            assembled.extend_from_slice(&data);
        }

        if assembled.len() as u64 != total_size {
            return Err(TundraError::InvalidRange {
                range: format!("bytes 0-{}/{total_size}", assembled.len().saturating_sub(1)),
                reason: format!("parts cover {} bytes", assembled.len()),
            });
        }

        let actual = tree_hash(&assembled)?;
        if actual != checksum {
            return Err(TundraError::ChecksumMismatch {
                expected: checksum.to_hex(),
                actual: actual.to_hex(),
            });
        }

        let archive_id = uuid::Uuid::new_v4().simple().to_string();
        let meta = ArchiveMeta {
            archive_id: archive_id.clone(),
            description: self.description.clone(),
            size: total_size,
            checksum: actual.to_hex(),
            created_at: now_secs(),
        };
        let meta_json = serde_json::to_vec(&meta)
            .map_err(|e| TundraError::Other(anyhow::anyhow!("serializing archive meta: {e}")))?;

        let archive_path = self.vault.archive_path(&archive_id);
        let meta_path = self.vault.meta_path(&archive_id);
        let op = &self.vault.op;
        op.write(&archive_path, assembled)
            .await
            .map_err(storage_err(format!("writing {archive_path}")))?;
        op.write(&meta_path, meta_json)
            .await
            .map_err(storage_err(format!("writing {meta_path}")))?;

        for (_, path) in &parts {
            if let Err(e) = op.delete(path).await {
                warn!(path = %path, "removing staged part: {e}");
            }
        }
        self.vault.remove_upload_dir(&self.upload_id).await;

        info!(
            vault = %self.vault.name,
            upload_id = %self.upload_id,
            archive_id = %archive_id,
            size = total_size,
            "archive created"
        );

        Ok(ArchiveReceipt {
            archive_id,
            checksum: meta.checksum,
            location: format!("/{archive_path}"),
        })
    }
}

/// Output of a retrieval job, readable by range
#[derive(Debug)]
pub struct VaultJob {
    op: Operator,
    path: String,
    job: RetrievalJob,
}

impl VaultJob {
    pub fn job(&self) -> &RetrievalJob {
        &self.job
    }
}

#[async_trait]
impl RangedFetch for VaultJob {
    async fn fetch(&self, range: ByteRange) -> TundraResult<Bytes> {
        let buf = self
            .op
            .read_with(&self.path)
            .range(range.start..range.end + 1)
            .await
            .map_err(storage_err(format!("reading {} {}", self.path, range.http_range())))?;
        Ok(buf.to_bytes())
    }
}
