//! tundra-transfer: chunked, checksum-verified archive transfer
//!
//! - `provider`: capabilities the engine consumes (multipart context, ranged fetch)
//! - `upload`: sequential part-by-part upload with per-part and whole-archive tree hashes
//! - `retrieval`: sequential ranged download of archive or inventory output

pub mod provider;
pub mod retrieval;
pub mod upload;

pub use provider::{MultipartProvider, MultipartUpload, RangedFetch};
pub use retrieval::{download, download_retrieved_archive, download_retrieved_inventory};
pub use upload::{upload, Part, UploadOptions, UploadResult};

/// Progress callback type (bytes_done, bytes_total, message)
pub type ProgressFn = Box<dyn Fn(u64, u64, &str) + Send + Sync>;
