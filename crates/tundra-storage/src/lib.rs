//! tundra-storage: OpenDAL-backed cold-storage vault
//!
//! The vault stages multipart uploads, re-verifies every part and the whole
//! archive against its tree hash, and serves ranged reads of archive and
//! inventory output. It runs on any OpenDAL service (memory, fs, s3).

pub mod health;
pub mod operator;
pub mod vault;

pub use health::{check_health, HealthReport};
pub use operator::{build_operator, S3Credentials};
pub use vault::{ArchiveMeta, Vault, VaultJob, VaultUpload};
