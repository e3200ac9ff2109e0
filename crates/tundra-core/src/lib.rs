//! tundra-core: shared types, configuration schema, and the error taxonomy
//! used by every other tundra crate.

pub mod config;
pub mod error;
pub mod types;

pub use error::{TundraError, TundraResult};
pub use types::{ArchiveReceipt, ByteRange, PartSize, RetrievalJob, ONE_MIB};
