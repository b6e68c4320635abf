//! dbsnap
//!
//! Snapshot a MongoDB database into a gzip-compressed Extended JSON archive,
//! restore it with native identifiers intact, rotate old archives, and verify
//! that an archive kept its identifiers typed.

pub mod archive;
pub mod config;
pub mod export;
pub mod lock;
pub mod restore;
pub mod retention;
pub mod service;
pub mod store;
pub mod utils;
pub mod verify;

// Re-export commonly used types
pub use mongodb::bson;
pub use config::{BackupConfig, Config};
pub use export::ExportResult;
pub use restore::{RestoreGate, RestoreResult};
pub use retention::{ArchiveInfo, RetentionReport};
pub use service::BackupService;
pub use store::{DocumentStore, MemoryStore, MongoStore};
pub use utils::errors::BackupError;
pub use verify::{Verdict, VerificationReport};
pub type Result<T> = std::result::Result<T, BackupError>;
