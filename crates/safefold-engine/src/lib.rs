//! safefold-engine: metadata store, folder encryption, quick protection, and
//! the `Vault` facade composing them

pub mod orchestrator;
pub mod platform;
pub mod quick;
pub mod store;
pub mod vault;

pub use orchestrator::{BatchOp, BatchReport, FolderEncryptionOrchestrator, ProgressFn};
pub use platform::{FolderGuard, PlatformGuard};
pub use quick::QuickProtectEngine;
pub use store::{JsonMetadataStore, MemoryMetadataStore, MetadataStore, SharedStore};
pub use vault::Vault;
