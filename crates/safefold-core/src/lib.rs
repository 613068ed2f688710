//! safefold-core: shared types, configuration schema, and the error taxonomy
//! used by every safefold crate.

pub mod atomic;
pub mod config;
pub mod error;
pub mod types;

pub use atomic::write_atomic;
pub use config::SafeConfig;
pub use error::{ErrorKind, SafeError, SafeResult};
pub use types::{
    FolderRecord, LockoutRecord, MasterCredential, ProtectionMode, WrappedKeyMaterial,
};
