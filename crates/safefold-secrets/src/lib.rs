//! safefold-secrets: per-user sealing of small secrets
//!
//! Machine key discovery (by `[secrets] backend`):
//!   1. `keychain`: platform keychain entry `safefold/machine-key`
//!   2. `file`: `<data_dir>/machine.key`, owner-only
//!   3. `auto`: keychain on macOS and Windows, key file elsewhere
//!
//! Sealed material: the metadata store key and quick-lock recovery records.

pub mod credential;
pub mod keychain;
pub mod seal;

pub use credential::get_or_create_store_key;
pub use keychain::{
    source_from_config, FileKeySource, KeychainSource, MachineKeySource, StaticKeySource,
};
pub use seal::SecretStore;
