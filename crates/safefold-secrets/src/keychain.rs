//! Machine key sources backing the secret store.
//!
//! The machine key never leaves the current user account:
//! - macOS: Keychain Services
//! - Windows: Credential Manager (DPAPI-protected, per user)
//! - elsewhere: a key file readable only by the owner inside the data dir
//!
//! The key is created on first use. Losing it makes every sealed blob
//! unrecoverable, which is the intended portability boundary.

use std::path::{Path, PathBuf};

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use safefold_core::{write_atomic, SafeConfig, SafeError, SafeResult};
use safefold_crypto::{random_key_bytes, MachineKey};
use secrecy::{ExposeSecret, SecretString};
use zeroize::Zeroizing;

const SERVICE_NAME: &str = "safefold";
const MACHINE_KEY_ACCOUNT: &str = "machine-key";

pub trait MachineKeySource: Send + Sync {
    /// Short label for logs
    fn name(&self) -> &'static str;

    /// Return the machine key, creating and storing one on first use.
    fn load_or_create(&self) -> SafeResult<MachineKey>;
}

/// Platform keychain entry via the `keyring` crate.
pub struct KeychainSource {
    service: String,
    account: String,
}

impl Default for KeychainSource {
    fn default() -> Self {
        Self::new(SERVICE_NAME, MACHINE_KEY_ACCOUNT)
    }
}

impl KeychainSource {
    pub fn new(service: &str, account: &str) -> Self {
        Self {
            service: service.into(),
            account: account.into(),
        }
    }

    fn entry(&self) -> SafeResult<keyring::Entry> {
        keyring::Entry::new(&self.service, &self.account)
            .map_err(|e| SafeError::Other(anyhow::anyhow!("keychain entry creation: {e}")))
    }
}

impl MachineKeySource for KeychainSource {
    fn name(&self) -> &'static str {
        "keychain"
    }

    fn load_or_create(&self) -> SafeResult<MachineKey> {
        let entry = self.entry()?;
        match entry.get_password() {
            Ok(encoded) => decode_key(&SecretString::from(encoded)),
            Err(keyring::Error::NoEntry) => {
                let bytes = random_key_bytes();
                let encoded = SecretString::from(STANDARD.encode(bytes.as_ref()));
                entry.set_password(encoded.expose_secret()).map_err(|e| {
                    SafeError::Other(anyhow::anyhow!("keychain store for '{}': {e}", self.account))
                })?;
                tracing::info!(account = %self.account, "created machine key in platform keychain");
                Ok(MachineKey::from_bytes(*bytes))
            }
            Err(e) => Err(SafeError::Other(anyhow::anyhow!(
                "keychain get for '{}': {e}",
                self.account
            ))),
        }
    }
}

/// Owner-only key file. Used where no native keychain is compiled in.
pub struct FileKeySource {
    path: PathBuf,
}

impl FileKeySource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl MachineKeySource for FileKeySource {
    fn name(&self) -> &'static str {
        "file"
    }

    fn load_or_create(&self) -> SafeResult<MachineKey> {
        match std::fs::read_to_string(&self.path) {
            Ok(content) => decode_key(&SecretString::from(content.trim().to_string())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                if let Some(parent) = self.path.parent() {
                    std::fs::create_dir_all(parent).map_err(|e| SafeError::from_io(parent, e))?;
                }
                let bytes = random_key_bytes();
                let encoded = Zeroizing::new(STANDARD.encode(bytes.as_ref()));
                write_atomic(&self.path, encoded.as_bytes(), owner_only())?;
                tracing::info!(path = %self.path.display(), "created machine key file");
                Ok(MachineKey::from_bytes(*bytes))
            }
            Err(e) => Err(SafeError::from_io(&self.path, e)),
        }
    }
}

/// A fixed key supplied by the embedder (tests, ephemeral sessions).
pub struct StaticKeySource {
    bytes: Zeroizing<[u8; safefold_crypto::KEY_SIZE]>,
}

impl StaticKeySource {
    pub fn new(bytes: [u8; safefold_crypto::KEY_SIZE]) -> Self {
        Self {
            bytes: Zeroizing::new(bytes),
        }
    }
}

impl MachineKeySource for StaticKeySource {
    fn name(&self) -> &'static str {
        "static"
    }

    fn load_or_create(&self) -> SafeResult<MachineKey> {
        Ok(MachineKey::from_bytes(*self.bytes))
    }
}

/// True when a native keychain backend is compiled in for this target.
pub fn native_keychain_available() -> bool {
    cfg!(any(target_os = "macos", target_os = "windows"))
}

/// Pick the machine key source named by `[secrets] backend`.
pub fn source_from_config(config: &SafeConfig) -> SafeResult<Box<dyn MachineKeySource>> {
    match config.secrets.backend.as_str() {
        "keychain" if native_keychain_available() => Ok(Box::new(KeychainSource::default())),
        "keychain" => Err(SafeError::Config(
            "no native keychain on this platform; use backend = \"file\"".into(),
        )),
        "file" => Ok(Box::new(FileKeySource::new(config.machine_key_path()))),
        "auto" if native_keychain_available() => Ok(Box::new(KeychainSource::default())),
        "auto" => Ok(Box::new(FileKeySource::new(config.machine_key_path()))),
        other => Err(SafeError::Config(format!("unknown secrets backend: {other}"))),
    }
}

fn decode_key(encoded: &SecretString) -> SafeResult<MachineKey> {
    let bytes = Zeroizing::new(
        STANDARD
            .decode(encoded.expose_secret().trim())
            .map_err(|_| SafeError::CorruptOrWrongContext)?,
    );
    MachineKey::from_slice(&bytes).map_err(|_| SafeError::CorruptOrWrongContext)
}

#[cfg(unix)]
fn owner_only() -> Option<std::fs::Permissions> {
    use std::os::unix::fs::PermissionsExt;
    Some(std::fs::Permissions::from_mode(0o600))
}

#[cfg(not(unix))]
fn owner_only() -> Option<std::fs::Permissions> {
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_source_creates_then_reloads() {
        let dir = tempfile::tempdir().unwrap();
        let source = FileKeySource::new(dir.path().join("keys").join("machine.key"));

        let first = source.load_or_create().unwrap();
        assert!(source.path().exists());
        let second = source.load_or_create().unwrap();
        assert_eq!(first.as_bytes(), second.as_bytes());
    }

    #[cfg(unix)]
    #[test]
    fn test_file_source_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let source = FileKeySource::new(dir.path().join("machine.key"));
        source.load_or_create().unwrap();

        let mode = std::fs::metadata(source.path()).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, 0o600);
    }

    #[test]
    fn test_corrupt_key_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("machine.key");
        std::fs::write(&path, "not base64 !!").unwrap();

        let err = FileKeySource::new(&path).load_or_create().unwrap_err();
        assert!(matches!(err, SafeError::CorruptOrWrongContext));
    }

    #[test]
    fn test_static_source() {
        let source = StaticKeySource::new([9u8; 32]);
        assert_eq!(source.load_or_create().unwrap().as_bytes(), &[9u8; 32]);
    }

    #[test]
    fn test_source_selection() {
        let mut config = SafeConfig::default();
        config.secrets.backend = "file".into();
        assert_eq!(source_from_config(&config).unwrap().name(), "file");

        config.secrets.backend = "auto".into();
        let expected = if native_keychain_available() { "keychain" } else { "file" };
        assert_eq!(source_from_config(&config).unwrap().name(), expected);

        config.secrets.backend = "carrier-pigeon".into();
        assert!(source_from_config(&config).is_err());
    }
}
