use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{SafeError, SafeResult};

/// Lowest PBKDF2 iteration count accepted from configuration
pub const MIN_KDF_ITERATIONS: u32 = 200_000;

/// Lowest salt length accepted from configuration
pub const MIN_SALT_LEN: usize = 16;

/// Top-level configuration (loaded from safefold.toml)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SafeConfig {
    pub storage: StorageConfig,
    pub crypto: CryptoConfig,
    pub auth: AuthConfig,
    pub secrets: SecretsConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Directory holding the metadata document and sealed keys
    pub data_dir: PathBuf,
    /// Metadata document file name (relative to data_dir)
    pub metadata_file: PathBuf,
    /// Encrypt the metadata document at rest with the sealed store key
    pub encrypt_metadata: bool,
    /// Sealed store key file name (relative to data_dir)
    pub store_key_file: PathBuf,
}

/// Key derivation parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CryptoConfig {
    /// PBKDF2 iterations for folder KEKs (default: 310000)
    pub kek_iterations: u32,
    /// PBKDF2 iterations for master password hashes (default: 200000)
    pub auth_iterations: u32,
    /// Random salt length in bytes (default: 32)
    pub salt_len: usize,
    /// Master password verification hash length (default: 64)
    pub auth_hash_len: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Failed attempts before the exponential delay kicks in
    pub lockout_threshold: u32,
    /// Upper bound for a single lockout delay
    pub max_lockout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SecretsConfig {
    /// Machine key source: "auto", "keychain", or "file"
    pub backend: String,
    /// Machine key file name for the "file" backend (relative to data_dir)
    pub machine_key_file: PathBuf,
    /// Non-secret context tag mixed into every sealed blob
    pub context_tag: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (default: info)
    pub level: String,
    /// Log format: "json" or "text"
    pub format: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("~/.local/share/safefold"),
            metadata_file: PathBuf::from("metadata.json"),
            encrypt_metadata: true,
            store_key_file: PathBuf::from("store.key"),
        }
    }
}

impl Default for CryptoConfig {
    fn default() -> Self {
        Self {
            kek_iterations: 310_000,
            auth_iterations: MIN_KDF_ITERATIONS,
            salt_len: 32,
            auth_hash_len: 64,
        }
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            lockout_threshold: 3,
            max_lockout_secs: 3600,
        }
    }
}

impl Default for SecretsConfig {
    fn default() -> Self {
        Self {
            backend: "auto".into(),
            machine_key_file: PathBuf::from("machine.key"),
            context_tag: "safefold-sealed-v1".into(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
            format: "text".into(),
        }
    }
}

impl SafeConfig {
    /// Load from a TOML file; a missing file yields defaults.
    pub fn load(path: &Path) -> SafeResult<Self> {
        if !path.exists() {
            tracing::debug!(path = %path.display(), "config file absent, using defaults");
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path).map_err(|e| SafeError::from_io(path, e))?;
        let config: SafeConfig = toml::from_str(&content)
            .map_err(|e| SafeError::Config(format!("parsing {}: {e}", path.display())))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject parameters weaker than the configured floors.
    pub fn validate(&self) -> SafeResult<()> {
        let c = &self.crypto;
        if c.kek_iterations < MIN_KDF_ITERATIONS || c.auth_iterations < MIN_KDF_ITERATIONS {
            return Err(SafeError::Config(format!(
                "KDF iterations must be at least {MIN_KDF_ITERATIONS}"
            )));
        }
        if c.salt_len < MIN_SALT_LEN {
            return Err(SafeError::Config(format!(
                "salt_len must be at least {MIN_SALT_LEN} bytes"
            )));
        }
        if c.auth_hash_len != 32 && c.auth_hash_len != 64 {
            return Err(SafeError::Config("auth_hash_len must be 32 or 64".into()));
        }
        match self.secrets.backend.as_str() {
            "auto" | "keychain" | "file" => {}
            other => {
                return Err(SafeError::Config(format!("unknown secrets backend: {other}")));
            }
        }
        match self.logging.format.as_str() {
            "json" | "text" => Ok(()),
            other => Err(SafeError::Config(format!("unknown log format: {other}"))),
        }
    }

    /// Absolute data directory with `~` expanded.
    pub fn data_dir(&self) -> PathBuf {
        expand_tilde(&self.storage.data_dir)
    }

    pub fn metadata_path(&self) -> PathBuf {
        self.data_dir().join(&self.storage.metadata_file)
    }

    pub fn store_key_path(&self) -> PathBuf {
        self.data_dir().join(&self.storage.store_key_file)
    }

    pub fn machine_key_path(&self) -> PathBuf {
        self.data_dir().join(&self.secrets.machine_key_file)
    }
}

/// Expand a leading `~/` to the user's home directory
pub fn expand_tilde(path: &Path) -> PathBuf {
    let s = path.to_string_lossy();
    if let Some(rest) = s.strip_prefix("~/") {
        let home = std::env::var("HOME")
            .or_else(|_| std::env::var("USERPROFILE"))
            .unwrap_or_default();
        PathBuf::from(home).join(rest)
    } else {
        path.to_path_buf()
    }
}
