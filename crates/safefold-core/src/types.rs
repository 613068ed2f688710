use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

/// Protection state of a registered folder
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProtectionMode {
    /// Plain folder, no protection applied
    #[default]
    Normal,
    /// Hidden, ACL-denied and renamed to an obfuscated name
    QuickLocked,
    /// Contents encrypted under a wrapped per-folder key
    Encrypted,
}

impl std::fmt::Display for ProtectionMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ProtectionMode::Normal => "normal",
            ProtectionMode::QuickLocked => "quick-locked",
            ProtectionMode::Encrypted => "encrypted",
        };
        f.write_str(s)
    }
}

/// Master password verification material. Hash and salt are always replaced
/// together.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MasterCredential {
    #[serde(with = "b64")]
    pub hash: Vec<u8>,
    #[serde(with = "b64")]
    pub salt: Vec<u8>,
    pub iterations: u32,
}

/// A per-folder key wrapped under a password-derived KEK, ready to persist.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WrappedKeyMaterial {
    /// AEAD ciphertext of the FEK followed by the 16-byte tag
    pub wrapped_fek: Vec<u8>,
    /// Salt for the KEK derivation
    pub salt: Vec<u8>,
    /// IV used to wrap the FEK
    pub iv: Vec<u8>,
}

/// Metadata for one protected folder, keyed by its current on-disk path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FolderRecord {
    pub path: PathBuf,
    pub display_name: String,
    /// Unix timestamp (seconds) of registration
    pub created_at: u64,
    #[serde(default)]
    pub protection_mode: ProtectionMode,
    #[serde(default, with = "b64_opt", skip_serializing_if = "Option::is_none")]
    pub wrapped_fek: Option<Vec<u8>>,
    #[serde(default, with = "b64_opt", skip_serializing_if = "Option::is_none")]
    pub fek_salt: Option<Vec<u8>>,
    #[serde(default, with = "b64_opt", skip_serializing_if = "Option::is_none")]
    pub fek_iv: Option<Vec<u8>>,
}

impl FolderRecord {
    /// A fresh `Normal` record for `path`, named after its final component.
    pub fn new(path: &Path) -> Self {
        let display_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());

        Self {
            path: path.to_path_buf(),
            display_name,
            created_at: unix_now(),
            protection_mode: ProtectionMode::Normal,
            wrapped_fek: None,
            fek_salt: None,
            fek_iv: None,
        }
    }

    /// The stored wrapped key, if all three fields are present.
    pub fn key_material(&self) -> Option<WrappedKeyMaterial> {
        match (&self.wrapped_fek, &self.fek_salt, &self.fek_iv) {
            (Some(wrapped), Some(salt), Some(iv)) => Some(WrappedKeyMaterial {
                wrapped_fek: wrapped.clone(),
                salt: salt.clone(),
                iv: iv.clone(),
            }),
            _ => None,
        }
    }

    /// Attach wrapped key material and switch to `Encrypted`.
    pub fn set_key_material(&mut self, material: WrappedKeyMaterial) {
        self.wrapped_fek = Some(material.wrapped_fek);
        self.fek_salt = Some(material.salt);
        self.fek_iv = Some(material.iv);
        self.protection_mode = ProtectionMode::Encrypted;
    }

    /// Drop wrapped key material and return to `Normal`.
    pub fn clear_key_material(&mut self) {
        self.wrapped_fek = None;
        self.fek_salt = None;
        self.fek_iv = None;
        self.protection_mode = ProtectionMode::Normal;
    }

    /// `wrapped_fek` present iff the folder is `Encrypted`.
    pub fn is_consistent(&self) -> bool {
        let has_key = self.key_material().is_some();
        let no_fields =
            self.wrapped_fek.is_none() && self.fek_salt.is_none() && self.fek_iv.is_none();
        match self.protection_mode {
            ProtectionMode::Encrypted => has_key,
            _ => no_fields,
        }
    }
}

/// Persisted failed-attempt counter for the master password gate.
///
/// `last_failure_ms` is wall-clock milliseconds since the Unix epoch so the
/// lockout survives process restarts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockoutRecord {
    #[serde(default)]
    pub failed_attempts: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_failure_ms: Option<u64>,
}

pub fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

pub fn unix_now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

mod b64 {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(d)?;
        STANDARD.decode(s).map_err(serde::de::Error::custom)
    }
}

mod b64_opt {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &Option<Vec<u8>>, s: S) -> Result<S::Ok, S::Error> {
        match bytes {
            Some(b) => s.serialize_some(&STANDARD.encode(b)),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Vec<u8>>, D::Error> {
        let s = Option::<String>::deserialize(d)?;
        s.map(|s| STANDARD.decode(s).map_err(serde::de::Error::custom))
            .transpose()
    }
}
