use std::path::PathBuf;

use thiserror::Error;

pub type SafeResult<T> = Result<T, SafeError>;

#[derive(Debug, Error)]
pub enum SafeError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("not found: {0}")]
    NotFound(String),

    /// Key unwrap failed. Wrong password and tampered key material are
    /// deliberately reported the same way.
    #[error("wrong password")]
    WrongPassword,

    #[error("old password is incorrect")]
    WrongOldPassword,

    #[error("no key material stored for {}", .0.display())]
    NoKeyMaterial(PathBuf),

    #[error("file content tampered or wrong key")]
    TamperedOrWrongKey,

    #[error("sealed secret is corrupt or was sealed in another context")]
    CorruptOrWrongContext,

    #[error("{failed} of {total} files failed")]
    PartialBatchFailure { failed: usize, total: usize },

    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("operation cancelled after {processed} of {total} files")]
    Cancelled { processed: usize, total: usize },

    #[error("invalid state: {0}")]
    InvalidState(String),

    #[error("operation already in progress for {}", .0.display())]
    Busy(PathBuf),

    #[error("config error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Copyable discriminant of [`SafeError`], used where errors are collected
/// rather than propagated (per-file batch failures).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    InvalidInput,
    NotFound,
    WrongPassword,
    WrongOldPassword,
    NoKeyMaterial,
    TamperedOrWrongKey,
    CorruptOrWrongContext,
    PartialBatchFailure,
    PermissionDenied,
    Cancelled,
    InvalidState,
    Busy,
    Config,
    Io,
    Other,
}

impl SafeError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            SafeError::InvalidInput(_) => ErrorKind::InvalidInput,
            SafeError::NotFound(_) => ErrorKind::NotFound,
            SafeError::WrongPassword => ErrorKind::WrongPassword,
            SafeError::WrongOldPassword => ErrorKind::WrongOldPassword,
            SafeError::NoKeyMaterial(_) => ErrorKind::NoKeyMaterial,
            SafeError::TamperedOrWrongKey => ErrorKind::TamperedOrWrongKey,
            SafeError::CorruptOrWrongContext => ErrorKind::CorruptOrWrongContext,
            SafeError::PartialBatchFailure { .. } => ErrorKind::PartialBatchFailure,
            SafeError::PermissionDenied(_) => ErrorKind::PermissionDenied,
            SafeError::Cancelled { .. } => ErrorKind::Cancelled,
            SafeError::InvalidState(_) => ErrorKind::InvalidState,
            SafeError::Busy(_) => ErrorKind::Busy,
            SafeError::Config(_) => ErrorKind::Config,
            SafeError::Io(_) => ErrorKind::Io,
            SafeError::Other(_) => ErrorKind::Other,
        }
    }

    /// Map an I/O error, promoting `PermissionDenied` and `NotFound` to their
    /// own variants and attaching the path for context.
    pub fn from_io(path: &std::path::Path, err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::NotFound => SafeError::NotFound(path.display().to_string()),
            std::io::ErrorKind::PermissionDenied => {
                SafeError::PermissionDenied(format!("{}: {err}", path.display()))
            }
            _ => SafeError::Io(std::io::Error::new(
                err.kind(),
                format!("{}: {err}", path.display()),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    #[test]
    fn test_from_io_promotes_kinds() {
        let p = Path::new("/tmp/x");
        let nf = SafeError::from_io(p, std::io::Error::from(std::io::ErrorKind::NotFound));
        assert_eq!(nf.kind(), ErrorKind::NotFound);

        let pd = SafeError::from_io(p, std::io::Error::from(std::io::ErrorKind::PermissionDenied));
        assert_eq!(pd.kind(), ErrorKind::PermissionDenied);

        let other = SafeError::from_io(p, std::io::Error::other("boom"));
        assert_eq!(other.kind(), ErrorKind::Io);
        assert!(other.to_string().contains("/tmp/x"));
    }

    #[test]
    fn test_wrong_password_message_is_opaque() {
        // No hint about whether the password or the stored data was at fault
        assert_eq!(SafeError::WrongPassword.to_string(), "wrong password");
    }
}
