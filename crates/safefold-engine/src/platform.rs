//! Per-platform folder concealment and access denial.
//!
//! - Windows: hidden+system attributes via `SetFileAttributesW`; a full-control
//!   deny entry (`(OI)(CI)F`) managed with `icacls` for the user SID taken from
//!   the process token, never from environment variables.
//! - Unix: no hidden/system attributes exist, concealment is the obfuscated
//!   name alone. Denial clears every permission bit on the folder and the
//!   previous mode is restored on unlock.

use std::path::Path;

use safefold_core::{SafeError, SafeResult};

pub trait FolderGuard: Send + Sync {
    /// Set or clear hidden+system attributes on a single path.
    fn set_concealed(&self, path: &Path, concealed: bool) -> SafeResult<()>;

    /// Access state to record before denying, restored by `allow_current_user`.
    fn access_snapshot(&self, path: &Path) -> Option<u32>;

    /// Deny all access to the folder for the current user.
    fn deny_current_user(&self, path: &Path) -> SafeResult<()>;

    /// Remove the deny rule, restoring `snapshot` where the platform uses one.
    fn allow_current_user(&self, path: &Path, snapshot: Option<u32>) -> SafeResult<()>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct PlatformGuard;

#[cfg(unix)]
impl FolderGuard for PlatformGuard {
    fn set_concealed(&self, _path: &Path, _concealed: bool) -> SafeResult<()> {
        Ok(())
    }

    fn access_snapshot(&self, path: &Path) -> Option<u32> {
        use std::os::unix::fs::PermissionsExt;
        std::fs::metadata(path)
            .ok()
            .map(|m| m.permissions().mode() & 0o7777)
    }

    fn deny_current_user(&self, path: &Path) -> SafeResult<()> {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(0))
            .map_err(|e| SafeError::from_io(path, e))
    }

    fn allow_current_user(&self, path: &Path, snapshot: Option<u32>) -> SafeResult<()> {
        use std::os::unix::fs::PermissionsExt;
        let mode = snapshot.unwrap_or(0o700);
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(mode))
            .map_err(|e| SafeError::from_io(path, e))
    }
}

#[cfg(windows)]
impl FolderGuard for PlatformGuard {
    fn set_concealed(&self, path: &Path, concealed: bool) -> SafeResult<()> {
        windows_impl::set_concealed(path, concealed)
    }

    fn access_snapshot(&self, _path: &Path) -> Option<u32> {
        None
    }

    fn deny_current_user(&self, path: &Path) -> SafeResult<()> {
        let rule = format!("{}:(OI)(CI)F", windows_impl::current_user_principal()?);
        windows_impl::icacls(path, &["/deny", &rule])
    }

    fn allow_current_user(&self, path: &Path, _snapshot: Option<u32>) -> SafeResult<()> {
        let principal = windows_impl::current_user_principal()?;
        windows_impl::icacls(path, &["/remove:d", &principal])
    }
}

#[cfg(windows)]
mod windows_impl {
    use std::path::Path;
    use std::process::Command;

    use safefold_core::{SafeError, SafeResult};
    use windows::core::{HSTRING, PWSTR};
    use windows::Win32::Foundation::{CloseHandle, LocalFree, HANDLE, HLOCAL};
    use windows::Win32::Security::Authorization::ConvertSidToStringSidW;
    use windows::Win32::Security::{GetTokenInformation, TokenUser, TOKEN_QUERY, TOKEN_USER};
    use windows::Win32::Storage::FileSystem::{
        GetFileAttributesW, SetFileAttributesW, FILE_ATTRIBUTE_HIDDEN, FILE_ATTRIBUTE_SYSTEM,
        FILE_FLAGS_AND_ATTRIBUTES, INVALID_FILE_ATTRIBUTES,
    };
    use windows::Win32::System::Threading::{GetCurrentProcess, OpenProcessToken};

    pub fn set_concealed(path: &Path, concealed: bool) -> SafeResult<()> {
        let wide = HSTRING::from(path.as_os_str());
        let flags = FILE_ATTRIBUTE_HIDDEN.0 | FILE_ATTRIBUTE_SYSTEM.0;

        // SAFETY: `wide` is a valid NUL-terminated wide string for the call's duration
        let attrs = unsafe { GetFileAttributesW(&wide) };
        if attrs == INVALID_FILE_ATTRIBUTES {
            return Err(SafeError::from_io(path, std::io::Error::last_os_error()));
        }
        let next = if concealed { attrs | flags } else { attrs & !flags };

        // SAFETY: as above
        unsafe { SetFileAttributesW(&wide, FILE_FLAGS_AND_ATTRIBUTES(next)) }
            .map_err(|e| SafeError::PermissionDenied(format!("{}: {e}", path.display())))
    }

    fn token_error(e: windows::core::Error) -> SafeError {
        SafeError::PermissionDenied(format!("reading process token: {e}"))
    }

    /// Closes the token handle on drop.
    struct Token(HANDLE);

    impl Drop for Token {
        fn drop(&mut self) {
            // SAFETY: the handle came from OpenProcessToken and is closed once
            let _ = unsafe { CloseHandle(self.0) };
        }
    }

    /// The process owner's SID in icacls `*S-1-...` form.
    pub fn current_user_principal() -> SafeResult<String> {
        let mut handle = HANDLE::default();
        // SAFETY: the pseudo-handle from GetCurrentProcess needs no closing
        unsafe { OpenProcessToken(GetCurrentProcess(), TOKEN_QUERY, &mut handle) }
            .map_err(token_error)?;
        let token = Token(handle);

        let mut len = 0u32;
        // SAFETY: size query; fails with ERROR_INSUFFICIENT_BUFFER and sets `len`
        let _ = unsafe { GetTokenInformation(token.0, TokenUser, None, 0, &mut len) };
        if len == 0 {
            return Err(SafeError::PermissionDenied("empty token user".into()));
        }
        // u64 words keep the TOKEN_USER header aligned
        let mut buf = vec![0u64; (len as usize).div_ceil(8)];
        // SAFETY: `buf` holds at least `len` bytes
        unsafe {
            GetTokenInformation(
                token.0,
                TokenUser,
                Some(buf.as_mut_ptr().cast()),
                len,
                &mut len,
            )
        }
        .map_err(token_error)?;

        // SAFETY: GetTokenInformation filled `buf` with a TOKEN_USER whose SID
        // points into the same buffer, which outlives this block
        let sid = unsafe { (*buf.as_ptr().cast::<TOKEN_USER>()).User.Sid };
        let mut text = PWSTR::null();
        // SAFETY: `sid` is valid; `text` receives a LocalAlloc'd string freed below
        unsafe { ConvertSidToStringSidW(sid, &mut text) }.map_err(token_error)?;
        // SAFETY: `text` is a NUL-terminated wide string from ConvertSidToStringSidW
        let converted = unsafe { text.to_string() };
        // SAFETY: freed exactly once
        unsafe { LocalFree(Some(HLOCAL(text.0.cast()))) };

        let sid = converted
            .map_err(|e| SafeError::PermissionDenied(format!("decoding SID: {e}")))?;
        Ok(format!("*{sid}"))
    }

    pub fn icacls(path: &Path, args: &[&str]) -> SafeResult<()> {
        let output = Command::new("icacls")
            .arg(path)
            .args(args)
            .output()
            .map_err(|e| SafeError::from_io(path, e))?;
        if output.status.success() {
            Ok(())
        } else {
            Err(SafeError::PermissionDenied(format!(
                "icacls {}: {}",
                path.display(),
                String::from_utf8_lossy(&output.stderr).trim()
            )))
        }
    }
}
