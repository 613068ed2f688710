//! Master password hashing and verification with progressive lockout.
//!
//! After `threshold` consecutive failures each further attempt first blocks
//! the calling thread for `2^(failures - threshold)` seconds (capped) unless
//! that long has already passed since the last failure. The counter is a
//! [`LockoutRecord`] with a wall-clock timestamp; callers load it with
//! [`PasswordAuthenticator::restore_lockout`] and persist
//! [`PasswordAuthenticator::lockout_record`] after each attempt so the delay
//! holds across processes.

use std::sync::Mutex;
use std::time::Duration;

use safefold_core::config::AuthConfig;
use safefold_core::types::unix_now_millis;
use safefold_core::{LockoutRecord, MasterCredential, SafeError, SafeResult};
use secrecy::{ExposeSecret, SecretString};
use subtle::ConstantTimeEq;
use tracing::{debug, warn};

use crate::kdf::{derive, KdfParams};
use crate::keys::random_salt;

#[derive(Debug, Clone)]
pub struct LockoutPolicy {
    /// Failures tolerated before delays start
    pub threshold: u32,
    /// Cap on a single delay
    pub max_delay: Duration,
}

impl Default for LockoutPolicy {
    fn default() -> Self {
        Self::from(&AuthConfig::default())
    }
}

impl From<&AuthConfig> for LockoutPolicy {
    fn from(c: &AuthConfig) -> Self {
        Self {
            threshold: c.lockout_threshold,
            max_delay: Duration::from_secs(c.max_lockout_secs),
        }
    }
}

impl LockoutPolicy {
    /// Delay owed before the next attempt after `failures` consecutive failures.
    pub fn delay_for(&self, failures: u32) -> Option<Duration> {
        if failures < self.threshold {
            return None;
        }
        let exp = (failures - self.threshold).min(31);
        let secs = 1u64 << exp;
        Some(Duration::from_secs(secs).min(self.max_delay))
    }
}

type Sleeper = Box<dyn Fn(Duration) + Send + Sync>;

pub struct PasswordAuthenticator {
    params: KdfParams,
    policy: LockoutPolicy,
    state: Mutex<LockoutRecord>,
    sleeper: Sleeper,
}

impl std::fmt::Debug for PasswordAuthenticator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PasswordAuthenticator")
            .field("policy", &self.policy)
            .field("failed_attempts", &self.failed_attempts())
            .finish()
    }
}

impl PasswordAuthenticator {
    pub fn new(params: KdfParams, policy: LockoutPolicy) -> Self {
        Self {
            params,
            policy,
            state: Mutex::new(LockoutRecord::default()),
            sleeper: Box::new(std::thread::sleep),
        }
    }

    /// Replace the blocking sleep (tests record the requested delays instead).
    pub fn with_sleeper(mut self, sleeper: impl Fn(Duration) + Send + Sync + 'static) -> Self {
        self.sleeper = Box::new(sleeper);
        self
    }

    /// Hash a new master password under a fresh random salt.
    pub fn hash(&self, password: &SecretString) -> SafeResult<MasterCredential> {
        let salt = random_salt(self.params.salt_len);
        let hash = derive(
            password.expose_secret().as_bytes(),
            &salt,
            self.params.auth_iterations,
            self.params.auth_hash_len,
        )?;
        Ok(MasterCredential {
            hash: hash.to_vec(),
            salt,
            iterations: self.params.auth_iterations,
        })
    }

    /// Check `password` against a stored credential in constant time.
    ///
    /// Blocks first if the lockout delay is owed. Failures are counted and a
    /// success resets the counter.
    pub fn verify(&self, password: &SecretString, stored: &MasterCredential) -> SafeResult<bool> {
        self.wait_out_lockout();

        let candidate = derive(
            password.expose_secret().as_bytes(),
            &stored.salt,
            stored.iterations,
            stored.hash.len(),
        )?;
        let ok: bool = candidate.as_slice().ct_eq(stored.hash.as_slice()).into();

        let mut state = self.lock_state();
        if ok {
            if state.failed_attempts > 0 {
                debug!(previous_failures = state.failed_attempts, "lockout counter reset");
            }
            *state = LockoutRecord::default();
        } else {
            state.failed_attempts = state.failed_attempts.saturating_add(1);
            state.last_failure_ms = Some(unix_now_millis());
            warn!(failed_attempts = state.failed_attempts, "master password rejected");
        }
        Ok(ok)
    }

    /// Verify `old`, then hash `new`. Persisting the result and re-wrapping
    /// folder keys is left to the caller.
    pub fn change_password(
        &self,
        old: &SecretString,
        new: &SecretString,
        stored: &MasterCredential,
    ) -> SafeResult<MasterCredential> {
        if !self.verify(old, stored)? {
            return Err(SafeError::WrongOldPassword);
        }
        self.hash(new)
    }

    pub fn failed_attempts(&self) -> u32 {
        self.lock_state().failed_attempts
    }

    /// Snapshot of the counter for persisting.
    pub fn lockout_record(&self) -> LockoutRecord {
        *self.lock_state()
    }

    /// Replace the in-memory counter with a persisted one.
    pub fn restore_lockout(&self, record: LockoutRecord) {
        *self.lock_state() = record;
    }

    /// Remaining wait before the next attempt is evaluated, if any.
    pub fn pending_delay(&self) -> Option<Duration> {
        let state = self.lock_state();
        let delay = self.policy.delay_for(state.failed_attempts)?;
        let elapsed = state.last_failure_ms.map(since).unwrap_or(delay);
        delay.checked_sub(elapsed).filter(|d| !d.is_zero())
    }

    fn wait_out_lockout(&self) {
        let owed = {
            let state = self.lock_state();
            match (self.policy.delay_for(state.failed_attempts), state.last_failure_ms) {
                (Some(delay), Some(last)) if since(last) < delay => Some(delay),
                _ => None,
            }
        };
        if let Some(delay) = owed {
            warn!(delay_secs = delay.as_secs(), "too many failed attempts, delaying");
            (self.sleeper)(delay);
        }
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, LockoutRecord> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Wall-clock time since `last_ms`; zero if the clock went backwards.
fn since(last_ms: u64) -> Duration {
    Duration::from_millis(unix_now_millis().saturating_sub(last_ms))
}
