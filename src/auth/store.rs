//! Persisted credential storage.
//!
//! The refresh token that keeps a session alive across runs is held in the
//! platform keyring. Tests (and restricted environments) can opt out of the
//! keyring, in which case tokens live only for the process lifetime.

use std::fmt;
use std::sync::Mutex;

use keyring::Entry;

const KEYRING_SERVICE: &str = "palaver";
const REFRESH_TOKEN_ACCOUNT: &str = "refresh-token";

/// Describes failures when accessing the platform keyring.
///
/// Recoverable errors indicate the credential backend was temporarily
/// unavailable (a locked keychain, an absent secret service). Permanent
/// errors surface the underlying cause so callers can report them.
#[derive(Debug)]
pub enum CredentialError {
    Recoverable(keyring::Error),
    Permanent(keyring::Error),
}

impl CredentialError {
    fn inner(&self) -> &keyring::Error {
        match self {
            CredentialError::Recoverable(err) | CredentialError::Permanent(err) => err,
        }
    }

    pub fn is_recoverable(&self) -> bool {
        matches!(self, CredentialError::Recoverable(_))
    }
}

impl From<keyring::Error> for CredentialError {
    fn from(err: keyring::Error) -> Self {
        match err {
            keyring::Error::PlatformFailure(_) | keyring::Error::NoStorageAccess(_) => {
                CredentialError::Recoverable(err)
            }
            other => CredentialError::Permanent(other),
        }
    }
}

impl fmt::Display for CredentialError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.inner())
    }
}

impl std::error::Error for CredentialError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(self.inner())
    }
}

/// Stores the identity refresh token.
pub struct CredentialStore {
    use_keyring: bool,
    memory: Mutex<Option<String>>,
}

impl CredentialStore {
    pub fn new() -> Self {
        Self::new_with_keyring(true)
    }

    /// Construct a store, optionally disabling keyring access (useful for
    /// tests).
    pub fn new_with_keyring(use_keyring: bool) -> Self {
        Self {
            use_keyring,
            memory: Mutex::new(None),
        }
    }

    fn entry() -> Result<Entry, CredentialError> {
        Entry::new(KEYRING_SERVICE, REFRESH_TOKEN_ACCOUNT).map_err(CredentialError::from)
    }

    pub fn load(&self) -> Result<Option<String>, CredentialError> {
        if !self.use_keyring {
            return Ok(self.memory.lock().map(|slot| (*slot).clone()).unwrap_or(None));
        }
        match Self::entry()?.get_password() {
            Ok(token) => Ok(Some(token)),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    pub fn store(&self, token: &str) -> Result<(), CredentialError> {
        if !self.use_keyring {
            if let Ok(mut slot) = self.memory.lock() {
                *slot = Some(token.to_string());
            }
            return Ok(());
        }
        Self::entry()?
            .set_password(token)
            .map_err(CredentialError::from)
    }

    pub fn clear(&self) -> Result<(), CredentialError> {
        if !self.use_keyring {
            if let Ok(mut slot) = self.memory.lock() {
                *slot = None;
            }
            return Ok(());
        }
        match Self::entry()?.delete_credential() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(err) => Err(err.into()),
        }
    }
}

impl Default for CredentialStore {
    fn default() -> Self {
        Self::new()
    }
}
