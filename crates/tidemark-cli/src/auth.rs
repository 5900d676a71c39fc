//! API key storage in the OS keychain.

#[cfg(test)]
use std::collections::HashMap;
#[cfg(test)]
use std::sync::{Mutex, OnceLock};

#[cfg(not(test))]
use keyring::Entry;

use tidemark_core::remote::CredentialProvider;
use tidemark_core::util::normalize_text_option;

use crate::error::CliError;

#[cfg(not(test))]
const KEYRING_SERVICE_NAME: &str = "tidemark-cli";
const KEYRING_USERNAME: &str = "api_key";

#[derive(Clone)]
pub struct KeyStore {
    username: String,
}

impl Default for KeyStore {
    fn default() -> Self {
        Self {
            username: KEYRING_USERNAME.to_string(),
        }
    }
}

impl KeyStore {
    #[cfg(test)]
    pub fn named(username: &str) -> Self {
        Self {
            username: username.to_string(),
        }
    }

    #[cfg(test)]
    fn test_store() -> &'static Mutex<HashMap<String, String>> {
        static STORE: OnceLock<Mutex<HashMap<String, String>>> = OnceLock::new();
        STORE.get_or_init(|| Mutex::new(HashMap::new()))
    }

    #[cfg(not(test))]
    fn entry(&self) -> Result<Entry, CliError> {
        Entry::new(KEYRING_SERVICE_NAME, &self.username)
            .map_err(|error| CliError::Keychain(error.to_string()))
    }

    #[cfg(not(test))]
    pub fn load(&self) -> Result<Option<String>, CliError> {
        match self.entry()?.get_password() {
            Ok(raw) => Ok(normalize_text_option(Some(raw))),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(error) => Err(CliError::Keychain(error.to_string())),
        }
    }

    #[cfg(test)]
    pub fn load(&self) -> Result<Option<String>, CliError> {
        let guard = Self::test_store()
            .lock()
            .map_err(|error| CliError::Keychain(error.to_string()))?;
        Ok(normalize_text_option(guard.get(&self.username).cloned()))
    }

    #[cfg(not(test))]
    pub fn save(&self, key: &str) -> Result<(), CliError> {
        self.entry()?
            .set_password(key)
            .map_err(|error| CliError::Keychain(error.to_string()))
    }

    #[cfg(test)]
    pub fn save(&self, key: &str) -> Result<(), CliError> {
        let mut guard = Self::test_store()
            .lock()
            .map_err(|error| CliError::Keychain(error.to_string()))?;
        guard.insert(self.username.clone(), key.to_string());
        Ok(())
    }

    #[cfg(not(test))]
    pub fn clear(&self) -> Result<(), CliError> {
        match self.entry()?.delete_credential() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(error) => Err(CliError::Keychain(error.to_string())),
        }
    }

    #[cfg(test)]
    pub fn clear(&self) -> Result<(), CliError> {
        let mut guard = Self::test_store()
            .lock()
            .map_err(|error| CliError::Keychain(error.to_string()))?;
        guard.remove(&self.username);
        Ok(())
    }
}

/// Where the active API key came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeySource {
    Environment,
    Keychain,
}

/// Environment override first, keychain second. Read on every call so a key
/// stored mid-session is picked up.
pub struct CliCredentials {
    env_key: Option<String>,
    store: KeyStore,
}

impl CliCredentials {
    pub fn new(env_key: Option<String>, store: KeyStore) -> Self {
        Self {
            env_key: normalize_text_option(env_key),
            store,
        }
    }

    pub fn resolve(&self) -> Option<(String, KeySource)> {
        if let Some(key) = &self.env_key {
            return Some((key.clone(), KeySource::Environment));
        }
        match self.store.load() {
            Ok(key) => key.map(|key| (key, KeySource::Keychain)),
            Err(error) => {
                tracing::warn!(%error, "Could not read API key from keychain");
                None
            }
        }
    }
}

impl std::fmt::Debug for CliCredentials {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("CliCredentials")
            .field("env_key", &self.env_key.as_ref().map(|_| "[REDACTED]"))
            .finish_non_exhaustive()
    }
}

impl CredentialProvider for CliCredentials {
    fn api_key(&self) -> Option<String> {
        self.resolve().map(|(key, _)| key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn keychain_round_trip() {
        let store = KeyStore::named("round-trip");
        assert_eq!(store.load().unwrap(), None);

        store.save("secret").unwrap();
        assert_eq!(store.load().unwrap().as_deref(), Some("secret"));

        store.clear().unwrap();
        assert_eq!(store.load().unwrap(), None);
    }

    #[test]
    fn environment_key_takes_precedence() {
        let store = KeyStore::named("precedence");
        store.save("from-keychain").unwrap();

        let credentials = CliCredentials::new(Some("from-env".to_string()), store.clone());
        assert_eq!(
            credentials.resolve(),
            Some(("from-env".to_string(), KeySource::Environment))
        );

        let credentials = CliCredentials::new(Some("  ".to_string()), store);
        assert_eq!(
            credentials.resolve(),
            Some(("from-keychain".to_string(), KeySource::Keychain))
        );
    }

    #[test]
    fn credentials_debug_redacts_key() {
        let credentials = CliCredentials::new(Some("hunter2".to_string()), KeyStore::named("debug"));
        let rendered = format!("{credentials:?}");
        assert!(!rendered.contains("hunter2"));
        assert!(rendered.contains("[REDACTED]"));
    }
}
