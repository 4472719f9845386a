use crate::domain::models::StoredCredentials;
use crate::infrastructure::error::InfraError;
use std::collections::HashMap;
use std::sync::Mutex;

/// Host-side durable storage for per-account credentials.
pub trait TokenStore: Send + Sync {
    fn save(&self, account_id: &str, credentials: &StoredCredentials) -> Result<(), InfraError>;
    fn load(&self, account_id: &str) -> Result<Option<StoredCredentials>, InfraError>;
    fn delete(&self, account_id: &str) -> Result<(), InfraError>;
}

#[derive(Debug, Clone)]
pub struct KeyringTokenStore {
    service_name: String,
}

impl KeyringTokenStore {
    pub fn new(service_name: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
        }
    }

    fn entry(&self, account_id: &str) -> Result<keyring::Entry, InfraError> {
        keyring::Entry::new(&self.service_name, account_id)
            .map_err(|error| InfraError::Credential(error.to_string()))
    }
}

impl Default for KeyringTokenStore {
    fn default() -> Self {
        Self::new("ecobee-bridge.oauth")
    }
}

impl TokenStore for KeyringTokenStore {
    fn save(&self, account_id: &str, credentials: &StoredCredentials) -> Result<(), InfraError> {
        let payload = serde_json::to_string(credentials)
            .map_err(|error| InfraError::Credential(error.to_string()))?;
        self.entry(account_id)?
            .set_password(&payload)
            .map_err(|error| InfraError::Credential(error.to_string()))
    }

    fn load(&self, account_id: &str) -> Result<Option<StoredCredentials>, InfraError> {
        let payload = match self.entry(account_id)?.get_password() {
            Ok(value) => value,
            Err(keyring::Error::NoEntry) => return Ok(None),
            Err(error) => return Err(InfraError::Credential(error.to_string())),
        };

        let credentials = serde_json::from_str::<StoredCredentials>(&payload)
            .map_err(|error| InfraError::Credential(error.to_string()))?;
        Ok(Some(credentials))
    }

    fn delete(&self, account_id: &str) -> Result<(), InfraError> {
        match self.entry(account_id)?.delete_credential() {
            Ok(_) => Ok(()),
            Err(keyring::Error::NoEntry) => Ok(()),
            Err(error) => Err(InfraError::Credential(error.to_string())),
        }
    }
}

#[derive(Debug, Default)]
pub struct InMemoryTokenStore {
    credentials: Mutex<HashMap<String, StoredCredentials>>,
}

impl TokenStore for InMemoryTokenStore {
    fn save(&self, account_id: &str, credentials: &StoredCredentials) -> Result<(), InfraError> {
        let mut guard = self
            .credentials
            .lock()
            .map_err(|error| InfraError::Credential(format!("in-memory lock poisoned: {error}")))?;
        guard.insert(account_id.to_string(), credentials.clone());
        Ok(())
    }

    fn load(&self, account_id: &str) -> Result<Option<StoredCredentials>, InfraError> {
        let guard = self
            .credentials
            .lock()
            .map_err(|error| InfraError::Credential(format!("in-memory lock poisoned: {error}")))?;
        Ok(guard.get(account_id).cloned())
    }

    fn delete(&self, account_id: &str) -> Result<(), InfraError> {
        let mut guard = self
            .credentials
            .lock()
            .map_err(|error| InfraError::Credential(format!("in-memory lock poisoned: {error}")))?;
        guard.remove(account_id);
        Ok(())
    }
}
