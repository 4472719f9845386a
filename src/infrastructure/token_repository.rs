use crate::domain::models::StoredCredentials;
use crate::infrastructure::credential_store::TokenStore;
use crate::infrastructure::error::InfraError;
use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, params};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone)]
pub struct SqliteTokenStore {
    db_path: PathBuf,
}

impl SqliteTokenStore {
    pub fn new(db_path: impl AsRef<Path>) -> Self {
        Self {
            db_path: db_path.as_ref().to_path_buf(),
        }
    }

    fn connect(&self) -> Result<Connection, InfraError> {
        Connection::open(&self.db_path).map_err(InfraError::from)
    }
}

impl TokenStore for SqliteTokenStore {
    fn save(&self, account_id: &str, credentials: &StoredCredentials) -> Result<(), InfraError> {
        credentials.validate().map_err(InfraError::Credential)?;

        let connection = self.connect()?;
        connection.execute(
            "INSERT INTO account_tokens (account_id, refresh_token, access_token, expires_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(account_id) DO UPDATE SET
               refresh_token = excluded.refresh_token,
               access_token = excluded.access_token,
               expires_at = excluded.expires_at,
               updated_at = excluded.updated_at",
            params![
                account_id,
                credentials.refresh_token,
                credentials.access_token,
                credentials.expires_at.map(|value| value.to_rfc3339()),
                Utc::now().to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    fn load(&self, account_id: &str) -> Result<Option<StoredCredentials>, InfraError> {
        let connection = self.connect()?;
        let row: Option<(String, Option<String>, Option<String>)> = connection
            .query_row(
                "SELECT refresh_token, access_token, expires_at FROM account_tokens WHERE account_id = ?1",
                params![account_id],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .optional()?;

        let Some((refresh_token, access_token, expires_at_raw)) = row else {
            return Ok(None);
        };

        let expires_at = match expires_at_raw {
            Some(raw) => Some(
                DateTime::parse_from_rfc3339(&raw)
                    .map_err(|error| {
                        InfraError::Credential(format!(
                            "invalid account_tokens.expires_at '{raw}' for {account_id}: {error}"
                        ))
                    })?
                    .with_timezone(&Utc),
            ),
            None => None,
        };

        Ok(Some(StoredCredentials {
            refresh_token,
            access_token,
            expires_at,
        }))
    }

    fn delete(&self, account_id: &str) -> Result<(), InfraError> {
        let connection = self.connect()?;
        connection.execute(
            "DELETE FROM account_tokens WHERE account_id = ?1",
            params![account_id],
        )?;
        Ok(())
    }
}
