use crate::application::auth_flow::{AuthFlow, RefreshOutcome};
use crate::domain::models::{AccountStatus, AuthState, RemoteSnapshot};
use crate::infrastructure::credential_store::TokenStore;
use crate::infrastructure::ecobee_client::{EcobeeHttpClient, Selection};
use crate::infrastructure::error::InfraError;
use crate::infrastructure::thermostat_mapper::parse_thermostat_list;
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// One vendor account: credentials, authentication state and the last known snapshot.
pub struct AccountSession<C>
where
    C: EcobeeHttpClient,
{
    account_id: String,
    auth_flow: AuthFlow<C>,
    auth: AuthState,
    token_store: Arc<dyn TokenStore>,
    selection: Selection,
    snapshot: Arc<RemoteSnapshot>,
    pending_persist: bool,
    last_fetch_at: Option<DateTime<Utc>>,
}

impl<C> AccountSession<C>
where
    C: EcobeeHttpClient,
{
    /// Restores persisted credentials for `account_id`, if any.
    pub fn new(
        account_id: impl Into<String>,
        auth_flow: AuthFlow<C>,
        token_store: Arc<dyn TokenStore>,
    ) -> Result<Self, InfraError> {
        let account_id = account_id.into();
        let now = auth_flow.now();
        let auth = match token_store.load(&account_id)? {
            Some(stored) => match stored.validate() {
                Ok(()) => {
                    let restored = AuthState::from_stored(stored, now);
                    info!(
                        account = %account_id,
                        access_token_live = restored.authenticated,
                        "restored stored credentials"
                    );
                    restored
                }
                Err(reason) => {
                    warn!(account = %account_id, reason = %reason, "ignoring stored credentials");
                    AuthState::unauthorized()
                }
            },
            None => AuthState::unauthorized(),
        };

        Ok(Self {
            account_id,
            auth_flow,
            auth,
            token_store,
            selection: Selection::registered_full(),
            snapshot: Arc::new(RemoteSnapshot::default()),
            pending_persist: false,
            last_fetch_at: None,
        })
    }

    pub fn account_id(&self) -> &str {
        &self.account_id
    }

    pub fn is_authenticated(&self) -> bool {
        self.auth.authenticated && self.auth.credentials.has_access_token()
    }

    pub fn pending_persist(&self) -> bool {
        self.pending_persist
    }

    pub fn status(&self) -> AccountStatus {
        if self.pending_persist {
            AccountStatus::PersistencePending
        } else if self.is_authenticated() {
            AccountStatus::Authenticated
        } else if self.auth.reauthentication_required {
            AccountStatus::ReauthenticationRequired
        } else if self.auth.credentials.has_refresh_token()
            && self.auth.next_refresh_deadline.is_some()
        {
            AccountStatus::RefreshPending
        } else {
            AccountStatus::NotAuthorized
        }
    }

    pub fn snapshot(&self) -> Arc<RemoteSnapshot> {
        Arc::clone(&self.snapshot)
    }

    pub fn last_fetch_at(&self) -> Option<DateTime<Utc>> {
        self.last_fetch_at
    }

    pub fn refresh_due(&self, now: DateTime<Utc>) -> bool {
        self.auth.refresh_due(now)
    }

    /// Schedules a refresh on the next tick, unless re-authorization is required.
    pub fn expire_access_token(&mut self, now: DateTime<Utc>) {
        if !self.auth.reauthentication_required && self.auth.credentials.has_refresh_token() {
            self.auth.next_refresh_deadline = Some(now);
        }
    }

    pub async fn request_pin(&mut self) -> Option<String> {
        let pin = self.auth_flow.request_pin().await;
        match &pin {
            Some(_) => info!(account = %self.account_id, "PIN issued; waiting for authorization"),
            None => warn!(account = %self.account_id, "could not obtain a PIN"),
        }
        pin
    }

    /// Exchanges the pending authorization code and persists the new tokens.
    pub async fn complete_authorization(&mut self) -> Result<(), InfraError> {
        self.auth_flow.exchange_code(&mut self.auth).await?;
        self.persist_credentials()?;
        info!(account = %self.account_id, "account authorized");
        Ok(())
    }

    pub async fn refresh_tokens(&mut self) -> RefreshOutcome {
        let outcome = self.auth_flow.refresh(&mut self.auth).await;
        if outcome == RefreshOutcome::Rejected {
            self.forget_stored_credentials();
        }
        if outcome.adopted_tokens() {
            // Rotated refresh tokens are single-use; the old one is already dead.
            if let Err(error) = self.persist_credentials() {
                error!(
                    account = %self.account_id,
                    error = %error,
                    "could not persist refreshed tokens; requests blocked until stored"
                );
            }
        }
        outcome
    }

    /// Returns `true` once nothing is left to persist.
    pub fn retry_pending_persist(&mut self) -> bool {
        if !self.pending_persist {
            return true;
        }
        match self.persist_credentials() {
            Ok(()) => {
                info!(account = %self.account_id, "pending tokens persisted");
                true
            }
            Err(error) => {
                error!(account = %self.account_id, error = %error, "token persistence still failing");
                false
            }
        }
    }

    /// Drops a refresh token the vendor rejected so a restart does not present it again.
    fn forget_stored_credentials(&mut self) {
        self.pending_persist = false;
        match self.token_store.delete(&self.account_id) {
            Ok(()) => info!(account = %self.account_id, "removed rejected credentials from storage"),
            Err(error) => warn!(
                account = %self.account_id,
                error = %error,
                "could not remove rejected credentials"
            ),
        }
    }

    fn persist_credentials(&mut self) -> Result<(), InfraError> {
        let Some(stored) = self.auth.credentials.to_stored() else {
            self.pending_persist = false;
            return Ok(());
        };
        match self.token_store.save(&self.account_id, &stored) {
            Ok(()) => {
                self.pending_persist = false;
                Ok(())
            }
            Err(error) => {
                self.pending_persist = true;
                Err(error)
            }
        }
    }

    fn access_token_for_request(&self) -> Result<String, InfraError> {
        if self.pending_persist {
            return Err(InfraError::Credential(format!(
                "tokens for account {} are not persisted yet",
                self.account_id
            )));
        }
        match self.auth.credentials.access_token.as_deref() {
            Some(token) if self.is_authenticated() => Ok(token.to_string()),
            _ => Err(InfraError::NotAuthenticated(self.account_id.clone())),
        }
    }

    /// Replaces the snapshot on success. On failure the previous snapshot stays in place.
    pub async fn fetch_remote_state(&mut self) -> Result<(), InfraError> {
        let access_token = self.access_token_for_request()?;
        let result = self
            .auth_flow
            .client()
            .fetch_thermostats(&access_token, &self.selection)
            .await;

        match result {
            Ok(thermostats) => {
                let snapshot = parse_thermostat_list(&thermostats);
                debug!(
                    account = %self.account_id,
                    thermostats = snapshot.thermostats.len(),
                    sensors = snapshot.sensors.len(),
                    "remote state fetched"
                );
                self.snapshot = Arc::new(snapshot);
                self.last_fetch_at = Some(self.auth_flow.now());
                Ok(())
            }
            Err(error) => {
                self.note_request_failure("fetch", &error);
                Err(error)
            }
        }
    }

    /// Forwards a command body as is. The snapshot is left for the next fetch to update.
    pub async fn send_command(&mut self, body: &Value) -> Result<(), InfraError> {
        let access_token = self.access_token_for_request()?;
        let result = self
            .auth_flow
            .client()
            .post_thermostat(&access_token, body)
            .await;
        if let Err(error) = &result {
            self.note_request_failure("command", error);
        }
        result
    }

    fn note_request_failure(&mut self, operation: &str, error: &InfraError) {
        if error.is_token_expired() {
            let now = self.auth_flow.now();
            self.expire_access_token(now);
            debug!(account = %self.account_id, operation, "access token expired; refresh scheduled");
            return;
        }
        if error.is_transient() {
            debug!(account = %self.account_id, operation, error = %error, "ecobee request failed");
            return;
        }
        match error.vendor_message() {
            Some(message) => warn!(account = %self.account_id, operation, vendor = %message, "ecobee request failed"),
            None => debug!(account = %self.account_id, operation, error = %error, "ecobee request failed"),
        }
    }

    pub fn dump_snapshot(&self) -> Result<String, InfraError> {
        Ok(serde_json::to_string_pretty(self.snapshot.as_ref())?)
    }
}
