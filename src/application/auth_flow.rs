use crate::domain::models::{AuthState, REFRESH_RETRY_SECONDS, TokenGrant, redact};
use crate::infrastructure::ecobee_client::{
    EcobeeHttpClient, PinExchangeRequest, PinRequest, RefreshRequest,
};
use crate::infrastructure::error::InfraError;
use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use tracing::{debug, error, info};

pub type NowProvider = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefreshOutcome {
    /// Vendor returned the same token pair; only the expiry moved.
    Unchanged,
    /// New token pair adopted; the caller must persist it before use.
    Rotated,
    /// Refresh token rejected (`invalid_grant`); a new PIN flow is required.
    Rejected,
    Deferred { retry_at: DateTime<Utc> },
    NoRefreshToken,
}

impl RefreshOutcome {
    pub fn adopted_tokens(&self) -> bool {
        matches!(self, Self::Unchanged | Self::Rotated)
    }
}

/// PIN authorization handshake and refresh-token exchange for one account.
pub struct AuthFlow<C>
where
    C: EcobeeHttpClient,
{
    api_key: String,
    client: Arc<C>,
    now_provider: NowProvider,
    authorization_code: Option<String>,
}

impl<C> AuthFlow<C>
where
    C: EcobeeHttpClient,
{
    pub fn new(api_key: impl Into<String>, client: Arc<C>) -> Self {
        Self {
            api_key: api_key.into(),
            client,
            now_provider: Arc::new(Utc::now),
            authorization_code: None,
        }
    }

    pub fn with_now_provider(mut self, now_provider: NowProvider) -> Self {
        self.now_provider = now_provider;
        self
    }

    pub fn now(&self) -> DateTime<Utc> {
        (self.now_provider)()
    }

    pub fn client(&self) -> &Arc<C> {
        &self.client
    }

    pub fn has_pending_authorization(&self) -> bool {
        self.authorization_code.is_some()
    }

    /// Step 1. Returns the PIN to show the user, or `None` when the vendor call failed.
    pub async fn request_pin(&mut self) -> Option<String> {
        self.authorization_code = None;
        match self.client.request_pin(PinRequest::new(self.api_key.clone())).await {
            Ok(grant) => {
                debug!(
                    pin_expires_in_minutes = ?grant.expires_in_minutes,
                    "received ecobee PIN"
                );
                self.authorization_code = Some(grant.authorization_code);
                Some(grant.ecobee_pin)
            }
            Err(error) => {
                debug!(error = %error, "PIN request failed");
                None
            }
        }
    }

    /// Step 3. Consumes the pending authorization code; a second call fails with
    /// `MissingAuthorizationCode`.
    pub async fn exchange_code(&mut self, state: &mut AuthState) -> Result<TokenGrant, InfraError> {
        let Some(authorization_code) = self.authorization_code.take() else {
            state.authenticated = false;
            return Err(InfraError::MissingAuthorizationCode);
        };

        let result = self
            .client
            .exchange_pin_code(PinExchangeRequest {
                client_id: self.api_key.clone(),
                authorization_code,
            })
            .await;

        match result {
            Ok(grant) => {
                let now = self.now();
                state.credentials.adopt(&grant, now);
                state.authenticated = true;
                state.reauthentication_required = false;
                state.next_refresh_deadline = state.credentials.expiry_deadline;
                info!(
                    refresh_token = %redact(&grant.refresh_token),
                    "authorization code exchanged for tokens"
                );
                Ok(grant)
            }
            Err(error) => {
                state.authenticated = false;
                debug!(error = %error, "authorization code exchange failed");
                Err(error)
            }
        }
    }

    pub async fn refresh(&self, state: &mut AuthState) -> RefreshOutcome {
        let Some(refresh_token) = state
            .credentials
            .refresh_token
            .clone()
            .filter(|_| state.credentials.has_refresh_token())
        else {
            state.authenticated = false;
            state.next_refresh_deadline = None;
            return RefreshOutcome::NoRefreshToken;
        };

        let result = self
            .client
            .refresh_tokens(RefreshRequest {
                client_id: self.api_key.clone(),
                refresh_token,
            })
            .await;
        let now = self.now();

        match result {
            Ok(grant) => {
                let changed = state.credentials.adopt(&grant, now);
                state.authenticated = true;
                state.reauthentication_required = false;
                state.next_refresh_deadline = state.credentials.expiry_deadline;
                if changed {
                    debug!(
                        refresh_token = %redact(&grant.refresh_token),
                        "tokens rotated"
                    );
                    RefreshOutcome::Rotated
                } else {
                    debug!("refresh returned the current tokens");
                    RefreshOutcome::Unchanged
                }
            }
            Err(error) if error.is_invalid_grant() => {
                state.authenticated = false;
                state.reauthentication_required = true;
                state.next_refresh_deadline = None;
                error!(error = %error, "refresh token rejected; re-authorization required");
                RefreshOutcome::Rejected
            }
            Err(error) => {
                let retry_at = now + Duration::seconds(REFRESH_RETRY_SECONDS);
                state.next_refresh_deadline = Some(retry_at);
                debug!(error = %error, retry_at = %retry_at, "token refresh failed; will retry");
                RefreshOutcome::Deferred { retry_at }
            }
        }
    }
}
