use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Fraction of the server-reported token lifetime after which a refresh is due.
pub const TOKEN_LIFETIME_SAFETY_FACTOR: f64 = 0.8;

/// Delay before retrying a refresh that failed for a retryable reason.
pub const REFRESH_RETRY_SECONDS: i64 = 300;

/// Lifetime assumed when the token endpoint omits `expires_in`.
pub const DEFAULT_TOKEN_LIFETIME_SECONDS: i64 = 3600;

/// Upper bound on a server-reported token lifetime (one year).
pub const MAX_TOKEN_LIFETIME_SECONDS: i64 = 365 * 24 * 60 * 60;

/// Token pair minted by the vendor token endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenGrant {
    pub access_token: String,
    pub refresh_token: String,
    pub expires_in: i64,
}

/// Result of PIN authorization step 1.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PinGrant {
    pub ecobee_pin: String,
    pub authorization_code: String,
    pub expires_in_minutes: Option<i64>,
}

/// Credentials as persisted by the host's configuration storage.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StoredCredentials {
    pub refresh_token: String,
    pub access_token: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl StoredCredentials {
    pub fn validate(&self) -> Result<(), String> {
        if self.refresh_token.trim().is_empty() {
            return Err("stored_credentials.refresh_token must not be empty".to_string());
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Credentials {
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
    pub expiry_deadline: Option<DateTime<Utc>>,
}

impl Credentials {
    pub fn has_access_token(&self) -> bool {
        self.access_token
            .as_deref()
            .is_some_and(|token| !token.trim().is_empty())
    }

    pub fn has_refresh_token(&self) -> bool {
        self.refresh_token
            .as_deref()
            .is_some_and(|token| !token.trim().is_empty())
    }

    /// Adopts a freshly minted grant. Returns `true` when either token differs from before.
    pub fn adopt(&mut self, grant: &TokenGrant, now: DateTime<Utc>) -> bool {
        let changed = self.access_token.as_deref() != Some(grant.access_token.as_str())
            || self.refresh_token.as_deref() != Some(grant.refresh_token.as_str());
        self.access_token = Some(grant.access_token.clone());
        self.refresh_token = Some(grant.refresh_token.clone());
        self.expiry_deadline = Some(expiry_deadline(now, grant.expires_in));
        changed
    }

    pub fn to_stored(&self) -> Option<StoredCredentials> {
        let refresh_token = self
            .refresh_token
            .as_deref()
            .map(str::trim)
            .filter(|value| !value.is_empty())?;
        Some(StoredCredentials {
            refresh_token: refresh_token.to_string(),
            access_token: self.access_token.clone(),
            expires_at: self.expiry_deadline,
        })
    }
}

impl From<StoredCredentials> for Credentials {
    fn from(stored: StoredCredentials) -> Self {
        Self {
            access_token: stored.access_token,
            refresh_token: Some(stored.refresh_token),
            expiry_deadline: stored.expires_at,
        }
    }
}

/// `now + 0.8 * expires_in`. The lifetime is capped at `MAX_TOKEN_LIFETIME_SECONDS` and the
/// deadline is never sooner than `REFRESH_RETRY_SECONDS` away.
pub fn expiry_deadline(now: DateTime<Utc>, expires_in: i64) -> DateTime<Utc> {
    let lifetime = expires_in.clamp(0, MAX_TOKEN_LIFETIME_SECONDS);
    let millis = (lifetime as f64 * TOKEN_LIFETIME_SAFETY_FACTOR * 1000.0).round() as i64;
    let offset = Duration::milliseconds(millis.max(REFRESH_RETRY_SECONDS * 1000));
    now.checked_add_signed(offset).unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// Authentication state owned by one account session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthState {
    pub credentials: Credentials,
    pub authenticated: bool,
    /// `None` means no refresh is scheduled (never authorized, or re-authorization required).
    pub next_refresh_deadline: Option<DateTime<Utc>>,
    pub reauthentication_required: bool,
}

impl AuthState {
    pub fn unauthorized() -> Self {
        Self {
            credentials: Credentials::default(),
            authenticated: false,
            next_refresh_deadline: None,
            reauthentication_required: false,
        }
    }

    /// Restores persisted credentials. A still-valid access token is used as is; otherwise a
    /// refresh is scheduled immediately.
    pub fn from_stored(stored: StoredCredentials, now: DateTime<Utc>) -> Self {
        let credentials = Credentials::from(stored);
        let live_until = credentials
            .expiry_deadline
            .filter(|deadline| *deadline > now && credentials.has_access_token());

        match live_until {
            Some(deadline) => Self {
                credentials,
                authenticated: true,
                next_refresh_deadline: Some(deadline),
                reauthentication_required: false,
            },
            None => Self {
                credentials,
                authenticated: false,
                next_refresh_deadline: Some(now),
                reauthentication_required: false,
            },
        }
    }

    pub fn refresh_due(&self, now: DateTime<Utc>) -> bool {
        !self.reauthentication_required
            && self
                .next_refresh_deadline
                .is_some_and(|deadline| now >= deadline)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AccountStatus {
    Authenticated,
    ReauthenticationRequired,
    NotAuthorized,
    PersistencePending,
    /// Stored refresh token present, access token not yet renewed.
    RefreshPending,
}

impl AccountStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Authenticated => "Authenticated",
            Self::ReauthenticationRequired => "Re-authentication required",
            Self::NotAuthorized => "Not authorized",
            Self::PersistencePending => "Token persistence pending",
            Self::RefreshPending => "Refresh pending",
        }
    }
}

impl fmt::Display for AccountStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A linked `ecobee3_remote_sensor`, keyed account-wide by its sensor code.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RemoteSensorRecord {
    pub code: String,
    pub name: String,
    pub thermostat: String,
    pub capabilities: BTreeMap<String, String>,
}

impl RemoteSensorRecord {
    pub fn capability(&self, kind: &str) -> Option<&str> {
        self.capabilities.get(kind).map(String::as_str)
    }
}

/// Flattened vendor data for one thermostat. Temperatures are tenths of °F.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ThermostatRecord {
    pub identifier: String,
    pub name: String,
    pub brand: Option<String>,
    pub features: Option<String>,
    pub model_number: Option<String>,
    pub equipment_status: String,
    pub current_climate: Option<String>,
    pub hvac_mode: Option<String>,
    pub fan_min_on_time: Option<i64>,
    pub desired_cool: Option<i64>,
    pub desired_heat: Option<i64>,
    pub actual_temperature: Option<i64>,
    pub actual_humidity: Option<i64>,
    pub desired_fan_mode: Option<String>,
    pub latest_event_type: Option<String>,
    pub climates: BTreeMap<String, String>,
    pub internal: BTreeMap<String, String>,
    pub remotes: BTreeMap<String, RemoteSensorRecord>,
}

/// Last known good copy of all remote device data for one account.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct RemoteSnapshot {
    pub thermostats: BTreeMap<String, ThermostatRecord>,
    pub sensors: BTreeMap<String, RemoteSensorRecord>,
}

impl RemoteSnapshot {
    pub fn is_empty(&self) -> bool {
        self.thermostats.is_empty() && self.sensors.is_empty()
    }

    pub fn thermostat(&self, identifier: &str) -> Option<&ThermostatRecord> {
        self.thermostats.get(identifier)
    }

    pub fn sensor(&self, code: &str) -> Option<&RemoteSensorRecord> {
        self.sensors.get(code)
    }
}

/// Shortens a secret for log output.
pub fn redact(secret: &str) -> String {
    let prefix: String = secret.chars().take(4).collect();
    if prefix.is_empty() {
        "<empty>".to_string()
    } else {
        format!("{prefix}…")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn fixed_time() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2026-02-16T00:00:00Z")
            .expect("valid datetime")
            .with_timezone(&Utc)
    }

    proptest! {
        #[test]
        fn expiry_deadline_is_eighty_percent_of_lifetime(expires_in in 375i64..1_000_000i64) {
            let now = fixed_time();
            let deadline = expiry_deadline(now, expires_in);
            let expected_ms = (expires_in as f64 * 0.8 * 1000.0).round() as i64;
            prop_assert_eq!((deadline - now).num_milliseconds(), expected_ms);
        }

        #[test]
        fn expiry_deadline_never_overflows(expires_in in any::<i64>()) {
            let now = fixed_time();
            let seconds = (expiry_deadline(now, expires_in) - now).num_seconds();
            prop_assert!(seconds >= REFRESH_RETRY_SECONDS);
            prop_assert!(seconds <= MAX_TOKEN_LIFETIME_SECONDS);
        }
    }

    #[test]
    fn expiry_deadline_for_one_hour_is_2880_seconds() {
        let now = fixed_time();
        assert_eq!((expiry_deadline(now, 3600) - now).num_seconds(), 2880);
    }

    #[test]
    fn short_or_missing_lifetime_waits_at_least_the_retry_delay() {
        let now = fixed_time();
        let floor = now + Duration::seconds(REFRESH_RETRY_SECONDS);
        assert_eq!(expiry_deadline(now, 0), floor);
        assert_eq!(expiry_deadline(now, -5), floor);
        assert_eq!(expiry_deadline(now, 60), floor);
    }

    #[test]
    fn huge_lifetime_is_capped_at_one_year() {
        let now = fixed_time();
        let capped = now + Duration::milliseconds(
            (MAX_TOKEN_LIFETIME_SECONDS as f64 * TOKEN_LIFETIME_SAFETY_FACTOR * 1000.0).round() as i64,
        );
        assert_eq!(expiry_deadline(now, 100_000_000_000_000), capped);
        assert_eq!(expiry_deadline(now, i64::MAX), capped);
    }

    #[test]
    fn adopt_reports_whether_tokens_rotated() {
        let now = fixed_time();
        let mut credentials = Credentials::default();
        let grant = TokenGrant {
            access_token: "A1".to_string(),
            refresh_token: "R1".to_string(),
            expires_in: 3600,
        };
        assert!(credentials.adopt(&grant, now));
        assert!(!credentials.adopt(&grant, now));
        assert!(credentials.adopt(
            &TokenGrant {
                access_token: "A2".to_string(),
                ..grant
            },
            now
        ));
    }

    #[test]
    fn stored_credentials_with_live_access_token_are_authenticated() {
        let now = fixed_time();
        let state = AuthState::from_stored(
            StoredCredentials {
                refresh_token: "R1".to_string(),
                access_token: Some("A1".to_string()),
                expires_at: Some(now + Duration::minutes(10)),
            },
            now,
        );
        assert!(state.authenticated);
        assert_eq!(state.next_refresh_deadline, Some(now + Duration::minutes(10)));
        assert!(!state.refresh_due(now));
    }

    #[test]
    fn stored_credentials_without_live_token_schedule_immediate_refresh() {
        let now = fixed_time();
        let state = AuthState::from_stored(
            StoredCredentials {
                refresh_token: "R1".to_string(),
                access_token: Some("A1".to_string()),
                expires_at: Some(now - Duration::minutes(1)),
            },
            now,
        );
        assert!(!state.authenticated);
        assert!(state.refresh_due(now));
    }

    #[test]
    fn reauthentication_required_suppresses_refresh() {
        let now = fixed_time();
        let mut state = AuthState::unauthorized();
        state.next_refresh_deadline = Some(now);
        state.reauthentication_required = true;
        assert!(!state.refresh_due(now));
    }

    #[test]
    fn redact_keeps_prefix_only() {
        assert_eq!(redact("abcdefgh"), "abcd…");
        assert_eq!(redact(""), "<empty>");
    }
}
