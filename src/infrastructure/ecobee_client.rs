use crate::domain::models::{DEFAULT_TOKEN_LIFETIME_SECONDS, PinGrant, TokenGrant};
use crate::infrastructure::error::InfraError;
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use url::Url;

pub const DEFAULT_API_BASE_URL: &str = "https://api.ecobee.com";
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(20);
const PIN_SCOPE: &str = "smartWrite";

#[derive(Debug, Clone)]
pub struct PinRequest {
    pub client_id: String,
    pub scope: String,
}

impl PinRequest {
    pub fn new(client_id: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            scope: PIN_SCOPE.to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct PinExchangeRequest {
    pub client_id: String,
    pub authorization_code: String,
}

#[derive(Debug, Clone)]
pub struct RefreshRequest {
    pub client_id: String,
    pub refresh_token: String,
}

/// Sub-resources requested from the thermostat endpoint.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Selection {
    pub selection_type: String,
    pub selection_match: String,
    pub include_runtime: bool,
    pub include_sensors: bool,
    pub include_events: bool,
    pub include_program: bool,
    pub include_equipment_status: bool,
    pub include_settings: bool,
}

impl Selection {
    /// Every registered thermostat with all sub-resources the snapshot needs.
    pub fn registered_full() -> Self {
        Self {
            selection_type: "registered".to_string(),
            selection_match: String::new(),
            include_runtime: true,
            include_sensors: true,
            include_events: true,
            include_program: true,
            include_equipment_status: true,
            include_settings: true,
        }
    }

    pub fn to_query_json(&self) -> Result<String, InfraError> {
        Ok(serde_json::to_string(&serde_json::json!({ "selection": self }))?)
    }
}

#[async_trait]
pub trait EcobeeHttpClient: Send + Sync {
    async fn request_pin(&self, request: PinRequest) -> Result<PinGrant, InfraError>;

    async fn exchange_pin_code(&self, request: PinExchangeRequest) -> Result<TokenGrant, InfraError>;

    async fn refresh_tokens(&self, request: RefreshRequest) -> Result<TokenGrant, InfraError>;

    /// Returns the raw `thermostatList` entries.
    async fn fetch_thermostats(
        &self,
        access_token: &str,
        selection: &Selection,
    ) -> Result<Vec<Value>, InfraError>;

    async fn post_thermostat(&self, access_token: &str, body: &Value) -> Result<(), InfraError>;
}

#[derive(Debug, Clone)]
pub struct ReqwestEcobeeClient {
    client: Client,
    base_url: Url,
}

#[derive(Debug, Deserialize)]
struct PinResponsePayload {
    #[serde(rename = "ecobeePin")]
    ecobee_pin: Option<String>,
    code: Option<String>,
    expires_in: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct TokenResponsePayload {
    access_token: Option<String>,
    refresh_token: Option<String>,
    expires_in: Option<i64>,
}

#[derive(Debug, Default, Deserialize)]
struct OAuthErrorPayload {
    error: Option<String>,
    error_description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StatusPayload {
    code: i64,
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ThermostatResponseEnvelope {
    #[serde(rename = "thermostatList", default)]
    thermostat_list: Vec<Value>,
    status: Option<StatusPayload>,
}

impl ReqwestEcobeeClient {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, InfraError> {
        let base_url = Url::parse(base_url)
            .map_err(|error| InfraError::InvalidConfig(format!("invalid api base url '{base_url}': {error}")))?;
        if base_url.cannot_be_a_base() {
            return Err(InfraError::InvalidConfig(format!(
                "api base url '{base_url}' cannot be a base"
            )));
        }
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|error| InfraError::Transport(format!("failed building http client: {error}")))?;
        Ok(Self { client, base_url })
    }

    fn endpoint(&self, path: &str) -> Result<Url, InfraError> {
        let mut url = self.base_url.clone();
        {
            let mut segments = url
                .path_segments_mut()
                .map_err(|_| InfraError::InvalidConfig("api base url cannot be a base".to_string()))?;
            segments.pop_if_empty();
            segments.extend(path.split('/'));
        }
        Ok(url)
    }

    fn ensure_non_empty(value: &str, field: &str) -> Result<(), InfraError> {
        if value.trim().is_empty() {
            return Err(InfraError::InvalidConfig(format!("{field} must not be empty")));
        }
        Ok(())
    }

    async fn send(request: RequestBuilder, action: &str) -> Result<(StatusCode, String), InfraError> {
        let response = request
            .send()
            .await
            .map_err(|error| InfraError::Transport(format!("network error while {action}: {error}")))?;
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|error| InfraError::Transport(format!("failed reading {action} response: {error}")))?;
        Ok((status, body))
    }

    /// Error mapping for `/authorize` and `/token`.
    fn oauth_error(status: StatusCode, body: &str) -> InfraError {
        let parsed = serde_json::from_str::<OAuthErrorPayload>(body).unwrap_or_default();
        match parsed.error {
            Some(error) => InfraError::Authorization {
                status: status.as_u16(),
                error,
                description: parsed.error_description.unwrap_or_default(),
            },
            None => InfraError::HttpStatus {
                status: status.as_u16(),
                body: body.to_string(),
            },
        }
    }

    /// Error mapping for `/1/thermostat`; the status envelope wins over the HTTP status.
    fn thermostat_error(status: StatusCode, body: &str) -> InfraError {
        if let Ok(ThermostatResponseEnvelope {
            status: Some(envelope),
            ..
        }) = serde_json::from_str::<ThermostatResponseEnvelope>(body)
        {
            if envelope.code != 0 {
                return InfraError::ApiStatus {
                    code: envelope.code,
                    message: envelope.message.unwrap_or_default(),
                };
            }
        }
        Self::oauth_error(status, body)
    }

    async fn token_request(
        &self,
        params: &[(&str, &str)],
        action: &str,
    ) -> Result<TokenGrant, InfraError> {
        let endpoint = self.endpoint("token")?;
        let (status, body) = Self::send(self.client.post(endpoint).query(params), action).await?;
        if !status.is_success() {
            return Err(Self::oauth_error(status, &body));
        }

        let parsed: TokenResponsePayload = serde_json::from_str(&body)
            .map_err(|error| InfraError::InvalidPayload(format!("invalid token payload: {error}")))?;
        match (parsed.access_token, parsed.refresh_token) {
            (Some(access_token), Some(refresh_token))
                if !access_token.trim().is_empty() && !refresh_token.trim().is_empty() =>
            {
                Ok(TokenGrant {
                    access_token,
                    refresh_token,
                    expires_in: parsed.expires_in.unwrap_or(DEFAULT_TOKEN_LIFETIME_SECONDS),
                })
            }
            _ => match Self::oauth_error(status, &body) {
                error @ InfraError::Authorization { .. } => Err(error),
                _ => Err(InfraError::InvalidPayload(
                    "token response did not include access_token and refresh_token".to_string(),
                )),
            },
        }
    }
}

#[async_trait]
impl EcobeeHttpClient for ReqwestEcobeeClient {
    async fn request_pin(&self, request: PinRequest) -> Result<PinGrant, InfraError> {
        Self::ensure_non_empty(&request.client_id, "api key")?;

        let endpoint = self.endpoint("authorize")?;
        let (status, body) = Self::send(
            self.client.get(endpoint).query(&[
                ("response_type", "ecobeePin"),
                ("client_id", request.client_id.as_str()),
                ("scope", request.scope.as_str()),
            ]),
            "requesting pin",
        )
        .await?;
        if !status.is_success() {
            return Err(Self::oauth_error(status, &body));
        }

        let parsed: PinResponsePayload = serde_json::from_str(&body)
            .map_err(|error| InfraError::InvalidPayload(format!("invalid pin payload: {error}")))?;
        let ecobee_pin = parsed
            .ecobee_pin
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
            .ok_or_else(|| InfraError::InvalidPayload("pin response did not include ecobeePin".to_string()))?;
        let authorization_code = parsed
            .code
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
            .ok_or_else(|| InfraError::InvalidPayload("pin response did not include code".to_string()))?;

        Ok(PinGrant {
            ecobee_pin,
            authorization_code,
            expires_in_minutes: parsed.expires_in,
        })
    }

    async fn exchange_pin_code(&self, request: PinExchangeRequest) -> Result<TokenGrant, InfraError> {
        Self::ensure_non_empty(&request.authorization_code, "authorization code")?;
        self.token_request(
            &[
                ("grant_type", "ecobeePin"),
                ("code", request.authorization_code.as_str()),
                ("client_id", request.client_id.as_str()),
            ],
            "exchanging authorization code",
        )
        .await
    }

    async fn refresh_tokens(&self, request: RefreshRequest) -> Result<TokenGrant, InfraError> {
        Self::ensure_non_empty(&request.refresh_token, "refresh token")?;
        self.token_request(
            &[
                ("grant_type", "refresh_token"),
                ("refresh_token", request.refresh_token.as_str()),
                ("client_id", request.client_id.as_str()),
            ],
            "refreshing tokens",
        )
        .await
    }

    async fn fetch_thermostats(
        &self,
        access_token: &str,
        selection: &Selection,
    ) -> Result<Vec<Value>, InfraError> {
        Self::ensure_non_empty(access_token, "access token")?;

        let endpoint = self.endpoint("1/thermostat")?;
        let selection_json = selection.to_query_json()?;
        let (status, body) = Self::send(
            self.client
                .get(endpoint)
                .bearer_auth(access_token)
                .query(&[("json", selection_json.as_str())]),
            "fetching thermostats",
        )
        .await?;
        if !status.is_success() {
            return Err(Self::thermostat_error(status, &body));
        }

        let parsed: ThermostatResponseEnvelope = serde_json::from_str(&body)
            .map_err(|error| InfraError::InvalidPayload(format!("invalid thermostat payload: {error}")))?;
        match parsed.status {
            Some(status) if status.code == 0 => Ok(parsed.thermostat_list),
            Some(status) => Err(InfraError::ApiStatus {
                code: status.code,
                message: status.message.unwrap_or_default(),
            }),
            None => Err(InfraError::InvalidPayload(
                "thermostat response did not include status".to_string(),
            )),
        }
    }

    async fn post_thermostat(&self, access_token: &str, body: &Value) -> Result<(), InfraError> {
        Self::ensure_non_empty(access_token, "access token")?;

        let endpoint = self.endpoint("1/thermostat")?;
        let (status, response_body) = Self::send(
            self.client
                .post(endpoint)
                .bearer_auth(access_token)
                .query(&[("format", "json")])
                .json(body),
            "posting thermostat command",
        )
        .await?;
        if !status.is_success() {
            return Err(Self::thermostat_error(status, &response_body));
        }

        let parsed: ThermostatResponseEnvelope = serde_json::from_str(&response_body)
            .map_err(|error| InfraError::InvalidPayload(format!("invalid command response: {error}")))?;
        match parsed.status {
            Some(status) if status.code == 0 => Ok(()),
            Some(status) => Err(InfraError::ApiStatus {
                code: status.code,
                message: status.message.unwrap_or_default(),
            }),
            None => Err(InfraError::InvalidPayload(
                "command response did not include status".to_string(),
            )),
        }
    }
}
