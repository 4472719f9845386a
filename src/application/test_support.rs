use crate::application::auth_flow::NowProvider;
use crate::domain::models::{PinGrant, TokenGrant};
use crate::infrastructure::ecobee_client::{
    EcobeeHttpClient, PinExchangeRequest, PinRequest, RefreshRequest, Selection,
};
use crate::infrastructure::error::InfraError;
use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use serde_json::{Value, json};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

#[derive(Debug, Clone)]
pub enum FakeFailure {
    Transport,
    InvalidGrant,
    ApiStatus(i64, &'static str),
    Http(u16),
}

impl FakeFailure {
    fn to_error(&self) -> InfraError {
        match self {
            Self::Transport => InfraError::Transport("connection reset".to_string()),
            Self::InvalidGrant => InfraError::Authorization {
                status: 400,
                error: "invalid_grant".to_string(),
                description: "The refresh token is invalid".to_string(),
            },
            Self::ApiStatus(code, message) => InfraError::ApiStatus {
                code: *code,
                message: message.to_string(),
            },
            Self::Http(status) => InfraError::HttpStatus {
                status: *status,
                body: "upstream failure".to_string(),
            },
        }
    }
}

pub fn grant(access_token: &str, refresh_token: &str, expires_in: i64) -> TokenGrant {
    TokenGrant {
        access_token: access_token.to_string(),
        refresh_token: refresh_token.to_string(),
        expires_in,
    }
}

pub fn thermostat_json(identifier: &str, actual_temperature: i64) -> Value {
    json!({
        "identifier": identifier,
        "name": format!("Thermostat {identifier}"),
        "modelNumber": "athenaSmart",
        "equipmentStatus": "fan",
        "program": { "currentClimateRef": "home", "climates": [{ "climateRef": "home", "name": "Home" }] },
        "settings": { "hvacMode": "heat", "fanMinOnTime": 0 },
        "runtime": {
            "desiredCool": 760,
            "desiredHeat": 680,
            "actualTemperature": actual_temperature,
            "actualHumidity": 40,
            "desiredFanMode": "auto"
        },
        "remoteSensors": [{
            "code": "RS01",
            "name": "Bedroom",
            "type": "ecobee3_remote_sensor",
            "capability": [
                { "type": "temperature", "value": "701" },
                { "type": "occupancy", "value": "true" }
            ]
        }]
    })
}

/// Scripted vendor client. Queued responses are consumed first; an empty queue falls back to
/// a transport failure, except fetches (current thermostat list) and posts (success).
#[derive(Debug, Default)]
pub struct FakeEcobeeClient {
    pin_responses: Mutex<VecDeque<Result<PinGrant, FakeFailure>>>,
    exchange_responses: Mutex<VecDeque<Result<TokenGrant, FakeFailure>>>,
    refresh_responses: Mutex<VecDeque<Result<TokenGrant, FakeFailure>>>,
    fetch_responses: Mutex<VecDeque<Result<Vec<Value>, FakeFailure>>>,
    post_responses: Mutex<VecDeque<Result<(), FakeFailure>>>,
    thermostats: Mutex<Vec<Value>>,
    calls: Mutex<Vec<String>>,
    posted: Mutex<Vec<Value>>,
    pub pin_calls: AtomicUsize,
    pub exchange_calls: AtomicUsize,
    pub refresh_calls: AtomicUsize,
    pub fetch_calls: AtomicUsize,
    pub post_calls: AtomicUsize,
}

impl FakeEcobeeClient {
    pub fn push_pin(&self, response: Result<PinGrant, FakeFailure>) {
        self.pin_responses.lock().expect("pin mutex poisoned").push_back(response);
    }

    pub fn push_exchange(&self, response: Result<TokenGrant, FakeFailure>) {
        self.exchange_responses
            .lock()
            .expect("exchange mutex poisoned")
            .push_back(response);
    }

    pub fn push_refresh(&self, response: Result<TokenGrant, FakeFailure>) {
        self.refresh_responses
            .lock()
            .expect("refresh mutex poisoned")
            .push_back(response);
    }

    pub fn push_fetch(&self, response: Result<Vec<Value>, FakeFailure>) {
        self.fetch_responses
            .lock()
            .expect("fetch mutex poisoned")
            .push_back(response);
    }

    pub fn push_post(&self, response: Result<(), FakeFailure>) {
        self.post_responses
            .lock()
            .expect("post mutex poisoned")
            .push_back(response);
    }

    pub fn set_thermostats(&self, thermostats: Vec<Value>) {
        *self.thermostats.lock().expect("thermostats mutex poisoned") = thermostats;
    }

    /// Ordered log such as `refresh:R1`, `fetch:A1`, `post:A1`.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().expect("calls mutex poisoned").clone()
    }

    pub fn posted(&self) -> Vec<Value> {
        self.posted.lock().expect("posted mutex poisoned").clone()
    }

    fn record(&self, call: String) {
        self.calls.lock().expect("calls mutex poisoned").push(call);
    }
}

fn next_or_transport<T>(queue: &Mutex<VecDeque<Result<T, FakeFailure>>>) -> Result<T, InfraError> {
    match queue.lock().expect("queue mutex poisoned").pop_front() {
        Some(Ok(value)) => Ok(value),
        Some(Err(failure)) => Err(failure.to_error()),
        None => Err(FakeFailure::Transport.to_error()),
    }
}

#[async_trait]
impl EcobeeHttpClient for FakeEcobeeClient {
    async fn request_pin(&self, request: PinRequest) -> Result<PinGrant, InfraError> {
        self.pin_calls.fetch_add(1, Ordering::SeqCst);
        self.record(format!("pin:{}", request.client_id));
        next_or_transport(&self.pin_responses)
    }

    async fn exchange_pin_code(&self, request: PinExchangeRequest) -> Result<TokenGrant, InfraError> {
        self.exchange_calls.fetch_add(1, Ordering::SeqCst);
        self.record(format!("exchange:{}", request.authorization_code));
        next_or_transport(&self.exchange_responses)
    }

    async fn refresh_tokens(&self, request: RefreshRequest) -> Result<TokenGrant, InfraError> {
        self.refresh_calls.fetch_add(1, Ordering::SeqCst);
        self.record(format!("refresh:{}", request.refresh_token));
        next_or_transport(&self.refresh_responses)
    }

    async fn fetch_thermostats(
        &self,
        access_token: &str,
        _selection: &Selection,
    ) -> Result<Vec<Value>, InfraError> {
        self.fetch_calls.fetch_add(1, Ordering::SeqCst);
        self.record(format!("fetch:{access_token}"));
        match self.fetch_responses.lock().expect("fetch mutex poisoned").pop_front() {
            Some(Ok(value)) => Ok(value),
            Some(Err(failure)) => Err(failure.to_error()),
            None => Ok(self.thermostats.lock().expect("thermostats mutex poisoned").clone()),
        }
    }

    async fn post_thermostat(&self, access_token: &str, body: &Value) -> Result<(), InfraError> {
        self.post_calls.fetch_add(1, Ordering::SeqCst);
        self.record(format!("post:{access_token}"));
        self.posted.lock().expect("posted mutex poisoned").push(body.clone());
        match self.post_responses.lock().expect("post mutex poisoned").pop_front() {
            Some(Ok(())) | None => Ok(()),
            Some(Err(failure)) => Err(failure.to_error()),
        }
    }
}

/// Manually advanced clock shared with the code under test.
#[derive(Debug, Clone)]
pub struct FakeClock {
    now: Arc<Mutex<DateTime<Utc>>>,
}

impl FakeClock {
    pub fn starting_at_epoch() -> Self {
        let start = Utc
            .with_ymd_and_hms(2026, 1, 1, 0, 0, 0)
            .single()
            .expect("valid start time");
        Self {
            now: Arc::new(Mutex::new(start)),
        }
    }

    pub fn now(&self) -> DateTime<Utc> {
        *self.now.lock().expect("clock mutex poisoned")
    }

    /// Seconds since the clock was created at its start time.
    pub fn set_offset(&self, seconds: i64) {
        let start = Self::starting_at_epoch().now();
        *self.now.lock().expect("clock mutex poisoned") = start + Duration::seconds(seconds);
    }

    pub fn advance(&self, seconds: i64) {
        let mut guard = self.now.lock().expect("clock mutex poisoned");
        *guard += Duration::seconds(seconds);
    }

    pub fn provider(&self) -> NowProvider {
        let now = Arc::clone(&self.now);
        Arc::new(move || *now.lock().expect("clock mutex poisoned"))
    }
}
