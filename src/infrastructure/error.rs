use thiserror::Error;

/// Vendor status code returned when the bearer token has expired.
pub const STATUS_TOKEN_EXPIRED: i64 = 14;

const INVALID_GRANT: &str = "invalid_grant";

#[derive(Debug, Error)]
pub enum InfraError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("Invalid config: {0}")]
    InvalidConfig(String),
    #[error("Credential store error: {0}")]
    Credential(String),
    #[error("Transport error: {0}")]
    Transport(String),
    #[error("Authorization error (http {status}): {error}; {description}")]
    Authorization {
        status: u16,
        error: String,
        description: String,
    },
    #[error("Ecobee API status {code}: {message}")]
    ApiStatus { code: i64, message: String },
    #[error("HTTP {status}: {body}")]
    HttpStatus { status: u16, body: String },
    #[error("Invalid response payload: {0}")]
    InvalidPayload(String),
    #[error("No pending authorization code; request a PIN first")]
    MissingAuthorizationCode,
    #[error("Account {0} is not authenticated")]
    NotAuthenticated(String),
    #[error("Unknown account: {0}")]
    UnknownAccount(String),
}

impl InfraError {
    /// The refresh token itself was rejected; only a new PIN flow recovers.
    pub fn is_invalid_grant(&self) -> bool {
        matches!(self, Self::Authorization { error, .. } if error == INVALID_GRANT)
    }

    pub fn is_token_expired(&self) -> bool {
        matches!(self, Self::ApiStatus { code, .. } if *code == STATUS_TOKEN_EXPIRED)
    }

    /// Vendor-side message suitable for surfacing to the caller that issued the request.
    /// Transport failures and 5xx responses without a vendor status envelope.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Transport(_) => true,
            Self::HttpStatus { status, .. } => *status >= 500,
            _ => false,
        }
    }

    pub fn vendor_message(&self) -> Option<String> {
        match self {
            Self::Authorization {
                error, description, ..
            } => Some(format!("{error}: {description}")),
            Self::ApiStatus { code, message } => Some(format!("{code}: {message}")),
            Self::HttpStatus { status, body } => Some(format!("http {status}: {body}")),
            _ => None,
        }
    }
}
