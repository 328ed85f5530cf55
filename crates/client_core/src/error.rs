use shared::{domain::MessageId, error::ErrorCode};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum AuthError {
    #[error("Invalid username or password.")]
    InvalidCredentials,
    #[error("Log in failed. Please try again.")]
    Failed,
}

/// Failure of a single request/response exchange with the authority.
#[derive(Debug, Error)]
#[error("{message}")]
pub struct GatewayError {
    pub status: Option<u16>,
    pub message: String,
}

impl GatewayError {
    pub fn new(status: Option<u16>, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    pub fn transport(message: impl Into<String>) -> Self {
        Self::new(None, message)
    }

    /// `None` when the authority never answered.
    pub fn code(&self) -> Option<ErrorCode> {
        self.status.map(ErrorCode::from_status)
    }
}

impl From<reqwest::Error> for GatewayError {
    fn from(err: reqwest::Error) -> Self {
        Self::new(err.status().map(|status| status.as_u16()), err.to_string())
    }
}

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("{0}")]
    Validation(String),
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: i64 },
    #[error("{message}")]
    Sync {
        message: String,
        retryable: bool,
        #[source]
        source: Option<GatewayError>,
    },
    #[error(transparent)]
    Auth(#[from] AuthError),
}

impl ClientError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn message_not_found(message_id: MessageId) -> Self {
        Self::NotFound {
            entity: "message",
            id: message_id.0,
        }
    }

    pub fn sync(message: impl Into<String>, source: GatewayError) -> Self {
        Self::Sync {
            message: message.into(),
            retryable: true,
            source: Some(source),
        }
    }

    /// A sync failure that re-sending the same request will not fix.
    pub fn unretryable(message: impl Into<String>) -> Self {
        Self::Sync {
            message: message.into(),
            retryable: false,
            source: None,
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Sync { retryable: true, .. })
    }

    /// Text shown to the user; never includes transport internals.
    pub fn user_message(&self) -> String {
        match self {
            Self::Validation(message) => message.clone(),
            Self::NotFound { entity, .. } => {
                format!("The {entity} could not be found. Please try again.")
            }
            Self::Sync { message, .. } => message.clone(),
            Self::Auth(err) => err.to_string(),
        }
    }
}

pub type ClientResult<T> = std::result::Result<T, ClientError>;
