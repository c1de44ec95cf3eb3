use crate::entitlements::gate::{GateEvent, GateState};
use crate::entitlements::UsageCounter;
use thiserror::Error;

/// Failures raised around gated actions
#[derive(Error, Debug)]
pub enum GateError {
    #[error("Please sign in to continue")]
    NotAuthenticated,

    #[error("Usage limits are not available yet")]
    SnapshotUnavailable(#[source] BackendError),

    #[error("Unable to verify account limits, please refresh")]
    MalformedDecision,

    #[error("Failed to record {counter} usage: {failure}")]
    CounterIncrement {
        counter: UsageCounter,
        failure: CounterFailure,
    },

    #[error("Cannot handle {event:?} while in {from:?}")]
    InvalidTransition { from: GateState, event: GateEvent },
}

/// How a counter increment went wrong
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CounterFailure {
    /// The remote function is missing or misconfigured; needs an operator
    #[error("tracking function {function} is missing or misconfigured")]
    FunctionMissing { function: String },

    #[error("{0}")]
    Transient(String),
}

/// Errors from the remote usage store
#[derive(Error, Debug)]
pub enum BackendError {
    #[error("Remote returned {status}: {message}")]
    Http {
        status: u16,
        code: Option<String>,
        message: String,
    },

    #[error("No usage row for user {0}")]
    NotFound(String),

    #[error("Request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Invalid remote payload: {0}")]
    Decode(String),

    #[error("Invalid endpoint: {0}")]
    Endpoint(#[from] url::ParseError),
}

impl BackendError {
    /// PostgREST answers `PGRST202` (or a bare 404) when an RPC does not exist
    pub fn is_missing_function(&self) -> bool {
        match self {
            Self::Http { status, code, .. } => {
                *status == 404 || code.as_deref() == Some("PGRST202")
            }
            _ => false,
        }
    }

    /// The access token was rejected (missing, expired or revoked)
    pub fn is_unauthorized(&self) -> bool {
        matches!(self, Self::Http { status: 401, .. })
    }
}

impl From<BackendError> for CounterFailure {
    fn from(err: BackendError) -> Self {
        Self::Transient(err.to_string())
    }
}

/// Configuration problems
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid value for {key}: {value}")]
    InvalidValue { key: String, value: String },

    #[error("Missing required setting {0}")]
    Missing(&'static str),
}
