use std::error::Error;
use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

pub type AdapterResult<T> = Result<T, AdapterError>;

/// Normalised upstream failure classes. Adapters map whatever their upstream
/// returns into one of these; the scheduler's classifier keys off them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdapterErrorKind {
    Network,
    Timeout,
    RateLimited,
    AuthExpired,
    AuthInvalid,
    InvalidRequest,
    Upstream,
    Decode,
    Unsupported,
    Cancelled,
}

impl AdapterErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AdapterErrorKind::Network => "network",
            AdapterErrorKind::Timeout => "timeout",
            AdapterErrorKind::RateLimited => "rate_limited",
            AdapterErrorKind::AuthExpired => "auth_expired",
            AdapterErrorKind::AuthInvalid => "auth_invalid",
            AdapterErrorKind::InvalidRequest => "invalid_request",
            AdapterErrorKind::Upstream => "upstream",
            AdapterErrorKind::Decode => "decode",
            AdapterErrorKind::Unsupported => "unsupported",
            AdapterErrorKind::Cancelled => "cancelled",
        }
    }

    pub const ALL: [AdapterErrorKind; 10] = [
        AdapterErrorKind::Network,
        AdapterErrorKind::Timeout,
        AdapterErrorKind::RateLimited,
        AdapterErrorKind::AuthExpired,
        AdapterErrorKind::AuthInvalid,
        AdapterErrorKind::InvalidRequest,
        AdapterErrorKind::Upstream,
        AdapterErrorKind::Decode,
        AdapterErrorKind::Unsupported,
        AdapterErrorKind::Cancelled,
    ];

    pub fn slot(&self) -> usize {
        Self::ALL.iter().position(|k| k == self).unwrap_or(0)
    }
}

#[derive(Debug, Clone)]
pub struct AdapterError {
    pub kind: AdapterErrorKind,
    pub http_status: Option<u16>,
    pub retryable: bool,
    pub provider_message: Option<String>,
    /// Parsed `Retry-After` on 429 responses.
    pub retry_after: Option<Duration>,
    /// Filled in by the pipeline that executed the call.
    pub pipeline_id: Option<String>,
}

impl AdapterError {
    pub fn new(kind: AdapterErrorKind, retryable: bool) -> Self {
        Self {
            kind,
            http_status: None,
            retryable,
            provider_message: None,
            retry_after: None,
            pipeline_id: None,
        }
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.http_status = Some(status);
        self
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.provider_message = Some(message.into());
        self
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::new(AdapterErrorKind::Network, true).with_message(message)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(AdapterErrorKind::Timeout, true).with_message(message)
    }

    pub fn decode(message: impl Into<String>) -> Self {
        Self::new(AdapterErrorKind::Decode, false).with_message(message)
    }

    pub fn unsupported(what: &'static str) -> Self {
        Self::new(AdapterErrorKind::Unsupported, false).with_message(what)
    }

    pub fn cancelled() -> Self {
        Self::new(AdapterErrorKind::Cancelled, false)
    }

    pub fn auth_expired(message: impl Into<String>) -> Self {
        Self::new(AdapterErrorKind::AuthExpired, false).with_message(message)
    }

    pub fn invalid_key_index(index: usize, available: usize) -> Self {
        Self::new(AdapterErrorKind::AuthInvalid, false).with_message(format!(
            "credential index {index} out of range ({available} configured)"
        ))
    }

    /// Normalise a non-2xx upstream status. `oauth` selects whether 401/403
    /// means an expired (refreshable) token or a dead static key.
    pub fn from_status(
        status: u16,
        oauth: bool,
        message: Option<String>,
        retry_after: Option<Duration>,
    ) -> Self {
        let (kind, retryable) = match status {
            429 => (AdapterErrorKind::RateLimited, true),
            401 | 403 => {
                if oauth {
                    (AdapterErrorKind::AuthExpired, false)
                } else {
                    (AdapterErrorKind::AuthInvalid, false)
                }
            }
            400 | 404 | 409 | 422 => (AdapterErrorKind::InvalidRequest, false),
            408 => (AdapterErrorKind::Timeout, true),
            s if (500..600).contains(&s) => (AdapterErrorKind::Upstream, true),
            _ => (AdapterErrorKind::Upstream, false),
        };
        Self {
            kind,
            http_status: Some(status),
            retryable,
            provider_message: message,
            retry_after,
            pipeline_id: None,
        }
    }
}

impl fmt::Display for AdapterError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.kind.as_str())?;
        if let Some(status) = self.http_status {
            write!(f, " (http {status})")?;
        }
        if let Some(pipeline) = &self.pipeline_id {
            write!(f, " [{pipeline}]")?;
        }
        if let Some(message) = &self.provider_message {
            write!(f, ": {message}")?;
        }
        Ok(())
    }
}

impl Error for AdapterError {}
