//! Error types for the resilient API layer.

use std::time::Duration;
use thiserror::Error;

/// Failures observed while talking to the laboratory backend.
///
/// Connectivity problems, timeouts and 5xx responses are transient; 4xx
/// responses are permanent rejections. The request layer retries both kinds
/// the same way, but the outbox drain uses the distinction to decide between
/// "stop and try again later" and "skip and leave for manual review".
#[derive(Debug, Clone, Error)]
pub enum ApiError {
  /// Connection-level failure: DNS, refused connection, reset mid-flight.
  #[error("network error: {0}")]
  Network(String),

  /// The attempt hit its deadline.
  #[error("request timed out after {0:?}")]
  Timeout(Duration),

  /// The backend answered with a non-2xx status.
  #[error("HTTP {status}: {body}")]
  Status { status: u16, body: String },

  /// The backend answered 2xx but the body was not the JSON we expected.
  #[error("invalid response body: {0}")]
  Decode(String),

  /// The endpoint could not be resolved against the configured base URL.
  #[error("invalid request url: {0}")]
  InvalidUrl(String),

  /// A read had no cached fallback after every attempt failed.
  #[error("no offline data available for '{key}': {reason}")]
  NoOfflineData { key: String, reason: String },

  /// The refresh exchange failed; stored tokens have been cleared.
  #[error("session expired")]
  SessionExpired,

  /// The local cache or outbox could not be written.
  #[error("local storage error: {0}")]
  Storage(String),
}

impl ApiError {
  /// Worth retrying later: the backend may simply be unreachable right now.
  pub fn is_transient(&self) -> bool {
    match self {
      Self::Network(_) | Self::Timeout(_) => true,
      Self::Status { status, .. } => *status >= 500,
      _ => false,
    }
  }

  /// The backend saw the request and rejected it; retrying won't change that.
  pub fn is_permanent(&self) -> bool {
    match self {
      Self::Status { status, .. } => (400..500).contains(status),
      Self::InvalidUrl(_) => true,
      _ => false,
    }
  }

  /// Map a reqwest transport error, preserving the timeout distinction.
  pub fn from_transport(err: reqwest::Error, deadline: Duration) -> Self {
    if err.is_timeout() {
      Self::Timeout(deadline)
    } else {
      Self::Network(err.to_string())
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_timeouts_and_5xx_are_transient() {
    assert!(ApiError::Timeout(Duration::from_secs(10)).is_transient());
    assert!(ApiError::Network("connection refused".into()).is_transient());
    assert!(ApiError::Status {
      status: 503,
      body: String::new()
    }
    .is_transient());
  }

  #[test]
  fn test_4xx_is_permanent() {
    let err = ApiError::Status {
      status: 400,
      body: "{\"detail\":\"invalid\"}".into(),
    };
    assert!(err.is_permanent());
    assert!(!err.is_transient());
  }

  #[test]
  fn test_session_expiry_is_neither() {
    assert!(!ApiError::SessionExpired.is_transient());
    assert!(!ApiError::SessionExpired.is_permanent());
  }
}
