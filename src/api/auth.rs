//! Session tokens and the single-flight refresh exchange.
//!
//! Every outgoing request carries the stored access token. When the backend
//! answers 401, exactly one refresh exchange runs at a time; requests that
//! hit 401 while one is in flight wait for its outcome instead of starting
//! their own. A failed exchange clears the stored pair and raises the
//! session-expired signal once, after which the caller has to log in again.

use color_eyre::{eyre::eyre, Result};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::path::PathBuf;
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, warn};

use super::error::ApiError;

/// Access + refresh token pair as issued by the backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenPair {
  pub access: String,
  pub refresh: String,
}

/// Trait for token persistence backends.
///
/// The session layer only reads, writes and clears the pair; it does not
/// interpret the storage format.
pub trait TokenStore: Send + Sync {
  fn load(&self) -> Result<Option<TokenPair>>;
  fn save(&self, pair: &TokenPair) -> Result<()>;
  fn clear(&self) -> Result<()>;
}

/// Token pair stored as a JSON file under the data directory.
pub struct FileTokenStore {
  path: PathBuf,
}

impl FileTokenStore {
  pub fn new(path: PathBuf) -> Self {
    Self { path }
  }
}

impl TokenStore for FileTokenStore {
  fn load(&self) -> Result<Option<TokenPair>> {
    let contents = match std::fs::read_to_string(&self.path) {
      Ok(c) => c,
      Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
      Err(e) => return Err(eyre!("Failed to read token file {}: {}", self.path.display(), e)),
    };

    let pair: TokenPair = serde_json::from_str(&contents)
      .map_err(|e| eyre!("Failed to parse token file {}: {}", self.path.display(), e))?;

    Ok(Some(pair))
  }

  fn save(&self, pair: &TokenPair) -> Result<()> {
    if let Some(parent) = self.path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| eyre!("Failed to create token directory: {}", e))?;
    }

    let contents =
      serde_json::to_string(pair).map_err(|e| eyre!("Failed to serialize tokens: {}", e))?;
    std::fs::write(&self.path, contents)
      .map_err(|e| eyre!("Failed to write token file {}: {}", self.path.display(), e))?;

    Ok(())
  }

  fn clear(&self) -> Result<()> {
    match std::fs::remove_file(&self.path) {
      Ok(()) => Ok(()),
      Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
      Err(e) => Err(eyre!("Failed to remove token file {}: {}", self.path.display(), e)),
    }
  }
}

/// In-memory token store for tests and ephemeral sessions.
#[derive(Default)]
pub struct MemoryTokenStore {
  inner: Mutex<Option<TokenPair>>,
}

impl TokenStore for MemoryTokenStore {
  fn load(&self) -> Result<Option<TokenPair>> {
    Ok(self.inner.lock().map_err(|e| eyre!("Lock poisoned: {}", e))?.clone())
  }

  fn save(&self, pair: &TokenPair) -> Result<()> {
    *self.inner.lock().map_err(|e| eyre!("Lock poisoned: {}", e))? = Some(pair.clone());
    Ok(())
  }

  fn clear(&self) -> Result<()> {
    *self.inner.lock().map_err(|e| eyre!("Lock poisoned: {}", e))? = None;
    Ok(())
  }
}

/// Wire shape of the refresh exchange response. Backends that rotate
/// refresh tokens include the new one.
#[derive(Debug, Deserialize)]
struct RefreshResponse {
  access: String,
  refresh: Option<String>,
}

/// Owns the token pair and coordinates refresh exchanges.
pub struct AuthSession {
  store: Box<dyn TokenStore>,
  client: reqwest::Client,
  login_url: String,
  refresh_url: String,
  refresh_lock: tokio::sync::Mutex<()>,
  expired_tx: watch::Sender<bool>,
}

impl AuthSession {
  pub fn new(
    store: Box<dyn TokenStore>,
    login_url: String,
    refresh_url: String,
    timeout: Duration,
  ) -> Result<Self> {
    let client = reqwest::Client::builder()
      .timeout(timeout)
      .build()
      .map_err(|e| eyre!("Failed to build auth HTTP client: {}", e))?;

    let (expired_tx, _) = watch::channel(false);

    Ok(Self {
      store,
      client,
      login_url,
      refresh_url,
      refresh_lock: tokio::sync::Mutex::new(()),
      expired_tx,
    })
  }

  /// Current access token, if a session exists.
  pub fn access_token(&self) -> Option<String> {
    match self.store.load() {
      Ok(pair) => pair.map(|p| p.access),
      Err(e) => {
        warn!("Failed to load stored tokens: {}", e);
        None
      }
    }
  }

  /// Observe the session-expired signal. Fires at most once per expiry.
  pub fn expired(&self) -> watch::Receiver<bool> {
    self.expired_tx.subscribe()
  }

  pub fn is_expired(&self) -> bool {
    *self.expired_tx.borrow()
  }

  /// Exchange credentials for a fresh token pair and store it.
  pub async fn login(&self, email: &str, password: &str) -> Result<(), ApiError> {
    let body = json!({ "email": email, "password": password });

    let response = self
      .client
      .post(&self.login_url)
      .json(&body)
      .send()
      .await
      .map_err(|e| ApiError::Network(e.to_string()))?;

    let status = response.status();
    if !status.is_success() {
      let body = response.text().await.unwrap_or_default();
      return Err(ApiError::Status {
        status: status.as_u16(),
        body,
      });
    }

    let pair: TokenPair = response
      .json()
      .await
      .map_err(|e| ApiError::Decode(e.to_string()))?;

    self
      .store
      .save(&pair)
      .map_err(|e| ApiError::Storage(e.to_string()))?;

    // A fresh login reopens an expired session
    self.expired_tx.send_if_modified(|flag| {
      let was = *flag;
      *flag = false;
      was
    });

    Ok(())
  }

  /// Called after a request observed a 401 with `observed` as its bearer
  /// token. Returns the access token the request should retry with.
  ///
  /// Only one exchange runs at a time; a caller that waited behind an
  /// exchange that already replaced the token gets the new one without a
  /// second network call.
  pub async fn refresh_after_unauthorized(
    &self,
    observed: Option<&str>,
  ) -> Result<String, ApiError> {
    let _guard = self.refresh_lock.lock().await;

    let pair = match self.store.load() {
      Ok(Some(pair)) => pair,
      Ok(None) => {
        self.expire_session();
        return Err(ApiError::SessionExpired);
      }
      Err(e) => {
        warn!("Failed to load stored tokens: {}", e);
        self.expire_session();
        return Err(ApiError::SessionExpired);
      }
    };

    // Another caller finished a refresh while we waited for the lock
    if observed != Some(pair.access.as_str()) {
      debug!("Token already refreshed by a concurrent request");
      return Ok(pair.access);
    }

    match self.exchange(&pair.refresh).await {
      Ok(refreshed) => {
        let new_pair = TokenPair {
          access: refreshed.access.clone(),
          refresh: refreshed.refresh.unwrap_or(pair.refresh),
        };
        self
          .store
          .save(&new_pair)
          .map_err(|e| ApiError::Storage(e.to_string()))?;
        debug!("Access token refreshed");
        Ok(refreshed.access)
      }
      Err(e) => {
        warn!("Refresh exchange failed: {}", e);
        self.expire_session();
        Err(ApiError::SessionExpired)
      }
    }
  }

  async fn exchange(&self, refresh: &str) -> Result<RefreshResponse, ApiError> {
    let response = self
      .client
      .post(&self.refresh_url)
      .json(&json!({ "refresh": refresh }))
      .send()
      .await
      .map_err(|e| ApiError::Network(e.to_string()))?;

    let status = response.status();
    if !status.is_success() {
      let body = response.text().await.unwrap_or_default();
      return Err(ApiError::Status {
        status: status.as_u16(),
        body,
      });
    }

    response
      .json()
      .await
      .map_err(|e| ApiError::Decode(e.to_string()))
  }

  /// Clear stored tokens and raise the session-expired signal once.
  fn expire_session(&self) {
    if let Err(e) = self.store.clear() {
      warn!("Failed to clear stored tokens: {}", e);
    }

    let fired = self.expired_tx.send_if_modified(|flag| {
      if *flag {
        false
      } else {
        *flag = true;
        true
      }
    });

    if fired {
      warn!("Session expired; log in again to continue");
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use wiremock::matchers::{body_json, method, path};
  use wiremock::{Mock, MockServer, ResponseTemplate};

  fn session_with(server_uri: &str, pair: Option<TokenPair>) -> AuthSession {
    let store = MemoryTokenStore::default();
    if let Some(pair) = pair {
      store.save(&pair).unwrap();
    }

    AuthSession::new(
      Box::new(store),
      format!("{}/token/", server_uri),
      format!("{}/token/refresh/", server_uri),
      Duration::from_secs(2),
    )
    .unwrap()
  }

  fn stored(access: &str, refresh: &str) -> TokenPair {
    TokenPair {
      access: access.to_string(),
      refresh: refresh.to_string(),
    }
  }

  #[test]
  fn test_file_store_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let store = FileTokenStore::new(dir.path().join("tokens.json"));

    assert!(store.load().unwrap().is_none());
    store.save(&stored("a", "r")).unwrap();
    assert_eq!(store.load().unwrap(), Some(stored("a", "r")));
    store.clear().unwrap();
    assert!(store.load().unwrap().is_none());
    // Clearing an already-empty store is fine
    store.clear().unwrap();
  }

  #[tokio::test]
  async fn test_login_stores_pair() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
      .and(path("/token/"))
      .and(body_json(json!({"email": "lab@example.com", "password": "s3cret"})))
      .respond_with(
        ResponseTemplate::new(200).set_body_json(json!({"access": "a1", "refresh": "r1"})),
      )
      .expect(1)
      .mount(&server)
      .await;

    let auth = session_with(&server.uri(), None);
    auth.login("lab@example.com", "s3cret").await.unwrap();

    assert_eq!(auth.access_token(), Some("a1".to_string()));
  }

  #[tokio::test]
  async fn test_concurrent_401s_trigger_one_refresh() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
      .and(path("/token/refresh/"))
      .and(body_json(json!({"refresh": "r1"})))
      .respond_with(
        ResponseTemplate::new(200)
          .set_delay(Duration::from_millis(100))
          .set_body_json(json!({"access": "a2", "refresh": null})),
      )
      .expect(1)
      .mount(&server)
      .await;

    let auth = std::sync::Arc::new(session_with(&server.uri(), Some(stored("a1", "r1"))));

    let first = {
      let auth = auth.clone();
      tokio::spawn(async move { auth.refresh_after_unauthorized(Some("a1")).await })
    };
    let second = {
      let auth = auth.clone();
      tokio::spawn(async move { auth.refresh_after_unauthorized(Some("a1")).await })
    };

    assert_eq!(first.await.unwrap().unwrap(), "a2");
    assert_eq!(second.await.unwrap().unwrap(), "a2");
    assert_eq!(auth.access_token(), Some("a2".to_string()));
  }

  #[tokio::test]
  async fn test_rotated_refresh_token_is_kept() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
      .and(path("/token/refresh/"))
      .respond_with(
        ResponseTemplate::new(200).set_body_json(json!({"access": "a2", "refresh": "r2"})),
      )
      .mount(&server)
      .await;

    let store = MemoryTokenStore::default();
    store.save(&stored("a1", "r1")).unwrap();
    let auth = AuthSession::new(
      Box::new(store),
      format!("{}/token/", server.uri()),
      format!("{}/token/refresh/", server.uri()),
      Duration::from_secs(2),
    )
    .unwrap();

    auth.refresh_after_unauthorized(Some("a1")).await.unwrap();
    // The rotated refresh token must be used by the next exchange
    let err = auth.refresh_after_unauthorized(Some("a2")).await;
    assert!(err.is_ok());
  }

  #[tokio::test]
  async fn test_failed_refresh_expires_session_once() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
      .and(path("/token/refresh/"))
      .respond_with(ResponseTemplate::new(401).set_body_json(json!({"detail": "invalid"})))
      .expect(1)
      .mount(&server)
      .await;

    let auth = session_with(&server.uri(), Some(stored("a1", "r1")));
    let mut expired = auth.expired();
    assert!(!*expired.borrow_and_update());

    let err = auth.refresh_after_unauthorized(Some("a1")).await;
    assert!(matches!(err, Err(ApiError::SessionExpired)));

    // Tokens cleared, signal raised
    assert_eq!(auth.access_token(), None);
    assert!(expired.has_changed().unwrap());
    assert!(*expired.borrow_and_update());

    // A later 401 observer is rejected without re-firing the signal
    let err = auth.refresh_after_unauthorized(Some("a1")).await;
    assert!(matches!(err, Err(ApiError::SessionExpired)));
    assert!(!expired.has_changed().unwrap());
  }
}
