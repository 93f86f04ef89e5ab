//! Thin HTTP wrapper: base-URL joining, JSON bodies, bearer attach, and the
//! 401-refresh-retry handshake.

use color_eyre::{eyre::eyre, Result};
use reqwest::{Method, StatusCode};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use url::Url;

use super::auth::AuthSession;
use super::error::ApiError;

/// HTTP client bound to the laboratory backend.
#[derive(Clone)]
pub struct HttpClient {
  client: reqwest::Client,
  base: String,
  auth: Arc<AuthSession>,
  timeout: Duration,
}

impl HttpClient {
  pub fn new(base_url: &str, timeout: Duration, auth: Arc<AuthSession>) -> Result<Self> {
    // Validate the base up front so later joins can't produce surprises
    Url::parse(base_url).map_err(|e| eyre!("Invalid API base URL '{}': {}", base_url, e))?;

    let client = reqwest::Client::builder()
      .timeout(timeout)
      .build()
      .map_err(|e| eyre!("Failed to build HTTP client: {}", e))?;

    Ok(Self {
      client,
      base: base_url.trim_end_matches('/').to_string(),
      auth,
      timeout,
    })
  }

  pub fn auth(&self) -> &Arc<AuthSession> {
    &self.auth
  }

  pub async fn get(&self, endpoint: &str) -> Result<Value, ApiError> {
    self.send(Method::GET, endpoint, None).await
  }

  pub async fn post(&self, endpoint: &str, body: &Value) -> Result<Value, ApiError> {
    self.send(Method::POST, endpoint, Some(body)).await
  }

  pub async fn put(&self, endpoint: &str, body: &Value) -> Result<Value, ApiError> {
    self.send(Method::PUT, endpoint, Some(body)).await
  }

  pub async fn delete(&self, endpoint: &str) -> Result<Value, ApiError> {
    self.send(Method::DELETE, endpoint, None).await
  }

  /// Issue a single request with the current access token. On 401, run the
  /// shared refresh exchange and retry exactly once with the new token.
  pub async fn send(
    &self,
    method: Method,
    endpoint: &str,
    body: Option<&Value>,
  ) -> Result<Value, ApiError> {
    let url = self.join(endpoint)?;

    let observed = self.auth.access_token();
    let response = self
      .send_once(method.clone(), url.clone(), body, observed.as_deref())
      .await?;

    if response.status() == StatusCode::UNAUTHORIZED {
      let token = self
        .auth
        .refresh_after_unauthorized(observed.as_deref())
        .await?;
      let retried = self.send_once(method, url, body, Some(&token)).await?;
      return Self::read_json(retried).await;
    }

    Self::read_json(response).await
  }

  async fn send_once(
    &self,
    method: Method,
    url: Url,
    body: Option<&Value>,
    token: Option<&str>,
  ) -> Result<reqwest::Response, ApiError> {
    let mut request = self.client.request(method, url);

    if let Some(token) = token {
      request = request.bearer_auth(token);
    }
    if let Some(body) = body {
      request = request.json(body);
    }

    request
      .send()
      .await
      .map_err(|e| ApiError::from_transport(e, self.timeout))
  }

  async fn read_json(response: reqwest::Response) -> Result<Value, ApiError> {
    let status = response.status();

    if !status.is_success() {
      let body = response.text().await.unwrap_or_default();
      return Err(ApiError::Status {
        status: status.as_u16(),
        body,
      });
    }

    let text = response
      .text()
      .await
      .map_err(|e| ApiError::Network(e.to_string()))?;

    // 204 and empty bodies are normal for deletes
    if text.trim().is_empty() {
      return Ok(Value::Object(serde_json::Map::new()));
    }

    serde_json::from_str(&text).map_err(|e| ApiError::Decode(e.to_string()))
  }

  fn join(&self, endpoint: &str) -> Result<Url, ApiError> {
    let path = if endpoint.starts_with('/') {
      endpoint.to_string()
    } else {
      format!("/{}", endpoint)
    };

    Url::parse(&format!("{}{}", self.base, path))
      .map_err(|e| ApiError::InvalidUrl(format!("{}{}: {}", self.base, path, e)))
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::api::auth::{MemoryTokenStore, TokenPair, TokenStore};
  use serde_json::json;
  use wiremock::matchers::{header, method, path, query_param};
  use wiremock::{Mock, MockServer, ResponseTemplate};

  fn client_for(server_uri: &str, tokens: Option<TokenPair>) -> HttpClient {
    let store = MemoryTokenStore::default();
    if let Some(pair) = tokens {
      store.save(&pair).unwrap();
    }

    let auth = Arc::new(
      AuthSession::new(
        Box::new(store),
        format!("{}/token/", server_uri),
        format!("{}/token/refresh/", server_uri),
        Duration::from_secs(2),
      )
      .unwrap(),
    );

    HttpClient::new(server_uri, Duration::from_secs(2), auth).unwrap()
  }

  #[tokio::test]
  async fn test_get_attaches_bearer_and_parses_json() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
      .and(path("/pacientes/"))
      .and(query_param("page", "1"))
      .and(header("authorization", "Bearer a1"))
      .respond_with(ResponseTemplate::new(200).set_body_json(json!({"count": 0, "results": []})))
      .expect(1)
      .mount(&server)
      .await;

    let client = client_for(
      &server.uri(),
      Some(TokenPair {
        access: "a1".into(),
        refresh: "r1".into(),
      }),
    );

    let value = client.get("/pacientes/?page=1").await.unwrap();
    assert_eq!(value["count"], json!(0));
  }

  #[tokio::test]
  async fn test_non_2xx_maps_to_status_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
      .and(path("/examenes/"))
      .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
      .mount(&server)
      .await;

    let client = client_for(&server.uri(), None);
    let err = client.get("/examenes/").await.unwrap_err();

    assert!(matches!(err, ApiError::Status { status: 500, .. }));
    assert!(err.is_transient());
  }

  #[tokio::test]
  async fn test_empty_body_becomes_empty_object() {
    let server = MockServer::start().await;
    Mock::given(method("DELETE"))
      .and(path("/ordenes/9/"))
      .respond_with(ResponseTemplate::new(204))
      .mount(&server)
      .await;

    let client = client_for(&server.uri(), None);
    let value = client.delete("/ordenes/9/").await.unwrap();
    assert_eq!(value, json!({}));
  }

  #[tokio::test]
  async fn test_401_refreshes_and_retries_with_new_token() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
      .and(path("/medicos/"))
      .and(header("authorization", "Bearer stale"))
      .respond_with(ResponseTemplate::new(401))
      .expect(1)
      .mount(&server)
      .await;
    Mock::given(method("GET"))
      .and(path("/medicos/"))
      .and(header("authorization", "Bearer fresh"))
      .respond_with(ResponseTemplate::new(200).set_body_json(json!({"count": 3})))
      .expect(1)
      .mount(&server)
      .await;
    Mock::given(method("POST"))
      .and(path("/token/refresh/"))
      .respond_with(
        ResponseTemplate::new(200).set_body_json(json!({"access": "fresh", "refresh": null})),
      )
      .expect(1)
      .mount(&server)
      .await;

    let client = client_for(
      &server.uri(),
      Some(TokenPair {
        access: "stale".into(),
        refresh: "r1".into(),
      }),
    );

    let value = client.get("/medicos/").await.unwrap();
    assert_eq!(value["count"], json!(3));
  }

  #[tokio::test]
  async fn test_failed_refresh_surfaces_session_expiry() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
      .and(path("/medicos/"))
      .respond_with(ResponseTemplate::new(401))
      .expect(1)
      .mount(&server)
      .await;
    Mock::given(method("POST"))
      .and(path("/token/refresh/"))
      .respond_with(ResponseTemplate::new(401))
      .expect(1)
      .mount(&server)
      .await;

    let client = client_for(
      &server.uri(),
      Some(TokenPair {
        access: "stale".into(),
        refresh: "bad".into(),
      }),
    );

    // The original request is not retried after a failed refresh
    let err = client.get("/medicos/").await.unwrap_err();
    assert!(matches!(err, ApiError::SessionExpired));
    assert_eq!(client.auth().access_token(), None);
    assert!(client.auth().is_expired());
  }
}
