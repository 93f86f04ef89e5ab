//! Resilient request layer over the raw HTTP client.
//!
//! Reads retry with a linearly growing delay, then degrade to the local
//! cache; writes degrade to the pending-operation outbox and resolve with
//! a synthesized, clearly-tagged local result. Concurrent reads of the
//! same key share one network attempt.

use chrono::Duration as TtlDuration;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::cache::{CacheStore, NoopStore, SqliteStore};
use crate::config::Config;
use crate::outbox::{drain, DrainReport, OpKind, OutboxQueue, PendingOperation, SqliteOutbox};

use super::auth::{AuthSession, FileTokenStore};
use super::error::ApiError;
use super::health::HealthMonitor;
use super::http::HttpClient;
use super::types::{ApiResponse, RequestOptions};

type FetchOutcome = Result<Value, ApiError>;

enum InflightRole {
  /// First caller for a key; performs the network attempt and publishes it
  Leader(watch::Sender<Option<FetchOutcome>>),
  /// Arrived while an identical request was outstanding; waits for it
  Follower(watch::Receiver<Option<FetchOutcome>>),
}

/// Defaults applied when a call doesn't override them.
#[derive(Debug, Clone)]
pub struct ClientOptions {
  pub retries: u32,
  /// Base backoff; attempt N waits N times this before running
  pub retry_delay: Duration,
  pub ttl_minutes: i64,
  /// Replay the outbox automatically when the backend recovers
  pub auto_drain: bool,
}

impl Default for ClientOptions {
  fn default() -> Self {
    Self {
      retries: 3,
      retry_delay: Duration::from_secs(1),
      ttl_minutes: 30,
      auto_drain: true,
    }
  }
}

impl ClientOptions {
  pub fn from_config(config: &Config) -> Self {
    Self {
      retries: config.api.retries,
      retry_delay: config.retry_delay(),
      ttl_minutes: config.cache.ttl_minutes,
      auto_drain: config.sync.auto_drain,
    }
  }
}

struct Inner {
  http: HttpClient,
  cache: Arc<dyn CacheStore>,
  outbox: Arc<dyn OutboxQueue>,
  health: HealthMonitor,
  options: ClientOptions,
  inflight: Mutex<HashMap<String, watch::Receiver<Option<FetchOutcome>>>>,
}

/// Client for the laboratory backend that keeps working while offline.
#[derive(Clone)]
pub struct LabClient {
  inner: Arc<Inner>,
}

impl LabClient {
  pub fn new(
    http: HttpClient,
    cache: Arc<dyn CacheStore>,
    outbox: Arc<dyn OutboxQueue>,
    health: HealthMonitor,
    options: ClientOptions,
  ) -> Self {
    Self {
      inner: Arc::new(Inner {
        http,
        cache,
        outbox,
        health,
        options,
        inflight: Mutex::new(HashMap::new()),
      }),
    }
  }

  /// Wire up the default stack: SQLite cache and outbox in the data
  /// directory, file-backed tokens, and a health probe from config.
  pub fn from_config(config: &Config) -> color_eyre::Result<Self> {
    let db_path = config.offline_db_path()?;

    let cache: Arc<dyn CacheStore> = if config.cache.enabled {
      Arc::new(SqliteStore::open(&db_path)?)
    } else {
      Arc::new(NoopStore)
    };
    let outbox: Arc<dyn OutboxQueue> = Arc::new(SqliteOutbox::open(&db_path)?);

    let base = config.api.url.trim_end_matches('/');
    let tokens = FileTokenStore::new(Config::data_dir()?.join("tokens.json"));
    let auth = Arc::new(AuthSession::new(
      Box::new(tokens),
      format!("{}{}", base, config.api.login_path),
      format!("{}{}", base, config.api.refresh_path),
      config.request_timeout(),
    )?);

    let http = HttpClient::new(&config.api.url, config.request_timeout(), auth)?;
    let health = HealthMonitor::new(
      format!("{}{}", base, config.health.path),
      Duration::from_secs(config.health.interval_secs),
      Duration::from_secs(config.health.timeout_secs),
    )?;

    Ok(Self::new(
      http,
      cache,
      outbox,
      health,
      ClientOptions::from_config(config),
    ))
  }

  pub fn health(&self) -> &HealthMonitor {
    &self.inner.health
  }

  pub fn auth(&self) -> &Arc<AuthSession> {
    self.inner.http.auth()
  }

  /// Last-known reachability of the backend. Non-blocking.
  pub fn check_api_status(&self) -> bool {
    self.inner.health.is_api_healthy()
  }

  /// Probe the backend right now and return the fresh judgment.
  pub async fn force_api_check(&self) -> bool {
    self.inner.health.force_check().await
  }

  /// Read with retry, caching, and offline fallback.
  ///
  /// While the backend is considered unreachable the network is skipped
  /// entirely: a cached value for the key is served (however old), and a
  /// cold cache fails with [`ApiError::NoOfflineData`]. Otherwise the
  /// request is attempted up to the retry budget; a success refreshes the
  /// cache, and exhaustion falls back to any cached value, annotated with
  /// the triggering error. Only a fallback-less exhaustion propagates.
  pub async fn get(&self, endpoint: &str, options: &RequestOptions) -> Result<ApiResponse, ApiError> {
    let key = options
      .cache_key
      .clone()
      .unwrap_or_else(|| endpoint.to_string());

    if options.force_offline || !self.inner.health.is_api_healthy() {
      debug!("GET {} skipped: backend considered unreachable", endpoint);
      return self.serve_cached(&key, None);
    }

    let retries = options.retries.unwrap_or(self.inner.options.retries);
    let ttl = TtlDuration::minutes(options.ttl_minutes.unwrap_or(self.inner.options.ttl_minutes));

    match self.claim_inflight(&key) {
      InflightRole::Leader(tx) => {
        let outcome = self.fetch_with_retry(endpoint, retries).await;

        if let Ok(value) = &outcome {
          if let Err(e) = self.inner.cache.put(&key, value, ttl) {
            warn!("Failed to cache response for '{}': {}", key, e);
          }
        }

        self.release_inflight(&key);
        let _ = tx.send(Some(outcome.clone()));

        self.resolve_outcome(&key, outcome)
      }
      InflightRole::Follower(mut rx) => {
        debug!("GET {} joined an in-flight request", endpoint);
        let outcome = loop {
          let current = rx.borrow_and_update().clone();
          if let Some(outcome) = current {
            break outcome;
          }
          if rx.changed().await.is_err() {
            break Err(ApiError::Network("shared request was dropped".to_string()));
          }
        };

        self.resolve_outcome(&key, outcome)
      }
    }
  }

  /// Create a resource. Degrades to the outbox instead of failing.
  pub async fn post(
    &self,
    endpoint: &str,
    data: &Value,
    options: &RequestOptions,
  ) -> Result<ApiResponse, ApiError> {
    self.mutate(OpKind::Create, endpoint, Some(data), options).await
  }

  /// Update a resource. Degrades to the outbox instead of failing.
  pub async fn put(
    &self,
    endpoint: &str,
    data: &Value,
    options: &RequestOptions,
  ) -> Result<ApiResponse, ApiError> {
    self.mutate(OpKind::Update, endpoint, Some(data), options).await
  }

  /// Delete a resource. Degrades to the outbox instead of failing.
  pub async fn delete(
    &self,
    endpoint: &str,
    options: &RequestOptions,
  ) -> Result<ApiResponse, ApiError> {
    self.mutate(OpKind::Delete, endpoint, None, options).await
  }

  /// Queued mutations awaiting replay, oldest first.
  pub fn pending_operations(&self) -> color_eyre::Result<Vec<PendingOperation>> {
    self.inner.outbox.list()
  }

  /// Replay the outbox now.
  pub async fn sync_pending(&self) -> color_eyre::Result<DrainReport> {
    drain(self.inner.outbox.as_ref(), &self.inner.http).await
  }

  /// Start the background probe loop and, unless disabled, the replay
  /// supervisor that drains the outbox whenever the backend recovers.
  pub fn start_background(&self) {
    self.inner.health.start();

    if !self.inner.options.auto_drain {
      return;
    }

    let client = self.clone();
    let mut rx = self.inner.health.subscribe();
    // Baseline taken at subscription time so no transition between here and
    // the task's first poll is mistaken for a recovery
    let mut was_healthy = *rx.borrow_and_update();
    tokio::spawn(async move {
      while rx.changed().await.is_ok() {
        let healthy = *rx.borrow_and_update();
        if healthy && !was_healthy {
          match client.sync_pending().await {
            Ok(report) if report.replayed > 0 || report.skipped > 0 => {
              info!(
                "Backend recovered: {} operation(s) replayed, {} left for review",
                report.replayed, report.skipped
              );
            }
            Ok(_) => {}
            Err(e) => warn!("Failed to replay queued operations: {}", e),
          }
        }
        was_healthy = healthy;
      }
    });
  }

  async fn mutate(
    &self,
    kind: OpKind,
    endpoint: &str,
    payload: Option<&Value>,
    options: &RequestOptions,
  ) -> Result<ApiResponse, ApiError> {
    if options.force_offline || !self.inner.health.is_api_healthy() {
      debug!("{} {} skipped: backend considered unreachable", kind, endpoint);
      return self.queue_pending(kind, endpoint, payload, None);
    }

    let retries = options.retries.unwrap_or(self.inner.options.retries);

    match self.send_with_retry(kind, endpoint, payload, retries).await {
      Ok(value) => Ok(ApiResponse::from_network(value)),
      Err(err) => self.queue_pending(kind, endpoint, payload, Some(err)),
    }
  }

  async fn fetch_with_retry(&self, endpoint: &str, retries: u32) -> FetchOutcome {
    let attempts = retries.max(1);
    let mut last_error = None;

    for attempt in 1..=attempts {
      if attempt > 1 {
        tokio::time::sleep(self.inner.options.retry_delay * (attempt - 1)).await;
      }

      match self.inner.http.get(endpoint).await {
        Ok(value) => return Ok(value),
        // Retrying without a session cannot succeed
        Err(ApiError::SessionExpired) => return Err(ApiError::SessionExpired),
        Err(err) => {
          debug!("GET {} attempt {}/{} failed: {}", endpoint, attempt, attempts, err);
          last_error = Some(err);
        }
      }
    }

    Err(last_error.unwrap_or_else(|| ApiError::Network("no attempt was made".to_string())))
  }

  async fn send_with_retry(
    &self,
    kind: OpKind,
    endpoint: &str,
    payload: Option<&Value>,
    retries: u32,
  ) -> FetchOutcome {
    let attempts = retries.max(1);
    let mut last_error = None;

    for attempt in 1..=attempts {
      if attempt > 1 {
        tokio::time::sleep(self.inner.options.retry_delay * (attempt - 1)).await;
      }

      match self.inner.http.send(kind.method(), endpoint, payload).await {
        Ok(value) => return Ok(value),
        Err(ApiError::SessionExpired) => return Err(ApiError::SessionExpired),
        Err(err) => {
          debug!("{} {} attempt {}/{} failed: {}", kind, endpoint, attempt, attempts, err);
          last_error = Some(err);
        }
      }
    }

    Err(last_error.unwrap_or_else(|| ApiError::Network("no attempt was made".to_string())))
  }

  /// Map a shared network outcome to the caller's response, applying the
  /// cache fallback on failure.
  fn resolve_outcome(&self, key: &str, outcome: FetchOutcome) -> Result<ApiResponse, ApiError> {
    match outcome {
      Ok(value) => Ok(ApiResponse::from_network(value)),
      Err(ApiError::SessionExpired) => Err(ApiError::SessionExpired),
      Err(err) => self.serve_cached(key, Some(err)),
    }
  }

  /// Serve a read from the cache. With `trigger` set (retries exhausted)
  /// a miss propagates that error; without it (unreachable backend) a miss
  /// is the no-offline-data case.
  fn serve_cached(&self, key: &str, trigger: Option<ApiError>) -> Result<ApiResponse, ApiError> {
    let entry = match self.inner.cache.get(key) {
      Ok(entry) => entry,
      Err(e) => {
        warn!("Cache lookup for '{}' failed: {}", key, e);
        None
      }
    };

    match entry {
      Some(entry) => {
        let stale = entry.is_expired();
        info!(
          "Serving '{}' from cache{}",
          key,
          if stale { " (expired)" } else { "" }
        );
        Ok(ApiResponse::from_cache(
          entry.value,
          stale,
          trigger.map(|e| e.to_string()),
        ))
      }
      None => match trigger {
        Some(err) => Err(err),
        None => Err(ApiError::NoOfflineData {
          key: key.to_string(),
          reason: "backend unreachable and nothing cached".to_string(),
        }),
      },
    }
  }

  fn queue_pending(
    &self,
    kind: OpKind,
    endpoint: &str,
    payload: Option<&Value>,
    trigger: Option<ApiError>,
  ) -> Result<ApiResponse, ApiError> {
    let reason = trigger.map(|e| e.to_string());

    self
      .inner
      .outbox
      .append(kind, endpoint, payload, reason.as_deref())
      .map_err(|e| ApiError::Storage(e.to_string()))?;

    match &reason {
      Some(reason) => info!("{} {} queued for replay after: {}", kind, endpoint, reason),
      None => info!("{} {} queued for replay", kind, endpoint),
    }

    Ok(ApiResponse::offline(synthesize_result(kind, payload)))
  }

  fn claim_inflight(&self, key: &str) -> InflightRole {
    let mut inflight = match self.inner.inflight.lock() {
      Ok(guard) => guard,
      Err(poisoned) => poisoned.into_inner(),
    };

    if let Some(rx) = inflight.get(key) {
      return InflightRole::Follower(rx.clone());
    }

    let (tx, rx) = watch::channel(None);
    inflight.insert(key.to_string(), rx);
    InflightRole::Leader(tx)
  }

  fn release_inflight(&self, key: &str) {
    let mut inflight = match self.inner.inflight.lock() {
      Ok(guard) => guard,
      Err(poisoned) => poisoned.into_inner(),
    };
    inflight.remove(key);
  }
}

/// Best-effort local stand-in for a mutation the backend has not seen yet.
fn synthesize_result(kind: OpKind, payload: Option<&Value>) -> Value {
  match kind {
    OpKind::Create => {
      let mut value = payload.cloned().unwrap_or_else(|| json!({}));
      if let Value::Object(map) = &mut value {
        if !map.contains_key("id") {
          map.insert(
            "id".to_string(),
            Value::String(format!("offline_{}", Uuid::new_v4().simple())),
          );
        }
      }
      value
    }
    OpKind::Update => payload.cloned().unwrap_or_else(|| json!({})),
    OpKind::Delete => json!({ "success": true }),
  }
}
