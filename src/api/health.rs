//! Advisory backend reachability monitor.
//!
//! Keeps a cheaply-readable judgment of whether the backend is worth
//! talking to, refreshed by a background probe on a fixed interval. The
//! judgment is advisory: a "healthy" reading can be up to one interval
//! stale, so every network call still has to handle failure on its own.

use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tracing::{debug, info};

/// Point-in-time view of the monitor's state.
#[derive(Debug, Clone)]
pub struct HealthSnapshot {
  pub healthy: bool,
  /// Round-trip time of the last successful probe
  pub latency: Option<Duration>,
  pub checked_at: Option<DateTime<Utc>>,
}

struct HealthState {
  /// Last reachability judgment, broadcast so the outbox drain can react
  /// to recovery transitions
  healthy_tx: watch::Sender<bool>,
  /// Millis of the last successful probe; u64::MAX before the first one
  latency_ms: AtomicU64,
  checked_at: Mutex<Option<DateTime<Utc>>>,
}

/// Tracks backend reachability so doomed requests can be skipped.
#[derive(Clone)]
pub struct HealthMonitor {
  state: Arc<HealthState>,
  client: reqwest::Client,
  probe_url: String,
  interval: Duration,
}

impl HealthMonitor {
  /// Create a monitor probing `probe_url`. Starts optimistic: the backend
  /// is assumed healthy until a probe says otherwise.
  pub fn new(probe_url: String, interval: Duration, probe_timeout: Duration) -> Result<Self> {
    let client = reqwest::Client::builder()
      .timeout(probe_timeout)
      .build()
      .map_err(|e| eyre!("Failed to build health probe client: {}", e))?;

    let (healthy_tx, _) = watch::channel(true);

    Ok(Self {
      state: Arc::new(HealthState {
        healthy_tx,
        latency_ms: AtomicU64::new(u64::MAX),
        checked_at: Mutex::new(None),
      }),
      client,
      probe_url,
      interval,
    })
  }

  /// Last-known reachability. Never blocks; may be stale by up to one
  /// probe interval.
  pub fn is_api_healthy(&self) -> bool {
    *self.state.healthy_tx.borrow()
  }

  /// Receiver that yields on healthy/unhealthy transitions.
  pub fn subscribe(&self) -> watch::Receiver<bool> {
    self.state.healthy_tx.subscribe()
  }

  pub fn snapshot(&self) -> HealthSnapshot {
    let latency_ms = self.state.latency_ms.load(Ordering::Relaxed);
    HealthSnapshot {
      healthy: self.is_api_healthy(),
      latency: (latency_ms != u64::MAX).then(|| Duration::from_millis(latency_ms)),
      checked_at: self.state.checked_at.lock().ok().and_then(|g| *g),
    }
  }

  /// Probe immediately and update the judgment.
  pub async fn force_check(&self) -> bool {
    let started = Instant::now();
    let healthy = match self.client.get(&self.probe_url).send().await {
      Ok(response) => response.status().is_success(),
      Err(_) => false,
    };

    if healthy {
      let elapsed = started.elapsed();
      self
        .state
        .latency_ms
        .store(elapsed.as_millis() as u64, Ordering::Relaxed);
      debug!(latency_ms = elapsed.as_millis() as u64, "Health probe ok");
    }

    if let Ok(mut checked_at) = self.state.checked_at.lock() {
      *checked_at = Some(Utc::now());
    }

    self.set_healthy(healthy);
    healthy
  }

  /// Spawn the background probe loop. The loop runs for the lifetime of
  /// the process; dropping the monitor does not stop it.
  pub fn start(&self) {
    let monitor = self.clone();
    tokio::spawn(async move {
      let mut ticker = tokio::time::interval(monitor.interval);
      ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
      loop {
        ticker.tick().await;
        monitor.force_check().await;
      }
    });
  }

  pub(crate) fn set_healthy(&self, healthy: bool) {
    let changed = self.state.healthy_tx.send_if_modified(|current| {
      if *current == healthy {
        false
      } else {
        *current = healthy;
        true
      }
    });

    if changed {
      if healthy {
        info!("Backend reachable again");
      } else {
        info!("Backend unreachable; requests will fall back to offline data");
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use wiremock::matchers::{method, path};
  use wiremock::{Mock, MockServer, ResponseTemplate};

  fn monitor_for(uri: &str) -> HealthMonitor {
    HealthMonitor::new(
      format!("{}/health/", uri),
      Duration::from_secs(30),
      Duration::from_millis(500),
    )
    .unwrap()
  }

  #[tokio::test]
  async fn test_successful_probe_marks_healthy() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
      .and(path("/health/"))
      .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"status": "ok"})))
      .mount(&server)
      .await;

    let monitor = monitor_for(&server.uri());
    assert!(monitor.force_check().await);
    assert!(monitor.is_api_healthy());

    let snapshot = monitor.snapshot();
    assert!(snapshot.latency.is_some());
    assert!(snapshot.checked_at.is_some());
  }

  #[tokio::test]
  async fn test_error_status_marks_unhealthy() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
      .and(path("/health/"))
      .respond_with(ResponseTemplate::new(503))
      .mount(&server)
      .await;

    let monitor = monitor_for(&server.uri());
    assert!(!monitor.force_check().await);
    assert!(!monitor.is_api_healthy());
  }

  #[tokio::test]
  async fn test_unreachable_backend_marks_unhealthy() {
    // Nothing is listening on this address
    let monitor = monitor_for("http://127.0.0.1:1");
    assert!(!monitor.force_check().await);
    assert!(!monitor.is_api_healthy());
  }

  #[tokio::test]
  async fn test_recovery_transition_is_broadcast() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
      .and(path("/health/"))
      .respond_with(ResponseTemplate::new(200))
      .mount(&server)
      .await;

    let monitor = monitor_for(&server.uri());
    let mut rx = monitor.subscribe();

    monitor.set_healthy(false);
    assert!(rx.has_changed().unwrap());
    assert!(!*rx.borrow_and_update());

    monitor.force_check().await;
    assert!(rx.has_changed().unwrap());
    assert!(*rx.borrow_and_update());
  }

  #[tokio::test]
  async fn test_reads_never_block_on_probes() {
    // A monitor that has never probed still answers immediately
    let monitor = monitor_for("http://127.0.0.1:1");
    assert!(monitor.is_api_healthy());
    assert!(monitor.snapshot().latency.is_none());
  }
}
