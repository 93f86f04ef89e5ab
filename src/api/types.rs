//! Request options and the response envelope returned by the resilient client.

use serde_json::Value;

/// Per-call knobs for the resilient request methods.
#[derive(Debug, Clone, Default)]
pub struct RequestOptions {
  /// Cache key for reads; defaults to the endpoint (path + query)
  pub cache_key: Option<String>,
  /// Cache validity for this read, in minutes; defaults from config
  pub ttl_minutes: Option<i64>,
  /// Attempt budget for this call; defaults from config
  pub retries: Option<u32>,
  /// Skip the network entirely and behave as if the backend were down
  pub force_offline: bool,
}

impl RequestOptions {
  pub fn with_cache_key(mut self, key: impl Into<String>) -> Self {
    self.cache_key = Some(key.into());
    self
  }

  pub fn with_ttl_minutes(mut self, minutes: i64) -> Self {
    self.ttl_minutes = Some(minutes);
    self
  }

  pub fn with_retries(mut self, retries: u32) -> Self {
    self.retries = Some(retries);
    self
  }

  pub fn offline() -> Self {
    Self {
      force_offline: true,
      ..Self::default()
    }
  }
}

/// Where the data in an [`ApiResponse`] came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataSource {
  /// Confirmed by the backend
  Network,
  /// Served from the local cache because the network was unavailable
  Cache,
  /// Synthesized locally for a mutation that is queued for later replay
  Offline,
}

/// Result of a resilient request, with provenance the UI can surface.
#[derive(Debug, Clone)]
pub struct ApiResponse {
  pub data: Value,
  pub source: DataSource,
  /// True when a cached value was past its TTL at serve time
  pub stale: bool,
  /// The failure that forced a fallback, if any
  pub error: Option<String>,
}

impl ApiResponse {
  pub fn from_network(data: Value) -> Self {
    Self {
      data,
      source: DataSource::Network,
      stale: false,
      error: None,
    }
  }

  pub fn from_cache(data: Value, stale: bool, error: Option<String>) -> Self {
    Self {
      data,
      source: DataSource::Cache,
      stale,
      error,
    }
  }

  pub fn offline(data: Value) -> Self {
    Self {
      data,
      source: DataSource::Offline,
      stale: false,
      error: None,
    }
  }

  /// Anything not confirmed by the backend on this call.
  pub fn is_provisional(&self) -> bool {
    self.source != DataSource::Network
  }

  /// Fold the provenance into the payload itself.
  ///
  /// Object payloads gain `_fromCache` / `_isOffline` markers (and
  /// `_offlineError` with the triggering failure) so thin view code can
  /// flag provisional data without carrying the envelope around. Arrays
  /// and scalars pass through untouched.
  pub fn into_annotated(self) -> Value {
    let mut value = self.data;

    if let Value::Object(map) = &mut value {
      match self.source {
        DataSource::Network => {}
        DataSource::Cache => {
          map.insert("_fromCache".to_string(), Value::Bool(true));
          if let Some(err) = self.error {
            map.insert("_offlineError".to_string(), Value::String(err));
          }
        }
        DataSource::Offline => {
          map.insert("_isOffline".to_string(), Value::Bool(true));
        }
      }
    }

    value
  }
}
