//! Replay of queued mutations against the backend.

use color_eyre::Result;
use reqwest::Method;
use tracing::{info, warn};

use crate::api::HttpClient;

use super::{OpKind, OutboxQueue};

impl OpKind {
  /// HTTP method this operation replays with.
  pub fn method(&self) -> Method {
    match self {
      Self::Create => Method::POST,
      Self::Update => Method::PUT,
      Self::Delete => Method::DELETE,
    }
  }
}

/// Outcome of one drain pass.
#[derive(Debug, Clone, Default)]
pub struct DrainReport {
  /// Operations confirmed by the backend and removed from the queue
  pub replayed: usize,
  /// Operations the backend rejected outright; kept with their error
  pub skipped: usize,
  /// Id of the operation a transient failure stopped the pass at
  pub stopped_at: Option<i64>,
}

/// Replay queued operations in insertion order.
///
/// A confirmed operation is removed. A permanent rejection (4xx) is
/// recorded and skipped so one bad payload cannot block the queue forever.
/// A transient failure records its error and stops the pass; the remaining
/// operations keep their order for the next attempt.
pub async fn drain(queue: &dyn OutboxQueue, http: &HttpClient) -> Result<DrainReport> {
  let operations = queue.list()?;
  let mut report = DrainReport::default();

  if operations.is_empty() {
    return Ok(report);
  }

  info!("Replaying {} queued operation(s)", operations.len());

  for op in operations {
    let result = http
      .send(op.kind.method(), &op.endpoint, op.payload.as_ref())
      .await;

    match result {
      Ok(_) => {
        info!("{} {} confirmed", op.kind, op.endpoint);
        queue.remove(op.id)?;
        report.replayed += 1;
      }
      Err(err) if err.is_permanent() => {
        warn!(
          "{} {} rejected by backend, leaving for review: {}",
          op.kind, op.endpoint, err
        );
        queue.record_error(op.id, &err.to_string())?;
        report.skipped += 1;
      }
      Err(err) => {
        warn!(
          "{} {} failed ({}); stopping replay until the backend recovers",
          op.kind, op.endpoint, err
        );
        queue.record_error(op.id, &err.to_string())?;
        report.stopped_at = Some(op.id);
        break;
      }
    }
  }

  Ok(report)
}
