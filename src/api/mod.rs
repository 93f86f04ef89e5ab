//! Resilient access layer for the laboratory backend.
//!
//! View code talks to [`LabClient`] instead of a raw HTTP client:
//! - Reads retry, then degrade to the durable local cache
//! - Writes degrade to the pending-operation outbox and resolve with a
//!   clearly-tagged provisional result
//! - An advisory health monitor short-circuits requests that are doomed
//!   anyway, and triggers outbox replay when the backend recovers
//! - A single refresh exchange renews the session on 401, no matter how
//!   many requests observe the expiry at once
//!
//! [`LabApi`] layers typed per-collection CRUD on top of the JSON verbs.

mod auth;
mod client;
mod error;
mod health;
mod http;
mod resources;
mod types;

pub use auth::{AuthSession, FileTokenStore, MemoryTokenStore, TokenPair, TokenStore};
pub use client::{ClientOptions, LabClient};
pub use error::ApiError;
pub use health::{HealthMonitor, HealthSnapshot};
pub use http::HttpClient;
pub use resources::{Fetched, LabApi, PageQuery, Resource};
pub use types::{ApiResponse, DataSource, RequestOptions};
