//! hemolab - resilient client for a clinical laboratory / blood-bank API.
//!
//! The backend is a plain REST service; what this crate adds is the ability
//! to keep working when it is unreachable. Reads degrade to a durable local
//! cache, writes degrade to a durable pending-operation outbox that is
//! replayed when connectivity returns, and everything the client hands back
//! is tagged with its provenance so callers can tell confirmed data from
//! provisional data.

pub mod api;
pub mod cache;
pub mod commands;
pub mod config;
pub mod models;
pub mod outbox;

pub use api::{ApiError, ApiResponse, DataSource, LabApi, LabClient, RequestOptions};
pub use config::Config;
