//! Outbound access layer for a remote translation-management service.
//!
//! Every call goes through a FIFO [`rate_limit::RateLimiter`] and a TTL
//! [`cache::ResponseCache`]; cache hits hand their quota slot back. Bulk reads
//! use [`batch::fetch_in_batches`]. [`service::TranslationService`] is the
//! entity-level façade and [`server`] exposes it over HTTP.

pub mod batch;
pub mod cache;
pub mod client;
pub mod config;
pub mod error;
pub mod models;
pub mod rate_limit;
pub mod retry;
pub mod server;
pub mod service;
pub mod transport;

pub use client::{ApiResponse, TranslationClient};
pub use config::Config;
pub use error::{SyncError, TransportError};
pub use models::{ModelRecord, ModelType, SyncOutcome, TranslationOptions};
pub use service::TranslationService;
