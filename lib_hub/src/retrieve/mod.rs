//! # Data Retrieval Module
//!
//! HTTP plumbing shared by the feed providers.
//!
//! - **`ky_http`**: an `ApiClient` built on `reqwest` and `reqwest-middleware`
//!   with exponential-backoff retries for transient failures and a per-request
//!   timeout.

/// Generic HTTP API client with retry middleware.
pub mod ky_http;

pub use ky_http::{ApiClient, ApiResponse};
