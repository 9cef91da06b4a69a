//! Shared HTTP client factory.
//!
//! Provides consistent HTTP client configuration across the codebase.

use crate::error::ProxyError;
use reqwest::{redirect, Client};
use std::time::Duration;

/// Default timeout for one-shot calls such as credential validation (30 seconds).
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Connect timeout for proxied calls (10 seconds).
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Create the client used for proxying.
///
/// Proxied calls carry no overall timeout so long streams are never cut, and
/// redirects are handed back to the caller untouched.
pub fn create_proxy_client() -> Result<Client, ProxyError> {
    Client::builder()
        .connect_timeout(CONNECT_TIMEOUT)
        .redirect(redirect::Policy::none())
        .build()
        .map_err(|e| ProxyError::Internal(format!("Failed to create HTTP client: {}", e)))
}

/// Create a new HTTP client with the default timeout.
pub fn create_client() -> Result<Client, ProxyError> {
    create_client_with_timeout(DEFAULT_TIMEOUT)
}

/// Create a new HTTP client with a custom timeout.
pub fn create_client_with_timeout(timeout: Duration) -> Result<Client, ProxyError> {
    Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| ProxyError::Internal(format!("Failed to create HTTP client: {}", e)))
}
