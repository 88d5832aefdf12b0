//! Google Drive API client
//!
//! Typed HTTP plumbing shared by the provider: bearer authentication,
//! base-URL construction (overridable for tests), JSON helpers, and the
//! retry-once policy for transient connectivity faults.

use std::future::Future;
use std::time::Duration;

use anyhow::{Context, Result};
use reqwest::{Client, Method, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

/// Base URL for Google Drive API v3 metadata calls
const DRIVE_BASE_URL: &str = "https://www.googleapis.com/drive/v3";

/// Base URL for Google Drive API v3 media uploads
const DRIVE_UPLOAD_URL: &str = "https://www.googleapis.com/upload/drive/v3";

/// Wait between the first attempt and the single retry
const RETRY_DELAY: Duration = Duration::from_secs(2);

// ============================================================================
// Retry-once policy
// ============================================================================

/// Determines whether an error is a connection-reset-class fault.
///
/// Only these faults are retried; auth, not-found, and quota failures
/// propagate immediately so the caller can abandon the action.
pub fn is_connection_reset(err: &anyhow::Error) -> bool {
    let err_str = format!("{err:#}").to_lowercase();

    err_str.contains("connection reset")
        || err_str.contains("reset by peer")
        || err_str.contains("broken pipe")
        || err_str.contains("connection closed")
        || err_str.contains("connection aborted")
        || err_str.contains("unexpected eof")
}

/// Executes an async operation, retrying exactly once after 2 seconds if
/// the first attempt failed with a connection-reset-class fault.
pub async fn try_twice<F, Fut, T>(operation: &str, f: F) -> Result<T>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    match f().await {
        Ok(value) => Ok(value),
        Err(err) if is_connection_reset(&err) => {
            warn!(
                operation,
                error = %err,
                "Transient connectivity fault, retrying once"
            );
            tokio::time::sleep(RETRY_DELAY).await;
            f().await
        }
        Err(err) => Err(err),
    }
}

// ============================================================================
// DriveClient
// ============================================================================

/// HTTP client for Google Drive API calls
///
/// Wraps `reqwest::Client` with bearer authentication and base URL
/// construction. The base URLs can be overridden to point at a stub
/// server in tests.
pub struct DriveClient {
    /// The underlying HTTP client
    client: Client,
    /// Base URL for metadata requests
    base_url: String,
    /// Base URL for media upload requests
    upload_url: String,
    /// OAuth2 bearer token supplied by the caller
    access_token: String,
}

impl DriveClient {
    /// Creates a new DriveClient with the given access token
    pub fn new(access_token: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            base_url: DRIVE_BASE_URL.to_string(),
            upload_url: DRIVE_UPLOAD_URL.to_string(),
            access_token: access_token.into(),
        }
    }

    /// Creates a DriveClient with custom base URLs (useful for testing)
    pub fn with_base_url(
        access_token: impl Into<String>,
        base_url: impl Into<String>,
        upload_url: impl Into<String>,
    ) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into(),
            upload_url: upload_url.into(),
            access_token: access_token.into(),
        }
    }

    /// Builds an authenticated request against the metadata base URL.
    pub fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let url = format!("{}{}", self.base_url, path);
        debug!(%method, %url, "Drive API request");
        self.client
            .request(method, url)
            .bearer_auth(&self.access_token)
    }

    /// Builds an authenticated request against the upload base URL.
    pub fn upload_request(&self, method: Method, path: &str) -> RequestBuilder {
        let url = format!("{}{}", self.upload_url, path);
        debug!(%method, %url, "Drive API upload request");
        self.client
            .request(method, url)
            .bearer_auth(&self.access_token)
    }

    /// Sends a request and deserializes the JSON response body.
    ///
    /// Non-success statuses are surfaced with the response text so quota
    /// and auth failures carry the server's explanation.
    pub async fn send_json<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T> {
        let response = request.send().await.context("Drive API request failed")?;
        let response = Self::check_status(response).await?;
        response
            .json::<T>()
            .await
            .context("Failed to decode Drive API response")
    }

    /// Sends a request and returns the raw response for streaming.
    pub async fn send_raw(&self, request: RequestBuilder) -> Result<Response> {
        let response = request.send().await.context("Drive API request failed")?;
        Self::check_status(response).await
    }

    /// Maps non-success statuses to errors carrying the body text.
    async fn check_status(response: Response) -> Result<Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        anyhow::bail!("Drive API returned {status}: {body}")
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;

    #[test]
    fn test_connection_reset_detected() {
        let err = anyhow::anyhow!("error sending request: connection reset by peer");
        assert!(is_connection_reset(&err));

        let err = anyhow::anyhow!("Broken pipe (os error 32)");
        assert!(is_connection_reset(&err));
    }

    #[test]
    fn test_permanent_errors_not_retried() {
        let err = anyhow::anyhow!("Drive API returned 401 Unauthorized: invalid token");
        assert!(!is_connection_reset(&err));

        let err = anyhow::anyhow!("Drive API returned 404 Not Found: file missing");
        assert!(!is_connection_reset(&err));

        let err = anyhow::anyhow!("Drive API returned 403: quota exceeded");
        assert!(!is_connection_reset(&err));
    }

    #[tokio::test(start_paused = true)]
    async fn test_try_twice_retries_connection_reset() {
        let attempts = AtomicU32::new(0);
        let result = try_twice("op", || {
            let n = attempts.fetch_add(1, Ordering::SeqCst);
            async move {
                if n == 0 {
                    Err(anyhow::anyhow!("connection reset by peer"))
                } else {
                    Ok(42)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_try_twice_gives_up_after_second_failure() {
        let attempts = AtomicU32::new(0);
        let result: Result<u32> = try_twice("op", || {
            attempts.fetch_add(1, Ordering::SeqCst);
            async { Err(anyhow::anyhow!("connection reset by peer")) }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_try_twice_propagates_permanent_errors() {
        let attempts = AtomicU32::new(0);
        let result: Result<u32> = try_twice("op", || {
            attempts.fetch_add(1, Ordering::SeqCst);
            async { Err(anyhow::anyhow!("Drive API returned 403: quota exceeded")) }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }
}
