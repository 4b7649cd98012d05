pub mod auth;
pub mod auth_methods;
pub mod devices;
pub mod groups;
pub mod mail;
pub mod query;
pub mod roles;
pub mod sign_ins;

use crate::config::ConfigManager;
use crate::error::{ReportError, Result};
use query::CollectionQuery;
use reqwest::{Client, Method, Response};
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub const GRAPH_API_BASE: &str = "https://graph.microsoft.com/v1.0";
pub const GRAPH_API_BETA: &str = "https://graph.microsoft.com/beta";

const MAX_RETRIES: u32 = 3;
const INITIAL_BACKOFF_MS: u64 = 1000;
const MAX_BACKOFF_MS: u64 = 30000;
const JITTER_FACTOR: f64 = 0.3; // +/- 30% jitter

/// How transient failures (429, 5xx, connection errors) are retried
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: MAX_RETRIES,
            initial_backoff: Duration::from_millis(INITIAL_BACKOFF_MS),
            max_backoff: Duration::from_millis(MAX_BACKOFF_MS),
        }
    }
}

impl RetryPolicy {
    /// Exponential backoff with jitter for the given zero-based attempt
    fn backoff(&self, attempt: u32) -> Duration {
        let initial = self.initial_backoff.as_millis() as u64;
        let capped = initial
            .saturating_mul(2u64.saturating_pow(attempt))
            .min(self.max_backoff.as_millis() as u64);

        let jitter_range = (capped as f64 * JITTER_FACTOR) as u64;
        let jitter = if jitter_range > 0 {
            use std::hash::{Hash, Hasher};
            let mut hasher = std::collections::hash_map::DefaultHasher::new();
            std::time::SystemTime::now().hash(&mut hasher);
            (hasher.finish() % (jitter_range * 2)) as i64 - jitter_range as i64
        } else {
            0
        };

        Duration::from_millis((capped as i64 + jitter).max(0) as u64)
    }
}

/// Graph API client with throttling support
pub struct GraphClient {
    client: Client,
    access_token: String,
    base_url: String,
    beta_url: String,
    retry: RetryPolicy,
}

impl GraphClient {
    pub fn new(access_token: String) -> Self {
        Self::with_base_urls(access_token, GRAPH_API_BASE, GRAPH_API_BETA)
    }

    /// Point the client at another Graph root (national clouds, mock servers)
    pub fn with_base_urls(access_token: String, base_url: &str, beta_url: &str) -> Self {
        Self {
            client: Client::new(),
            access_token,
            base_url: base_url.trim_end_matches('/').to_string(),
            beta_url: beta_url.trim_end_matches('/').to_string(),
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Create a GraphClient for a configured tenant using its cached token
    pub async fn from_config(config: &ConfigManager, tenant_name: &str) -> Result<Self> {
        let graph_auth = auth::GraphAuth::new(config.clone());
        let access_token = graph_auth.get_access_token(tenant_name).await?;

        Ok(Self::new(access_token))
    }

    fn url_for(&self, endpoint: &str, beta: bool) -> String {
        let base = if beta { &self.beta_url } else { &self.base_url };
        format!("{}/{}", base, endpoint.trim_start_matches('/'))
    }

    /// GET a single object from the v1.0 endpoint
    pub async fn get<T: for<'de> Deserialize<'de>>(&self, endpoint: &str) -> Result<T> {
        self.get_url(&self.url_for(endpoint, false)).await
    }

    /// GET a single object from the beta endpoint
    pub async fn get_beta<T: for<'de> Deserialize<'de>>(&self, endpoint: &str) -> Result<T> {
        self.get_url(&self.url_for(endpoint, true)).await
    }

    /// POST a JSON body to the v1.0 endpoint, ignoring any response body
    pub async fn post_no_content<T: Serialize>(&self, endpoint: &str, body: &T) -> Result<()> {
        let body = serde_json::to_value(body)?;
        self.send(Method::POST, &self.url_for(endpoint, false), Some(&body))
            .await?;
        Ok(())
    }

    /// DELETE on the v1.0 endpoint
    pub async fn delete(&self, endpoint: &str) -> Result<()> {
        self.send(Method::DELETE, &self.url_for(endpoint, false), None)
            .await?;
        Ok(())
    }

    /// `@odata.id` reference to a directory object, as `$ref` bodies expect
    pub fn directory_object_ref(&self, object_id: &str) -> String {
        format!("{}/directoryObjects/{}", self.base_url, query::path_key(object_id))
    }

    /// GET an absolute URL, retrying throttled and transient failures
    async fn get_url<T: for<'de> Deserialize<'de>>(&self, url: &str) -> Result<T> {
        let resp = self.send(Method::GET, url, None).await?;
        Ok(resp.json::<T>().await?)
    }

    /// Send one request, retrying 429, 5xx and connection errors
    ///
    /// Any other non-success status is returned as `GraphApiError`.
    async fn send(
        &self,
        method: Method,
        url: &str,
        body: Option<&serde_json::Value>,
    ) -> Result<Response> {
        let mut last_error = None;

        for attempt in 0..self.retry.max_attempts {
            let mut request = self
                .client
                .request(method.clone(), url)
                .bearer_auth(&self.access_token);
            if let Some(body) = body {
                request = request.json(body);
            }

            match request.send().await {
                Ok(resp) => {
                    let status = resp.status();
                    let last_attempt = attempt + 1 >= self.retry.max_attempts;

                    if status == reqwest::StatusCode::TOO_MANY_REQUESTS && !last_attempt {
                        let retry_after = resp
                            .headers()
                            .get("Retry-After")
                            .and_then(|v| v.to_str().ok())
                            .and_then(|v| v.parse::<u64>().ok())
                            .map(Duration::from_secs)
                            .unwrap_or_else(|| self.retry.backoff(attempt));

                        tracing::warn!(
                            "Rate limited (429). Retrying in {:?} (attempt {}/{})",
                            retry_after,
                            attempt + 1,
                            self.retry.max_attempts
                        );
                        tokio::time::sleep(retry_after).await;
                        continue;
                    }

                    if status.is_server_error() && !last_attempt {
                        let wait_time = self.retry.backoff(attempt);
                        tracing::warn!(
                            "Server error ({}). Retrying in {:?} (attempt {}/{})",
                            status,
                            wait_time,
                            attempt + 1,
                            self.retry.max_attempts
                        );
                        tokio::time::sleep(wait_time).await;
                        continue;
                    }

                    if !status.is_success() {
                        let error_text = resp.text().await.unwrap_or_default();
                        let enhanced_error = crate::error::enhance_graph_error(&error_text);
                        return Err(ReportError::GraphApiError(format!(
                            "HTTP {}: {}",
                            status, enhanced_error
                        )));
                    }

                    return Ok(resp);
                }
                Err(e) => {
                    if attempt + 1 < self.retry.max_attempts {
                        let wait_time = self.retry.backoff(attempt);
                        tracing::warn!(
                            "Connection error: {}. Retrying in {:?} (attempt {}/{})",
                            e,
                            wait_time,
                            attempt + 1,
                            self.retry.max_attempts
                        );
                        tokio::time::sleep(wait_time).await;
                        last_error = Some(e);
                        continue;
                    }
                    return Err(e.into());
                }
            }
        }

        Err(last_error.map(|e| e.into()).unwrap_or_else(|| {
            ReportError::GraphApiError(format!(
                "{} {} failed after {} attempts",
                method, url, self.retry.max_attempts
            ))
        }))
    }
}

// ============================================================================
// Pagination
// ============================================================================

/// Standard OData page: a `value` array and an optional `@odata.nextLink`
#[derive(Debug, Deserialize)]
pub struct PaginatedResponse<T> {
    #[serde(default = "Vec::new")]
    pub value: Vec<T>,
    #[serde(rename = "@odata.nextLink")]
    pub next_link: Option<String>,
}

impl GraphClient {
    /// Fetch every record of a collection
    ///
    /// Requests the first page from `query` and follows `@odata.nextLink`
    /// until the service stops returning one. Records keep service order.
    pub async fn get_all_pages<T: for<'de> Deserialize<'de>>(
        &self,
        query: &CollectionQuery,
    ) -> Result<Vec<T>> {
        self.get_all_pages_observed(query, |_| {}).await
    }

    /// Like `get_all_pages`, calling `on_page` with the running record count after each page
    pub async fn get_all_pages_observed<T, F>(
        &self,
        query: &CollectionQuery,
        mut on_page: F,
    ) -> Result<Vec<T>>
    where
        T: for<'de> Deserialize<'de>,
        F: FnMut(usize),
    {
        let mut all_items: Vec<T> = Vec::new();
        let mut current_url = self.url_for(&query.to_endpoint(), query.beta);
        let mut pages = 0usize;

        loop {
            let page: PaginatedResponse<T> = self.get_url(&current_url).await?;
            pages += 1;
            all_items.extend(page.value);
            on_page(all_items.len());

            tracing::debug!(
                path = %query.path,
                page = pages,
                total = all_items.len(),
                "fetched page"
            );

            match page.next_link {
                Some(next) => current_url = next,
                None => break,
            }
        }

        Ok(all_items)
    }
}
