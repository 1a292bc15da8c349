use std::time::Duration;

use reqwest::{Client, RequestBuilder};
use serde::de::DeserializeOwned;

use crate::ports::ProviderError;

/// Default bound on every outbound provider request
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// Connection settings shared by all HTTP providers
#[derive(Debug, Clone)]
pub struct ProviderSettings {
    /// API root, without trailing slash
    pub base_url: String,
    pub api_key: Option<String>,
    pub timeout: Duration,
}

impl ProviderSettings {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: None,
            timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }

    pub fn with_api_key(mut self, api_key: Option<String>) -> Self {
        self.api_key = api_key.filter(|k| !k.is_empty());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub(crate) fn build_client(&self) -> Result<Client, ProviderError> {
        Client::builder()
            .timeout(self.timeout)
            .user_agent(concat!("payrelay/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| ProviderError::Unavailable(format!("Failed to create HTTP client: {}", e)))
    }
}

/// Send a request and decode a JSON body.
///
/// Non-success statuses map to `Unavailable`; bodies that do not match `T`
/// map to `InvalidResponse`.
pub(crate) async fn get_json<T: DeserializeOwned>(request: RequestBuilder) -> Result<T, ProviderError> {
    let response = request.send().await?;
    let status = response.status();
    let body = response.text().await?;

    if !status.is_success() {
        return Err(ProviderError::from_status(status, &body));
    }

    serde_json::from_str(&body).map_err(|e| {
        let snippet: String = body.chars().take(120).collect();
        ProviderError::InvalidResponse(format!("{} in {:?}", e, snippet))
    })
}
