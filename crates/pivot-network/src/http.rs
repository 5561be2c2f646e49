use std::time::Duration;

use async_trait::async_trait;
use pivot_types::{config::ApiConfig, PivotError, Result};
use reqwest::Client;
use tracing::debug;

use crate::{network_error, ApiRequest, ApiResponse, HttpTransport};

/// [`HttpTransport`] backed by `reqwest`.
#[derive(Clone)]
pub struct ReqwestTransport {
    http: Client,
    base_url: String,
}

impl ReqwestTransport {
    pub fn new(config: &ApiConfig) -> Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_millis(config.request_timeout_ms))
            .build()
            .map_err(|err| {
                PivotError::Configuration(format!("failed to create HTTP client: {err}"))
            })?;
        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, request: &ApiRequest) -> String {
        format!("{}{}", self.base_url, request.path())
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn send(&self, request: &ApiRequest) -> Result<ApiResponse> {
        let url = self.url(request);
        let builder = match request {
            ApiRequest::Submit(parameters) => self.http.post(&url).json(parameters),
            ApiRequest::Status(_) => self.http.get(&url),
            ApiRequest::Report {
                depth, max_items, ..
            } => self
                .http
                .get(&url)
                .query(&[("depth", depth), ("max_items", max_items)]),
        };

        let response = builder
            .send()
            .await
            .map_err(|err| network_error(format!("{url}: {err}")))?;
        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .map_err(|err| network_error(format!("{url}: failed to read body: {err}")))?;
        debug!("{} -> {} ({} bytes)", url, status, body.len());
        Ok(ApiResponse { status, body })
    }
}
