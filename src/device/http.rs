//! reqwest-backed HTTP collaborator

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Method;
use tracing::debug;

use super::{HttpClient, HttpRequest, HttpResponse};
use crate::common::config::HttpConfig;
use crate::common::{Error, Result};

pub struct ReqwestHttpClient {
    client: reqwest::Client,
    base_url: Option<String>,
    default_headers: BTreeMap<String, String>,
}

impl ReqwestHttpClient {
    pub fn new(config: &HttpConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            client,
            base_url: config.base_url.clone(),
            default_headers: config.default_headers.clone(),
        })
    }

    /// Resolve a request URL against the configured base URL
    pub fn resolve_url(&self, url: &str) -> String {
        join_url(self.base_url.as_deref(), url)
    }
}

fn join_url(base: Option<&str>, url: &str) -> String {
    if url.starts_with("http://") || url.starts_with("https://") {
        return url.to_string();
    }
    match base {
        Some(base) => format!(
            "{}/{}",
            base.trim_end_matches('/'),
            url.trim_start_matches('/')
        ),
        None => url.to_string(),
    }
}

#[async_trait]
impl HttpClient for ReqwestHttpClient {
    async fn request(&self, request: &HttpRequest) -> Result<HttpResponse> {
        let method = Method::from_bytes(request.method.as_bytes())
            .map_err(|_| Error::Config(format!("Invalid HTTP method '{}'", request.method)))?;
        let url = self.resolve_url(&request.url);
        debug!(method = %method, url = %url, "http request");

        let mut builder = self.client.request(method, &url);
        for (name, value) in self.default_headers.iter().chain(request.headers.iter()) {
            builder = builder.header(name, value);
        }
        if let Some(body) = &request.body {
            builder = builder.body(body.clone());
        }

        let response = builder.send().await?;
        let status = response.status().as_u16();
        let body = response.text().await?;
        debug!(status, "http response");

        Ok(HttpResponse { status, body })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_join_url() {
        assert_eq!(
            join_url(Some("https://api.test/"), "/v1/credits"),
            "https://api.test/v1/credits"
        );
        assert_eq!(
            join_url(Some("https://api.test"), "https://other.test/x"),
            "https://other.test/x"
        );
        assert_eq!(join_url(None, "/health"), "/health");
    }

    #[test]
    fn test_client_builds_from_default_config() {
        let client = ReqwestHttpClient::new(&HttpConfig::default()).unwrap();
        assert_eq!(client.resolve_url("https://a.test/b"), "https://a.test/b");
    }
}
