//! Generic HTTP provider.
//!
//! Talks to a resource API that exposes:
//!
//! - `POST   {endpoint}/v1/resources`        create, returns `{id, attributes}`
//! - `PUT    {endpoint}/v1/resources/{id}`   update, returns `{attributes}`
//! - `DELETE {endpoint}/v1/resources/{id}`   delete
//!
//! Identifiers are percent-encoded as a single path segment. Throttling,
//! timeouts, server errors and network failures are reported as transient;
//! every other client error is permanent.

use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode, Url, header};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::time::Duration;
use tracing::{debug, trace};

use crate::config::ProviderConfig;
use crate::error::{ConfigError, ProviderError, Result, StrataError};

use super::api::{Provider, ProviderResult, ProvisionedResource};

/// Default request timeout in seconds.
const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Resource collection path segments.
const RESOURCES_PATH: [&str; 2] = ["v1", "resources"];

/// HTTP provider client.
#[derive(Debug, Clone)]
pub struct HttpProvider {
    /// HTTP client.
    client: Client,
    /// Base URL of the resource API.
    endpoint: Url,
    /// Bearer token, if configured.
    token: Option<String>,
}

/// Create and update request body.
#[derive(Debug, Serialize)]
struct ResourceRequest<'a> {
    kind: &'a str,
    attributes: &'a Value,
}

/// Update response body.
#[derive(Debug, Deserialize)]
struct UpdateResponse {
    #[serde(default)]
    attributes: Map<String, Value>,
}

impl HttpProvider {
    /// Creates a new HTTP provider.
    ///
    /// # Errors
    ///
    /// Returns an error if the endpoint is not an absolute URL or the HTTP
    /// client cannot be created.
    pub fn new(endpoint: &str, token: Option<String>) -> Result<Self> {
        Self::with_timeout(endpoint, token, DEFAULT_TIMEOUT_SECS)
    }

    /// Creates a provider with a custom timeout.
    ///
    /// # Errors
    ///
    /// Returns an error if the endpoint is not an absolute URL or the HTTP
    /// client cannot be created.
    pub fn with_timeout(endpoint: &str, token: Option<String>, timeout_secs: u64) -> Result<Self> {
        let endpoint = Url::parse(endpoint)
            .ok()
            .filter(|url| !url.cannot_be_a_base())
            .ok_or_else(|| ConfigError::validation(format!("Invalid provider endpoint: {endpoint}"), "provider.endpoint"))?;

        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| StrataError::internal(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            endpoint,
            token,
        })
    }

    /// Creates a provider from configuration, reading the token from the
    /// configured environment variable when it is set.
    ///
    /// # Errors
    ///
    /// Returns an error if no endpoint is configured or the client cannot be
    /// created.
    pub fn from_config(config: &ProviderConfig) -> Result<Self> {
        let endpoint = config
            .endpoint
            .as_deref()
            .ok_or_else(|| ConfigError::validation("An endpoint is required for the http provider", "provider.endpoint"))?;

        let token = std::env::var(&config.token_env).ok().filter(|t| !t.is_empty());
        if token.is_none() {
            debug!("{} is not set, sending unauthenticated requests", config.token_env);
        }

        Self::with_timeout(endpoint, token, config.timeout_secs)
    }

    fn collection_url(&self) -> Url {
        let mut url = self.endpoint.clone();
        if let Ok(mut segments) = url.path_segments_mut() {
            segments.pop_if_empty().extend(RESOURCES_PATH);
        }
        url
    }

    fn resource_url(&self, id: &str) -> Url {
        let mut url = self.collection_url();
        if let Ok(mut segments) = url.path_segments_mut() {
            segments.push(id);
        }
        url
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.token {
            Some(token) => request.header(header::AUTHORIZATION, format!("Bearer {token}")),
            None => request,
        }
    }

    /// Sends a request and classifies failures.
    async fn send(&self, request: reqwest::RequestBuilder) -> ProviderResult<Response> {
        let response = self
            .authorize(request)
            .header(header::CONTENT_TYPE, "application/json")
            .send()
            .await
            .map_err(|e| ProviderError::transient(format!("Request failed: {e}")))?;

        trace!("Provider responded with {}", response.status());
        Ok(response)
    }

    /// Parses a JSON body from a successful response.
    async fn parse<T: for<'de> Deserialize<'de>>(response: Response) -> ProviderResult<T> {
        response
            .json()
            .await
            .map_err(|e| ProviderError::permanent(format!("Failed to parse response: {e}")))
    }
}

/// Maps a non-success response to a provider error.
async fn classify(response: Response) -> ProviderError {
    let status = response.status();
    let retry_after_ms = response
        .headers()
        .get(header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.trim().parse::<u64>().ok())
        .map(|secs| secs.saturating_mul(1000));
    let body = response.text().await.unwrap_or_default();
    let message = if body.is_empty() {
        format!("HTTP {status}")
    } else {
        format!("HTTP {status}: {body}")
    };

    if is_transient_status(status) {
        ProviderError::Transient {
            message,
            retry_after_ms,
        }
    } else {
        ProviderError::Permanent { message }
    }
}

/// Returns true for statuses worth retrying.
fn is_transient_status(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS || status == StatusCode::REQUEST_TIMEOUT || status.is_server_error()
}

#[async_trait]
impl Provider for HttpProvider {
    async fn create(&self, kind: &str, attributes: &Value) -> ProviderResult<ProvisionedResource> {
        let url = self.collection_url();
        debug!("POST {url} ({kind})");
        let request = self
            .client
            .post(url)
            .json(&ResourceRequest { kind, attributes });

        let response = self.send(request).await?;
        if !response.status().is_success() {
            return Err(classify(response).await);
        }
        Self::parse(response).await
    }

    async fn update(&self, kind: &str, id: &str, attributes: &Value) -> ProviderResult<Map<String, Value>> {
        let url = self.resource_url(id);
        debug!("PUT {url} ({kind})");
        let request = self
            .client
            .put(url)
            .json(&ResourceRequest { kind, attributes });

        let response = self.send(request).await?;
        if !response.status().is_success() {
            return Err(classify(response).await);
        }
        let body: UpdateResponse = Self::parse(response).await?;
        Ok(body.attributes)
    }

    async fn delete(&self, kind: &str, id: &str) -> ProviderResult<()> {
        let url = self.resource_url(id);
        debug!("DELETE {url} ({kind})");
        let request = self.client.delete(url).query(&[("kind", kind)]);

        let response = self.send(request).await?;
        let status = response.status();
        if status.is_success() || status == StatusCode::NOT_FOUND {
            return Ok(());
        }
        Err(classify(response).await)
    }

    fn provider_type(&self) -> &'static str {
        "http"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_json, header as header_eq, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn provider(server: &MockServer) -> HttpProvider {
        HttpProvider::new(&server.uri(), Some(String::from("secret"))).expect("client builds")
    }

    #[tokio::test]
    async fn test_create_sends_kind_and_token() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/resources"))
            .and(header_eq("authorization", "Bearer secret"))
            .and(body_json(json!({ "kind": "aws:ec2/vpc", "attributes": { "cidr_block": "10.0.0.0/16" } })))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({
                "id": "vpc-42",
                "attributes": { "cidr_block": "10.0.0.0/16", "arn": "arn:vpc-42" },
            })))
            .expect(1)
            .mount(&server)
            .await;

        let created = provider(&server)
            .create("aws:ec2/vpc", &json!({ "cidr_block": "10.0.0.0/16" }))
            .await
            .expect("create succeeds");

        assert_eq!(created.id, "vpc-42");
        assert_eq!(created.attributes["arn"], json!("arn:vpc-42"));
    }

    #[tokio::test]
    async fn test_update_returns_attributes() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/v1/resources/sg-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "attributes": { "name": "web-sg" } })))
            .mount(&server)
            .await;

        let attrs = provider(&server)
            .update("aws:ec2/securityGroup", "sg-1", &json!({ "name": "web-sg" }))
            .await
            .expect("update succeeds");
        assert_eq!(attrs["name"], json!("web-sg"));
    }

    #[tokio::test]
    async fn test_throttling_is_transient_with_hint() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(429).insert_header("retry-after", "2"))
            .mount(&server)
            .await;

        let err = provider(&server).create("aws:ec2/vpc", &json!({})).await.unwrap_err();
        assert_eq!(
            err,
            ProviderError::Transient {
                message: String::from("HTTP 429 Too Many Requests"),
                retry_after_ms: Some(2000),
            }
        );
    }

    #[tokio::test]
    async fn test_server_error_is_transient() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let err = provider(&server).update("k", "x-1", &json!({})).await.unwrap_err();
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn test_client_error_is_permanent() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(400).set_body_string("invalid cidr_block"))
            .mount(&server)
            .await;

        let err = provider(&server).create("aws:ec2/vpc", &json!({})).await.unwrap_err();
        assert!(!err.is_transient());
        assert!(err.to_string().contains("invalid cidr_block"));
    }

    #[tokio::test]
    async fn test_delete_of_missing_resource_succeeds() {
        let server = MockServer::start().await;
        Mock::given(method("DELETE"))
            .and(path("/v1/resources/i-9"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        provider(&server)
            .delete("aws:ec2/instance", "i-9")
            .await
            .expect("missing resource counts as deleted");
    }

    #[tokio::test]
    async fn test_network_failure_is_transient() {
        let provider = HttpProvider::new("http://127.0.0.1:9", None).expect("client builds");
        let err = provider.delete("k", "x").await.unwrap_err();
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn test_identifier_is_one_encoded_segment() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/v1/resources/subnet%2F1%3Fx%23y"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "attributes": {} })))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("DELETE"))
            .and(path("/v1/resources/subnet%2F1%3Fx%23y"))
            .and(query_param("kind", "aws:ec2/subnet"))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        let provider = provider(&server);
        provider
            .update("aws:ec2/subnet", "subnet/1?x#y", &json!({}))
            .await
            .expect("update reaches the escaped path");
        provider
            .delete("aws:ec2/subnet", "subnet/1?x#y")
            .await
            .expect("delete reaches the escaped path");
    }

    #[test]
    fn test_endpoint_base_path_is_kept() {
        let provider = HttpProvider::new("https://api.example.com/cloud/", None).expect("client builds");
        assert_eq!(provider.collection_url().as_str(), "https://api.example.com/cloud/v1/resources");
        assert_eq!(
            provider.resource_url("a b/c").as_str(),
            "https://api.example.com/cloud/v1/resources/a%20b%2Fc"
        );
    }

    #[test]
    fn test_relative_endpoint_rejected() {
        assert!(HttpProvider::new("api.example.com", None).is_err());
        assert!(HttpProvider::new("mailto:ops@example.com", None).is_err());
    }

    #[test]
    fn test_from_config_requires_endpoint() {
        let config = ProviderConfig::default();
        assert!(HttpProvider::from_config(&config).is_err());
    }
}
