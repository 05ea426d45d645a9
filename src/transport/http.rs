//! HTTP transport
//!
//! Maps operations onto REST endpoints under a base URL:
//!
//! | operation         | request                                   |
//! |-------------------|-------------------------------------------|
//! | fetch collection  | `GET {base}/{type}?filter={json}`         |
//! | fetch individual  | `GET {base}/{type}/{id}`                  |
//! | create            | `POST {base}/{type}`                      |
//! | update            | `PATCH {base}/{type}/{id}`                |
//! | destroy           | `DELETE {base}/{type}/{id}`               |
//! | individual action | `POST {base}/{type}/{id}/{action}`        |
//! | collection action | `POST {base}/{type}/actions/{action}`     |

use super::Transport;
use crate::resource::{Document, WireResource};
use crate::store::canonicalize;
use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::{Client, Method, RequestBuilder};
use serde_json::{json, Value};
use url::Url;

/// Maximum length of response body to log (to avoid logging sensitive data)
const MAX_LOG_BODY_LENGTH: usize = 200;

/// Sanitize response body for logging
/// Truncates long responses and drops control characters
fn sanitize_for_log(body: &str) -> String {
    let truncated = if body.len() > MAX_LOG_BODY_LENGTH {
        let mut end = MAX_LOG_BODY_LENGTH;
        while !body.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}... [truncated, {} bytes total]", &body[..end], body.len())
    } else {
        body.to_string()
    };

    truncated.replace(|c: char| !c.is_ascii_graphic() && c != ' ', "")
}

/// HTTP transport for a JSON resource API
#[derive(Clone)]
pub struct HttpTransport {
    client: Client,
    base_url: Url,
    token: Option<String>,
}

impl HttpTransport {
    /// Create a new HTTP transport
    pub fn new(base_url: &str) -> Result<Self> {
        let base_url = Url::parse(base_url).context("Invalid base URL")?;
        if base_url.cannot_be_a_base() {
            return Err(anyhow::anyhow!("Base URL cannot carry paths: {}", base_url));
        }

        let client = Client::builder()
            .user_agent(concat!("rescache/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            base_url,
            token: None,
        })
    }

    /// Send a bearer token with every request
    pub fn with_token(mut self, token: &str) -> Self {
        self.token = Some(token.to_string());
        self
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Build `{base}/{segments...}` with each segment escaped
    fn url(&self, segments: &[&str]) -> Result<Url> {
        let mut raw = self.base_url.as_str().trim_end_matches('/').to_string();
        for segment in segments {
            raw.push('/');
            raw.push_str(&urlencoding::encode(segment));
        }
        Url::parse(&raw).context("Failed to build request URL")
    }

    fn request(&self, method: Method, url: Url) -> RequestBuilder {
        let request = self.client.request(method, url);
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    /// Send a request and parse its JSON body; empty bodies are `null`
    async fn send(&self, method: Method, url: Url, body: Option<&Value>) -> Result<Value> {
        tracing::debug!("{} {}", method, url);

        let mut request = self.request(method, url);
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request.send().await.context("Failed to send request")?;

        let status = response.status();
        let response_body = response
            .text()
            .await
            .context("Failed to read response body")?;

        if !status.is_success() {
            // Only log sanitized/truncated error body to avoid leaking sensitive data
            tracing::error!("API error: {} - {}", status, sanitize_for_log(&response_body));
            return Err(anyhow::anyhow!("API request failed: {}", status));
        }

        if response_body.trim().is_empty() {
            return Ok(Value::Null);
        }

        serde_json::from_str(&response_body).context("Failed to parse response JSON")
    }

    async fn document(&self, method: Method, url: Url, body: Option<&Value>) -> Result<Document> {
        let value = self.send(method, url, body).await?;
        if value.is_null() {
            return Ok(Document::default());
        }
        serde_json::from_value(value).context("Response is not a resource document")
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn fetch_collection(&self, resource_type: &str, filter: &Value) -> Result<Document> {
        let mut url = self.url(&[resource_type])?;
        let canonical = canonicalize(filter);
        let has_filter = canonical.as_object().map_or(!canonical.is_null(), |m| !m.is_empty());
        if has_filter {
            url.query_pairs_mut()
                .append_pair("filter", &canonical.to_string());
        }
        self.document(Method::GET, url, None).await
    }

    async fn fetch_individual(&self, resource_type: &str, id: &str) -> Result<Document> {
        let url = self.url(&[resource_type, id])?;
        self.document(Method::GET, url, None).await
    }

    async fn create(&self, resource_type: &str, resource: &WireResource) -> Result<Document> {
        let url = self.url(&[resource_type])?;
        let body = json!({ "data": resource });
        self.document(Method::POST, url, Some(&body)).await
    }

    async fn update(
        &self,
        resource_type: &str,
        id: &str,
        resource: &WireResource,
    ) -> Result<Document> {
        let url = self.url(&[resource_type, id])?;
        let body = json!({ "data": resource });
        self.document(Method::PATCH, url, Some(&body)).await
    }

    async fn destroy(&self, resource_type: &str, id: &str) -> Result<()> {
        let url = self.url(&[resource_type, id])?;
        self.send(Method::DELETE, url, None).await?;
        Ok(())
    }

    async fn action(
        &self,
        resource_type: &str,
        action: &str,
        id: Option<&str>,
        arguments: &Value,
    ) -> Result<Value> {
        let url = match id {
            Some(id) => self.url(&[resource_type, id, action])?,
            None => self.url(&[resource_type, "actions", action])?,
        };
        self.send(Method::POST, url, Some(arguments)).await
    }
}

/// Format a transport error for display
/// Maps status codes to generic messages so API details are not echoed to users
pub fn format_transport_error(error: &anyhow::Error) -> String {
    let error_str = error.to_string();

    if error_str.contains("403") {
        return "Permission denied.".to_string();
    }
    if error_str.contains("401") {
        return "Authentication failed. Check your API token.".to_string();
    }
    if error_str.contains("404") {
        return "Resource not found.".to_string();
    }
    if error_str.contains("429") {
        return "Rate limit exceeded. Please try again later.".to_string();
    }
    if error_str.contains("400") || error_str.contains("422") {
        return "Invalid request. Check your parameters.".to_string();
    }
    if error_str.contains("409") {
        return "Resource conflict. The resource may already exist or be in use.".to_string();
    }
    if error_str.contains("500") || error_str.contains("503") {
        return "Service temporarily unavailable. Please try again.".to_string();
    }
    if error_str.contains("API request failed") {
        return "Request failed. Check your network connection and try again.".to_string();
    }

    let sanitized = error_str
        .chars()
        .filter(|c| c.is_ascii_graphic() || *c == ' ')
        .take(80)
        .collect::<String>();

    if sanitized.len() < error_str.len() {
        format!("{}...", sanitized)
    } else {
        sanitized
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_truncates_long_bodies() {
        let body = "x".repeat(500);
        let sanitized = sanitize_for_log(&body);
        assert!(sanitized.starts_with(&"x".repeat(MAX_LOG_BODY_LENGTH)));
        assert!(sanitized.contains("500 bytes total"));
    }

    #[test]
    fn test_sanitize_strips_control_characters() {
        assert_eq!(sanitize_for_log("a\nb\tc"), "abc");
    }

    #[test]
    fn test_url_escapes_segments() {
        let transport = HttpTransport::new("http://localhost:8080/api/").unwrap();
        let url = transport.url(&["posts", "a/b c"]).unwrap();
        assert_eq!(url.as_str(), "http://localhost:8080/api/posts/a%2Fb%20c");
    }

    #[test]
    fn test_rejects_invalid_base_url() {
        assert!(HttpTransport::new("not a url").is_err());
        assert!(HttpTransport::new("mailto:someone@example.com").is_err());
    }

    #[test]
    fn test_format_transport_error() {
        let err = anyhow::anyhow!("API request failed: 404 Not Found");
        assert_eq!(format_transport_error(&err), "Resource not found.");

        let err = anyhow::anyhow!("API request failed: 418 I'm a teapot");
        assert_eq!(
            format_transport_error(&err),
            "Request failed. Check your network connection and try again."
        );

        let err = anyhow::anyhow!("{}", "e".repeat(100));
        assert!(format_transport_error(&err).ends_with("..."));
    }
}
