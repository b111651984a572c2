//! API client
//!
//! Single entry point for every HTTP call the core makes. Transport failures,
//! non-2xx statuses and body shape surprises are all folded into the
//! `{data, error}` value.

use bridge_traits::http::{HttpClient, HttpMethod, HttpRequest, HttpResponse};
use core_runtime::config::CoreConfig;
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, instrument, warn};

use crate::error::{ApiError, ApiResponse};
use crate::models::{Comment, CountryStat, Image, Project, Track, ViewStats};
use crate::resource::{ResourceName, ResourceShape};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

pub const NOT_AN_OBJECT: &str = "Response is not an object";

/// Method, headers and body of an API call
#[derive(Debug, Clone, PartialEq)]
pub struct RequestOptions {
    pub method: HttpMethod,
    pub headers: HashMap<String, String>,
    pub body: Option<Value>,
}

impl Default for RequestOptions {
    fn default() -> Self {
        Self {
            method: HttpMethod::Get,
            headers: HashMap::new(),
            body: None,
        }
    }
}

impl RequestOptions {
    pub fn get() -> Self {
        Self::default()
    }

    pub fn post(body: Value) -> Self {
        Self {
            method: HttpMethod::Post,
            body: Some(body),
            ..Self::default()
        }
    }

    pub fn method(mut self, method: HttpMethod) -> Self {
        self.method = method;
        self
    }

    pub fn header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    pub fn body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }
}

/// Request layer over an injected [`HttpClient`]
#[derive(Clone)]
pub struct ApiClient {
    http_client: Arc<dyn HttpClient>,
    base_url: String,
}

impl ApiClient {
    /// Create a client resolving relative paths against `base_url`.
    pub fn new(http_client: Arc<dyn HttpClient>, base_url: impl Into<String>) -> Self {
        let base_url: String = base_url.into();
        Self {
            http_client,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    pub fn from_config(config: &CoreConfig) -> Self {
        Self::new(Arc::clone(&config.http_client), config.api_base())
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Resolve an API path; absolute URLs pass through.
    pub fn url_for(&self, path: &str) -> String {
        if path.starts_with("http://") || path.starts_with("https://") {
            return path.to_string();
        }
        if path.starts_with('/') {
            format!("{}{}", self.base_url, path)
        } else {
            format!("{}/{}", self.base_url, path)
        }
    }

    /// Issue a call and return the raw JSON body.
    ///
    /// An empty success body is `Value::Null`.
    #[instrument(skip(self, options), fields(method = options.method.as_str()))]
    pub async fn request_value(&self, path: &str, options: RequestOptions) -> ApiResponse<Value> {
        let url = self.url_for(path);

        let mut request = HttpRequest::new(options.method, url)
            .header("Accept", "application/json")
            .timeout(DEFAULT_TIMEOUT);
        if let Some(body) = &options.body {
            request = match request.json(body) {
                Ok(request) => request,
                Err(e) => return ApiResponse::failed(Value::Null, ApiError::shape(e.to_string())),
            };
        }
        for (key, value) in options.headers {
            request = request.header(key, value);
        }

        let response = match self.http_client.execute(request).await {
            Ok(response) => response,
            Err(e) => {
                warn!(path, error = %e, "Request failed before a response arrived");
                return ApiResponse::failed(Value::Null, ApiError::network(e.to_string()));
            }
        };

        if !response.is_success() {
            let error = http_error(&response);
            warn!(path, status = response.status, message = %error.message, "Request returned an error status");
            return ApiResponse::failed(Value::Null, error);
        }

        if response.body.iter().all(u8::is_ascii_whitespace) {
            return ApiResponse::ok(Value::Null);
        }

        match serde_json::from_slice::<Value>(&response.body) {
            Ok(value) => {
                debug!(path, status = response.status, "Request succeeded");
                ApiResponse::ok(value)
            }
            Err(e) => ApiResponse::failed(
                Value::Null,
                ApiError::shape(format!("Invalid JSON response: {}", e))
                    .with_status(response.status),
            ),
        }
    }

    /// Issue a call and parse the body as `T`.
    pub async fn request<T: DeserializeOwned>(
        &self,
        path: &str,
        options: RequestOptions,
    ) -> ApiResponse<Option<T>> {
        let response = self.request_value(path, options).await;
        if let Some(error) = response.error {
            return ApiResponse::failed(None, error);
        }
        match serde_json::from_value(response.data) {
            Ok(data) => ApiResponse::ok(Some(data)),
            Err(e) => ApiResponse::failed(
                None,
                ApiError::shape(format!("Unexpected response shape: {}", e)),
            ),
        }
    }

    /// Issue a call and coerce the body into a list.
    ///
    /// `null` becomes `[]` and a bare value becomes a one-element list. This
    /// leniency is deliberate; a body that still fails to parse as `T`
    /// degrades to `[]` with a `ShapeMismatch` error.
    pub async fn fetch_array<T: DeserializeOwned>(
        &self,
        path: &str,
        options: RequestOptions,
    ) -> ApiResponse<Vec<T>> {
        let response = self.request_value(path, options).await;
        if let Some(error) = response.error {
            return ApiResponse::failed(Vec::new(), error);
        }
        match parse_array(response.data) {
            Ok(items) => ApiResponse::ok(items),
            Err(error) => ApiResponse::failed(Vec::new(), error),
        }
    }

    /// Issue a call and require a JSON object (or `null`) body.
    pub async fn fetch_object<T: DeserializeOwned>(
        &self,
        path: &str,
        options: RequestOptions,
    ) -> ApiResponse<Option<T>> {
        let response = self.request_value(path, options).await;
        if let Some(error) = response.error {
            return ApiResponse::failed(None, error);
        }
        match parse_object(response.data) {
            Ok(data) => ApiResponse::ok(data),
            Err(error) => ApiResponse::failed(None, error),
        }
    }

    /// Fetch a resource's full current state in its declared shape.
    ///
    /// Used for fetch-on-notify: the result is what listeners receive.
    pub async fn fetch_resource(&self, resource: ResourceName) -> ApiResponse<Value> {
        match resource.shape() {
            ResourceShape::Array => self
                .fetch_array::<Value>(resource.endpoint(), RequestOptions::get())
                .await
                .map(Value::Array),
            ResourceShape::Object => self
                .fetch_object::<Value>(resource.endpoint(), RequestOptions::get())
                .await
                .map(|data| data.unwrap_or(Value::Null)),
        }
    }

    pub async fn images(&self) -> ApiResponse<Vec<Image>> {
        self.fetch_array(ResourceName::Images.endpoint(), RequestOptions::get())
            .await
    }

    pub async fn tracks(&self) -> ApiResponse<Vec<Track>> {
        self.fetch_array(ResourceName::Tracks.endpoint(), RequestOptions::get())
            .await
    }

    pub async fn projects(&self) -> ApiResponse<Vec<Project>> {
        self.fetch_array(ResourceName::Projects.endpoint(), RequestOptions::get())
            .await
    }

    pub async fn comments(&self) -> ApiResponse<Vec<Comment>> {
        self.fetch_array(ResourceName::Comments.endpoint(), RequestOptions::get())
            .await
    }

    pub async fn view_stats(&self) -> ApiResponse<Option<ViewStats>> {
        self.fetch_object(ResourceName::ViewCount.endpoint(), RequestOptions::get())
            .await
    }

    pub async fn country_stats(&self) -> ApiResponse<Vec<CountryStat>> {
        self.fetch_array("/api/stats/countries", RequestOptions::get())
            .await
    }

    /// Add a reaction to a comment; the response body is returned as-is.
    #[instrument(skip(self, user_id))]
    pub async fn add_reaction(
        &self,
        comment_id: &str,
        kind: &str,
        user_id: &str,
    ) -> ApiResponse<Value> {
        let path = format!("/api/comments/{}/reactions", comment_id);
        self.request_value(
            &path,
            RequestOptions::post(json!({ "type": kind, "userId": user_id })),
        )
        .await
    }
}

/// Build the error for a non-2xx response.
///
/// Message precedence: JSON `error`/`message` field, raw body text, then
/// `HTTP <status>: <statusText>`.
fn http_error(response: &HttpResponse) -> ApiError {
    let status = response.status;
    let text = String::from_utf8_lossy(&response.body).trim().to_string();

    if let Ok(body) = serde_json::from_str::<Value>(&text) {
        if let Some(message) = json_error_message(&body) {
            return ApiError::http(status, message, Some(body));
        }
    }

    if !text.is_empty() {
        return ApiError::http(status, text, None);
    }

    ApiError::http(
        status,
        format!("HTTP {}: {}", status, response.status_text()),
        None,
    )
}

fn json_error_message(body: &Value) -> Option<String> {
    ["error", "message"].iter().find_map(|key| match body.get(key)? {
        Value::String(message) if !message.is_empty() => Some(message.clone()),
        nested @ Value::Object(_) => json_error_message(nested),
        _ => None,
    })
}

fn parse_array<T: DeserializeOwned>(value: Value) -> Result<Vec<T>, ApiError> {
    let items = match value {
        Value::Null => return Ok(Vec::new()),
        Value::Array(items) => items,
        single => vec![single],
    };
    items
        .into_iter()
        .map(serde_json::from_value)
        .collect::<Result<Vec<T>, _>>()
        .map_err(|e| ApiError::shape(format!("Unexpected array item shape: {}", e)))
}

fn parse_object<T: DeserializeOwned>(value: Value) -> Result<Option<T>, ApiError> {
    match value {
        Value::Null => Ok(None),
        object @ Value::Object(_) => serde_json::from_value(object)
            .map(Some)
            .map_err(|e| ApiError::shape(format!("Unexpected object shape: {}", e))),
        _ => Err(ApiError::shape(NOT_AN_OBJECT)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ApiErrorKind;
    use async_trait::async_trait;
    use bridge_traits::error::{BridgeError, Result as BridgeResult};
    use mockall::mock;

    mock! {
        HttpClient {}

        #[async_trait]
        impl HttpClient for HttpClient {
            async fn execute(&self, request: HttpRequest) -> BridgeResult<HttpResponse>;
        }
    }

    fn client_returning(status: u16, body: &'static str) -> ApiClient {
        let mut http = MockHttpClient::new();
        http.expect_execute()
            .times(1)
            .returning(move |_| Ok(HttpResponse::new(status, body)));
        ApiClient::new(Arc::new(http), "http://localhost:3000/")
    }

    #[test]
    fn test_url_resolution() {
        let client = ApiClient::new(Arc::new(MockHttpClient::new()), "https://cdn.example/");
        assert_eq!(client.url_for("/api/comments"), "https://cdn.example/api/comments");
        assert_eq!(client.url_for("api/comments"), "https://cdn.example/api/comments");
        assert_eq!(
            client.url_for("https://other.example/x"),
            "https://other.example/x"
        );
    }

    #[tokio::test]
    async fn test_request_sends_method_url_and_json_body() {
        let mut http = MockHttpClient::new();
        http.expect_execute()
            .withf(|request: &HttpRequest| {
                request.method == HttpMethod::Post
                    && request.url == "http://localhost:3000/api/comments/c1/reactions"
                    && request.headers.get("Content-Type").map(String::as_str)
                        == Some("application/json")
                    && request.body.as_deref() == Some(br#"{"type":"like","userId":"u1"}"#.as_slice())
            })
            .times(1)
            .returning(|_| Ok(HttpResponse::new(201, r#"{"ok":true}"#)));
        let client = ApiClient::new(Arc::new(http), "http://localhost:3000");

        let response = client.add_reaction("c1", "like", "u1").await;

        assert!(response.is_ok());
        assert_eq!(response.data, json!({"ok": true}));
    }

    #[tokio::test]
    async fn test_network_failure_is_a_value() {
        let mut http = MockHttpClient::new();
        http.expect_execute()
            .returning(|_| Err(BridgeError::OperationFailed("connection refused".into())));
        let client = ApiClient::new(Arc::new(http), "http://localhost:3000");

        let response = client.tracks().await;

        assert!(response.data.is_empty());
        let error = response.error.unwrap();
        assert_eq!(error.kind, ApiErrorKind::NetworkFailure);
        assert_eq!(error.status, None);
    }

    #[tokio::test]
    async fn test_http_error_prefers_json_message() {
        let client = client_returning(400, r#"{"error":"Missing title"}"#);
        let response = client.request::<Value>("/api/media/tracks", RequestOptions::get()).await;

        let error = response.error.unwrap();
        assert_eq!(error.kind, ApiErrorKind::HttpError);
        assert_eq!(error.status, Some(400));
        assert_eq!(error.message, "Missing title");
        assert_eq!(error.details, Some(json!({"error": "Missing title"})));
    }

    #[tokio::test]
    async fn test_http_error_nested_message() {
        let client = client_returning(422, r#"{"error":{"message":"Bad reaction"}}"#);
        let error = client
            .request_value("/api/comments/1/reactions", RequestOptions::get())
            .await
            .error
            .unwrap();
        assert_eq!(error.message, "Bad reaction");
    }

    #[tokio::test]
    async fn test_http_error_falls_back_to_text() {
        let client = client_returning(502, "upstream timed out");
        let error = client
            .request_value("/api/comments", RequestOptions::get())
            .await
            .error
            .unwrap();
        assert_eq!(error.message, "upstream timed out");
    }

    #[tokio::test]
    async fn test_http_error_generic_message() {
        let client = client_returning(503, "");
        let error = client
            .request_value("/api/comments", RequestOptions::get())
            .await
            .error
            .unwrap();
        assert_eq!(error.message, "HTTP 503: Service Unavailable");
    }

    #[tokio::test]
    async fn test_non_json_success_is_shape_mismatch() {
        let client = client_returning(200, "<html>oops</html>");
        let response = client
            .request::<Value>("/api/media/images", RequestOptions::get())
            .await;

        assert_eq!(response.data, None);
        let error = response.error.unwrap();
        assert_eq!(error.kind, ApiErrorKind::ShapeMismatch);
        assert_eq!(error.status, Some(200));
    }

    #[tokio::test]
    async fn test_fetch_array_null_is_empty() {
        let client = client_returning(200, "null");
        let response = client
            .fetch_array::<Value>("/api/media/tracks", RequestOptions::get())
            .await;
        assert_eq!(response, ApiResponse::ok(Vec::new()));
    }

    // Lenient on purpose: a bare object is wrapped rather than rejected.
    #[tokio::test]
    async fn test_fetch_array_wraps_single_object() {
        let client = client_returning(200, r#"{"id":"1","title":"A"}"#);
        let response = client
            .fetch_array::<Value>("/api/media/tracks", RequestOptions::get())
            .await;
        assert_eq!(response, ApiResponse::ok(vec![json!({"id": "1", "title": "A"})]));
    }

    #[tokio::test]
    async fn test_fetch_array_passes_array_through() {
        let client = client_returning(200, r#"[{"id":"1"},{"id":"2"}]"#);
        let response = client
            .fetch_array::<Value>("/api/media/tracks", RequestOptions::get())
            .await;
        assert_eq!(
            response,
            ApiResponse::ok(vec![json!({"id": "1"}), json!({"id": "2"})])
        );
    }

    #[tokio::test]
    async fn test_fetch_array_bad_items_degrade_to_empty() {
        let client = client_returning(200, r#"[{"title":"no id"}]"#);
        let response = client.tracks().await;
        assert!(response.data.is_empty());
        assert_eq!(response.error.unwrap().kind, ApiErrorKind::ShapeMismatch);
    }

    #[tokio::test]
    async fn test_fetch_object_rejects_array() {
        let client = client_returning(200, r#"[{"views":1}]"#);
        let response = client
            .fetch_object::<Value>("/api/stats/view", RequestOptions::get())
            .await;

        assert_eq!(response.data, None);
        let error = response.error.unwrap();
        assert_eq!(error.message, NOT_AN_OBJECT);
        assert_eq!(error.kind, ApiErrorKind::ShapeMismatch);
    }

    #[tokio::test]
    async fn test_view_stats() {
        let client = client_returning(200, r#"{"total":42}"#);
        let response = client.view_stats().await;
        assert_eq!(response.data.unwrap().views, 42);
    }

    #[tokio::test]
    async fn test_fetch_resource_shapes() {
        let client = client_returning(200, "null");
        let response = client.fetch_resource(ResourceName::Comments).await;
        assert_eq!(response, ApiResponse::ok(json!([])));

        let client = client_returning(200, r#"{"views":3}"#);
        let response = client.fetch_resource(ResourceName::ViewCount).await;
        assert_eq!(response, ApiResponse::ok(json!({"views": 3})));
    }
}
