use crate::error::{SyncError, TransportError};
use async_trait::async_trait;
use percent_encoding::{utf8_percent_encode, AsciiSet, CONTROLS};
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT};
use serde_json::Value;
use std::fmt;
use std::time::Duration;

/// Characters escaped inside a single path segment. `,` stays literal since
/// the service reads comma-joined lists from the path.
const PATH_SEGMENT: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'%')
    .add(b'/')
    .add(b'<')
    .add(b'>')
    .add(b'?')
    .add(b'[')
    .add(b'\\')
    .add(b']')
    .add(b'^')
    .add(b'`')
    .add(b'{')
    .add(b'|')
    .add(b'}');

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    Get,
    Post,
    Delete,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Delete => "DELETE",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One call against the project API, relative to the project base URL
#[derive(Debug, Clone, PartialEq)]
pub struct ApiRequest {
    pub method: Method,
    pub path: String,
    pub query: Vec<(String, String)>,
    pub body: Option<Value>,
}

impl ApiRequest {
    fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            query: Vec::new(),
            body: None,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::Get, path)
    }

    pub fn post(path: impl Into<String>, body: Value) -> Self {
        Self {
            body: Some(body),
            ..Self::new(Method::Post, path)
        }
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(Method::Delete, path)
    }

    /// Append one caller-supplied path segment, percent-encoded.
    ///
    /// `.` and `..` are refused: URL parsing would resolve them against the
    /// project path even when escaped.
    pub fn with_segment(mut self, segment: &str) -> Result<Self, SyncError> {
        if segment.trim_matches('.').is_empty() && !segment.is_empty() {
            return Err(SyncError::InvalidInput(format!(
                "'{}' is not a valid path segment",
                segment
            )));
        }
        self.path.push('/');
        self.path.extend(utf8_percent_encode(segment, PATH_SEGMENT));
        Ok(self)
    }

    pub fn with_query(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((name.into(), value.into()));
        self
    }

    /// Only reads are worth remembering
    pub fn is_cacheable(&self) -> bool {
        self.method == Method::Get
    }

    /// Stable identity of the request: method, path and query in sorted order
    pub fn cache_key(&self) -> String {
        let mut query = self.query.clone();
        query.sort();
        let query: Vec<String> = query
            .iter()
            .map(|(name, value)| format!("{}={}", name, value))
            .collect();

        if query.is_empty() {
            format!("{} {}", self.method, self.path)
        } else {
            format!("{} {}?{}", self.method, self.path, query.join("&"))
        }
    }
}

impl fmt::Display for ApiRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.method, self.path)
    }
}

/// Performs a single exchange with the translation service.
///
/// Implementations must not retry, cache or throttle; the client layers
/// those on top.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: &ApiRequest) -> Result<Value, TransportError>;
}

/// `reqwest`-backed transport for the project API
pub struct HttpTransport {
    client: reqwest::Client,
    base_url: String,
}

impl HttpTransport {
    /// `base_url` is the service root; requests go to `{base_url}/v2/projects/{project_id}`
    pub fn new(
        base_url: &str,
        project_id: &str,
        api_key: &str,
        timeout: Duration,
    ) -> Result<Self, SyncError> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        let key = HeaderValue::from_str(api_key).map_err(|_| {
            SyncError::Configuration("api key is not a valid header value".to_string())
        })?;
        headers.insert("X-API-Key", key);

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(timeout)
            .build()
            .map_err(|e| SyncError::Configuration(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: format!(
                "{}/v2/projects/{}",
                base_url.trim_end_matches('/'),
                project_id
            ),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, request: &ApiRequest) -> Result<Value, TransportError> {
        let url = format!("{}{}", self.base_url, request.path);
        let mut builder = match request.method {
            Method::Get => self.client.get(&url),
            Method::Post => self.client.post(&url),
            Method::Delete => self.client.delete(&url),
        };
        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let response = builder.send().await?;
        let status = response.status();
        let text = response.text().await?;

        if !status.is_success() {
            return Err(TransportError::Status {
                status: status.as_u16(),
                body: text,
            });
        }

        if text.trim().is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_str(&text).map_err(|e| TransportError::Decode(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::{
        matchers::{body_json, header, method, path, query_param},
        Mock, MockServer, ResponseTemplate,
    };

    fn transport(server: &MockServer) -> HttpTransport {
        HttpTransport::new(&server.uri(), "42", "secret-key", Duration::from_secs(5))
            .expect("transport")
    }

    #[test]
    fn test_cache_key_sorts_query() {
        let a = ApiRequest::get("/keys/select")
            .with_query("b", "2")
            .with_query("a", "1");
        let b = ApiRequest::get("/keys/select")
            .with_query("a", "1")
            .with_query("b", "2");

        assert_eq!(a.cache_key(), "GET /keys/select?a=1&b=2");
        assert_eq!(a.cache_key(), b.cache_key());
    }

    #[test]
    fn test_segments_are_escaped() {
        let request = ApiRequest::get("/keys")
            .with_segment("a/b?c=1#x%2e")
            .unwrap();
        assert_eq!(request.path, "/keys/a%2Fb%3Fc=1%23x%252e");

        let request = ApiRequest::get("/translations").with_segment("en,de").unwrap();
        assert_eq!(request.path, "/translations/en,de");

        let request = ApiRequest::delete("/keys").with_segment("").unwrap();
        assert_eq!(request.path, "/keys/");
    }

    #[test]
    fn test_dot_segments_are_refused() {
        for segment in [".", "..", "..."] {
            let result = ApiRequest::get("/translations").with_segment(segment);
            assert!(
                matches!(result, Err(SyncError::InvalidInput(_))),
                "{} should be refused",
                segment
            );
        }
    }

    #[tokio::test]
    async fn test_escaped_segment_stays_under_its_route() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v2/projects/42/keys/select"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"leak": true})))
            .expect(0)
            .mount(&server)
            .await;

        let request = ApiRequest::get("/translations")
            .with_segment("../keys/select")
            .unwrap();
        let error = transport(&server).send(&request).await.expect_err("no route");

        assert!(matches!(error, TransportError::Status { status: 404, .. }));
    }

    #[test]
    fn test_cache_key_distinguishes_methods() {
        assert_ne!(
            ApiRequest::get("/keys/1").cache_key(),
            ApiRequest::delete("/keys/1").cache_key()
        );
    }

    #[test]
    fn test_only_reads_are_cacheable() {
        assert!(ApiRequest::get("/languages").is_cacheable());
        assert!(!ApiRequest::post("/keys/import", json!({})).is_cacheable());
        assert!(!ApiRequest::delete("/keys/1").is_cacheable());
    }

    #[test]
    fn test_base_url_includes_project() {
        let transport = HttpTransport::new(
            "https://translate.example.com/",
            "7",
            "key",
            Duration::from_secs(1),
        )
        .expect("transport");
        assert_eq!(
            transport.base_url(),
            "https://translate.example.com/v2/projects/7"
        );
    }

    #[test]
    fn test_invalid_api_key_is_a_configuration_error() {
        let result = HttpTransport::new("https://x", "1", "bad\nkey", Duration::from_secs(1));
        assert!(matches!(result, Err(SyncError::Configuration(_))));
    }

    #[tokio::test]
    async fn test_get_sends_credentials_and_query() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v2/projects/42/keys/select"))
            .and(query_param("filterNamespace", "prod_1"))
            .and(header("X-API-Key", "secret-key"))
            .and(header("Accept", "application/json"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"ids": [1, 2]})))
            .expect(1)
            .mount(&server)
            .await;

        let request = ApiRequest::get("/keys/select").with_query("filterNamespace", "prod_1");
        let body = transport(&server).send(&request).await.expect("response");

        assert_eq!(body, json!({"ids": [1, 2]}));
    }

    #[tokio::test]
    async fn test_post_sends_json_body() {
        let server = MockServer::start().await;
        let payload = json!({"keys": []});
        Mock::given(method("POST"))
            .and(path("/v2/projects/42/keys/import"))
            .and(body_json(&payload))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let body = transport(&server)
            .send(&ApiRequest::post("/keys/import", payload))
            .await
            .expect("response");

        assert_eq!(body, Value::Null);
    }

    #[tokio::test]
    async fn test_error_status_is_reported() {
        let server = MockServer::start().await;
        Mock::given(method("DELETE"))
            .and(path("/v2/projects/42/keys/1,2"))
            .respond_with(ResponseTemplate::new(404).set_body_string("not found"))
            .mount(&server)
            .await;

        let error = transport(&server)
            .send(&ApiRequest::delete("/keys/1,2"))
            .await
            .expect_err("should fail");

        match error {
            TransportError::Status { status, body } => {
                assert_eq!(status, 404);
                assert_eq!(body, "not found");
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_malformed_body_is_a_decode_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v2/projects/42/languages"))
            .respond_with(ResponseTemplate::new(200).set_body_string("{not json"))
            .mount(&server)
            .await;

        let error = transport(&server)
            .send(&ApiRequest::get("/languages"))
            .await
            .expect_err("should fail");

        assert!(matches!(error, TransportError::Decode(_)));
    }
}
