//! Network query collaborator behind the `sendQuery` effect.
//!
//! The reducer for `sendQuery` leaves state untouched; once the fold has
//! committed, the conductor hands the query to a [`QueryClient`] on its
//! runtime and dispatches the response event with `[status, payload]` when
//! the call completes. This is the only way asynchronous I/O re-enters the
//! dispatch pipeline.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

/// A request for the network collaborator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Query {
    /// Appended to the client's endpoint when present.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    /// JSON request body.
    pub body: Value,
}

impl Query {
    /// A query sent to the client's endpoint as-is.
    pub fn new(body: Value) -> Self {
        Self { path: None, body }
    }

    /// Target a sub-path of the client's endpoint.
    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }
}

/// Outcome of a query, dispatched as the response event's two parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryResponse {
    /// HTTP status, or `0` when the request never got a response.
    pub status: u16,
    /// Decoded response body.
    pub payload: Value,
}

impl QueryResponse {
    /// Response describing a transport failure.
    pub fn transport_error(message: impl Into<String>) -> Self {
        Self {
            status: 0,
            payload: json!({ "error": message.into() }),
        }
    }

    /// The positional parameters of the response event.
    pub fn into_params(self) -> Vec<Value> {
        vec![Value::from(self.status), self.payload]
    }
}

/// Performs queries on behalf of the `sendQuery` effect.
///
/// Implementations own their retry policy, if any. Failures are reported
/// through [`QueryResponse::status`] rather than as errors, because the
/// response event is the only channel back into the conductor.
#[async_trait]
pub trait QueryClient: Send + Sync + 'static {
    async fn send(&self, query: Query) -> QueryResponse;
}

/// Configuration for [`HttpQueryClient`].
#[derive(Debug, Clone)]
pub struct HttpQueryConfig {
    /// Base URL queries are POSTed to.
    ///
    /// Default: `http://127.0.0.1:8080/query`.
    pub endpoint: String,
    /// Per-request timeout.
    ///
    /// Default: 30 seconds.
    pub timeout: Duration,
}

impl Default for HttpQueryConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://127.0.0.1:8080/query".to_owned(),
            timeout: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, thiserror::Error)]
enum QueryError {
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),
}

/// [`QueryClient`] that POSTs the query body as JSON over HTTP.
#[derive(Debug, Clone)]
pub struct HttpQueryClient {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpQueryClient {
    /// Build a client from `config`.
    ///
    /// # Errors
    ///
    /// Returns the underlying [`reqwest::Error`] if the HTTP client cannot
    /// be constructed (e.g. the TLS backend fails to initialize).
    pub fn new(config: HttpQueryConfig) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder().timeout(config.timeout).build()?;
        Ok(Self {
            client,
            endpoint: config.endpoint.trim_end_matches('/').to_owned(),
        })
    }

    fn url_for(&self, query: &Query) -> String {
        match &query.path {
            Some(path) => format!("{}/{}", self.endpoint, path.trim_start_matches('/')),
            None => self.endpoint.clone(),
        }
    }

    async fn post(&self, query: &Query) -> Result<QueryResponse, QueryError> {
        let resp = self
            .client
            .post(self.url_for(query))
            .json(&query.body)
            .send()
            .await?;
        let status = resp.status().as_u16();
        let text = resp.text().await?;
        // Non-JSON bodies are passed through as a string payload.
        let payload = serde_json::from_str(&text).unwrap_or(Value::String(text));
        Ok(QueryResponse { status, payload })
    }
}

#[async_trait]
impl QueryClient for HttpQueryClient {
    async fn send(&self, query: Query) -> QueryResponse {
        match self.post(&query).await {
            Ok(response) => response,
            Err(e) => {
                tracing::warn!(url = %self.url_for(&query), error = %e, "query failed");
                QueryResponse::transport_error(e.to_string())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn query_json_omits_absent_path() {
        let q = Query::new(json!({"q": 1}));
        assert_eq!(serde_json::to_value(&q).unwrap(), json!({"body": {"q": 1}}));
        let back: Query = serde_json::from_value(json!({"body": {"q": 1}})).unwrap();
        assert_eq!(back, q);
    }

    #[test]
    fn response_params_are_status_then_payload() {
        let resp = QueryResponse {
            status: 200,
            payload: json!({"items": []}),
        };
        assert_eq!(resp.into_params(), vec![json!(200), json!({"items": []})]);
    }

    #[test]
    fn transport_error_uses_status_zero() {
        let resp = QueryResponse::transport_error("connection refused");
        assert_eq!(resp.status, 0);
        assert_eq!(resp.payload, json!({"error": "connection refused"}));
    }

    #[test]
    fn url_joins_endpoint_and_path() {
        let client = HttpQueryClient::new(HttpQueryConfig {
            endpoint: "http://localhost:9/api/".into(),
            ..HttpQueryConfig::default()
        })
        .expect("client should build");
        assert_eq!(client.url_for(&Query::new(Value::Null)), "http://localhost:9/api");
        assert_eq!(
            client.url_for(&Query::new(Value::Null).with_path("/graphql")),
            "http://localhost:9/api/graphql"
        );
    }

    #[tokio::test]
    async fn unreachable_endpoint_reports_status_zero() {
        let client = HttpQueryClient::new(HttpQueryConfig {
            endpoint: "http://127.0.0.1:1".into(),
            timeout: Duration::from_secs(2),
        })
        .expect("client should build");
        let resp = client.send(Query::new(json!({}))).await;
        assert_eq!(resp.status, 0);
        assert!(resp.payload.get("error").is_some());
    }
}
