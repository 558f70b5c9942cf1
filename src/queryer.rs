//! Queryer: the capability to send one GraphQL request to one upstream service and get back a
//! decoded response (`spec.md` §4.6). The only seam tests exercise (`spec.md` §9), so it is a
//! plain trait object rather than anything generic.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::{GatewayError, UpstreamError};

/// One outbound sub-query, fully rendered and ready to send.
#[derive(Debug, Clone)]
pub struct QueryerInput {
    pub query: String,
    pub operation_name: Option<String>,
    pub variables: HashMap<String, Value>,
}

/// Mutates an outbound HTTP request before it leaves the process — chiefly for forwarding the
/// client's own headers upstream (`spec.md` §1's "only the hook to forward headers").
pub trait RequestMiddleware: Send + Sync {
    fn apply(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder;
}

/// A capability that can send one GraphQL request to one upstream service and return its decoded
/// `data` object. Implementations own exactly one upstream URL.
#[async_trait]
pub trait Queryer: Send + Sync {
    async fn query(&self, input: QueryerInput) -> Result<Value, GatewayError>;

    /// The URL this queryer is bound to, for error messages and `node(id:)` wrapping decisions.
    fn url(&self) -> &str;
}

impl fmt::Debug for dyn Queryer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Queryer({})", self.url())
    }
}

/// Constructs a [`Queryer`] bound to a given upstream URL. The default factory produces
/// [`NetworkQueryer`]s; `GatewayOptions` may override it so tests (or callers with special
/// transport needs) can swap in [`FunctionQueryer`]/[`MockQueryer`] instead.
pub type QueryerFactory = Arc<dyn Fn(&str) -> Arc<dyn Queryer> + Send + Sync>;

/// Sends sub-queries over HTTP with `reqwest`, applying every registered request middleware in
/// order before the request leaves the process.
pub struct NetworkQueryer {
    url: String,
    client: reqwest::Client,
    request_middlewares: Vec<Arc<dyn RequestMiddleware>>,
}

impl NetworkQueryer {
    pub fn new(url: impl Into<String>, client: reqwest::Client) -> Self {
        Self {
            url: url.into(),
            client,
            request_middlewares: Vec::new(),
        }
    }

    pub fn with_middlewares(
        url: impl Into<String>,
        client: reqwest::Client,
        request_middlewares: Vec<Arc<dyn RequestMiddleware>>,
    ) -> Self {
        Self {
            url: url.into(),
            client,
            request_middlewares,
        }
    }
}

#[derive(Debug, serde::Serialize)]
struct OutboundBody<'a> {
    query: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    #[serde(rename = "operationName")]
    operation_name: Option<&'a str>,
    variables: &'a HashMap<String, Value>,
}

#[derive(Debug, serde::Deserialize)]
struct InboundBody {
    #[serde(default)]
    data: Option<Value>,
    #[serde(default)]
    errors: Vec<UpstreamError>,
}

#[async_trait]
impl Queryer for NetworkQueryer {
    async fn query(&self, input: QueryerInput) -> Result<Value, GatewayError> {
        let body = OutboundBody {
            query: &input.query,
            operation_name: input.operation_name.as_deref(),
            variables: &input.variables,
        };

        let mut request = self
            .client
            .post(&self.url)
            .header("content-type", "application/json")
            .json(&body);
        for middleware in &self.request_middlewares {
            request = middleware.apply(request);
        }

        let response = request.send().await.map_err(|source| {
            tracing::warn!(url = %self.url, error = %source, "upstream request failed");
            GatewayError::UpstreamTransport {
                url: self.url.clone(),
                source: Box::new(source),
            }
        })?;

        let body: InboundBody = response.json().await.map_err(|source| {
            GatewayError::UpstreamTransport {
                url: self.url.clone(),
                source: Box::new(source),
            }
        })?;

        if !body.errors.is_empty() {
            return Err(GatewayError::UpstreamErrors {
                url: self.url.clone(),
                errors: body.errors,
            });
        }

        Ok(body.data.unwrap_or(Value::Null))
    }

    fn url(&self) -> &str {
        &self.url
    }
}

/// A deterministic test double that delegates to a closure. Useful when a test needs to assert on
/// the exact rendered query/variables a step sent.
pub struct FunctionQueryer<F> {
    url: String,
    f: F,
}

impl<F> FunctionQueryer<F>
where
    F: Fn(QueryerInput) -> Result<Value, GatewayError> + Send + Sync,
{
    pub fn new(url: impl Into<String>, f: F) -> Self {
        Self { url: url.into(), f }
    }
}

#[async_trait]
impl<F> Queryer for FunctionQueryer<F>
where
    F: Fn(QueryerInput) -> Result<Value, GatewayError> + Send + Sync,
{
    async fn query(&self, input: QueryerInput) -> Result<Value, GatewayError> {
        (self.f)(input)
    }

    fn url(&self) -> &str {
        &self.url
    }
}

/// A deterministic test double that always returns the same canned response, regardless of the
/// query sent. Handy for tests that only care about plan shape, not response content.
pub struct MockQueryer {
    url: String,
    response: Value,
}

impl MockQueryer {
    pub fn new(url: impl Into<String>, response: Value) -> Self {
        Self {
            url: url.into(),
            response,
        }
    }
}

#[async_trait]
impl Queryer for MockQueryer {
    async fn query(&self, _input: QueryerInput) -> Result<Value, GatewayError> {
        Ok(self.response.clone())
    }

    fn url(&self) -> &str {
        &self.url
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn function_queryer_delegates_to_closure() {
        let queryer = FunctionQueryer::new("http://a", |input| {
            assert_eq!(input.query, "{ foo }");
            Ok(serde_json::json!({"foo": true}))
        });
        let result = queryer
            .query(QueryerInput {
                query: "{ foo }".to_string(),
                operation_name: None,
                variables: HashMap::new(),
            })
            .await
            .unwrap();
        assert_eq!(result, serde_json::json!({"foo": true}));
    }

    #[tokio::test]
    async fn mock_queryer_ignores_input() {
        let queryer = MockQueryer::new("http://a", serde_json::json!({"ok": true}));
        let result = queryer
            .query(QueryerInput {
                query: "whatever".to_string(),
                operation_name: None,
                variables: HashMap::new(),
            })
            .await
            .unwrap();
        assert_eq!(result, serde_json::json!({"ok": true}));
    }
}
