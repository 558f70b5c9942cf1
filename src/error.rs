//! Crate-wide error type.
//!
//! One enum per `spec.md` §7's error table. Each variant carries exactly what its raiser knows;
//! nothing here tries to be a generic "anyhow"-style bag, since every raise site is a specific,
//! anticipated failure mode rather than an unexpected one.

use std::fmt;

/// A single upstream GraphQL error, as returned in a subgraph response's `errors` array.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize, PartialEq, Eq)]
pub struct UpstreamError {
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extensions: Option<UpstreamErrorExtensions>,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize, PartialEq, Eq)]
pub struct UpstreamErrorExtensions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

/// Top-level failure modes of the gateway.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    /// Two remote schemas disagree on the declared type of a shared field. Aborts startup.
    #[error("conflicting definitions for {parent_type}.{field}: `{left}` vs `{right}`")]
    SchemaConflict {
        parent_type: String,
        field: String,
        left: String,
        right: String,
    },

    /// A `(parentType, field)` pair was looked up in the field-location index but never
    /// registered by any remote schema or the internal schema.
    #[error("unknown field {parent_type}.{field}")]
    UnknownField { parent_type: String, field: String },

    /// The request's document contains more than one operation and did not name which one to
    /// run.
    #[error("must provide operation name if query contains multiple operations")]
    AmbiguousOperation,

    /// The request named an operation that is not present in the document.
    #[error("unknown operation named {0:?}")]
    UnknownOperation(String),

    /// Bubbled up verbatim from `apollo_compiler`'s parser/validator.
    #[error("{0}")]
    ParseError(String),

    /// A single upstream call failed below the GraphQL layer (connection refused, timeout,
    /// non-JSON body, ...). Fails the whole execution.
    #[error("upstream request to {url} failed: {source}")]
    UpstreamTransport {
        url: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// An upstream responded with a well-formed GraphQL error payload.
    #[error("upstream {url} returned {} error(s)", .errors.len())]
    UpstreamErrors {
        url: String,
        errors: Vec<UpstreamError>,
    },

    /// The executor tried to act on a plan shape the planner should never produce. Indicates a
    /// planner invariant violation; always a bug, never a user-facing condition.
    #[error("internal stitching invariant violated: {0}")]
    StitchError(String),

    /// The startup source-service list was empty.
    #[error("gateway requires at least one source service")]
    NoSources,

    /// Raised by the inbound HTTP layer for malformed requests (bad JSON, missing `query`, a
    /// multipart body that doesn't conform to the upload spec, ...).
    #[error("malformed request: {0}")]
    BadRequest(String),

    /// The request's deadline elapsed, or an in-flight step was cancelled, before execution
    /// finished (`spec.md` §5). A cancelled request never mutates the client-visible result.
    #[error("request cancelled: {0}")]
    Cancelled(String),
}

impl GatewayError {
    /// Whether this error should be reported back to the client as a `200` GraphQL-errors
    /// response rather than an HTTP error status.
    pub fn is_graphql_level(&self) -> bool {
        matches!(
            self,
            GatewayError::UnknownField { .. }
                | GatewayError::UpstreamErrors { .. }
                | GatewayError::StitchError(_)
                | GatewayError::ParseError(_)
        )
    }
}

impl fmt::Display for UpstreamError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

pub type Result<T> = std::result::Result<T, GatewayError>;
