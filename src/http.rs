//! The HTTP front door (`spec.md` §6): `POST`/`GET`/`OPTIONS /graphql`, multipart file uploads per
//! the jaydenseric graphql-multipart-request-spec, and the gateway's own CORS policy. An outer
//! surface around [`crate::gateway::Gateway`] — none of the federation invariants live here.

use std::collections::HashMap;
use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{header, HeaderMap, HeaderValue, StatusCode};
use axum::response::{Html, IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use base64::Engine;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{GatewayError, UpstreamErrorExtensions};
use crate::gateway::{Gateway, GraphQLRequest};

const PLAYGROUND_HTML: &str = include_str!("http_playground.html");

/// Builds the router for a single gateway instance, serving `/graphql` for all three methods the
/// gateway supports.
pub fn router(gateway: Arc<Gateway>) -> Router {
    Router::new()
        .route(
            "/graphql",
            get(handle_get).post(handle_post).options(handle_options),
        )
        .with_state(gateway)
}

#[derive(Debug, Deserialize)]
struct JsonRequestBody {
    query: String,
    #[serde(default, rename = "operationName")]
    operation_name: Option<String>,
    #[serde(default)]
    variables: HashMap<String, Value>,
}

#[derive(Debug, Serialize)]
struct ResponseBody {
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<Value>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    errors: Vec<ResponseError>,
}

#[derive(Debug, Serialize)]
struct ResponseError {
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    extensions: Option<UpstreamErrorExtensions>,
}

async fn handle_get() -> impl IntoResponse {
    with_cors(Html(PLAYGROUND_HTML))
}

async fn handle_options() -> impl IntoResponse {
    with_cors(StatusCode::NO_CONTENT)
}

async fn handle_post(
    State(gateway): State<Arc<Gateway>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let request = match parse_request(&headers, body).await {
        Ok(request) => request,
        Err(err) => return bad_request(err),
    };
    run_request(&gateway, request).await
}

async fn run_request(gateway: &Gateway, request: GraphQLRequest) -> Response {
    let plans = match gateway.get_plans(&request) {
        Ok(plans) => plans,
        Err(err) => return graphql_error_response(err),
    };
    match gateway.execute(&request, &plans).await {
        Ok(data) => with_cors(Json(ResponseBody {
            data: Some(data),
            errors: Vec::new(),
        }))
        .into_response(),
        Err(err) => graphql_error_response(err),
    }
}

async fn parse_request(headers: &HeaderMap, body: Bytes) -> Result<GraphQLRequest, GatewayError> {
    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();

    if content_type.starts_with("multipart/form-data") {
        parse_multipart(content_type, body).await
    } else {
        let parsed: JsonRequestBody = serde_json::from_slice(&body)
            .map_err(|err| GatewayError::BadRequest(format!("invalid JSON body: {err}")))?;
        Ok(GraphQLRequest {
            query: parsed.query,
            operation_name: parsed.operation_name,
            variables: parsed.variables,
        })
    }
}

/// Decodes a `multipart/form-data` upload body per the jaydenseric
/// graphql-multipart-request-spec: an `operations` JSON part (the request body, with `null`
/// placeholders for file variables), a `map` JSON part (`{fileKey: ["path.into.variables", ...]}`),
/// and one part per uploaded file keyed the same way. Each uploaded file is substituted into
/// `operations` as `{filename, contentType, content}` with `content` base64-encoded, since the
/// gateway's variable values are plain JSON rather than a streaming upload type.
async fn parse_multipart(content_type: &str, body: Bytes) -> Result<GraphQLRequest, GatewayError> {
    let boundary = multer::parse_boundary(content_type)
        .map_err(|err| GatewayError::BadRequest(format!("invalid multipart boundary: {err}")))?;
    let stream = futures::stream::once(async move { Ok::<_, std::io::Error>(body) });
    let mut multipart = multer::Multipart::new(stream, boundary);

    let mut operations: Option<Value> = None;
    let mut map: HashMap<String, Vec<String>> = HashMap::new();
    let mut files: HashMap<String, Value> = HashMap::new();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|err| GatewayError::BadRequest(format!("malformed multipart body: {err}")))?
    {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "operations" => {
                let text = field
                    .text()
                    .await
                    .map_err(|err| GatewayError::BadRequest(err.to_string()))?;
                operations = Some(serde_json::from_str(&text).map_err(|err| {
                    GatewayError::BadRequest(format!("invalid `operations` JSON: {err}"))
                })?);
            }
            "map" => {
                let text = field
                    .text()
                    .await
                    .map_err(|err| GatewayError::BadRequest(err.to_string()))?;
                map = serde_json::from_str(&text)
                    .map_err(|err| GatewayError::BadRequest(format!("invalid `map` JSON: {err}")))?;
            }
            key => {
                let filename = field.file_name().map(str::to_string);
                let content_type = field.content_type().map(|m| m.to_string());
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|err| GatewayError::BadRequest(err.to_string()))?;
                files.insert(
                    key.to_string(),
                    serde_json::json!({
                        "filename": filename,
                        "contentType": content_type,
                        "content": base64::engine::general_purpose::STANDARD.encode(&bytes),
                    }),
                );
            }
        }
    }

    let mut operations = operations
        .ok_or_else(|| GatewayError::BadRequest("multipart body missing `operations` part".to_string()))?;

    for (file_key, paths) in &map {
        let Some(file_value) = files.get(file_key) else {
            continue;
        };
        for path in paths {
            set_at_path(&mut operations, path, file_value.clone());
        }
    }

    let parsed: JsonRequestBody = serde_json::from_value(operations)
        .map_err(|err| GatewayError::BadRequest(format!("invalid operations shape: {err}")))?;
    Ok(GraphQLRequest {
        query: parsed.query,
        operation_name: parsed.operation_name,
        variables: parsed.variables,
    })
}

/// Replaces the value at a dotted path (e.g. `"variables.file"`, `"variables.files.0"`) with
/// `replacement`. The path must already exist (as the spec's `null` placeholder) or the
/// substitution is silently skipped.
fn set_at_path(root: &mut Value, path: &str, replacement: Value) {
    let keys: Vec<&str> = path.split('.').collect();
    let Some((last, ancestors)) = keys.split_last() else {
        return;
    };

    let mut current = root;
    for key in ancestors {
        match index_into(current, key) {
            Some(next) => current = next,
            None => return,
        }
    }
    if let Some(slot) = index_into(current, last) {
        *slot = replacement;
    }
}

fn index_into<'a>(value: &'a mut Value, key: &str) -> Option<&'a mut Value> {
    match value {
        Value::Object(map) => map.get_mut(key),
        Value::Array(items) => key.parse::<usize>().ok().and_then(move |i| items.get_mut(i)),
        _ => None,
    }
}

fn bad_request(err: GatewayError) -> Response {
    with_cors((StatusCode::BAD_REQUEST, err.to_string())).into_response()
}

/// GraphQL-level errors (`spec.md` §7) return `200` with an `errors` array; anything else is a
/// gateway-internal failure surfaced as `500`.
fn graphql_error_response(err: GatewayError) -> Response {
    if !err.is_graphql_level() {
        tracing::error!(error = %err, "request failed");
        return with_cors((StatusCode::INTERNAL_SERVER_ERROR, err.to_string())).into_response();
    }

    let errors = match err {
        GatewayError::UpstreamErrors { errors, .. } => errors
            .into_iter()
            .map(|e| ResponseError {
                message: e.message,
                extensions: e.extensions,
            })
            .collect(),
        other => vec![ResponseError {
            message: other.to_string(),
            extensions: None,
        }],
    };
    with_cors(Json(ResponseBody { data: None, errors })).into_response()
}

/// Applies the gateway's fixed CORS policy (`spec.md` §6) to every response this module returns.
fn with_cors(response: impl IntoResponse) -> Response {
    let mut response = response.into_response();
    let headers = response.headers_mut();
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_ORIGIN,
        HeaderValue::from_static("*"),
    );
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_CREDENTIALS,
        HeaderValue::from_static("true"),
    );
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_METHODS,
        HeaderValue::from_static("GET,HEAD,OPTIONS,POST,PUT"),
    );
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_HEADERS,
        HeaderValue::from_static("*"),
    );
    response
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_at_path_replaces_nested_null_placeholder() {
        let mut operations = serde_json::json!({
            "query": "mutation($file: Upload!) { upload(file: $file) }",
            "variables": { "file": null }
        });
        set_at_path(
            &mut operations,
            "variables.file",
            serde_json::json!({"filename": "a.txt"}),
        );
        assert_eq!(
            operations["variables"]["file"],
            serde_json::json!({"filename": "a.txt"})
        );
    }

    #[test]
    fn set_at_path_indexes_into_arrays() {
        let mut operations = serde_json::json!({
            "variables": { "files": [null, null] }
        });
        set_at_path(&mut operations, "variables.files.1", serde_json::json!("b"));
        assert_eq!(
            operations["variables"]["files"],
            serde_json::json!([null, "b"])
        );
    }

    #[test]
    fn set_at_path_ignores_missing_ancestor() {
        let mut operations = serde_json::json!({"variables": {}});
        set_at_path(&mut operations, "variables.missing.deep", serde_json::json!(1));
        assert_eq!(operations, serde_json::json!({"variables": {}}));
    }
}
