use lambda_http::http::header::{HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use lambda_http::http::{HeaderMap, StatusCode};
use lambda_http::{Body, Error, Response};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::StoreError;

pub fn respond(status: StatusCode, body: Body) -> Response<Body> {
    let mut resp = Response::new(body);
    *resp.status_mut() = status;
    let headers = resp.headers_mut();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    headers.insert("Access-Control-Allow-Origin", HeaderValue::from_static("*"));
    resp
}

pub fn json<T: Serialize>(status: StatusCode, value: &T) -> Result<Response<Body>, Error> {
    Ok(respond(status, serde_json::to_string(value)?.into()))
}

pub fn error(status: StatusCode, message: &str) -> Response<Body> {
    respond(status, serde_json::json!({ "error": message }).to_string().into())
}

pub fn not_found() -> Response<Body> {
    error(StatusCode::NOT_FOUND, "Not found")
}

pub fn method_not_allowed() -> Response<Body> {
    error(StatusCode::METHOD_NOT_ALLOWED, "Method not allowed")
}

pub fn no_content() -> Response<Body> {
    respond(StatusCode::NO_CONTENT, Body::Empty)
}

pub fn preflight() -> Response<Body> {
    let mut resp = respond(StatusCode::OK, Body::Empty);
    let headers = resp.headers_mut();
    headers.insert(
        "Access-Control-Allow-Methods",
        HeaderValue::from_static("GET,POST,PUT,PATCH,DELETE,OPTIONS"),
    );
    headers.insert(
        "Access-Control-Allow-Headers",
        HeaderValue::from_static("Content-Type,Authorization"),
    );
    resp
}

/// Parses a JSON body, or yields the 400 to send back.
pub fn parse_json<T: DeserializeOwned>(body: &[u8]) -> Result<T, Response<Body>> {
    serde_json::from_slice(body).map_err(|e| {
        tracing::warn!(error = %e, "invalid request body");
        error(StatusCode::BAD_REQUEST, &format!("Invalid request body: {}", e))
    })
}

/// Maps a store failure to a response without leaking backend detail.
pub fn store_failure(err: &StoreError) -> Response<Body> {
    match err {
        StoreError::MissingDocument { .. } => not_found(),
        _ => {
            tracing::error!(error = %err, "document store failure");
            error(StatusCode::INTERNAL_SERVER_ERROR, "Something went wrong. Please try again.")
        }
    }
}

pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer ").or_else(|| v.strip_prefix("bearer ")))
        .map(str::trim)
        .filter(|token| !token.is_empty())
}
