pub mod cache_admin;
pub mod health;
pub mod revalidate;
pub mod sitemap;
pub mod songs;

use crate::error::NO_STORE;
use crate::output_cache::CachedOutput;
use crate::revalidate::SECRET_HEADER;
use axum::http::{HeaderMap, HeaderName, HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};

const CDN_CACHE_CONTROL: HeaderName = HeaderName::from_static("cdn-cache-control");
const X_CACHE: HeaderName = HeaderName::from_static("x-cache");

/// Secret supplied in the `x-revalidate-secret` header, if any
pub(crate) fn header_secret(headers: &HeaderMap) -> Option<&str> {
    headers.get(SECRET_HEADER).and_then(|v| v.to_str().ok())
}

/// Mark a control-plane response as uncacheable at every layer.
pub(crate) fn no_store(mut response: Response) -> Response {
    let headers = response.headers_mut();
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static(NO_STORE));
    headers.insert(header::PRAGMA, HeaderValue::from_static("no-cache"));
    headers.insert(CDN_CACHE_CONTROL, HeaderValue::from_static("no-store"));
    response
}

/// Response for a rendered body, marked as an output-cache hit or miss.
pub(crate) fn rendered(
    status: StatusCode,
    content_type: &str,
    cache_control: &'static str,
    body: String,
    hit: bool,
) -> Response {
    let mut response = (status, body).into_response();
    let headers = response.headers_mut();
    if let Ok(value) = HeaderValue::from_str(content_type) {
        headers.insert(header::CONTENT_TYPE, value);
    }
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static(cache_control));
    headers.insert(
        X_CACHE,
        HeaderValue::from_static(if hit { "HIT" } else { "MISS" }),
    );
    response
}

pub(crate) fn from_output(cached: CachedOutput, cache_control: &'static str) -> Response {
    let age = cached.age().as_secs();
    let mut response = rendered(
        StatusCode::OK,
        &cached.content_type,
        cache_control,
        cached.body,
        true,
    );
    if let Ok(value) = HeaderValue::from_str(&age.to_string()) {
        response.headers_mut().insert(header::AGE, value);
    }
    response
}
