use crate::error::{RelayError, Result};
use crate::revalidate::{RevalidateParams, usage};
use crate::server::state::AppState;
use axum::{
    Json,
    body::Bytes,
    extract::{Query, State},
    http::HeaderMap,
    response::{IntoResponse, Response},
};

use super::{header_secret, no_store};

/// `GET /api/revalidate?secret=..&(clearAll|tag|path)=..[&type=..]`
pub async fn revalidate_get(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(params): Query<RevalidateParams>,
) -> Result<Response> {
    let outcome = state.gateway.handle(header_secret(&headers), &params)?;
    Ok(no_store(Json(outcome).into_response()))
}

/// `POST /api/revalidate` with a JSON body; the query string is used when
/// the body is empty
pub async fn revalidate_post(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<RevalidateParams>,
    body: Bytes,
) -> Result<Response> {
    let secret = header_secret(&headers);
    let params = if body.iter().all(u8::is_ascii_whitespace) {
        query
    } else {
        match serde_json::from_slice::<RevalidateParams>(&body) {
            Ok(params) => params,
            Err(e) => {
                // Never reveal parse details to an unauthenticated caller
                state.gateway.authorize(secret.or(query.secret.as_deref()))?;
                return Err(RelayError::bad_request_with_usage(
                    format!("Invalid JSON body: {}", e),
                    usage(),
                ));
            }
        }
    };

    let outcome = state.gateway.handle(secret, &params)?;
    Ok(no_store(Json(outcome).into_response()))
}

/// `POST /api/revalidate-sitemap` with the secret header
pub async fn revalidate_sitemap(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Response> {
    let outcome = state.gateway.handle_sitemap(header_secret(&headers))?;
    Ok(no_store(Json(outcome).into_response()))
}
