/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - FEDI3 Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

//! HTTP boundary: inbox POSTs, actor documents, health probes.

use crate::authenticate::SignedRequest;
use crate::config::CoreConfig;
use crate::db::FedDb;
use crate::dispatcher::{InboxDispatcher, InboxOutcome, InboxRequest};
use crate::error::FedError;
use crate::typeutils::account_to_actor;
use crate::uris::{parse_user_path, UserPath};
use axum::body::Body;
use axum::routing::any;
use axum::Router;
use http::{header, HeaderValue, Request, Response, StatusCode};
use kestrel_protocol::{is_activity_media_type, ACTIVITY_JSON};
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info};

#[derive(Clone)]
pub struct ApState {
    pub cfg: Arc<CoreConfig>,
    pub db: FedDb,
    pub dispatcher: InboxDispatcher,
}

/// Router with every request funnelled through [`handle_request`].
pub fn router(state: ApState) -> Router {
    let max_body_bytes = state.cfg.max_body_bytes();
    Router::new()
        .fallback(any(move |req| {
            let st = state.clone();
            async move { handle_request(&st, req).await }
        }))
        .layer(axum::extract::DefaultBodyLimit::max(max_body_bytes))
        .layer(TraceLayer::new_for_http())
}

pub async fn handle_request(state: &ApState, req: Request<Body>) -> Response<Body> {
    let path = req.uri().path().to_string();
    let resp = match (req.method().as_str(), path.as_str()) {
        ("GET", "/healthz") => simple(StatusCode::OK, "ok"),
        ("GET", "/readyz") => readyz_get(state),
        (method, p) => match (method, parse_user_path(p)) {
            ("GET", Some(UserPath::Profile(username))) => actor_get(state, username),
            ("POST", Some(UserPath::Inbox(username))) => {
                let username = username.to_string();
                inbox_post(state, username, req).await
            }
            ("GET", Some(UserPath::Inbox(_))) => simple(StatusCode::METHOD_NOT_ALLOWED, "method not allowed"),
            _ => simple(StatusCode::NOT_FOUND, "not found"),
        },
    };
    add_security_headers(resp)
}

fn readyz_get(state: &ApState) -> Response<Body> {
    if state.db.health_check().is_ok() {
        simple(StatusCode::OK, "ready")
    } else {
        simple(StatusCode::SERVICE_UNAVAILABLE, "db not ready")
    }
}

fn actor_get(state: &ApState, username: &str) -> Response<Body> {
    let account = match state.db.local_account_by_username(username) {
        Ok(Some(a)) if !a.is_suspended() => a,
        Ok(_) => return simple(StatusCode::NOT_FOUND, "not found"),
        Err(e) => {
            error!("actor lookup failed: {e:#}");
            return simple(StatusCode::INTERNAL_SERVER_ERROR, "db error");
        }
    };
    json_activity(StatusCode::OK, &account_to_actor(&account))
}

async fn inbox_post(state: &ApState, username: String, req: Request<Body>) -> Response<Body> {
    let (parts, body) = req.into_parts();
    let content_type = parts
        .headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    if !is_activity_media_type(content_type) {
        debug!(%username, content_type, "inbox post with non-activity content type");
        return simple(StatusCode::UNSUPPORTED_MEDIA_TYPE, "unsupported media type");
    }
    let body = match axum::body::to_bytes(body, state.cfg.max_body_bytes()).await {
        Ok(b) => b,
        Err(e) => {
            debug!(%username, "inbox body rejected: {e}");
            return simple(StatusCode::PAYLOAD_TOO_LARGE, "body too large");
        }
    };
    let request = InboxRequest {
        username,
        request: SignedRequest {
            method: parts.method,
            uri: parts.uri,
            headers: parts.headers,
            body,
        },
    };
    match state.dispatcher.process(request).await {
        Ok(outcome) => {
            if let InboxOutcome::Accepted { activity_type, forwarded } = &outcome {
                info!(%activity_type, forwarded, "inbox activity accepted");
            }
            simple(outcome.status_code(), status_text(outcome.status_code()))
        }
        Err(e) => error_response(e),
    }
}

fn error_response(e: FedError) -> Response<Body> {
    match &e {
        FedError::Internal(_) | FedError::Transport(_) => error!("inbox failed: {e:#}"),
        _ => debug!("inbox refused: {e}"),
    }
    let status = e.status_code();
    simple(status, status_text(status))
}

fn status_text(status: StatusCode) -> &'static str {
    status.canonical_reason().unwrap_or("error")
}

fn json_activity<T: serde::Serialize>(status: StatusCode, value: &T) -> Response<Body> {
    let body = match serde_json::to_vec(value) {
        Ok(b) => b,
        Err(e) => {
            error!("serialize activity: {e:#}");
            return simple(StatusCode::INTERNAL_SERVER_ERROR, "serialize error");
        }
    };
    let mut resp = Response::new(Body::from(body));
    *resp.status_mut() = status;
    resp.headers_mut()
        .insert(header::CONTENT_TYPE, HeaderValue::from_static(ACTIVITY_JSON));
    resp
}

fn add_security_headers(mut resp: Response<Body>) -> Response<Body> {
    let headers = resp.headers_mut();
    headers.entry("X-Content-Type-Options").or_insert(HeaderValue::from_static("nosniff"));
    headers.entry("X-Frame-Options").or_insert(HeaderValue::from_static("DENY"));
    headers.entry("Referrer-Policy").or_insert(HeaderValue::from_static("no-referrer"));
    resp
}

fn simple(status: StatusCode, msg: &str) -> Response<Body> {
    let mut resp = Response::new(Body::from(msg.to_string()));
    *resp.status_mut() = status;
    resp
}
