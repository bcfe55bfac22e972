/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - FEDI3 Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

//! Error taxonomy of the federation core.
//!
//! Authentication and block decisions are not errors; they travel as
//! [`crate::authenticate::AuthOutcome`] and [`crate::dispatcher::InboxOutcome`].

use axum::body::Body;
use axum::response::{IntoResponse, Response};
use http::StatusCode;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum FedError {
    /// No matching row or remote document.
    #[error("not found: {0}")]
    NotFound(String),

    /// Untrusted input failed to parse.
    #[error("malformed: {0}")]
    Malformed(String),

    /// Network or remote peer fault.
    #[error("transport: {0:#}")]
    Transport(anyhow::Error),

    /// Persistence fault or broken invariant.
    #[error("internal: {0:#}")]
    Internal(#[from] anyhow::Error),
}

pub type FedResult<T> = std::result::Result<T, FedError>;

impl FedError {
    pub fn not_found(what: impl Into<String>) -> Self {
        FedError::NotFound(what.into())
    }

    pub fn malformed(what: impl Into<String>) -> Self {
        FedError::Malformed(what.into())
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            FedError::NotFound(_) => StatusCode::NOT_FOUND,
            FedError::Malformed(_) => StatusCode::BAD_REQUEST,
            FedError::Transport(_) => StatusCode::BAD_GATEWAY,
            FedError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, FedError::NotFound(_))
    }
}

impl IntoResponse for FedError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        // Internal details stay in the log.
        let body = match &self {
            FedError::NotFound(_) => "not found",
            FedError::Malformed(_) => "malformed request",
            FedError::Transport(_) => "upstream error",
            FedError::Internal(_) => "internal error",
        };
        let mut resp = Response::new(Body::from(body));
        *resp.status_mut() = status;
        resp
    }
}
