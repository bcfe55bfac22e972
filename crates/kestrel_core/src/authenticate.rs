/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - FEDI3 Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

//! Inbound request authentication: domain-block gate, key resolution and
//! HTTP Signature verification.

use crate::config::CoreConfig;
use crate::db::FedDb;
use crate::error::{FedError, FedResult};
use crate::http_sig::{
    build_signing_string, parse_signature_header, signature_header_value, verify_date,
    verify_digest_if_present, verify_signature_rsa_sha256,
};
use crate::key_resolver::{KeyResolver, KeySource};
use crate::model::Account;
use crate::transport::TransportController;
use crate::uris::{domain_matches, host_from_url};
use bytes::Bytes;
use http::{HeaderMap, HeaderValue, Method, Uri};
use kestrel_protocol::ActorDocument;
use std::sync::Arc;
use tracing::{debug, info};

/// The parts of an inbound HTTP request that signature checks need.
#[derive(Debug, Clone)]
pub struct SignedRequest {
    pub method: Method,
    pub uri: Uri,
    pub headers: HeaderMap,
    pub body: Bytes,
}

#[derive(Debug, Clone, PartialEq)]
pub enum AuthOutcome {
    Authenticated {
        key_owner_uri: String,
        key_id: String,
        /// Owner's actor document if it was fetched while resolving the key.
        actor: Option<ActorDocument>,
    },
    /// The signing key's host, or its owner's, is domain-blocked. Nothing
    /// was fetched from it.
    Blocked { host: String },
    Unverified,
}

impl AuthOutcome {
    pub fn is_authenticated(&self) -> bool {
        matches!(self, AuthOutcome::Authenticated { .. })
    }
}

/// True if `host` is blocked in the store or by a configured pattern.
pub fn host_blocked(db: &FedDb, cfg: &CoreConfig, host: &str) -> FedResult<bool> {
    if cfg.blocked_domain_patterns().iter().any(|p| domain_matches(host, p)) {
        return Ok(true);
    }
    Ok(db.is_domain_blocked(host)?)
}

#[derive(Clone)]
pub struct RequestAuthenticator {
    db: FedDb,
    cfg: Arc<CoreConfig>,
    resolver: KeyResolver,
    transports: Arc<dyn TransportController>,
}

impl RequestAuthenticator {
    pub fn new(db: FedDb, cfg: Arc<CoreConfig>, resolver: KeyResolver, transports: Arc<dyn TransportController>) -> Self {
        Self {
            db,
            cfg,
            resolver,
            transports,
        }
    }

    pub fn host_blocked(&self, host: &str) -> FedResult<bool> {
        host_blocked(&self.db, &self.cfg, host)
    }

    /// Authenticates a request addressed to the local account `requested`.
    ///
    /// Remote keys are fetched with `requested`'s own signed transport.
    pub async fn authenticate(&self, requested: &Account, req: &SignedRequest) -> FedResult<AuthOutcome> {
        let Some(raw) = signature_header_value(&req.headers) else {
            debug!(account = %requested.username, "request carries no signature");
            return Ok(AuthOutcome::Unverified);
        };
        let params = match parse_signature_header(raw) {
            Ok(p) => p,
            Err(e) => {
                debug!("unparseable signature header: {e:#}");
                return Ok(AuthOutcome::Unverified);
            }
        };

        let host = host_from_url(&params.key_id)
            .ok_or_else(|| FedError::malformed(format!("key id is not an absolute uri: {}", params.key_id)))?;
        if self.host_blocked(&host)? {
            info!(key_id = %params.key_id, "request from blocked domain");
            return Ok(AuthOutcome::Blocked { host });
        }

        let private_key = requested
            .private_key_pem
            .as_deref()
            .ok_or_else(|| FedError::Internal(anyhow::anyhow!("local account {} has no private key", requested.username)))?;
        let transport = self.transports.new_transport(&requested.public_key_uri, private_key)?;

        let key = match self.resolver.resolve(&params.key_id, transport.as_ref()).await {
            Ok(k) => k,
            Err(FedError::NotFound(what)) => {
                debug!("no usable key: {what}");
                return Ok(AuthOutcome::Unverified);
            }
            Err(e) => return Err(e),
        };

        if params.algorithm().is_none() {
            debug!(key_id = %params.key_id, "unsupported signature algorithm");
            return Ok(AuthOutcome::Unverified);
        }

        // Proxies may rewrite Host; the signature covers the public one.
        let mut headers = req.headers.clone();
        if let Ok(v) = HeaderValue::from_str(&self.cfg.host) {
            headers.insert(http::header::HOST, v);
        }

        if let Err(e) = verify_digest_if_present(&headers, &req.body) {
            debug!(key_id = %params.key_id, "digest check failed: {e:#}");
            return Ok(AuthOutcome::Unverified);
        }
        if params.headers.iter().any(|h| h == "date") {
            if let Err(e) = verify_date(&headers, self.cfg.max_date_skew()) {
                debug!(key_id = %params.key_id, "date check failed: {e:#}");
                return Ok(AuthOutcome::Unverified);
            }
        }
        let signing_string = match build_signing_string(&req.method, &req.uri, &headers, &params.headers) {
            Ok(s) => s,
            Err(e) => {
                debug!(key_id = %params.key_id, "bad signed headers: {e:#}");
                return Ok(AuthOutcome::Unverified);
            }
        };
        let key = match verify_signature_rsa_sha256(&key.public_key, &signing_string, &params.signature) {
            Ok(()) => key,
            Err(e) if key.source == KeySource::Cached => {
                // The owner may have rotated keys since we cached this one.
                debug!(key_id = %params.key_id, "cached key rejected signature, refetching: {e:#}");
                self.resolver.forget(&params.key_id).await;
                let fresh = match self.resolver.resolve(&params.key_id, transport.as_ref()).await {
                    Ok(k) => k,
                    Err(FedError::NotFound(what)) => {
                        debug!("no usable key: {what}");
                        return Ok(AuthOutcome::Unverified);
                    }
                    Err(e) => return Err(e),
                };
                if let Err(e) = verify_signature_rsa_sha256(&fresh.public_key, &signing_string, &params.signature) {
                    debug!(key_id = %params.key_id, "signature invalid: {e:#}");
                    return Ok(AuthOutcome::Unverified);
                }
                fresh
            }
            Err(e) => {
                debug!(key_id = %params.key_id, "signature invalid: {e:#}");
                return Ok(AuthOutcome::Unverified);
            }
        };

        // A key may only speak for an actor on its own host.
        let owner_host = host_from_url(&key.owner_uri).unwrap_or_default();
        if owner_host != host {
            if !owner_host.is_empty() && self.host_blocked(&owner_host)? {
                info!(key_id = %params.key_id, owner = %key.owner_uri, "key owner on blocked domain");
                return Ok(AuthOutcome::Blocked { host: owner_host });
            }
            info!(key_id = %params.key_id, owner = %key.owner_uri, "key claims an owner on another host");
            return Ok(AuthOutcome::Unverified);
        }

        Ok(AuthOutcome::Authenticated {
            key_owner_uri: key.owner_uri,
            key_id: params.key_id,
            actor: key.actor,
        })
    }
}
