/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - FEDI3 Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

//! Public key lookup for incoming signatures.
//!
//! Order: local account, stored remote account, remote dereference. Keys
//! fetched from the network are held in a short-lived cache and are not
//! persisted here; the requesting account is stored later by the dispatcher.

use crate::config::CoreConfig;
use crate::db::FedDb;
use crate::error::{FedError, FedResult};
use crate::http_sig::parse_public_key_pem;
use crate::transport::Transport;
use crate::uris::authority_from_url;
use kestrel_protocol::ActorDocument;
use rsa::RsaPublicKey;
use serde::Deserialize;
use std::{collections::HashMap, sync::Arc, time::Instant};
use tokio::sync::RwLock;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeySource {
    Local,
    Stored,
    Fetched,
    Cached,
}

#[derive(Debug, Clone)]
pub struct ResolvedKey {
    pub public_key: RsaPublicKey,
    pub public_key_pem: String,
    pub owner_uri: String,
    pub source: KeySource,
    /// The owner's actor document, when the key was published inside it.
    pub actor: Option<ActorDocument>,
}

#[derive(Clone)]
struct CachedKey {
    pem: String,
    owner_uri: String,
    actor: Option<ActorDocument>,
    expires_at: Instant,
}

/// Bare key document, served by some servers at the key URI itself.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct KeyDocument {
    id: String,
    #[serde(default)]
    owner: String,
    public_key_pem: String,
}

#[derive(Clone)]
pub struct KeyResolver {
    db: FedDb,
    cfg: Arc<CoreConfig>,
    cache: Arc<RwLock<HashMap<String, CachedKey>>>,
}

impl KeyResolver {
    pub fn new(db: FedDb, cfg: Arc<CoreConfig>) -> Self {
        Self {
            db,
            cfg,
            cache: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub async fn resolve(&self, key_uri: &str, transport: &dyn Transport) -> FedResult<ResolvedKey> {
        let authority = authority_from_url(key_uri)
            .ok_or_else(|| FedError::malformed(format!("key id is not an absolute uri: {key_uri}")))?;

        if self.cfg.is_local_host(&authority) {
            let account = self
                .db
                .account_by_public_key_uri(key_uri)?
                .ok_or_else(|| FedError::not_found(format!("local key {key_uri}")))?;
            return build(account.public_key_pem, account.uri, KeySource::Local, None);
        }

        if let Some(account) = self.db.account_by_public_key_uri(key_uri)? {
            return build(account.public_key_pem, account.uri, KeySource::Stored, None);
        }

        if let Some(hit) = self.get_cached(key_uri).await {
            return build(hit.pem, hit.owner_uri, KeySource::Cached, hit.actor);
        }

        let fetch_uri = key_uri.split_once('#').map(|(doc, _)| doc).unwrap_or(key_uri);
        let bytes = transport
            .dereference(fetch_uri)
            .await
            .map_err(FedError::Transport)?;
        let (pem, owner_uri, actor) = extract_key(&bytes, key_uri)?;
        debug!(key_uri, owner = %owner_uri, "fetched remote public key");

        let resolved = build(pem.clone(), owner_uri.clone(), KeySource::Fetched, actor.clone())?;
        self.put_cached(key_uri, pem, owner_uri, actor).await;
        Ok(resolved)
    }

    /// Drops a cached key, e.g. after the owner rotated it.
    pub async fn forget(&self, key_uri: &str) {
        self.cache.write().await.remove(key_uri);
    }

    async fn get_cached(&self, key_uri: &str) -> Option<CachedKey> {
        let mut cache = self.cache.write().await;
        if let Some(v) = cache.get(key_uri) {
            if v.expires_at > Instant::now() {
                return Some(v.clone());
            }
        }
        cache.remove(key_uri);
        None
    }

    async fn put_cached(&self, key_uri: &str, pem: String, owner_uri: String, actor: Option<ActorDocument>) {
        let ttl = self.cfg.key_cache_ttl();
        if ttl.is_zero() {
            return;
        }
        self.cache.write().await.insert(
            key_uri.to_string(),
            CachedKey {
                pem,
                owner_uri,
                actor,
                expires_at: Instant::now() + ttl,
            },
        );
    }
}

fn build(pem: String, owner_uri: String, source: KeySource, actor: Option<ActorDocument>) -> FedResult<ResolvedKey> {
    let public_key = parse_public_key_pem(&pem).map_err(|e| FedError::malformed(format!("{e:#}")))?;
    Ok(ResolvedKey {
        public_key,
        public_key_pem: pem,
        owner_uri,
        source,
        actor,
    })
}

/// Finds the key named `key_uri` in an actor document or a bare key document.
///
/// A key inside an actor document belongs to that actor. A bare key document
/// only claims its owner; the claim is checked against the owner's own
/// actor document by the caller.
fn extract_key(bytes: &[u8], key_uri: &str) -> FedResult<(String, String, Option<ActorDocument>)> {
    if let Ok(actor) = serde_json::from_slice::<ActorDocument>(bytes) {
        let Some(pk) = actor.public_keys().into_iter().find(|k| k.id == key_uri) else {
            return Err(FedError::not_found(format!("key {key_uri} not published by {}", actor.id)));
        };
        if !pk.owner.is_empty() && pk.owner != actor.id {
            return Err(FedError::not_found(format!(
                "key {key_uri} names owner {} inside actor {}",
                pk.owner, actor.id
            )));
        }
        let pem = pk.public_key_pem.clone();
        let owner = actor.id.clone();
        return Ok((pem, owner, Some(actor)));
    }
    let key: KeyDocument = serde_json::from_slice(bytes)
        .map_err(|e| FedError::malformed(format!("key document for {key_uri}: {e}")))?;
    if key.id != key_uri || key.owner.is_empty() {
        return Err(FedError::not_found(format!("key {key_uri}")));
    }
    Ok((key.public_key_pem, key.owner, None))
}
