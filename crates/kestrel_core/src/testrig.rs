/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - FEDI3 Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

//! Shared fixtures for unit tests: temp store, cached keys, recording transport.

use crate::authenticate::SignedRequest;
use crate::config::CoreConfig;
use crate::db::FedDb;
use crate::http_sig::{sign_request_rsa_sha256, POST_SIGNED_HEADERS};
use crate::keys::{generate_keypair, KeyPair};
use crate::model::{id_at, new_id, now_ms, Account, Follow, Status, Visibility};
use crate::transport::{Transport, TransportController};
use crate::typeutils::account_to_actor;
use crate::uris::{account_uris, follow_uri, status_uri};
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use bytes::Bytes;
use http::{HeaderMap, Method, Uri};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, OnceLock};
use tempfile::TempDir;

pub fn config() -> CoreConfig {
    CoreConfig {
        host: "social.example".to_string(),
        protocol: "https".to_string(),
        bind: "127.0.0.1:0".to_string(),
        rsa_key_bits: Some(1024),
        ..CoreConfig::default()
    }
}

pub fn temp_db() -> (TempDir, FedDb) {
    let dir = tempfile::tempdir().expect("tempdir");
    let db = FedDb::open(dir.path().join("kestrel.db")).expect("open db");
    (dir, db)
}

pub fn local_keys() -> &'static KeyPair {
    static KEYS: OnceLock<KeyPair> = OnceLock::new();
    KEYS.get_or_init(|| generate_keypair(1024).expect("local keys"))
}

pub fn remote_keys() -> &'static KeyPair {
    static KEYS: OnceLock<KeyPair> = OnceLock::new();
    KEYS.get_or_init(|| generate_keypair(1024).expect("remote keys"))
}

pub fn local_account(db: &FedDb, cfg: &CoreConfig, username: &str) -> Account {
    let account = local_account_unsaved(cfg, username);
    db.put_account(&account).expect("put local account");
    account
}

pub fn local_account_unsaved(cfg: &CoreConfig, username: &str) -> Account {
    let uris = account_uris(&cfg.protocol, &cfg.host, username);
    let keys = local_keys();
    let now = now_ms();
    Account {
        id: new_id(),
        username: username.to_string(),
        domain: None,
        uri: uris.user_uri,
        url: uris.user_url,
        display_name: username.to_string(),
        note: String::new(),
        inbox_uri: uris.inbox_uri,
        outbox_uri: uris.outbox_uri,
        followers_uri: uris.followers_uri,
        following_uri: uris.following_uri,
        shared_inbox_uri: Some(uris.shared_inbox_uri),
        public_key_pem: keys.public_key_pem.clone(),
        public_key_uri: uris.public_key_uri,
        private_key_pem: Some(keys.private_key_pem.clone()),
        actor_type: "Person".to_string(),
        locked: false,
        discoverable: true,
        bot: false,
        created_at_ms: now,
        updated_at_ms: now,
        suspended_at_ms: None,
    }
}

/// Remote account as it would look after dereferencing, not yet stored.
pub fn remote_account_unsaved(username: &str, domain: &str) -> Account {
    let uris = account_uris("https", domain, username);
    let now = now_ms();
    Account {
        id: new_id(),
        username: username.to_string(),
        domain: Some(domain.to_string()),
        uri: uris.user_uri,
        url: uris.user_url,
        display_name: username.to_string(),
        note: String::new(),
        inbox_uri: uris.inbox_uri,
        outbox_uri: uris.outbox_uri,
        followers_uri: uris.followers_uri,
        following_uri: uris.following_uri,
        shared_inbox_uri: Some(uris.shared_inbox_uri),
        public_key_pem: remote_keys().public_key_pem.clone(),
        public_key_uri: uris.public_key_uri,
        private_key_pem: None,
        actor_type: "Person".to_string(),
        locked: false,
        discoverable: true,
        bot: false,
        created_at_ms: now,
        updated_at_ms: now,
        suspended_at_ms: None,
    }
}

pub fn remote_account(db: &FedDb, username: &str, domain: &str) -> Account {
    let account = remote_account_unsaved(username, domain);
    db.put_account(&account).expect("put remote account");
    account
}

pub fn follow_edge(from: &Account, to: &Account) -> Follow {
    let id = new_id();
    Follow {
        uri: follow_uri(&from.uri, &id),
        id,
        account_id: from.id.clone(),
        target_account_id: to.id.clone(),
        show_reblogs: true,
        notify: false,
        created_at_ms: now_ms(),
    }
}

pub fn status_unsaved(author: &Account, created_at_ms: i64) -> Status {
    let id = id_at(created_at_ms);
    Status {
        uri: status_uri(&author.uri, &id),
        url: format!("{}/statuses/{id}", author.url),
        id,
        content: "hello".to_string(),
        account_id: author.id.clone(),
        account_uri: author.uri.clone(),
        in_reply_to_uri: None,
        in_reply_to_id: None,
        in_reply_to_account_id: None,
        boost_of_id: None,
        boost_of_account_id: None,
        visibility: Visibility::Public,
        local: author.is_local(),
        federated: true,
        boostable: true,
        likeable: true,
        mention_ids: Vec::new(),
        created_at_ms,
    }
}

pub fn status(db: &FedDb, author: &Account, created_at_ms: i64) -> Status {
    let s = status_unsaved(author, created_at_ms);
    db.put_status(&s).expect("put status");
    s
}

pub fn actor_json(account: &Account) -> Vec<u8> {
    serde_json::to_vec(&account_to_actor(account)).expect("actor json")
}

/// Inbox POST signed by `key_id` with `keys`, as received by this server.
pub fn signed_inbox_request(cfg: &CoreConfig, username: &str, key_id: &str, keys: &KeyPair, body: &[u8]) -> SignedRequest {
    let full: Uri = format!("{}/users/{username}/inbox", cfg.base_url()).parse().expect("uri");
    let mut headers = HeaderMap::new();
    headers.insert("content-type", kestrel_protocol::ACTIVITY_JSON.parse().expect("static header"));
    sign_request_rsa_sha256(
        &keys.private_key_pem,
        key_id,
        &Method::POST,
        &full,
        &mut headers,
        body,
        POST_SIGNED_HEADERS,
    )
    .expect("sign");
    SignedRequest {
        method: Method::POST,
        uri: format!("/users/{username}/inbox").parse().expect("path"),
        headers,
        body: Bytes::copy_from_slice(body),
    }
}

/// Transport double: serves canned documents and records every call.
#[derive(Default)]
pub struct MockTransport {
    docs: Mutex<HashMap<String, Vec<u8>>>,
    fetches: Mutex<Vec<String>>,
    deliveries: Mutex<Vec<(String, Vec<u8>)>>,
    failing_inboxes: Mutex<Vec<String>>,
}

impl MockTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn serve(&self, uri: &str, body: Vec<u8>) {
        self.docs.lock().unwrap().insert(uri.to_string(), body);
    }

    pub fn serve_json(&self, uri: &str, v: &serde_json::Value) {
        self.serve(uri, serde_json::to_vec(v).unwrap());
    }

    pub fn fail_inbox(&self, inbox: &str) {
        self.failing_inboxes.lock().unwrap().push(inbox.to_string());
    }

    pub fn fetches(&self) -> Vec<String> {
        self.fetches.lock().unwrap().clone()
    }

    pub fn deliveries(&self) -> Vec<(String, Vec<u8>)> {
        self.deliveries.lock().unwrap().clone()
    }

    pub fn delivered_to(&self) -> Vec<String> {
        let mut v: Vec<String> = self.deliveries().into_iter().map(|(inbox, _)| inbox).collect();
        v.sort();
        v
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn dereference(&self, uri: &str) -> Result<Vec<u8>> {
        self.fetches.lock().unwrap().push(uri.to_string());
        self.docs
            .lock()
            .unwrap()
            .get(uri)
            .cloned()
            .ok_or_else(|| anyhow!("fetch {uri}: status 404 Not Found"))
    }

    async fn deliver(&self, inbox: &str, body: &[u8]) -> Result<()> {
        if self.failing_inboxes.lock().unwrap().iter().any(|i| i == inbox) {
            return Err(anyhow!("delivery to {inbox} failed: 503"));
        }
        self.deliveries.lock().unwrap().push((inbox.to_string(), body.to_vec()));
        Ok(())
    }
}

/// Hands out the same [`MockTransport`] for every identity and records the key URIs used.
pub struct MockController {
    pub transport: Arc<MockTransport>,
    key_uris: Mutex<Vec<String>>,
}

impl MockController {
    pub fn new(transport: Arc<MockTransport>) -> Arc<Self> {
        Arc::new(Self {
            transport,
            key_uris: Mutex::new(Vec::new()),
        })
    }

    pub fn key_uris(&self) -> Vec<String> {
        self.key_uris.lock().unwrap().clone()
    }
}

impl TransportController for MockController {
    fn new_transport(&self, key_uri: &str, _private_key_pem: &str) -> Result<Arc<dyn Transport>> {
        self.key_uris.lock().unwrap().push(key_uri.to_string());
        Ok(self.transport.clone())
    }
}
