/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - FEDI3 Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

//! Outgoing activities: document builders and signed delivery fan-out.

use crate::authenticate::host_blocked;
use crate::config::{CoreConfig, DepthLimit};
use crate::db::FedDb;
use crate::error::{FedError, FedResult};
use crate::model::{ms_to_rfc3339, Account, Follow, Status};
use crate::transport::{Transport, TransportController};
use crate::typeutils::{audience, status_to_note};
use crate::uris::{host_from_url, parse_user_path, UserPath};
use futures_util::{stream, StreamExt};
use http::Uri;
use kestrel_protocol::{iris_of, type_of, ObjectKind, AS_CONTEXT, AS_PUBLIC};
use serde_json::{json, Value};
use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Concurrent POSTs per delivery.
const DELIVERY_CONCURRENCY: usize = 8;

/// A composed activity and the outbox of the actor sending it.
#[derive(Debug, Clone, PartialEq)]
pub struct OutboundActivity {
    pub actor: Account,
    pub outbox: String,
    pub document: Value,
}

impl OutboundActivity {
    fn new(actor: &Account, document: Value) -> Self {
        Self {
            actor: actor.clone(),
            outbox: actor.outbox_uri.clone(),
            document,
        }
    }

    pub fn id(&self) -> &str {
        self.document.get("id").and_then(Value::as_str).unwrap_or_default()
    }

    /// Addressed IRIs without the public collection or the actor itself.
    pub fn recipients(&self) -> Vec<String> {
        let mut seen = HashSet::new();
        ["to", "cc", "bto", "bcc"]
            .iter()
            .flat_map(|field| iris_of(self.document.get(*field)))
            .filter(|iri| !is_public(iri) && *iri != self.actor.uri)
            .filter(|iri| seen.insert(iri.clone()))
            .collect()
    }

    /// Wire form; `bto`/`bcc` are never sent.
    pub fn body(&self) -> FedResult<Vec<u8>> {
        let mut doc = self.document.clone();
        if let Some(map) = doc.as_object_mut() {
            map.remove("bto");
            map.remove("bcc");
        }
        serde_json::to_vec(&doc).map_err(|e| FedError::Internal(e.into()))
    }
}

fn is_public(iri: &str) -> bool {
    iri == AS_PUBLIC || iri == "as:Public" || iri == "Public"
}

fn follow_object(follow: &Follow, follower: &Account, followee: &Account) -> Value {
    json!({
        "id": follow.uri,
        "type": "Follow",
        "actor": follower.uri,
        "object": followee.uri,
    })
}

pub fn follow(actor: &Account, target: &Account, follow: &Follow) -> OutboundActivity {
    let mut doc = follow_object(follow, actor, target);
    doc["@context"] = json!(AS_CONTEXT);
    doc["to"] = json!([target.uri]);
    OutboundActivity::new(actor, doc)
}

/// Undo of a Follow, rebuilt from the stored edge so the id matches the original.
pub fn undo_follow(actor: &Account, target: &Account, follow: &Follow) -> OutboundActivity {
    OutboundActivity::new(
        actor,
        json!({
            "@context": AS_CONTEXT,
            "id": format!("{}/undo", follow.uri),
            "type": "Undo",
            "actor": actor.uri,
            "object": follow_object(follow, actor, target),
            "to": [target.uri],
        }),
    )
}

/// Accept sent by `actor` for `requester`'s follow.
pub fn accept_follow(actor: &Account, requester: &Account, follow: &Follow) -> OutboundActivity {
    OutboundActivity::new(
        actor,
        json!({
            "@context": AS_CONTEXT,
            "id": format!("{}/accept/{}", actor.uri, follow.id),
            "type": "Accept",
            "actor": actor.uri,
            "object": follow_object(follow, requester, actor),
            "to": [requester.uri],
        }),
    )
}

/// Create wrapping the Note form of a local status.
pub fn create_note(actor: &Account, status: &Status, mentioned: &[String]) -> OutboundActivity {
    let mut note = status_to_note(status, actor, mentioned);
    if let Some(map) = note.as_object_mut() {
        map.remove("@context");
    }
    let (to, cc) = audience(status.visibility, actor, mentioned);
    OutboundActivity::new(
        actor,
        json!({
            "@context": AS_CONTEXT,
            "id": format!("{}/activity", status.uri),
            "type": "Create",
            "actor": actor.uri,
            "published": ms_to_rfc3339(status.created_at_ms),
            "object": note,
            "to": to,
            "cc": cc,
        }),
    )
}

/// Delete of one of `actor`'s statuses, addressed like the status was.
pub fn delete_status(actor: &Account, status: &Status) -> OutboundActivity {
    let (to, cc) = audience(status.visibility, actor, &[]);
    OutboundActivity::new(
        actor,
        json!({
            "@context": AS_CONTEXT,
            "id": format!("{}#delete", status.uri),
            "type": "Delete",
            "actor": actor.uri,
            "object": {
                "id": status.uri,
                "type": "Tombstone",
            },
            "to": to,
            "cc": cc,
        }),
    )
}

/// Undo of an Announce previously sent for `boost`.
pub fn undo_announce(actor: &Account, boost: &Status, boosted: &Status, boosted_author: &Account) -> OutboundActivity {
    let mut doc = announce(actor, boost, boosted, boosted_author).document;
    if let Some(map) = doc.as_object_mut() {
        map.remove("@context");
    }
    OutboundActivity::new(
        actor,
        json!({
            "@context": AS_CONTEXT,
            "id": format!("{}/undo", boost.uri),
            "type": "Undo",
            "actor": actor.uri,
            "object": doc,
            "to": [AS_PUBLIC],
            "cc": [boosted_author.uri, actor.followers_uri],
        }),
    )
}

/// Announce of `boosted` by `actor`; `boost` is the local wrapper status.
pub fn announce(actor: &Account, boost: &Status, boosted: &Status, boosted_author: &Account) -> OutboundActivity {
    OutboundActivity::new(
        actor,
        json!({
            "@context": AS_CONTEXT,
            "id": boost.uri,
            "type": "Announce",
            "actor": actor.uri,
            "object": boosted.uri,
            "published": ms_to_rfc3339(boost.created_at_ms),
            "to": [AS_PUBLIC],
            "cc": [boosted_author.uri, actor.followers_uri],
        }),
    )
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct DeliveryReport {
    pub delivered: Vec<String>,
    pub failed: Vec<(String, String)>,
}

impl DeliveryReport {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }

    pub fn failed_inboxes(&self) -> Vec<String> {
        self.failed.iter().map(|(inbox, _)| inbox.clone()).collect()
    }
}

#[derive(Clone)]
pub struct Delivery {
    db: FedDb,
    cfg: Arc<CoreConfig>,
    transports: Arc<dyn TransportController>,
}

impl Delivery {
    pub fn new(db: FedDb, cfg: Arc<CoreConfig>, transports: Arc<dyn TransportController>) -> Self {
        Self { db, cfg, transports }
    }

    /// Transport signing as `actor`. Only local accounts can send.
    pub fn transport_for(&self, actor: &Account) -> FedResult<Arc<dyn Transport>> {
        let key = actor
            .private_key_pem
            .as_deref()
            .filter(|k| !k.is_empty())
            .ok_or_else(|| FedError::Internal(anyhow::anyhow!("account {} cannot sign", actor.uri)))?;
        Ok(self.transports.new_transport(&actor.public_key_uri, key)?)
    }

    /// Resolves the recipients of `activity` and POSTs it to each inbox once.
    pub async fn send(&self, activity: &OutboundActivity) -> FedResult<DeliveryReport> {
        let transport = self.transport_for(&activity.actor)?;
        let inboxes = self
            .resolve_inboxes(transport.as_ref(), &activity.recipients())
            .await?;
        let body = activity.body()?;
        let report = post_all(transport, inboxes, body).await;
        if report.is_complete() {
            debug!(id = activity.id(), delivered = report.delivered.len(), "delivered");
        } else {
            info!(
                id = activity.id(),
                delivered = report.delivered.len(),
                failed = report.failed.len(),
                "delivery incomplete"
            );
        }
        Ok(report)
    }

    /// POSTs an already serialised body to fixed inboxes as `actor`.
    pub async fn deliver_to(&self, actor: &Account, inboxes: Vec<String>, body: Vec<u8>) -> FedResult<DeliveryReport> {
        let transport = self.transport_for(actor)?;
        Ok(post_all(transport, inboxes, body).await)
    }

    /// Turns addressed IRIs into inbox URLs.
    ///
    /// Local followers collections expand from the store; remote actors and
    /// collections are dereferenced, collections recursively up to the
    /// configured delivery depth. Blocked hosts are skipped before any fetch.
    pub async fn resolve_inboxes(&self, transport: &dyn Transport, recipients: &[String]) -> FedResult<Vec<String>> {
        let limit = self.cfg.delivery_depth();
        let mut queue: VecDeque<(String, u32)> = recipients.iter().map(|r| (r.clone(), 1)).collect();
        let mut visited = HashSet::new();
        let mut inboxes = InboxSet::default();

        while let Some((iri, depth)) = queue.pop_front() {
            if is_public(&iri) || !visited.insert(iri.clone()) {
                continue;
            }
            let Some(host) = host_from_url(&iri) else {
                debug!(iri, "skipping non-url recipient");
                continue;
            };

            if self.cfg.is_local_host(&host) {
                let path = iri.parse::<Uri>().map(|u| u.path().to_string()).unwrap_or_default();
                if let Some(UserPath::Followers(username)) = parse_user_path(&path) {
                    if let Some(owner) = self.db.local_account_by_username(username)? {
                        for inbox in self.db.remote_follower_inboxes(&owner.id)? {
                            let blocked = match host_from_url(&inbox) {
                                Some(h) => host_blocked(&self.db, &self.cfg, &h)?,
                                None => true,
                            };
                            if !blocked {
                                inboxes.push(inbox);
                            }
                        }
                    }
                }
                continue;
            }

            if host_blocked(&self.db, &self.cfg, &host)? {
                debug!(iri, "recipient on blocked domain");
                continue;
            }

            if let Some(account) = self.db.account_by_uri(&iri)? {
                if !account.is_local() && !account.is_suspended() {
                    inboxes.push(account.delivery_inbox().to_string());
                }
                continue;
            }

            if !limit.allows(depth) {
                debug!(iri, depth, "delivery depth reached");
                continue;
            }
            let doc = match transport.dereference(&iri).await {
                Ok(bytes) => match serde_json::from_slice::<Value>(&bytes) {
                    Ok(v) => v,
                    Err(e) => {
                        warn!(iri, "recipient document unreadable: {e}");
                        continue;
                    }
                },
                Err(e) => {
                    warn!(iri, "recipient dereference failed: {e:#}");
                    continue;
                }
            };
            expand(&doc, depth, limit, &mut queue, &mut inboxes);
        }
        Ok(inboxes.list)
    }
}

#[derive(Default)]
struct InboxSet {
    seen: HashSet<String>,
    list: Vec<String>,
}

impl InboxSet {
    fn push(&mut self, inbox: String) {
        if !inbox.is_empty() && self.seen.insert(inbox.clone()) {
            self.list.push(inbox);
        }
    }
}

/// Feeds an actor's inbox, or a collection's members, into the walk.
fn expand(
    doc: &Value,
    depth: u32,
    limit: DepthLimit,
    queue: &mut VecDeque<(String, u32)>,
    inboxes: &mut InboxSet,
) {
    let kind = type_of(doc).unwrap_or_default();
    if ObjectKind::from_as_type(kind) == ObjectKind::Profile {
        let shared = doc
            .get("endpoints")
            .and_then(|e| e.get("sharedInbox"))
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty());
        let inbox = shared.or_else(|| doc.get("inbox").and_then(Value::as_str));
        if let Some(inbox) = inbox {
            inboxes.push(inbox.to_string());
        }
        return;
    }
    if !matches!(
        kind,
        "Collection" | "OrderedCollection" | "CollectionPage" | "OrderedCollectionPage"
    ) {
        debug!(kind, "recipient is neither actor nor collection");
        return;
    }
    let next = depth + 1;
    for field in ["items", "orderedItems"] {
        for iri in iris_of(doc.get(field)) {
            queue.push_back((iri, next));
        }
    }
    for field in ["first", "next"] {
        match doc.get(field) {
            Some(Value::String(iri)) => queue.push_back((iri.clone(), next)),
            Some(page @ Value::Object(_)) if limit.allows(next) => expand(page, next, limit, queue, inboxes),
            _ => {}
        }
    }
}

async fn post_all(transport: Arc<dyn Transport>, inboxes: Vec<String>, body: Vec<u8>) -> DeliveryReport {
    let body = Arc::new(body);
    let results: Vec<(String, anyhow::Result<()>)> = stream::iter(inboxes)
        .map(|inbox| {
            let transport = transport.clone();
            let body = body.clone();
            async move {
                let res = transport.deliver(&inbox, &body).await;
                (inbox, res)
            }
        })
        .buffer_unordered(DELIVERY_CONCURRENCY)
        .collect()
        .await;

    let mut report = DeliveryReport::default();
    for (inbox, res) in results {
        match res {
            Ok(()) => report.delivered.push(inbox),
            Err(e) => {
                warn!(inbox, "delivery failed: {e:#}");
                report.failed.push((inbox, format!("{e:#}")));
            }
        }
    }
    report.delivered.sort();
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{new_id, now_ms, DomainBlock};
    use crate::testrig::{self, MockController, MockTransport};

    struct Rig {
        _dir: tempfile::TempDir,
        db: FedDb,
        transport: Arc<MockTransport>,
        delivery: Delivery,
        alice: Account,
    }

    fn rig(cfg: CoreConfig) -> Rig {
        let (dir, db) = testrig::temp_db();
        let alice = testrig::local_account(&db, &cfg, "alice");
        let transport = MockTransport::new();
        let delivery = Delivery::new(db.clone(), Arc::new(cfg), MockController::new(transport.clone()));
        Rig {
            _dir: dir,
            db,
            transport,
            delivery,
            alice,
        }
    }

    #[test]
    fn follow_document_targets_followee() {
        let alice = testrig::local_account_unsaved(&testrig::config(), "alice");
        let bob = testrig::remote_account_unsaved("bob", "remote.example");
        let f = testrig::follow_edge(&alice, &bob);
        let out = follow(&alice, &bob, &f);
        assert_eq!(out.outbox, alice.outbox_uri);
        assert_eq!(out.document["type"], "Follow");
        assert_eq!(out.document["id"], f.uri.as_str());
        assert_eq!(out.document["object"], bob.uri.as_str());
        assert_eq!(out.recipients(), vec![bob.uri.clone()]);
    }

    #[test]
    fn undo_reuses_the_follow_identity() {
        let alice = testrig::local_account_unsaved(&testrig::config(), "alice");
        let bob = testrig::remote_account_unsaved("bob", "remote.example");
        let f = testrig::follow_edge(&alice, &bob);
        let undo = undo_follow(&alice, &bob, &f);
        assert_eq!(undo.document["type"], "Undo");
        assert_eq!(undo.document["object"]["id"], f.uri.as_str());
        assert_eq!(undo.document["object"]["actor"], alice.uri.as_str());
        assert_eq!(undo_follow(&alice, &bob, &f), undo);
    }

    #[test]
    fn accept_wraps_requesters_follow() {
        let alice = testrig::local_account_unsaved(&testrig::config(), "alice");
        let bob = testrig::remote_account_unsaved("bob", "remote.example");
        let f = testrig::follow_edge(&bob, &alice);
        let accept = accept_follow(&alice, &bob, &f);
        assert_eq!(accept.document["actor"], alice.uri.as_str());
        assert_eq!(accept.document["object"]["actor"], bob.uri.as_str());
        assert_eq!(accept.document["object"]["object"], alice.uri.as_str());
        assert_eq!(accept.recipients(), vec![bob.uri.clone()]);
    }

    #[test]
    fn announce_is_public_and_copies_author() {
        let alice = testrig::local_account_unsaved(&testrig::config(), "alice");
        let bob = testrig::remote_account_unsaved("bob", "remote.example");
        let original = testrig::status_unsaved(&bob, 1_000);
        let mut boost = testrig::status_unsaved(&alice, 2_000);
        boost.boost_of_id = Some(original.id.clone());
        let out = announce(&alice, &boost, &original, &bob);
        assert_eq!(out.document["object"], original.uri.as_str());
        assert_eq!(out.recipients(), vec![bob.uri.clone(), alice.followers_uri.clone()]);
    }

    #[test]
    fn create_addresses_followers_and_mentions() {
        let alice = testrig::local_account_unsaved(&testrig::config(), "alice");
        let bob = testrig::remote_account_unsaved("bob", "remote.example");
        let status = testrig::status_unsaved(&alice, 1_000);
        let out = create_note(&alice, &status, &[bob.uri.clone()]);
        assert_eq!(out.document["type"], "Create");
        assert_eq!(out.document["object"]["id"], status.uri.as_str());
        assert!(out.document["object"].get("@context").is_none());
        assert_eq!(out.recipients(), vec![alice.followers_uri.clone(), bob.uri.clone()]);
    }

    #[test]
    fn delete_and_undo_announce_point_at_originals() {
        let alice = testrig::local_account_unsaved(&testrig::config(), "alice");
        let bob = testrig::remote_account_unsaved("bob", "remote.example");
        let status = testrig::status_unsaved(&alice, 1_000);
        let delete = delete_status(&alice, &status);
        assert_eq!(delete.document["object"]["type"], "Tombstone");
        assert_eq!(delete.document["object"]["id"], status.uri.as_str());

        let original = testrig::status_unsaved(&bob, 1_000);
        let mut boost = testrig::status_unsaved(&alice, 2_000);
        boost.boost_of_id = Some(original.id.clone());
        let undo = undo_announce(&alice, &boost, &original, &bob);
        assert_eq!(undo.document["type"], "Undo");
        assert_eq!(undo.document["object"]["id"], boost.uri.as_str());
        assert_eq!(undo.document["object"]["type"], "Announce");
    }

    #[tokio::test]
    async fn known_accounts_use_shared_inbox() {
        let r = rig(testrig::config());
        let bob = testrig::remote_account(&r.db, "bob", "remote.example");
        let f = testrig::follow_edge(&r.alice, &bob);
        let report = r.delivery.send(&follow(&r.alice, &bob, &f)).await.unwrap();
        assert_eq!(report.delivered, vec!["https://remote.example/inbox".to_string()]);
        assert!(r.transport.fetches().is_empty());
        let (_, body) = &r.transport.deliveries()[0];
        let sent: Value = serde_json::from_slice(body).unwrap();
        assert_eq!(sent["id"], f.uri.as_str());
    }

    #[tokio::test]
    async fn local_followers_collection_expands_to_remote_inboxes() {
        let r = rig(testrig::config());
        let bob = testrig::remote_account(&r.db, "bob", "remote.example");
        let carol = testrig::remote_account(&r.db, "carol", "other.example");
        let dave = testrig::remote_account(&r.db, "dave", "remote.example");
        for follower in [&bob, &carol, &dave] {
            r.db.put_follow(&testrig::follow_edge(follower, &r.alice)).unwrap();
        }
        let inboxes = r
            .delivery
            .resolve_inboxes(r.transport.as_ref(), &[r.alice.followers_uri.clone()])
            .await
            .unwrap();
        let mut inboxes = inboxes;
        inboxes.sort();
        assert_eq!(
            inboxes,
            vec!["https://other.example/inbox".to_string(), "https://remote.example/inbox".to_string()]
        );
    }

    #[tokio::test]
    async fn remote_collections_stop_at_depth_limit() {
        let mut cfg = testrig::config();
        cfg.max_delivery_depth = Some(2);
        let r = rig(cfg);
        let erin = testrig::remote_account_unsaved("erin", "far.example");
        let frank = testrig::remote_account_unsaved("frank", "deep.example");
        r.transport.serve_json(
            "https://far.example/lists/outer",
            &json!({"type": "OrderedCollection", "orderedItems": [erin.uri, "https://far.example/lists/inner"]}),
        );
        r.transport.serve_json(
            "https://far.example/lists/inner",
            &json!({"type": "Collection", "items": [frank.uri]}),
        );
        r.transport.serve(&erin.uri, testrig::actor_json(&erin));
        r.transport.serve(&frank.uri, testrig::actor_json(&frank));

        let inboxes = r
            .delivery
            .resolve_inboxes(r.transport.as_ref(), &["https://far.example/lists/outer".to_string()])
            .await
            .unwrap();
        assert_eq!(inboxes, vec!["https://far.example/inbox".to_string()]);
        assert!(!r.transport.fetches().contains(&frank.uri));
    }

    #[tokio::test]
    async fn collection_cycles_terminate_when_unbounded() {
        let mut cfg = testrig::config();
        cfg.max_delivery_depth = Some(0);
        let r = rig(cfg);
        r.transport.serve_json(
            "https://loop.example/a",
            &json!({"type": "Collection", "items": ["https://loop.example/b"]}),
        );
        r.transport.serve_json(
            "https://loop.example/b",
            &json!({"type": "Collection", "items": ["https://loop.example/a"]}),
        );
        let inboxes = r
            .delivery
            .resolve_inboxes(r.transport.as_ref(), &["https://loop.example/a".to_string()])
            .await
            .unwrap();
        assert!(inboxes.is_empty());
        assert_eq!(r.transport.fetches().len(), 2);
    }

    #[tokio::test]
    async fn blocked_recipients_are_never_fetched() {
        let r = rig(testrig::config());
        r.db.put_domain_block(&DomainBlock {
            id: new_id(),
            domain: "bad.example".to_string(),
            created_by_account_id: r.alice.id.clone(),
            private_comment: String::new(),
            public_comment: String::new(),
            obfuscate: false,
            created_at_ms: now_ms(),
        })
        .unwrap();
        let inboxes = r
            .delivery
            .resolve_inboxes(r.transport.as_ref(), &["https://bad.example/users/mallory".to_string()])
            .await
            .unwrap();
        assert!(inboxes.is_empty());
        assert!(r.transport.fetches().is_empty());
    }

    #[tokio::test]
    async fn failures_are_reported_not_retried() {
        let r = rig(testrig::config());
        let bob = testrig::remote_account(&r.db, "bob", "remote.example");
        r.transport.fail_inbox("https://remote.example/inbox");
        let f = testrig::follow_edge(&r.alice, &bob);
        let report = r.delivery.send(&follow(&r.alice, &bob, &f)).await.unwrap();
        assert!(!report.is_complete());
        assert_eq!(report.failed_inboxes(), vec!["https://remote.example/inbox".to_string()]);
        assert!(r.transport.deliveries().is_empty());
    }

    #[tokio::test]
    async fn remote_actor_cannot_send() {
        let r = rig(testrig::config());
        let bob = testrig::remote_account(&r.db, "bob", "remote.example");
        let f = testrig::follow_edge(&bob, &r.alice);
        assert!(r.delivery.send(&follow(&bob, &r.alice, &f)).await.is_err());
    }
}
