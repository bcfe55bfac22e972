/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - FEDI3 Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

//! Local user actions: validate, persist, then hand the side effects to the
//! `FromClientAPI` channel.

use crate::bus::{AsyncBus, Envelope, Payload};
use crate::config::CoreConfig;
use crate::db::FedDb;
use crate::error::{FedError, FedResult};
use crate::keys::generate_keypair;
use crate::model::{new_id, now_ms, Account, Block, DomainBlock, Follow, FollowRequest, Mention, Status, Visibility};
use crate::typeutils::instance_from_document;
use crate::uris::{account_uris, block_uri, follow_uri, status_uri, status_url};
use crate::visibility::VisibilityFilter;
use kestrel_protocol::{ActivityType, ObjectKind};
use std::sync::Arc;
use tracing::info;

const MAX_USERNAME_LEN: usize = 64;

#[derive(Debug, Clone, Default)]
pub struct NewStatus {
    pub content: String,
    pub visibility: Visibility,
    pub in_reply_to_id: Option<String>,
    /// Ids of mentioned accounts.
    pub mentions: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum FollowOutcome {
    Following(Follow),
    Requested(FollowRequest),
}

#[derive(Clone)]
pub struct ClientApi {
    db: FedDb,
    cfg: Arc<CoreConfig>,
    bus: AsyncBus,
    filter: VisibilityFilter,
}

impl ClientApi {
    pub fn new(db: FedDb, cfg: Arc<CoreConfig>, bus: AsyncBus, filter: VisibilityFilter) -> Self {
        Self { db, cfg, bus, filter }
    }

    fn account(&self, id: &str) -> FedResult<Account> {
        self.db
            .account_by_id(id)?
            .filter(|a| !a.is_suspended())
            .ok_or_else(|| FedError::not_found(format!("account {id}")))
    }

    fn emit(&self, envelope: Envelope) {
        self.bus.from_client_api(envelope);
    }

    pub async fn account_create(&self, username: &str) -> FedResult<Account> {
        let username = username.trim().to_ascii_lowercase();
        if username.is_empty()
            || username.len() > MAX_USERNAME_LEN
            || !username.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
        {
            return Err(FedError::malformed(format!("invalid username: {username:?}")));
        }
        if self.db.local_account_by_username(&username)?.is_some() {
            return Err(FedError::malformed(format!("username taken: {username}")));
        }

        let bits = self.cfg.rsa_key_bits();
        let keys = tokio::task::spawn_blocking(move || generate_keypair(bits))
            .await
            .map_err(|e| FedError::Internal(anyhow::anyhow!("key generation task: {e}")))??;

        let uris = account_uris(&self.cfg.protocol, &self.cfg.host, &username);
        let now = now_ms();
        let account = Account {
            id: new_id(),
            username: username.clone(),
            domain: None,
            uri: uris.user_uri,
            url: uris.user_url,
            display_name: username,
            note: String::new(),
            inbox_uri: uris.inbox_uri,
            outbox_uri: uris.outbox_uri,
            followers_uri: uris.followers_uri,
            following_uri: uris.following_uri,
            shared_inbox_uri: Some(uris.shared_inbox_uri),
            public_key_pem: keys.public_key_pem,
            public_key_uri: uris.public_key_uri,
            private_key_pem: Some(keys.private_key_pem),
            actor_type: "Person".to_string(),
            locked: false,
            discoverable: true,
            bot: false,
            created_at_ms: now,
            updated_at_ms: now,
            suspended_at_ms: None,
        };
        self.db.put_account(&account)?;
        info!(username = %account.username, "account created");
        self.emit(Envelope::new(ObjectKind::Profile, ActivityType::Create, Payload::Account(account.clone())).origin(&account));
        Ok(account)
    }

    /// Follows `target_id`. Unlocked local targets are followed at once;
    /// everything else starts as a request.
    pub fn follow_create(&self, requester: &Account, target_id: &str) -> FedResult<FollowOutcome> {
        let target = self.account(target_id)?;
        if target.id == requester.id {
            return Err(FedError::malformed("cannot follow yourself"));
        }
        if self.db.blocked_either(&requester.id, &target.id)? {
            return Err(FedError::not_found(format!("account {target_id}")));
        }
        if let Some(existing) = self.db.follow_between(&requester.id, &target.id)? {
            return Ok(FollowOutcome::Following(existing));
        }
        if let Some(existing) = self.db.follow_request_between(&requester.id, &target.id)? {
            return Ok(FollowOutcome::Requested(existing));
        }

        let id = new_id();
        let request = FollowRequest {
            uri: follow_uri(&requester.uri, &id),
            id,
            account_id: requester.id.clone(),
            target_account_id: target.id.clone(),
            show_reblogs: true,
            notify: false,
            created_at_ms: now_ms(),
        };
        self.db.put_follow_request(&request)?;

        if target.is_local() && !target.locked {
            if let Some(follow) = self.db.accept_follow_request(&requester.id, &target.id)? {
                self.emit(
                    Envelope::new(ObjectKind::Follow, ActivityType::Create, Payload::Follow(follow.clone()))
                        .origin(requester)
                        .target(&target),
                );
                return Ok(FollowOutcome::Following(follow));
            }
        }
        self.emit(
            Envelope::new(ObjectKind::Follow, ActivityType::Create, Payload::FollowRequest(request.clone()))
                .origin(requester)
                .target(&target),
        );
        Ok(FollowOutcome::Requested(request))
    }

    /// Unfollows, or withdraws a pending request. `None` if there was neither.
    pub fn follow_remove(&self, requester: &Account, target_id: &str) -> FedResult<Option<Follow>> {
        let target = self.account(target_id)?;
        let edge = if let Some(f) = self.db.follow_between(&requester.id, &target.id)? {
            self.db.delete_follow(&f.id)?;
            f
        } else if let Some(r) = self.db.follow_request_between(&requester.id, &target.id)? {
            self.db.delete_follow_request(&r.id)?;
            r
        } else {
            return Ok(None);
        };
        self.emit(
            Envelope::new(ObjectKind::Follow, ActivityType::Undo, Payload::Follow(edge.clone()))
                .origin(requester)
                .target(&target),
        );
        Ok(Some(edge))
    }

    pub fn follow_request_accept(&self, owner: &Account, requester_id: &str) -> FedResult<Follow> {
        let requester = self.account(requester_id)?;
        let follow = self
            .db
            .accept_follow_request(&requester.id, &owner.id)?
            .ok_or_else(|| FedError::not_found(format!("follow request from {requester_id}")))?;
        self.emit(
            Envelope::new(ObjectKind::Follow, ActivityType::Accept, Payload::Follow(follow.clone()))
                .origin(owner)
                .target(&requester),
        );
        Ok(follow)
    }

    pub fn status_create(&self, author: &Account, new: NewStatus) -> FedResult<Status> {
        let content = new.content.trim();
        if content.is_empty() {
            return Err(FedError::malformed("status has no content"));
        }

        let parent = match new.in_reply_to_id.as_deref() {
            Some(id) => {
                let parent = self
                    .db
                    .status_by_id(id)?
                    .ok_or_else(|| FedError::not_found(format!("status {id}")))?;
                if !self.filter.visible(&parent, Some(author))? {
                    return Err(FedError::not_found(format!("status {id}")));
                }
                Some(parent)
            }
            None => None,
        };
        let mentioned = new
            .mentions
            .iter()
            .map(|id| self.account(id))
            .collect::<FedResult<Vec<_>>>()?;

        let id = new_id();
        let now = now_ms();
        let mentions: Vec<Mention> = mentioned
            .iter()
            .map(|target| Mention {
                id: new_id(),
                status_id: id.clone(),
                origin_account_id: author.id.clone(),
                target_account_id: target.id.clone(),
                created_at_ms: now,
            })
            .collect();
        let status = Status {
            uri: status_uri(&author.uri, &id),
            url: status_url(&author.url, &id),
            id,
            content: content.to_string(),
            account_id: author.id.clone(),
            account_uri: author.uri.clone(),
            in_reply_to_uri: parent.as_ref().map(|p| p.uri.clone()),
            in_reply_to_id: parent.as_ref().map(|p| p.id.clone()),
            in_reply_to_account_id: parent.as_ref().map(|p| p.account_id.clone()),
            boost_of_id: None,
            boost_of_account_id: None,
            visibility: new.visibility,
            local: true,
            federated: true,
            boostable: matches!(new.visibility, Visibility::Public | Visibility::Unlisted),
            likeable: true,
            mention_ids: mentions.iter().map(|m| m.id.clone()).collect(),
            created_at_ms: now,
        };
        self.db.put_status(&status)?;
        for mention in &mentions {
            self.db.put_mention(mention)?;
        }
        self.emit(Envelope::new(ObjectKind::Note, ActivityType::Create, Payload::Status(status.clone())).origin(author));
        Ok(status)
    }

    /// Deletes one of `author`'s statuses. Deleting a boost undoes it.
    pub fn status_delete(&self, author: &Account, status_id: &str) -> FedResult<Status> {
        let status = self
            .db
            .status_by_id(status_id)?
            .filter(|s| s.account_id == author.id)
            .ok_or_else(|| FedError::not_found(format!("status {status_id}")))?;
        self.db.delete_status(&status.id)?;
        let (object, activity) = match status.boost_id() {
            Some(_) => (ObjectKind::Announce, ActivityType::Undo),
            None => (ObjectKind::Note, ActivityType::Delete),
        };
        self.emit(Envelope::new(object, activity, Payload::Status(status.clone())).origin(author));
        Ok(status)
    }

    /// Boosts a status; boosting a boost boosts the original.
    pub fn status_boost(&self, booster: &Account, status_id: &str) -> FedResult<Status> {
        let mut target = self
            .db
            .status_by_id(status_id)?
            .ok_or_else(|| FedError::not_found(format!("status {status_id}")))?;
        if let Some(original) = target.boost_id() {
            target = self
                .db
                .status_by_id(original)?
                .ok_or_else(|| FedError::not_found(format!("status {original}")))?;
        }
        if !self.filter.visible(&target, Some(booster))? {
            return Err(FedError::not_found(format!("status {status_id}")));
        }
        if !target.boostable {
            return Err(FedError::malformed(format!("status {} cannot be boosted", target.id)));
        }
        if let Some(existing) = self.db.boost_by(&booster.id, &target.id)? {
            return Ok(existing);
        }

        let id = new_id();
        let boost = Status {
            uri: status_uri(&booster.uri, &id),
            url: status_url(&booster.url, &id),
            id,
            content: String::new(),
            account_id: booster.id.clone(),
            account_uri: booster.uri.clone(),
            in_reply_to_uri: None,
            in_reply_to_id: None,
            in_reply_to_account_id: None,
            boost_of_id: Some(target.id.clone()),
            boost_of_account_id: Some(target.account_id.clone()),
            visibility: target.visibility,
            local: true,
            federated: target.federated,
            boostable: false,
            likeable: false,
            mention_ids: Vec::new(),
            created_at_ms: now_ms(),
        };
        self.db.put_status(&boost)?;
        self.emit(Envelope::new(ObjectKind::Announce, ActivityType::Create, Payload::Status(boost.clone())).origin(booster));
        Ok(boost)
    }

    /// Blocks `target_id` and severs follows in both directions.
    pub fn block_create(&self, blocker: &Account, target_id: &str) -> FedResult<Block> {
        let target = self
            .db
            .account_by_id(target_id)?
            .ok_or_else(|| FedError::not_found(format!("account {target_id}")))?;
        if target.id == blocker.id {
            return Err(FedError::malformed("cannot block yourself"));
        }
        if let Some(existing) = self.db.block_between(&blocker.id, &target.id)? {
            return Ok(existing);
        }
        let id = new_id();
        let block = Block {
            uri: block_uri(&blocker.uri, &id),
            id,
            account_id: blocker.id.clone(),
            target_account_id: target.id.clone(),
            created_at_ms: now_ms(),
        };
        self.db.put_block(&block)?;
        for (a, b) in [(&blocker.id, &target.id), (&target.id, &blocker.id)] {
            if let Some(f) = self.db.follow_between(a, b)? {
                self.db.delete_follow(&f.id)?;
            }
            if let Some(r) = self.db.follow_request_between(a, b)? {
                self.db.delete_follow_request(&r.id)?;
            }
        }
        self.emit(
            Envelope::new(ObjectKind::Block, ActivityType::Create, Payload::Block(block.clone()))
                .origin(blocker)
                .target(&target),
        );
        Ok(block)
    }

    pub fn block_remove(&self, blocker: &Account, target_id: &str) -> FedResult<Option<Block>> {
        let Some(block) = self.db.block_between(&blocker.id, target_id)? else {
            return Ok(None);
        };
        self.db.delete_block(&block.id)?;
        let mut envelope =
            Envelope::new(ObjectKind::Block, ActivityType::Undo, Payload::Block(block.clone())).origin(blocker);
        if let Some(target) = self.db.account_by_id(target_id)? {
            envelope = envelope.target(&target);
        }
        self.emit(envelope);
        Ok(Some(block))
    }

    /// Blocks a whole domain. The instance record is suspended and linked
    /// to the block, and the domain's instance actor is removed.
    pub fn domain_block_create(
        &self,
        admin: &Account,
        domain: &str,
        public_comment: &str,
        private_comment: &str,
        obfuscate: bool,
    ) -> FedResult<DomainBlock> {
        if !admin.is_local() {
            return Err(FedError::malformed("only local accounts can block domains"));
        }
        let domain = domain.trim().trim_end_matches('.').to_ascii_lowercase();
        if domain.is_empty() || domain.contains('/') {
            return Err(FedError::malformed(format!("invalid domain: {domain:?}")));
        }
        if self.cfg.is_local_host(&domain) {
            return Err(FedError::malformed("cannot block our own domain"));
        }
        if let Some(existing) = self.db.domain_block(&domain)? {
            return Ok(existing);
        }

        let now = now_ms();
        let block = DomainBlock {
            id: new_id(),
            domain: domain.clone(),
            created_by_account_id: admin.id.clone(),
            private_comment: private_comment.to_string(),
            public_comment: public_comment.to_string(),
            obfuscate,
            created_at_ms: now,
        };
        self.db.put_domain_block(&block)?;

        match self.db.instance_by_domain(&domain)? {
            Some(mut instance) => {
                instance.suspended_at_ms = Some(now);
                instance.domain_block_id = Some(block.id.clone());
                self.db.update_instance(&instance)?;
            }
            None => {
                let mut instance = instance_from_document(&domain, None);
                instance.suspended_at_ms = Some(now);
                instance.domain_block_id = Some(block.id.clone());
                self.db.put_instance(&instance)?;
            }
        }
        let removed = self.db.delete_instance_account(&domain)?;
        info!(%domain, removed, "domain blocked");
        Ok(block)
    }

    /// Soft delete: profile wiped, relationships dropped, account suspended.
    pub fn account_delete(&self, account: &Account) -> FedResult<Account> {
        let mut deleted = self
            .db
            .account_by_id(&account.id)?
            .ok_or_else(|| FedError::not_found(format!("account {}", account.id)))?;
        if deleted.is_suspended() {
            return Ok(deleted);
        }
        let now = now_ms();
        deleted.display_name.clear();
        deleted.note.clear();
        deleted.locked = true;
        deleted.discoverable = false;
        deleted.updated_at_ms = now;
        deleted.suspended_at_ms = Some(now);
        self.db.update_account(&deleted)?;
        self.db.delete_relationships_of(&deleted.id)?;
        info!(uri = %deleted.uri, "account deleted");
        self.emit(Envelope::new(ObjectKind::Profile, ActivityType::Delete, Payload::Account(deleted.clone())).origin(&deleted));
        Ok(deleted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::BusReceivers;
    use crate::testrig;
    use std::time::Duration;

    struct Rig {
        _dir: tempfile::TempDir,
        db: FedDb,
        cfg: Arc<CoreConfig>,
        api: ClientApi,
        rx: BusReceivers,
    }

    fn rig() -> Rig {
        let (dir, db) = testrig::temp_db();
        let cfg = Arc::new(testrig::config());
        let (bus, rx) = AsyncBus::new(16);
        let filter = VisibilityFilter::new(db.clone(), cfg.clone());
        let api = ClientApi::new(db.clone(), cfg.clone(), bus, filter);
        Rig {
            _dir: dir,
            db,
            cfg,
            api,
            rx,
        }
    }

    async fn next(rx: &mut BusReceivers) -> Envelope {
        tokio::time::timeout(Duration::from_secs(2), rx.client_api.recv())
            .await
            .unwrap()
            .unwrap()
    }

    #[tokio::test]
    async fn account_create_validates_and_stores_keys() {
        let mut r = rig();
        let a = r.api.account_create("Zed_1").await.unwrap();
        assert_eq!(a.username, "zed_1");
        assert!(a.is_local());
        assert!(a.private_key_pem.is_some());
        assert_eq!(r.db.local_account_by_username("zed_1").unwrap().unwrap().id, a.id);
        assert_eq!(next(&mut r.rx).await.object, ObjectKind::Profile);

        assert!(matches!(r.api.account_create("zed_1").await, Err(FedError::Malformed(_))));
        assert!(matches!(r.api.account_create("no spaces").await, Err(FedError::Malformed(_))));
    }

    #[tokio::test]
    async fn follow_unlocked_local_is_immediate() {
        let mut r = rig();
        let alice = testrig::local_account(&r.db, &r.cfg, "alice");
        let carol = testrig::local_account(&r.db, &r.cfg, "carol");
        let out = r.api.follow_create(&alice, &carol.id).unwrap();
        assert!(matches!(out, FollowOutcome::Following(_)));
        assert!(r.db.follows(&alice.id, &carol.id).unwrap());
        let env = next(&mut r.rx).await;
        assert!(matches!(env.payload, Payload::Follow(_)));

        // Second call is idempotent.
        assert_eq!(r.api.follow_create(&alice, &carol.id).unwrap(), out);
    }

    #[tokio::test]
    async fn follow_remote_starts_as_request() {
        let mut r = rig();
        let alice = testrig::local_account(&r.db, &r.cfg, "alice");
        let bob = testrig::remote_account(&r.db, "bob", "remote.example");
        let out = r.api.follow_create(&alice, &bob.id).unwrap();
        let FollowOutcome::Requested(req) = out else {
            panic!("expected a request");
        };
        assert!(req.uri.starts_with(&alice.uri));
        assert!(!r.db.follows(&alice.id, &bob.id).unwrap());
        let env = next(&mut r.rx).await;
        assert_eq!((env.object, env.activity), (ObjectKind::Follow, ActivityType::Create));
        assert!(matches!(env.payload, Payload::FollowRequest(_)));

        let removed = r.api.follow_remove(&alice, &bob.id).unwrap().unwrap();
        assert_eq!(removed.id, req.id);
        assert!(r.db.follow_request_between(&alice.id, &bob.id).unwrap().is_none());
        assert_eq!(next(&mut r.rx).await.activity, ActivityType::Undo);
    }

    #[tokio::test]
    async fn locked_account_accepts_request_explicitly() {
        let r = rig();
        let alice = testrig::local_account(&r.db, &r.cfg, "alice");
        let mut carol = testrig::local_account(&r.db, &r.cfg, "carol");
        carol.locked = true;
        r.db.update_account(&carol).unwrap();

        assert!(matches!(
            r.api.follow_create(&alice, &carol.id).unwrap(),
            FollowOutcome::Requested(_)
        ));
        let follow = r.api.follow_request_accept(&carol, &alice.id).unwrap();
        assert_eq!(follow.account_id, alice.id);
        assert!(r.db.follows(&alice.id, &carol.id).unwrap());
        assert!(r.api.follow_request_accept(&carol, &alice.id).unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn blocked_target_cannot_be_followed() {
        let r = rig();
        let alice = testrig::local_account(&r.db, &r.cfg, "alice");
        let bob = testrig::remote_account(&r.db, "bob", "remote.example");
        r.api.block_create(&bob, &alice.id).unwrap();
        assert!(r.api.follow_create(&alice, &bob.id).unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn block_severs_follows_both_ways() {
        let r = rig();
        let alice = testrig::local_account(&r.db, &r.cfg, "alice");
        let bob = testrig::remote_account(&r.db, "bob", "remote.example");
        r.db.put_follow(&testrig::follow_edge(&alice, &bob)).unwrap();
        r.db.put_follow(&testrig::follow_edge(&bob, &alice)).unwrap();

        let block = r.api.block_create(&alice, &bob.id).unwrap();
        assert!(!r.db.follows(&alice.id, &bob.id).unwrap());
        assert!(!r.db.follows(&bob.id, &alice.id).unwrap());
        assert_eq!(r.api.block_create(&alice, &bob.id).unwrap().id, block.id);

        assert!(r.api.block_remove(&alice, &bob.id).unwrap().is_some());
        assert!(!r.db.blocked_either(&alice.id, &bob.id).unwrap());
        assert!(r.api.block_remove(&alice, &bob.id).unwrap().is_none());
    }

    #[tokio::test]
    async fn status_create_records_reply_and_mentions() {
        let r = rig();
        let alice = testrig::local_account(&r.db, &r.cfg, "alice");
        let bob = testrig::remote_account(&r.db, "bob", "remote.example");
        let parent = testrig::status(&r.db, &bob, 1_000);

        let status = r
            .api
            .status_create(
                &alice,
                NewStatus {
                    content: "hi @bob".to_string(),
                    visibility: Visibility::Public,
                    in_reply_to_id: Some(parent.id.clone()),
                    mentions: vec![bob.id.clone()],
                },
            )
            .unwrap();
        assert_eq!(status.in_reply_to_uri.as_deref(), Some(parent.uri.as_str()));
        assert_eq!(status.in_reply_to_account_id.as_deref(), Some(bob.id.as_str()));
        assert_eq!(status.mention_ids.len(), 1);
        let mention = r.db.mention_by_id(&status.mention_ids[0]).unwrap().unwrap();
        assert_eq!(mention.target_account_id, bob.id);
        assert_eq!(r.db.status_by_id(&status.id).unwrap().unwrap(), status);
    }

    #[tokio::test]
    async fn status_create_rejects_empty_and_unknown_reply() {
        let r = rig();
        let alice = testrig::local_account(&r.db, &r.cfg, "alice");
        let empty = NewStatus {
            content: "   ".to_string(),
            ..NewStatus::default()
        };
        assert!(matches!(r.api.status_create(&alice, empty), Err(FedError::Malformed(_))));
        let orphan = NewStatus {
            content: "x".to_string(),
            in_reply_to_id: Some("missing".to_string()),
            ..NewStatus::default()
        };
        assert!(r.api.status_create(&alice, orphan).unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn only_the_author_deletes_a_status() {
        let r = rig();
        let alice = testrig::local_account(&r.db, &r.cfg, "alice");
        let carol = testrig::local_account(&r.db, &r.cfg, "carol");
        let status = testrig::status(&r.db, &alice, 1_000);

        assert!(r.api.status_delete(&carol, &status.id).unwrap_err().is_not_found());
        assert_eq!(r.api.status_delete(&alice, &status.id).unwrap().id, status.id);
        assert!(r.db.status_by_id(&status.id).unwrap().is_none());
        assert!(r.api.status_delete(&alice, &status.id).unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn boost_unwraps_and_is_idempotent() {
        let r = rig();
        let alice = testrig::local_account(&r.db, &r.cfg, "alice");
        let carol = testrig::local_account(&r.db, &r.cfg, "carol");
        let bob = testrig::remote_account(&r.db, "bob", "remote.example");
        let original = testrig::status(&r.db, &bob, 1_000);

        let carols = r.api.status_boost(&carol, &original.id).unwrap();
        let alices = r.api.status_boost(&alice, &carols.id).unwrap();
        assert_eq!(alices.boost_of_id.as_deref(), Some(original.id.as_str()));
        assert_eq!(alices.boost_of_account_id.as_deref(), Some(bob.id.as_str()));
        assert_eq!(r.api.status_boost(&alice, &original.id).unwrap().id, alices.id);
    }

    #[tokio::test]
    async fn direct_status_cannot_be_boosted() {
        let r = rig();
        let alice = testrig::local_account(&r.db, &r.cfg, "alice");
        let mut dm = testrig::status_unsaved(&alice, 1_000);
        dm.visibility = Visibility::Direct;
        dm.boostable = false;
        r.db.put_status(&dm).unwrap();
        assert!(matches!(r.api.status_boost(&alice, &dm.id), Err(FedError::Malformed(_))));
    }

    #[tokio::test]
    async fn domain_block_suspends_instance_and_drops_instance_actor() {
        let r = rig();
        let admin = testrig::local_account(&r.db, &r.cfg, "admin");
        testrig::remote_account(&r.db, "remote.example", "remote.example");
        r.db.put_instance(&instance_from_document("remote.example", None)).unwrap();

        let block = r
            .api
            .domain_block_create(&admin, "Remote.Example.", "spam", "", false)
            .unwrap();
        assert_eq!(block.domain, "remote.example");
        let instance = r.db.instance_by_domain("remote.example").unwrap().unwrap();
        assert!(instance.suspended_at_ms.is_some());
        assert_eq!(instance.domain_block_id.as_deref(), Some(block.id.as_str()));
        assert!(r.db.account_by_uri("https://remote.example/users/remote.example").unwrap().is_none());
        assert!(r.db.is_domain_blocked("sub.remote.example").unwrap());

        assert_eq!(
            r.api.domain_block_create(&admin, "remote.example", "", "", false).unwrap().id,
            block.id
        );
        assert!(matches!(
            r.api.domain_block_create(&admin, "social.example", "", "", false),
            Err(FedError::Malformed(_))
        ));
    }

    #[tokio::test]
    async fn domain_block_creates_missing_instance_record() {
        let r = rig();
        let admin = testrig::local_account(&r.db, &r.cfg, "admin");
        r.api.domain_block_create(&admin, "fresh.example", "", "", true).unwrap();
        let instance = r.db.instance_by_domain("fresh.example").unwrap().unwrap();
        assert!(instance.suspended_at_ms.is_some());
    }

    #[tokio::test]
    async fn account_delete_wipes_and_suspends() {
        let mut r = rig();
        let alice = testrig::local_account(&r.db, &r.cfg, "alice");
        let bob = testrig::remote_account(&r.db, "bob", "remote.example");
        r.db.put_follow(&testrig::follow_edge(&bob, &alice)).unwrap();

        let deleted = r.api.account_delete(&alice).unwrap();
        assert!(deleted.is_suspended());
        assert!(deleted.display_name.is_empty());
        assert!(!r.db.follows(&bob.id, &alice.id).unwrap());
        let env = next(&mut r.rx).await;
        assert_eq!((env.object, env.activity), (ObjectKind::Profile, ActivityType::Delete));

        // Suspended accounts are invisible to the write path.
        assert!(r.api.follow_create(&bob, &alice.id).unwrap_err().is_not_found());
    }
}
