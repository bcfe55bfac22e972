/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - FEDI3 Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

//! Inbox pipeline.
//!
//! One POST walks `Received -> BodyParsed -> Authenticated ->
//! AuthorizationChecked -> Dispatched -> Forwarded -> Accepted`, or stops in
//! `Rejected`. Everything a step learns is kept on the request-scoped
//! [`InboxContext`]; handlers are selected from a table keyed by
//! (activity type, object kind).

use crate::authenticate::{host_blocked, AuthOutcome, RequestAuthenticator, SignedRequest};
use crate::bus::{AsyncBus, Envelope, Payload};
use crate::config::CoreConfig;
use crate::db::FedDb;
use crate::error::{FedError, FedResult};
use crate::model::{new_id, now_ms, Account, Follow, Status};
use crate::outbound::Delivery;
use crate::transport::{Transport, TransportController};
use crate::typeutils::{account_from_actor, instance_from_document, visibility_from_audience};
use crate::uris::{authority_from_url, host_from_url, parse_user_path, UserPath};
use http::{StatusCode, Uri};
use kestrel_protocol::{id_of, iris_of, type_of, ActivityType, ActorDocument, InstanceDocument, ObjectKind};
use serde_json::Value;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info, trace, warn};

/// An inbox POST addressed to the local account `username`.
#[derive(Debug, Clone)]
pub struct InboxRequest {
    pub username: String,
    pub request: SignedRequest,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    Unauthenticated,
    Blocked,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InboxState {
    Received,
    BodyParsed,
    Authenticated,
    AuthorizationChecked,
    Dispatched,
    Forwarded,
    Accepted,
    Rejected(Rejection),
}

impl InboxState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, InboxState::Accepted | InboxState::Rejected(_))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboxOutcome {
    Accepted { activity_type: String, forwarded: usize },
    Unauthenticated,
    Blocked,
}

impl InboxOutcome {
    pub fn status_code(&self) -> StatusCode {
        match self {
            InboxOutcome::Accepted { .. } => StatusCode::ACCEPTED,
            InboxOutcome::Unauthenticated | InboxOutcome::Blocked => StatusCode::FORBIDDEN,
        }
    }
}

impl From<Rejection> for InboxOutcome {
    fn from(r: Rejection) -> Self {
        match r {
            Rejection::Unauthenticated => InboxOutcome::Unauthenticated,
            Rejection::Blocked => InboxOutcome::Blocked,
        }
    }
}

/// A decoded inbound activity.
#[derive(Debug, Clone, PartialEq)]
pub struct Activity {
    pub id: Option<String>,
    pub type_name: String,
    /// `None` for types we do not recognise.
    pub kind: Option<ActivityType>,
    pub actors: Vec<String>,
    pub object: Value,
    pub object_kind: ObjectKind,
    pub to: Vec<String>,
    pub cc: Vec<String>,
}

impl Activity {
    pub fn parse(body: &[u8]) -> FedResult<Self> {
        let raw: Value =
            serde_json::from_slice(body).map_err(|e| FedError::malformed(format!("activity is not json: {e}")))?;
        if !raw.is_object() {
            return Err(FedError::malformed("activity is not an object"));
        }
        let type_name = type_of(&raw)
            .filter(|t| !t.is_empty())
            .ok_or_else(|| FedError::malformed("activity has no type"))?
            .to_string();
        let actors = iris_of(raw.get("actor"));
        if actors.is_empty() {
            return Err(FedError::malformed("activity has no actor"));
        }
        let object = raw.get("object").cloned().unwrap_or(Value::Null);
        let object_kind = type_of(&object).map(ObjectKind::from_as_type).unwrap_or(ObjectKind::Other);
        Ok(Self {
            id: id_of(&raw).map(str::to_string),
            kind: ActivityType::parse(&type_name),
            type_name,
            actors,
            object,
            object_kind,
            to: iris_of(raw.get("to")),
            cc: iris_of(raw.get("cc")),
        })
    }

    pub fn object_id(&self) -> Option<&str> {
        id_of(&self.object)
    }

    fn audience(&self) -> impl Iterator<Item = &String> {
        self.to.iter().chain(self.cc.iter())
    }
}

/// Request-scoped state threaded through the pipeline steps.
pub struct InboxContext {
    pub request: InboxRequest,
    pub state: InboxState,
    pub activity: Option<Activity>,
    pub requested: Option<Account>,
    pub requesting: Option<Account>,
    pub forwarded: usize,
}

impl InboxContext {
    pub fn new(request: InboxRequest) -> Self {
        Self {
            request,
            state: InboxState::Received,
            activity: None,
            requested: None,
            requesting: None,
            forwarded: 0,
        }
    }

    fn resolved(&self) -> FedResult<Resolved<'_>> {
        match (&self.activity, &self.requesting, &self.requested) {
            (Some(activity), Some(requesting), Some(requested)) => Ok(Resolved {
                activity,
                requesting,
                requested,
            }),
            _ => Err(FedError::Internal(anyhow::anyhow!(
                "inbox context incomplete in state {:?}",
                self.state
            ))),
        }
    }
}

/// What a handler gets to see.
struct Resolved<'a> {
    activity: &'a Activity,
    requesting: &'a Account,
    requested: &'a Account,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Route {
    /// Recognised and deliberately left alone at this layer.
    Ignore,
    UndoFollow,
    AcceptFollow,
    Announce,
    Default,
}

/// `None` matches any object kind. First match wins.
const ROUTES: &[(ActivityType, Option<ObjectKind>, Route)] = &[
    (ActivityType::Follow, None, Route::Ignore),
    (ActivityType::Undo, Some(ObjectKind::Follow), Route::UndoFollow),
    (ActivityType::Undo, Some(ObjectKind::Other), Route::UndoFollow),
    (ActivityType::Accept, Some(ObjectKind::Follow), Route::AcceptFollow),
    (ActivityType::Accept, Some(ObjectKind::Other), Route::AcceptFollow),
    (ActivityType::Announce, None, Route::Announce),
];

fn route(activity: ActivityType, object: ObjectKind) -> Route {
    ROUTES
        .iter()
        .find(|(a, o, _)| *a == activity && o.map_or(true, |o| o == object))
        .map(|(_, _, r)| *r)
        .unwrap_or(Route::Default)
}

#[derive(Clone)]
pub struct InboxDispatcher {
    db: FedDb,
    cfg: Arc<CoreConfig>,
    authenticator: RequestAuthenticator,
    transports: Arc<dyn TransportController>,
    delivery: Delivery,
    bus: AsyncBus,
}

impl InboxDispatcher {
    pub fn new(
        db: FedDb,
        cfg: Arc<CoreConfig>,
        authenticator: RequestAuthenticator,
        transports: Arc<dyn TransportController>,
        delivery: Delivery,
        bus: AsyncBus,
    ) -> Self {
        Self {
            db,
            cfg,
            authenticator,
            transports,
            delivery,
            bus,
        }
    }

    /// Runs one inbox POST to a terminal state.
    ///
    /// Rejections are outcomes; `Err` means the caller writes the error response.
    pub async fn process(&self, request: InboxRequest) -> FedResult<InboxOutcome> {
        let mut ctx = InboxContext::new(request);
        loop {
            let next = match ctx.state {
                InboxState::Received => self.parse_body(&mut ctx)?,
                InboxState::BodyParsed => self.authenticate(&mut ctx).await?,
                InboxState::Authenticated => self.check_authorization(&ctx)?,
                InboxState::AuthorizationChecked => self.dispatch(&ctx)?,
                InboxState::Dispatched => self.forward(&mut ctx)?,
                InboxState::Forwarded => InboxState::Accepted,
                InboxState::Accepted => {
                    let activity_type = ctx.activity.as_ref().map(|a| a.type_name.clone()).unwrap_or_default();
                    return Ok(InboxOutcome::Accepted {
                        activity_type,
                        forwarded: ctx.forwarded,
                    });
                }
                InboxState::Rejected(r) => return Ok(r.into()),
            };
            trace!(from = ?ctx.state, to = ?next, "inbox step");
            ctx.state = next;
        }
    }

    fn parse_body(&self, ctx: &mut InboxContext) -> FedResult<InboxState> {
        ctx.activity = Some(Activity::parse(&ctx.request.request.body)?);
        Ok(InboxState::BodyParsed)
    }

    async fn authenticate(&self, ctx: &mut InboxContext) -> FedResult<InboxState> {
        let requested = self
            .db
            .local_account_by_username(&ctx.request.username)?
            .filter(|a| !a.is_suspended())
            .ok_or_else(|| FedError::not_found(format!("account {}", ctx.request.username)))?;

        let outcome = self.authenticator.authenticate(&requested, &ctx.request.request).await?;
        ctx.requested = Some(requested.clone());
        let (owner_uri, key_id, actor) = match outcome {
            AuthOutcome::Authenticated {
                key_owner_uri,
                key_id,
                actor,
            } => (key_owner_uri, key_id, actor),
            AuthOutcome::Blocked { host } => {
                info!(%host, username = %ctx.request.username, "inbox post from blocked domain");
                return Ok(InboxState::Rejected(Rejection::Blocked));
            }
            AuthOutcome::Unverified => {
                debug!(username = %ctx.request.username, "inbox post not authenticated");
                return Ok(InboxState::Rejected(Rejection::Unauthenticated));
            }
        };

        let transport = self.transport_for(&requested)?;
        let Some(requesting) = self
            .requesting_account(&owner_uri, &key_id, actor, &requested, transport.as_ref())
            .await?
        else {
            return Ok(InboxState::Rejected(Rejection::Unauthenticated));
        };
        if !requesting.is_local() {
            self.ensure_instance(&requesting.uri, transport.as_ref()).await?;
        }
        ctx.requesting = Some(requesting);
        Ok(InboxState::Authenticated)
    }

    fn transport_for(&self, account: &Account) -> FedResult<Arc<dyn Transport>> {
        let key = account
            .private_key_pem
            .as_deref()
            .ok_or_else(|| FedError::Internal(anyhow::anyhow!("local account {} has no private key", account.username)))?;
        Ok(self.transports.new_transport(&account.public_key_uri, key)?)
    }

    /// Account of the key owner.
    ///
    /// A stored account is used as is when its key is `key_id`. Otherwise the
    /// owner's actor document (the one fetched with the key, else a fresh
    /// dereference) must publish `key_id`; `None` when it does not.
    async fn requesting_account(
        &self,
        owner_uri: &str,
        key_id: &str,
        fetched: Option<ActorDocument>,
        requested: &Account,
        transport: &dyn Transport,
    ) -> FedResult<Option<Account>> {
        let stored = self.db.account_by_uri(owner_uri)?;
        if stored.as_ref().is_some_and(|a| a.public_key_uri == key_id) {
            return Ok(stored);
        }

        let doc = match fetched {
            Some(doc) => doc,
            None => {
                let bytes = transport.dereference(owner_uri).await.map_err(FedError::Transport)?;
                serde_json::from_slice::<ActorDocument>(&bytes)
                    .map_err(|e| FedError::malformed(format!("actor {owner_uri}: {e}")))?
            }
        };
        if doc.id != owner_uri {
            return Err(FedError::malformed(format!("actor document {} served for {owner_uri}", doc.id)));
        }
        if !doc.public_keys().iter().any(|k| k.id == key_id) {
            info!(owner = owner_uri, key_id, "key is not published by the actor it names");
            return Ok(None);
        }
        let account = account_from_actor(&doc, Some(key_id))?;

        if let Some(mut existing) = stored {
            existing.public_key_uri = account.public_key_uri;
            existing.public_key_pem = account.public_key_pem;
            self.db.update_account(&existing)?;
            info!(uri = %existing.uri, "remote account key updated");
            return Ok(Some(existing));
        }
        if let Err(e) = self.db.put_account(&account) {
            // A concurrent request may have stored it first.
            return match self.db.account_by_uri(owner_uri)? {
                Some(existing) => Ok(Some(existing)),
                None => Err(FedError::Internal(e)),
            };
        }
        info!(uri = %account.uri, "stored new remote account");
        self.bus.from_federator(
            Envelope::new(ObjectKind::Profile, ActivityType::Create, Payload::Account(account.clone()))
                .origin(&account)
                .target(requested),
        );
        Ok(Some(account))
    }

    /// Records the sender's instance the first time we hear from it.
    async fn ensure_instance(&self, actor_uri: &str, transport: &dyn Transport) -> FedResult<()> {
        let Some(domain) = authority_from_url(actor_uri) else {
            return Ok(());
        };
        if self.db.instance_by_domain(&domain)?.is_some() {
            return Ok(());
        }
        let scheme = actor_uri
            .parse::<Uri>()
            .ok()
            .and_then(|u| u.scheme_str().map(str::to_string))
            .unwrap_or_else(|| "https".to_string());
        let doc = match transport.dereference(&format!("{scheme}://{domain}/api/v1/instance")).await {
            Ok(bytes) => serde_json::from_slice::<InstanceDocument>(&bytes).ok(),
            Err(e) => {
                debug!(%domain, "instance document unavailable: {e:#}");
                None
            }
        };
        let instance = instance_from_document(&domain, doc);
        if let Err(e) = self.db.put_instance(&instance) {
            if self.db.instance_by_domain(&domain)?.is_none() {
                return Err(FedError::Internal(e));
            }
        }
        Ok(())
    }

    /// Domain and account blocks for every originator of the activity.
    fn check_authorization(&self, ctx: &InboxContext) -> FedResult<InboxState> {
        let r = ctx.resolved()?;
        let originators = r
            .activity
            .actors
            .iter()
            .map(String::as_str)
            .chain(std::iter::once(r.requesting.uri.as_str()));
        for uri in originators {
            if let Some(host) = host_from_url(uri) {
                if !self.cfg.is_local_host(&host) && host_blocked(&self.db, &self.cfg, &host)? {
                    info!(actor = uri, "activity from blocked domain");
                    return Ok(InboxState::Rejected(Rejection::Blocked));
                }
            }
            let account = if uri == r.requesting.uri {
                Some(r.requesting.clone())
            } else {
                self.db.account_by_uri(uri)?
            };
            if let Some(account) = account {
                if self.db.blocked_either(&r.requested.id, &account.id)? {
                    info!(actor = uri, target = %r.requested.username, "activity from blocked account");
                    return Ok(InboxState::Rejected(Rejection::Blocked));
                }
            }
        }
        Ok(InboxState::AuthorizationChecked)
    }

    fn dispatch(&self, ctx: &InboxContext) -> FedResult<InboxState> {
        let r = ctx.resolved()?;
        let Some(kind) = r.activity.kind else {
            info!(kind = %r.activity.type_name, actor = %r.requesting.uri, "ignoring unrecognised activity");
            return Ok(InboxState::Dispatched);
        };
        let handled = match route(kind, r.activity.object_kind) {
            Route::Ignore | Route::Default => Ok(None),
            Route::UndoFollow => undo_follow(&r, &self.db),
            Route::AcceptFollow => accept_follow(&r, &self.db),
            Route::Announce => announce(&r, &self.db),
        };
        match handled {
            Ok(Some(envelope)) => {
                self.bus.from_federator(envelope);
            }
            Ok(None) => {}
            Err(FedError::NotFound(what)) => debug!(kind = kind.as_str(), "nothing to do: {what}"),
            Err(e) => return Err(e),
        }
        Ok(InboxState::Dispatched)
    }

    /// Forwards the original body to remote followers of local accounts
    /// whose followers collection is addressed, when the activity concerns
    /// a thread rooted on this server.
    fn forward(&self, ctx: &mut InboxContext) -> FedResult<InboxState> {
        let r = ctx.resolved()?;
        let owners = self.addressed_local_collections(r.activity)?;
        if owners.is_empty() {
            return Ok(InboxState::Forwarded);
        }
        if !self.reaches_local_status(r.activity)? {
            debug!(id = ?r.activity.id, "not forwarding, thread is not ours");
            return Ok(InboxState::Forwarded);
        }

        let sender_host = host_from_url(&r.requesting.uri);
        let mut total = 0;
        for owner in owners {
            let mut inboxes = Vec::new();
            for inbox in self.db.remote_follower_inboxes(&owner.id)? {
                let Some(host) = host_from_url(&inbox) else {
                    continue;
                };
                if Some(&host) == sender_host.as_ref() || host_blocked(&self.db, &self.cfg, &host)? {
                    continue;
                }
                inboxes.push(inbox);
            }
            if inboxes.is_empty() {
                continue;
            }
            total += inboxes.len();
            let delivery = self.delivery.clone();
            let body = ctx.request.request.body.to_vec();
            tokio::spawn(async move {
                match delivery.deliver_to(&owner, inboxes, body).await {
                    Ok(report) if !report.is_complete() => {
                        info!(owner = %owner.username, failed = report.failed.len(), "forwarding incomplete")
                    }
                    Ok(_) => {}
                    Err(e) => warn!(owner = %owner.username, "forwarding failed: {e:#}"),
                }
            });
        }
        ctx.forwarded = total;
        Ok(InboxState::Forwarded)
    }

    fn addressed_local_collections(&self, activity: &Activity) -> FedResult<Vec<Account>> {
        let mut owners: Vec<Account> = Vec::new();
        for iri in activity.audience() {
            let Some(host) = host_from_url(iri) else {
                continue;
            };
            if !self.cfg.is_local_host(&host) {
                continue;
            }
            let Ok(uri) = iri.parse::<Uri>() else {
                continue;
            };
            if let Some(UserPath::Followers(username)) = parse_user_path(uri.path()) {
                if let Some(owner) = self.db.local_account_by_username(username)? {
                    if !owners.iter().any(|o| o.id == owner.id) {
                        owners.push(owner);
                    }
                }
            }
        }
        Ok(owners)
    }

    /// Walks `object` / `inReplyTo` / boost links through the store,
    /// breadth first, up to the forwarding depth.
    fn reaches_local_status(&self, activity: &Activity) -> FedResult<bool> {
        let limit = self.cfg.inbox_forwarding_depth();
        let mut frontier: Vec<String> = activity.object_id().map(str::to_string).into_iter().collect();
        frontier.extend(iris_of(activity.object.get("inReplyTo")));
        let mut visited = HashSet::new();
        let mut depth = 1;
        while !frontier.is_empty() && limit.allows(depth) {
            let mut next = Vec::new();
            for iri in frontier {
                if !visited.insert(iri.clone()) {
                    continue;
                }
                let Some(status) = self.db.status_by_uri(&iri)? else {
                    continue;
                };
                if status.local {
                    return Ok(true);
                }
                if let Some(parent) = status.reply_uri() {
                    next.push(parent.to_string());
                }
                if let Some(boosted) = status.boost_id() {
                    if let Some(b) = self.db.status_by_id(boosted)? {
                        next.push(b.uri);
                    }
                }
            }
            frontier = next;
            depth += 1;
        }
        Ok(false)
    }
}

fn undo_follow(r: &Resolved<'_>, db: &FedDb) -> FedResult<Option<Envelope>> {
    let object = &r.activity.object;
    if let Some(uri) = id_of(object) {
        if let Some(follow) = db.follow_by_uri(uri)? {
            return remove_follow(r, db, follow, false);
        }
        if let Some(request) = db.follow_request_by_uri(uri)? {
            return remove_follow(r, db, request, true);
        }
    }
    // Embedded Follow whose id we never stored: match on its target.
    if let Some(target_uri) = iris_of(object.get("object")).first() {
        if let Some(target) = db.account_by_uri(target_uri)? {
            if let Some(follow) = db.follow_between(&r.requesting.id, &target.id)? {
                return remove_follow(r, db, follow, false);
            }
            if let Some(request) = db.follow_request_between(&r.requesting.id, &target.id)? {
                return remove_follow(r, db, request, true);
            }
        }
    }
    Err(FedError::not_found("follow being undone"))
}

fn remove_follow(r: &Resolved<'_>, db: &FedDb, follow: Follow, request: bool) -> FedResult<Option<Envelope>> {
    if follow.account_id != r.requesting.id {
        warn!(uri = %follow.uri, actor = %r.requesting.uri, "undo of a follow owned by someone else");
        return Ok(None);
    }
    if request {
        db.delete_follow_request(&follow.id)?;
    } else {
        db.delete_follow(&follow.id)?;
    }
    info!(uri = %follow.uri, request, "follow undone");
    Ok(Some(
        Envelope::new(ObjectKind::Follow, ActivityType::Undo, Payload::Follow(follow))
            .origin(r.requesting)
            .target(r.requested),
    ))
}

fn accept_follow(r: &Resolved<'_>, db: &FedDb) -> FedResult<Option<Envelope>> {
    let object = &r.activity.object;
    let mut request = match id_of(object) {
        Some(uri) => db.follow_request_by_uri(uri)?,
        None => None,
    };
    if request.is_none() {
        if let Some(actor_uri) = iris_of(object.get("actor")).first() {
            if let Some(follower) = db.account_by_uri(actor_uri)?.filter(Account::is_local) {
                request = db.follow_request_between(&follower.id, &r.requesting.id)?;
            }
        }
    }
    let Some(request) = request else {
        return Err(FedError::not_found("follow request being accepted"));
    };
    if request.target_account_id != r.requesting.id {
        warn!(uri = %request.uri, actor = %r.requesting.uri, "accept from an account that was not followed");
        return Ok(None);
    }
    let Some(follow) = db.accept_follow_request(&request.account_id, &request.target_account_id)? else {
        return Ok(None);
    };
    info!(uri = %follow.uri, "follow request accepted");
    Ok(Some(
        Envelope::new(ObjectKind::Follow, ActivityType::Accept, Payload::Follow(follow))
            .origin(r.requesting)
            .target(r.requested),
    ))
}

fn announce(r: &Resolved<'_>, db: &FedDb) -> FedResult<Option<Envelope>> {
    let activity = r.activity;
    let boost_uri = activity
        .id
        .as_deref()
        .ok_or_else(|| FedError::malformed("announce has no id"))?;
    let boosted_uri = activity
        .object_id()
        .ok_or_else(|| FedError::malformed("announce has no object"))?;
    if db.status_by_uri(boost_uri)?.is_some() {
        debug!(uri = boost_uri, "announce already stored");
        return Ok(None);
    }
    let Some(boosted) = db.status_by_uri(boosted_uri)? else {
        return Err(FedError::not_found(format!("boosted status {boosted_uri}")));
    };
    if boosted.boost_id().is_some() || !boosted.boostable {
        debug!(uri = boosted_uri, "status cannot be boosted");
        return Ok(None);
    }

    let boost = Status {
        id: new_id(),
        uri: boost_uri.to_string(),
        url: boost_uri.to_string(),
        content: String::new(),
        account_id: r.requesting.id.clone(),
        account_uri: r.requesting.uri.clone(),
        in_reply_to_uri: None,
        in_reply_to_id: None,
        in_reply_to_account_id: None,
        boost_of_id: Some(boosted.id.clone()),
        boost_of_account_id: Some(boosted.account_id.clone()),
        visibility: visibility_from_audience(&activity.to, &activity.cc),
        local: false,
        federated: true,
        boostable: false,
        likeable: false,
        mention_ids: Vec::new(),
        created_at_ms: now_ms(),
    };
    if let Err(e) = db.put_status(&boost) {
        return match db.status_by_uri(boost_uri)? {
            Some(_) => Ok(None),
            None => Err(FedError::Internal(e)),
        };
    }
    Ok(Some(
        Envelope::new(ObjectKind::Announce, ActivityType::Create, Payload::Status(boost))
            .origin(r.requesting)
            .target(r.requested),
    ))
}
