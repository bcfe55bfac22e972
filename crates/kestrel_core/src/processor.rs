/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - FEDI3 Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

//! Consumer of both bus channels: timeline fan-out, streaming and
//! outbound delivery with retries.

use crate::bus::{BusReceivers, Envelope, Payload};
use crate::config::CoreConfig;
use crate::db::FedDb;
use crate::error::{FedError, FedResult};
use crate::http_retry::{retry_async, RetryPolicy};
use crate::model::{Account, Status};
use crate::outbound::{self, Delivery, OutboundActivity};
use crate::streaming::StreamRegistry;
use crate::timeline::TimelineManager;
use anyhow::anyhow;
use kestrel_protocol::{ActivityType, ObjectKind};
use std::sync::Arc;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

#[derive(Clone)]
pub struct Processor {
    db: FedDb,
    cfg: Arc<CoreConfig>,
    delivery: Delivery,
    timelines: Arc<TimelineManager>,
    streams: StreamRegistry,
}

impl Processor {
    pub fn new(
        db: FedDb,
        cfg: Arc<CoreConfig>,
        delivery: Delivery,
        timelines: Arc<TimelineManager>,
        streams: StreamRegistry,
    ) -> Self {
        Self {
            db,
            cfg,
            delivery,
            timelines,
            streams,
        }
    }

    pub fn start(&self, shutdown: watch::Receiver<bool>, receivers: BusReceivers) -> JoinHandle<()> {
        let this = self.clone();
        tokio::spawn(async move {
            this.run_loop(shutdown, receivers).await;
            info!("processor stopped");
        })
    }

    async fn run_loop(&self, mut shutdown: watch::Receiver<bool>, mut rx: BusReceivers) {
        loop {
            if *shutdown.borrow() {
                break;
            }
            tokio::select! {
                Some(env) = rx.client_api.recv() => self.handle_client_api(env),
                Some(env) = rx.federator.recv() => self.handle_federator(env),
                res = shutdown.changed() => {
                    if res.is_err() {
                        break;
                    }
                }
                else => break,
            }
        }
    }

    pub fn handle_client_api(&self, env: Envelope) {
        let (object, activity) = (env.object, env.activity);
        if let Err(e) = self.client_api_side_effects(env) {
            warn!(
                object = object.as_str(),
                activity = activity.as_str(),
                "client api side effect failed: {e:#}"
            );
        }
    }

    pub fn handle_federator(&self, env: Envelope) {
        let (object, activity) = (env.object, env.activity);
        if let Err(e) = self.federator_side_effects(env) {
            warn!(
                object = object.as_str(),
                activity = activity.as_str(),
                "federator side effect failed: {e:#}"
            );
        }
    }

    fn client_api_side_effects(&self, env: Envelope) -> FedResult<()> {
        match (env.object, env.activity, &env.payload) {
            (ObjectKind::Follow, ActivityType::Create, Payload::FollowRequest(request)) => {
                let (origin, target) = ends(&env)?;
                if !target.is_local() {
                    self.deliver(outbound::follow(origin, target, request));
                }
            }
            (ObjectKind::Follow, ActivityType::Create, Payload::Follow(follow)) => {
                debug!(uri = %follow.uri, "local follow established");
            }
            (ObjectKind::Follow, ActivityType::Undo, Payload::Follow(follow)) => {
                let (origin, target) = ends(&env)?;
                self.timelines.remove_account_from(&origin.id, &target.id)?;
                if !target.is_local() {
                    self.deliver(outbound::undo_follow(origin, target, follow));
                }
            }
            (ObjectKind::Follow, ActivityType::Accept, Payload::Follow(follow)) => {
                let (owner, requester) = ends(&env)?;
                if !requester.is_local() {
                    self.deliver(outbound::accept_follow(owner, requester, follow));
                }
            }
            (ObjectKind::Note, ActivityType::Create, Payload::Status(status)) => {
                self.fan_out(status)?;
                if status.federated {
                    let mentioned = self.mentioned_uris(status)?;
                    self.deliver(outbound::create_note(origin_of(&env)?, status, &mentioned));
                }
            }
            (ObjectKind::Announce, ActivityType::Create, Payload::Status(boost)) => {
                self.fan_out(boost)?;
                let (boosted, author) = self.boosted(boost)?;
                self.deliver(outbound::announce(origin_of(&env)?, boost, &boosted, &author));
            }
            (ObjectKind::Note, ActivityType::Delete, Payload::Status(status)) => {
                self.purge(status)?;
                if status.federated {
                    self.deliver(outbound::delete_status(origin_of(&env)?, status));
                }
            }
            (ObjectKind::Announce, ActivityType::Undo, Payload::Status(boost)) => {
                self.purge(boost)?;
                let (boosted, author) = self.boosted(boost)?;
                self.deliver(outbound::undo_announce(origin_of(&env)?, boost, &boosted, &author));
            }
            (ObjectKind::Block, ActivityType::Create, Payload::Block(_)) => {
                let (origin, target) = ends(&env)?;
                self.timelines.remove_account_from(&origin.id, &target.id)?;
                if target.is_local() {
                    self.timelines.remove_account_from(&target.id, &origin.id)?;
                }
            }
            (ObjectKind::Profile, ActivityType::Delete, Payload::Account(account)) => {
                self.timelines.drop_timeline(&account.id)?;
                let removed = self.timelines.remove_account_everywhere(&account.id)?;
                debug!(uri = %account.uri, removed, "deleted account purged from timelines");
            }
            (object, activity, _) => {
                debug!(object = object.as_str(), activity = activity.as_str(), "no client api side effect");
            }
        }
        Ok(())
    }

    fn federator_side_effects(&self, env: Envelope) -> FedResult<()> {
        match (env.object, env.activity, &env.payload) {
            (ObjectKind::Note | ObjectKind::Announce, ActivityType::Create, Payload::Status(status)) => {
                self.fan_out(status)?;
            }
            (ObjectKind::Profile, ActivityType::Create, Payload::Account(account)) => {
                info!(uri = %account.uri, "new remote account");
            }
            (ObjectKind::Follow, ActivityType::Accept, Payload::Follow(follow)) => {
                info!(uri = %follow.uri, "remote follow accepted");
            }
            (object, activity, _) => {
                debug!(object = object.as_str(), activity = activity.as_str(), "no federator side effect");
            }
        }
        Ok(())
    }

    /// Indexes `status` on the author's (if local) and every local
    /// follower's home timeline, streaming it where it was newly indexed.
    fn fan_out(&self, status: &Status) -> FedResult<usize> {
        let mut owners = self.db.local_follower_ids(&status.account_id)?;
        if status.local && !owners.contains(&status.account_id) {
            owners.push(status.account_id.clone());
        }
        let mut indexed = 0;
        for owner in owners {
            match self.timelines.index_and_prepare_one(&owner, status) {
                Ok(Some(prepared)) => {
                    indexed += 1;
                    self.streams.stream_status_for_account(&prepared, &owner)?;
                }
                Ok(None) => {}
                Err(e) => warn!(owner = %owner, status = %status.id, "timeline insert failed: {e:#}"),
            }
        }
        debug!(status = %status.id, indexed, "fanned out");
        Ok(indexed)
    }

    /// Takes a deleted status off every timeline and tells live streams.
    fn purge(&self, status: &Status) -> FedResult<usize> {
        let removed = self.timelines.remove_status(&status.id)?;
        let mut owners = self.db.local_follower_ids(&status.account_id)?;
        if status.local && !owners.contains(&status.account_id) {
            owners.push(status.account_id.clone());
        }
        for owner in owners {
            self.streams.stream_delete_for_account(&status.id, &owner)?;
        }
        debug!(status = %status.id, removed, "purged from timelines");
        Ok(removed)
    }

    fn mentioned_uris(&self, status: &Status) -> FedResult<Vec<String>> {
        let mut uris = Vec::new();
        for id in &status.mention_ids {
            let Some(mention) = self.db.mention_by_id(id)? else {
                continue;
            };
            if let Some(target) = self.db.account_by_id(&mention.target_account_id)? {
                uris.push(target.uri);
            }
        }
        Ok(uris)
    }

    fn boosted(&self, boost: &Status) -> FedResult<(Status, Account)> {
        let boosted_id = boost
            .boost_id()
            .ok_or_else(|| FedError::Internal(anyhow!("boost {} wraps nothing", boost.id)))?;
        let boosted = self
            .db
            .status_by_id(boosted_id)?
            .ok_or_else(|| FedError::not_found(format!("status {boosted_id}")))?;
        let author = self
            .db
            .account_by_id(&boosted.account_id)?
            .ok_or_else(|| FedError::not_found(format!("account {}", boosted.account_id)))?;
        Ok((boosted, author))
    }

    /// Sends in the background; failed inboxes are retried with backoff.
    fn deliver(&self, activity: OutboundActivity) {
        let delivery = self.delivery.clone();
        let policy = RetryPolicy::with_attempts(self.cfg.delivery_max_attempts());
        tokio::spawn(deliver_with_retry(delivery, activity, policy));
    }
}

fn origin_of(env: &Envelope) -> FedResult<&Account> {
    env.origin.as_ref().ok_or_else(|| {
        FedError::Internal(anyhow!(
            "{}/{} envelope without origin",
            env.object.as_str(),
            env.activity.as_str()
        ))
    })
}

/// Origin and target of an envelope; both are required.
fn ends(env: &Envelope) -> FedResult<(&Account, &Account)> {
    match (&env.origin, &env.target) {
        (Some(o), Some(t)) => Ok((o, t)),
        _ => Err(FedError::Internal(anyhow!(
            "{}/{} envelope without origin or target",
            env.object.as_str(),
            env.activity.as_str()
        ))),
    }
}

async fn deliver_with_retry(delivery: Delivery, activity: OutboundActivity, policy: RetryPolicy) {
    let id = activity.id().to_string();
    let report = match delivery.send(&activity).await {
        Ok(r) => r,
        Err(e) => {
            warn!(%id, "delivery failed: {e:#}");
            return;
        }
    };
    if report.is_complete() || policy.attempts <= 1 {
        if !report.is_complete() {
            warn!(%id, failed = report.failed.len(), "delivery gave up");
        }
        return;
    }
    let body = match activity.body() {
        Ok(b) => b,
        Err(e) => {
            warn!(%id, "delivery body: {e:#}");
            return;
        }
    };

    tokio::time::sleep(policy.delay(1)).await;
    let retries = RetryPolicy {
        attempts: policy.attempts - 1,
        ..policy
    };
    let remaining = Mutex::new(report.failed_inboxes());
    let result = retry_async(retries, &format!("deliver {id}"), || {
        let (delivery, remaining, actor, body) = (&delivery, &remaining, &activity.actor, &body);
        async move {
            let mut inboxes = remaining.lock().await;
            let report = delivery.deliver_to(actor, inboxes.clone(), body.clone()).await?;
            *inboxes = report.failed_inboxes();
            if inboxes.is_empty() {
                Ok(())
            } else {
                Err(anyhow!("{} inboxes still failing", inboxes.len()))
            }
        }
    })
    .await;
    if let Err(e) = result {
        warn!(%id, "delivery gave up: {e:#}");
    }
}
