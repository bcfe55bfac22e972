/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - FEDI3 Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

//! Per-account live streams.
//!
//! Connections register on connect and deregister on disconnect; a slow
//! subscriber loses events instead of stalling the publisher.

use crate::error::{FedError, FedResult};
use crate::model::now_ms;
use crate::timeline::PreparedStatus;
use crate::typeutils::status_to_note;
use serde::Serialize;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::mpsc;
use tracing::{debug, warn};

const SUBSCRIBER_BUFFER: usize = 64;

pub const STREAM_USER: &str = "user";

#[derive(Clone, Debug, Serialize, PartialEq)]
pub struct StreamEvent {
    /// `update` or `delete`.
    pub event: String,
    pub stream: String,
    pub ts_ms: i64,
    pub payload: Value,
}

pub struct Subscription {
    pub id: u64,
    pub account_id: String,
    pub events: mpsc::Receiver<StreamEvent>,
}

struct Subscriber {
    id: u64,
    tx: mpsc::Sender<StreamEvent>,
}

#[derive(Clone, Default)]
pub struct StreamRegistry {
    streams: Arc<Mutex<HashMap<String, Vec<Subscriber>>>>,
    next_id: Arc<AtomicU64>,
}

impl StreamRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> FedResult<MutexGuard<'_, HashMap<String, Vec<Subscriber>>>> {
        self.streams
            .lock()
            .map_err(|_| FedError::Internal(anyhow::anyhow!("stream registry lock poisoned")))
    }

    pub fn register(&self, account_id: &str) -> FedResult<Subscription> {
        let (tx, rx) = mpsc::channel(SUBSCRIBER_BUFFER);
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        self.lock()?
            .entry(account_id.to_string())
            .or_default()
            .push(Subscriber { id, tx });
        debug!(account_id, id, "stream registered");
        Ok(Subscription {
            id,
            account_id: account_id.to_string(),
            events: rx,
        })
    }

    /// Returns false if the subscription was already gone.
    pub fn deregister(&self, account_id: &str, id: u64) -> FedResult<bool> {
        let mut streams = self.lock()?;
        let Some(subs) = streams.get_mut(account_id) else {
            return Ok(false);
        };
        let before = subs.len();
        subs.retain(|s| s.id != id);
        let removed = subs.len() != before;
        if subs.is_empty() {
            streams.remove(account_id);
        }
        debug!(account_id, id, removed, "stream deregistered");
        Ok(removed)
    }

    pub fn subscribers(&self, account_id: &str) -> FedResult<usize> {
        Ok(self.lock()?.get(account_id).map(Vec::len).unwrap_or(0))
    }

    /// Pushes a prepared status to every stream of `account_id`.
    /// Returns how many subscribers got it.
    pub fn stream_status_for_account(&self, prepared: &PreparedStatus, account_id: &str) -> FedResult<usize> {
        let mut payload = status_to_note(&prepared.status, &prepared.account, &[]);
        payload["localId"] = json!(prepared.status.id);
        if let Some((boosted, author)) = &prepared.boost {
            let mut reblog = status_to_note(boosted, author, &[]);
            reblog["localId"] = json!(boosted.id);
            payload["reblog"] = reblog;
        }
        self.publish(account_id, "update", payload)
    }

    pub fn stream_delete_for_account(&self, status_id: &str, account_id: &str) -> FedResult<usize> {
        self.publish(account_id, "delete", json!(status_id))
    }

    fn publish(&self, account_id: &str, event: &str, payload: Value) -> FedResult<usize> {
        let ev = StreamEvent {
            event: event.to_string(),
            stream: STREAM_USER.to_string(),
            ts_ms: now_ms(),
            payload,
        };
        let mut streams = self.lock()?;
        let Some(subs) = streams.get_mut(account_id) else {
            return Ok(0);
        };
        subs.retain(|s| !s.tx.is_closed());
        let mut sent = 0;
        for sub in subs.iter() {
            match sub.tx.try_send(ev.clone()) {
                Ok(()) => sent += 1,
                Err(mpsc::error::TrySendError::Full(_)) => {
                    warn!(account_id, id = sub.id, "stream subscriber lagging, event dropped")
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {}
            }
        }
        if subs.is_empty() {
            streams.remove(account_id);
        }
        Ok(sent)
    }
}
