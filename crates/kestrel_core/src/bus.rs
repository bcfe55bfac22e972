/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - FEDI3 Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

//! The two side-effect channels: `FromClientAPI` and `FromFederator`.
//!
//! Each is a bounded FIFO queue. Producers `try_send` and return at once; a
//! full or closed queue drops the envelope with a warning. A queued envelope
//! is owned by the channel, so it is delivered even if the producing request
//! is dropped.

use crate::model::{Account, Block, Follow, Status};
use kestrel_protocol::{ActivityType, ObjectKind};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    Account(Account),
    Status(Status),
    Follow(Follow),
    FollowRequest(Follow),
    Block(Block),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    pub object: ObjectKind,
    pub activity: ActivityType,
    pub payload: Payload,
    /// Account that performed the activity.
    pub origin: Option<Account>,
    /// Account the activity was aimed at or received by.
    pub target: Option<Account>,
}

impl Envelope {
    pub fn new(object: ObjectKind, activity: ActivityType, payload: Payload) -> Self {
        Self {
            object,
            activity,
            payload,
            origin: None,
            target: None,
        }
    }

    pub fn origin(mut self, account: &Account) -> Self {
        self.origin = Some(account.clone());
        self
    }

    pub fn target(mut self, account: &Account) -> Self {
        self.target = Some(account.clone());
        self
    }
}

#[derive(Clone)]
pub struct AsyncBus {
    client_api: mpsc::Sender<Envelope>,
    federator: mpsc::Sender<Envelope>,
}

pub struct BusReceivers {
    pub client_api: mpsc::Receiver<Envelope>,
    pub federator: mpsc::Receiver<Envelope>,
}

impl AsyncBus {
    /// Each channel holds at most `capacity` envelopes awaiting the consumer.
    pub fn new(capacity: usize) -> (Self, BusReceivers) {
        let capacity = capacity.max(1);
        let (client_api, client_rx) = mpsc::channel(capacity);
        let (federator, fed_rx) = mpsc::channel(capacity);
        (
            Self { client_api, federator },
            BusReceivers {
                client_api: client_rx,
                federator: fed_rx,
            },
        )
    }

    /// Queues a side effect of a local user action. Never blocks.
    pub fn from_client_api(&self, envelope: Envelope) -> bool {
        enqueue("from_client_api", &self.client_api, envelope)
    }

    /// Queues a side effect of a federated activity. Never blocks.
    pub fn from_federator(&self, envelope: Envelope) -> bool {
        enqueue("from_federator", &self.federator, envelope)
    }
}

fn enqueue(channel: &str, tx: &mpsc::Sender<Envelope>, envelope: Envelope) -> bool {
    debug!(
        channel,
        object = envelope.object.as_str(),
        activity = envelope.activity.as_str(),
        "enqueue"
    );
    match tx.try_send(envelope) {
        Ok(()) => true,
        Err(TrySendError::Full(env)) => {
            warn!(channel, "bus full, dropping {}/{}", env.object.as_str(), env.activity.as_str());
            false
        }
        Err(TrySendError::Closed(env)) => {
            warn!(channel, "bus closed, dropping {}/{}", env.object.as_str(), env.activity.as_str());
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testrig;
    use std::time::Duration;

    fn note(ms: i64) -> Envelope {
        let bob = testrig::remote_account_unsaved("bob", "remote.example");
        Envelope::new(ObjectKind::Note, ActivityType::Create, Payload::Status(testrig::status_unsaved(&bob, ms))).origin(&bob)
    }

    fn created_at(env: &Envelope) -> i64 {
        match &env.payload {
            Payload::Status(s) => s.created_at_ms,
            other => panic!("unexpected payload {other:?}"),
        }
    }

    #[tokio::test]
    async fn queue_is_bounded_and_fifo() {
        let (bus, mut rx) = AsyncBus::new(3);
        for ms in 1..=3 {
            assert!(bus.from_federator(note(ms)));
        }
        assert!(!bus.from_federator(note(4)));
        assert!(bus.from_client_api(note(5)));

        for ms in 1..=3 {
            assert_eq!(created_at(&rx.federator.recv().await.unwrap()), ms);
        }
        assert!(rx.federator.try_recv().is_err());
        assert!(bus.from_federator(note(6)));
        assert_eq!(created_at(&rx.federator.recv().await.unwrap()), 6);
    }

    #[tokio::test]
    async fn closed_consumer_refuses_sends() {
        let (bus, rx) = AsyncBus::new(4);
        drop(rx);
        assert!(!bus.from_client_api(note(1)));
    }

    #[tokio::test]
    async fn channels_are_separate() {
        let (bus, mut rx) = AsyncBus::new(4);
        bus.from_client_api(note(1));
        let env = tokio::time::timeout(Duration::from_secs(2), rx.client_api.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(env.activity, ActivityType::Create);
        assert!(rx.federator.try_recv().is_err());
    }

    #[tokio::test]
    async fn send_survives_dropped_producer_task() {
        let (bus, mut rx) = AsyncBus::new(1);
        let producer = bus.clone();
        let handle = tokio::spawn(async move {
            producer.from_federator(note(7));
            std::future::pending::<()>().await;
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        handle.abort();
        let env = tokio::time::timeout(Duration::from_secs(2), rx.federator.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(created_at(&env), 7);
    }
}
