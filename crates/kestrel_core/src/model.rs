/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - FEDI3 Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

//! Domain model shared by the store, the federation pipeline and the timelines.

use rand::{rngs::OsRng, RngCore};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Visibility {
    #[default]
    Public,
    Unlisted,
    FollowersOnly,
    MutualsOnly,
    Direct,
}

impl Visibility {
    pub fn as_str(&self) -> &'static str {
        match self {
            Visibility::Public => "public",
            Visibility::Unlisted => "unlisted",
            Visibility::FollowersOnly => "followers_only",
            Visibility::MutualsOnly => "mutuals_only",
            Visibility::Direct => "direct",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "public" => Visibility::Public,
            "unlisted" => Visibility::Unlisted,
            "followers_only" => Visibility::FollowersOnly,
            "mutuals_only" => Visibility::MutualsOnly,
            "direct" => Visibility::Direct,
            _ => return None,
        })
    }
}

/// A local or remote actor. `domain == None` means the account lives on this server.
#[derive(Debug, Clone, PartialEq)]
pub struct Account {
    pub id: String,
    pub username: String,
    pub domain: Option<String>,
    pub uri: String,
    pub url: String,
    pub display_name: String,
    pub note: String,
    pub inbox_uri: String,
    pub outbox_uri: String,
    pub followers_uri: String,
    pub following_uri: String,
    pub shared_inbox_uri: Option<String>,
    pub public_key_pem: String,
    pub public_key_uri: String,
    /// Only present for local accounts.
    pub private_key_pem: Option<String>,
    pub actor_type: String,
    pub locked: bool,
    pub discoverable: bool,
    pub bot: bool,
    pub created_at_ms: i64,
    pub updated_at_ms: i64,
    pub suspended_at_ms: Option<i64>,
}

impl Account {
    pub fn is_local(&self) -> bool {
        self.domain.is_none()
    }

    pub fn is_suspended(&self) -> bool {
        self.suspended_at_ms.is_some()
    }

    /// Inbox to deliver to, preferring the shared inbox.
    pub fn delivery_inbox(&self) -> &str {
        self.shared_inbox_uri
            .as_deref()
            .filter(|s| !s.is_empty())
            .unwrap_or(&self.inbox_uri)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Status {
    pub id: String,
    pub uri: String,
    pub url: String,
    pub content: String,
    pub account_id: String,
    pub account_uri: String,
    pub in_reply_to_uri: Option<String>,
    pub in_reply_to_id: Option<String>,
    pub in_reply_to_account_id: Option<String>,
    pub boost_of_id: Option<String>,
    pub boost_of_account_id: Option<String>,
    pub visibility: Visibility,
    pub local: bool,
    pub federated: bool,
    pub boostable: bool,
    pub likeable: bool,
    pub mention_ids: Vec<String>,
    pub created_at_ms: i64,
}

impl Status {
    pub fn reply_uri(&self) -> Option<&str> {
        non_empty(&self.in_reply_to_uri)
    }

    pub fn reply_id(&self) -> Option<&str> {
        non_empty(&self.in_reply_to_id)
    }

    pub fn reply_account_id(&self) -> Option<&str> {
        non_empty(&self.in_reply_to_account_id)
    }

    pub fn boost_id(&self) -> Option<&str> {
        non_empty(&self.boost_of_id)
    }

    pub fn boost_account_id(&self) -> Option<&str> {
        non_empty(&self.boost_of_account_id)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Mention {
    pub id: String,
    pub status_id: String,
    pub origin_account_id: String,
    pub target_account_id: String,
    pub created_at_ms: i64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Follow {
    pub id: String,
    pub uri: String,
    pub account_id: String,
    pub target_account_id: String,
    pub show_reblogs: bool,
    pub notify: bool,
    pub created_at_ms: i64,
}

/// Same shape as [`Follow`]; promoted to one on acceptance.
pub type FollowRequest = Follow;

#[derive(Debug, Clone, PartialEq)]
pub struct Block {
    pub id: String,
    pub uri: String,
    pub account_id: String,
    pub target_account_id: String,
    pub created_at_ms: i64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DomainBlock {
    pub id: String,
    pub domain: String,
    pub created_by_account_id: String,
    pub private_comment: String,
    pub public_comment: String,
    pub obfuscate: bool,
    pub created_at_ms: i64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Instance {
    pub id: String,
    pub domain: String,
    pub uri: String,
    pub title: String,
    pub description: String,
    pub contact_email: String,
    pub version: String,
    pub domain_block_id: Option<String>,
    pub suspended_at_ms: Option<i64>,
    pub created_at_ms: i64,
    pub updated_at_ms: i64,
}

pub fn now_ms() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}

/// Time-sortable identifier: lexical order equals creation order.
pub fn new_id() -> String {
    id_at(now_ms())
}

pub fn id_at(ms: i64) -> String {
    let mut b = [0u8; 8];
    OsRng.fill_bytes(&mut b);
    format!("{:012x}{}", ms.max(0), hex::encode(b))
}

pub fn ms_to_rfc3339(ms: i64) -> Option<String> {
    let secs = ms.checked_div(1000)?;
    let nanos = (ms.rem_euclid(1000) * 1_000_000) as u32;
    let dt = time::OffsetDateTime::from_unix_timestamp(secs).ok()? + time::Duration::nanoseconds(nanos as i64);
    dt.format(&time::format_description::well_known::Rfc3339).ok()
}

pub(crate) fn non_empty(v: &Option<String>) -> Option<&str> {
    v.as_deref().map(str::trim).filter(|s| !s.is_empty())
}
