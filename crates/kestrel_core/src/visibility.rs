/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - FEDI3 Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

//! Who may see a status, and whether it belongs on a home timeline.

use crate::authenticate::host_blocked;
use crate::config::CoreConfig;
use crate::db::FedDb;
use crate::error::{FedError, FedResult};
use crate::model::{Account, Status, Visibility};
use crate::uris::host_from_url;
use std::sync::Arc;
use tracing::trace;

/// Accounts a status touches. Each is loaded by one indexed lookup.
#[derive(Debug, Clone, Default)]
pub struct RelevantAccounts {
    pub author: Option<Account>,
    pub reply_to: Option<Account>,
    pub boosted: Option<Account>,
    pub boosted_reply_to: Option<Account>,
    pub mentioned: Vec<Account>,
}

impl RelevantAccounts {
    pub fn iter(&self) -> impl Iterator<Item = &Account> {
        self.author
            .iter()
            .chain(self.reply_to.iter())
            .chain(self.boosted.iter())
            .chain(self.boosted_reply_to.iter())
            .chain(self.mentioned.iter())
    }

    pub fn ids(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self.iter().map(|a| a.id.as_str()).collect();
        ids.sort_unstable();
        ids.dedup();
        ids
    }
}

#[derive(Clone)]
pub struct VisibilityFilter {
    db: FedDb,
    cfg: Arc<CoreConfig>,
}

impl VisibilityFilter {
    pub fn new(db: FedDb, cfg: Arc<CoreConfig>) -> Self {
        Self { db, cfg }
    }

    fn account(&self, id: &str) -> FedResult<Account> {
        self.db
            .account_by_id(id)?
            .ok_or_else(|| FedError::not_found(format!("account {id}")))
    }

    fn status(&self, id: &str) -> FedResult<Status> {
        self.db
            .status_by_id(id)?
            .ok_or_else(|| FedError::not_found(format!("status {id}")))
    }

    pub fn relevant_accounts(&self, status: &Status) -> FedResult<RelevantAccounts> {
        let mut out = RelevantAccounts {
            author: Some(self.account(&status.account_id)?),
            ..RelevantAccounts::default()
        };

        if let Some(id) = status.reply_account_id() {
            out.reply_to = Some(self.account(id)?);
        }

        if let Some(boost_id) = status.boost_id() {
            let boosted = self.status(boost_id)?;
            let author_id = status.boost_account_id().unwrap_or(boosted.account_id.as_str());
            out.boosted = Some(self.account(author_id)?);
            if let Some(id) = boosted.reply_account_id() {
                out.boosted_reply_to = Some(self.account(id)?);
            }
        }

        for mention_id in status.mention_ids.iter().filter(|m| !m.trim().is_empty()) {
            let mention = self
                .db
                .mention_by_id(mention_id)?
                .ok_or_else(|| FedError::not_found(format!("mention {mention_id}")))?;
            out.mentioned.push(self.account(&mention.target_account_id)?);
        }
        Ok(out)
    }

    fn account_domain_blocked(&self, account: &Account) -> FedResult<bool> {
        let Some(domain) = account.domain.as_deref() else {
            return Ok(false);
        };
        let host = host_from_url(&account.uri).unwrap_or_else(|| domain.to_ascii_lowercase());
        host_blocked(&self.db, &self.cfg, &host)
    }

    /// Whether `viewer` may see `status`. `None` is an unauthenticated viewer.
    pub fn visible(&self, status: &Status, viewer: Option<&Account>) -> FedResult<bool> {
        let relevant = self.relevant_accounts(status)?;
        let Some(author) = relevant.author.as_ref() else {
            return Ok(false);
        };
        if author.is_suspended() {
            trace!(status = %status.id, "author suspended");
            return Ok(false);
        }
        for account in relevant.iter() {
            if self.account_domain_blocked(account)? {
                trace!(status = %status.id, account = %account.uri, "relevant account domain-blocked");
                return Ok(false);
            }
        }

        let Some(viewer) = viewer else {
            return Ok(matches!(status.visibility, Visibility::Public | Visibility::Unlisted));
        };
        if viewer.id == author.id {
            return Ok(true);
        }

        for id in relevant.ids() {
            if id != viewer.id && self.db.blocked_either(&viewer.id, id)? {
                trace!(status = %status.id, viewer = %viewer.id, "block between viewer and relevant account");
                return Ok(false);
            }
        }

        let allowed = match status.visibility {
            Visibility::Public | Visibility::Unlisted => true,
            Visibility::FollowersOnly => self.db.follows(&viewer.id, &author.id)?,
            Visibility::MutualsOnly => {
                self.db.follows(&viewer.id, &author.id)? && self.db.follows(&author.id, &viewer.id)?
            }
            Visibility::Direct => relevant.mentioned.iter().any(|a| a.id == viewer.id),
        };
        Ok(allowed)
    }

    /// Whether `status` belongs on `owner`'s home timeline.
    pub fn home_timelineable(&self, status: &Status, owner: &Account) -> FedResult<bool> {
        if status.account_id == owner.id {
            return Ok(true);
        }
        if !self.visible(status, Some(owner))? {
            return Ok(false);
        }

        if status.reply_uri().is_some() && (status.reply_id().is_none() || status.reply_account_id().is_none()) {
            // Reply to something we have not dereferenced yet.
            return Ok(false);
        }
        if let Some(reply_id) = status.reply_id() {
            let replied = self.status(reply_id)?;
            let replied_author = status.reply_account_id().unwrap_or(replied.account_id.as_str());
            if replied_author != owner.id && !self.db.follows(&owner.id, replied_author)? {
                return Ok(false);
            }
        }
        Ok(true)
    }
}
