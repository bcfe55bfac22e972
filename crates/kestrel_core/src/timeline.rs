/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - FEDI3 Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

//! Per-account home timeline index.
//!
//! Entries are kept in a `Vec` sorted newest first by `(created_at_ms, status_id)`,
//! with a side set of ids for duplicate checks. Statuses are hydrated lazily
//! when a page is requested and cached next to the index.

use crate::db::FedDb;
use crate::error::{FedError, FedResult};
use crate::model::{Account, Status};
use crate::visibility::VisibilityFilter;
use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::debug;

/// Statuses pulled from the store per backfill round.
const BACKFILL_PAGE: u32 = 40;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PostIndexEntry {
    pub created_at_ms: i64,
    pub status_id: String,
    pub boost_of_id: Option<String>,
    pub account_id: String,
    pub boost_of_account_id: Option<String>,
}

impl PostIndexEntry {
    pub fn from_status(s: &Status) -> Self {
        Self {
            created_at_ms: s.created_at_ms,
            status_id: s.id.clone(),
            boost_of_id: s.boost_id().map(str::to_string),
            account_id: s.account_id.clone(),
            boost_of_account_id: s.boost_account_id().map(str::to_string),
        }
    }

    /// Newest first.
    fn order(&self, other: &Self) -> Ordering {
        other
            .created_at_ms
            .cmp(&self.created_at_ms)
            .then_with(|| other.status_id.cmp(&self.status_id))
    }
}

#[derive(Debug, Default)]
pub struct PostIndex {
    entries: Vec<PostIndexEntry>,
    ids: HashSet<String>,
}

impl PostIndex {
    /// Inserts in sorted position. Returns false if the status id is already present.
    pub fn insert(&mut self, entry: PostIndexEntry) -> bool {
        if self.ids.contains(&entry.status_id) {
            return false;
        }
        let pos = self
            .entries
            .partition_point(|e| e.order(&entry) != Ordering::Greater);
        self.ids.insert(entry.status_id.clone());
        self.entries.insert(pos, entry);
        true
    }

    /// Drops the status and every boost of it. Returns how many entries went.
    pub fn remove(&mut self, status_id: &str) -> usize {
        self.retain(|e| e.status_id != status_id && e.boost_of_id.as_deref() != Some(status_id))
    }

    /// Drops entries authored or boosted from `account_id`.
    pub fn remove_account(&mut self, account_id: &str) -> usize {
        self.retain(|e| e.account_id != account_id && e.boost_of_account_id.as_deref() != Some(account_id))
    }

    fn retain(&mut self, keep: impl Fn(&PostIndexEntry) -> bool) -> usize {
        let before = self.entries.len();
        let ids = &mut self.ids;
        self.entries.retain(|e| {
            let k = keep(e);
            if !k {
                ids.remove(&e.status_id);
            }
            k
        });
        before - self.entries.len()
    }

    pub fn contains(&self, status_id: &str) -> bool {
        self.ids.contains(status_id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[PostIndexEntry] {
        &self.entries
    }

    pub fn oldest(&self) -> Option<&PostIndexEntry> {
        self.entries.last()
    }

    pub fn newest(&self) -> Option<&PostIndexEntry> {
        self.entries.first()
    }
}

/// A status hydrated for display.
#[derive(Debug, Clone, PartialEq)]
pub struct PreparedStatus {
    pub status: Status,
    pub account: Account,
    pub boost: Option<(Status, Account)>,
}

#[derive(Default)]
struct TimelineState {
    index: PostIndex,
    prepared: HashMap<String, PreparedStatus>,
}

pub struct Timeline {
    account_id: String,
    db: FedDb,
    filter: VisibilityFilter,
    state: Mutex<TimelineState>,
}

impl Timeline {
    pub fn new(account_id: impl Into<String>, db: FedDb, filter: VisibilityFilter) -> Self {
        Self {
            account_id: account_id.into(),
            db,
            filter,
            state: Mutex::new(TimelineState::default()),
        }
    }

    pub fn account_id(&self) -> &str {
        &self.account_id
    }

    fn lock(&self) -> FedResult<MutexGuard<'_, TimelineState>> {
        self.state
            .lock()
            .map_err(|_| FedError::Internal(anyhow::anyhow!("timeline {} lock poisoned", self.account_id)))
    }

    fn owner(&self) -> FedResult<Account> {
        self.db
            .account_by_id(&self.account_id)?
            .ok_or_else(|| FedError::not_found(format!("timeline owner {}", self.account_id)))
    }

    pub fn insert_indexed(&self, entry: PostIndexEntry) -> FedResult<bool> {
        Ok(self.lock()?.index.insert(entry))
    }

    /// Indexes `status` if it belongs on this timeline.
    pub fn index_one(&self, status: &Status) -> FedResult<bool> {
        let owner = self.owner()?;
        if !self.filter.home_timelineable(status, &owner)? {
            return Ok(false);
        }
        self.insert_indexed(PostIndexEntry::from_status(status))
    }

    /// Like [`Timeline::index_one`], returning the hydrated status when it was newly indexed.
    pub fn index_and_prepare_one(&self, status: &Status) -> FedResult<Option<PreparedStatus>> {
        if !self.index_one(status)? {
            return Ok(None);
        }
        let entry = PostIndexEntry::from_status(status);
        let prepared = self.prepare(&entry)?;
        if let Some(p) = &prepared {
            self.lock()?.prepared.insert(entry.status_id, p.clone());
        }
        Ok(prepared)
    }

    /// Backfills up to `amount` statuses older than `anchor_id` (or the newest, if empty).
    pub fn index_behind(&self, anchor_id: &str, amount: usize) -> FedResult<usize> {
        let owner = self.owner()?;
        let mut cursor = anchor_id.to_string();
        let mut indexed = 0;
        while indexed < amount {
            let page = self
                .db
                .home_timeline_statuses(&owner.id, Some(&cursor).filter(|c| !c.is_empty()).map(String::as_str), None, BACKFILL_PAGE)?;
            if page.is_empty() {
                break;
            }
            for status in page {
                cursor = status.id.clone();
                if self.consider(&status, &owner)? {
                    indexed += 1;
                    if indexed >= amount {
                        break;
                    }
                }
            }
        }
        debug!(account = %self.account_id, indexed, "indexed behind");
        Ok(indexed)
    }

    /// Indexes up to `amount` statuses newer than `anchor_id`.
    pub fn index_before(&self, anchor_id: &str, include_anchor: bool, amount: usize) -> FedResult<usize> {
        let owner = self.owner()?;
        let mut indexed = 0;
        if include_anchor {
            if let Some(anchor) = self.db.status_by_id(anchor_id)? {
                if self.consider(&anchor, &owner)? {
                    indexed += 1;
                }
            }
        }
        let mut cursor = anchor_id.to_string();
        while indexed < amount {
            let page = self.db.home_timeline_statuses(&owner.id, None, Some(&cursor), BACKFILL_PAGE)?;
            if page.is_empty() {
                break;
            }
            for status in page {
                cursor = status.id.clone();
                if self.consider(&status, &owner)? {
                    indexed += 1;
                    if indexed >= amount {
                        break;
                    }
                }
            }
        }
        debug!(account = %self.account_id, indexed, "indexed before");
        Ok(indexed)
    }

    /// One backfill candidate. Filter faults skip the candidate.
    fn consider(&self, status: &Status, owner: &Account) -> FedResult<bool> {
        match self.filter.home_timelineable(status, owner) {
            Ok(true) => self.insert_indexed(PostIndexEntry::from_status(status)),
            Ok(false) => Ok(false),
            Err(e) => {
                debug!(status = %status.id, "skipping timeline candidate: {e}");
                Ok(false)
            }
        }
    }

    pub fn oldest_indexed_id(&self) -> FedResult<String> {
        Ok(self
            .lock()?
            .index
            .oldest()
            .map(|e| e.status_id.clone())
            .unwrap_or_default())
    }

    pub fn len(&self) -> FedResult<usize> {
        Ok(self.lock()?.index.len())
    }

    /// A page of the timeline, newest first.
    ///
    /// `max_id` pages towards older statuses, `min_id` towards newer ones.
    pub fn get_page(&self, max_id: Option<&str>, min_id: Option<&str>, limit: usize) -> FedResult<Vec<PreparedStatus>> {
        let limit = limit.clamp(1, 200);
        let max_id = max_id.filter(|s| !s.is_empty());
        let min_id = min_id.filter(|s| !s.is_empty());

        if let (None, Some(min)) = (max_id, min_id) {
            // Gaps right above min_id are only visible to the store.
            self.index_before(min, false, limit)?;
        }
        let mut entries = self.window(max_id, min_id, limit)?;
        if entries.len() < limit && !(max_id.is_none() && min_id.is_some()) {
            let oldest = self.oldest_indexed_id()?;
            let anchor = match (oldest.is_empty(), max_id) {
                (false, Some(max)) if max < oldest.as_str() => max.to_string(),
                (false, _) => oldest,
                (true, Some(max)) => max.to_string(),
                (true, None) => String::new(),
            };
            self.index_behind(&anchor, limit - entries.len())?;
            entries = self.window(max_id, min_id, limit)?;
        }

        let mut out = Vec::with_capacity(entries.len());
        for entry in entries {
            let cached = self.lock()?.prepared.get(&entry.status_id).cloned();
            let prepared = match cached {
                Some(p) => Some(p),
                None => self.prepare(&entry)?,
            };
            match prepared {
                Some(p) => {
                    self.lock()?.prepared.insert(entry.status_id.clone(), p.clone());
                    out.push(p);
                }
                None => {
                    self.remove(&entry.status_id)?;
                }
            }
        }
        Ok(out)
    }

    fn window(&self, max_id: Option<&str>, min_id: Option<&str>, limit: usize) -> FedResult<Vec<PostIndexEntry>> {
        let state = self.lock()?;
        let matching = state.index.entries().iter().filter(|e| {
            max_id.map_or(true, |m| e.status_id.as_str() < m) && min_id.map_or(true, |m| e.status_id.as_str() > m)
        });
        let out: Vec<PostIndexEntry> = if max_id.is_none() && min_id.is_some() {
            // Closest to min_id: the oldest `limit` of the newer entries.
            let all: Vec<&PostIndexEntry> = matching.collect();
            let skip = all.len().saturating_sub(limit);
            all.into_iter().skip(skip).cloned().collect()
        } else {
            matching.take(limit).cloned().collect()
        };
        Ok(out)
    }

    fn prepare(&self, entry: &PostIndexEntry) -> FedResult<Option<PreparedStatus>> {
        let Some(status) = self.db.status_by_id(&entry.status_id)? else {
            return Ok(None);
        };
        let Some(account) = self.db.account_by_id(&status.account_id)? else {
            return Ok(None);
        };
        let boost = match status.boost_id() {
            Some(id) => {
                let Some(boosted) = self.db.status_by_id(id)? else {
                    return Ok(None);
                };
                let Some(author) = self.db.account_by_id(&boosted.account_id)? else {
                    return Ok(None);
                };
                Some((boosted, author))
            }
            None => None,
        };
        Ok(Some(PreparedStatus { status, account, boost }))
    }

    pub fn remove(&self, status_id: &str) -> FedResult<usize> {
        let mut state = self.lock()?;
        let removed = state.index.remove(status_id);
        let TimelineState { index, prepared } = &mut *state;
        prepared.retain(|id, _| index.contains(id));
        Ok(removed)
    }

    pub fn remove_account(&self, account_id: &str) -> FedResult<usize> {
        let mut state = self.lock()?;
        let removed = state.index.remove_account(account_id);
        let TimelineState { index, prepared } = &mut *state;
        prepared.retain(|id, _| index.contains(id));
        Ok(removed)
    }
}

/// Owns one [`Timeline`] per local account, created on first use.
pub struct TimelineManager {
    db: FedDb,
    filter: VisibilityFilter,
    timelines: Mutex<HashMap<String, Arc<Timeline>>>,
}

impl TimelineManager {
    pub fn new(db: FedDb, filter: VisibilityFilter) -> Self {
        Self {
            db,
            filter,
            timelines: Mutex::new(HashMap::new()),
        }
    }

    fn all(&self) -> FedResult<Vec<Arc<Timeline>>> {
        let map = self
            .timelines
            .lock()
            .map_err(|_| FedError::Internal(anyhow::anyhow!("timeline registry lock poisoned")))?;
        Ok(map.values().cloned().collect())
    }

    pub fn timeline(&self, account_id: &str) -> FedResult<Arc<Timeline>> {
        let mut map = self
            .timelines
            .lock()
            .map_err(|_| FedError::Internal(anyhow::anyhow!("timeline registry lock poisoned")))?;
        Ok(map
            .entry(account_id.to_string())
            .or_insert_with(|| Arc::new(Timeline::new(account_id, self.db.clone(), self.filter.clone())))
            .clone())
    }

    pub fn index_and_prepare_one(&self, account_id: &str, status: &Status) -> FedResult<Option<PreparedStatus>> {
        self.timeline(account_id)?.index_and_prepare_one(status)
    }

    pub fn get_page(
        &self,
        account_id: &str,
        max_id: Option<&str>,
        min_id: Option<&str>,
        limit: usize,
    ) -> FedResult<Vec<PreparedStatus>> {
        self.timeline(account_id)?.get_page(max_id, min_id, limit)
    }

    /// Removes a status, and boosts of it, from every loaded timeline.
    pub fn remove_status(&self, status_id: &str) -> FedResult<usize> {
        let mut removed = 0;
        for t in self.all()? {
            removed += t.remove(status_id)?;
        }
        Ok(removed)
    }

    /// Drops everything from `account_id` off `owner_id`'s timeline.
    pub fn remove_account_from(&self, owner_id: &str, account_id: &str) -> FedResult<usize> {
        self.timeline(owner_id)?.remove_account(account_id)
    }

    /// Drops everything from `account_id` off every loaded timeline.
    pub fn remove_account_everywhere(&self, account_id: &str) -> FedResult<usize> {
        let mut removed = 0;
        for t in self.all()? {
            removed += t.remove_account(account_id)?;
        }
        Ok(removed)
    }

    /// Forgets a timeline entirely, e.g. when its owner is deleted.
    pub fn drop_timeline(&self, account_id: &str) -> FedResult<()> {
        self.timelines
            .lock()
            .map_err(|_| FedError::Internal(anyhow::anyhow!("timeline registry lock poisoned")))?
            .remove(account_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testrig;

    fn entry(ms: i64, id: &str) -> PostIndexEntry {
        PostIndexEntry {
            created_at_ms: ms,
            status_id: id.to_string(),
            boost_of_id: None,
            account_id: "acct".to_string(),
            boost_of_account_id: None,
        }
    }

    fn ids(index: &PostIndex) -> Vec<&str> {
        index.entries().iter().map(|e| e.status_id.as_str()).collect()
    }

    #[test]
    fn index_stays_sorted_newest_first() {
        let mut index = PostIndex::default();
        assert!(index.insert(entry(3, "t3")));
        assert!(index.insert(entry(1, "t1")));
        assert!(index.insert(entry(2, "t2")));
        assert_eq!(ids(&index), vec!["t3", "t2", "t1"]);
        assert!(index.insert(entry(0, "t0")));
        assert!(index.insert(entry(9, "t9")));
        assert_eq!(ids(&index), vec!["t9", "t3", "t2", "t1", "t0"]);
        assert_eq!(index.oldest().unwrap().status_id, "t0");
        assert_eq!(index.newest().unwrap().status_id, "t9");
    }

    #[test]
    fn duplicate_insert_is_refused() {
        let mut index = PostIndex::default();
        assert!(index.insert(entry(5, "a")));
        assert!(!index.insert(entry(7, "a")));
        assert_eq!(index.len(), 1);
    }

    #[test]
    fn removal_takes_boosts_along() {
        let mut index = PostIndex::default();
        index.insert(entry(1, "orig"));
        let mut boost = entry(2, "boost");
        boost.boost_of_id = Some("orig".to_string());
        index.insert(boost);
        index.insert(entry(3, "other"));
        assert_eq!(index.remove("orig"), 2);
        assert_eq!(ids(&index), vec!["other"]);
        assert!(!index.contains("boost"));
    }

    struct Rig {
        _dir: tempfile::TempDir,
        db: FedDb,
        manager: TimelineManager,
        alice: Account,
        bob: Account,
    }

    fn rig() -> Rig {
        let (dir, db) = testrig::temp_db();
        let cfg = testrig::config();
        let alice = testrig::local_account(&db, &cfg, "alice");
        let bob = testrig::remote_account(&db, "bob", "remote.example");
        db.put_follow(&testrig::follow_edge(&alice, &bob)).unwrap();
        let filter = VisibilityFilter::new(db.clone(), Arc::new(cfg));
        Rig {
            _dir: dir,
            manager: TimelineManager::new(db.clone(), filter),
            db,
            alice,
            bob,
        }
    }

    #[test]
    fn empty_timeline_has_no_oldest_id() {
        let r = rig();
        assert_eq!(r.manager.timeline(&r.alice.id).unwrap().oldest_indexed_id().unwrap(), "");
    }

    #[test]
    fn index_behind_stops_when_store_runs_out() {
        let r = rig();
        for ms in 1..=5 {
            testrig::status(&r.db, &r.bob, ms * 1_000);
        }
        let t = r.manager.timeline(&r.alice.id).unwrap();
        assert_eq!(t.index_behind("", 20).unwrap(), 5);
        assert_eq!(t.len().unwrap(), 5);
        assert_eq!(t.index_behind(&t.oldest_indexed_id().unwrap(), 20).unwrap(), 0);
    }

    #[test]
    fn backfill_skips_statuses_that_are_not_home_timelineable() {
        let r = rig();
        let keep = testrig::status(&r.db, &r.bob, 1_000);
        let mut dangling = testrig::status_unsaved(&r.bob, 2_000);
        dangling.in_reply_to_uri = Some("https://remote.example/statuses/unknown".to_string());
        r.db.put_status(&dangling).unwrap();

        let page = r.manager.get_page(&r.alice.id, None, None, 10).unwrap();
        assert_eq!(page.len(), 1);
        assert_eq!(page[0].status.id, keep.id);
        assert_eq!(page[0].account.id, r.bob.id);
    }

    #[test]
    fn paging_walks_both_directions() {
        let r = rig();
        let statuses: Vec<Status> = (1..=6).map(|i| testrig::status(&r.db, &r.bob, i * 1_000)).collect();

        let first = r.manager.get_page(&r.alice.id, None, None, 2).unwrap();
        let first_ids: Vec<&str> = first.iter().map(|p| p.status.id.as_str()).collect();
        assert_eq!(first_ids, vec![statuses[5].id.as_str(), statuses[4].id.as_str()]);

        let older = r.manager.get_page(&r.alice.id, Some(&statuses[4].id), None, 2).unwrap();
        let older_ids: Vec<&str> = older.iter().map(|p| p.status.id.as_str()).collect();
        assert_eq!(older_ids, vec![statuses[3].id.as_str(), statuses[2].id.as_str()]);

        let newer = r.manager.get_page(&r.alice.id, None, Some(&statuses[0].id), 2).unwrap();
        let newer_ids: Vec<&str> = newer.iter().map(|p| p.status.id.as_str()).collect();
        assert_eq!(newer_ids, vec![statuses[2].id.as_str(), statuses[1].id.as_str()]);
    }

    #[test]
    fn index_before_pulls_newer_statuses() {
        let r = rig();
        let anchor = testrig::status(&r.db, &r.bob, 1_000);
        testrig::status(&r.db, &r.bob, 2_000);
        testrig::status(&r.db, &r.bob, 3_000);
        let t = r.manager.timeline(&r.alice.id).unwrap();
        assert_eq!(t.index_before(&anchor.id, true, 10).unwrap(), 3);
        assert_eq!(t.oldest_indexed_id().unwrap(), anchor.id);
    }

    #[test]
    fn prepared_boost_carries_original() {
        let r = rig();
        let carol = testrig::local_account(&r.db, &testrig::config(), "carol");
        let original = testrig::status(&r.db, &carol, 1_000);
        let mut boost = testrig::status_unsaved(&r.bob, 2_000);
        boost.boost_of_id = Some(original.id.clone());
        boost.boost_of_account_id = Some(carol.id.clone());
        r.db.put_status(&boost).unwrap();

        let prepared = r
            .manager
            .index_and_prepare_one(&r.alice.id, &boost)
            .unwrap()
            .expect("indexed");
        let (boosted, author) = prepared.boost.unwrap();
        assert_eq!(boosted.id, original.id);
        assert_eq!(author.id, carol.id);
        assert!(r.manager.index_and_prepare_one(&r.alice.id, &boost).unwrap().is_none());

        assert_eq!(r.manager.remove_status(&original.id).unwrap(), 1);
        assert_eq!(r.manager.timeline(&r.alice.id).unwrap().len().unwrap(), 0);
    }
}
