/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - FEDI3 Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

//! SQLite-backed store. Every lookup distinguishes "no rows" (`Ok(None)` or an
//! empty `Vec`) from a hard error.

use crate::model::{
    now_ms, Account, Block, DomainBlock, Follow, FollowRequest, Instance, Mention, Status, Visibility,
};
use anyhow::{Context, Result};
use rusqlite::{params, params_from_iter, types::Value as SqlValue, Connection, OptionalExtension, Row};
use std::path::{Path, PathBuf};

#[derive(Clone, Debug)]
pub struct FedDb {
    path: PathBuf,
}

const ACCOUNT_COLS: &str = "id, username, domain, uri, url, display_name, note, inbox_uri, outbox_uri, \
     followers_uri, following_uri, shared_inbox_uri, public_key_pem, public_key_uri, private_key_pem, \
     actor_type, locked, discoverable, bot, created_at_ms, updated_at_ms, suspended_at_ms";

const STATUS_COLS: &str = "id, uri, url, content, account_id, account_uri, in_reply_to_uri, in_reply_to_id, \
     in_reply_to_account_id, boost_of_id, boost_of_account_id, visibility, local, federated, boostable, \
     likeable, mention_ids, created_at_ms";

const EDGE_COLS: &str = "id, uri, account_id, target_account_id, show_reblogs, notify, created_at_ms";

const INSTANCE_COLS: &str = "id, domain, uri, title, description, contact_email, version, domain_block_id, \
     suspended_at_ms, created_at_ms, updated_at_ms";

impl FedDb {
    pub fn open(db_path: impl AsRef<Path>) -> Result<Self> {
        let path = db_path.as_ref().to_path_buf();
        let conn = Connection::open(&path).with_context(|| format!("open db: {}", path.display()))?;
        conn.execute_batch(
            r#"
            PRAGMA journal_mode=WAL;
            CREATE TABLE IF NOT EXISTS accounts (
              id TEXT PRIMARY KEY,
              username TEXT NOT NULL,
              domain TEXT NOT NULL DEFAULT '',
              uri TEXT NOT NULL UNIQUE,
              url TEXT NOT NULL DEFAULT '',
              display_name TEXT NOT NULL DEFAULT '',
              note TEXT NOT NULL DEFAULT '',
              inbox_uri TEXT NOT NULL DEFAULT '',
              outbox_uri TEXT NOT NULL DEFAULT '',
              followers_uri TEXT NOT NULL DEFAULT '',
              following_uri TEXT NOT NULL DEFAULT '',
              shared_inbox_uri TEXT NULL,
              public_key_pem TEXT NOT NULL DEFAULT '',
              public_key_uri TEXT NOT NULL DEFAULT '',
              private_key_pem TEXT NULL,
              actor_type TEXT NOT NULL DEFAULT 'Person',
              locked INTEGER NOT NULL DEFAULT 0,
              discoverable INTEGER NOT NULL DEFAULT 1,
              bot INTEGER NOT NULL DEFAULT 0,
              created_at_ms INTEGER NOT NULL,
              updated_at_ms INTEGER NOT NULL,
              suspended_at_ms INTEGER NULL,
              UNIQUE(username, domain)
            );
            CREATE INDEX IF NOT EXISTS idx_accounts_public_key_uri ON accounts(public_key_uri);
            CREATE TABLE IF NOT EXISTS statuses (
              id TEXT PRIMARY KEY,
              uri TEXT NOT NULL UNIQUE,
              url TEXT NOT NULL DEFAULT '',
              content TEXT NOT NULL DEFAULT '',
              account_id TEXT NOT NULL,
              account_uri TEXT NOT NULL DEFAULT '',
              in_reply_to_uri TEXT NULL,
              in_reply_to_id TEXT NULL,
              in_reply_to_account_id TEXT NULL,
              boost_of_id TEXT NULL,
              boost_of_account_id TEXT NULL,
              visibility TEXT NOT NULL,
              local INTEGER NOT NULL DEFAULT 0,
              federated INTEGER NOT NULL DEFAULT 1,
              boostable INTEGER NOT NULL DEFAULT 1,
              likeable INTEGER NOT NULL DEFAULT 1,
              mention_ids TEXT NOT NULL DEFAULT '[]',
              created_at_ms INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_statuses_account ON statuses(account_id, id);
            CREATE TABLE IF NOT EXISTS mentions (
              id TEXT PRIMARY KEY,
              status_id TEXT NOT NULL,
              origin_account_id TEXT NOT NULL,
              target_account_id TEXT NOT NULL,
              created_at_ms INTEGER NOT NULL
            );
            CREATE TABLE IF NOT EXISTS follows (
              id TEXT PRIMARY KEY,
              uri TEXT NOT NULL UNIQUE,
              account_id TEXT NOT NULL,
              target_account_id TEXT NOT NULL,
              show_reblogs INTEGER NOT NULL DEFAULT 1,
              notify INTEGER NOT NULL DEFAULT 0,
              created_at_ms INTEGER NOT NULL,
              UNIQUE(account_id, target_account_id)
            );
            CREATE INDEX IF NOT EXISTS idx_follows_target ON follows(target_account_id);
            CREATE TABLE IF NOT EXISTS follow_requests (
              id TEXT PRIMARY KEY,
              uri TEXT NOT NULL UNIQUE,
              account_id TEXT NOT NULL,
              target_account_id TEXT NOT NULL,
              show_reblogs INTEGER NOT NULL DEFAULT 1,
              notify INTEGER NOT NULL DEFAULT 0,
              created_at_ms INTEGER NOT NULL,
              UNIQUE(account_id, target_account_id)
            );
            CREATE TABLE IF NOT EXISTS blocks (
              id TEXT PRIMARY KEY,
              uri TEXT NOT NULL UNIQUE,
              account_id TEXT NOT NULL,
              target_account_id TEXT NOT NULL,
              created_at_ms INTEGER NOT NULL,
              UNIQUE(account_id, target_account_id)
            );
            CREATE TABLE IF NOT EXISTS domain_blocks (
              id TEXT PRIMARY KEY,
              domain TEXT NOT NULL UNIQUE COLLATE NOCASE,
              created_by_account_id TEXT NOT NULL DEFAULT '',
              private_comment TEXT NOT NULL DEFAULT '',
              public_comment TEXT NOT NULL DEFAULT '',
              obfuscate INTEGER NOT NULL DEFAULT 0,
              created_at_ms INTEGER NOT NULL
            );
            CREATE TABLE IF NOT EXISTS instances (
              id TEXT PRIMARY KEY,
              domain TEXT NOT NULL UNIQUE COLLATE NOCASE,
              uri TEXT NOT NULL DEFAULT '',
              title TEXT NOT NULL DEFAULT '',
              description TEXT NOT NULL DEFAULT '',
              contact_email TEXT NOT NULL DEFAULT '',
              version TEXT NOT NULL DEFAULT '',
              domain_block_id TEXT NULL,
              suspended_at_ms INTEGER NULL,
              created_at_ms INTEGER NOT NULL,
              updated_at_ms INTEGER NOT NULL
            );
            "#,
        )?;
        Ok(Self { path })
    }

    fn conn(&self) -> Result<Connection> {
        Connection::open(&self.path).with_context(|| format!("open db: {}", self.path.display()))
    }

    pub fn health_check(&self) -> Result<()> {
        let conn = self.conn()?;
        conn.query_row("SELECT 1", [], |_| Ok(()))?;
        Ok(())
    }

    // Accounts.

    pub fn put_account(&self, a: &Account) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            &format!(
                "INSERT INTO accounts({ACCOUNT_COLS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19, ?20, ?21, ?22)"
            ),
            params![
                a.id,
                a.username,
                a.domain.as_deref().unwrap_or(""),
                a.uri,
                a.url,
                a.display_name,
                a.note,
                a.inbox_uri,
                a.outbox_uri,
                a.followers_uri,
                a.following_uri,
                a.shared_inbox_uri,
                a.public_key_pem,
                a.public_key_uri,
                a.private_key_pem,
                a.actor_type,
                a.locked,
                a.discoverable,
                a.bot,
                a.created_at_ms,
                a.updated_at_ms,
                a.suspended_at_ms,
            ],
        )
        .with_context(|| format!("put account {}", a.uri))?;
        Ok(())
    }

    pub fn update_account(&self, a: &Account) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            r#"
            UPDATE accounts SET
              username=?2, domain=?3, uri=?4, url=?5, display_name=?6, note=?7, inbox_uri=?8, outbox_uri=?9,
              followers_uri=?10, following_uri=?11, shared_inbox_uri=?12, public_key_pem=?13, public_key_uri=?14,
              private_key_pem=?15, actor_type=?16, locked=?17, discoverable=?18, bot=?19, updated_at_ms=?20,
              suspended_at_ms=?21
            WHERE id=?1
            "#,
            params![
                a.id,
                a.username,
                a.domain.as_deref().unwrap_or(""),
                a.uri,
                a.url,
                a.display_name,
                a.note,
                a.inbox_uri,
                a.outbox_uri,
                a.followers_uri,
                a.following_uri,
                a.shared_inbox_uri,
                a.public_key_pem,
                a.public_key_uri,
                a.private_key_pem,
                a.actor_type,
                a.locked,
                a.discoverable,
                a.bot,
                now_ms(),
                a.suspended_at_ms,
            ],
        )
        .with_context(|| format!("update account {}", a.id))?;
        Ok(())
    }

    pub fn account_by_id(&self, id: &str) -> Result<Option<Account>> {
        self.account_where("id=?1", id)
    }

    pub fn account_by_uri(&self, uri: &str) -> Result<Option<Account>> {
        self.account_where("uri=?1", uri)
    }

    pub fn account_by_public_key_uri(&self, key_uri: &str) -> Result<Option<Account>> {
        self.account_where("public_key_uri=?1", key_uri)
    }

    pub fn local_account_by_username(&self, username: &str) -> Result<Option<Account>> {
        self.account_where("domain='' AND username=?1 COLLATE NOCASE", username)
    }

    fn account_where(&self, cond: &str, v: &str) -> Result<Option<Account>> {
        let conn = self.conn()?;
        conn.query_row(
            &format!("SELECT {ACCOUNT_COLS} FROM accounts WHERE {cond} LIMIT 1"),
            params![v],
            account_from_row,
        )
        .optional()
        .map_err(Into::into)
    }

    /// Removes the instance actor of a domain (username equal to the domain).
    pub fn delete_instance_account(&self, domain: &str) -> Result<u64> {
        let conn = self.conn()?;
        let n = conn.execute(
            "DELETE FROM accounts WHERE username=?1 COLLATE NOCASE AND domain=?1 COLLATE NOCASE",
            params![domain],
        )?;
        Ok(n as u64)
    }

    // Statuses.

    pub fn put_status(&self, s: &Status) -> Result<()> {
        let conn = self.conn()?;
        let mention_ids = serde_json::to_string(&s.mention_ids).context("encode mention ids")?;
        conn.execute(
            &format!(
                "INSERT INTO statuses({STATUS_COLS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18)"
            ),
            params![
                s.id,
                s.uri,
                s.url,
                s.content,
                s.account_id,
                s.account_uri,
                s.in_reply_to_uri,
                s.in_reply_to_id,
                s.in_reply_to_account_id,
                s.boost_of_id,
                s.boost_of_account_id,
                s.visibility.as_str(),
                s.local,
                s.federated,
                s.boostable,
                s.likeable,
                mention_ids,
                s.created_at_ms,
            ],
        )
        .with_context(|| format!("put status {}", s.uri))?;
        Ok(())
    }

    pub fn status_by_id(&self, id: &str) -> Result<Option<Status>> {
        self.status_where("id=?1", id)
    }

    pub fn status_by_uri(&self, uri: &str) -> Result<Option<Status>> {
        self.status_where("uri=?1", uri)
    }

    fn status_where(&self, cond: &str, v: &str) -> Result<Option<Status>> {
        let conn = self.conn()?;
        conn.query_row(
            &format!("SELECT {STATUS_COLS} FROM statuses WHERE {cond} LIMIT 1"),
            params![v],
            status_from_row,
        )
        .optional()
        .map_err(Into::into)
    }

    /// `account_id`'s boost of `boost_of_id`, if any.
    pub fn boost_by(&self, account_id: &str, boost_of_id: &str) -> Result<Option<Status>> {
        let conn = self.conn()?;
        conn.query_row(
            &format!("SELECT {STATUS_COLS} FROM statuses WHERE account_id=?1 AND boost_of_id=?2 LIMIT 1"),
            params![account_id, boost_of_id],
            status_from_row,
        )
        .optional()
        .map_err(Into::into)
    }

    pub fn delete_status(&self, id: &str) -> Result<bool> {
        let conn = self.conn()?;
        let n = conn.execute("DELETE FROM statuses WHERE id=?1", params![id])?;
        conn.execute("DELETE FROM mentions WHERE status_id=?1", params![id])?;
        Ok(n > 0)
    }

    /// Candidate statuses for a home timeline: authored by the owner or by
    /// accounts the owner follows.
    ///
    /// With `max_id` the page walks backwards (ids strictly lower, newest
    /// first). With only `min_id` it walks forwards (ids strictly higher,
    /// oldest first) so repeated calls advance. An empty page means the
    /// store is exhausted.
    pub fn home_timeline_statuses(
        &self,
        account_id: &str,
        max_id: Option<&str>,
        min_id: Option<&str>,
        limit: u32,
    ) -> Result<Vec<Status>> {
        let limit = limit.clamp(1, 200) as i64;
        let mut sql = format!(
            "SELECT {STATUS_COLS} FROM statuses WHERE (account_id=?1 OR account_id IN \
             (SELECT target_account_id FROM follows WHERE account_id=?1))"
        );
        let mut values = vec![SqlValue::Text(account_id.to_string())];
        if let Some(max_id) = max_id.filter(|s| !s.is_empty()) {
            values.push(SqlValue::Text(max_id.to_string()));
            sql.push_str(&format!(" AND id < ?{}", values.len()));
        }
        let forward = max_id.map(str::is_empty).unwrap_or(true) && min_id.is_some_and(|s| !s.is_empty());
        if let Some(min_id) = min_id.filter(|s| !s.is_empty()) {
            values.push(SqlValue::Text(min_id.to_string()));
            sql.push_str(&format!(" AND id > ?{}", values.len()));
        }
        values.push(SqlValue::Integer(limit));
        sql.push_str(&format!(
            " ORDER BY id {} LIMIT ?{}",
            if forward { "ASC" } else { "DESC" },
            values.len()
        ));

        let conn = self.conn()?;
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params_from_iter(values.iter()), status_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    // Mentions.

    pub fn put_mention(&self, m: &Mention) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO mentions(id, status_id, origin_account_id, target_account_id, created_at_ms) VALUES (?1, ?2, ?3, ?4, ?5)",
            params![m.id, m.status_id, m.origin_account_id, m.target_account_id, m.created_at_ms],
        )?;
        Ok(())
    }

    pub fn mention_by_id(&self, id: &str) -> Result<Option<Mention>> {
        let conn = self.conn()?;
        conn.query_row(
            "SELECT id, status_id, origin_account_id, target_account_id, created_at_ms FROM mentions WHERE id=?1",
            params![id],
            |r| {
                Ok(Mention {
                    id: r.get(0)?,
                    status_id: r.get(1)?,
                    origin_account_id: r.get(2)?,
                    target_account_id: r.get(3)?,
                    created_at_ms: r.get(4)?,
                })
            },
        )
        .optional()
        .map_err(Into::into)
    }

    // Follows and follow requests.

    pub fn put_follow(&self, f: &Follow) -> Result<()> {
        self.put_edge("follows", f)
    }

    pub fn follow_by_uri(&self, uri: &str) -> Result<Option<Follow>> {
        self.edge_where("follows", "uri=?1", &[uri])
    }

    pub fn follow_between(&self, account_id: &str, target_account_id: &str) -> Result<Option<Follow>> {
        self.edge_where(
            "follows",
            "account_id=?1 AND target_account_id=?2",
            &[account_id, target_account_id],
        )
    }

    pub fn follows(&self, account_id: &str, target_account_id: &str) -> Result<bool> {
        Ok(self.follow_between(account_id, target_account_id)?.is_some())
    }

    pub fn delete_follow(&self, id: &str) -> Result<bool> {
        let conn = self.conn()?;
        Ok(conn.execute("DELETE FROM follows WHERE id=?1", params![id])? > 0)
    }

    pub fn put_follow_request(&self, f: &FollowRequest) -> Result<()> {
        self.put_edge("follow_requests", f)
    }

    pub fn follow_request_by_uri(&self, uri: &str) -> Result<Option<FollowRequest>> {
        self.edge_where("follow_requests", "uri=?1", &[uri])
    }

    pub fn follow_request_between(
        &self,
        account_id: &str,
        target_account_id: &str,
    ) -> Result<Option<FollowRequest>> {
        self.edge_where(
            "follow_requests",
            "account_id=?1 AND target_account_id=?2",
            &[account_id, target_account_id],
        )
    }

    pub fn delete_follow_request(&self, id: &str) -> Result<bool> {
        let conn = self.conn()?;
        Ok(conn.execute("DELETE FROM follow_requests WHERE id=?1", params![id])? > 0)
    }

    /// Promotes the request from `account_id` to `target_account_id` into a
    /// follow, keeping its id and URI. Returns `None` if no request exists.
    pub fn accept_follow_request(&self, account_id: &str, target_account_id: &str) -> Result<Option<Follow>> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let req: Option<FollowRequest> = tx
            .query_row(
                &format!(
                    "SELECT {EDGE_COLS} FROM follow_requests WHERE account_id=?1 AND target_account_id=?2"
                ),
                params![account_id, target_account_id],
                edge_from_row,
            )
            .optional()?;
        let Some(req) = req else {
            return Ok(None);
        };
        let follow = Follow {
            created_at_ms: now_ms(),
            ..req.clone()
        };
        tx.execute(
            &format!(
                "INSERT OR REPLACE INTO follows({EDGE_COLS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)"
            ),
            params![
                follow.id,
                follow.uri,
                follow.account_id,
                follow.target_account_id,
                follow.show_reblogs,
                follow.notify,
                follow.created_at_ms,
            ],
        )?;
        tx.execute("DELETE FROM follow_requests WHERE id=?1", params![req.id])?;
        tx.commit()?;
        Ok(Some(follow))
    }

    fn put_edge(&self, table: &str, f: &Follow) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            &format!("INSERT INTO {table}({EDGE_COLS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)"),
            params![
                f.id,
                f.uri,
                f.account_id,
                f.target_account_id,
                f.show_reblogs,
                f.notify,
                f.created_at_ms,
            ],
        )
        .with_context(|| format!("put {table} {}", f.uri))?;
        Ok(())
    }

    fn edge_where(&self, table: &str, cond: &str, args: &[&str]) -> Result<Option<Follow>> {
        let conn = self.conn()?;
        conn.query_row(
            &format!("SELECT {EDGE_COLS} FROM {table} WHERE {cond} LIMIT 1"),
            params_from_iter(args.iter()),
            edge_from_row,
        )
        .optional()
        .map_err(Into::into)
    }

    /// Ids of local accounts following `target_account_id`.
    pub fn local_follower_ids(&self, target_account_id: &str) -> Result<Vec<String>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT a.id FROM follows f JOIN accounts a ON a.id=f.account_id \
             WHERE f.target_account_id=?1 AND a.domain='' AND a.suspended_at_ms IS NULL",
        )?;
        let rows = stmt
            .query_map(params![target_account_id], |r| r.get::<_, String>(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    /// Distinct delivery inboxes of remote accounts following `target_account_id`.
    pub fn remote_follower_inboxes(&self, target_account_id: &str) -> Result<Vec<String>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT DISTINCT COALESCE(NULLIF(a.shared_inbox_uri, ''), a.inbox_uri) FROM follows f \
             JOIN accounts a ON a.id=f.account_id \
             WHERE f.target_account_id=?1 AND a.domain<>'' AND a.suspended_at_ms IS NULL",
        )?;
        let rows = stmt
            .query_map(params![target_account_id], |r| r.get::<_, String>(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows.into_iter().filter(|s| !s.is_empty()).collect())
    }

    // Blocks.

    pub fn put_block(&self, b: &Block) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO blocks(id, uri, account_id, target_account_id, created_at_ms) VALUES (?1, ?2, ?3, ?4, ?5)",
            params![b.id, b.uri, b.account_id, b.target_account_id, b.created_at_ms],
        )
        .with_context(|| format!("put block {}", b.uri))?;
        Ok(())
    }

    pub fn block_between(&self, account_id: &str, target_account_id: &str) -> Result<Option<Block>> {
        let conn = self.conn()?;
        conn.query_row(
            "SELECT id, uri, account_id, target_account_id, created_at_ms FROM blocks WHERE account_id=?1 AND target_account_id=?2",
            params![account_id, target_account_id],
            |r| {
                Ok(Block {
                    id: r.get(0)?,
                    uri: r.get(1)?,
                    account_id: r.get(2)?,
                    target_account_id: r.get(3)?,
                    created_at_ms: r.get(4)?,
                })
            },
        )
        .optional()
        .map_err(Into::into)
    }

    /// True if either account blocks the other.
    pub fn blocked_either(&self, a: &str, b: &str) -> Result<bool> {
        let conn = self.conn()?;
        let hit: Option<i64> = conn
            .query_row(
                "SELECT 1 FROM blocks WHERE (account_id=?1 AND target_account_id=?2) OR (account_id=?2 AND target_account_id=?1) LIMIT 1",
                params![a, b],
                |r| r.get(0),
            )
            .optional()?;
        Ok(hit.is_some())
    }

    pub fn delete_block(&self, id: &str) -> Result<bool> {
        let conn = self.conn()?;
        Ok(conn.execute("DELETE FROM blocks WHERE id=?1", params![id])? > 0)
    }

    /// Removes follows, follow requests and blocks in both directions.
    pub fn delete_relationships_of(&self, account_id: &str) -> Result<()> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        for table in ["blocks", "follow_requests", "follows"] {
            tx.execute(
                &format!("DELETE FROM {table} WHERE account_id=?1 OR target_account_id=?1"),
                params![account_id],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    // Domain blocks.

    pub fn put_domain_block(&self, b: &DomainBlock) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            r#"
            INSERT INTO domain_blocks(id, domain, created_by_account_id, private_comment, public_comment, obfuscate, created_at_ms)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            "#,
            params![
                b.id,
                b.domain.trim().to_ascii_lowercase(),
                b.created_by_account_id,
                b.private_comment,
                b.public_comment,
                b.obfuscate,
                b.created_at_ms,
            ],
        )
        .with_context(|| format!("put domain block {}", b.domain))?;
        Ok(())
    }

    pub fn domain_block(&self, domain: &str) -> Result<Option<DomainBlock>> {
        let conn = self.conn()?;
        conn.query_row(
            "SELECT id, domain, created_by_account_id, private_comment, public_comment, obfuscate, created_at_ms \
             FROM domain_blocks WHERE domain=?1 COLLATE NOCASE",
            params![domain.trim()],
            |r| {
                Ok(DomainBlock {
                    id: r.get(0)?,
                    domain: r.get(1)?,
                    created_by_account_id: r.get(2)?,
                    private_comment: r.get(3)?,
                    public_comment: r.get(4)?,
                    obfuscate: r.get(5)?,
                    created_at_ms: r.get(6)?,
                })
            },
        )
        .optional()
        .map_err(Into::into)
    }

    /// True if `host` or any parent domain of it has a domain block.
    pub fn is_domain_blocked(&self, host: &str) -> Result<bool> {
        let host = host.trim().trim_end_matches('.').to_ascii_lowercase();
        if host.is_empty() {
            return Ok(false);
        }
        let conn = self.conn()?;
        let mut stmt = conn.prepare("SELECT 1 FROM domain_blocks WHERE domain=?1 COLLATE NOCASE")?;
        let mut candidate = host.as_str();
        loop {
            if stmt.exists(params![candidate])? {
                return Ok(true);
            }
            match candidate.split_once('.') {
                Some((_, parent)) if parent.contains('.') => candidate = parent,
                _ => return Ok(false),
            }
        }
    }

    // Instances.

    pub fn put_instance(&self, i: &Instance) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            &format!(
                "INSERT INTO instances({INSTANCE_COLS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)"
            ),
            params![
                i.id,
                i.domain.to_ascii_lowercase(),
                i.uri,
                i.title,
                i.description,
                i.contact_email,
                i.version,
                i.domain_block_id,
                i.suspended_at_ms,
                i.created_at_ms,
                i.updated_at_ms,
            ],
        )
        .with_context(|| format!("put instance {}", i.domain))?;
        Ok(())
    }

    pub fn update_instance(&self, i: &Instance) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            r#"
            UPDATE instances SET uri=?2, title=?3, description=?4, contact_email=?5, version=?6,
              domain_block_id=?7, suspended_at_ms=?8, updated_at_ms=?9
            WHERE id=?1
            "#,
            params![
                i.id,
                i.uri,
                i.title,
                i.description,
                i.contact_email,
                i.version,
                i.domain_block_id,
                i.suspended_at_ms,
                now_ms(),
            ],
        )?;
        Ok(())
    }

    pub fn instance_by_domain(&self, domain: &str) -> Result<Option<Instance>> {
        let conn = self.conn()?;
        conn.query_row(
            &format!("SELECT {INSTANCE_COLS} FROM instances WHERE domain=?1 COLLATE NOCASE"),
            params![domain.trim()],
            |r| {
                Ok(Instance {
                    id: r.get(0)?,
                    domain: r.get(1)?,
                    uri: r.get(2)?,
                    title: r.get(3)?,
                    description: r.get(4)?,
                    contact_email: r.get(5)?,
                    version: r.get(6)?,
                    domain_block_id: r.get(7)?,
                    suspended_at_ms: r.get(8)?,
                    created_at_ms: r.get(9)?,
                    updated_at_ms: r.get(10)?,
                })
            },
        )
        .optional()
        .map_err(Into::into)
    }
}

fn account_from_row(r: &Row<'_>) -> rusqlite::Result<Account> {
    let domain: String = r.get(2)?;
    Ok(Account {
        id: r.get(0)?,
        username: r.get(1)?,
        domain: if domain.is_empty() { None } else { Some(domain) },
        uri: r.get(3)?,
        url: r.get(4)?,
        display_name: r.get(5)?,
        note: r.get(6)?,
        inbox_uri: r.get(7)?,
        outbox_uri: r.get(8)?,
        followers_uri: r.get(9)?,
        following_uri: r.get(10)?,
        shared_inbox_uri: r.get(11)?,
        public_key_pem: r.get(12)?,
        public_key_uri: r.get(13)?,
        private_key_pem: r.get(14)?,
        actor_type: r.get(15)?,
        locked: r.get(16)?,
        discoverable: r.get(17)?,
        bot: r.get(18)?,
        created_at_ms: r.get(19)?,
        updated_at_ms: r.get(20)?,
        suspended_at_ms: r.get(21)?,
    })
}

fn status_from_row(r: &Row<'_>) -> rusqlite::Result<Status> {
    let visibility: String = r.get(11)?;
    let mention_ids: String = r.get(16)?;
    Ok(Status {
        id: r.get(0)?,
        uri: r.get(1)?,
        url: r.get(2)?,
        content: r.get(3)?,
        account_id: r.get(4)?,
        account_uri: r.get(5)?,
        in_reply_to_uri: r.get(6)?,
        in_reply_to_id: r.get(7)?,
        in_reply_to_account_id: r.get(8)?,
        boost_of_id: r.get(9)?,
        boost_of_account_id: r.get(10)?,
        // Unknown tiers are read as the most restrictive one.
        visibility: Visibility::parse(&visibility).unwrap_or(Visibility::Direct),
        local: r.get(12)?,
        federated: r.get(13)?,
        boostable: r.get(14)?,
        likeable: r.get(15)?,
        mention_ids: serde_json::from_str(&mention_ids).unwrap_or_default(),
        created_at_ms: r.get(17)?,
    })
}

fn edge_from_row(r: &Row<'_>) -> rusqlite::Result<Follow> {
    Ok(Follow {
        id: r.get(0)?,
        uri: r.get(1)?,
        account_id: r.get(2)?,
        target_account_id: r.get(3)?,
        show_reblogs: r.get(4)?,
        notify: r.get(5)?,
        created_at_ms: r.get(6)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::new_id;
    use crate::testrig;

    #[test]
    fn missing_rows_are_none_not_errors() {
        let (_dir, db) = testrig::temp_db();
        assert!(db.account_by_uri("https://nowhere.example/users/x").unwrap().is_none());
        assert!(db.status_by_id("nope").unwrap().is_none());
        assert!(db.domain_block("nowhere.example").unwrap().is_none());
        assert!(db.instance_by_domain("nowhere.example").unwrap().is_none());
        assert!(db.accept_follow_request("a", "b").unwrap().is_none());
    }

    #[test]
    fn local_account_lookup_by_username_and_key() {
        let (_dir, db) = testrig::temp_db();
        let cfg = testrig::config();
        let alice = testrig::local_account(&db, &cfg, "alice");
        let got = db.local_account_by_username("alice").unwrap().unwrap();
        assert_eq!(got, alice);
        assert!(got.is_local());
        let by_key = db.account_by_public_key_uri(&alice.public_key_uri).unwrap().unwrap();
        assert_eq!(by_key.id, alice.id);
    }

    #[test]
    fn domain_block_matches_subdomains_case_insensitively() {
        let (_dir, db) = testrig::temp_db();
        db.put_domain_block(&DomainBlock {
            id: new_id(),
            domain: "Bad.Example".to_string(),
            created_by_account_id: String::new(),
            private_comment: String::new(),
            public_comment: String::new(),
            obfuscate: false,
            created_at_ms: now_ms(),
        })
        .unwrap();
        assert!(db.is_domain_blocked("bad.example").unwrap());
        assert!(db.is_domain_blocked("social.BAD.example").unwrap());
        assert!(!db.is_domain_blocked("good.example").unwrap());
        assert!(!db.is_domain_blocked("example").unwrap());
    }

    #[test]
    fn follow_request_promotion() {
        let (_dir, db) = testrig::temp_db();
        let cfg = testrig::config();
        let alice = testrig::local_account(&db, &cfg, "alice");
        let bob = testrig::remote_account(&db, "bob", "remote.example");
        let req = testrig::follow_edge(&bob, &alice);
        db.put_follow_request(&req).unwrap();

        let follow = db.accept_follow_request(&bob.id, &alice.id).unwrap().unwrap();
        assert_eq!(follow.uri, req.uri);
        assert!(db.follows(&bob.id, &alice.id).unwrap());
        assert!(db.follow_request_between(&bob.id, &alice.id).unwrap().is_none());
        assert_eq!(db.remote_follower_inboxes(&alice.id).unwrap(), vec![bob.delivery_inbox().to_string()]);
    }

    #[test]
    fn home_timeline_pages_both_directions() {
        let (_dir, db) = testrig::temp_db();
        let cfg = testrig::config();
        let alice = testrig::local_account(&db, &cfg, "alice");
        let bob = testrig::local_account(&db, &cfg, "bob");
        let carol = testrig::local_account(&db, &cfg, "carol");
        db.put_follow(&testrig::follow_edge(&alice, &bob)).unwrap();

        let s1 = testrig::status(&db, &bob, 1_000);
        let s2 = testrig::status(&db, &alice, 2_000);
        let _unfollowed = testrig::status(&db, &carol, 2_500);
        let s3 = testrig::status(&db, &bob, 3_000);

        let newest: Vec<_> = db
            .home_timeline_statuses(&alice.id, None, None, 10)
            .unwrap()
            .into_iter()
            .map(|s| s.id)
            .collect();
        assert_eq!(newest, vec![s3.id.clone(), s2.id.clone(), s1.id.clone()]);

        let older = db.home_timeline_statuses(&alice.id, Some(&s3.id), None, 1).unwrap();
        assert_eq!(older[0].id, s2.id);

        let newer = db.home_timeline_statuses(&alice.id, None, Some(&s1.id), 1).unwrap();
        assert_eq!(newer[0].id, s2.id);

        assert!(db.home_timeline_statuses(&alice.id, Some(&s1.id), None, 5).unwrap().is_empty());
    }

    #[test]
    fn relationships_removed_both_ways() {
        let (_dir, db) = testrig::temp_db();
        let cfg = testrig::config();
        let alice = testrig::local_account(&db, &cfg, "alice");
        let bob = testrig::remote_account(&db, "bob", "remote.example");
        db.put_follow(&testrig::follow_edge(&alice, &bob)).unwrap();
        db.put_follow(&testrig::follow_edge(&bob, &alice)).unwrap();
        db.put_block(&Block {
            id: new_id(),
            uri: "https://remote.example/blocks/1".to_string(),
            account_id: bob.id.clone(),
            target_account_id: alice.id.clone(),
            created_at_ms: now_ms(),
        })
        .unwrap();
        assert!(db.blocked_either(&alice.id, &bob.id).unwrap());

        db.delete_relationships_of(&bob.id).unwrap();
        assert!(!db.follows(&alice.id, &bob.id).unwrap());
        assert!(!db.follows(&bob.id, &alice.id).unwrap());
        assert!(!db.blocked_either(&alice.id, &bob.id).unwrap());
    }
}
