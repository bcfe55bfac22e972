/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - FEDI3 Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

//! Conversions between ActivityStreams documents and stored models.

use crate::error::{FedError, FedResult};
use crate::model::{ms_to_rfc3339, new_id, now_ms, Account, Instance, Status, Visibility};
use crate::uris::authority_from_url;
use kestrel_protocol::{
    ActorDocument, Endpoints, InstanceDocument, OneOrMany, PublicKeyDocument, AS_CONTEXT, AS_PUBLIC,
    SECURITY_CONTEXT,
};
use serde_json::{json, Value};

/// Builds a remote [`Account`] from a dereferenced actor document.
///
/// `key_uri` selects the key to store when the actor publishes several.
pub fn account_from_actor(doc: &ActorDocument, key_uri: Option<&str>) -> FedResult<Account> {
    let domain = authority_from_url(&doc.id)
        .ok_or_else(|| FedError::malformed(format!("actor id is not an absolute uri: {}", doc.id)))?;
    let inbox = doc
        .inbox
        .clone()
        .filter(|s| !s.is_empty())
        .ok_or_else(|| FedError::malformed(format!("actor {} has no inbox", doc.id)))?;

    let keys = doc.public_keys();
    let key = key_uri
        .and_then(|wanted| keys.iter().find(|k| k.id == wanted))
        .or_else(|| keys.first())
        .ok_or_else(|| FedError::malformed(format!("actor {} publishes no public key", doc.id)))?;

    let username = doc
        .preferred_username
        .clone()
        .filter(|s| !s.is_empty())
        .or_else(|| doc.id.trim_end_matches('/').rsplit('/').next().map(str::to_string))
        .unwrap_or_default();

    let now = now_ms();
    Ok(Account {
        id: new_id(),
        username,
        domain: Some(domain),
        uri: doc.id.clone(),
        url: doc.url.clone().unwrap_or_else(|| doc.id.clone()),
        display_name: doc.name.clone().unwrap_or_default(),
        note: doc.summary.clone().unwrap_or_default(),
        inbox_uri: inbox,
        outbox_uri: doc.outbox.clone().unwrap_or_default(),
        followers_uri: doc.followers.clone().unwrap_or_default(),
        following_uri: doc.following.clone().unwrap_or_default(),
        shared_inbox_uri: doc
            .endpoints
            .as_ref()
            .and_then(|e| e.shared_inbox.clone())
            .filter(|s| !s.is_empty()),
        public_key_pem: key.public_key_pem.clone(),
        public_key_uri: key.id.clone(),
        private_key_pem: None,
        actor_type: doc.kind.clone(),
        locked: doc.manually_approves_followers.unwrap_or(false),
        discoverable: doc.discoverable.unwrap_or(false),
        bot: doc.kind == "Service" || doc.kind == "Application",
        created_at_ms: now,
        updated_at_ms: now,
        suspended_at_ms: None,
    })
}

/// Copies refreshed profile fields onto an existing row, keeping its id.
pub fn refresh_account(existing: &Account, fresh: Account) -> Account {
    Account {
        id: existing.id.clone(),
        created_at_ms: existing.created_at_ms,
        suspended_at_ms: existing.suspended_at_ms,
        updated_at_ms: now_ms(),
        ..fresh
    }
}

pub fn account_to_actor(account: &Account) -> ActorDocument {
    ActorDocument {
        context: Some(json!([AS_CONTEXT, SECURITY_CONTEXT])),
        id: account.uri.clone(),
        kind: account.actor_type.clone(),
        preferred_username: Some(account.username.clone()),
        name: Some(account.display_name.clone()).filter(|s| !s.is_empty()),
        summary: Some(account.note.clone()).filter(|s| !s.is_empty()),
        url: Some(account.url.clone()),
        inbox: Some(account.inbox_uri.clone()),
        outbox: Some(account.outbox_uri.clone()),
        followers: Some(account.followers_uri.clone()),
        following: Some(account.following_uri.clone()),
        endpoints: account.shared_inbox_uri.as_ref().map(|s| Endpoints {
            shared_inbox: Some(s.clone()),
        }),
        public_key: Some(OneOrMany::One(PublicKeyDocument {
            id: account.public_key_uri.clone(),
            owner: account.uri.clone(),
            public_key_pem: account.public_key_pem.clone(),
        })),
        manually_approves_followers: Some(account.locked),
        discoverable: Some(account.discoverable),
    }
}

/// Audience fields for a status of the given visibility.
pub fn audience(visibility: Visibility, author: &Account, mentioned: &[String]) -> (Vec<String>, Vec<String>) {
    let mut to = Vec::new();
    let mut cc = Vec::new();
    match visibility {
        Visibility::Public => {
            to.push(AS_PUBLIC.to_string());
            cc.push(author.followers_uri.clone());
        }
        Visibility::Unlisted => {
            to.push(author.followers_uri.clone());
            cc.push(AS_PUBLIC.to_string());
        }
        Visibility::FollowersOnly | Visibility::MutualsOnly => to.push(author.followers_uri.clone()),
        Visibility::Direct => {}
    }
    cc.extend(mentioned.iter().cloned());
    (to, cc)
}

/// Infers visibility from addressing, the way remote servers encode it.
pub fn visibility_from_audience(to: &[String], cc: &[String]) -> Visibility {
    if to.iter().any(|t| t == AS_PUBLIC) {
        Visibility::Public
    } else if cc.iter().any(|t| t == AS_PUBLIC) {
        Visibility::Unlisted
    } else if to.iter().chain(cc.iter()).any(|t| t.ends_with("/followers")) {
        Visibility::FollowersOnly
    } else {
        Visibility::Direct
    }
}

/// Note representation of a status. `mentioned` holds the URIs of mentioned accounts.
pub fn status_to_note(status: &Status, author: &Account, mentioned: &[String]) -> Value {
    let (to, cc) = audience(status.visibility, author, mentioned);
    json!({
        "@context": AS_CONTEXT,
        "id": status.uri,
        "type": "Note",
        "url": status.url,
        "attributedTo": author.uri,
        "content": status.content,
        "inReplyTo": status.in_reply_to_uri,
        "published": ms_to_rfc3339(status.created_at_ms),
        "to": to,
        "cc": cc,
    })
}

pub fn instance_from_document(domain: &str, doc: Option<InstanceDocument>) -> Instance {
    let now = now_ms();
    let domain = domain.trim().to_ascii_lowercase();
    let doc = doc.unwrap_or_default();
    let uri = if doc.uri.is_empty() {
        format!("https://{domain}")
    } else if doc.uri.contains("://") {
        doc.uri
    } else {
        format!("https://{}", doc.uri)
    };
    Instance {
        id: new_id(),
        domain,
        uri,
        title: doc.title,
        description: doc.description,
        contact_email: doc.email,
        version: doc.version,
        domain_block_id: None,
        suspended_at_ms: None,
        created_at_ms: now,
        updated_at_ms: now,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testrig;

    #[test]
    fn actor_document_converts_to_remote_account() {
        let bob = testrig::remote_account_unsaved("bob", "remote.example");
        let doc = account_to_actor(&bob);
        let back = account_from_actor(&doc, Some(&bob.public_key_uri)).unwrap();
        assert_eq!(back.uri, bob.uri);
        assert_eq!(back.username, "bob");
        assert_eq!(back.domain.as_deref(), Some("remote.example"));
        assert_eq!(back.delivery_inbox(), "https://remote.example/inbox");
        assert_eq!(back.public_key_uri, bob.public_key_uri);
        assert!(back.private_key_pem.is_none());
    }

    #[test]
    fn actor_without_inbox_is_malformed() {
        let bob = testrig::remote_account_unsaved("bob", "remote.example");
        let mut doc = account_to_actor(&bob);
        doc.inbox = None;
        assert!(matches!(account_from_actor(&doc, None), Err(FedError::Malformed(_))));
    }

    #[test]
    fn refresh_keeps_identity() {
        let bob = testrig::remote_account_unsaved("bob", "remote.example");
        let mut fresh = bob.clone();
        fresh.id = "other".to_string();
        fresh.display_name = "Bobby".to_string();
        let merged = refresh_account(&bob, fresh);
        assert_eq!(merged.id, bob.id);
        assert_eq!(merged.display_name, "Bobby");
    }

    #[test]
    fn visibility_inferred_from_addressing() {
        let public = vec![AS_PUBLIC.to_string()];
        let followers = vec!["https://remote.example/users/bob/followers".to_string()];
        assert_eq!(visibility_from_audience(&public, &[]), Visibility::Public);
        assert_eq!(visibility_from_audience(&followers, &public), Visibility::Unlisted);
        assert_eq!(visibility_from_audience(&followers, &[]), Visibility::FollowersOnly);
        assert_eq!(visibility_from_audience(&[], &[]), Visibility::Direct);
    }

    #[test]
    fn instance_defaults_to_https_domain() {
        let i = instance_from_document("Remote.Example", None);
        assert_eq!(i.domain, "remote.example");
        assert_eq!(i.uri, "https://remote.example");
    }
}
