/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - FEDI3 Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

//! Wire-level ActivityStreams vocabulary shared by the federation engine.

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const AS_CONTEXT: &str = "https://www.w3.org/ns/activitystreams";
pub const SECURITY_CONTEXT: &str = "https://w3id.org/security/v1";
pub const AS_PUBLIC: &str = "https://www.w3.org/ns/activitystreams#Public";

pub const ACTIVITY_JSON: &str = "application/activity+json";
pub const ACCEPT_ACTIVITY: &str =
    "application/activity+json, application/ld+json; profile=\"https://www.w3.org/ns/activitystreams\"";

/// Activity verbs understood by the inbox and produced by the outbox.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ActivityType {
    Create,
    Update,
    Delete,
    Follow,
    Accept,
    Reject,
    Undo,
    Announce,
    Like,
    Block,
    Add,
    Remove,
    Flag,
    Move,
}

impl ActivityType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActivityType::Create => "Create",
            ActivityType::Update => "Update",
            ActivityType::Delete => "Delete",
            ActivityType::Follow => "Follow",
            ActivityType::Accept => "Accept",
            ActivityType::Reject => "Reject",
            ActivityType::Undo => "Undo",
            ActivityType::Announce => "Announce",
            ActivityType::Like => "Like",
            ActivityType::Block => "Block",
            ActivityType::Add => "Add",
            ActivityType::Remove => "Remove",
            ActivityType::Flag => "Flag",
            ActivityType::Move => "Move",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "Create" => ActivityType::Create,
            "Update" => ActivityType::Update,
            "Delete" => ActivityType::Delete,
            "Follow" => ActivityType::Follow,
            "Accept" => ActivityType::Accept,
            "Reject" => ActivityType::Reject,
            "Undo" => ActivityType::Undo,
            "Announce" => ActivityType::Announce,
            "Like" => ActivityType::Like,
            "Block" => ActivityType::Block,
            "Add" => ActivityType::Add,
            "Remove" => ActivityType::Remove,
            "Flag" => ActivityType::Flag,
            "Move" => ActivityType::Move,
            _ => return None,
        })
    }
}

/// Coarse object kinds used to tag bus envelopes and to key the inbox
/// dispatch table together with [`ActivityType`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ObjectKind {
    Note,
    Profile,
    Follow,
    Block,
    Announce,
    Like,
    Tombstone,
    /// Object given only as an IRI, or of a type we do not model.
    Other,
}

impl ObjectKind {
    pub fn from_as_type(s: &str) -> Self {
        match s {
            "Note" | "Article" | "Question" | "Page" => ObjectKind::Note,
            "Person" | "Service" | "Application" | "Group" | "Organization" => ObjectKind::Profile,
            "Follow" => ObjectKind::Follow,
            "Block" => ObjectKind::Block,
            "Announce" => ObjectKind::Announce,
            "Like" => ObjectKind::Like,
            "Tombstone" => ObjectKind::Tombstone,
            _ => ObjectKind::Other,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ObjectKind::Note => "Note",
            ObjectKind::Profile => "Profile",
            ObjectKind::Follow => "Follow",
            ObjectKind::Block => "Block",
            ObjectKind::Announce => "Announce",
            ObjectKind::Like => "Like",
            ObjectKind::Tombstone => "Tombstone",
            ObjectKind::Other => "Other",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PublicKeyDocument {
    pub id: String,
    #[serde(default)]
    pub owner: String,
    pub public_key_pem: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Endpoints {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shared_inbox: Option<String>,
}

/// Actor document as served at a profile URI.
///
/// `public_key` accepts either a single key or an array of keys; remote
/// servers publish both shapes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ActorDocument {
    #[serde(rename = "@context", default, skip_serializing_if = "Option::is_none")]
    pub context: Option<Value>,
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preferred_username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inbox: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outbox: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub followers: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub following: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoints: Option<Endpoints>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub public_key: Option<OneOrMany<PublicKeyDocument>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub manually_approves_followers: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub discoverable: Option<bool>,
}

impl ActorDocument {
    /// All public keys published by the actor.
    pub fn public_keys(&self) -> Vec<&PublicKeyDocument> {
        match &self.public_key {
            Some(OneOrMany::One(k)) => vec![k],
            Some(OneOrMany::Many(ks)) => ks.iter().collect(),
            None => Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum OneOrMany<T> {
    One(T),
    Many(Vec<T>),
}

/// Subset of the instance metadata document served at `/api/v1/instance`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct InstanceDocument {
    #[serde(default)]
    pub uri: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub version: String,
}

/// True for `application/activity+json` and `application/ld+json`, with any parameters.
pub fn is_activity_media_type(content_type: &str) -> bool {
    let essence = content_type.split(';').next().unwrap_or_default().trim();
    essence.eq_ignore_ascii_case(ACTIVITY_JSON) || essence.eq_ignore_ascii_case("application/ld+json")
}

/// Returns the `type` of an activity or object value, if it is a string.
pub fn type_of(v: &Value) -> Option<&str> {
    v.get("type").and_then(|t| t.as_str())
}

/// Returns the id of a value that is either an IRI string or an object with `id`.
pub fn id_of(v: &Value) -> Option<&str> {
    match v {
        Value::String(s) => Some(s.as_str()),
        Value::Object(map) => map.get("id").and_then(|i| i.as_str()),
        _ => None,
    }
}

/// Collects IRIs from a property that may be a string, an object or an array of either.
pub fn iris_of(v: Option<&Value>) -> Vec<String> {
    let mut out = Vec::new();
    match v {
        Some(Value::Array(items)) => {
            for item in items {
                if let Some(id) = id_of(item) {
                    out.push(id.to_string());
                }
            }
        }
        Some(other) => {
            if let Some(id) = id_of(other) {
                out.push(id.to_string());
            }
        }
        None => {}
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn actor_document_accepts_key_array() {
        let doc: ActorDocument = serde_json::from_value(json!({
            "id": "https://remote.example/users/bob",
            "type": "Person",
            "publicKey": [
                {"id": "https://remote.example/users/bob#main-key", "owner": "https://remote.example/users/bob", "publicKeyPem": "PEM1"},
                {"id": "https://remote.example/users/bob#other", "publicKeyPem": "PEM2"}
            ]
        }))
        .unwrap();
        let keys = doc.public_keys();
        assert_eq!(keys.len(), 2);
        assert_eq!(keys[1].owner, "");
    }

    #[test]
    fn federation_media_types() {
        assert!(is_activity_media_type("application/activity+json"));
        assert!(is_activity_media_type(
            "application/ld+json; profile=\"https://www.w3.org/ns/activitystreams\""
        ));
        assert!(is_activity_media_type("Application/Activity+JSON; charset=utf-8"));
        assert!(!is_activity_media_type("application/json"));
        assert!(!is_activity_media_type("text/html"));
    }

    #[test]
    fn iris_of_mixed_shapes() {
        let v = json!(["https://a.example/1", {"id": "https://a.example/2"}, 7]);
        assert_eq!(iris_of(Some(&v)), vec!["https://a.example/1", "https://a.example/2"]);
        assert!(iris_of(None).is_empty());
    }

    #[test]
    fn object_kind_maps_actor_types() {
        assert_eq!(ObjectKind::from_as_type("Service"), ObjectKind::Profile);
        assert_eq!(ObjectKind::from_as_type("Article"), ObjectKind::Note);
        assert_eq!(ObjectKind::from_as_type("Event"), ObjectKind::Other);
        assert_eq!(ActivityType::parse("Undo"), Some(ActivityType::Undo));
        assert_eq!(ActivityType::parse("Wave"), None);
    }
}
