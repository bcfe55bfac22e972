/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - FEDI3 Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

use http::Uri;

/// Canonical URIs of a local account.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountUris {
    pub host_url: String,
    pub user_url: String,
    pub statuses_url: String,
    pub user_uri: String,
    pub statuses_uri: String,
    pub inbox_uri: String,
    pub outbox_uri: String,
    pub followers_uri: String,
    pub following_uri: String,
    pub public_key_uri: String,
    pub shared_inbox_uri: String,
}

pub fn account_uris(protocol: &str, host: &str, username: &str) -> AccountUris {
    let host_url = format!("{protocol}://{host}");
    let user_url = format!("{host_url}/@{username}");
    let user_uri = format!("{host_url}/users/{username}");
    AccountUris {
        statuses_url: format!("{user_url}/statuses"),
        statuses_uri: format!("{user_uri}/statuses"),
        inbox_uri: format!("{user_uri}/inbox"),
        outbox_uri: format!("{user_uri}/outbox"),
        followers_uri: format!("{user_uri}/followers"),
        following_uri: format!("{user_uri}/following"),
        public_key_uri: format!("{user_uri}#main-key"),
        shared_inbox_uri: format!("{host_url}/inbox"),
        host_url,
        user_url,
        user_uri,
    }
}

pub fn follow_uri(user_uri: &str, follow_id: &str) -> String {
    format!("{user_uri}/follow/{follow_id}")
}

pub fn block_uri(user_uri: &str, block_id: &str) -> String {
    format!("{user_uri}/blocks/{block_id}")
}

pub fn status_uri(user_uri: &str, status_id: &str) -> String {
    format!("{user_uri}/statuses/{status_id}")
}

pub fn status_url(user_url: &str, status_id: &str) -> String {
    format!("{user_url}/statuses/{status_id}")
}

/// Paths served for a local user, parsed from a request or IRI path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UserPath<'a> {
    Profile(&'a str),
    Inbox(&'a str),
    Outbox(&'a str),
    Followers(&'a str),
    Following(&'a str),
    Status(&'a str, &'a str),
}

impl<'a> UserPath<'a> {
    pub fn username(&self) -> &'a str {
        match *self {
            UserPath::Profile(u)
            | UserPath::Inbox(u)
            | UserPath::Outbox(u)
            | UserPath::Followers(u)
            | UserPath::Following(u)
            | UserPath::Status(u, _) => u,
        }
    }
}

pub fn parse_user_path(path: &str) -> Option<UserPath<'_>> {
    let rest = path.strip_prefix("/users/")?;
    let rest = rest.trim_end_matches('/');
    let mut parts = rest.split('/');
    let username = parts.next().filter(|u| !u.is_empty())?;
    let out = match (parts.next(), parts.next(), parts.next()) {
        (None, _, _) => UserPath::Profile(username),
        (Some("inbox"), None, _) => UserPath::Inbox(username),
        (Some("outbox"), None, _) => UserPath::Outbox(username),
        (Some("followers"), None, _) => UserPath::Followers(username),
        (Some("following"), None, _) => UserPath::Following(username),
        (Some("statuses"), Some(id), None) if !id.is_empty() => UserPath::Status(username, id),
        _ => return None,
    };
    Some(out)
}

pub fn host_from_url(url: &str) -> Option<String> {
    let uri: Uri = url.parse().ok()?;
    uri.host().map(|h| h.to_ascii_lowercase())
}

/// Authority (host plus optional port) of an absolute URL, lowercased.
pub fn authority_from_url(url: &str) -> Option<String> {
    let uri: Uri = url.parse().ok()?;
    uri.authority().map(|a| a.as_str().to_ascii_lowercase())
}

/// Matches a host against `example.org`, `*.example.org` or `.example.org`.
pub fn domain_matches(host: &str, pattern: &str) -> bool {
    let host = host.trim().to_ascii_lowercase();
    let p = pattern.trim().trim_end_matches('.').to_ascii_lowercase();
    if p.is_empty() {
        return false;
    }
    if let Some(suffix) = p.strip_prefix("*.") {
        return host == suffix || host.ends_with(&format!(".{suffix}"));
    }
    if let Some(suffix) = p.strip_prefix('.') {
        return host == suffix || host.ends_with(&format!(".{suffix}"));
    }
    host == p
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_uris() {
        let u = account_uris("https", "social.example", "alice");
        assert_eq!(u.user_uri, "https://social.example/users/alice");
        assert_eq!(u.inbox_uri, "https://social.example/users/alice/inbox");
        assert_eq!(u.user_url, "https://social.example/@alice");
        assert_eq!(u.public_key_uri, "https://social.example/users/alice#main-key");
        assert_eq!(u.statuses_uri, "https://social.example/users/alice/statuses");
    }

    #[test]
    fn user_paths() {
        assert_eq!(parse_user_path("/users/alice"), Some(UserPath::Profile("alice")));
        assert_eq!(parse_user_path("/users/alice/inbox"), Some(UserPath::Inbox("alice")));
        assert_eq!(
            parse_user_path("/users/alice/statuses/01ab"),
            Some(UserPath::Status("alice", "01ab"))
        );
        assert_eq!(parse_user_path("/users/"), None);
        assert_eq!(parse_user_path("/users/alice/inbox/extra"), None);
        assert_eq!(parse_user_path("/@alice"), None);
    }

    #[test]
    fn domain_patterns() {
        assert!(domain_matches("bad.example", "bad.example"));
        assert!(domain_matches("a.bad.example", "*.bad.example"));
        assert!(domain_matches("bad.example", ".bad.example"));
        assert!(!domain_matches("notbad.example", "*.bad.example"));
        assert!(!domain_matches("bad.example", ""));
    }
}
