/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - FEDI3 Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

//! Signed outbound HTTP. One transport per local identity so every request
//! carries that identity's own signature.

use crate::http_retry::{send_with_retry, RetryPolicy};
use crate::http_sig::{sign_request_rsa_sha256, GET_SIGNED_HEADERS, POST_SIGNED_HEADERS};
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use http::{HeaderMap, Method, Uri};
use kestrel_protocol::{ACCEPT_ACTIVITY, ACTIVITY_JSON};
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

#[async_trait]
pub trait Transport: Send + Sync {
    /// Fetches a remote document with a signed GET.
    async fn dereference(&self, uri: &str) -> Result<Vec<u8>>;

    /// POSTs an activity document to a remote inbox. Single attempt.
    async fn deliver(&self, inbox: &str, body: &[u8]) -> Result<()>;
}

pub trait TransportController: Send + Sync {
    fn new_transport(&self, key_uri: &str, private_key_pem: &str) -> Result<Arc<dyn Transport>>;
}

#[derive(Clone)]
pub struct HttpTransportController {
    client: reqwest::Client,
    timeout: Duration,
    max_body_bytes: usize,
}

impl HttpTransportController {
    /// Fetched documents larger than `max_body_bytes` are refused.
    pub fn new(client: reqwest::Client, timeout: Duration, max_body_bytes: usize) -> Self {
        Self {
            client,
            timeout,
            max_body_bytes,
        }
    }
}

impl TransportController for HttpTransportController {
    fn new_transport(&self, key_uri: &str, private_key_pem: &str) -> Result<Arc<dyn Transport>> {
        if key_uri.trim().is_empty() || private_key_pem.trim().is_empty() {
            return Err(anyhow!("transport needs a key uri and a private key"));
        }
        Ok(Arc::new(HttpTransport {
            client: self.client.clone(),
            key_uri: key_uri.to_string(),
            private_key_pem: private_key_pem.to_string(),
            timeout: self.timeout,
            max_body_bytes: self.max_body_bytes,
        }))
    }
}

pub struct HttpTransport {
    client: reqwest::Client,
    key_uri: String,
    private_key_pem: String,
    timeout: Duration,
    max_body_bytes: usize,
}

impl HttpTransport {
    fn signed_headers(&self, method: &Method, url: &str, body: &[u8], signed: &[&str]) -> Result<HeaderMap> {
        let uri: Uri = url.parse().with_context(|| format!("parse url: {url}"))?;
        let mut headers = HeaderMap::new();
        sign_request_rsa_sha256(&self.private_key_pem, &self.key_uri, method, &uri, &mut headers, body, signed)?;
        Ok(headers)
    }

    async fn fetch(&self, uri: &str) -> Result<Vec<u8>> {
        // Signed fresh on every attempt so the Date header stays current.
        let resp = send_with_retry(
            || {
                let mut req = self.client.get(uri).header(ACCEPT, ACCEPT_ACTIVITY);
                match self.signed_headers(&Method::GET, uri, &[], GET_SIGNED_HEADERS) {
                    Ok(headers) => {
                        for (k, v) in headers.iter() {
                            req = req.header(k.as_str(), v.clone());
                        }
                    }
                    Err(e) => debug!("unsigned fetch of {uri}: {e:#}"),
                }
                req
            },
            RetryPolicy::FETCH,
        )
        .await
        .with_context(|| format!("fetch: {uri}"))?;
        let status = resp.status();
        if !status.is_success() {
            return Err(anyhow!("fetch {uri}: status {status}"));
        }
        read_limited(resp, self.max_body_bytes)
            .await
            .with_context(|| format!("read body: {uri}"))
    }

    async fn post(&self, inbox: &str, body: &[u8]) -> Result<()> {
        let mut headers = self.signed_headers(&Method::POST, inbox, body, POST_SIGNED_HEADERS)?;
        headers.insert(CONTENT_TYPE, ACTIVITY_JSON.parse().context("set Content-Type")?);
        let mut req = self.client.post(inbox).header(ACCEPT, ACTIVITY_JSON);
        for (k, v) in headers.iter() {
            req = req.header(k.as_str(), v.clone());
        }
        let resp = req
            .body(body.to_vec())
            .send()
            .await
            .with_context(|| format!("deliver: {inbox}"))?;
        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(anyhow!("delivery to {inbox} failed: {status} {text}"));
        }
        Ok(())
    }
}

async fn read_limited(mut resp: reqwest::Response, limit: usize) -> Result<Vec<u8>> {
    if resp.content_length().is_some_and(|n| n > limit as u64) {
        return Err(anyhow!("body exceeds {limit} bytes"));
    }
    let mut body = Vec::new();
    while let Some(chunk) = resp.chunk().await? {
        if body.len() + chunk.len() > limit {
            return Err(anyhow!("body exceeds {limit} bytes"));
        }
        body.extend_from_slice(&chunk);
    }
    Ok(body)
}

#[async_trait]
impl Transport for HttpTransport {
    async fn dereference(&self, uri: &str) -> Result<Vec<u8>> {
        tokio::time::timeout(self.timeout, self.fetch(uri))
            .await
            .map_err(|_| anyhow!("fetch {uri}: timed out after {}s", self.timeout.as_secs()))?
    }

    async fn deliver(&self, inbox: &str, body: &[u8]) -> Result<()> {
        tokio::time::timeout(self.timeout, self.post(inbox, body))
            .await
            .map_err(|_| anyhow!("deliver {inbox}: timed out after {}s", self.timeout.as_secs()))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn controller_refuses_missing_credentials() {
        let ctl = HttpTransportController::new(reqwest::Client::new(), Duration::from_secs(1), 1024);
        assert!(ctl.new_transport("", "pem").is_err());
        assert!(ctl.new_transport("https://social.example/users/alice#main-key", " ").is_err());
    }

    #[test]
    fn signed_get_headers_cover_host_and_date() {
        let keys = crate::testrig::local_keys();
        let t = HttpTransport {
            client: reqwest::Client::new(),
            key_uri: "https://social.example/users/alice#main-key".to_string(),
            private_key_pem: keys.private_key_pem.clone(),
            timeout: Duration::from_secs(1),
            max_body_bytes: 1024,
        };
        let headers = t
            .signed_headers(&Method::GET, "https://remote.example/users/bob", &[], GET_SIGNED_HEADERS)
            .unwrap();
        assert_eq!(headers.get("host").unwrap(), "remote.example");
        assert!(headers.contains_key("date"));
        assert!(!headers.contains_key("digest"));
        let sig = headers.get("signature").unwrap().to_str().unwrap();
        assert!(sig.contains(r#"headers="(request-target) host date""#));
    }

    #[tokio::test]
    async fn oversized_documents_are_refused() {
        let app = axum::Router::new().route("/actor", axum::routing::get(|| async { "x".repeat(64) }));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.ok();
        });

        let keys = crate::testrig::local_keys();
        let uri = format!("http://{addr}/actor");
        let fetch_with = |limit: usize| {
            HttpTransportController::new(reqwest::Client::new(), Duration::from_secs(5), limit)
                .new_transport("https://social.example/users/alice#main-key", &keys.private_key_pem)
                .unwrap()
        };
        assert_eq!(fetch_with(1024).dereference(&uri).await.unwrap().len(), 64);
        assert!(fetch_with(16).dereference(&uri).await.is_err());
    }
}
