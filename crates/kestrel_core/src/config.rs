/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - FEDI3 Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

use crate::keys::default_data_dir;
use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_RECURSION_DEPTH: i32 = 4;

#[derive(Debug, Clone, serde::Deserialize, serde::Serialize)]
pub struct CoreConfig {
    /// Public host name of this server, e.g. `social.example.org`.
    pub host: String,
    /// `https` in production; `http` for local development.
    #[serde(default = "default_protocol")]
    pub protocol: String,
    pub bind: String,
    #[serde(default)]
    pub data_dir: Option<String>,
    #[serde(default)]
    pub log_level: Option<String>,
    #[serde(default)]
    pub max_date_skew_secs: Option<u64>,
    /// Deadline applied to every outbound fetch and delivery (seconds).
    #[serde(default)]
    pub http_timeout_secs: Option<u64>,
    #[serde(default)]
    pub max_body_bytes: Option<usize>,
    /// Maximum depth of the inbox forwarding walk. Non-positive means unbounded.
    #[serde(default)]
    pub max_inbox_forwarding_depth: Option<i32>,
    /// Maximum depth of collection expansion during delivery. Non-positive means unbounded.
    #[serde(default)]
    pub max_delivery_depth: Option<i32>,
    #[serde(default)]
    pub bus_capacity: Option<usize>,
    #[serde(default)]
    pub delivery_max_attempts: Option<u32>,
    #[serde(default)]
    pub key_cache_ttl_secs: Option<u64>,
    #[serde(default)]
    pub rsa_key_bits: Option<usize>,
    /// Static domain patterns (`bad.example`, `*.bad.example`, `.bad.example`)
    /// treated as blocked in addition to stored domain blocks.
    #[serde(default)]
    pub blocked_domains: Option<Vec<String>>,
}

fn default_protocol() -> String {
    "https".to_string()
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            host: "localhost:8080".to_string(),
            protocol: "http".to_string(),
            bind: "127.0.0.1:8080".to_string(),
            data_dir: None,
            log_level: None,
            max_date_skew_secs: Some(3600),
            http_timeout_secs: Some(10),
            max_body_bytes: Some(2 * 1024 * 1024),
            max_inbox_forwarding_depth: Some(DEFAULT_RECURSION_DEPTH),
            max_delivery_depth: Some(DEFAULT_RECURSION_DEPTH),
            bus_capacity: Some(1024),
            delivery_max_attempts: Some(5),
            key_cache_ttl_secs: Some(300),
            rsa_key_bits: Some(2048),
            blocked_domains: None,
        }
    }
}

impl CoreConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("read config: {}", path.display()))?;
        Self::from_json(&text)
    }

    pub fn from_json(text: &str) -> Result<Self> {
        let cfg: CoreConfig = serde_json::from_str(text).context("decode CoreConfig")?;
        if cfg.host.trim().is_empty() {
            anyhow::bail!("config: host must not be empty");
        }
        Ok(cfg)
    }

    pub fn base_url(&self) -> String {
        format!("{}://{}", self.protocol, self.host)
    }

    /// Host part without any port, lowercased.
    pub fn hostname(&self) -> String {
        let h = self.host.trim().to_ascii_lowercase();
        match h.rsplit_once(':') {
            Some((name, port)) if port.chars().all(|c| c.is_ascii_digit()) => name.to_string(),
            _ => h,
        }
    }

    /// True when `host` (as found in a URI authority) names this server.
    pub fn is_local_host(&self, host: &str) -> bool {
        let host = host.trim().to_ascii_lowercase();
        host == self.host.to_ascii_lowercase() || host == self.hostname()
    }

    pub fn data_dir(&self) -> Result<PathBuf> {
        match &self.data_dir {
            Some(dir) => Ok(PathBuf::from(dir)),
            None => default_data_dir(),
        }
    }

    pub fn max_date_skew(&self) -> Duration {
        Duration::from_secs(self.max_date_skew_secs.unwrap_or(3600))
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs.unwrap_or(10).max(1))
    }

    pub fn max_body_bytes(&self) -> usize {
        self.max_body_bytes.unwrap_or(2 * 1024 * 1024)
    }

    pub fn inbox_forwarding_depth(&self) -> DepthLimit {
        DepthLimit::from_config(self.max_inbox_forwarding_depth)
    }

    pub fn delivery_depth(&self) -> DepthLimit {
        DepthLimit::from_config(self.max_delivery_depth)
    }

    pub fn bus_capacity(&self) -> usize {
        self.bus_capacity.unwrap_or(1024).max(1)
    }

    pub fn delivery_max_attempts(&self) -> u32 {
        self.delivery_max_attempts.unwrap_or(5).max(1)
    }

    pub fn key_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.key_cache_ttl_secs.unwrap_or(300))
    }

    pub fn rsa_key_bits(&self) -> usize {
        self.rsa_key_bits.unwrap_or(2048)
    }

    pub fn blocked_domain_patterns(&self) -> &[String] {
        self.blocked_domains.as_deref().unwrap_or(&[])
    }
}

/// Recursion bound shared by inbox forwarding and delivery fan-out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DepthLimit {
    Unbounded,
    Max(u32),
}

impl DepthLimit {
    pub fn from_config(v: Option<i32>) -> Self {
        match v.unwrap_or(DEFAULT_RECURSION_DEPTH) {
            n if n <= 0 => DepthLimit::Unbounded,
            n => DepthLimit::Max(n as u32),
        }
    }

    /// Whether a step at `depth` (1-based) may still be taken.
    pub fn allows(&self, depth: u32) -> bool {
        match self {
            DepthLimit::Unbounded => true,
            DepthLimit::Max(max) => depth <= *max,
        }
    }
}
