/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - FEDI3 Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

//! HTTP Signatures (draft-cavage) over RSA-SHA256, as spoken by ActivityPub servers.

use anyhow::{anyhow, bail, Context, Result};
use base64::{engine::general_purpose::STANDARD as B64, Engine as _};
use http::{HeaderMap, HeaderValue, Method, Uri};
use httpdate::parse_http_date;
use rsa::{
    pkcs1v15::{SigningKey, VerifyingKey},
    pkcs8::{DecodePrivateKey, DecodePublicKey},
    signature::{RandomizedSigner, SignatureEncoding, Verifier},
    RsaPrivateKey, RsaPublicKey,
};
use sha2::{Digest, Sha256};
use std::{collections::HashMap, time::Duration};

pub const GET_SIGNED_HEADERS: &[&str] = &["(request-target)", "host", "date"];
pub const POST_SIGNED_HEADERS: &[&str] = &["(request-target)", "host", "date", "digest"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignatureAlgorithm {
    RsaSha256,
    /// Algorithm is taken from the key; for RSA keys this is RSA-SHA256.
    Hs2019,
}

impl SignatureAlgorithm {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "rsa-sha256" => Some(SignatureAlgorithm::RsaSha256),
            "hs2019" => Some(SignatureAlgorithm::Hs2019),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SignatureParams {
    pub key_id: String,
    /// Declared algorithm; absent means rsa-sha256.
    pub algorithm: Option<String>,
    pub headers: Vec<String>,
    pub signature: Vec<u8>,
}

impl SignatureParams {
    pub fn algorithm(&self) -> Option<SignatureAlgorithm> {
        match &self.algorithm {
            None => Some(SignatureAlgorithm::RsaSha256),
            Some(a) => SignatureAlgorithm::parse(a),
        }
    }
}

/// Returns the raw signature parameters from `Signature` or `Authorization: Signature ...`.
pub fn signature_header_value(headers: &HeaderMap) -> Option<&str> {
    if let Some(v) = headers.get("signature").and_then(|v| v.to_str().ok()) {
        return Some(v);
    }
    headers
        .get(http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Signature "))
}

pub fn parse_signature_header(value: &str) -> Result<SignatureParams> {
    // keyId="...",algorithm="rsa-sha256",headers="(request-target) host date",signature="base64..."
    let mut map = HashMap::<String, String>::new();
    for part in value.split(',') {
        let part = part.trim();
        let Some((k, v)) = part.split_once('=') else { continue };
        let v = v.trim().trim_matches('"');
        map.insert(k.trim().to_string(), v.to_string());
    }

    let key_id = map
        .get("keyId")
        .cloned()
        .filter(|k| !k.is_empty())
        .ok_or_else(|| anyhow!("Signature missing keyId"))?;
    let headers = map
        .get("headers")
        .cloned()
        .unwrap_or_else(|| "date".to_string());
    let signature_b64 = map
        .get("signature")
        .cloned()
        .ok_or_else(|| anyhow!("Signature missing signature"))?;

    let signature = B64
        .decode(signature_b64.as_bytes())
        .context("decode signature")?;

    Ok(SignatureParams {
        key_id,
        algorithm: map.get("algorithm").cloned(),
        headers: headers
            .split_whitespace()
            .map(|s| s.to_ascii_lowercase())
            .collect(),
        signature,
    })
}

pub fn build_signing_string(method: &Method, uri: &Uri, headers: &HeaderMap, signed_headers: &[String]) -> Result<String> {
    let mut out = String::new();
    for (i, name) in signed_headers.iter().enumerate() {
        if i > 0 {
            out.push('\n');
        }
        if name == "(request-target)" {
            let query = uri.query().map(|q| format!("?{q}")).unwrap_or_default();
            out.push_str("(request-target): ");
            out.push_str(&method.as_str().to_ascii_lowercase());
            out.push(' ');
            out.push_str(uri.path());
            out.push_str(&query);
            continue;
        }

        let header_name = http::header::HeaderName::from_bytes(name.as_bytes())
            .with_context(|| format!("bad signed header name: {name}"))?;
        let values = headers
            .get_all(&header_name)
            .iter()
            .map(|v| v.to_str().map(str::trim))
            .collect::<std::result::Result<Vec<_>, _>>()
            .with_context(|| format!("invalid header value for {name}"))?;
        if values.is_empty() {
            bail!("missing signed header: {name}");
        }
        out.push_str(name);
        out.push_str(": ");
        out.push_str(&values.join(", "));
    }
    Ok(out)
}

pub fn digest_header(body: &[u8]) -> String {
    format!("SHA-256={}", B64.encode(Sha256::digest(body)))
}

pub fn verify_digest_if_present(headers: &HeaderMap, body: &[u8]) -> Result<()> {
    let Some(digest) = headers.get("Digest") else {
        return Ok(());
    };
    let digest = digest.to_str().context("Digest header not utf8")?;
    // Several algorithms may be listed; SHA-256 is the one we check.
    for entry in digest.split(',') {
        let Some((alg, value)) = entry.trim().split_once('=') else {
            bail!("invalid Digest header");
        };
        if alg.trim().eq_ignore_ascii_case("SHA-256") {
            let expected = B64.decode(value.trim().as_bytes()).context("decode digest")?;
            if expected.as_slice() != Sha256::digest(body).as_slice() {
                bail!("digest mismatch");
            }
            return Ok(());
        }
    }
    Err(anyhow!("unsupported digest alg: {digest}"))
}

pub fn verify_date(headers: &HeaderMap, max_skew: Duration) -> Result<()> {
    let date = headers
        .get("Date")
        .ok_or_else(|| anyhow!("missing Date header"))?
        .to_str()
        .context("Date header not utf8")?;
    let ts = parse_http_date(date).context("parse Date header")?;
    let now = std::time::SystemTime::now();
    let diff = if now > ts {
        now.duration_since(ts).unwrap_or_default()
    } else {
        ts.duration_since(now).unwrap_or_default()
    };
    if diff > max_skew {
        bail!("Date skew too large: {}s", diff.as_secs());
    }
    Ok(())
}

/// Parses an SPKI (`PUBLIC KEY`) or PKCS#1 (`RSA PUBLIC KEY`) PEM block.
pub fn parse_public_key_pem(pem: &str) -> Result<RsaPublicKey> {
    use rsa::pkcs1::DecodeRsaPublicKey;
    RsaPublicKey::from_public_key_pem(pem.trim())
        .or_else(|_| RsaPublicKey::from_pkcs1_pem(pem.trim()))
        .context("parse public key pem")
}

pub fn verify_signature_rsa_sha256(public_key: &RsaPublicKey, signing_string: &str, signature: &[u8]) -> Result<()> {
    let verifying_key = VerifyingKey::<Sha256>::new(public_key.clone());
    let sig = rsa::pkcs1v15::Signature::try_from(signature)
        .context("invalid rsa signature bytes")?;
    verifying_key
        .verify(signing_string.as_bytes(), &sig)
        .context("signature verify failed")?;
    Ok(())
}

pub fn sign_request_rsa_sha256(
    private_key_pem: &str,
    key_id: &str,
    method: &Method,
    uri: &Uri,
    headers: &mut HeaderMap,
    body: &[u8],
    signed_headers: &[&str],
) -> Result<()> {
    if !headers.contains_key("Date") {
        let date = httpdate::fmt_http_date(std::time::SystemTime::now());
        headers.insert("Date", date.parse().context("set Date")?);
    }

    let signed_headers_lower: Vec<String> = signed_headers.iter().map(|s| s.to_ascii_lowercase()).collect();
    let want_digest = signed_headers_lower.iter().any(|h| h == "digest") || !body.is_empty();
    if want_digest && !headers.contains_key("Digest") {
        headers.insert("Digest", digest_header(body).parse().context("set Digest")?);
    }

    if !headers.contains_key("Host") {
        if let Some(auth) = uri.authority() {
            headers.insert("Host", auth.as_str().parse().context("set Host")?);
        }
    }

    let signing_string = build_signing_string(method, uri, headers, &signed_headers_lower)?;

    let private_key = RsaPrivateKey::from_pkcs8_pem(private_key_pem)
        .context("parse private key pem")?;
    let signing_key = SigningKey::<Sha256>::new(private_key);
    let mut rng = rand::rngs::OsRng;
    let signature = signing_key.sign_with_rng(&mut rng, signing_string.as_bytes());
    let sig_b64 = B64.encode(signature.to_bytes());

    let headers_list = signed_headers_lower.join(" ");
    let sig_header = format!(
        "keyId=\"{key_id}\",algorithm=\"rsa-sha256\",headers=\"{headers_list}\",signature=\"{sig_b64}\""
    );
    headers.insert("Signature", HeaderValue::from_str(&sig_header).context("set Signature")?);
    Ok(())
}
