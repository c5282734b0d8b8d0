//! Push-webhook signature verification and payload parsing.
//!
//! Signatures use the `X-Hub-Signature-256` format:
//! `sha256=<hex(HMAC-SHA256(secret, raw body))>`.

use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::Sha256;

use crate::config::SecretString;
use crate::service::TriggerRequest;

type HmacSha256 = Hmac<Sha256>;

pub const SIGNATURE_PREFIX: &str = "sha256=";

/// Secret shipped in sample configuration. Treated as "no secret".
pub const PLACEHOLDER_SECRET: &str = "change-me";

/// Hex length of an HMAC-SHA256 digest.
const DIGEST_HEX_LEN: usize = 64;

const BRANCH_REF_PREFIX: &str = "refs/heads/";
const WEBHOOK_AUTHOR: &str = "webhook";

/// Checks webhook signatures against the configured secret.
#[derive(Debug, Clone)]
pub struct WebhookVerifier {
    secret: Option<SecretString>,
}

impl WebhookVerifier {
    /// An empty or placeholder secret disables verification.
    pub fn new(secret: Option<SecretString>) -> Self {
        let secret = secret.filter(|s| {
            let value = s.expose().trim();
            !value.is_empty() && value != PLACEHOLDER_SECRET
        });
        Self { secret }
    }

    /// Whether signatures are checked at all.
    pub fn is_enforced(&self) -> bool {
        self.secret.is_some()
    }

    /// True when no secret is configured, or when `header` carries the exact
    /// signature of `body`. Comparison is constant-time.
    pub fn verify(&self, body: &[u8], header: Option<&str>) -> bool {
        let Some(secret) = &self.secret else {
            return true;
        };
        let Some(hex_sig) = header.and_then(|h| h.strip_prefix(SIGNATURE_PREFIX)) else {
            return false;
        };
        if !is_lower_hex_digest(hex_sig) {
            return false;
        }
        let Ok(expected) = hex::decode(hex_sig) else {
            return false;
        };
        let Ok(mut mac) = HmacSha256::new_from_slice(secret.expose().as_bytes()) else {
            return false;
        };
        mac.update(body);
        mac.verify_slice(&expected).is_ok()
    }
}

fn is_lower_hex_digest(value: &str) -> bool {
    value.len() == DIGEST_HEX_LEN
        && value
            .bytes()
            .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
}

/// Compute the `sha256=...` header value for `body`.
pub fn sign(secret: &str, body: &[u8]) -> Option<String> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).ok()?;
    mac.update(body);
    Some(format!(
        "{SIGNATURE_PREFIX}{}",
        hex::encode(mac.finalize().into_bytes())
    ))
}

// ---------------------------------------------------------------------------
// Push payload
// ---------------------------------------------------------------------------

/// The parts of a push event the gate uses.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PushEvent {
    #[serde(rename = "ref", default)]
    pub git_ref: Option<String>,
    #[serde(default)]
    pub after: Option<String>,
    #[serde(default)]
    pub repository: Option<PushRepository>,
    #[serde(default)]
    pub head_commit: Option<PushCommit>,
    #[serde(default)]
    pub pusher: Option<PushUser>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PushRepository {
    #[serde(default)]
    pub clone_url: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PushCommit {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub author: Option<PushUser>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PushUser {
    #[serde(default)]
    pub name: Option<String>,
}

impl PushEvent {
    pub fn parse(body: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(body)
    }

    /// Branch named by `ref`; "main" when the ref is absent or not a branch.
    pub fn branch(&self) -> String {
        self.git_ref
            .as_deref()
            .and_then(|r| r.strip_prefix(BRANCH_REF_PREFIX))
            .filter(|b| !b.is_empty())
            .unwrap_or("main")
            .to_string()
    }

    pub fn clone_url(&self) -> Option<&str> {
        self.repository
            .as_ref()
            .and_then(|r| r.clone_url.as_deref())
            .filter(|u| !u.is_empty())
    }

    pub fn commit_sha(&self) -> Option<&str> {
        self.head_commit
            .as_ref()
            .and_then(|c| c.id.as_deref())
            .or(self.after.as_deref())
    }

    /// Commit author, then pusher, then "webhook".
    pub fn author(&self) -> String {
        let commit_author = self
            .head_commit
            .as_ref()
            .and_then(|c| c.author.as_ref())
            .and_then(|a| a.name.as_deref());
        let pusher = self.pusher.as_ref().and_then(|p| p.name.as_deref());
        commit_author
            .or(pusher)
            .unwrap_or(WEBHOOK_AUTHOR)
            .to_string()
    }

    /// Build a trigger request; `None` when the payload names no repository.
    pub fn to_trigger(&self) -> Option<TriggerRequest> {
        let repo_url = self.clone_url()?;
        Some(TriggerRequest {
            repo_url: Some(repo_url.to_string()),
            branch: self.branch(),
            commit_sha: self.commit_sha().map(str::to_string),
            commit_message: self.head_commit.as_ref().and_then(|c| c.message.clone()),
            author: self.author(),
            ..TriggerRequest::default()
        })
    }
}
