//! One-time link tokens binding an anonymous request to an account.

use chrono::{DateTime, Duration, Utc};
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use super::{LifecycleError, LifecycleResult};
use crate::config::EngineConfig;
use crate::db::requests::{self, IssuedToken};
use crate::db::Database;
use crate::models::AppointmentRequest;

/// Random bytes per token (256 bits).
pub const TOKEN_BYTES: usize = 32;

/// Outcome of presenting a token for consumption.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LinkOutcome {
    Linked,
    AlreadyLinked,
    AlreadyLinkedOther,
    Expired,
    NotFound,
}

impl LinkOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            LinkOutcome::Linked => "LINKED",
            LinkOutcome::AlreadyLinked => "ALREADY_LINKED",
            LinkOutcome::AlreadyLinkedOther => "ALREADY_LINKED_OTHER",
            LinkOutcome::Expired => "EXPIRED",
            LinkOutcome::NotFound => "NOT_FOUND",
        }
    }
}

/// Outcome plus the request as it stands after the call.
#[derive(Debug, Clone, PartialEq)]
pub struct LinkResult {
    pub outcome: LinkOutcome,
    /// Absent only for `NotFound`
    pub request: Option<AppointmentRequest>,
}

impl LinkResult {
    fn new(outcome: LinkOutcome, request: Option<AppointmentRequest>) -> Self {
        Self { outcome, request }
    }
}

/// Read-only token lookup for a preview screen.
#[derive(Debug, Clone, PartialEq)]
pub struct LinkPreview {
    pub request: AppointmentRequest,
    pub expired: bool,
}

/// Issues and consumes link tokens.
pub struct LinkTokenManager<'a> {
    db: &'a Database,
    ttl: Duration,
}

impl<'a> LinkTokenManager<'a> {
    pub fn new(db: &'a Database) -> Self {
        Self::with_config(db, &EngineConfig::default())
    }

    pub fn with_config(db: &'a Database, config: &EngineConfig) -> Self {
        Self {
            db,
            ttl: config.link_token_ttl(),
        }
    }

    /// Fresh token with an absolute expiry `ttl` after `now`.
    pub fn issue(&self, now: DateTime<Utc>) -> IssuedToken {
        IssuedToken {
            token: generate_token(),
            expires_at: now + self.ttl,
        }
    }

    /// Look up a live token without mutating anything.
    pub fn resolve(&self, token: &str) -> LifecycleResult<LinkPreview> {
        self.resolve_at(token, Utc::now())
    }

    pub fn resolve_at(&self, token: &str, now: DateTime<Utc>) -> LifecycleResult<LinkPreview> {
        let request = requests::get_by_link_token(self.db.conn(), token)?
            .ok_or_else(|| LifecycleError::NotFound("link token".into()))?;
        let expired = request.is_token_expired(now);
        debug!(request_id = request.id, expired, "link token resolved");
        Ok(LinkPreview { request, expired })
    }

    /// Bind the token's request to `user_id`, at most once.
    pub fn consume(&self, token: &str, user_id: &str) -> LifecycleResult<LinkResult> {
        self.consume_at(token, user_id, Utc::now())
    }

    /// [`consume`](Self::consume) against an explicit wall-clock instant.
    pub fn consume_at(&self, token: &str, user_id: &str, now: DateTime<Utc>) -> LifecycleResult<LinkResult> {
        let hash = hash_token(token);

        self.db.with_immediate_transaction(|tx| {
            let Some(request) = requests::get_by_link_token(tx, token)? else {
                // A consumed token only survives as its hash
                return Ok(match requests::get_by_consumed_token_hash(tx, &hash)? {
                    Some(request) => replay_outcome(request, user_id),
                    None => LinkResult::new(LinkOutcome::NotFound, None),
                });
            };

            if request.is_token_expired(now) {
                info!(request_id = request.id, "link token expired");
                return Ok(LinkResult::new(LinkOutcome::Expired, Some(request)));
            }

            if request.user_id.is_some() {
                return Ok(replay_outcome(request, user_id));
            }

            let request = requests::mark_linked(tx, request.id, user_id, &hash, now)?;
            info!(request_id = request.id, user_id = %user_id, "link token consumed");
            Ok(LinkResult::new(LinkOutcome::Linked, Some(request)))
        })
    }
}

fn replay_outcome(request: AppointmentRequest, user_id: &str) -> LinkResult {
    match request.user_id.as_deref() {
        Some(owner) if owner == user_id => LinkResult::new(LinkOutcome::AlreadyLinked, Some(request)),
        Some(_) => {
            warn!(request_id = request.id, "link token presented by a different account");
            LinkResult::new(LinkOutcome::AlreadyLinkedOther, Some(request))
        }
        None => LinkResult::new(LinkOutcome::NotFound, None),
    }
}

/// Hex-encoded random token.
pub fn generate_token() -> String {
    let mut bytes = [0u8; TOKEN_BYTES];
    OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// SHA-256 of a token, hex-encoded. Only the hash outlives consumption.
pub fn hash_token(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    hex::encode(hasher.finalize())
}
