use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use crate::error::AuthError;

pub const CHALLENGE_ID_PREFIX: &str = "ch_";
const NONCE_LENGTH: usize = 32;
const ID_SUFFIX_LENGTH: usize = 8;

/// One DID authentication attempt.
///
/// `agent_did` is only ever set by a successful verification.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Session {
    pub challenge_id: String,
    pub challenge: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agent_did: Option<String>,
    pub verified: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub verified_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub verification_method: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub extra: HashMap<String, Value>,
}

impl Session {
    fn new(challenge_id: String, challenge: String) -> Self {
        Self {
            challenge_id,
            challenge,
            agent_did: None,
            verified: false,
            verified_at: None,
            verification_method: None,
            created_at: Utc::now(),
            extra: HashMap::new(),
        }
    }

    pub fn is_authenticated(&self) -> bool {
        self.verified && self.agent_did.is_some()
    }

    fn apply(&mut self, update: SessionUpdate) {
        if let Some(did) = update.agent_did {
            self.agent_did = Some(did);
        }
        if let Some(verified) = update.verified {
            self.verified = verified;
        }
        if let Some(at) = update.verified_at {
            self.verified_at = Some(at);
        }
        if let Some(method) = update.verification_method {
            self.verification_method = Some(method);
        }
        self.extra.extend(update.extra);
    }
}

/// Partial update of a [`Session`]. `None` fields are left untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionUpdate {
    #[serde(default)]
    pub agent_did: Option<String>,
    #[serde(default)]
    pub verified: Option<bool>,
    #[serde(default)]
    pub verified_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub verification_method: Option<String>,
    #[serde(default)]
    pub extra: HashMap<String, Value>,
}

impl SessionUpdate {
    pub fn is_empty(&self) -> bool {
        *self == SessionUpdate::default()
    }
}

/// The payload handed to a client that must authenticate.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Challenge {
    pub challenge_id: String,
    pub nonce: String,
    pub issued_at: DateTime<Utc>,
}

impl From<&Session> for Challenge {
    fn from(session: &Session) -> Self {
        Self {
            challenge_id: session.challenge_id.clone(),
            nonce: session.challenge.clone(),
            issued_at: session.created_at,
        }
    }
}

#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Stores a new session holding `secret` and returns its fresh identifier.
    async fn create(&self, secret: String) -> String;
    async fn fetch(&self, session_id: &str) -> Option<Session>;
    /// Applies `update` to an existing session. Unknown ids are ignored.
    async fn update(&self, session_id: &str, update: SessionUpdate);
    /// Marks a pending session verified by applying `update`.
    ///
    /// The pending check and the write happen together, so only one caller can
    /// complete a given challenge.
    async fn complete(&self, session_id: &str, update: SessionUpdate) -> Result<Session, AuthError>;
}

/// Process-lifetime session store.
///
/// Sessions are kept forever unless a TTL is configured with [`InMemorySessionStore::with_ttl`].
#[derive(Default)]
pub struct InMemorySessionStore {
    sessions: Arc<DashMap<String, Session>>,
    counter: AtomicU64,
    ttl: Option<Duration>,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            ttl: Some(ttl),
            ..Self::default()
        }
    }

    pub fn ttl(&self) -> Option<Duration> {
        self.ttl
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Generates a random alphanumeric challenge nonce.
    pub fn generate_nonce() -> String {
        random_alphanumeric(NONCE_LENGTH)
    }

    // Counter guarantees uniqueness; the random suffix keeps ids unguessable.
    fn next_id(&self) -> String {
        let n = self.counter.fetch_add(1, Ordering::Relaxed);
        format!("{}{}_{}", CHALLENGE_ID_PREFIX, n, random_alphanumeric(ID_SUFFIX_LENGTH))
    }

    fn is_expired(&self, session: &Session, now: DateTime<Utc>) -> bool {
        match self.ttl.and_then(|ttl| ChronoDuration::from_std(ttl).ok()) {
            Some(ttl) => session.created_at + ttl <= now,
            None => false,
        }
    }

    /// Drops expired sessions. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        if self.ttl.is_none() {
            return 0;
        }
        let now = Utc::now();
        let before = self.sessions.len();
        self.sessions.retain(|_, session| !self.is_expired(session, now));
        let removed = before.saturating_sub(self.sessions.len());
        if removed > 0 {
            info!(removed, "Purged expired sessions");
        }
        removed
    }
}

fn random_alphanumeric(len: usize) -> String {
    use rand::distributions::Alphanumeric;
    use rand::{thread_rng, Rng};

    thread_rng()
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .collect()
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn create(&self, secret: String) -> String {
        let id = self.next_id();
        self.sessions.insert(id.clone(), Session::new(id.clone(), secret));
        debug!(challenge_id = %id, "Created session");
        id
    }

    async fn fetch(&self, session_id: &str) -> Option<Session> {
        let session = self.sessions.get(session_id).map(|s| s.clone())?;
        if self.is_expired(&session, Utc::now()) {
            debug!(challenge_id = %session_id, "Session expired");
            return None;
        }
        Some(session)
    }

    async fn update(&self, session_id: &str, update: SessionUpdate) {
        if update.is_empty() {
            return;
        }
        match self.sessions.get_mut(session_id) {
            Some(mut session) => session.apply(update),
            None => debug!(challenge_id = %session_id, "Ignoring update for unknown session"),
        }
    }

    async fn complete(&self, session_id: &str, update: SessionUpdate) -> Result<Session, AuthError> {
        let now = Utc::now();
        let mut session = self
            .sessions
            .get_mut(session_id)
            .filter(|s| !self.is_expired(s, now))
            .ok_or_else(|| AuthError::UnknownChallenge(session_id.to_string()))?;

        if session.verified || session.agent_did.is_some() {
            return Err(AuthError::ChallengeAlreadyUsed(session_id.to_string()));
        }
        session.apply(update);
        Ok(session.clone())
    }
}

/// Periodically purges expired sessions. Only useful when a TTL is set.
pub async fn run_session_reaper(store: Arc<InMemorySessionStore>, interval: Duration) {
    let mut ticker = tokio::time::interval(interval);
    loop {
        ticker.tick().await;
        store.purge_expired();
    }
}
