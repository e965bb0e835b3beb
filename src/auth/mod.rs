// src/auth/mod.rs

use base64::{
    engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD},
    Engine as _,
};
use chrono::Utc;
use std::fmt;
use std::str::FromStr;
use tracing::{info, warn};

use crate::did::{matching_method, DidProof, DidResolver};
use crate::error::AuthError;
use crate::session::{Session, SessionStore, SessionUpdate};

pub const AUTH_SCHEME: &str = "DIDChallenge";

/// Parsed `authorization` value of the second handshake request:
///
/// `DIDChallenge challenge_id="ch_0_x", did="did:key:z6Mk...", signature="<base64url>"`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthorizationHeader {
    pub challenge_id: String,
    pub did: String,
    pub signature: Vec<u8>,
    pub verification_method: Option<String>,
}

impl FromStr for AuthorizationHeader {
    type Err = AuthError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let value = value.trim();
        let (scheme, params) = value
            .split_once(char::is_whitespace)
            .ok_or_else(|| AuthError::MalformedHeader("missing parameters".to_string()))?;

        if !scheme.eq_ignore_ascii_case(AUTH_SCHEME) {
            return Err(AuthError::MalformedHeader(format!("unsupported scheme '{scheme}'")));
        }

        let mut challenge_id = None;
        let mut did = None;
        let mut signature = None;
        let mut verification_method = None;

        for part in params.split(',').map(str::trim).filter(|p| !p.is_empty()) {
            let (key, raw) = part
                .split_once('=')
                .ok_or_else(|| AuthError::MalformedHeader(format!("expected key=value, got '{part}'")))?;
            let val = raw.trim().trim_matches('"').to_string();
            match key.trim().to_ascii_lowercase().as_str() {
                "challenge_id" => challenge_id = Some(val),
                "did" => did = Some(val),
                "signature" => signature = Some(val),
                "verification_method" => verification_method = Some(val),
                // Unknown params are ignored.
                _ => {}
            }
        }

        let require = |field: Option<String>, name: &str| {
            field
                .filter(|v| !v.is_empty())
                .ok_or_else(|| AuthError::MalformedHeader(format!("missing {name}")))
        };
        let challenge_id = require(challenge_id, "challenge_id")?;
        let did = require(did, "did")?;
        let signature = decode_signature(&require(signature, "signature")?)?;

        Ok(Self {
            challenge_id,
            did,
            signature,
            verification_method,
        })
    }
}

impl fmt::Display for AuthorizationHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} challenge_id=\"{}\", did=\"{}\", signature=\"{}\"",
            AUTH_SCHEME,
            self.challenge_id,
            self.did,
            URL_SAFE_NO_PAD.encode(&self.signature)
        )?;
        if let Some(vm) = &self.verification_method {
            write!(f, ", verification_method=\"{vm}\"")?;
        }
        Ok(())
    }
}

fn decode_signature(encoded: &str) -> Result<Vec<u8>, AuthError> {
    URL_SAFE_NO_PAD
        .decode(encoded.trim_end_matches('='))
        .or_else(|_| STANDARD.decode(encoded))
        .map_err(|e| AuthError::MalformedHeader(format!("signature is not base64: {e}")))
}

/// Bytes a client signs to answer a challenge.
pub fn signing_payload(challenge_id: &str, nonce: &str) -> Vec<u8> {
    format!("{challenge_id}:{nonce}").into_bytes()
}

/// Validates an `authorization` value against a pending challenge.
///
/// On success the session is marked verified with the caller's DID and the
/// updated session is returned.
pub async fn validate_authorization(
    authorization: &str,
    store: &dyn SessionStore,
    resolver: &dyn DidResolver,
) -> Result<Session, AuthError> {
    let header: AuthorizationHeader = authorization.parse()?;
    let challenge_id = header.challenge_id.as_str();

    let session = store
        .fetch(challenge_id)
        .await
        .ok_or_else(|| AuthError::UnknownChallenge(challenge_id.to_string()))?;

    if session.verified || session.agent_did.is_some() {
        warn!(%challenge_id, "Rejecting replayed challenge");
        return Err(AuthError::ChallengeAlreadyUsed(challenge_id.to_string()));
    }

    let profile = resolver.resolve(&header.did).await.map_err(|e| {
        warn!(did = %header.did, error = %e, "DID resolution failed");
        AuthError::DidResolution {
            did: header.did.clone(),
            reason: e.to_string(),
        }
    })?;

    let proof = DidProof {
        did: header.did.clone(),
        verification_method: header.verification_method.clone(),
        payload: signing_payload(challenge_id, &session.challenge),
        signature: header.signature.clone(),
    };

    if !resolver.verify(&proof, &profile) {
        warn!(did = %header.did, %challenge_id, "DID proof did not verify");
        return Err(AuthError::InvalidProof(header.did));
    }

    let method_id = header
        .verification_method
        .clone()
        .or_else(|| matching_method(&proof, &profile).map(|vm| vm.id.clone()));

    let updated = store
        .complete(
            challenge_id,
            SessionUpdate {
                agent_did: Some(header.did.clone()),
                verified: Some(true),
                verified_at: Some(Utc::now()),
                verification_method: method_id,
                ..Default::default()
            },
        )
        .await
        .map_err(|e| {
            warn!(%challenge_id, error = %e, "Could not complete challenge");
            e
        })?;

    if updated.agent_did.is_none() {
        return Err(AuthError::MissingAgentDid(challenge_id.to_string()));
    }

    info!(did = %header.did, %challenge_id, "DID challenge verified");
    Ok(updated)
}
