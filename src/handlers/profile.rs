use axum::{
    extract::State,
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use chrono::Utc;
use serde_json::{json, Value};
use tracing::{info, instrument, warn};

use crate::auth::validate_authorization;
use crate::did::DidResolver;
use crate::http_transport::AppState;
use crate::session::{Challenge, InMemorySessionStore, SessionStore};

/// Scheme used in the `WWW-Authenticate` header of a challenge reply.
pub const CHALLENGE_SCHEME: &str = "did_challenge";

/// Outcome of one `/v1/profile` request.
#[derive(Debug, Clone, PartialEq)]
pub struct ProfileReply {
    pub status: StatusCode,
    pub challenge: Option<Challenge>,
    pub body: Value,
}

impl ProfileReply {
    fn unauthorized(cause: impl Into<String>) -> Self {
        Self {
            status: StatusCode::UNAUTHORIZED,
            challenge: None,
            body: json!({ "error": cause.into() }),
        }
    }
}

impl IntoResponse for ProfileReply {
    fn into_response(self) -> Response {
        let mut response = (self.status, Json(self.body)).into_response();
        if let Some(challenge) = &self.challenge {
            let value = serde_json::to_string(challenge)
                .ok()
                .and_then(|json| HeaderValue::from_str(&format!("{CHALLENGE_SCHEME} {json}")).ok());
            if let Some(value) = value {
                response.headers_mut().insert(header::WWW_AUTHENTICATE, value);
            }
        }
        response
    }
}

/// Runs one step of the challenge/response handshake.
///
/// Without an `authorization` value a fresh challenge is issued. With one, the
/// proof is validated and the verified agent DID is returned.
pub async fn profile_reply(
    authorization: Option<&str>,
    sessions: &dyn SessionStore,
    resolver: &dyn DidResolver,
) -> ProfileReply {
    let Some(authorization) = authorization else {
        let nonce = InMemorySessionStore::generate_nonce();
        let challenge_id = sessions.create(nonce.clone()).await;
        let challenge = match sessions.fetch(&challenge_id).await {
            Some(session) => Challenge::from(&session),
            None => Challenge {
                challenge_id: challenge_id.clone(),
                nonce,
                issued_at: Utc::now(),
            },
        };
        info!(%challenge_id, "Issued DID challenge");
        return ProfileReply {
            status: StatusCode::UNAUTHORIZED,
            body: json!({ "error": "Unauthorized", "challenge": challenge }),
            challenge: Some(challenge),
        };
    };

    match validate_authorization(authorization, sessions, resolver).await {
        Ok(session) => match session.agent_did.filter(|_| session.verified) {
            Some(agent_did) => ProfileReply {
                status: StatusCode::OK,
                challenge: None,
                body: json!({ "profile": { "agent_did": agent_did, "authenticated": true } }),
            },
            None => ProfileReply::unauthorized("Authentication failed: no agent DID"),
        },
        Err(e) => {
            warn!(error = %e, "Profile authentication failed");
            ProfileReply::unauthorized(e.to_string())
        }
    }
}

#[instrument(skip_all)]
pub async fn profile_handler(State(app_state): State<AppState>, headers: HeaderMap) -> ProfileReply {
    let authorization = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty());

    profile_reply(authorization, app_state.sessions.as_ref(), app_state.did_resolver.as_ref()).await
}
