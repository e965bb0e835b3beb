use axum::body::{to_bytes, Body};
use axum::http::{header, Method, Request, StatusCode};
use ed25519_dalek::{Signer, SigningKey};
use fondu_mcp::auth::{signing_payload, AuthorizationHeader};
use fondu_mcp::credentials::CredentialResolver;
use fondu_mcp::diagnostics::ErrorLog;
use fondu_mcp::did::key::encode_did_key;
use fondu_mcp::did::DefaultDidResolver;
use fondu_mcp::http_transport::{build_router, AppState};
use fondu_mcp::knowledge::{HttpKnowledgeSearch, SearchToolInvoker};
use fondu_mcp::session::{Challenge, InMemorySessionStore};
use fondu_mcp::Server;
use rand::rngs::OsRng;
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceExt;

fn app() -> axum::Router {
    let resolver = CredentialResolver::new(vec![], vec![]).with_env_lookup(|_| None);
    let invoker = SearchToolInvoker::new(
        resolver,
        Arc::new(HttpKnowledgeSearch::new("http://127.0.0.1:9")),
        Arc::new(ErrorLog::stderr()),
    );
    build_router(AppState::new(
        Arc::new(Server::new(invoker)),
        Arc::new(InMemorySessionStore::new()),
        Arc::new(DefaultDidResolver::new(None)),
    ))
}

async fn profile(router: &axum::Router, authorization: Option<&str>) -> (StatusCode, Option<String>, Value) {
    let mut builder = Request::builder().method(Method::POST).uri("/v1/profile");
    if let Some(value) = authorization {
        builder = builder.header(header::AUTHORIZATION, value);
    }
    let response = router.clone().oneshot(builder.body(Body::empty()).unwrap()).await.unwrap();
    let status = response.status();
    let www_authenticate = response
        .headers()
        .get(header::WWW_AUTHENTICATE)
        .map(|v| v.to_str().unwrap().to_string());
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, www_authenticate, serde_json::from_slice(&bytes).unwrap())
}

fn answer(challenge: &Challenge, key: &SigningKey) -> String {
    AuthorizationHeader {
        challenge_id: challenge.challenge_id.clone(),
        did: encode_did_key(&key.verifying_key()),
        signature: key
            .sign(&signing_payload(&challenge.challenge_id, &challenge.nonce))
            .to_bytes()
            .to_vec(),
        verification_method: None,
    }
    .to_string()
}

#[tokio::test]
async fn test_did_key_handshake_over_http() {
    let router = app();
    let key = SigningKey::generate(&mut OsRng);

    let (status, www_authenticate, body) = profile(&router, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "Unauthorized");

    let header_json = www_authenticate.unwrap();
    let header_json = header_json.strip_prefix("did_challenge ").unwrap();
    let challenge: Challenge = serde_json::from_str(header_json).unwrap();
    assert_eq!(body["challenge"]["challenge_id"], challenge.challenge_id.as_str());

    let authorization = answer(&challenge, &key);
    let (status, _, body) = profile(&router, Some(&authorization)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        body,
        json!({ "profile": { "agent_did": encode_did_key(&key.verifying_key()), "authenticated": true } })
    );

    // The same proof cannot be used twice.
    let (status, _, body) = profile(&router, Some(&authorization)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert!(body["error"].as_str().unwrap().contains("already been used"));
}

#[tokio::test]
async fn test_wrong_key_is_rejected() {
    let router = app();
    let (_, www_authenticate, _) = profile(&router, None).await;
    let challenge: Challenge =
        serde_json::from_str(www_authenticate.unwrap().strip_prefix("did_challenge ").unwrap()).unwrap();

    let signer = SigningKey::generate(&mut OsRng);
    let claimed = SigningKey::generate(&mut OsRng);
    let forged = AuthorizationHeader {
        challenge_id: challenge.challenge_id.clone(),
        did: encode_did_key(&claimed.verifying_key()),
        signature: signer
            .sign(&signing_payload(&challenge.challenge_id, &challenge.nonce))
            .to_bytes()
            .to_vec(),
        verification_method: None,
    };

    let (status, _, body) = profile(&router, Some(&forged.to_string())).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert!(body.get("profile").is_none());

    // A failed attempt leaves the challenge usable by its real owner.
    let (status, _, _) = profile(&router, Some(&answer(&challenge, &claimed))).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_unsupported_did_method_without_resolver() {
    let router = app();
    let (_, www_authenticate, _) = profile(&router, None).await;
    let challenge: Challenge =
        serde_json::from_str(www_authenticate.unwrap().strip_prefix("did_challenge ").unwrap()).unwrap();

    let authorization = format!(
        "DIDChallenge challenge_id=\"{}\", did=\"did:web:agent.example\", signature=\"AQID\"",
        challenge.challenge_id
    );
    let (status, _, body) = profile(&router, Some(&authorization)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert!(body["error"].as_str().unwrap().contains("did:web:agent.example"));
}
