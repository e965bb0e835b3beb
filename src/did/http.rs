use async_trait::async_trait;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use dashmap::DashMap;
use reqwest::Client as HttpClient;
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::key::decode_multibase_ed25519;
use super::{DidResolver, IdentityProfile, VerificationMethod};
use crate::error::DidError;

const RESOLVE_TIMEOUT: Duration = Duration::from_secs(30);

/// Resolves DIDs through a universal resolver (`GET {base}/1.0/identifiers/{did}`).
///
/// Profiles are cached for the lifetime of the resolver.
pub struct HttpDidResolver {
    client: HttpClient,
    base_url: String,
    cache: DashMap<String, IdentityProfile>,
}

impl HttpDidResolver {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: HttpClient::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            cache: DashMap::new(),
        }
    }

    pub fn cached(&self, did: &str) -> Option<IdentityProfile> {
        self.cache.get(did).map(|p| p.clone())
    }

    async fn fetch_document(&self, did: &str) -> Result<Value, DidError> {
        let url = format!("{}/1.0/identifiers/{}", self.base_url, did);
        debug!(%url, "Resolving DID over HTTP");

        let response = self
            .client
            .get(&url)
            .header(reqwest::header::ACCEPT, "application/json")
            .timeout(RESOLVE_TIMEOUT)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            warn!(%did, status = status.as_u16(), "DID resolver returned an error status");
            return Err(DidError::HttpStatus {
                did: did.to_string(),
                status: status.as_u16(),
            });
        }

        Ok(response.json::<Value>().await?)
    }
}

#[async_trait]
impl DidResolver for HttpDidResolver {
    async fn resolve(&self, did: &str) -> Result<IdentityProfile, DidError> {
        if let Some(profile) = self.cached(did) {
            debug!(%did, "DID profile served from cache");
            return Ok(profile);
        }

        let body = self.fetch_document(did).await?;
        let profile = profile_from_document(did, &body)?;
        info!(%did, methods = profile.verification_methods.len(), "Resolved DID document");
        self.cache.insert(did.to_string(), profile.clone());
        Ok(profile)
    }
}

/// Extracts the Ed25519 verification methods from a resolution result or a bare DID document.
pub fn profile_from_document(did: &str, body: &Value) -> Result<IdentityProfile, DidError> {
    let doc = body.get("didDocument").unwrap_or(body);

    let verification_methods: Vec<VerificationMethod> = doc
        .get("verificationMethod")
        .and_then(Value::as_array)
        .map(|methods| methods.iter().filter_map(|vm| parse_method(did, vm)).collect())
        .unwrap_or_default();

    if verification_methods.is_empty() {
        return Err(DidError::NoVerificationMethod(did.to_string()));
    }

    Ok(IdentityProfile {
        did: did.to_string(),
        verification_methods,
    })
}

fn parse_method(did: &str, vm: &Value) -> Option<VerificationMethod> {
    let raw_id = vm.get("id").and_then(Value::as_str)?;
    let id = if raw_id.starts_with('#') {
        format!("{did}{raw_id}")
    } else {
        raw_id.to_string()
    };

    let public_key = if let Some(multibase) = vm.get("publicKeyMultibase").and_then(Value::as_str) {
        decode_multibase_ed25519(multibase)?
    } else if let Some(b58) = vm.get("publicKeyBase58").and_then(Value::as_str) {
        let bytes = bs58::decode(b58).into_vec().ok()?;
        <[u8; 32]>::try_from(bytes.as_slice()).ok()?
    } else if let Some(jwk) = vm.get("publicKeyJwk") {
        if jwk.get("crv").and_then(Value::as_str) != Some("Ed25519") {
            return None;
        }
        let x = jwk.get("x").and_then(Value::as_str)?;
        let bytes = URL_SAFE_NO_PAD.decode(x).ok()?;
        <[u8; 32]>::try_from(bytes.as_slice()).ok()?
    } else {
        return None;
    };

    Some(VerificationMethod {
        id,
        method_type: vm.get("type").and_then(Value::as_str).unwrap_or_default().to_string(),
        controller: vm
            .get("controller")
            .and_then(Value::as_str)
            .unwrap_or(did)
            .to_string(),
        public_key: public_key.to_vec(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{extract::Path, extract::State, routing::get, Json, Router};
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn document(did: &str) -> Value {
        json!({
            "didDocument": {
                "id": did,
                "verificationMethod": [
                    {
                        "id": "#key-1",
                        "type": "Ed25519VerificationKey2018",
                        "controller": did,
                        "publicKeyBase58": bs58::encode([3u8; 32]).into_string()
                    },
                    {
                        "id": format!("{did}#key-2"),
                        "type": "JsonWebKey2020",
                        "publicKeyJwk": { "kty": "OKP", "crv": "Ed25519", "x": URL_SAFE_NO_PAD.encode([4u8; 32]) }
                    },
                    {
                        "id": format!("{did}#secp"),
                        "type": "EcdsaSecp256k1VerificationKey2019",
                        "publicKeyJwk": { "kty": "EC", "crv": "secp256k1", "x": "abc", "y": "def" }
                    }
                ]
            }
        })
    }

    #[test]
    fn test_profile_from_document_keeps_ed25519_methods() {
        let did = "did:web:agent.example";
        let profile = profile_from_document(did, &document(did)).unwrap();

        assert_eq!(profile.verification_methods.len(), 2);
        assert_eq!(profile.verification_methods[0].id, "did:web:agent.example#key-1");
        assert_eq!(profile.verification_methods[0].public_key, vec![3u8; 32]);
        assert_eq!(profile.verification_methods[1].controller, did);
        assert_eq!(profile.verification_methods[1].public_key, vec![4u8; 32]);
    }

    #[test]
    fn test_document_without_usable_keys_is_rejected() {
        let err = profile_from_document("did:web:x", &json!({ "id": "did:web:x" })).unwrap_err();
        assert!(matches!(err, DidError::NoVerificationMethod(_)));
    }

    #[tokio::test]
    async fn test_http_resolver_fetches_once_then_caches() {
        let hits = Arc::new(AtomicUsize::new(0));
        let app = Router::new()
            .route(
                "/1.0/identifiers/:did",
                get(|State(hits): State<Arc<AtomicUsize>>, Path(did): Path<String>| async move {
                    hits.fetch_add(1, Ordering::SeqCst);
                    Json(document(&did))
                }),
            )
            .with_state(hits.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });

        let resolver = HttpDidResolver::new(format!("http://{addr}/"));
        let first = resolver.resolve("did:web:agent.example").await.unwrap();
        let second = resolver.resolve("did:web:agent.example").await.unwrap();

        assert_eq!(first, second);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_http_resolver_reports_error_status() {
        let app = Router::new().route(
            "/1.0/identifiers/:did",
            get(|| async { (axum::http::StatusCode::NOT_FOUND, "not found") }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });

        let resolver = HttpDidResolver::new(format!("http://{addr}"));
        let err = resolver.resolve("did:web:missing.example").await.unwrap_err();
        assert!(matches!(err, DidError::HttpStatus { status: 404, .. }));
        assert!(resolver.cached("did:web:missing.example").is_none());
    }
}
