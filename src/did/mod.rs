//!
//! DID resolution and proof verification.
//!
//! The validator only sees the [`DidResolver`] trait. `did:key` identifiers
//! carrying Ed25519 keys resolve locally; every other method is delegated to
//! an HTTP universal resolver when one is configured.

pub mod http;
pub mod key;

use async_trait::async_trait;
use ed25519_dalek::{Signature, Verifier, VerifyingKey};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

use crate::error::DidError;
pub use http::HttpDidResolver;
pub use key::KeyDidResolver;

/// A public key published in a DID document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationMethod {
    pub id: String,
    #[serde(rename = "type")]
    pub method_type: String,
    pub controller: String,
    /// Raw 32-byte Ed25519 public key.
    pub public_key: Vec<u8>,
}

impl VerificationMethod {
    /// True if `reference` names this method, either fully or by its `#fragment`.
    pub fn matches(&self, reference: &str) -> bool {
        if self.id == reference {
            return true;
        }
        let fragment = reference.rsplit('#').next().unwrap_or(reference);
        self.id.rsplit_once('#').is_some_and(|(_, own)| own == fragment)
    }
}

/// The resolved identity behind a DID.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityProfile {
    pub did: String,
    pub verification_methods: Vec<VerificationMethod>,
}

/// Proof material presented by a client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DidProof {
    pub did: String,
    /// Optional key id restricting which verification method must match.
    pub verification_method: Option<String>,
    /// Bytes the client was expected to sign.
    pub payload: Vec<u8>,
    pub signature: Vec<u8>,
}

#[async_trait]
pub trait DidResolver: Send + Sync {
    async fn resolve(&self, did: &str) -> Result<IdentityProfile, DidError>;

    /// Checks `proof` against the keys in `profile`.
    fn verify(&self, proof: &DidProof, profile: &IdentityProfile) -> bool {
        verify_ed25519_proof(proof, profile)
    }
}

/// Returns the id of the first verification method whose key validates `proof`.
pub fn matching_method<'a>(proof: &DidProof, profile: &'a IdentityProfile) -> Option<&'a VerificationMethod> {
    if proof.did != profile.did {
        return None;
    }
    let signature = Signature::from_slice(&proof.signature).ok()?;

    profile
        .verification_methods
        .iter()
        .filter(|vm| proof.verification_method.as_deref().map_or(true, |r| vm.matches(r)))
        .find(|vm| {
            let Ok(bytes) = <[u8; 32]>::try_from(vm.public_key.as_slice()) else {
                return false;
            };
            let Ok(key) = VerifyingKey::from_bytes(&bytes) else {
                return false;
            };
            key.verify(&proof.payload, &signature).is_ok()
        })
}

pub fn verify_ed25519_proof(proof: &DidProof, profile: &IdentityProfile) -> bool {
    let found = matching_method(proof, profile);
    debug!(did = %proof.did, verified = found.is_some(), "Checked DID proof");
    found.is_some()
}

/// Resolves `did:key` locally and hands everything else to an optional HTTP resolver.
pub struct DefaultDidResolver {
    key: KeyDidResolver,
    http: Option<Arc<HttpDidResolver>>,
}

impl DefaultDidResolver {
    pub fn new(http: Option<HttpDidResolver>) -> Self {
        Self {
            key: KeyDidResolver,
            http: http.map(Arc::new),
        }
    }
}

#[async_trait]
impl DidResolver for DefaultDidResolver {
    async fn resolve(&self, did: &str) -> Result<IdentityProfile, DidError> {
        if did.starts_with(key::DID_KEY_PREFIX) {
            return self.key.resolve(did).await;
        }
        match &self.http {
            Some(http) => http.resolve(did).await,
            None => Err(DidError::UnsupportedMethod(method_of(did).to_string())),
        }
    }
}

/// `did:web:example.com` -> `web`.
pub fn method_of(did: &str) -> &str {
    did.strip_prefix("did:")
        .and_then(|rest| rest.split(':').next())
        .unwrap_or(did)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ed25519_dalek::{Signer, SigningKey};
    use rand::rngs::OsRng;

    fn profile_for(signing_key: &SigningKey, did: &str) -> IdentityProfile {
        IdentityProfile {
            did: did.to_string(),
            verification_methods: vec![VerificationMethod {
                id: format!("{did}#key-1"),
                method_type: "Ed25519VerificationKey2018".to_string(),
                controller: did.to_string(),
                public_key: signing_key.verifying_key().to_bytes().to_vec(),
            }],
        }
    }

    #[test]
    fn test_verify_valid_and_tampered_proofs() {
        let signing_key = SigningKey::generate(&mut OsRng);
        let profile = profile_for(&signing_key, "did:web:agent.example");
        let payload = b"ch_0_abc:nonce".to_vec();

        let mut proof = DidProof {
            did: "did:web:agent.example".to_string(),
            verification_method: Some("key-1".to_string()),
            payload: payload.clone(),
            signature: signing_key.sign(&payload).to_bytes().to_vec(),
        };
        assert!(verify_ed25519_proof(&proof, &profile));

        proof.payload = b"ch_0_abc:other".to_vec();
        assert!(!verify_ed25519_proof(&proof, &profile));
    }

    #[test]
    fn test_verify_rejects_unknown_method_reference_and_did_mismatch() {
        let signing_key = SigningKey::generate(&mut OsRng);
        let profile = profile_for(&signing_key, "did:web:agent.example");
        let payload = b"payload".to_vec();
        let signature = signing_key.sign(&payload).to_bytes().to_vec();

        let wrong_key_ref = DidProof {
            did: "did:web:agent.example".to_string(),
            verification_method: Some("key-2".to_string()),
            payload: payload.clone(),
            signature: signature.clone(),
        };
        assert!(!verify_ed25519_proof(&wrong_key_ref, &profile));

        let wrong_did = DidProof {
            did: "did:web:someone.else".to_string(),
            verification_method: None,
            payload,
            signature,
        };
        assert!(!verify_ed25519_proof(&wrong_did, &profile));
    }

    #[test]
    fn test_method_reference_matching() {
        let vm = VerificationMethod {
            id: "did:web:a#key-1".to_string(),
            method_type: "Ed25519VerificationKey2020".to_string(),
            controller: "did:web:a".to_string(),
            public_key: vec![0; 32],
        };
        assert!(vm.matches("did:web:a#key-1"));
        assert!(vm.matches("#key-1"));
        assert!(vm.matches("key-1"));
        assert!(!vm.matches("key-10"));
    }

    #[tokio::test]
    async fn test_default_resolver_without_http_rejects_other_methods() {
        let resolver = DefaultDidResolver::new(None);
        let err = resolver.resolve("did:web:agent.example").await.unwrap_err();
        assert!(matches!(err, DidError::UnsupportedMethod(ref m) if m == "web"));
    }

    #[test]
    fn test_method_of() {
        assert_eq!(method_of("did:key:z6Mk"), "key");
        assert_eq!(method_of("did:web:example.com:user"), "web");
        assert_eq!(method_of("not-a-did"), "not-a-did");
    }
}
