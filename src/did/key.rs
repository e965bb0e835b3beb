use async_trait::async_trait;
use ed25519_dalek::VerifyingKey;

use super::{DidResolver, IdentityProfile, VerificationMethod};
use crate::error::DidError;

pub const DID_KEY_PREFIX: &str = "did:key:";

/// Multicodec varint for `ed25519-pub`.
const ED25519_MULTICODEC: [u8; 2] = [0xed, 0x01];
const MULTIBASE_BASE58BTC: char = 'z';

/// Resolves `did:key` identifiers without any network access.
#[derive(Debug, Clone, Copy, Default)]
pub struct KeyDidResolver;

#[async_trait]
impl DidResolver for KeyDidResolver {
    async fn resolve(&self, did: &str) -> Result<IdentityProfile, DidError> {
        let encoded = did
            .strip_prefix(DID_KEY_PREFIX)
            .ok_or_else(|| DidError::UnsupportedMethod(super::method_of(did).to_string()))?;

        let public_key = decode_multibase_ed25519(encoded)
            .ok_or_else(|| DidError::InvalidDid(format!("{did} is not an Ed25519 did:key")))?;

        Ok(IdentityProfile {
            did: did.to_string(),
            verification_methods: vec![VerificationMethod {
                id: format!("{did}#{encoded}"),
                method_type: "Ed25519VerificationKey2020".to_string(),
                controller: did.to_string(),
                public_key: public_key.to_vec(),
            }],
        })
    }
}

/// Decodes a base58btc multibase string into a raw Ed25519 key.
///
/// Accepts both multicodec-prefixed keys (as used by `did:key` and
/// `Multikey`) and bare 32-byte keys.
pub fn decode_multibase_ed25519(value: &str) -> Option<[u8; 32]> {
    let body = value.strip_prefix(MULTIBASE_BASE58BTC)?;
    let bytes = bs58::decode(body).into_vec().ok()?;
    let key: &[u8] = match bytes.len() {
        34 if bytes.starts_with(&ED25519_MULTICODEC) => &bytes[2..],
        _ => &bytes,
    };
    <[u8; 32]>::try_from(key).ok()
}

/// Builds the `did:key` identifier for an Ed25519 public key.
pub fn encode_did_key(key: &VerifyingKey) -> String {
    let mut bytes = Vec::with_capacity(34);
    bytes.extend_from_slice(&ED25519_MULTICODEC);
    bytes.extend_from_slice(key.as_bytes());
    format!("{DID_KEY_PREFIX}{MULTIBASE_BASE58BTC}{}", bs58::encode(bytes).into_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::did::{verify_ed25519_proof, DidProof};
    use ed25519_dalek::{Signer, SigningKey};
    use rand::rngs::OsRng;

    #[tokio::test]
    async fn test_did_key_round_trip_verifies_signature() {
        let signing_key = SigningKey::generate(&mut OsRng);
        let did = encode_did_key(&signing_key.verifying_key());
        assert!(did.starts_with("did:key:z6Mk"));

        let profile = KeyDidResolver.resolve(&did).await.unwrap();
        assert_eq!(profile.did, did);
        assert_eq!(profile.verification_methods.len(), 1);
        assert_eq!(profile.verification_methods[0].public_key, signing_key.verifying_key().to_bytes().to_vec());

        let payload = b"ch_1_xyz:nonce".to_vec();
        let mut proof = DidProof {
            did: did.clone(),
            verification_method: None,
            payload: payload.clone(),
            signature: signing_key.sign(&payload).to_bytes().to_vec(),
        };
        assert!(verify_ed25519_proof(&proof, &profile));

        proof.signature[0] ^= 0xff;
        assert!(!verify_ed25519_proof(&proof, &profile));
    }

    #[tokio::test]
    async fn test_rejects_non_key_dids_and_garbage() {
        assert!(matches!(
            KeyDidResolver.resolve("did:web:example.com").await,
            Err(DidError::UnsupportedMethod(_))
        ));
        assert!(matches!(
            KeyDidResolver.resolve("did:key:zNotBase58!!").await,
            Err(DidError::InvalidDid(_))
        ));
        assert!(matches!(
            KeyDidResolver.resolve("did:key:abc").await,
            Err(DidError::InvalidDid(_))
        ));
    }

    #[test]
    fn test_decode_bare_key() {
        let raw = [7u8; 32];
        let encoded = format!("z{}", bs58::encode(raw).into_string());
        assert_eq!(decode_multibase_ed25519(&encoded), Some(raw));
    }
}
