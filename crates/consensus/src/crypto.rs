//! Crypto service consumed by the protocol
//!
//! Peers only see the [`Crypto`] trait. Two schemes are provided:
//! - [`Secp256k1Keccak`]: Ethereum-compatible recoverable ECDSA with Keccak-256
//! - [`Ed25519Blake3`]: Ed25519 signatures with BLAKE3 hashing

use crate::error::CryptoError;
use crate::types::SignatureValue;
use k256::ecdsa::signature::hazmat::PrehashVerifier;
use rand::rngs::OsRng;
use sha3::{Digest as _, Keccak256};
use std::fmt;

/// 32-byte hash output
pub type Digest = [u8; 32];

/// Secret key bytes, never printed
#[derive(Clone)]
pub struct SecretKey(Vec<u8>);

impl SecretKey {
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Debug for SecretKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SecretKey(..)")
    }
}

/// A freshly generated key pair
#[derive(Debug, Clone)]
pub struct KeyPair {
    pub secret: SecretKey,
    pub public: Vec<u8>,
}

/// Signing, verification and hashing
pub trait Crypto: Send + Sync + fmt::Debug {
    /// Scheme name, for logs
    fn name(&self) -> &'static str;

    fn generate_keypair(&self) -> KeyPair;

    fn sign(&self, digest: &Digest, secret: &SecretKey) -> Result<SignatureValue, CryptoError>;

    /// Malformed keys or signatures verify as `false`
    fn verify(&self, signature: &SignatureValue, digest: &Digest, public_key: &[u8]) -> bool;

    fn hash(&self, data: &[u8]) -> Digest;

    /// Recover the signer's public key, for schemes that support it
    fn recover(&self, _signature: &SignatureValue, _digest: &Digest) -> Option<Vec<u8>> {
        None
    }
}

/// Recoverable ECDSA over secp256k1, Keccak-256 hashing.
///
/// Signatures are `r ‖ s ‖ recovery_id` (65 bytes), public keys are
/// uncompressed SEC1 points (65 bytes).
#[derive(Debug, Default, Clone, Copy)]
pub struct Secp256k1Keccak;

impl Secp256k1Keccak {
    /// Parse `r ‖ s ‖ recovery_id`. Recovery ids above 3 are rejected.
    fn parse_signature(
        signature: &SignatureValue,
    ) -> Option<(k256::ecdsa::Signature, k256::ecdsa::RecoveryId)> {
        let bytes = signature.as_bytes();
        if bytes.len() != 65 {
            return None;
        }
        let parsed = k256::ecdsa::Signature::from_slice(&bytes[..64]).ok()?;
        let recovery_id = k256::ecdsa::RecoveryId::from_byte(bytes[64])?;
        Some((parsed, recovery_id))
    }

    /// Key the full 65 bytes commit to, checked against `digest`
    fn recover_key(signature: &SignatureValue, digest: &Digest) -> Option<k256::ecdsa::VerifyingKey> {
        let (parsed, recovery_id) = Self::parse_signature(signature)?;
        let key = k256::ecdsa::VerifyingKey::recover_from_prehash(digest, &parsed, recovery_id).ok()?;
        key.verify_prehash(digest, &parsed).ok()?;
        Some(key)
    }

    fn encode_public(key: &k256::ecdsa::VerifyingKey) -> Vec<u8> {
        key.to_encoded_point(false).as_bytes().to_vec()
    }
}

impl Crypto for Secp256k1Keccak {
    fn name(&self) -> &'static str {
        "secp256k1-keccak"
    }

    fn generate_keypair(&self) -> KeyPair {
        let signing_key = k256::ecdsa::SigningKey::random(&mut OsRng);
        let public = Self::encode_public(signing_key.verifying_key());
        KeyPair {
            secret: SecretKey(signing_key.to_bytes().to_vec()),
            public,
        }
    }

    fn sign(&self, digest: &Digest, secret: &SecretKey) -> Result<SignatureValue, CryptoError> {
        let signing_key = k256::ecdsa::SigningKey::from_slice(secret.as_bytes())
            .map_err(|_| CryptoError::InvalidSecretKey)?;
        let (signature, recovery_id) = signing_key
            .sign_prehash_recoverable(digest)
            .map_err(|e| CryptoError::Signing(e.to_string()))?;

        let mut bytes = signature.to_bytes().to_vec();
        bytes.push(recovery_id.to_byte());
        Ok(SignatureValue(bytes))
    }

    /// The recovery byte is part of the signature: the key it recovers
    /// must be `public_key`.
    fn verify(&self, signature: &SignatureValue, digest: &Digest, public_key: &[u8]) -> bool {
        let Ok(expected) = k256::ecdsa::VerifyingKey::from_sec1_bytes(public_key) else {
            return false;
        };
        Self::recover_key(signature, digest).is_some_and(|key| key == expected)
    }

    fn hash(&self, data: &[u8]) -> Digest {
        Keccak256::digest(data).into()
    }

    fn recover(&self, signature: &SignatureValue, digest: &Digest) -> Option<Vec<u8>> {
        Self::recover_key(signature, digest).map(|key| Self::encode_public(&key))
    }
}

/// Ed25519 signatures (64 bytes), 32-byte public keys, BLAKE3 hashing
#[derive(Debug, Default, Clone, Copy)]
pub struct Ed25519Blake3;

impl Crypto for Ed25519Blake3 {
    fn name(&self) -> &'static str {
        "ed25519-blake3"
    }

    fn generate_keypair(&self) -> KeyPair {
        let signing_key = ed25519_dalek::SigningKey::generate(&mut OsRng);
        KeyPair {
            secret: SecretKey(signing_key.to_bytes().to_vec()),
            public: signing_key.verifying_key().to_bytes().to_vec(),
        }
    }

    fn sign(&self, digest: &Digest, secret: &SecretKey) -> Result<SignatureValue, CryptoError> {
        use ed25519_dalek::Signer;

        let bytes: [u8; 32] = secret
            .as_bytes()
            .try_into()
            .map_err(|_| CryptoError::InvalidSecretKey)?;
        let signing_key = ed25519_dalek::SigningKey::from_bytes(&bytes);
        Ok(SignatureValue(signing_key.sign(digest).to_bytes().to_vec()))
    }

    fn verify(&self, signature: &SignatureValue, digest: &Digest, public_key: &[u8]) -> bool {
        use ed25519_dalek::Verifier;

        let Ok(key_bytes) = <[u8; 32]>::try_from(public_key) else {
            return false;
        };
        let Ok(key) = ed25519_dalek::VerifyingKey::from_bytes(&key_bytes) else {
            return false;
        };
        let Ok(signature) = ed25519_dalek::Signature::from_slice(signature.as_bytes()) else {
            return false;
        };
        key.verify(digest, &signature).is_ok()
    }

    fn hash(&self, data: &[u8]) -> Digest {
        *blake3::hash(data).as_bytes()
    }
}
