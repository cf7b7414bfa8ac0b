//! Signature ledger and quorum policy
//!
//! A ledger holds the distinct signatures a peer has verified for one
//! message key. Verification always uses the *verifying* peer's own digest,
//! and the signer is found by trying every directory key: the claimed
//! `signer` field is never trusted.
//!
//! # Quorum
//!
//! `threshold = (n + t) / 2` over the reals; quorum needs strictly more
//! signatures than that. In integers: `2 × count > n + t`.
//!
//! | n  | t | threshold | quorum at |
//! |----|---|-----------|-----------|
//! | 4  | 1 | 2.5       | 3         |
//! | 12 | 3 | 7.5       | 8         |

use crate::crypto::{Crypto, Digest};
use crate::types::{PeerId, PeerInfo, Signature};

/// Real-valued quorum threshold, for display
pub fn threshold(peer_count: usize, t: usize) -> f64 {
    (peer_count + t) as f64 / 2.0
}

/// Whether `count` signatures strictly exceed the threshold
pub const fn meets_quorum(count: usize, peer_count: usize, t: usize) -> bool {
    2 * count > peer_count + t
}

/// Smallest signature count that reaches quorum
pub const fn quorum_size(peer_count: usize, t: usize) -> usize {
    (peer_count + t) / 2 + 1
}

/// How many more signatures are needed
pub const fn signatures_needed(count: usize, peer_count: usize, t: usize) -> usize {
    let needed = quorum_size(peer_count, t);
    if count >= needed {
        0
    } else {
        needed - count
    }
}

/// A signature together with the directory entry that verified it
#[derive(Debug, Clone)]
struct Collected {
    signature: Signature,
    verified_signer: PeerId,
}

/// Distinct verified signatures for one message key
#[derive(Debug, Default)]
pub struct SignatureLedger {
    entries: Vec<Collected>,
}

impl SignatureLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `signature` if it is new and some directory key verifies it
    /// against `own_digest`.
    ///
    /// Scans the whole directory, so each call is O(n) verifications.
    pub fn try_add(
        &mut self,
        signature: &Signature,
        own_digest: &Digest,
        directory: &[PeerInfo],
        crypto: &dyn Crypto,
    ) -> bool {
        if self.contains_value(signature) {
            return false;
        }

        let Some(signer) = directory
            .iter()
            .find(|peer| crypto.verify(&signature.value, own_digest, &peer.public_key))
        else {
            return false;
        };

        // A second valid signature from the same key is not a new vote
        if self.contains_signer(signer.id) {
            tracing::debug!(
                "Ignoring extra signature from peer {} for {}",
                signer.id,
                signature.message.key()
            );
            return false;
        }

        self.entries.push(Collected {
            signature: signature.clone(),
            verified_signer: signer.id,
        });
        true
    }

    /// Insert this peer's own signature, skipping directory verification.
    /// Returns `false` if it already signed.
    pub fn insert_own(&mut self, signature: Signature, self_id: PeerId) -> bool {
        if self.contains_signer(self_id) || self.contains_value(&signature) {
            return false;
        }
        self.entries.push(Collected {
            signature,
            verified_signer: self_id,
        });
        true
    }

    fn contains_value(&self, signature: &Signature) -> bool {
        self.entries
            .iter()
            .any(|e| e.signature.value == signature.value)
    }

    /// Whether a signature verified as coming from `peer` is present
    pub fn contains_signer(&self, peer: PeerId) -> bool {
        self.entries.iter().any(|e| e.verified_signer == peer)
    }

    pub fn count(&self) -> usize {
        self.entries.len()
    }

    pub fn quorum_reached(&self, peer_count: usize, t: usize) -> bool {
        meets_quorum(self.count(), peer_count, t)
    }

    /// Collected signatures in arrival order
    pub fn signatures(&self) -> Vec<Signature> {
        self.entries.iter().map(|e| e.signature.clone()).collect()
    }

    /// Verified signer ids in arrival order
    pub fn signers(&self) -> Vec<PeerId> {
        self.entries.iter().map(|e| e.verified_signer).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::{Ed25519Blake3, KeyPair};
    use crate::types::{Message, SequenceNumber};

    fn network(n: usize) -> (Vec<KeyPair>, Vec<PeerInfo>) {
        let crypto = Ed25519Blake3;
        let keys: Vec<KeyPair> = (0..n).map(|_| crypto.generate_keypair()).collect();
        let directory = keys
            .iter()
            .enumerate()
            .map(|(id, k)| PeerInfo {
                id: id as PeerId,
                public_key: k.public.clone(),
            })
            .collect();
        (keys, directory)
    }

    fn message() -> Message {
        Message {
            sequence: SequenceNumber(0),
            origin: 0,
        }
    }

    fn sign(keys: &[KeyPair], signer: usize, digest: &Digest) -> Signature {
        Signature {
            signer: signer as PeerId,
            value: Ed25519Blake3.sign(digest, &keys[signer].secret).unwrap(),
            message: message(),
        }
    }

    #[test]
    fn test_threshold_boundary() {
        assert_eq!(threshold(12, 3), 7.5);
        assert!(!meets_quorum(7, 12, 3));
        assert!(meets_quorum(8, 12, 3));
        assert_eq!(quorum_size(12, 3), 8);
        assert_eq!(quorum_size(4, 1), 3);
        assert_eq!(signatures_needed(5, 12, 3), 3);
        assert_eq!(signatures_needed(9, 12, 3), 0);
    }

    #[test]
    fn test_quorum_is_monotonic() {
        for n in 1..=30 {
            let mut prev = false;
            for count in 0..=n {
                let reached = meets_quorum(count, n, n / 3);
                assert!(reached || !prev, "quorum flipped back at n={} count={}", n, count);
                prev = reached;
            }
        }
    }

    #[test]
    fn test_ledger_boundary_with_real_signatures() {
        let (keys, directory) = network(12);
        let digest = Ed25519Blake3.hash(b"digest");
        let mut ledger = SignatureLedger::new();

        for signer in 0..7 {
            assert!(ledger.try_add(&sign(&keys, signer, &digest), &digest, &directory, &Ed25519Blake3));
        }
        assert_eq!(ledger.count(), 7);
        assert!(!ledger.quorum_reached(12, 3));

        assert!(ledger.try_add(&sign(&keys, 7, &digest), &digest, &directory, &Ed25519Blake3));
        assert!(ledger.quorum_reached(12, 3));
    }

    #[test]
    fn test_duplicate_value_is_ignored() {
        let (keys, directory) = network(4);
        let digest = Ed25519Blake3.hash(b"digest");
        let mut ledger = SignatureLedger::new();
        let signature = sign(&keys, 1, &digest);

        assert!(ledger.try_add(&signature, &digest, &directory, &Ed25519Blake3));
        assert!(!ledger.try_add(&signature, &digest, &directory, &Ed25519Blake3));
        assert_eq!(ledger.count(), 1);
    }

    #[test]
    fn test_signature_over_other_digest_is_rejected() {
        let (keys, directory) = network(4);
        let own = Ed25519Blake3.hash(b"honest");
        let foreign = Ed25519Blake3.hash(b"faulty");
        let mut ledger = SignatureLedger::new();

        assert!(!ledger.try_add(&sign(&keys, 2, &foreign), &own, &directory, &Ed25519Blake3));
        assert_eq!(ledger.count(), 0);
    }

    #[test]
    fn test_forged_signer_id_is_irrelevant() {
        let (keys, directory) = network(4);
        let digest = Ed25519Blake3.hash(b"digest");
        let mut ledger = SignatureLedger::new();

        // Signed by peer 3, claims to be peer 0
        let mut forged = sign(&keys, 3, &digest);
        forged.signer = 0;
        assert!(ledger.try_add(&forged, &digest, &directory, &Ed25519Blake3));
        assert_eq!(ledger.signers(), vec![3]);
        assert!(!ledger.contains_signer(0));
    }

    #[test]
    fn test_unknown_key_is_rejected() {
        let (_, directory) = network(4);
        let (outsider, _) = network(1);
        let digest = Ed25519Blake3.hash(b"digest");
        let mut ledger = SignatureLedger::new();

        assert!(!ledger.try_add(&sign(&outsider, 0, &digest), &digest, &directory, &Ed25519Blake3));
    }

    #[test]
    fn test_altered_secp256k1_copy_is_rejected() {
        let crypto = crate::crypto::Secp256k1Keccak;
        let keys: Vec<KeyPair> = (0..4).map(|_| crypto.generate_keypair()).collect();
        let directory: Vec<PeerInfo> = keys
            .iter()
            .enumerate()
            .map(|(id, k)| PeerInfo {
                id: id as PeerId,
                public_key: k.public.clone(),
            })
            .collect();
        let digest = crypto.hash(b"digest");
        let honest = Signature {
            signer: 2,
            value: crypto.sign(&digest, &keys[2].secret).unwrap(),
            message: message(),
        };
        let mut altered = honest.clone();
        altered.value.0[64] = 0xff;

        let mut ledger = SignatureLedger::new();
        assert!(!ledger.try_add(&altered, &digest, &directory, &crypto));
        assert_eq!(ledger.count(), 0);
        assert!(ledger.try_add(&honest, &digest, &directory, &crypto));
        assert_eq!(ledger.signatures(), vec![honest]);
    }

    #[test]
    fn test_insert_own_once() {
        let (keys, _) = network(2);
        let digest = Ed25519Blake3.hash(b"digest");
        let mut ledger = SignatureLedger::new();

        assert!(ledger.insert_own(sign(&keys, 0, &digest), 0));
        assert!(!ledger.insert_own(sign(&keys, 0, &digest), 0));
        assert_eq!(ledger.count(), 1);
        assert!(ledger.contains_signer(0));
    }
}
