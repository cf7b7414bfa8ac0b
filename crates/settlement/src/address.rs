//! Ethereum-style peer addresses

use acrabrb_consensus::Address;
use sha3::{Digest, Keccak256};

/// Address of a secp256k1 public key: the last 20 bytes of the Keccak-256
/// of the uncompressed point without its `0x04` prefix.
///
/// Keys of any other shape are hashed whole, which keeps the mapping total
/// for schemes without Ethereum addresses.
pub fn address_of(public_key: &[u8]) -> Address {
    let body = match public_key {
        [0x04, rest @ ..] if public_key.len() == 65 => rest,
        other => other,
    };
    let hash = Keccak256::digest(body);
    let mut address = [0u8; 20];
    address.copy_from_slice(&hash[12..]);
    Address(address)
}
