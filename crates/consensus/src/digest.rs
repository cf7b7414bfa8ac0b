//! Response digest binding
//!
//! Every signature is computed over
//! `hash(response ‖ hash(abi_encode(sequence_number, callback_address, payload)))`.
//! A mismatch in either the response or the request yields a different
//! digest, so claims about different content never verify against each other.

use crate::crypto::{Crypto, Digest};
use crate::types::RequestData;

const WORD: usize = 32;

/// ABI-encode the request as a single `(uint256, address, bytes)` tuple
pub fn encode_request(request: &RequestData) -> Vec<u8> {
    let payload = &request.payload;
    let padded_len = payload.len().div_ceil(WORD) * WORD;
    let mut out = Vec::with_capacity(5 * WORD + padded_len);

    // Offset of the dynamic tuple
    out.extend_from_slice(&length_word(WORD));
    out.extend_from_slice(&request.sequence_number.to_word());
    out.extend_from_slice(&request.callback_address.to_word());
    // Offset of `bytes` relative to the tuple start, after three head words
    out.extend_from_slice(&length_word(3 * WORD));
    out.extend_from_slice(&length_word(payload.len()));
    out.extend_from_slice(payload);
    out.resize(5 * WORD + padded_len, 0);
    out
}

fn length_word(value: usize) -> [u8; 32] {
    let mut word = [0u8; 32];
    word[24..].copy_from_slice(&(value as u64).to_be_bytes());
    word
}

/// Hash of the encoded request
pub fn request_hash(crypto: &dyn Crypto, request: &RequestData) -> Digest {
    crypto.hash(&encode_request(request))
}

/// The value every signature is computed over
pub fn response_digest(crypto: &dyn Crypto, response: &[u8], request: &RequestData) -> Digest {
    let request_hash = request_hash(crypto, request);
    let mut preimage = Vec::with_capacity(response.len() + request_hash.len());
    preimage.extend_from_slice(response);
    preimage.extend_from_slice(&request_hash);
    crypto.hash(&preimage)
}
