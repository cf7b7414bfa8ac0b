//! Settlement errors

use acrabrb_consensus::{Address, SequenceNumber};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SettlementError {
    #[error("Peer {0} is already registered")]
    AlreadyRegistered(Address),

    #[error("Fulfiller {0} is not a registered peer")]
    UnregisteredFulfiller(Address),

    #[error("No pending request with sequence {0}")]
    UnknownRequest(SequenceNumber),

    #[error("Request {0} is already fulfilled")]
    AlreadyFulfilled(SequenceNumber),

    #[error("Request tuple does not match the posted request {0}")]
    RequestMismatch(SequenceNumber),

    #[error("Signature arrays differ in length: r={r} s={s} v={v}")]
    MalformedSignatures { r: usize, s: usize, v: usize },

    #[error("Signature {index} has unsupported length {len}")]
    UnsupportedSignature { index: usize, len: usize },

    #[error("Signature {index} does not recover to a registered peer")]
    InvalidSignature { index: usize },

    #[error("Signer {0} appears more than once")]
    DuplicateSigner(Address),

    #[error("Insufficient signatures: {valid} valid, {required} required")]
    InsufficientSignatures { valid: usize, required: usize },

    #[error("Response already submitted")]
    AlreadySubmitted,

    #[error("Unknown fulfiller peer {0}")]
    UnknownFulfiller(u32),
}
