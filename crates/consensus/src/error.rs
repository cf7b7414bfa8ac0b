//! Consensus errors

use crate::types::{MessageKey, PeerId, SequenceNumber};
use thiserror::Error;

/// Failures of the crypto service
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CryptoError {
    #[error("Invalid secret key")]
    InvalidSecretKey,

    #[error("Signing failed: {0}")]
    Signing(String),
}

/// Errors surfaced by the peer state machine.
///
/// Validation failures are not errors: they are dropped and counted (see
/// [`DropReason`]). Everything here is fatal for the peer that raised it.
#[derive(Error, Debug, Clone)]
pub enum ProtocolError {
    #[error("Own response or request missing for sequence {sequence} (key {key})")]
    MissingOwnState {
        sequence: SequenceNumber,
        key: MessageKey,
    },

    #[error("Crypto failure: {0}")]
    Crypto(#[from] CryptoError),
}

/// Errors from bootstrapping or driving the peer network
#[derive(Error, Debug)]
pub enum NetworkError {
    #[error("Peer directory incomplete: {announced} of {expected} peers announced")]
    IncompleteDirectory { announced: usize, expected: usize },

    #[error("Peer {0} is not in the directory")]
    UnknownPeer(PeerId),

    #[error("Coordinator channel closed")]
    ChannelClosed,
}

/// Errors parsing hex-encoded wire values
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ParseError {
    #[error("Invalid hex: {0}")]
    InvalidHex(#[from] hex::FromHexError),

    #[error("Invalid length: expected {expected} bytes, got {actual}")]
    InvalidLength { expected: usize, actual: usize },
}

/// Why a bundle or continuation was dropped without effect
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    /// The message key is already delivered
    AlreadyDelivered,
    /// No local response yet for the bundle's sequence
    NoOwnResponse,
    /// No bundle signature verifies against the local digest
    NoVerifiableSignature,
    /// The peer directory has not been received yet
    NoDirectory,
    /// A response for this sequence was already recorded
    DuplicateResponse,
}

impl std::fmt::Display for DropReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::AlreadyDelivered => write!(f, "already delivered"),
            Self::NoOwnResponse => write!(f, "no response yet"),
            Self::NoVerifiableSignature => write!(f, "no verifiable signature"),
            Self::NoDirectory => write!(f, "no directory"),
            Self::DuplicateResponse => write!(f, "duplicate response"),
        }
    }
}
