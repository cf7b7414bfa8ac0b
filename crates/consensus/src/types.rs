//! Core types for requests, signatures and the peer envelope protocol

use crate::error::ParseError;
use borsh::{BorshDeserialize, BorshSerialize};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Peer identifier, assigned by the coordinator at spawn time
pub type PeerId = u32;

/// Opaque response computed by a peer
pub type Response = Vec<u8>;

/// Request sequence number.
///
/// Encoded on the wire as a uint256; the settlement layer hands out
/// consecutive counters so 64 bits are always enough.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Default,
    BorshSerialize,
    BorshDeserialize,
    Serialize,
    Deserialize,
)]
pub struct SequenceNumber(pub u64);

impl SequenceNumber {
    /// Big-endian uint256 word
    pub fn to_word(self) -> [u8; 32] {
        let mut word = [0u8; 32];
        word[24..].copy_from_slice(&self.0.to_be_bytes());
        word
    }

    pub fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

impl fmt::Display for SequenceNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// 20-byte callback address
#[derive(
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Default,
    BorshSerialize,
    BorshDeserialize,
    Serialize,
    Deserialize,
)]
pub struct Address(pub [u8; 20]);

impl Address {
    /// Left-padded 32-byte word
    pub fn to_word(self) -> [u8; 32] {
        let mut word = [0u8; 32];
        word[12..].copy_from_slice(&self.0);
        word
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Address({})", self)
    }
}

impl FromStr for Address {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = decode_hex(s)?;
        let array: [u8; 20] = bytes
            .as_slice()
            .try_into()
            .map_err(|_| ParseError::InvalidLength {
                expected: 20,
                actual: bytes.len(),
            })?;
        Ok(Self(array))
    }
}

/// Decode a hex string with or without a `0x` prefix
pub fn decode_hex(s: &str) -> Result<Vec<u8>, ParseError> {
    let trimmed = s.strip_prefix("0x").unwrap_or(s);
    Ok(hex::decode(trimmed)?)
}

/// One unit of work posted by the settlement layer
#[derive(Debug, Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize, Serialize, Deserialize)]
pub struct RequestData {
    pub sequence_number: SequenceNumber,
    pub callback_address: Address,
    pub payload: Vec<u8>,
}

/// A peer's claim about one sequence
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, BorshSerialize, BorshDeserialize, Serialize, Deserialize,
)]
pub struct Message {
    pub sequence: SequenceNumber,
    pub origin: PeerId,
}

impl Message {
    pub fn key(&self) -> MessageKey {
        MessageKey {
            origin: self.origin,
            sequence: self.sequence,
        }
    }
}

/// Unit of delivery and quorum tracking: `(origin, sequence)`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MessageKey {
    pub origin: PeerId,
    pub sequence: SequenceNumber,
}

impl fmt::Display for MessageKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}!{}", self.origin, self.sequence)
    }
}

/// Raw signature bytes as produced by the crypto scheme
#[derive(Clone, PartialEq, Eq, Hash, BorshSerialize, BorshDeserialize, Serialize, Deserialize)]
pub struct SignatureValue(pub Vec<u8>);

impl SignatureValue {
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for SignatureValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let shown = &self.0[..self.0.len().min(8)];
        write!(f, "Sig({}..)", hex::encode(shown))
    }
}

/// A signature over the signer's own digest for `message.sequence`
#[derive(Debug, Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize, Serialize, Deserialize)]
pub struct Signature {
    /// Claimed signer. Never trusted for acceptance.
    pub signer: PeerId,
    pub value: SignatureValue,
    pub message: Message,
}

/// Message plus every signature collected for it
#[derive(Debug, Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize, Serialize, Deserialize)]
pub struct Bundle {
    pub message: Message,
    pub signatures: Vec<Signature>,
}

impl Bundle {
    /// Whether a signature claiming `peer` as signer is present
    pub fn claims_signer(&self, peer: PeerId) -> bool {
        self.signatures.iter().any(|s| s.signer == peer)
    }
}

/// Directory entry
#[derive(Debug, Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize, Serialize, Deserialize)]
pub struct PeerInfo {
    pub id: PeerId,
    pub public_key: Vec<u8>,
}

/// A quorum certificate reached by `who`, ready for settlement
#[derive(Debug, Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize, Serialize, Deserialize)]
pub struct Fulfillment {
    pub who: PeerId,
    pub bundle: Bundle,
    pub response: Response,
    pub request: RequestData,
}

/// Messages exchanged between the coordinator and peer actors
#[derive(Debug, Clone, BorshSerialize, BorshDeserialize, Serialize, Deserialize)]
pub enum Envelope {
    /// Coordinator spawning a peer
    NewPeer { id: PeerId, byzantine: bool },

    /// Peer announcing its public key
    PeerInfo(PeerInfo),

    /// Coordinator forwarding a settlement request
    Request(RequestData),

    /// Bundle relayed between peers
    Bundle(Bundle),

    /// One-time directory push
    NetworkInfo { peers: Vec<PeerInfo>, t: usize },

    /// Peer asking the coordinator to fan out a bundle
    Broadcast { from: PeerId, bundle: Bundle },

    /// Peer reporting a reached quorum
    Consensus(Fulfillment),
}

impl Envelope {
    pub fn to_bytes(&self) -> Vec<u8> {
        borsh::to_vec(self).expect("Envelope serialization should not fail")
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self, borsh::io::Error> {
        borsh::from_slice(data)
    }

    /// Wire tag, for logs
    pub fn tag(&self) -> &'static str {
        match self {
            Self::NewPeer { .. } => "new_peer",
            Self::PeerInfo(_) => "peer_info",
            Self::Request(_) => "request",
            Self::Bundle(_) => "bundle",
            Self::NetworkInfo { .. } => "network_info",
            Self::Broadcast { .. } => "broadcast",
            Self::Consensus(_) => "consensus",
        }
    }
}

/// Network parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsensusConfig {
    /// Byzantine peers tolerated (t)
    pub byzantine: usize,
    /// Message adversaries tolerated (d)
    pub adversaries: usize,
    /// Upper bound of the simulated response latency
    pub max_response_delay_ms: u64,
    /// How long the coordinator waits for every peer to announce itself
    pub warmup_ms: u64,
}

impl ConsensusConfig {
    /// Network size `3t + 2d + 1`
    pub fn network_size(&self) -> usize {
        3 * self.byzantine + 2 * self.adversaries + 1
    }
}

impl Default for ConsensusConfig {
    fn default() -> Self {
        Self {
            byzantine: 3,
            adversaries: 1,
            max_response_delay_ms: 100,
            warmup_ms: 1000,
        }
    }
}

/// Per-peer counters
#[derive(Debug, Clone, Default, Serialize)]
pub struct PeerStats {
    pub bundles_received: u64,
    pub bundles_dropped: u64,
    pub signatures_collected: u64,
    pub broadcasts: u64,
    pub deliveries: u64,
    /// Completions for a sequence that already had a response
    pub duplicate_responses: u64,
}
