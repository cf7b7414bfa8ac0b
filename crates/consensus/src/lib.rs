//! ACRABRB - Authenticated Commit-Reveal over Asynchronous Byzantine Reliable Broadcast
//!
//! Architecture:
//! - Every peer answers a request on its own and signs the digest of its answer
//! - Bundles of signatures are flooded through a coordinator relay
//! - Peers only accept signatures that verify against their *own* digest
//! - A peer holding more than `(n + t) / 2` signatures emits a quorum certificate

pub mod actor;
pub mod coordinator;
pub mod crypto;
pub mod delivery;
pub mod digest;
pub mod error;
pub mod ledger;
pub mod peer;
pub mod store;
pub mod types;


pub use actor::{PeerActor, PeerEvent, PeerHandle};
pub use coordinator::{relay_targets, CoordinatorStats, Directory, Network};
pub use crypto::{Crypto, Digest, Ed25519Blake3, KeyPair, SecretKey, Secp256k1Keccak};
pub use delivery::DeliveryLog;
pub use digest::{encode_request, request_hash, response_digest};
pub use error::{CryptoError, DropReason, NetworkError, ParseError, ProtocolError};
pub use ledger::{meets_quorum, quorum_size, threshold, SignatureLedger};
pub use peer::{Effect, Peer, PeerSnapshot, PendingResponse, FAULTY_RESPONSE, HONEST_RESPONSE};
pub use store::{LocalStateStore, OwnRecord};
pub use types::*;
