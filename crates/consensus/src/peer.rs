//! Peer protocol - the per-peer ACRABRB state machine
//!
//! Per message key `(origin, sequence)` a peer moves through
//!
//! ```text
//! Idle → AwaitingOwnResponse → HasOwnResponse → (Collecting ⇄ Rebroadcasting) → Delivered
//! ```
//!
//! The state machine does no I/O. Handlers return [`Effect`]s which the
//! actor turns into envelopes for the coordinator.

use crate::crypto::{Crypto, Digest, KeyPair};
use crate::delivery::DeliveryLog;
use crate::digest::response_digest;
use crate::error::{DropReason, ProtocolError};
use crate::ledger::{signatures_needed, SignatureLedger};
use crate::store::LocalStateStore;
use crate::types::{
    Bundle, Fulfillment, Message, MessageKey, PeerId, PeerInfo, PeerStats, RequestData, Response,
    SequenceNumber, Signature,
};
use rand::Rng;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

/// Answer of an honest peer
pub const HONEST_RESPONSE: &[u8] = b"CORRECT MESSAGE";

/// Answer of a Byzantine peer
pub const FAULTY_RESPONSE: &[u8] = b"FAULTY MESSAGE";

/// Side effects requested by the state machine
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    /// Fan the bundle out to the other peers
    Broadcast(Bundle),
    /// Quorum reached, hand the certificate to settlement
    Fulfill(Fulfillment),
}

/// A response computation waiting for its simulated latency
#[derive(Debug, Clone)]
pub struct PendingResponse {
    pub request: RequestData,
    pub delay: Duration,
}

/// Point-in-time view of a peer, for diagnostics and tests
#[derive(Debug, Clone, Default)]
pub struct PeerSnapshot {
    pub id: PeerId,
    pub byzantine: bool,
    pub stats: PeerStats,
    pub delivered: Vec<MessageKey>,
    /// Verified signer ids per message key, in arrival order
    pub ledgers: BTreeMap<MessageKey, Vec<PeerId>>,
}

/// One network participant
pub struct Peer {
    id: PeerId,
    keys: KeyPair,
    byzantine: bool,
    fault_threshold: usize,
    directory: Vec<PeerInfo>,
    crypto: Arc<dyn Crypto>,
    max_response_delay: Duration,
    store: LocalStateStore,
    ledgers: HashMap<MessageKey, SignatureLedger>,
    delivered: DeliveryLog,
    stats: PeerStats,
}

impl Peer {
    /// Create a peer with a fresh key pair
    pub fn new(id: PeerId, byzantine: bool, crypto: Arc<dyn Crypto>) -> Self {
        let keys = crypto.generate_keypair();
        Self::with_keys(id, byzantine, keys, crypto)
    }

    pub fn with_keys(id: PeerId, byzantine: bool, keys: KeyPair, crypto: Arc<dyn Crypto>) -> Self {
        Self {
            id,
            keys,
            byzantine,
            fault_threshold: 0,
            directory: Vec::new(),
            crypto,
            max_response_delay: Duration::from_millis(100),
            store: LocalStateStore::new(),
            ledgers: HashMap::new(),
            delivered: DeliveryLog::new(),
            stats: PeerStats::default(),
        }
    }

    /// Set the upper bound of the simulated response latency
    pub fn with_max_response_delay(mut self, delay: Duration) -> Self {
        self.max_response_delay = delay;
        self
    }

    pub fn id(&self) -> PeerId {
        self.id
    }

    pub fn is_byzantine(&self) -> bool {
        self.byzantine
    }

    pub fn public_key(&self) -> &[u8] {
        &self.keys.public
    }

    /// Directory entry announced to the coordinator
    pub fn info(&self) -> PeerInfo {
        PeerInfo {
            id: self.id,
            public_key: self.keys.public.clone(),
        }
    }

    /// Install the directory and fault threshold pushed by the coordinator
    pub fn set_network_info(&mut self, peers: Vec<PeerInfo>, t: usize) {
        tracing::debug!("[{}] directory of {} peers, t={}", self.id, peers.len(), t);
        self.directory = peers;
        self.fault_threshold = t;
    }

    pub fn directory(&self) -> &[PeerInfo] {
        &self.directory
    }

    pub fn stats(&self) -> &PeerStats {
        &self.stats
    }

    pub fn ledger(&self, key: &MessageKey) -> Option<&SignatureLedger> {
        self.ledgers.get(key)
    }

    pub fn is_delivered(&self, key: &MessageKey) -> bool {
        self.delivered.is_delivered(key)
    }

    pub fn has_response(&self, sequence: SequenceNumber) -> bool {
        self.store.contains(sequence)
    }

    pub fn snapshot(&self) -> PeerSnapshot {
        PeerSnapshot {
            id: self.id,
            byzantine: self.byzantine,
            stats: self.stats.clone(),
            delivered: self.delivered.keys(),
            ledgers: self
                .ledgers
                .iter()
                .map(|(key, ledger)| (*key, ledger.signers()))
                .collect(),
        }
    }

    /// Start working on a request. The caller waits `delay` and then calls
    /// [`complete_request`](Self::complete_request).
    pub fn on_request(&self, request: RequestData) -> PendingResponse {
        let max_ms = self.max_response_delay.as_millis() as u64;
        let delay = if max_ms == 0 {
            Duration::ZERO
        } else {
            Duration::from_millis(rand::thread_rng().gen_range(0..max_ms))
        };

        tracing::info!(
            "[{}] RQ seq={} callback={} delay={}ms",
            self.id,
            request.sequence_number,
            request.callback_address,
            delay.as_millis()
        );

        PendingResponse { request, delay }
    }

    /// What this peer answers. Stands in for real work.
    pub fn compute_response(&self, _request: &RequestData) -> Response {
        if self.byzantine {
            FAULTY_RESPONSE.to_vec()
        } else {
            HONEST_RESPONSE.to_vec()
        }
    }

    /// Finish a request: record the own response, sign it and broadcast
    pub fn complete_request(&mut self, request: RequestData) -> Result<Vec<Effect>, ProtocolError> {
        let sequence = request.sequence_number;
        let response = self.compute_response(&request);

        if !self.store.record_own_response(sequence, request, response) {
            self.stats.duplicate_responses += 1;
            tracing::debug!("[{}] drop seq={}: {}", self.id, sequence, DropReason::DuplicateResponse);
            return Ok(Vec::new());
        }

        let message = Message {
            sequence,
            origin: self.id,
        };
        let effect = self.sign_and_broadcast(message)?;
        Ok(vec![effect])
    }

    /// Process a bundle relayed from another peer
    pub fn on_bundle(&mut self, bundle: &Bundle) -> Result<Vec<Effect>, ProtocolError> {
        self.stats.bundles_received += 1;
        let message = bundle.message;
        let key = message.key();

        let digest = match self.validate_bundle(bundle) {
            Ok(digest) => digest,
            Err(reason) => {
                self.drop_bundle(reason, key);
                return Ok(Vec::new());
            }
        };

        let ledger = self.ledgers.entry(key).or_default();
        let mut added = 0;
        for signature in &bundle.signatures {
            if ledger.try_add(signature, &digest, &self.directory, self.crypto.as_ref()) {
                added += 1;
            }
        }
        self.stats.signatures_collected += added;

        let mut effects = Vec::new();

        if !ledger.contains_signer(self.id) {
            effects.push(self.sign_and_broadcast(message)?);
        }

        let count = self.ledgers.get(&key).map_or(0, SignatureLedger::count);
        let peer_count = self.directory.len();
        tracing::debug!(
            "[{}] {} +{} sigs, {} collected, {} to quorum",
            self.id,
            key,
            added,
            count,
            signatures_needed(count, peer_count, self.fault_threshold)
        );

        if self
            .ledgers
            .get(&key)
            .is_some_and(|l| l.quorum_reached(peer_count, self.fault_threshold))
        {
            effects.extend(self.handle_consensus(message)?);
        }

        Ok(effects)
    }

    /// Checks run before a bundle may touch any state. Returns the local
    /// digest the bundle's signatures must match.
    pub fn validate_bundle(&self, bundle: &Bundle) -> Result<Digest, DropReason> {
        let message = bundle.message;

        if self.delivered.is_delivered(&message.key()) {
            return Err(DropReason::AlreadyDelivered);
        }
        if self.directory.is_empty() {
            return Err(DropReason::NoDirectory);
        }
        let Some(digest) = self.own_digest(message.sequence) else {
            return Err(DropReason::NoOwnResponse);
        };

        let verifiable = bundle
            .signatures
            .iter()
            .filter(|s| s.message.sequence == message.sequence)
            .any(|s| {
                self.directory
                    .iter()
                    .find(|p| p.id == s.signer)
                    .is_some_and(|p| self.crypto.verify(&s.value, &digest, &p.public_key))
            });
        if !verifiable {
            return Err(DropReason::NoVerifiableSignature);
        }

        Ok(digest)
    }

    /// Self-sign `message` if not yet done, then broadcast the full ledger
    fn sign_and_broadcast(&mut self, message: Message) -> Result<Effect, ProtocolError> {
        let key = message.key();
        let digest = self
            .own_digest(message.sequence)
            .ok_or(ProtocolError::MissingOwnState {
                sequence: message.sequence,
                key,
            })?;

        let ledger = self.ledgers.entry(key).or_default();
        if !ledger.contains_signer(self.id) {
            let value = self.crypto.sign(&digest, &self.keys.secret)?;
            ledger.insert_own(
                Signature {
                    signer: self.id,
                    value,
                    message,
                },
                self.id,
            );
        }

        Ok(self.broadcast(message))
    }

    fn broadcast(&mut self, message: Message) -> Effect {
        self.stats.broadcasts += 1;
        Effect::Broadcast(self.current_bundle(message))
    }

    fn current_bundle(&self, message: Message) -> Bundle {
        let signatures = self
            .ledgers
            .get(&message.key())
            .map(SignatureLedger::signatures)
            .unwrap_or_default();
        Bundle {
            message,
            signatures,
        }
    }

    /// Terminal transition for a key: deliver, fulfill, rebroadcast
    fn handle_consensus(&mut self, message: Message) -> Result<Vec<Effect>, ProtocolError> {
        let key = message.key();
        if !self.delivered.mark_delivered(key) {
            return Ok(Vec::new());
        }
        self.stats.deliveries += 1;

        let record = self
            .store
            .lookup(message.sequence)
            .ok_or(ProtocolError::MissingOwnState {
                sequence: message.sequence,
                key,
            })?;

        let bundle = self.current_bundle(message);
        tracing::info!(
            "[{}] FULFILL {} seq={} response=0x{} sigs={}",
            self.id,
            key,
            record.request.sequence_number,
            hex::encode(&record.response),
            bundle.signatures.len()
        );

        let fulfillment = Fulfillment {
            who: self.id,
            bundle,
            response: record.response.clone(),
            request: record.request.clone(),
        };

        Ok(vec![Effect::Fulfill(fulfillment), self.broadcast(message)])
    }

    fn own_digest(&self, sequence: SequenceNumber) -> Option<Digest> {
        let record = self.store.lookup(sequence)?;
        Some(response_digest(
            self.crypto.as_ref(),
            &record.response,
            &record.request,
        ))
    }

    fn drop_bundle(&mut self, reason: DropReason, key: MessageKey) {
        self.stats.bundles_dropped += 1;
        tracing::debug!("[{}] drop {}: {}", self.id, key, reason);
    }
}

impl std::fmt::Debug for Peer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Peer")
            .field("id", &self.id)
            .field("byzantine", &self.byzantine)
            .field("scheme", &self.crypto.name())
            .field("directory", &self.directory.len())
            .field("delivered", &self.delivered.len())
            .finish()
    }
}
