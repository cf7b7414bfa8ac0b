//! Network coordinator - spawns peer actors and relays their broadcasts
//!
//! Bootstrap runs in three steps:
//! 1. spawn `3t + 2d + 1` actors and send each `new_peer` (ids `< t` are Byzantine)
//! 2. collect every `peer_info` within the warm-up window
//! 3. push the complete directory as `network_info`
//!
//! After that a relay task fans `broadcast` envelopes out to every peer
//! except the sender and peers whose signature the bundle already carries,
//! and forwards only the first `consensus` envelope.

use crate::actor::{PeerActor, PeerHandle};
use crate::crypto::Crypto;
use crate::error::{NetworkError, ProtocolError};
use crate::peer::PeerSnapshot;
use crate::types::{Bundle, ConsensusConfig, Envelope, Fulfillment, PeerId, PeerInfo, RequestData};
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Coordinator counters
#[derive(Debug, Clone, Default, Serialize)]
pub struct CoordinatorStats {
    pub broadcasts: u64,
    pub bundles_relayed: u64,
    pub bytes_relayed: u64,
    pub fulfillments_seen: u64,
}

#[derive(Debug, Clone)]
struct DirectoryEntry {
    handle: PeerHandle,
    info: Option<PeerInfo>,
}

/// Peer id → actor handle, owned by the coordinator
#[derive(Debug, Default)]
pub struct Directory {
    peers: BTreeMap<PeerId, DirectoryEntry>,
}

impl Directory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, handle: PeerHandle) {
        self.peers
            .insert(handle.id(), DirectoryEntry { handle, info: None });
    }

    /// Record a peer's announced key. Returns `false` for unknown ids.
    pub fn announce(&mut self, info: PeerInfo) -> bool {
        match self.peers.get_mut(&info.id) {
            Some(entry) => {
                entry.info = Some(info);
                true
            }
            None => false,
        }
    }

    pub fn handle(&self, id: PeerId) -> Option<&PeerHandle> {
        self.peers.get(&id).map(|e| &e.handle)
    }

    pub fn ids(&self) -> impl Iterator<Item = PeerId> + '_ {
        self.peers.keys().copied()
    }

    /// Announced entries, ordered by id
    pub fn infos(&self) -> Vec<PeerInfo> {
        self.peers.values().filter_map(|e| e.info.clone()).collect()
    }

    pub fn announced(&self) -> usize {
        self.peers.values().filter(|e| e.info.is_some()).count()
    }

    pub fn is_complete(&self) -> bool {
        self.announced() == self.peers.len()
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    /// Send to one peer
    pub fn send(&self, id: PeerId, envelope: Envelope) -> Result<(), NetworkError> {
        let handle = self.handle(id).ok_or(NetworkError::UnknownPeer(id))?;
        if handle.send(envelope) {
            Ok(())
        } else {
            Err(NetworkError::ChannelClosed)
        }
    }

    /// Send to every peer, returning how many accepted it
    pub fn send_all(&self, envelope: &Envelope) -> usize {
        self.peers
            .values()
            .filter(|e| e.handle.send(envelope.clone()))
            .count()
    }
}

/// Recipients of a broadcast: everyone except the sender and peers already
/// named as signers in the bundle
pub fn relay_targets(ids: impl Iterator<Item = PeerId>, from: PeerId, bundle: &Bundle) -> Vec<PeerId> {
    ids.filter(|id| *id != from && !bundle.claims_signer(*id))
        .collect()
}

/// A running peer network
pub struct Network {
    config: ConsensusConfig,
    directory: Arc<Directory>,
    stats: Arc<RwLock<CoordinatorStats>>,
    fulfillments: mpsc::UnboundedReceiver<Fulfillment>,
    peers: Vec<(PeerId, JoinHandle<Result<(), ProtocolError>>)>,
    relay: JoinHandle<()>,
}

impl Network {
    /// Spawn every peer, exchange keys and start relaying
    pub async fn spawn(config: ConsensusConfig, crypto: Arc<dyn Crypto>) -> Result<Self, NetworkError> {
        let size = config.network_size();
        let max_delay = Duration::from_millis(config.max_response_delay_ms);

        tracing::info!(
            "NETWORK size {} byzantine {} adversaries {} scheme {}",
            size,
            config.byzantine,
            config.adversaries,
            crypto.name()
        );

        let (outbox, mut inbox) = mpsc::unbounded_channel::<Envelope>();
        let mut directory = Directory::new();
        let mut peers = Vec::with_capacity(size);

        for id in 0..size as PeerId {
            let (handle, task) = PeerActor::spawn(id, crypto.clone(), max_delay, outbox.clone());
            directory.insert(handle);
            directory.send(
                id,
                Envelope::NewPeer {
                    id,
                    byzantine: (id as usize) < config.byzantine,
                },
            )?;
            peers.push((id, task));
        }
        drop(outbox);

        let warmup = Duration::from_millis(config.warmup_ms);
        let collected = tokio::time::timeout(warmup, collect_announcements(&mut directory, &mut inbox)).await;
        if collected.is_err() || !directory.is_complete() {
            for (_, task) in &peers {
                task.abort();
            }
            return Err(NetworkError::IncompleteDirectory {
                announced: directory.announced(),
                expected: size,
            });
        }

        let infos = directory.infos();
        for info in &infos {
            tracing::debug!("PEER {} key=0x{}", info.id, hex::encode(&info.public_key));
        }
        directory.send_all(&Envelope::NetworkInfo {
            peers: infos,
            t: config.byzantine,
        });

        let directory = Arc::new(directory);
        let stats = Arc::new(RwLock::new(CoordinatorStats::default()));
        let (fulfill_tx, fulfillments) = mpsc::unbounded_channel();

        let relay = tokio::spawn(relay_loop(inbox, directory.clone(), stats.clone(), fulfill_tx));

        Ok(Self {
            config,
            directory,
            stats,
            fulfillments,
            peers,
            relay,
        })
    }

    pub fn config(&self) -> &ConsensusConfig {
        &self.config
    }

    /// Announced peer directory
    pub fn directory(&self) -> Vec<PeerInfo> {
        self.directory.infos()
    }

    /// Push a request to every peer
    pub fn submit_request(&self, request: RequestData) -> usize {
        tracing::info!(
            "REQUEST seq={} payload=0x{} -> {} peers",
            request.sequence_number,
            hex::encode(&request.payload),
            self.directory.len()
        );
        self.directory.send_all(&Envelope::Request(request))
    }

    /// Wait for the first quorum certificate
    pub async fn next_fulfillment(&mut self) -> Option<Fulfillment> {
        self.fulfillments.recv().await
    }

    pub fn stats(&self) -> CoordinatorStats {
        self.stats.read().clone()
    }

    /// Query every running peer, ordered by id
    pub async fn snapshots(&self) -> Vec<PeerSnapshot> {
        let mut snapshots = Vec::with_capacity(self.directory.len());
        for id in self.directory.ids() {
            let Some(handle) = self.directory.handle(id) else {
                continue;
            };
            if let Some(snapshot) = handle.snapshot().await {
                snapshots.push(snapshot);
            }
        }
        snapshots
    }

    /// Tear down every actor. Returns the peers that halted on a fatal error.
    pub async fn shutdown(self) -> Vec<(PeerId, ProtocolError)> {
        self.relay.abort();
        let mut failures = Vec::new();
        for (id, task) in self.peers {
            task.abort();
            if let Ok(Err(e)) = task.await {
                failures.push((id, e));
            }
        }
        tracing::info!("NETWORK down, {} peer failures", failures.len());
        failures
    }
}

async fn collect_announcements(directory: &mut Directory, inbox: &mut mpsc::UnboundedReceiver<Envelope>) {
    while !directory.is_complete() {
        match inbox.recv().await {
            Some(Envelope::PeerInfo(info)) => {
                let id = info.id;
                if !directory.announce(info) {
                    tracing::warn!("Announcement from unknown peer {}", id);
                }
            }
            Some(other) => {
                tracing::warn!("Unexpected {} during bootstrap", other.tag());
            }
            None => return,
        }
    }
}

async fn relay_loop(
    mut inbox: mpsc::UnboundedReceiver<Envelope>,
    directory: Arc<Directory>,
    stats: Arc<RwLock<CoordinatorStats>>,
    fulfill_tx: mpsc::UnboundedSender<Fulfillment>,
) {
    let mut forwarded = false;

    while let Some(envelope) = inbox.recv().await {
        match envelope {
            Envelope::Broadcast { from, bundle } => {
                let targets = relay_targets(directory.ids(), from, &bundle);
                let relayed = Envelope::Bundle(bundle);
                let size = relayed.to_bytes().len() as u64;

                let mut delivered = 0;
                for id in &targets {
                    if let Some(handle) = directory.handle(*id) {
                        if handle.send(relayed.clone()) {
                            delivered += 1;
                        }
                    }
                }

                let mut s = stats.write();
                s.broadcasts += 1;
                s.bundles_relayed += delivered;
                s.bytes_relayed += delivered * size;
                tracing::trace!("Relayed bundle from {} to {} peers", from, delivered);
            }
            Envelope::Consensus(fulfillment) => {
                stats.write().fulfillments_seen += 1;
                if forwarded {
                    tracing::debug!(
                        "Quorum at peer {} ({} sigs) after first fulfillment",
                        fulfillment.who,
                        fulfillment.bundle.signatures.len()
                    );
                    continue;
                }
                forwarded = true;
                tracing::info!(
                    "QUORUM {} signatures at peer {}",
                    fulfillment.bundle.signatures.len(),
                    fulfillment.who
                );
                let _ = fulfill_tx.send(fulfillment);
            }
            Envelope::PeerInfo(info) => {
                tracing::warn!("Late announcement from peer {}", info.id);
            }
            other @ (Envelope::NewPeer { .. }
            | Envelope::Request(_)
            | Envelope::Bundle(_)
            | Envelope::NetworkInfo { .. }) => {
                tracing::warn!("Coordinator ignoring peer-bound {}", other.tag());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::Ed25519Blake3;
    use crate::types::{Message, SequenceNumber, Signature, SignatureValue};

    fn bundle_signed_by(signers: &[PeerId]) -> Bundle {
        let message = Message {
            sequence: SequenceNumber(0),
            origin: 4,
        };
        Bundle {
            message,
            signatures: signers
                .iter()
                .map(|s| Signature {
                    signer: *s,
                    value: SignatureValue(vec![*s as u8; 64]),
                    message,
                })
                .collect(),
        }
    }

    #[test]
    fn test_relay_targets_skip_sender_and_signers() {
        let bundle = bundle_signed_by(&[4, 6]);
        let targets = relay_targets(0..8, 5, &bundle);
        assert_eq!(targets, vec![0, 1, 2, 3, 7]);
    }

    #[test]
    fn test_relay_targets_all_signed() {
        let bundle = bundle_signed_by(&[0, 1, 2]);
        assert!(relay_targets(0..3, 0, &bundle).is_empty());
    }

    #[tokio::test]
    async fn test_spawn_builds_complete_directory() {
        let config = ConsensusConfig {
            byzantine: 1,
            adversaries: 0,
            max_response_delay_ms: 1,
            warmup_ms: 2000,
        };
        let network = Network::spawn(config, Arc::new(Ed25519Blake3)).await.unwrap();

        let directory = network.directory();
        assert_eq!(directory.len(), 4);
        let ids: Vec<PeerId> = directory.iter().map(|p| p.id).collect();
        assert_eq!(ids, vec![0, 1, 2, 3]);
        assert!(network.shutdown().await.is_empty());
    }

    #[tokio::test]
    async fn test_directory_send_unknown_peer() {
        let directory = Directory::new();
        let err = directory
            .send(
                9,
                Envelope::NewPeer {
                    id: 9,
                    byzantine: false,
                },
            )
            .unwrap_err();
        assert!(matches!(err, NetworkError::UnknownPeer(9)));
    }
}
