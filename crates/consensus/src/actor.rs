//! Peer actor - one tokio task per peer
//!
//! The actor owns its [`Peer`] exclusively and handles one event at a time.
//! The simulated response latency runs in a detached sleep task that posts a
//! continuation back into the actor's own inbox.

use crate::crypto::Crypto;
use crate::error::ProtocolError;
use crate::peer::{Effect, Peer, PeerSnapshot};
use crate::types::{Envelope, PeerId, RequestData};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

/// Events processed by a peer actor
#[derive(Debug)]
pub enum PeerEvent {
    /// Envelope from the coordinator
    Inbound(Envelope),
    /// The simulated computation for a request finished
    ResponseComputed(RequestData),
    /// State query, answered between two protocol events
    Snapshot(oneshot::Sender<PeerSnapshot>),
}

/// Sending side of a peer actor's inbox
#[derive(Debug, Clone)]
pub struct PeerHandle {
    id: PeerId,
    tx: mpsc::UnboundedSender<PeerEvent>,
}

impl PeerHandle {
    pub fn id(&self) -> PeerId {
        self.id
    }

    /// Deliver an envelope. Returns `false` if the actor has stopped.
    pub fn send(&self, envelope: Envelope) -> bool {
        self.tx.send(PeerEvent::Inbound(envelope)).is_ok()
    }

    /// Current peer state. `None` if the actor stopped or has no peer yet.
    pub async fn snapshot(&self) -> Option<PeerSnapshot> {
        let (reply, rx) = oneshot::channel();
        self.tx.send(PeerEvent::Snapshot(reply)).ok()?;
        rx.await.ok()
    }
}

/// Peer actor state. The [`Peer`] only exists after `new_peer`.
pub struct PeerActor {
    id: PeerId,
    peer: Option<Peer>,
    crypto: Arc<dyn Crypto>,
    max_response_delay: Duration,
    inbox: mpsc::UnboundedReceiver<PeerEvent>,
    self_tx: mpsc::WeakUnboundedSender<PeerEvent>,
    outbox: mpsc::UnboundedSender<Envelope>,
}

impl PeerActor {
    /// Spawn an actor for slot `id`. It stays idle until it receives
    /// [`Envelope::NewPeer`].
    pub fn spawn(
        id: PeerId,
        crypto: Arc<dyn Crypto>,
        max_response_delay: Duration,
        outbox: mpsc::UnboundedSender<Envelope>,
    ) -> (PeerHandle, JoinHandle<Result<(), ProtocolError>>) {
        let (tx, inbox) = mpsc::unbounded_channel();
        let actor = Self {
            id,
            peer: None,
            crypto,
            max_response_delay,
            inbox,
            self_tx: tx.downgrade(),
            outbox,
        };

        let task = tokio::spawn(async move {
            let result = actor.run().await;
            if let Err(ref e) = result {
                tracing::error!("Peer {} halted: {}", id, e);
            }
            result
        });

        (PeerHandle { id, tx }, task)
    }

    /// Event loop. Ends once every handle is dropped and no computation is
    /// pending, when the outbox closes, or on a fatal protocol error.
    pub async fn run(mut self) -> Result<(), ProtocolError> {
        while let Some(event) = self.inbox.recv().await {
            let effects = match event {
                PeerEvent::Inbound(envelope) => self.dispatch(envelope)?,
                PeerEvent::ResponseComputed(request) => match self.peer.as_mut() {
                    Some(peer) => peer.complete_request(request)?,
                    None => Vec::new(),
                },
                PeerEvent::Snapshot(reply) => {
                    if let Some(peer) = self.peer.as_ref() {
                        let _ = reply.send(peer.snapshot());
                    }
                    Vec::new()
                }
            };

            if !self.emit(effects) {
                tracing::debug!("Peer {} outbox closed, stopping", self.id);
                break;
            }
        }
        Ok(())
    }

    fn dispatch(&mut self, envelope: Envelope) -> Result<Vec<Effect>, ProtocolError> {
        if let Envelope::NewPeer { id, byzantine } = envelope {
            self.init(id, byzantine);
            return Ok(Vec::new());
        }

        let Some(peer) = self.peer.as_mut() else {
            tracing::warn!("Peer slot {} got {} before new_peer", self.id, envelope.tag());
            return Ok(Vec::new());
        };

        match envelope {
            Envelope::NewPeer { .. } => Ok(Vec::new()),
            Envelope::Request(request) => {
                let pending = peer.on_request(request);
                let Some(tx) = self.self_tx.upgrade() else {
                    return Ok(Vec::new());
                };
                tokio::spawn(async move {
                    tokio::time::sleep(pending.delay).await;
                    let _ = tx.send(PeerEvent::ResponseComputed(pending.request));
                });
                Ok(Vec::new())
            }
            Envelope::Bundle(bundle) => peer.on_bundle(&bundle),
            Envelope::NetworkInfo { peers, t } => {
                peer.set_network_info(peers, t);
                Ok(Vec::new())
            }
            Envelope::PeerInfo(_) | Envelope::Broadcast { .. } | Envelope::Consensus(_) => {
                tracing::warn!("Peer {} ignoring coordinator-bound {}", self.id, envelope.tag());
                Ok(Vec::new())
            }
        }
    }

    fn init(&mut self, id: PeerId, byzantine: bool) {
        if self.peer.is_some() {
            tracing::warn!("Peer {} already initialized", self.id);
            return;
        }

        let peer = Peer::new(id, byzantine, self.crypto.clone())
            .with_max_response_delay(self.max_response_delay);
        tracing::debug!(
            "Peer {} up (byzantine={}, scheme={})",
            id,
            byzantine,
            self.crypto.name()
        );

        let _ = self.outbox.send(Envelope::PeerInfo(peer.info()));
        self.id = id;
        self.peer = Some(peer);
    }

    /// Turn effects into envelopes for the coordinator
    fn emit(&self, effects: Vec<Effect>) -> bool {
        for effect in effects {
            let envelope = match effect {
                Effect::Broadcast(bundle) => Envelope::Broadcast {
                    from: self.id,
                    bundle,
                },
                Effect::Fulfill(fulfillment) => Envelope::Consensus(fulfillment),
            };
            if self.outbox.send(envelope).is_err() {
                return false;
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::Ed25519Blake3;
    use crate::types::{Address, SequenceNumber};

    #[tokio::test]
    async fn test_new_peer_announces_info() {
        let (outbox, mut rx) = mpsc::unbounded_channel();
        let (handle, _task) = PeerActor::spawn(4, Arc::new(Ed25519Blake3), Duration::ZERO, outbox);

        assert!(handle.send(Envelope::NewPeer {
            id: 4,
            byzantine: false
        }));

        match rx.recv().await.unwrap() {
            Envelope::PeerInfo(info) => {
                assert_eq!(info.id, 4);
                assert_eq!(info.public_key.len(), 32);
            }
            other => panic!("unexpected {}", other.tag()),
        }
    }

    #[tokio::test]
    async fn test_request_leads_to_broadcast() {
        let (outbox, mut rx) = mpsc::unbounded_channel();
        let (handle, _task) = PeerActor::spawn(0, Arc::new(Ed25519Blake3), Duration::from_millis(5), outbox);

        handle.send(Envelope::NewPeer {
            id: 0,
            byzantine: false,
        });
        let info = match rx.recv().await.unwrap() {
            Envelope::PeerInfo(info) => info,
            other => panic!("unexpected {}", other.tag()),
        };
        handle.send(Envelope::NetworkInfo {
            peers: vec![info],
            t: 0,
        });
        handle.send(Envelope::Request(RequestData {
            sequence_number: SequenceNumber(0),
            callback_address: Address([1; 20]),
            payload: vec![],
        }));

        match rx.recv().await.unwrap() {
            Envelope::Broadcast { from, bundle } => {
                assert_eq!(from, 0);
                assert_eq!(bundle.signatures.len(), 1);
            }
            other => panic!("unexpected {}", other.tag()),
        }
    }

    #[tokio::test]
    async fn test_snapshot_query() {
        let (outbox, mut rx) = mpsc::unbounded_channel();
        let (handle, _task) = PeerActor::spawn(2, Arc::new(Ed25519Blake3), Duration::ZERO, outbox);
        assert!(handle.snapshot().await.is_none());

        handle.send(Envelope::NewPeer {
            id: 2,
            byzantine: true,
        });
        rx.recv().await.unwrap();

        let snapshot = handle.snapshot().await.unwrap();
        assert_eq!(snapshot.id, 2);
        assert!(snapshot.byzantine);
        assert!(snapshot.delivered.is_empty());
        assert!(snapshot.ledgers.is_empty());
    }

    #[tokio::test]
    async fn test_actor_stops_when_inbox_closes() {
        let (outbox, _rx) = mpsc::unbounded_channel();
        let (handle, task) = PeerActor::spawn(1, Arc::new(Ed25519Blake3), Duration::ZERO, outbox);
        handle.send(Envelope::NewPeer {
            id: 1,
            byzantine: true,
        });
        drop(handle);
        assert!(task.await.unwrap().is_ok());
    }
}
