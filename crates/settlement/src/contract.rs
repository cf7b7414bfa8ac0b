//! Settlement contract - registers peers, posts requests and verifies
//! quorum certificates before accepting a response
//!
//! [`LocalSettlement`] keeps the contract state in memory. Request events
//! go out on a `tokio::sync::broadcast` channel.

use crate::address::address_of;
use crate::error::SettlementError;
use acrabrb_consensus::{
    meets_quorum, quorum_size, response_digest, Address, Crypto, RequestData, SequenceNumber,
    SignatureValue,
};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::broadcast;

/// Offset added to the recovery id in the `v` component
pub const RECOVERY_OFFSET: u8 = 27;

const EVENT_CAPACITY: usize = 64;

/// A response with its certificate split into parallel `r/s/v` arrays
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponseSubmission {
    pub request: RequestData,
    pub response: Vec<u8>,
    pub r: Vec<[u8; 32]>,
    pub s: Vec<[u8; 32]>,
    pub v: Vec<u8>,
    /// Address of the peer that reached quorum
    pub fulfiller: Address,
}

impl ResponseSubmission {
    pub fn signature_count(&self) -> usize {
        self.v.len()
    }
}

/// Accepted response
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Receipt {
    pub sequence: SequenceNumber,
    pub callback_address: Address,
    pub response: Vec<u8>,
    pub fulfiller: Address,
    pub signers: Vec<Address>,
}

/// Split a signature into `(r, s, v)`.
///
/// 65-byte recoverable signatures get `v = 27 + recovery_id`, 64-byte ones
/// `v = 0`. Other lengths and recovery ids above 3 are not representable.
pub fn split_signature(signature: &SignatureValue) -> Option<([u8; 32], [u8; 32], u8)> {
    let bytes = signature.as_bytes();
    let v = match bytes.len() {
        65 if bytes[64] <= 3 => RECOVERY_OFFSET + bytes[64],
        64 => 0,
        _ => return None,
    };
    let mut r = [0u8; 32];
    let mut s = [0u8; 32];
    r.copy_from_slice(&bytes[..32]);
    s.copy_from_slice(&bytes[32..64]);
    Some((r, s, v))
}

/// Inverse of [`split_signature`]
pub fn join_signature(r: &[u8; 32], s: &[u8; 32], v: u8) -> SignatureValue {
    let mut bytes = Vec::with_capacity(65);
    bytes.extend_from_slice(r);
    bytes.extend_from_slice(s);
    if v >= RECOVERY_OFFSET {
        bytes.push(v - RECOVERY_OFFSET);
    }
    SignatureValue(bytes)
}

/// Settlement layer seen by the node
#[async_trait]
pub trait Settlement: Send + Sync {
    async fn register_peer(&self, address: Address) -> Result<(), SettlementError>;

    /// Assign the next sequence number and publish the request
    async fn post_request(
        &self,
        callback_address: Address,
        payload: Vec<u8>,
    ) -> Result<RequestData, SettlementError>;

    /// Verify the certificate and accept the response
    async fn post_response(&self, submission: ResponseSubmission) -> Result<Receipt, SettlementError>;

    fn subscribe_requests(&self) -> broadcast::Receiver<RequestData>;
}

#[derive(Debug, Default)]
struct ContractState {
    registered: BTreeSet<Address>,
    next_sequence: SequenceNumber,
    pending: HashMap<SequenceNumber, RequestData>,
    fulfilled: HashSet<SequenceNumber>,
}

/// In-memory settlement contract
pub struct LocalSettlement {
    state: Mutex<ContractState>,
    crypto: Arc<dyn Crypto>,
    fault_threshold: usize,
    events: broadcast::Sender<RequestData>,
}

impl LocalSettlement {
    /// `crypto` must support key recovery for responses to be accepted
    pub fn new(crypto: Arc<dyn Crypto>, fault_threshold: usize) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            state: Mutex::new(ContractState::default()),
            crypto,
            fault_threshold,
            events,
        }
    }

    pub fn registered(&self) -> usize {
        self.state.lock().registered.len()
    }

    pub fn is_registered(&self, address: &Address) -> bool {
        self.state.lock().registered.contains(address)
    }

    pub fn is_fulfilled(&self, sequence: SequenceNumber) -> bool {
        self.state.lock().fulfilled.contains(&sequence)
    }

    /// Signatures a certificate needs with the current registrations
    pub fn required_signatures(&self) -> usize {
        quorum_size(self.registered(), self.fault_threshold)
    }

    fn recover_signers(
        &self,
        submission: &ResponseSubmission,
        registered: &BTreeSet<Address>,
    ) -> Result<Vec<Address>, SettlementError> {
        let digest = response_digest(self.crypto.as_ref(), &submission.response, &submission.request);

        let mut seen = HashSet::new();
        let mut signers = Vec::with_capacity(submission.signature_count());
        for (index, ((r, s), v)) in submission
            .r
            .iter()
            .zip(&submission.s)
            .zip(&submission.v)
            .enumerate()
        {
            let signature = join_signature(r, s, *v);
            let address = self
                .crypto
                .recover(&signature, &digest)
                .map(|key| address_of(&key))
                .filter(|address| registered.contains(address))
                .ok_or(SettlementError::InvalidSignature { index })?;

            if !seen.insert(address) {
                return Err(SettlementError::DuplicateSigner(address));
            }
            signers.push(address);
        }
        Ok(signers)
    }
}

#[async_trait]
impl Settlement for LocalSettlement {
    async fn register_peer(&self, address: Address) -> Result<(), SettlementError> {
        let mut state = self.state.lock();
        if !state.registered.insert(address) {
            return Err(SettlementError::AlreadyRegistered(address));
        }
        tracing::debug!("REG PEER {} ({} registered)", address, state.registered.len());
        Ok(())
    }

    async fn post_request(
        &self,
        callback_address: Address,
        payload: Vec<u8>,
    ) -> Result<RequestData, SettlementError> {
        let request = {
            let mut state = self.state.lock();
            let sequence = state.next_sequence;
            state.next_sequence = sequence.next();

            let request = RequestData {
                sequence_number: sequence,
                callback_address,
                payload,
            };
            state.pending.insert(sequence, request.clone());
            request
        };

        tracing::info!(
            "POST REQUEST seq={} payload=0x{} callback={}",
            request.sequence_number,
            hex::encode(&request.payload),
            request.callback_address
        );

        // No subscribers is not an error
        let _ = self.events.send(request.clone());
        Ok(request)
    }

    async fn post_response(&self, submission: ResponseSubmission) -> Result<Receipt, SettlementError> {
        let mut state = self.state.lock();
        let sequence = submission.request.sequence_number;

        if !state.registered.contains(&submission.fulfiller) {
            return Err(SettlementError::UnregisteredFulfiller(submission.fulfiller));
        }
        if submission.r.len() != submission.s.len() || submission.s.len() != submission.v.len() {
            return Err(SettlementError::MalformedSignatures {
                r: submission.r.len(),
                s: submission.s.len(),
                v: submission.v.len(),
            });
        }
        if state.fulfilled.contains(&sequence) {
            return Err(SettlementError::AlreadyFulfilled(sequence));
        }
        let posted = state
            .pending
            .get(&sequence)
            .ok_or(SettlementError::UnknownRequest(sequence))?;
        if *posted != submission.request {
            return Err(SettlementError::RequestMismatch(sequence));
        }

        let signers = self.recover_signers(&submission, &state.registered)?;
        let registered = state.registered.len();
        if !meets_quorum(signers.len(), registered, self.fault_threshold) {
            return Err(SettlementError::InsufficientSignatures {
                valid: signers.len(),
                required: quorum_size(registered, self.fault_threshold),
            });
        }

        state.pending.remove(&sequence);
        state.fulfilled.insert(sequence);

        tracing::info!(
            "RESPONSE seq={} accepted from {} with {} signers",
            sequence,
            submission.fulfiller,
            signers.len()
        );

        Ok(Receipt {
            sequence,
            callback_address: submission.request.callback_address,
            response: submission.response,
            fulfiller: submission.fulfiller,
            signers,
        })
    }

    fn subscribe_requests(&self) -> broadcast::Receiver<RequestData> {
        self.events.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use acrabrb_consensus::{KeyPair, Secp256k1Keccak, HONEST_RESPONSE};

    const T: usize = 1;

    struct Fixture {
        crypto: Arc<dyn Crypto>,
        keys: Vec<KeyPair>,
        settlement: LocalSettlement,
    }

    /// Four registered secp256k1 peers, t = 1, so three signatures are needed
    async fn fixture() -> Fixture {
        let crypto: Arc<dyn Crypto> = Arc::new(Secp256k1Keccak);
        let keys: Vec<KeyPair> = (0..4).map(|_| crypto.generate_keypair()).collect();
        let settlement = LocalSettlement::new(crypto.clone(), T);
        for key in &keys {
            settlement.register_peer(address_of(&key.public)).await.unwrap();
        }
        Fixture {
            crypto,
            keys,
            settlement,
        }
    }

    fn submission(
        fixture: &Fixture,
        request: &RequestData,
        response: &[u8],
        signers: &[usize],
    ) -> ResponseSubmission {
        let digest = response_digest(fixture.crypto.as_ref(), response, request);
        let mut out = ResponseSubmission {
            request: request.clone(),
            response: response.to_vec(),
            r: Vec::new(),
            s: Vec::new(),
            v: Vec::new(),
            fulfiller: address_of(&fixture.keys[signers[0]].public),
        };
        for &i in signers {
            let signature = fixture.crypto.sign(&digest, &fixture.keys[i].secret).unwrap();
            let (r, s, v) = split_signature(&signature).unwrap();
            out.r.push(r);
            out.s.push(s);
            out.v.push(v);
        }
        out
    }

    async fn request(fixture: &Fixture) -> RequestData {
        fixture
            .settlement
            .post_request(Address([0x5f; 20]), vec![0xbe, 0xef])
            .await
            .unwrap()
    }

    #[test]
    fn test_split_and_join_signature() {
        let mut bytes = vec![7u8; 64];
        bytes.push(1);
        let (r, s, v) = split_signature(&SignatureValue(bytes.clone())).unwrap();
        assert_eq!(v, 28);
        assert_eq!(join_signature(&r, &s, v), SignatureValue(bytes));

        let (_, _, v) = split_signature(&SignatureValue(vec![1; 64])).unwrap();
        assert_eq!(v, 0);
        assert!(split_signature(&SignatureValue(vec![1; 10])).is_none());
    }

    #[test]
    fn test_split_rejects_out_of_range_recovery_id() {
        let mut bytes = vec![7u8; 64];
        bytes.push(0xff);
        assert!(split_signature(&SignatureValue(bytes.clone())).is_none());
        bytes[64] = 4;
        assert!(split_signature(&SignatureValue(bytes.clone())).is_none());
        bytes[64] = 3;
        assert_eq!(split_signature(&SignatureValue(bytes)).map(|(_, _, v)| v), Some(30));
    }

    #[tokio::test]
    async fn test_register_twice_fails() {
        let fixture = fixture().await;
        let address = address_of(&fixture.keys[0].public);
        assert_eq!(
            fixture.settlement.register_peer(address).await,
            Err(SettlementError::AlreadyRegistered(address))
        );
        assert_eq!(fixture.settlement.registered(), 4);
    }

    #[tokio::test]
    async fn test_post_request_assigns_sequences_and_publishes() {
        let fixture = fixture().await;
        let mut events = fixture.settlement.subscribe_requests();

        let first = request(&fixture).await;
        let second = request(&fixture).await;
        assert_eq!(first.sequence_number, SequenceNumber(0));
        assert_eq!(second.sequence_number, SequenceNumber(1));

        assert_eq!(events.recv().await.unwrap(), first);
        assert_eq!(events.recv().await.unwrap(), second);
    }

    #[tokio::test]
    async fn test_quorum_certificate_accepted_once() {
        let fixture = fixture().await;
        let request = request(&fixture).await;
        let posted = submission(&fixture, &request, HONEST_RESPONSE, &[0, 1, 2]);

        let receipt = fixture.settlement.post_response(posted.clone()).await.unwrap();
        assert_eq!(receipt.sequence, request.sequence_number);
        assert_eq!(receipt.signers.len(), 3);
        assert_eq!(receipt.signers[1], address_of(&fixture.keys[1].public));
        assert!(fixture.settlement.is_fulfilled(request.sequence_number));

        assert_eq!(
            fixture.settlement.post_response(posted).await,
            Err(SettlementError::AlreadyFulfilled(request.sequence_number))
        );
    }

    #[tokio::test]
    async fn test_too_few_signatures_rejected() {
        let fixture = fixture().await;
        assert_eq!(fixture.settlement.required_signatures(), 3);
        let request = request(&fixture).await;
        let posted = submission(&fixture, &request, HONEST_RESPONSE, &[0, 1]);

        assert_eq!(
            fixture.settlement.post_response(posted).await,
            Err(SettlementError::InsufficientSignatures {
                valid: 2,
                required: 3
            })
        );
        assert!(!fixture.settlement.is_fulfilled(request.sequence_number));
    }

    #[tokio::test]
    async fn test_duplicate_signer_rejected() {
        let fixture = fixture().await;
        let request = request(&fixture).await;
        let posted = submission(&fixture, &request, HONEST_RESPONSE, &[0, 1, 1]);

        assert_eq!(
            fixture.settlement.post_response(posted).await,
            Err(SettlementError::DuplicateSigner(address_of(&fixture.keys[1].public)))
        );
    }

    #[tokio::test]
    async fn test_signature_over_other_response_rejected() {
        let fixture = fixture().await;
        let request = request(&fixture).await;
        let mut posted = submission(&fixture, &request, b"FAULTY MESSAGE", &[0, 1, 2]);
        posted.response = HONEST_RESPONSE.to_vec();

        assert!(matches!(
            fixture.settlement.post_response(posted).await,
            Err(SettlementError::InvalidSignature { .. })
        ));
    }

    #[tokio::test]
    async fn test_unregistered_fulfiller_rejected() {
        let fixture = fixture().await;
        let request = request(&fixture).await;
        let mut posted = submission(&fixture, &request, HONEST_RESPONSE, &[0, 1, 2]);
        posted.fulfiller = Address([0xaa; 20]);

        assert_eq!(
            fixture.settlement.post_response(posted).await,
            Err(SettlementError::UnregisteredFulfiller(Address([0xaa; 20])))
        );
    }

    #[tokio::test]
    async fn test_unknown_and_mismatched_requests_rejected() {
        let fixture = fixture().await;
        let real = request(&fixture).await;

        let mut unknown = real.clone();
        unknown.sequence_number = SequenceNumber(9);
        let posted = submission(&fixture, &unknown, HONEST_RESPONSE, &[0, 1, 2]);
        assert_eq!(
            fixture.settlement.post_response(posted).await,
            Err(SettlementError::UnknownRequest(SequenceNumber(9)))
        );

        let mut altered = real.clone();
        altered.payload = vec![0xde, 0xad];
        let posted = submission(&fixture, &altered, HONEST_RESPONSE, &[0, 1, 2]);
        assert_eq!(
            fixture.settlement.post_response(posted).await,
            Err(SettlementError::RequestMismatch(real.sequence_number))
        );
    }

    #[tokio::test]
    async fn test_ragged_arrays_rejected() {
        let fixture = fixture().await;
        let request = request(&fixture).await;
        let mut posted = submission(&fixture, &request, HONEST_RESPONSE, &[0, 1, 2]);
        posted.v.pop();

        assert_eq!(
            fixture.settlement.post_response(posted).await,
            Err(SettlementError::MalformedSignatures { r: 3, s: 3, v: 2 })
        );
    }
}
