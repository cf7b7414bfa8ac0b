//! Fulfillment submitter - posts the first quorum certificate to settlement
//!
//! Once a certificate is accepted, later fulfillments for the same run are
//! ignored. A rejected certificate leaves room for the next one.

use crate::address::address_of;
use crate::contract::{split_signature, Receipt, ResponseSubmission, Settlement};
use crate::error::SettlementError;
use acrabrb_consensus::{Address, Fulfillment, PeerId, PeerInfo};
use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

impl ResponseSubmission {
    /// Split every certificate signature into `r/s/v`
    pub fn from_fulfillment(fulfillment: &Fulfillment, fulfiller: Address) -> Result<Self, SettlementError> {
        let signatures = &fulfillment.bundle.signatures;
        let mut r = Vec::with_capacity(signatures.len());
        let mut s = Vec::with_capacity(signatures.len());
        let mut v = Vec::with_capacity(signatures.len());

        for (index, signature) in signatures.iter().enumerate() {
            let (ri, si, vi) = split_signature(&signature.value).ok_or(SettlementError::UnsupportedSignature {
                index,
                len: signature.value.len(),
            })?;
            r.push(ri);
            s.push(si);
            v.push(vi);
        }

        Ok(Self {
            request: fulfillment.request.clone(),
            response: fulfillment.response.clone(),
            r,
            s,
            v,
            fulfiller,
        })
    }
}

/// Posts fulfillments on behalf of the peer that reached quorum
pub struct FulfillmentSubmitter {
    settlement: Arc<dyn Settlement>,
    /// Peer keys, to derive the fulfiller's address
    directory: Vec<PeerInfo>,
    submitted: AtomicBool,
    last_receipt: RwLock<Option<Receipt>>,
}

impl FulfillmentSubmitter {
    pub fn new(settlement: Arc<dyn Settlement>) -> Self {
        Self {
            settlement,
            directory: Vec::new(),
            submitted: AtomicBool::new(false),
            last_receipt: RwLock::new(None),
        }
    }

    /// Set the peer directory used to resolve fulfiller addresses
    pub fn with_directory(mut self, directory: Vec<PeerInfo>) -> Self {
        self.directory = directory;
        self
    }

    pub fn fulfiller_address(&self, who: PeerId) -> Option<Address> {
        self.directory
            .iter()
            .find(|p| p.id == who)
            .map(|p| address_of(&p.public_key))
    }

    pub fn has_submitted(&self) -> bool {
        self.submitted.load(Ordering::SeqCst)
    }

    /// Post a fulfillment. Returns `AlreadySubmitted` once a submission
    /// has been accepted. A rejected submission releases the latch.
    pub async fn submit(&self, fulfillment: &Fulfillment) -> Result<Receipt, SettlementError> {
        let fulfiller = self
            .fulfiller_address(fulfillment.who)
            .ok_or(SettlementError::UnknownFulfiller(fulfillment.who))?;

        if self.submitted.swap(true, Ordering::SeqCst) {
            tracing::debug!("Fulfillment from peer {} ignored, already submitted", fulfillment.who);
            return Err(SettlementError::AlreadySubmitted);
        }

        match self.post(fulfillment, fulfiller).await {
            Ok(receipt) => {
                *self.last_receipt.write() = Some(receipt.clone());
                Ok(receipt)
            }
            Err(e) => {
                tracing::warn!("Fulfillment from peer {} rejected: {}", fulfillment.who, e);
                self.submitted.store(false, Ordering::SeqCst);
                Err(e)
            }
        }
    }

    async fn post(&self, fulfillment: &Fulfillment, fulfiller: Address) -> Result<Receipt, SettlementError> {
        let submission = ResponseSubmission::from_fulfillment(fulfillment, fulfiller)?;
        tracing::info!(
            "POST RESPONSE seq={} fulfiller={} signers={:?}",
            submission.request.sequence_number,
            fulfiller,
            fulfillment
                .bundle
                .signatures
                .iter()
                .map(|s| s.signer)
                .collect::<Vec<_>>()
        );

        self.settlement.post_response(submission).await
    }

    pub fn last_receipt(&self) -> Option<Receipt> {
        self.last_receipt.read().clone()
    }
}
