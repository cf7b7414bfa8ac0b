//! Local state store - the peer's own response per sequence

use crate::types::{RequestData, Response, SequenceNumber};
use std::collections::HashMap;

/// What this peer computed for a sequence, and the request it answered
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OwnRecord {
    pub response: Response,
    pub request: RequestData,
}

/// Per-peer mapping from sequence number to its own record.
///
/// Written once per sequence by the owning peer, read by everything else.
#[derive(Debug, Default)]
pub struct LocalStateStore {
    records: HashMap<SequenceNumber, OwnRecord>,
}

impl LocalStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record this peer's answer. Returns `false` (and keeps the first
    /// record) if the sequence was already answered.
    pub fn record_own_response(
        &mut self,
        sequence: SequenceNumber,
        request: RequestData,
        response: Response,
    ) -> bool {
        if self.records.contains_key(&sequence) {
            return false;
        }
        self.records.insert(sequence, OwnRecord { response, request });
        true
    }

    pub fn lookup(&self, sequence: SequenceNumber) -> Option<&OwnRecord> {
        self.records.get(&sequence)
    }

    pub fn contains(&self, sequence: SequenceNumber) -> bool {
        self.records.contains_key(&sequence)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}
