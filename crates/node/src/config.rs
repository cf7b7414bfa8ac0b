//! Node Configuration

use acrabrb_consensus::{decode_hex, Address, ConsensusConfig};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Node configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// Byzantine peers (t)
    pub byzantine: usize,
    /// Message adversaries (d)
    pub adversaries: usize,
    /// Upper bound of the simulated response latency
    pub max_response_delay_ms: u64,
    /// Peer announcement window
    pub warmup_ms: u64,
    /// How long to wait for a quorum certificate
    pub timeout_ms: u64,
    /// Request payload, hex
    pub payload: String,
    /// Request callback address, hex
    pub callback_address: String,
}

impl Default for NodeConfig {
    fn default() -> Self {
        let consensus = ConsensusConfig::default();
        Self {
            byzantine: consensus.byzantine,
            adversaries: consensus.adversaries,
            max_response_delay_ms: consensus.max_response_delay_ms,
            warmup_ms: consensus.warmup_ms,
            timeout_ms: 10_000,
            payload: "0xbeef".to_string(),
            callback_address: "0x5fbdb2315678afecb367f032d93f642f64180aa3".to_string(),
        }
    }
}

impl NodeConfig {
    /// Load from a JSON file. Missing fields take their defaults.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config {}", path.display()))?;
        serde_json::from_str(&raw).with_context(|| format!("Invalid config {}", path.display()))
    }

    pub fn consensus(&self) -> ConsensusConfig {
        ConsensusConfig {
            byzantine: self.byzantine,
            adversaries: self.adversaries,
            max_response_delay_ms: self.max_response_delay_ms,
            warmup_ms: self.warmup_ms,
        }
    }

    pub fn payload_bytes(&self) -> Result<Vec<u8>> {
        decode_hex(&self.payload).with_context(|| format!("Invalid payload {}", self.payload))
    }

    pub fn callback(&self) -> Result<Address> {
        self.callback_address
            .parse()
            .with_context(|| format!("Invalid callback address {}", self.callback_address))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_network() {
        let config = NodeConfig::default();
        assert_eq!(config.consensus().network_size(), 12);
        assert_eq!(config.payload_bytes().unwrap(), vec![0xbe, 0xef]);
        assert_eq!(config.callback().unwrap().0[0], 0x5f);
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let config: NodeConfig = serde_json::from_str(r#"{ "byzantine": 1, "payload": "cafe" }"#).unwrap();
        assert_eq!(config.byzantine, 1);
        assert_eq!(config.adversaries, 1);
        assert_eq!(config.consensus().network_size(), 6);
        assert_eq!(config.payload_bytes().unwrap(), vec![0xca, 0xfe]);
        assert_eq!(config.timeout_ms, 10_000);
    }

    #[test]
    fn test_bad_callback_is_error() {
        let config = NodeConfig {
            callback_address: "0x1234".to_string(),
            ..Default::default()
        };
        assert!(config.callback().is_err());
    }
}
