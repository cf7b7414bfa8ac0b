//! Settlement - peer registration, request posting and certificate checks
//!
//! - [`LocalSettlement`]: in-memory contract behind the [`Settlement`] trait
//! - [`FulfillmentSubmitter`]: posts the first quorum certificate
//! - [`address_of`]: Ethereum address of a secp256k1 public key

pub mod address;
pub mod contract;
pub mod error;
pub mod submitter;

pub use address::address_of;
pub use contract::{
    join_signature, split_signature, LocalSettlement, Receipt, ResponseSubmission, Settlement,
    RECOVERY_OFFSET,
};
pub use error::SettlementError;
pub use submitter::FulfillmentSubmitter;
