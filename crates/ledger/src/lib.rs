//! Consent-contract gateway for the E-Health ledger.
//!
//! This crate answers one question on the request path, "has this patient
//! granted this doctor access?", by reading the consent contract, and records
//! every released read as an on-ledger audit entry without making the caller
//! wait for it.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                  Request handlers (callers)                  │
//! ├──────────────────────────────┬───────────────────────────────┤
//! │   ConsentOracle (blocking)   │  AccessLogger (queue+workers) │
//! ├──────────────────────────────┴───────────────────────────────┤
//! │                        LedgerGateway                         │
//! │   ContractBinding │ AdminSigner │ NonceSequencer │ Breaker   │
//! ├──────────────────────────────────────────────────────────────┤
//! │                    LedgerTransport trait                     │
//! ├────────────────────────────┬─────────────────────────────────┤
//! │  JsonRpcTransport (HTTP)   │     MockLedger (testutil)       │
//! └────────────────────────────┴─────────────────────────────────┘
//! ```
//!
//! # Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use ehealth_ledger::{
//!     AccessLogger, AccessLoggerConfig, Address, LedgerGateway, LedgerGatewayConfig,
//!     MemoryDeadLetterStore,
//! };
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let gateway = Arc::new(LedgerGateway::connect(LedgerGatewayConfig::from_env()?).await?);
//!     let logger = AccessLogger::start(
//!         AccessLoggerConfig::default(),
//!         gateway.clone(),
//!         Arc::new(MemoryDeadLetterStore::new()),
//!     );
//!
//!     let patient: Address = "0x1111111111111111111111111111111111111111".parse()?;
//!     let doctor: Address = "0x2222222222222222222222222222222222222222".parse()?;
//!     if gateway.check_access(patient, doctor).await {
//!         logger.dispatch(patient, doctor, format!("View Records of {patient}")).await;
//!     }
//!
//!     logger.shutdown(std::time::Duration::from_secs(5)).await;
//!     Ok(())
//! }
//! ```
//!
//! # Failure Semantics
//!
//! Reads fail closed: an unbound contract, an unreachable node, or a
//! reverted call all deny. Audit writes never block the caller; what cannot
//! be delivered lands in a [`DeadLetterStore`]. Only [`LedgerGateway::deploy`]
//! waits for a receipt.
//!
//! # Feature Flags
//!
//! - **`testutil`**: Exposes [`testutil::MockLedger`], an in-memory transport, to other crates'
//!   tests.
//! - **`failpoints`**: Compiles `fail` fail points into the gateway.

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod abi;
pub mod address;
pub mod bootstrap;
pub mod breaker;
pub mod config;
pub mod contract;
pub mod error;
pub mod gateway;
pub mod logger;
pub mod nonce;
mod rlp;
pub mod signer;
#[cfg(any(test, feature = "testutil"))]
#[allow(clippy::expect_used)]
pub mod testutil;
pub mod transport;
pub mod tx;

/// Ledger addresses and transaction hashes.
pub use address::{Address, TxHash, keccak256};
/// Deployment bootstrap helpers.
pub use bootstrap::{
    CONTRACT_ADDRESS_KEY, ensure_deployed, load_gateway_config, persist_contract_address,
};
/// Circuit breaker guarding ledger round trips.
pub use breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitState};
/// Gateway and logger configuration.
pub use config::{AccessLoggerConfig, AdminKey, LedgerGatewayConfig};
/// Contract artifact and write-once binding.
pub use contract::{ContractArtifact, ContractBinding};
/// Error types.
pub use error::{BoxError, ConfigError, LedgerError, Result};
/// The gateway and its service traits.
pub use gateway::{
    AccessDecision, AccountState, AuditSubmitter, ConsentOracle, ContractState, GatewayCell,
    GatewayState, LedgerGateway,
};
/// Asynchronous audit submission.
pub use logger::{
    AccessLogger, AccessLoggerStats, AuditTask, DeadLetter, DeadLetterReason, DeadLetterStore,
    MemoryDeadLetterStore,
};
/// Nonce allocation for the admin account.
pub use nonce::NonceSequencer;
/// Signatures and the admin signing identity.
pub use signer::{AdminSigner, RecoverableSignature, personal_message_hash, recover_personal_signer};
/// Ledger transport seam and its JSON-RPC implementation.
pub use transport::{JsonRpcTransport, LedgerTransport};
/// Transactions and receipts.
pub use tx::{SignedTransaction, TransactionReceipt, TransactionRequest};
