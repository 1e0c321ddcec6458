//! Consent-gated access to patient records.
//!
//! [`RecordAccessService`] composes the ledger gateway, the access logger,
//! wallet bindings and the record store into the operations request
//! handlers call: a doctor viewing a patient's records, a doctor issuing a
//! prescription, and a patient uploading a self-reported record.
//!
//! # Wiring
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use ehealth_access::RecordAccessService;
//! use ehealth_ledger::{
//!     AccessLogger, AccessLoggerConfig, LedgerGateway, LedgerGatewayConfig, MemoryDeadLetterStore,
//! };
//! use ehealth_records::{MemoryAppointmentStore, MemoryRecordStore};
//! use ehealth_wallet::MemoryWalletBindingStore;
//!
//! # async fn wire() -> Result<(), Box<dyn std::error::Error>> {
//! let gateway = Arc::new(LedgerGateway::connect(LedgerGatewayConfig::from_env()?).await?);
//! let logger = Arc::new(AccessLogger::start(
//!     AccessLoggerConfig::default(),
//!     gateway.clone(),
//!     Arc::new(MemoryDeadLetterStore::new()),
//! ));
//! let service = RecordAccessService::builder()
//!     .wallets(Arc::new(MemoryWalletBindingStore::new()))
//!     .consent(gateway)
//!     .audit(logger)
//!     .records(Arc::new(MemoryRecordStore::new()))
//!     .appointments(Arc::new(MemoryAppointmentStore::new()))
//!     .build();
//! # let _ = service;
//! # Ok(())
//! # }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod error;
pub mod service;

/// Error types.
pub use error::{AccessError, Result};
/// The access service.
pub use service::{
    IssuedRecord, PrescriptionRequest, RecordAccessService, view_records_resource,
};
