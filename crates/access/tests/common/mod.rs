//! Shared wiring for access-service integration tests.

#![allow(dead_code, clippy::unwrap_used)]

use std::{sync::Arc, time::Duration};

use ehealth_access::RecordAccessService;
use ehealth_ledger::{
    AccessLogger, AccessLoggerConfig, AdminSigner, LedgerGateway, LedgerGatewayConfig,
    MemoryDeadLetterStore, testutil::MockLedger,
};
use ehealth_records::{
    Appointment, AppointmentStatus, ClinicalContent, MemoryAppointmentStore, MemoryRecordStore,
    Medicine,
};
use ehealth_wallet::{MemoryWalletBindingStore, UserId, WalletLinker, challenge_message};

pub const ADMIN_KEY: &str = "0x4c0883a69102937d6231471b5dbb6204fe5129617082792ae468d01a3f362318";

pub struct Harness {
    pub ledger: Arc<MockLedger>,
    pub gateway: Arc<LedgerGateway>,
    pub logger: Arc<AccessLogger>,
    pub dead_letters: Arc<MemoryDeadLetterStore>,
    pub linker: WalletLinker,
    pub records: Arc<MemoryRecordStore>,
    pub appointments: Arc<MemoryAppointmentStore>,
    pub service: RecordAccessService,
}

pub struct Options {
    pub admin: bool,
    pub bound: bool,
    pub logger: AccessLoggerConfig,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            admin: true,
            bound: true,
            logger: AccessLoggerConfig::builder()
                .max_retries(1)
                .initial_backoff(Duration::from_millis(5))
                .max_backoff(Duration::from_millis(20))
                .build()
                .unwrap(),
        }
    }
}

impl Harness {
    pub async fn new() -> Self {
        Self::with(Options::default()).await
    }

    pub async fn with(options: Options) -> Self {
        let ledger = MockLedger::shared();
        let admin = AdminSigner::from_hex(ADMIN_KEY).unwrap().address();
        let contract = ledger.install_contract(admin);

        let config = LedgerGatewayConfig::builder()
            .maybe_admin_private_key(options.admin.then_some(ADMIN_KEY))
            .maybe_contract_address(options.bound.then_some(contract))
            .build()
            .unwrap();
        let gateway = Arc::new(LedgerGateway::initialize(config, ledger.clone()).await.unwrap());

        let dead_letters = Arc::new(MemoryDeadLetterStore::new());
        let logger =
            Arc::new(AccessLogger::start(options.logger, gateway.clone(), dead_letters.clone()));

        let wallets = Arc::new(MemoryWalletBindingStore::new());
        let records = Arc::new(MemoryRecordStore::new());
        let appointments = Arc::new(MemoryAppointmentStore::new());
        let service = RecordAccessService::builder()
            .wallets(wallets.clone())
            .consent(gateway.clone())
            .audit(logger.clone())
            .records(records.clone())
            .appointments(appointments.clone())
            .build();

        Self {
            ledger,
            gateway,
            logger,
            dead_letters,
            linker: WalletLinker::new(wallets),
            records,
            appointments,
            service,
        }
    }

    /// Links a fresh wallet to `user` through the signature challenge.
    pub async fn link(&self, user: &UserId) -> AdminSigner {
        let wallet = AdminSigner::random();
        let signature = wallet.sign_personal_message(&challenge_message(user)).unwrap();
        self.linker
            .link_wallet(user, &wallet.address().to_checksum(), &signature.to_hex())
            .await
            .unwrap();
        wallet
    }

    /// Waits for every queued audit entry to be delivered or dead-lettered.
    pub async fn drain(&self) {
        self.logger.shutdown(Duration::from_secs(5)).await;
    }

    pub fn accept_appointment(&self, id: &str, patient: &UserId, doctor: &UserId) {
        self.appointments.upsert(Appointment {
            id: id.into(),
            patient_id: patient.to_string(),
            doctor_id: doctor.to_string(),
            hospital_id: "hospital-7".into(),
            status: AppointmentStatus::Accepted,
        });
    }
}

pub fn user(id: &str) -> UserId {
    UserId::new(id).unwrap()
}

pub fn content(diagnosis: &str) -> ClinicalContent {
    ClinicalContent {
        diagnosis: diagnosis.into(),
        medicines: vec![Medicine {
            name: "Paracetamol".into(),
            dosage: "500mg".into(),
            frequency: "every 6 hours".into(),
            duration: "3 days".into(),
        }],
        notes: None,
    }
}
