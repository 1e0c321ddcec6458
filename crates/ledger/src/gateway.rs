//! The ledger gateway: consent checks, audit appends and contract deployment.
//!
//! [`LedgerGateway`] is constructed explicitly and shared behind an `Arc`.
//! Its admin identity is fixed at construction; its contract binding moves
//! from unbound to bound at most once. Every ledger round trip is bounded by
//! a per-call-class deadline and passes through a circuit breaker, so a dead
//! endpoint degrades into fast denials instead of stalled requests.
//!
//! Failure handling differs per operation:
//!
//! | Operation                  | On failure                                   |
//! |----------------------------|----------------------------------------------|
//! | [`check_access`]           | `false` (fail closed), never an error        |
//! | [`log_access`]             | `None`, failure logged                       |
//! | [`try_log_access`]         | typed [`LedgerError`] for retry policies     |
//! | [`deploy`]                 | [`LedgerError::DeploymentFailed`], unbound   |
//!
//! [`check_access`]: LedgerGateway::check_access
//! [`log_access`]: LedgerGateway::log_access
//! [`try_log_access`]: LedgerGateway::try_log_access
//! [`deploy`]: LedgerGateway::deploy

use std::{fmt, future::Future, sync::Arc, time::Duration};

use async_trait::async_trait;
use bytes::Bytes;
use fail::fail_point;
use tokio::sync::{Mutex, OnceCell};

use crate::{
    abi,
    address::{Address, TxHash},
    breaker::{CircuitBreaker, CircuitState},
    config::LedgerGatewayConfig,
    contract::{ContractArtifact, ContractBinding},
    error::{ConfigError, LedgerError, Result},
    nonce::NonceSequencer,
    signer::AdminSigner,
    transport::{JsonRpcTransport, LedgerTransport},
    tx::{TransactionReceipt, TransactionRequest},
};

/// Outcome of a consent check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AccessDecision {
    /// The ledger reports active consent.
    Authorized,
    /// The ledger reports no consent.
    Denied,
    /// The ledger could not be consulted; treated as a denial.
    Unavailable {
        /// Why the check could not complete.
        reason: String,
    },
}

impl AccessDecision {
    /// Returns `true` only for [`AccessDecision::Authorized`].
    #[must_use]
    pub fn is_authorized(&self) -> bool {
        matches!(self, Self::Authorized)
    }
}

impl fmt::Display for AccessDecision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Authorized => f.write_str("authorized"),
            Self::Denied => f.write_str("denied"),
            Self::Unavailable { reason } => write!(f, "unavailable ({reason})"),
        }
    }
}

/// Whether the gateway holds a signing identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccountState {
    /// Writes are signed by this address.
    Loaded(Address),
    /// No admin key; every write fails with `NoAdminAccount`.
    NoAccount,
}

/// Whether the consent contract address is known.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContractState {
    /// Bound to this address for the lifetime of the gateway.
    Bound(Address),
    /// Not yet deployed or configured.
    Unbound,
}

/// Snapshot of both gateway state axes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GatewayState {
    /// Signing identity axis, fixed at construction.
    pub account: AccountState,
    /// Contract axis, one-directional.
    pub contract: ContractState,
}

/// Answers "may `doctor` read `patient`'s records right now".
#[async_trait]
pub trait ConsentOracle: Send + Sync {
    /// Performs a live consent check.
    async fn check_access_detailed(&self, patient: Address, doctor: Address) -> AccessDecision;

    /// Collapses [`check_access_detailed`](Self::check_access_detailed) to a
    /// fail-closed boolean.
    async fn check_access(&self, patient: Address, doctor: Address) -> bool {
        self.check_access_detailed(patient, doctor).await.is_authorized()
    }
}

/// Appends audit entries to the ledger.
#[async_trait]
pub trait AuditSubmitter: Send + Sync {
    /// Submits one audit entry and returns its transaction hash.
    async fn submit_audit(
        &self,
        patient: Address,
        doctor: Address,
        resource_id: &str,
    ) -> Result<TxHash>;
}

/// Shared service wrapping transport, contract binding and admin identity.
pub struct LedgerGateway {
    config: LedgerGatewayConfig,
    transport: Arc<dyn LedgerTransport>,
    binding: ContractBinding,
    signer: Option<AdminSigner>,
    nonces: Option<NonceSequencer>,
    chain_id: OnceCell<u64>,
    breaker: CircuitBreaker,
    deploy_lock: Mutex<()>,
}

impl LedgerGateway {
    /// Builds a gateway over a JSON-RPC transport to the configured endpoint.
    pub async fn connect(config: LedgerGatewayConfig) -> Result<Self> {
        let transport = JsonRpcTransport::new(config.endpoint(), config.connect_timeout())?;
        Self::initialize(config, Arc::new(transport)).await
    }

    /// Builds a gateway over `transport`.
    ///
    /// The contract artifact is read from the configured path, falling back
    /// to the embedded ABI.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::Config`] for a malformed admin key or artifact.
    /// An unreachable ledger is not an error: the gateway starts anyway and
    /// its reads fail closed until the ledger answers.
    pub async fn initialize(
        config: LedgerGatewayConfig,
        transport: Arc<dyn LedgerTransport>,
    ) -> Result<Self> {
        let artifact = match config.artifact_path() {
            Some(path) => ContractArtifact::from_file(path)?,
            None => ContractArtifact::embedded()?,
        };
        Self::initialize_with_artifact(config, transport, artifact).await
    }

    /// Like [`initialize`](Self::initialize) with an explicit artifact.
    pub async fn initialize_with_artifact(
        config: LedgerGatewayConfig,
        transport: Arc<dyn LedgerTransport>,
        artifact: ContractArtifact,
    ) -> Result<Self> {
        config.validate()?;

        let signer = config
            .admin_private_key
            .as_ref()
            .map(|key| {
                AdminSigner::from_hex(key.expose()).map_err(|e| ConfigError::Invalid {
                    field: "admin_private_key",
                    reason: e.to_string(),
                })
            })
            .transpose()?;
        let nonces = signer.as_ref().map(|s| NonceSequencer::new(s.address()));
        let binding = ContractBinding::new(artifact, config.contract_address());
        let breaker = CircuitBreaker::new(config.circuit_breaker().clone());

        let gateway = Self {
            config,
            transport,
            binding,
            signer,
            nonces,
            chain_id: OnceCell::new(),
            breaker,
            deploy_lock: Mutex::new(()),
        };

        match gateway.chain_id().await {
            Ok(chain_id) => tracing::info!(chain_id, "connected to ledger"),
            Err(e) => tracing::warn!(error = %e, "ledger unreachable at startup; reads will fail closed"),
        }
        match gateway.signer.as_ref() {
            Some(signer) => tracing::info!(account = %signer.address(), "admin account loaded"),
            None => tracing::warn!("no admin key configured; ledger writes are disabled"),
        }
        match gateway.binding.address() {
            Some(address) => tracing::info!(contract = %address, "consent contract bound"),
            None => tracing::warn!("consent contract address not configured"),
        }

        Ok(gateway)
    }

    /// Returns both state axes.
    #[must_use]
    pub fn state(&self) -> GatewayState {
        GatewayState {
            account: self
                .signer
                .as_ref()
                .map_or(AccountState::NoAccount, |s| AccountState::Loaded(s.address())),
            contract: self.binding.address().map_or(ContractState::Unbound, ContractState::Bound),
        }
    }

    /// Returns the admin address, if a key was loaded.
    #[must_use]
    pub fn admin_address(&self) -> Option<Address> {
        self.signer.as_ref().map(AdminSigner::address)
    }

    /// Returns the bound contract address.
    #[must_use]
    pub fn contract_address(&self) -> Option<Address> {
        self.binding.address()
    }

    /// Returns the configuration.
    #[must_use]
    pub fn config(&self) -> &LedgerGatewayConfig {
        &self.config
    }

    /// Returns the circuit breaker state.
    #[must_use]
    pub fn circuit_state(&self) -> CircuitState {
        self.breaker.state()
    }

    /// Checks consent and collapses the outcome to a fail-closed boolean.
    pub async fn check_access(&self, patient: Address, doctor: Address) -> bool {
        self.check_access_detailed(patient, doctor).await.is_authorized()
    }

    /// Checks consent with a live read of the contract.
    ///
    /// Never fails: an unbound contract, a transport fault, a reverted call
    /// or an undecodable answer all yield [`AccessDecision::Unavailable`].
    #[tracing::instrument(skip_all, fields(patient = %patient, doctor = %doctor))]
    pub async fn check_access_detailed(&self, patient: Address, doctor: Address) -> AccessDecision {
        fail_point!("gateway-check-access", |_| {
            AccessDecision::Unavailable { reason: "injected failure before consent check".into() }
        });

        let Some(contract) = self.binding.address() else {
            tracing::warn!("consent check failed closed: contract not bound");
            return AccessDecision::Unavailable { reason: LedgerError::ContractUnbound.to_string() };
        };

        let data = Bytes::from(abi::encode_check_access(&patient, &doctor));
        let outcome = self
            .guarded(self.config.read_timeout(), self.transport.call(contract, data))
            .await
            .and_then(|output| abi::decode_bool(&output));

        match outcome {
            Ok(true) => {
                tracing::debug!(decision = "authorized", "consent check");
                AccessDecision::Authorized
            },
            Ok(false) => {
                tracing::debug!(decision = "denied", "consent check");
                AccessDecision::Denied
            },
            Err(e) => {
                tracing::warn!(error = %e, "consent check failed closed");
                AccessDecision::Unavailable { reason: e.to_string() }
            },
        }
    }

    /// Appends an audit entry, returning `None` on any failure.
    ///
    /// Returns right after the ledger accepts the transaction; inclusion is
    /// not awaited.
    pub async fn log_access(
        &self,
        patient: Address,
        doctor: Address,
        resource_id: &str,
    ) -> Option<TxHash> {
        match self.try_log_access(patient, doctor, resource_id).await {
            Ok(hash) => Some(hash),
            Err(e) => {
                tracing::warn!(
                    patient = %patient,
                    doctor = %doctor,
                    resource_id,
                    error = %e,
                    "audit submission failed",
                );
                None
            },
        }
    }

    /// Appends an audit entry, surfacing the typed error.
    #[tracing::instrument(skip_all, fields(patient = %patient, doctor = %doctor, resource_id = resource_id))]
    pub async fn try_log_access(
        &self,
        patient: Address,
        doctor: Address,
        resource_id: &str,
    ) -> Result<TxHash> {
        let signer = self.signer.as_ref().ok_or(LedgerError::NoAdminAccount)?;
        let contract = self.binding.require_address()?;

        fail_point!("gateway-before-audit-submit", |_| {
            Err(LedgerError::transport("injected failure before audit submission"))
        });

        let chain_id = self.chain_id().await?;
        let gas_price = self.guarded(self.config.read_timeout(), self.transport.gas_price()).await?;
        let request = TransactionRequest {
            from: signer.address(),
            to: Some(contract),
            nonce: 0,
            gas_price,
            gas_limit: self.config.audit_gas_limit(),
            value: 0,
            data: Bytes::from(abi::encode_log_data_access(&patient, &doctor, resource_id)),
        };
        let hash = self.sign_and_submit(signer, request, chain_id).await?;

        tracing::info!(
            audit.action = "log_access",
            audit.patient = %patient,
            audit.doctor = %doctor,
            audit.resource = resource_id,
            audit.transaction = %hash,
            audit.timestamp = %chrono::Utc::now().to_rfc3339(),
            audit.result = "submitted",
            "audit_event"
        );
        Ok(hash)
    }

    /// Deploys the consent contract and binds the gateway to it.
    ///
    /// Blocks until a receipt confirms inclusion or the receipt timeout
    /// elapses. Concurrent calls are serialized; the loser sees
    /// [`LedgerError::AlreadyBound`].
    ///
    /// # Errors
    ///
    /// - [`LedgerError::NoAdminAccount`] without a signing identity
    /// - [`LedgerError::AlreadyBound`] if an address is already bound
    /// - [`LedgerError::DeploymentFailed`] for any signing, submission or
    ///   confirmation failure; the gateway stays unbound
    #[tracing::instrument(skip_all)]
    pub async fn deploy(&self) -> Result<Address> {
        let signer = self.signer.as_ref().ok_or(LedgerError::NoAdminAccount)?;
        let _serialized = self.deploy_lock.lock().await;

        if let Some(address) = self.binding.address() {
            return Err(LedgerError::AlreadyBound { address: address.to_string() });
        }

        let address = match self.deploy_unlocked(signer).await {
            Ok(address) => address,
            Err(e) => {
                tracing::error!(error = %e, "consent contract deployment failed");
                return Err(match e {
                    LedgerError::DeploymentFailed { .. } => e,
                    other => LedgerError::deployment_failed(other.to_string()),
                });
            },
        };

        self.binding.bind(address)?;
        tracing::info!(contract = %address, "consent contract deployed");
        Ok(address)
    }

    async fn deploy_unlocked(&self, signer: &AdminSigner) -> Result<Address> {
        let bytecode = self
            .binding
            .artifact()
            .bytecode()
            .ok_or_else(|| LedgerError::deployment_failed("contract artifact has no bytecode"))?;

        let chain_id = self.chain_id().await?;
        let gas_price = self.guarded(self.config.read_timeout(), self.transport.gas_price()).await?;
        let mut request = TransactionRequest {
            from: signer.address(),
            to: None,
            nonce: 0,
            gas_price,
            gas_limit: 0,
            value: 0,
            data: Bytes::copy_from_slice(bytecode),
        };
        let estimate =
            self.guarded(self.config.read_timeout(), self.transport.estimate_gas(&request)).await?;
        request.gas_limit = with_margin(estimate, self.config.deploy_gas_margin_percent());

        fail_point!("gateway-before-deploy-submit", |_| {
            Err(LedgerError::transport("injected failure before deployment submission"))
        });

        let hash = self.sign_and_submit(signer, request, chain_id).await?;
        tracing::info!(transaction = %hash, "deployment submitted; awaiting receipt");

        let receipt = self.await_receipt(hash).await?;
        if !receipt.status {
            return Err(LedgerError::deployment_failed(format!(
                "deployment transaction {hash} reverted"
            )));
        }
        receipt
            .contract_address
            .ok_or_else(|| LedgerError::deployment_failed("receipt carries no contract address"))
    }

    async fn await_receipt(&self, hash: TxHash) -> Result<TransactionReceipt> {
        let deadline = self.config.receipt_timeout();
        let poll = async {
            loop {
                match self
                    .guarded(self.config.read_timeout(), self.transport.transaction_receipt(hash))
                    .await
                {
                    Ok(Some(receipt)) => return Ok(receipt),
                    Ok(None) => {},
                    Err(e) if e.is_retryable() => {
                        tracing::debug!(error = %e, "receipt poll failed; retrying");
                    },
                    Err(e) => return Err(e),
                }
                tokio::time::sleep(self.config.receipt_poll_interval()).await;
            }
        };
        tokio::time::timeout(deadline, poll)
            .await
            .map_err(|_| LedgerError::Timeout { elapsed: deadline })?
    }

    /// Allocates a nonce, signs and submits. Any failure after allocation
    /// invalidates the sequencer so the next write re-seeds from the ledger.
    async fn sign_and_submit(
        &self,
        signer: &AdminSigner,
        mut request: TransactionRequest,
        chain_id: u64,
    ) -> Result<TxHash> {
        let sequencer = self.nonces.as_ref().ok_or(LedgerError::NoAdminAccount)?;
        request.nonce = self
            .guarded(self.config.read_timeout(), sequencer.allocate(self.transport.as_ref()))
            .await?;
        let nonce = request.nonce;

        let result = match request.sign(signer, chain_id) {
            Ok(signed) => {
                self.guarded(self.config.write_timeout(), self.transport.send_transaction(&signed))
                    .await
            },
            Err(e) => Err(e),
        };
        if result.is_err() {
            sequencer.invalidate(nonce).await;
        }
        result
    }

    async fn chain_id(&self) -> Result<u64> {
        self.chain_id
            .get_or_try_init(|| self.guarded(self.config.read_timeout(), self.transport.chain_id()))
            .await
            .copied()
    }

    /// Runs one ledger round trip under the breaker and a deadline.
    async fn guarded<T>(
        &self,
        deadline: Duration,
        call: impl Future<Output = Result<T>> + Send,
    ) -> Result<T> {
        if !self.breaker.allow_request() {
            return Err(LedgerError::CircuitOpen);
        }
        let result = match tokio::time::timeout(deadline, call).await {
            Ok(result) => result,
            Err(_) => Err(LedgerError::Timeout { elapsed: deadline }),
        };
        match &result {
            Err(LedgerError::Transport { .. } | LedgerError::Timeout { .. }) => {
                self.breaker.record_failure();
            },
            // The node answered, even if with an error.
            _ => self.breaker.record_success(),
        }
        result
    }
}

/// Scales `estimate` up by `percent`, clamping at `u64::MAX`.
fn with_margin(estimate: u64, percent: u32) -> u64 {
    let scaled = u128::from(estimate) * (100 + u128::from(percent)) / 100;
    u64::try_from(scaled).unwrap_or(u64::MAX)
}

impl fmt::Debug for LedgerGateway {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LedgerGateway")
            .field("endpoint", &self.config.endpoint())
            .field("state", &self.state())
            .field("circuit", &self.breaker.state())
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl ConsentOracle for LedgerGateway {
    async fn check_access_detailed(&self, patient: Address, doctor: Address) -> AccessDecision {
        LedgerGateway::check_access_detailed(self, patient, doctor).await
    }
}

#[async_trait]
impl AuditSubmitter for LedgerGateway {
    async fn submit_audit(
        &self,
        patient: Address,
        doctor: Address,
        resource_id: &str,
    ) -> Result<TxHash> {
        self.try_log_access(patient, doctor, resource_id).await
    }
}

/// Idempotent, shareable gateway construction.
///
/// The first successful initialization wins; later and concurrent callers
/// receive the same instance. A failed initialization leaves the cell empty
/// so a later call can retry.
#[derive(Debug, Default)]
pub struct GatewayCell {
    cell: OnceCell<Arc<LedgerGateway>>,
}

impl GatewayCell {
    /// Creates an empty cell, usable in a `static`.
    #[must_use]
    pub const fn new() -> Self {
        Self { cell: OnceCell::const_new() }
    }

    /// Returns the gateway, running `init` if none exists yet.
    pub async fn get_or_initialize<F, Fut>(&self, init: F) -> Result<Arc<LedgerGateway>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<LedgerGateway>>,
    {
        self.cell.get_or_try_init(|| async { init().await.map(Arc::new) }).await.cloned()
    }

    /// Returns the gateway if one was initialized.
    #[must_use]
    pub fn get(&self) -> Option<Arc<LedgerGateway>> {
        self.cell.get().cloned()
    }
}
