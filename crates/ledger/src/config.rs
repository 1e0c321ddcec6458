//! Configuration for the ledger gateway and the access logger.
//!
//! Both structs can be built with a validating builder, deserialized (with
//! `humantime` durations), or, for the gateway, read from the process
//! environment using the variable names of the deployment scripts:
//!
//! | Variable            | Meaning                                   |
//! |---------------------|-------------------------------------------|
//! | `WEB3_PROVIDER`     | JSON-RPC endpoint URL                     |
//! | `ADMIN_PRIVATE_KEY` | hex secp256k1 key of the admin account    |
//! | `CONTRACT_ADDRESS`  | deployed consent contract, if any         |
//! | `CONTRACT_ARTIFACT` | path to an ABI/bytecode artifact JSON     |
//!
//! # Example
//!
//! ```no_run
//! use std::time::Duration;
//!
//! use ehealth_ledger::LedgerGatewayConfig;
//!
//! let config = LedgerGatewayConfig::builder()
//!     .endpoint("http://127.0.0.1:8545")
//!     .admin_private_key("0x4c0883a69102937d6231471b5dbb6204fe5129617082792ae468d01a3f362318")
//!     .read_timeout(Duration::from_secs(5))
//!     .build()?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

use std::{fmt, path::PathBuf, time::Duration};

use serde::{Deserialize, Deserializer, Serialize};
use zeroize::Zeroizing;

use crate::{address::Address, breaker::CircuitBreakerConfig, error::ConfigError};

/// Endpoint used when `WEB3_PROVIDER` is unset.
pub const DEFAULT_ENDPOINT: &str = "http://127.0.0.1:8545";

/// Default deadline for read-only calls (consent checks, nonce and gas queries).
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(10);

/// Default deadline for transaction submission.
pub const DEFAULT_WRITE_TIMEOUT: Duration = Duration::from_secs(30);

/// Default bound on waiting for a deployment receipt.
pub const DEFAULT_RECEIPT_TIMEOUT: Duration = Duration::from_secs(120);

/// Default interval between receipt polls.
pub const DEFAULT_RECEIPT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Default TCP connect timeout.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Default fixed gas limit for audit-append transactions.
pub const DEFAULT_AUDIT_GAS_LIMIT: u64 = 200_000;

/// Default safety margin added to the deployment gas estimate, in percent.
pub const DEFAULT_DEPLOY_GAS_MARGIN_PERCENT: u32 = 20;

/// Intrinsic gas of any transaction; lower limits can never be mined.
const MIN_GAS_LIMIT: u64 = 21_000;

/// Hex private key held in zeroizing memory.
#[derive(Clone)]
pub struct AdminKey(Zeroizing<String>);

impl AdminKey {
    /// Wraps a hex-encoded private key.
    #[must_use]
    pub fn new(hex: impl Into<String>) -> Self {
        Self(Zeroizing::new(hex.into()))
    }

    pub(crate) fn expose(&self) -> &str {
        self.0.as_str()
    }
}

impl fmt::Debug for AdminKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("AdminKey(<redacted>)")
    }
}

impl<'de> Deserialize<'de> for AdminKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        String::deserialize(deserializer).map(Self::new)
    }
}

impl From<String> for AdminKey {
    fn from(hex: String) -> Self {
        Self::new(hex)
    }
}

impl From<&str> for AdminKey {
    fn from(hex: &str) -> Self {
        Self::new(hex)
    }
}

/// Configuration for [`LedgerGateway`](crate::LedgerGateway).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LedgerGatewayConfig {
    #[serde(default = "default_endpoint")]
    pub(crate) endpoint: String,

    /// Never serialized.
    #[serde(default, skip_serializing)]
    pub(crate) admin_private_key: Option<AdminKey>,

    #[serde(default)]
    pub(crate) contract_address: Option<Address>,

    #[serde(default)]
    pub(crate) artifact_path: Option<PathBuf>,

    #[serde(with = "humantime_serde", default = "default_read_timeout")]
    pub(crate) read_timeout: Duration,

    #[serde(with = "humantime_serde", default = "default_write_timeout")]
    pub(crate) write_timeout: Duration,

    #[serde(with = "humantime_serde", default = "default_receipt_timeout")]
    pub(crate) receipt_timeout: Duration,

    #[serde(with = "humantime_serde", default = "default_receipt_poll_interval")]
    pub(crate) receipt_poll_interval: Duration,

    #[serde(with = "humantime_serde", default = "default_connect_timeout")]
    pub(crate) connect_timeout: Duration,

    #[serde(default = "default_audit_gas_limit")]
    pub(crate) audit_gas_limit: u64,

    #[serde(default = "default_deploy_gas_margin_percent")]
    pub(crate) deploy_gas_margin_percent: u32,

    #[serde(default)]
    pub(crate) circuit_breaker: CircuitBreakerConfig,
}

fn default_endpoint() -> String {
    DEFAULT_ENDPOINT.to_owned()
}

fn default_read_timeout() -> Duration {
    DEFAULT_READ_TIMEOUT
}

fn default_write_timeout() -> Duration {
    DEFAULT_WRITE_TIMEOUT
}

fn default_receipt_timeout() -> Duration {
    DEFAULT_RECEIPT_TIMEOUT
}

fn default_receipt_poll_interval() -> Duration {
    DEFAULT_RECEIPT_POLL_INTERVAL
}

fn default_connect_timeout() -> Duration {
    DEFAULT_CONNECT_TIMEOUT
}

fn default_audit_gas_limit() -> u64 {
    DEFAULT_AUDIT_GAS_LIMIT
}

fn default_deploy_gas_margin_percent() -> u32 {
    DEFAULT_DEPLOY_GAS_MARGIN_PERCENT
}

impl Default for LedgerGatewayConfig {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            admin_private_key: None,
            contract_address: None,
            artifact_path: None,
            read_timeout: DEFAULT_READ_TIMEOUT,
            write_timeout: DEFAULT_WRITE_TIMEOUT,
            receipt_timeout: DEFAULT_RECEIPT_TIMEOUT,
            receipt_poll_interval: DEFAULT_RECEIPT_POLL_INTERVAL,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            audit_gas_limit: DEFAULT_AUDIT_GAS_LIMIT,
            deploy_gas_margin_percent: DEFAULT_DEPLOY_GAS_MARGIN_PERCENT,
            circuit_breaker: CircuitBreakerConfig::default(),
        }
    }
}

#[bon::bon]
impl LedgerGatewayConfig {
    /// Creates a validated gateway configuration.
    ///
    /// Only the endpoint has a meaningful default; everything else is
    /// optional. Without `admin_private_key` the gateway is read-mostly and
    /// every write fails with `NoAdminAccount`. Without `contract_address`
    /// it starts unbound.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the endpoint is not an HTTP(S) URL, any
    /// timeout is zero, or the audit gas limit is below the intrinsic
    /// transaction cost.
    #[builder]
    pub fn new(
        #[builder(into, default = DEFAULT_ENDPOINT.to_owned())] endpoint: String,
        #[builder(into)] admin_private_key: Option<AdminKey>,
        contract_address: Option<Address>,
        #[builder(into)] artifact_path: Option<PathBuf>,
        #[builder(default = DEFAULT_READ_TIMEOUT)] read_timeout: Duration,
        #[builder(default = DEFAULT_WRITE_TIMEOUT)] write_timeout: Duration,
        #[builder(default = DEFAULT_RECEIPT_TIMEOUT)] receipt_timeout: Duration,
        #[builder(default = DEFAULT_RECEIPT_POLL_INTERVAL)] receipt_poll_interval: Duration,
        #[builder(default = DEFAULT_CONNECT_TIMEOUT)] connect_timeout: Duration,
        #[builder(default = DEFAULT_AUDIT_GAS_LIMIT)] audit_gas_limit: u64,
        #[builder(default = DEFAULT_DEPLOY_GAS_MARGIN_PERCENT)] deploy_gas_margin_percent: u32,
        #[builder(default)] circuit_breaker: CircuitBreakerConfig,
    ) -> Result<Self, ConfigError> {
        let config = Self {
            endpoint,
            admin_private_key,
            contract_address,
            artifact_path,
            read_timeout,
            write_timeout,
            receipt_timeout,
            receipt_poll_interval,
            connect_timeout,
            audit_gas_limit,
            deploy_gas_margin_percent,
            circuit_breaker,
        };
        config.validate()?;
        Ok(config)
    }

    /// Reads the configuration from the process environment.
    ///
    /// Empty variables count as unset, so an env file carrying a blank
    /// `CONTRACT_ADDRESS=` line starts the gateway unbound.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Like [`from_env`](Self::from_env) but reads variables through `lookup`.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let var = |key: &str| lookup(key).map(|v| v.trim().to_owned()).filter(|v| !v.is_empty());

        let contract_address = var("CONTRACT_ADDRESS")
            .map(|raw| {
                raw.parse::<Address>().map_err(|e| ConfigError::Invalid {
                    field: "contract_address",
                    reason: e.to_string(),
                })
            })
            .transpose()?;

        Self::builder()
            .maybe_endpoint(var("WEB3_PROVIDER"))
            .maybe_admin_private_key(var("ADMIN_PRIVATE_KEY").map(AdminKey::new))
            .maybe_contract_address(contract_address)
            .maybe_artifact_path(var("CONTRACT_ARTIFACT").map(PathBuf::from))
            .build()
    }

    /// Checks every invariant the builder enforces. Call this after
    /// deserializing.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.endpoint.starts_with("http://") || self.endpoint.starts_with("https://")) {
            return Err(ConfigError::Invalid {
                field: "endpoint",
                reason: format!("expected an http(s) URL, got {:?}", self.endpoint),
            });
        }
        for (field, value) in [
            ("read_timeout", self.read_timeout),
            ("write_timeout", self.write_timeout),
            ("receipt_timeout", self.receipt_timeout),
            ("receipt_poll_interval", self.receipt_poll_interval),
            ("connect_timeout", self.connect_timeout),
        ] {
            if value.is_zero() {
                return Err(ConfigError::MustBePositive { field, value: "0s".into() });
            }
        }
        if self.audit_gas_limit < MIN_GAS_LIMIT {
            return Err(ConfigError::BelowMinimum {
                field: "audit_gas_limit",
                min: MIN_GAS_LIMIT.to_string(),
                value: self.audit_gas_limit.to_string(),
            });
        }
        self.circuit_breaker.validate()
    }

    /// Returns the JSON-RPC endpoint.
    #[must_use]
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Returns `true` if an admin key is configured.
    #[must_use]
    pub fn has_admin_key(&self) -> bool {
        self.admin_private_key.is_some()
    }

    /// Returns the configured contract address.
    #[must_use]
    pub fn contract_address(&self) -> Option<Address> {
        self.contract_address
    }

    /// Returns the artifact path, if the embedded ABI is overridden.
    #[must_use]
    pub fn artifact_path(&self) -> Option<&std::path::Path> {
        self.artifact_path.as_deref()
    }

    /// Returns the read-call deadline.
    #[must_use]
    pub fn read_timeout(&self) -> Duration {
        self.read_timeout
    }

    /// Returns the submission deadline.
    #[must_use]
    pub fn write_timeout(&self) -> Duration {
        self.write_timeout
    }

    /// Returns the deployment receipt bound.
    #[must_use]
    pub fn receipt_timeout(&self) -> Duration {
        self.receipt_timeout
    }

    /// Returns the receipt poll interval.
    #[must_use]
    pub fn receipt_poll_interval(&self) -> Duration {
        self.receipt_poll_interval
    }

    /// Returns the connect timeout.
    #[must_use]
    pub fn connect_timeout(&self) -> Duration {
        self.connect_timeout
    }

    /// Returns the audit transaction gas limit.
    #[must_use]
    pub fn audit_gas_limit(&self) -> u64 {
        self.audit_gas_limit
    }

    /// Returns the deployment gas margin in percent.
    #[must_use]
    pub fn deploy_gas_margin_percent(&self) -> u32 {
        self.deploy_gas_margin_percent
    }

    /// Returns the circuit breaker thresholds.
    #[must_use]
    pub fn circuit_breaker(&self) -> &CircuitBreakerConfig {
        &self.circuit_breaker
    }
}

/// Default bound on queued audit tasks.
pub const DEFAULT_QUEUE_CAPACITY: usize = 1024;

/// Default number of submission workers.
pub const DEFAULT_WORKERS: usize = 2;

/// Default retries after the first failed submission.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Default first backoff delay.
pub const DEFAULT_INITIAL_BACKOFF: Duration = Duration::from_millis(100);

/// Default backoff ceiling.
pub const DEFAULT_MAX_BACKOFF: Duration = Duration::from_secs(10);

/// Configuration for [`AccessLogger`](crate::AccessLogger).
///
/// `max_retries = 0` gives single-attempt submission: a failed write goes
/// straight to the dead-letter store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AccessLoggerConfig {
    #[serde(default = "default_queue_capacity")]
    pub(crate) queue_capacity: usize,

    #[serde(default = "default_workers")]
    pub(crate) workers: usize,

    #[serde(default = "default_max_retries")]
    pub(crate) max_retries: u32,

    #[serde(with = "humantime_serde", default = "default_initial_backoff")]
    pub(crate) initial_backoff: Duration,

    #[serde(with = "humantime_serde", default = "default_max_backoff")]
    pub(crate) max_backoff: Duration,
}

fn default_queue_capacity() -> usize {
    DEFAULT_QUEUE_CAPACITY
}

fn default_workers() -> usize {
    DEFAULT_WORKERS
}

fn default_max_retries() -> u32 {
    DEFAULT_MAX_RETRIES
}

fn default_initial_backoff() -> Duration {
    DEFAULT_INITIAL_BACKOFF
}

fn default_max_backoff() -> Duration {
    DEFAULT_MAX_BACKOFF
}

impl Default for AccessLoggerConfig {
    fn default() -> Self {
        Self {
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            workers: DEFAULT_WORKERS,
            max_retries: DEFAULT_MAX_RETRIES,
            initial_backoff: DEFAULT_INITIAL_BACKOFF,
            max_backoff: DEFAULT_MAX_BACKOFF,
        }
    }
}

#[bon::bon]
impl AccessLoggerConfig {
    /// Creates a validated logger configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the queue capacity or worker count is zero,
    /// the initial backoff is zero while retries are enabled, or
    /// `max_backoff < initial_backoff`.
    #[builder]
    pub fn new(
        #[builder(default = DEFAULT_QUEUE_CAPACITY)] queue_capacity: usize,
        #[builder(default = DEFAULT_WORKERS)] workers: usize,
        #[builder(default = DEFAULT_MAX_RETRIES)] max_retries: u32,
        #[builder(default = DEFAULT_INITIAL_BACKOFF)] initial_backoff: Duration,
        #[builder(default = DEFAULT_MAX_BACKOFF)] max_backoff: Duration,
    ) -> Result<Self, ConfigError> {
        let config = Self { queue_capacity, workers, max_retries, initial_backoff, max_backoff };
        config.validate()?;
        Ok(config)
    }

    /// Checks every invariant the builder enforces.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.queue_capacity == 0 {
            return Err(ConfigError::BelowMinimum {
                field: "queue_capacity",
                min: "1".into(),
                value: "0".into(),
            });
        }
        if self.workers == 0 {
            return Err(ConfigError::BelowMinimum {
                field: "workers",
                min: "1".into(),
                value: "0".into(),
            });
        }
        if self.max_retries > 0 && self.initial_backoff.is_zero() {
            return Err(ConfigError::MustBePositive {
                field: "initial_backoff",
                value: "0s".into(),
            });
        }
        if self.max_backoff < self.initial_backoff {
            return Err(ConfigError::BelowMinimum {
                field: "max_backoff",
                min: format!("{:?}", self.initial_backoff),
                value: format!("{:?}", self.max_backoff),
            });
        }
        Ok(())
    }

    /// Returns the queue capacity.
    #[must_use]
    pub fn queue_capacity(&self) -> usize {
        self.queue_capacity
    }

    /// Returns the worker count.
    #[must_use]
    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Returns the retry budget per task.
    #[must_use]
    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Returns the first backoff delay.
    #[must_use]
    pub fn initial_backoff(&self) -> Duration {
        self.initial_backoff
    }

    /// Returns the backoff ceiling.
    #[must_use]
    pub fn max_backoff(&self) -> Duration {
        self.max_backoff
    }
}
