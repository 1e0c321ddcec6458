//! In-memory ledger double for gateway and logger tests.
//!
//! [`MockLedger`] implements [`LedgerTransport`] with just enough ledger
//! semantics to exercise the gateway: per-account nonces that reject
//! reuse (out-of-order arrival is accepted, as a node's queue would),
//! contract creation at the derived address, a consent table
//! answering `checkAccess`, and an audit trail decoded from
//! `logDataAccess` submissions. Knobs simulate outages, slow responses,
//! rejected submissions and reverted deployments.
//!
//! Enable the `testutil` feature to use it from another crate:
//!
//! ```toml
//! [dev-dependencies]
//! ehealth-ledger = { path = "../ledger", features = ["testutil"] }
//! ```

use std::{
    collections::{BTreeSet, HashMap, HashSet},
    sync::Arc,
    time::Duration,
};

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;

use crate::{
    abi,
    address::{Address, TxHash},
    error::{LedgerError, Result},
    transport::{LedgerTransport, SERVER_ERROR_CODE},
    tx::{SignedTransaction, TransactionReceipt, TransactionRequest},
};

/// Chain id reported by [`MockLedger::new`].
pub const MOCK_CHAIN_ID: u64 = 1337;

/// Gas price reported by the mock, in wei.
pub const MOCK_GAS_PRICE: u128 = 1_000_000_000;

/// Gas estimate the mock returns for deployments.
pub const MOCK_DEPLOY_GAS: u64 = 1_000_000;

/// Gas estimate the mock returns for contract calls.
pub const MOCK_CALL_GAS: u64 = 60_000;

/// An audit entry the mock ledger accepted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedAudit {
    /// Patient address argument.
    pub patient: Address,
    /// Doctor address argument.
    pub doctor: Address,
    /// Resource identifier argument.
    pub resource_id: String,
    /// Hash of the accepted transaction.
    pub transaction_hash: TxHash,
}

/// Nonces below `floor` count as consumed elsewhere.
#[derive(Debug, Default)]
struct Account {
    floor: u64,
    used: BTreeSet<u64>,
}

impl Account {
    fn pending(&self) -> u64 {
        self.used.last().map_or(self.floor, |last| self.floor.max(last + 1))
    }
}

#[derive(Debug, Default)]
struct State {
    consents: HashSet<(Address, Address)>,
    accounts: HashMap<Address, Account>,
    contracts: HashSet<Address>,
    accepted: Vec<SignedTransaction>,
    receipts: HashMap<TxHash, TransactionReceipt>,
    audits: Vec<RecordedAudit>,
    block: u64,
    unreachable: bool,
    failing_sends: u32,
    revert_deployments: bool,
    withhold_receipts: bool,
    latency: Option<Duration>,
    calls: u64,
}

/// An in-memory stand-in for a JSON-RPC ledger node.
#[derive(Debug)]
pub struct MockLedger {
    chain_id: u64,
    state: Mutex<State>,
}

impl Default for MockLedger {
    fn default() -> Self {
        Self::new()
    }
}

impl MockLedger {
    /// Creates an empty ledger with [`MOCK_CHAIN_ID`].
    #[must_use]
    pub fn new() -> Self {
        Self { chain_id: MOCK_CHAIN_ID, state: Mutex::new(State::default()) }
    }

    /// Convenience for sharing the mock with a gateway.
    #[must_use]
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Marks a contract as already deployed by `deployer`, consuming one of
    /// its nonces, and returns the contract address.
    pub fn install_contract(&self, deployer: Address) -> Address {
        let mut state = self.state.lock();
        let account = state.accounts.entry(deployer).or_default();
        let nonce = account.pending();
        account.used.insert(nonce);
        let address = Address::contract_address(&deployer, nonce);
        state.contracts.insert(address);
        address
    }

    /// Records consent from `patient` to `doctor`.
    pub fn grant(&self, patient: Address, doctor: Address) {
        self.state.lock().consents.insert((patient, doctor));
    }

    /// Withdraws consent from `patient` to `doctor`.
    pub fn revoke(&self, patient: Address, doctor: Address) {
        self.state.lock().consents.remove(&(patient, doctor));
    }

    /// Makes every call fail as if the endpoint were down.
    pub fn set_unreachable(&self, unreachable: bool) {
        self.state.lock().unreachable = unreachable;
    }

    /// Rejects the next `count` submissions with a retryable pool error.
    pub fn fail_next_sends(&self, count: u32) {
        self.state.lock().failing_sends = count;
    }

    /// Makes deployment receipts report a reverted execution.
    pub fn set_revert_deployments(&self, revert: bool) {
        self.state.lock().revert_deployments = revert;
    }

    /// Keeps every receipt pending.
    pub fn set_withhold_receipts(&self, withhold: bool) {
        self.state.lock().withhold_receipts = withhold;
    }

    /// Delays every call by `latency` before it is processed.
    pub fn set_latency(&self, latency: Option<Duration>) {
        self.state.lock().latency = latency;
    }

    /// Marks every nonce of `account` below `nonce` as consumed, as if
    /// another client had been sending with the same key.
    pub fn set_pending_nonce(&self, account: Address, nonce: u64) {
        self.state.lock().accounts.entry(account).or_default().floor = nonce;
    }

    /// Returns the pending transaction count of `account`.
    #[must_use]
    pub fn pending_nonce(&self, account: Address) -> u64 {
        self.state.lock().accounts.get(&account).map_or(0, Account::pending)
    }

    /// Returns every accepted transaction, in acceptance order.
    #[must_use]
    pub fn accepted_transactions(&self) -> Vec<SignedTransaction> {
        self.state.lock().accepted.clone()
    }

    /// Returns every accepted audit entry, in acceptance order.
    #[must_use]
    pub fn audit_entries(&self) -> Vec<RecordedAudit> {
        self.state.lock().audits.clone()
    }

    /// Returns `true` if a contract exists at `address`.
    #[must_use]
    pub fn has_contract(&self, address: Address) -> bool {
        self.state.lock().contracts.contains(&address)
    }

    /// Returns how many transport calls reached the mock.
    #[must_use]
    pub fn call_count(&self) -> u64 {
        self.state.lock().calls
    }

    /// Applies latency and the outage switch shared by every call.
    async fn enter(&self) -> Result<()> {
        let latency = self.state.lock().latency;
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
        let mut state = self.state.lock();
        state.calls += 1;
        if state.unreachable {
            return Err(LedgerError::transport("connection refused"));
        }
        Ok(())
    }
}

#[async_trait]
impl LedgerTransport for MockLedger {
    async fn call(&self, to: Address, data: Bytes) -> Result<Bytes> {
        self.enter().await?;
        let state = self.state.lock();
        // Calls to an address without code return empty output.
        if !state.contracts.contains(&to) {
            return Ok(Bytes::new());
        }
        if data.len() < 4 || data[..4] != abi::selector(abi::CHECK_ACCESS_SIGNATURE) {
            return Err(LedgerError::Rpc { code: 3, message: "execution reverted".into() });
        }
        let pair = abi::decode_address_pair(&data)?;
        Ok(Bytes::from(abi::encode_bool(state.consents.contains(&pair))))
    }

    async fn transaction_count(&self, address: Address) -> Result<u64> {
        self.enter().await?;
        Ok(self.pending_nonce(address))
    }

    async fn gas_price(&self) -> Result<u128> {
        self.enter().await?;
        Ok(MOCK_GAS_PRICE)
    }

    async fn estimate_gas(&self, request: &TransactionRequest) -> Result<u64> {
        self.enter().await?;
        Ok(if request.to.is_none() { MOCK_DEPLOY_GAS } else { MOCK_CALL_GAS })
    }

    async fn chain_id(&self) -> Result<u64> {
        self.enter().await?;
        Ok(self.chain_id)
    }

    async fn send_transaction(&self, tx: &SignedTransaction) -> Result<TxHash> {
        self.enter().await?;
        let mut state = self.state.lock();

        if state.failing_sends > 0 {
            state.failing_sends -= 1;
            return Err(LedgerError::Rpc {
                code: SERVER_ERROR_CODE,
                message: "transaction pool is full".into(),
            });
        }

        let request = tx.request();
        let account = state.accounts.entry(request.from).or_default();
        if request.nonce < account.floor || account.used.contains(&request.nonce) {
            return Err(LedgerError::SequenceConflict {
                nonce: request.nonce,
                message: format!("nonce too low: next nonce {}", account.pending()),
            });
        }
        account.used.insert(request.nonce);
        state.block += 1;

        let hash = tx.hash();
        let mut receipt = TransactionReceipt {
            transaction_hash: hash,
            block_number: state.block,
            status: true,
            contract_address: None,
        };

        match request.to {
            None if state.revert_deployments => receipt.status = false,
            None => {
                let address = Address::contract_address(&request.from, request.nonce);
                state.contracts.insert(address);
                receipt.contract_address = Some(address);
            },
            Some(_) => {
                if let Ok((patient, doctor, resource_id)) =
                    abi::decode_log_data_access(&request.data)
                {
                    state.audits.push(RecordedAudit {
                        patient,
                        doctor,
                        resource_id,
                        transaction_hash: hash,
                    });
                }
            },
        }

        state.receipts.insert(hash, receipt);
        state.accepted.push(tx.clone());
        Ok(hash)
    }

    async fn transaction_receipt(&self, hash: TxHash) -> Result<Option<TransactionReceipt>> {
        self.enter().await?;
        let state = self.state.lock();
        if state.withhold_receipts {
            return Ok(None);
        }
        Ok(state.receipts.get(&hash).cloned())
    }
}
