//! Ledger transport: the JSON-RPC primitives the gateway is built on.
//!
//! [`LedgerTransport`] is the seam between the gateway and the network. The
//! production implementation, [`JsonRpcTransport`], speaks Ethereum JSON-RPC
//! over HTTP; tests substitute an in-memory ledger (see `testutil`).

use std::{
    sync::atomic::{AtomicU64, Ordering},
    time::Duration,
};

use async_trait::async_trait;
use bytes::Bytes;
use serde_json::{Value, json};

use crate::{
    address::{Address, TxHash, decode_hex},
    error::{LedgerError, Result},
    tx::{SignedTransaction, TransactionReceipt, TransactionRequest},
};

/// JSON-RPC code most nodes use for generic server-side failures.
pub(crate) const SERVER_ERROR_CODE: i64 = -32000;

/// Node messages that mean the nonce was already consumed or is in flight.
const SEQUENCE_CONFLICT_MARKERS: [&str; 4] =
    ["nonce too low", "already known", "replacement transaction underpriced", "nonce has already been used"];

/// Primitive ledger operations.
///
/// Implementations are stateless with respect to consent: every call is a
/// live round trip. Timeouts and circuit breaking are applied by the caller.
#[async_trait]
pub trait LedgerTransport: Send + Sync + 'static {
    /// Executes a read-only contract call and returns the raw output.
    async fn call(&self, to: Address, data: Bytes) -> Result<Bytes>;

    /// Returns the account's transaction count, including pending transactions.
    async fn transaction_count(&self, address: Address) -> Result<u64>;

    /// Returns the current gas price in wei.
    async fn gas_price(&self) -> Result<u128>;

    /// Estimates the gas a transaction would consume.
    async fn estimate_gas(&self, request: &TransactionRequest) -> Result<u64>;

    /// Returns the chain id used for replay protection.
    async fn chain_id(&self) -> Result<u64>;

    /// Submits a signed transaction and returns its hash once accepted into
    /// the pool. Does not wait for inclusion.
    async fn send_transaction(&self, tx: &SignedTransaction) -> Result<TxHash>;

    /// Returns the receipt for `hash`, or `None` while it is still pending.
    async fn transaction_receipt(&self, hash: TxHash) -> Result<Option<TransactionReceipt>>;
}

/// [`LedgerTransport`] over HTTP JSON-RPC.
#[derive(Debug)]
pub struct JsonRpcTransport {
    client: reqwest::Client,
    endpoint: String,
    next_id: AtomicU64,
}

impl JsonRpcTransport {
    /// Creates a transport for `endpoint`.
    ///
    /// No connection is made here; an unreachable endpoint surfaces as a
    /// [`LedgerError::Transport`] on first use.
    pub fn new(endpoint: impl Into<String>, connect_timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(connect_timeout)
            .build()
            .map_err(|e| LedgerError::transport_with_source("failed to build HTTP client", e))?;
        Ok(Self { client, endpoint: endpoint.into(), next_id: AtomicU64::new(1) })
    }

    /// Returns the endpoint URL.
    #[must_use]
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn request(&self, method: &'static str, params: Value) -> Result<Value> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let body = json!({ "jsonrpc": "2.0", "id": id, "method": method, "params": params });

        tracing::trace!(method, id, "ledger rpc request");

        let response = self
            .client
            .post(&self.endpoint)
            .json(&body)
            .send()
            .await
            .map_err(|e| LedgerError::transport_with_source(format!("{method} failed"), e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(LedgerError::transport(format!("{method} returned HTTP {status}")));
        }

        let payload: Value = response.json().await.map_err(|e| {
            LedgerError::transport_with_source(format!("{method} returned malformed JSON"), e)
        })?;
        into_result(payload)
    }
}

#[async_trait]
impl LedgerTransport for JsonRpcTransport {
    async fn call(&self, to: Address, data: Bytes) -> Result<Bytes> {
        let params = json!([{ "to": to.to_string(), "data": hex_data(&data) }, "latest"]);
        let result = self.request("eth_call", params).await?;
        parse_data(&result).map(Bytes::from)
    }

    async fn transaction_count(&self, address: Address) -> Result<u64> {
        let result =
            self.request("eth_getTransactionCount", json!([address.to_string(), "pending"])).await?;
        parse_u64(&result)
    }

    async fn gas_price(&self) -> Result<u128> {
        let result = self.request("eth_gasPrice", json!([])).await?;
        parse_quantity(&result)
    }

    async fn estimate_gas(&self, request: &TransactionRequest) -> Result<u64> {
        let mut call = json!({ "from": request.from.to_string(), "data": hex_data(&request.data) });
        if let Some(to) = request.to {
            call["to"] = Value::String(to.to_string());
        }
        if request.value > 0 {
            call["value"] = Value::String(format!("{:#x}", request.value));
        }
        let result = self.request("eth_estimateGas", json!([call])).await?;
        parse_u64(&result)
    }

    async fn chain_id(&self) -> Result<u64> {
        let result = self.request("eth_chainId", json!([])).await?;
        parse_u64(&result)
    }

    async fn send_transaction(&self, tx: &SignedTransaction) -> Result<TxHash> {
        let result = self
            .request("eth_sendRawTransaction", json!([hex_data(tx.raw())]))
            .await
            .map_err(|e| classify_send_error(e, tx.nonce()))?;
        let text = result
            .as_str()
            .ok_or_else(|| LedgerError::encoding("transaction hash is not a string"))?;
        text.parse()
    }

    async fn transaction_receipt(&self, hash: TxHash) -> Result<Option<TransactionReceipt>> {
        let result = self.request("eth_getTransactionReceipt", json!([hash.to_string()])).await?;
        if result.is_null() {
            return Ok(None);
        }
        parse_receipt(&result).map(Some)
    }
}

fn hex_data(data: &[u8]) -> String {
    format!("0x{}", hex::encode(data))
}

/// Splits a JSON-RPC response envelope into its result or error.
fn into_result(mut payload: Value) -> Result<Value> {
    if let Some(error) = payload.get("error").filter(|e| !e.is_null()) {
        let code = error.get("code").and_then(Value::as_i64).unwrap_or(SERVER_ERROR_CODE);
        let message = error.get("message").and_then(Value::as_str).unwrap_or("unknown error");
        return Err(LedgerError::Rpc { code, message: message.to_owned() });
    }
    match payload.get_mut("result") {
        Some(result) => Ok(result.take()),
        None => Err(LedgerError::encoding("response has neither result nor error")),
    }
}

/// Maps nonce-related submission rejections onto [`LedgerError::SequenceConflict`].
fn classify_send_error(error: LedgerError, nonce: u64) -> LedgerError {
    match error {
        LedgerError::Rpc { message, .. }
            if SEQUENCE_CONFLICT_MARKERS
                .iter()
                .any(|marker| message.to_ascii_lowercase().contains(marker)) =>
        {
            LedgerError::SequenceConflict { nonce, message }
        },
        other => other,
    }
}

fn parse_quantity(value: &Value) -> Result<u128> {
    let text = value
        .as_str()
        .ok_or_else(|| LedgerError::encoding(format!("expected hex quantity, got {value}")))?;
    let digits = text
        .strip_prefix("0x")
        .ok_or_else(|| LedgerError::encoding(format!("quantity {text:?} lacks 0x prefix")))?;
    if digits.is_empty() {
        return Err(LedgerError::encoding("empty quantity"));
    }
    u128::from_str_radix(digits, 16)
        .map_err(|e| LedgerError::encoding(format!("invalid quantity {text:?}: {e}")))
}

fn parse_u64(value: &Value) -> Result<u64> {
    let quantity = parse_quantity(value)?;
    u64::try_from(quantity)
        .map_err(|_| LedgerError::encoding(format!("quantity {quantity} does not fit in u64")))
}

fn parse_data(value: &Value) -> Result<Vec<u8>> {
    let text = value
        .as_str()
        .ok_or_else(|| LedgerError::encoding(format!("expected hex data, got {value}")))?;
    decode_hex(text)
}

fn parse_receipt(value: &Value) -> Result<TransactionReceipt> {
    let field = |name: &str| {
        value.get(name).ok_or_else(|| LedgerError::encoding(format!("receipt missing '{name}'")))
    };

    let transaction_hash = field("transactionHash")?
        .as_str()
        .ok_or_else(|| LedgerError::encoding("receipt transactionHash is not a string"))?
        .parse()?;
    let block_number = parse_u64(field("blockNumber")?)?;
    // Pre-Byzantium receipts carry no status; treat them as successful.
    let status = match value.get("status") {
        Some(Value::Null) | None => true,
        Some(status) => parse_quantity(status)? == 1,
    };
    let contract_address = match value.get("contractAddress") {
        Some(Value::String(text)) => Some(text.parse()?),
        _ => None,
    };

    Ok(TransactionReceipt { transaction_hash, block_number, status, contract_address })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case::zero("0x0", 0)]
    #[case::small("0x1a", 26)]
    #[case::gwei("0x4a817c800", 20_000_000_000)]
    fn quantities(#[case] text: &str, #[case] expected: u128) {
        assert_eq!(parse_quantity(&json!(text)).unwrap(), expected);
    }

    #[rstest]
    #[case::no_prefix(json!("1a"))]
    #[case::empty(json!("0x"))]
    #[case::not_hex(json!("0xzz"))]
    #[case::number(json!(26))]
    fn malformed_quantities(#[case] value: Value) {
        assert!(matches!(parse_quantity(&value), Err(LedgerError::Encoding(_))));
    }

    #[test]
    fn envelope_error_becomes_rpc_error() {
        let payload = json!({
            "jsonrpc": "2.0",
            "id": 1,
            "error": { "code": -32601, "message": "method not found" }
        });
        let err = into_result(payload).unwrap_err();
        assert!(matches!(err, LedgerError::Rpc { code: -32601, .. }));
    }

    #[test]
    fn envelope_result_is_extracted() {
        let payload = json!({ "jsonrpc": "2.0", "id": 1, "result": "0x01" });
        assert_eq!(into_result(payload).unwrap(), json!("0x01"));
    }

    #[test]
    fn null_result_is_not_an_error() {
        let payload = json!({ "jsonrpc": "2.0", "id": 1, "result": null });
        assert!(into_result(payload).unwrap().is_null());
    }

    #[rstest]
    #[case("nonce too low")]
    #[case("Nonce too low: next nonce 5, tx nonce 4")]
    #[case("already known")]
    #[case("replacement transaction underpriced")]
    fn nonce_rejections_are_sequence_conflicts(#[case] message: &str) {
        let err = LedgerError::Rpc { code: SERVER_ERROR_CODE, message: message.into() };
        assert!(matches!(
            classify_send_error(err, 4),
            LedgerError::SequenceConflict { nonce: 4, .. }
        ));
    }

    #[test]
    fn other_send_errors_pass_through() {
        let err = LedgerError::Rpc { code: SERVER_ERROR_CODE, message: "insufficient funds".into() };
        assert!(matches!(classify_send_error(err, 4), LedgerError::Rpc { .. }));
    }

    #[test]
    fn deployment_receipt() {
        let receipt = parse_receipt(&json!({
            "transactionHash": format!("0x{}", "ab".repeat(32)),
            "blockNumber": "0x10",
            "status": "0x1",
            "contractAddress": "0xcd234a471b72ba2f1ccf0a70fcaba648a5eecd8d"
        }))
        .unwrap();
        assert!(receipt.status);
        assert_eq!(receipt.block_number, 16);
        assert_eq!(
            receipt.contract_address.unwrap().to_string(),
            "0xcd234a471b72ba2f1ccf0a70fcaba648a5eecd8d"
        );
    }

    #[test]
    fn reverted_receipt_without_contract() {
        let receipt = parse_receipt(&json!({
            "transactionHash": format!("0x{}", "cd".repeat(32)),
            "blockNumber": "0x2",
            "status": "0x0",
            "contractAddress": null
        }))
        .unwrap();
        assert!(!receipt.status);
        assert!(receipt.contract_address.is_none());
    }

    #[test]
    fn receipt_missing_fields_is_rejected() {
        assert!(parse_receipt(&json!({ "status": "0x1" })).is_err());
    }

    #[tokio::test]
    async fn unreachable_endpoint_is_a_transport_error() {
        // Port 9 (discard) on loopback is almost never bound.
        let transport =
            JsonRpcTransport::new("http://127.0.0.1:9", Duration::from_millis(200)).unwrap();
        let err = transport.chain_id().await.unwrap_err();
        assert!(matches!(err, LedgerError::Transport { .. }), "{err}");
    }
}
