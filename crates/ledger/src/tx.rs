//! Legacy (EIP-155) transactions: building, signing and raw encoding.

use bytes::Bytes;

use crate::{
    address::{Address, TxHash, keccak256},
    error::Result,
    rlp,
    signer::AdminSigner,
};

/// An unsigned transaction.
///
/// `to == None` marks a contract-creation transaction whose `data` is the
/// creation bytecode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionRequest {
    /// Sender address; used for gas estimation and by ledger doubles.
    pub from: Address,
    /// Recipient contract, or `None` for deployment.
    pub to: Option<Address>,
    /// Account sequence number.
    pub nonce: u64,
    /// Price per unit of gas, in wei.
    pub gas_price: u128,
    /// Gas limit.
    pub gas_limit: u64,
    /// Value transferred, in wei.
    pub value: u128,
    /// Calldata or creation bytecode.
    pub data: Bytes,
}

impl TransactionRequest {
    fn rlp_fields(&self) -> Vec<Vec<u8>> {
        let to = self.to.map(|a| a.as_bytes().to_vec()).unwrap_or_default();
        vec![
            rlp::encode_uint(self.nonce),
            rlp::encode_uint(self.gas_price),
            rlp::encode_uint(self.gas_limit),
            rlp::encode_bytes(&to),
            rlp::encode_uint(self.value),
            rlp::encode_bytes(&self.data),
        ]
    }

    /// Returns the EIP-155 signing digest for `chain_id`.
    #[must_use]
    pub fn signing_hash(&self, chain_id: u64) -> [u8; 32] {
        let mut fields = self.rlp_fields();
        fields.push(rlp::encode_uint(chain_id));
        fields.push(rlp::encode_uint(0u8));
        fields.push(rlp::encode_uint(0u8));
        keccak256(&rlp::encode_list(&fields))
    }

    /// Signs the transaction, producing the raw bytes ready for submission.
    pub fn sign(self, signer: &AdminSigner, chain_id: u64) -> Result<SignedTransaction> {
        let signature = signer.sign_prehash(&self.signing_hash(chain_id))?;
        let v = u128::from(signature.recovery_id()) + u128::from(chain_id) * 2 + 35;

        let mut fields = self.rlp_fields();
        fields.push(rlp::encode_uint(v));
        fields.push(rlp::encode_scalar(signature.r()));
        fields.push(rlp::encode_scalar(signature.s()));
        let raw = Bytes::from(rlp::encode_list(&fields));
        let hash = TxHash::new(keccak256(&raw));

        Ok(SignedTransaction { request: self, raw, hash })
    }
}

/// A signed transaction plus the request it was built from.
#[derive(Debug, Clone)]
pub struct SignedTransaction {
    request: TransactionRequest,
    raw: Bytes,
    hash: TxHash,
}

impl SignedTransaction {
    /// The request that was signed.
    #[must_use]
    pub fn request(&self) -> &TransactionRequest {
        &self.request
    }

    /// RLP-encoded signed transaction.
    #[must_use]
    pub fn raw(&self) -> &Bytes {
        &self.raw
    }

    /// Transaction hash (Keccak-256 of the raw bytes).
    #[must_use]
    pub fn hash(&self) -> TxHash {
        self.hash
    }

    /// Sequence number the transaction consumes.
    #[must_use]
    pub fn nonce(&self) -> u64 {
        self.request.nonce
    }
}

/// Inclusion receipt for a submitted transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionReceipt {
    /// Hash of the included transaction.
    pub transaction_hash: TxHash,
    /// Block that included it.
    pub block_number: u64,
    /// `true` if execution succeeded.
    pub status: bool,
    /// Address of the created contract, for deployments.
    pub contract_address: Option<Address>,
}
