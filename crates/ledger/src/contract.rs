//! Consent contract artifact and address binding.
//!
//! A [`ContractArtifact`] carries the contract's ABI and, when deployment is
//! possible, its creation bytecode. A [`ContractBinding`] pairs the artifact
//! with a write-once address cell: the binding starts unbound unless an
//! address is known up front, and moves to bound exactly once.

use std::path::Path;

use serde_json::Value;
use tokio::sync::OnceCell;

use crate::{
    address::{Address, decode_hex},
    error::{ConfigError, LedgerError, Result},
};

/// ABI of the consent contract, embedded so a gateway can bind to a deployed
/// contract without shipping build artifacts.
pub const EMBEDDED_ABI: &str = include_str!("../abi/HealthData.json");

/// Functions (name and input types) the gateway requires from the ABI.
const REQUIRED_FUNCTIONS: [(&str, &[&str]); 2] = [
    ("checkAccess", &["address", "address"]),
    ("logDataAccess", &["address", "address", "string"]),
];

/// Compiled consent contract: ABI plus optional creation bytecode.
#[derive(Debug, Clone)]
pub struct ContractArtifact {
    abi: Value,
    bytecode: Option<Vec<u8>>,
}

impl ContractArtifact {
    /// Returns the embedded ABI with no bytecode.
    ///
    /// Such an artifact can bind to an existing address but cannot deploy.
    pub fn embedded() -> Result<Self> {
        Self::from_json(EMBEDDED_ABI)
    }

    /// Parses an artifact from JSON.
    ///
    /// Accepted shapes:
    /// - a bare ABI array
    /// - `{"abi": [...], "bytecode": "0x..."}` (bytecode optional)
    /// - a solc standard-JSON contract entry
    ///   `{"abi": [...], "evm": {"bytecode": {"object": "..."}}}`
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] if the JSON is malformed, the ABI
    /// lacks `checkAccess` / `logDataAccess` with the expected inputs, or
    /// the bytecode is not valid hex.
    pub fn from_json(json: &str) -> Result<Self> {
        let parsed: Value = serde_json::from_str(json).map_err(|e| ConfigError::Invalid {
            field: "contract_artifact",
            reason: e.to_string(),
        })?;

        let (abi, bytecode_hex) = match parsed {
            Value::Array(_) => (parsed, None),
            Value::Object(mut object) => {
                let abi = object.remove("abi").ok_or(ConfigError::Invalid {
                    field: "contract_artifact",
                    reason: "missing 'abi'".into(),
                })?;
                let bytecode = object
                    .get("bytecode")
                    .and_then(Value::as_str)
                    .or_else(|| {
                        object
                            .get("evm")
                            .and_then(|evm| evm.pointer("/bytecode/object"))
                            .and_then(Value::as_str)
                    })
                    .map(str::to_owned);
                (abi, bytecode)
            },
            _ => {
                return Err(ConfigError::Invalid {
                    field: "contract_artifact",
                    reason: "expected an ABI array or artifact object".into(),
                }
                .into());
            },
        };

        validate_abi(&abi)?;

        let bytecode = match bytecode_hex.as_deref().map(str::trim) {
            None | Some("") | Some("0x") => None,
            Some(hex) => Some(decode_hex(hex).map_err(|e| ConfigError::Invalid {
                field: "contract_bytecode",
                reason: e.to_string(),
            })?),
        };

        Ok(Self { abi, bytecode })
    }

    /// Reads and parses an artifact file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|e| ConfigError::Invalid {
            field: "contract_artifact",
            reason: format!("{}: {e}", path.display()),
        })?;
        Self::from_json(&json)
    }

    /// Returns the parsed ABI.
    #[must_use]
    pub fn abi(&self) -> &Value {
        &self.abi
    }

    /// Returns the creation bytecode, if the artifact carries one.
    #[must_use]
    pub fn bytecode(&self) -> Option<&[u8]> {
        self.bytecode.as_deref()
    }
}

fn validate_abi(abi: &Value) -> std::result::Result<(), ConfigError> {
    let entries = abi.as_array().ok_or(ConfigError::Invalid {
        field: "contract_abi",
        reason: "ABI must be an array".into(),
    })?;

    for (name, inputs) in REQUIRED_FUNCTIONS {
        let found = entries.iter().any(|entry| {
            entry.get("type").and_then(Value::as_str).unwrap_or("function") == "function"
                && entry.get("name").and_then(Value::as_str) == Some(name)
                && entry.get("inputs").and_then(Value::as_array).is_some_and(|actual| {
                    actual.len() == inputs.len()
                        && actual
                            .iter()
                            .zip(inputs.iter())
                            .all(|(a, t)| a.get("type").and_then(Value::as_str) == Some(*t))
                })
        });
        if !found {
            return Err(ConfigError::Invalid {
                field: "contract_abi",
                reason: format!("missing function {name}({})", inputs.join(",")),
            });
        }
    }
    Ok(())
}

/// The artifact plus its write-once deployed address.
#[derive(Debug)]
pub struct ContractBinding {
    artifact: ContractArtifact,
    address: OnceCell<Address>,
}

impl ContractBinding {
    /// Creates a binding, bound immediately when `address` is known.
    #[must_use]
    pub fn new(artifact: ContractArtifact, address: Option<Address>) -> Self {
        Self { artifact, address: OnceCell::new_with(address) }
    }

    /// Returns the artifact.
    #[must_use]
    pub fn artifact(&self) -> &ContractArtifact {
        &self.artifact
    }

    /// Returns the bound address, if any.
    #[must_use]
    pub fn address(&self) -> Option<Address> {
        self.address.get().copied()
    }

    /// Returns the bound address or [`LedgerError::ContractUnbound`].
    pub fn require_address(&self) -> Result<Address> {
        self.address().ok_or(LedgerError::ContractUnbound)
    }

    /// Binds the contract to `address`.
    ///
    /// Fails with [`LedgerError::AlreadyBound`] if a different call won the
    /// race; the first binding is never replaced.
    pub(crate) fn bind(&self, address: Address) -> Result<()> {
        self.address.set(address).map_err(|_| LedgerError::AlreadyBound {
            address: self.address().map(|a| a.to_string()).unwrap_or_default(),
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn embedded_abi_is_valid_without_bytecode() {
        let artifact = ContractArtifact::embedded().unwrap();
        assert!(artifact.bytecode().is_none());
        assert!(artifact.abi().as_array().is_some_and(|a| !a.is_empty()));
    }

    #[test]
    fn artifact_object_with_bytecode() {
        let json = format!(r#"{{"abi": {EMBEDDED_ABI}, "bytecode": "0x6080604052"}}"#);
        let artifact = ContractArtifact::from_json(&json).unwrap();
        assert_eq!(artifact.bytecode(), Some(&[0x60, 0x80, 0x60, 0x40, 0x52][..]));
    }

    #[test]
    fn solc_standard_json_entry() {
        let json =
            format!(r#"{{"abi": {EMBEDDED_ABI}, "evm": {{"bytecode": {{"object": "6001"}}}}}}"#);
        let artifact = ContractArtifact::from_json(&json).unwrap();
        assert_eq!(artifact.bytecode(), Some(&[0x60, 0x01][..]));
    }

    #[test]
    fn abi_missing_log_function_is_rejected() {
        let json = r#"[{"type":"function","name":"checkAccess","inputs":[{"type":"address"},{"type":"address"}]}]"#;
        let err = ContractArtifact::from_json(json).unwrap_err();
        assert!(err.to_string().contains("logDataAccess"), "{err}");
    }

    #[test]
    fn abi_with_wrong_inputs_is_rejected() {
        let json = r#"[
            {"type":"function","name":"checkAccess","inputs":[{"type":"address"}]},
            {"type":"function","name":"logDataAccess","inputs":[{"type":"address"},{"type":"address"},{"type":"string"}]}
        ]"#;
        assert!(ContractArtifact::from_json(json).is_err());
    }

    #[test]
    fn binding_is_write_once() {
        let binding = ContractBinding::new(ContractArtifact::embedded().unwrap(), None);
        assert!(matches!(binding.require_address(), Err(LedgerError::ContractUnbound)));

        let first = Address::new([1; 20]);
        binding.bind(first).unwrap();
        assert_eq!(binding.address(), Some(first));

        let err = binding.bind(Address::new([2; 20])).unwrap_err();
        assert!(matches!(err, LedgerError::AlreadyBound { .. }));
        assert_eq!(binding.address(), Some(first));
    }
}
