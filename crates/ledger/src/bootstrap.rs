//! Administrative deployment flow.
//!
//! [`ensure_deployed`] returns the bound contract address, deploying first if
//! the gateway starts unbound. [`persist_contract_address`] writes the result
//! into an env file so the next start binds without deploying, and
//! [`load_gateway_config`] reads that file back.

use std::{collections::HashMap, fs, io, path::Path};

use crate::{
    address::Address,
    config::LedgerGatewayConfig,
    error::{LedgerError, Result},
    gateway::LedgerGateway,
};

/// Env-file key the gateway reads its contract address from.
pub const CONTRACT_ADDRESS_KEY: &str = "CONTRACT_ADDRESS";

/// Returns the bound contract address, deploying the contract if needed.
///
/// A deployment that loses a race to another caller on the same gateway
/// returns the winner's address.
///
/// # Errors
///
/// Returns whatever [`LedgerGateway::deploy`] returns when no address is
/// bound and deployment fails.
pub async fn ensure_deployed(gateway: &LedgerGateway) -> Result<Address> {
    if let Some(address) = gateway.contract_address() {
        tracing::info!(contract = %address, "consent contract already bound; skipping deployment");
        return Ok(address);
    }
    match gateway.deploy().await {
        Ok(address) => Ok(address),
        Err(LedgerError::AlreadyBound { .. }) => {
            gateway.contract_address().ok_or(LedgerError::ContractUnbound)
        },
        Err(e) => Err(e),
    }
}

/// Writes `CONTRACT_ADDRESS=<address>` into the env file at `path`.
///
/// An existing `CONTRACT_ADDRESS` line is replaced in place; otherwise the
/// line is appended. Other lines are preserved byte for byte. A missing file
/// is created.
///
/// # Errors
///
/// Returns [`LedgerError::Io`] if the file cannot be read or written.
pub fn persist_contract_address(path: impl AsRef<Path>, address: Address) -> Result<()> {
    let path = path.as_ref();
    let io_error = |source| LedgerError::Io { path: path.to_path_buf(), source };

    let existing = match fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(e) if e.kind() == io::ErrorKind::NotFound => String::new(),
        Err(e) => return Err(io_error(e)),
    };

    let entry = format!("{CONTRACT_ADDRESS_KEY}={}", address.to_checksum());
    fs::write(path, upsert_entry(&existing, &entry)).map_err(io_error)?;
    tracing::info!(path = %path.display(), contract = %address, "contract address persisted");
    Ok(())
}

/// Builds the gateway configuration from the process environment, falling
/// back to the env file at `path` for variables the environment leaves unset.
///
/// A missing file contributes nothing. Process variables win over file
/// entries, so an exported `CONTRACT_ADDRESS` overrides a persisted one.
///
/// # Errors
///
/// Returns [`LedgerError::Io`] if the file exists but cannot be read, or
/// [`LedgerError::Config`] if the merged values are invalid.
pub fn load_gateway_config(path: impl AsRef<Path>) -> Result<LedgerGatewayConfig> {
    config_with_env_file(path.as_ref(), |key| std::env::var(key).ok())
}

fn config_with_env_file(
    path: &Path,
    env: impl Fn(&str) -> Option<String>,
) -> Result<LedgerGatewayConfig> {
    let file = read_env_file(path)?;
    let config = LedgerGatewayConfig::from_lookup(|key| {
        env(key).filter(|v| !v.trim().is_empty()).or_else(|| file.get(key).cloned())
    })?;
    Ok(config)
}

fn read_env_file(path: &Path) -> Result<HashMap<String, String>> {
    match fs::read_to_string(path) {
        Ok(contents) => Ok(parse_env_entries(&contents)),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(HashMap::new()),
        Err(source) => Err(LedgerError::Io { path: path.to_path_buf(), source }),
    }
}

/// Parses `KEY=VALUE` lines; later duplicates win.
fn parse_env_entries(contents: &str) -> HashMap<String, String> {
    contents
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .filter_map(|line| {
            let line = line.strip_prefix("export ").map_or(line, str::trim_start);
            let (key, value) = line.split_once('=')?;
            let value = value.trim();
            let value = [('"', '"'), ('\'', '\'')]
                .iter()
                .find_map(|&(open, close)| value.strip_prefix(open)?.strip_suffix(close))
                .unwrap_or(value);
            Some((key.trim().to_owned(), value.to_owned()))
        })
        .collect()
}

/// Replaces every `CONTRACT_ADDRESS=` line with `entry`, or appends it.
fn upsert_entry(contents: &str, entry: &str) -> String {
    let mut replaced = false;
    let mut out = String::with_capacity(contents.len() + entry.len() + 1);

    for line in contents.split_inclusive('\n') {
        let body = line.trim_end_matches(['\r', '\n']);
        if is_contract_address_line(body) {
            out.push_str(entry);
            out.push_str(&line[body.len()..]);
            replaced = true;
        } else {
            out.push_str(line);
        }
    }

    if !replaced {
        if !out.is_empty() && !out.ends_with('\n') {
            out.push('\n');
        }
        out.push_str(entry);
        out.push('\n');
    }
    out
}

fn is_contract_address_line(line: &str) -> bool {
    let line = line.trim_start();
    let line = line.strip_prefix("export ").map_or(line, str::trim_start);
    line.strip_prefix(CONTRACT_ADDRESS_KEY)
        .is_some_and(|rest| rest.trim_start().starts_with('='))
}
