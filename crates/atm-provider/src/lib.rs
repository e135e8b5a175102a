//! The injected-wallet seam.
//!
//! `Eip1193` is the one method every injected wallet exposes,
//! `request({ method, params })`. Browser builds wrap `window.ethereum`, native
//! builds speak JSON-RPC to a node, and tests script an in-memory chain. The
//! typed helpers on `dyn Eip1193` turn the handful of methods the ATM needs into
//! Rust values.
//!
//! Everything here is single-threaded: futures are `?Send` and handles are `Rc`.

use async_trait::async_trait;
use atm_abi::{from_hex_prefixed, to_hex_prefixed};
use atm_api_types::{Address, TxHash};
use serde_json::{Value, json};
use std::rc::Rc;
use std::time::Duration;

#[derive(Debug, Clone, thiserror::Error)]
pub enum ProviderError {
    #[error("provider error {code}: {message}")]
    Rpc {
        code: i64,
        message: String,
        data: Option<Value>,
    },
    #[error("transport error: {0}")]
    Transport(String),
    #[error("malformed provider response: {0}")]
    Malformed(String),
}

impl ProviderError {
    pub const USER_REJECTED: i64 = 4001;
    pub const UNAUTHORIZED: i64 = 4100;
    pub const EXECUTION_REVERTED: i64 = 3;

    pub fn is_user_rejection(&self) -> bool {
        matches!(self, ProviderError::Rpc { code, .. } if *code == Self::USER_REJECTED)
    }

    /// Raw revert payload, wherever the wallet nested it.
    pub fn revert_data(&self) -> Option<Vec<u8>> {
        let ProviderError::Rpc {
            data: Some(data), ..
        } = self
        else {
            return None;
        };
        find_revert_bytes(data)
    }

    pub fn is_revert(&self) -> bool {
        match self {
            ProviderError::Rpc { code, message, .. } => {
                *code == Self::EXECUTION_REVERTED
                    || self.revert_data().is_some()
                    || message.to_ascii_lowercase().contains("revert")
            }
            _ => false,
        }
    }

    pub fn message(&self) -> String {
        match self {
            ProviderError::Rpc { message, .. } => message.clone(),
            other => other.to_string(),
        }
    }
}

fn find_revert_bytes(value: &Value) -> Option<Vec<u8>> {
    match value {
        Value::String(s) if s.starts_with("0x") && s.len() >= 10 => from_hex_prefixed(s).ok(),
        // MetaMask nests it as `data.data` or `data.originalError.data`
        Value::Object(map) => ["data", "originalError"]
            .iter()
            .filter_map(|key| map.get(*key))
            .find_map(find_revert_bytes),
        _ => None,
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxReceipt {
    pub tx_hash: TxHash,
    pub block_number: Option<u64>,
    pub succeeded: bool,
}

/// Notifications pushed by the wallet outside of any request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WalletEvent {
    AccountsChanged(Vec<Address>),
    Disconnected,
}

#[async_trait(?Send)]
pub trait Eip1193 {
    async fn request(&self, method: &str, params: Value) -> Result<Value, ProviderError>;

    /// Suspend between confirmation polls.
    async fn idle(&self, interval: Duration);
}

/// Finds the provider for the current environment, if there is one.
#[async_trait(?Send)]
pub trait ProviderSource {
    async fn detect(&self) -> Option<Rc<dyn Eip1193>>;
}

impl dyn Eip1193 + '_ {
    /// `eth_accounts`: already-authorised accounts, never prompts.
    pub async fn accounts(&self) -> Result<Vec<Address>, ProviderError> {
        parse_accounts(&self.request("eth_accounts", json!([])).await?)
    }

    /// `eth_requestAccounts`: asks the user to authorise.
    pub async fn request_accounts(&self) -> Result<Vec<Address>, ProviderError> {
        parse_accounts(&self.request("eth_requestAccounts", json!([])).await?)
    }

    pub async fn chain_id(&self) -> Result<u64, ProviderError> {
        let value = self.request("eth_chainId", json!([])).await?;
        parse_quantity(&value).ok_or_else(|| malformed("eth_chainId", &value))
    }

    /// `eth_call` at `block`, or at `latest` when `None`.
    pub async fn call(
        &self,
        from: &Address,
        to: &Address,
        data: &[u8],
        block: Option<u64>,
    ) -> Result<Vec<u8>, ProviderError> {
        let tag = match block {
            Some(number) => format!("0x{number:x}"),
            None => "latest".to_owned(),
        };
        let params = json!([{ "from": from, "to": to, "data": to_hex_prefixed(data) }, tag]);
        let value = self.request("eth_call", params).await?;
        value
            .as_str()
            .and_then(|s| from_hex_prefixed(s).ok())
            .ok_or_else(|| malformed("eth_call", &value))
    }

    pub async fn send_transaction(
        &self,
        from: &Address,
        to: &Address,
        data: &[u8],
    ) -> Result<TxHash, ProviderError> {
        let params = json!([{ "from": from, "to": to, "data": to_hex_prefixed(data) }]);
        let value = self.request("eth_sendTransaction", params).await?;
        value
            .as_str()
            .map(|hash| TxHash(hash.to_owned()))
            .ok_or_else(|| malformed("eth_sendTransaction", &value))
    }

    /// `None` while the transaction is not yet included.
    pub async fn transaction_receipt(
        &self,
        hash: &TxHash,
    ) -> Result<Option<TxReceipt>, ProviderError> {
        let value = self
            .request("eth_getTransactionReceipt", json!([hash.0]))
            .await?;
        parse_receipt(&value)
    }
}

pub fn parse_accounts(value: &Value) -> Result<Vec<Address>, ProviderError> {
    let items = value
        .as_array()
        .ok_or_else(|| malformed("accounts", value))?;
    items
        .iter()
        .map(|item| {
            item.as_str()
                .and_then(|s| Address::parse(s).ok())
                .ok_or_else(|| malformed("account", item))
        })
        .collect()
}

pub fn parse_receipt(value: &Value) -> Result<Option<TxReceipt>, ProviderError> {
    if value.is_null() {
        return Ok(None);
    }
    let tx_hash = value
        .get("transactionHash")
        .and_then(Value::as_str)
        .ok_or_else(|| malformed("receipt", value))?;
    let block_number = value.get("blockNumber").and_then(parse_quantity);
    // pre-Byzantium receipts carry no status field
    let succeeded = value
        .get("status")
        .map(|status| parse_quantity(status) == Some(1))
        .unwrap_or(true);

    Ok(Some(TxReceipt {
        tx_hash: TxHash(tx_hash.to_owned()),
        block_number,
        succeeded,
    }))
}

pub fn parse_quantity(value: &Value) -> Option<u64> {
    let digits = value.as_str()?.strip_prefix("0x")?;
    u64::from_str_radix(digits, 16).ok()
}

fn malformed(what: &str, value: &Value) -> ProviderError {
    ProviderError::Malformed(format!("unexpected {what}: {value}"))
}
