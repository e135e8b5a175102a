use async_trait::async_trait;
use atm_provider::{Eip1193, ProviderError, ProviderSource};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::cell::Cell;
use std::rc::Rc;
use std::time::Duration;
use tracing::{debug, info, warn};

pub const DEFAULT_RPC_URL: &str = "http://127.0.0.1:8545";

/// JSON-RPC provider for a local development node (Hardhat, Anvil).
///
/// Reads `ATM_RPC_URL` from environment at construction time
/// (default: `http://127.0.0.1:8545`). The node's unlocked accounts stand in
/// for the accounts an injected wallet would authorise.
pub struct JsonRpcProvider {
    endpoint: String,
    http: reqwest::Client,
    next_id: Cell<u64>,
}

impl Default for JsonRpcProvider {
    fn default() -> Self {
        Self::new(None)
    }
}

impl JsonRpcProvider {
    pub fn new(endpoint: Option<String>) -> Self {
        let endpoint = endpoint
            .or_else(|| std::env::var("ATM_RPC_URL").ok())
            .unwrap_or_else(|| DEFAULT_RPC_URL.to_string());
        Self {
            endpoint: endpoint.trim_end_matches('/').to_string(),
            http: reqwest::Client::new(),
            next_id: Cell::new(1),
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

// ── JSON-RPC 2.0 envelope ────────────────────────────────────────────

#[derive(Debug, Serialize)]
struct RpcRequest<'a> {
    jsonrpc: &'static str,
    id: u64,
    method: &'a str,
    params: Value,
}

#[derive(Debug, Deserialize)]
struct RpcResponse {
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<RpcErrorObject>,
}

#[derive(Debug, Deserialize)]
struct RpcErrorObject {
    code: i64,
    message: String,
    #[serde(default)]
    data: Option<Value>,
}

#[async_trait(?Send)]
impl Eip1193 for JsonRpcProvider {
    async fn request(&self, method: &str, params: Value) -> Result<Value, ProviderError> {
        let id = self.next_id.get();
        self.next_id.set(id + 1);

        let body = RpcRequest {
            jsonrpc: "2.0",
            id,
            method,
            params,
        };

        let response = self
            .http
            .post(&self.endpoint)
            .json(&body)
            .send()
            .await
            .map_err(|err| ProviderError::Transport(format!("{method}: {err}")))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|err| ProviderError::Transport(format!("{method}: {err}")))?;

        // Nodes report call failures inside a 200 body; a non-JSON body is a transport fault.
        let parsed: RpcResponse = match serde_json::from_str(&text) {
            Ok(parsed) => parsed,
            Err(_) if !status.is_success() => {
                return Err(ProviderError::Transport(format!(
                    "{method} HTTP {status}: {text}"
                )));
            }
            Err(err) => {
                return Err(ProviderError::Malformed(format!("{method}: {err}")));
            }
        };

        if let Some(error) = parsed.error {
            debug!(method, code = error.code, "rpc error: {}", error.message);
            return Err(ProviderError::Rpc {
                code: error.code,
                message: error.message,
                data: error.data,
            });
        }

        Ok(parsed.result.unwrap_or(Value::Null))
    }

    async fn idle(&self, interval: Duration) {
        tokio::time::sleep(interval).await;
    }
}

/// Detects a provider by asking the node for its chain id.
#[derive(Debug, Clone, Default)]
pub struct RpcProviderSource {
    endpoint: Option<String>,
}

impl RpcProviderSource {
    pub fn new(endpoint: Option<String>) -> Self {
        Self { endpoint }
    }
}

#[async_trait(?Send)]
impl ProviderSource for RpcProviderSource {
    async fn detect(&self) -> Option<Rc<dyn Eip1193>> {
        let provider = JsonRpcProvider::new(self.endpoint.clone());
        let endpoint = provider.endpoint().to_owned();
        let provider: Rc<dyn Eip1193> = Rc::new(provider);

        match provider.chain_id().await {
            Ok(chain_id) => {
                info!("json-rpc provider detected at {} (chain {})", endpoint, chain_id);
                Some(provider)
            }
            Err(err) => {
                warn!("no json-rpc provider at {}: {}", endpoint, err);
                None
            }
        }
    }
}
