use anyhow::{Context, Result, bail};
use std::net::SocketAddr;
use std::time::Duration;

pub(crate) const DEFAULT_LISTEN_ADDR: &str = "0.0.0.0:8080";
pub(crate) const DEFAULT_ACCOUNT_POLL: Duration = Duration::from_millis(2000);

/// Process-level settings. Contract settings are read by `atm-core` itself.
#[derive(Debug, Clone)]
pub(crate) struct ServiceConfig {
    pub listen_addr: SocketAddr,
    /// `None` falls back to `ATM_RPC_URL`, then the local Hardhat default.
    pub rpc_url: Option<String>,
    pub account_poll: Duration,
}

impl ServiceConfig {
    pub(crate) fn from_env() -> Result<Self> {
        let listen_addr = std::env::var("ATM_LISTEN_ADDR")
            .unwrap_or_else(|_| DEFAULT_LISTEN_ADDR.to_owned());
        let listen_addr = listen_addr
            .parse()
            .with_context(|| format!("ATM_LISTEN_ADDR={listen_addr}"))?;

        let account_poll = match std::env::var("ATM_ACCOUNT_POLL_MS") {
            Ok(raw) => {
                let millis: u64 = raw
                    .trim()
                    .parse()
                    .with_context(|| format!("ATM_ACCOUNT_POLL_MS={raw}"))?;
                if millis == 0 {
                    bail!("ATM_ACCOUNT_POLL_MS must be positive");
                }
                Duration::from_millis(millis)
            }
            Err(_) => DEFAULT_ACCOUNT_POLL,
        };

        Ok(Self {
            listen_addr,
            rpc_url: std::env::var("ATM_RPC_URL").ok(),
            account_poll,
        })
    }
}
