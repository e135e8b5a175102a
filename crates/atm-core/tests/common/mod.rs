#![allow(dead_code)]

use async_trait::async_trait;
use atm_abi::{encode_uint, from_hex_prefixed, selector, to_hex_prefixed};
use atm_api_types::Address;
use atm_core::{AtmApp, ContractConfig};
use atm_provider::{Eip1193, ProviderError, ProviderSource};
use serde_json::{Value, json};
use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::rc::Rc;
use std::time::Duration;
use tokio::sync::Notify;

pub const ALICE: &str = "0xabababababababababababababababababababab";
pub const BOB: &str = "0xbcbcbcbcbcbcbcbcbcbcbcbcbcbcbcbcbcbcbcbc";

pub fn addr(raw: &str) -> Address {
    Address::parse(raw).unwrap()
}

struct Mined {
    block: u64,
    succeeded: bool,
}

/// In-memory stand-in for a wallet plus an `Assessment` deployment.
///
/// Balances are kept per sender. Knobs:
/// * `hold_sends` parks every `eth_sendTransaction` until `release`
/// * `hold_next_read` parks the next `eth_call` after its answer is computed
/// * `revert_at_send(false)` lets failing calls get mined with status 0
/// * `receipt_delay` / `flaky_receipts` make confirmation take a few polls
#[derive(Default)]
pub struct MockChain {
    authorised: RefCell<Vec<Address>>,
    balances: RefCell<HashMap<Address, u128>>,
    reject_connect: Cell<bool>,
    reject_send: Cell<bool>,
    fail_reads: Cell<bool>,
    mine_reverts: Cell<bool>,
    gate: RefCell<Option<Rc<Notify>>>,
    read_gate: RefCell<Option<Rc<Notify>>>,
    receipt_delay: Cell<u32>,
    flaky_receipts: Cell<u32>,
    receipts: RefCell<HashMap<String, Mined>>,
    sends: RefCell<Vec<(Address, String)>>,
    block: Cell<u64>,
}

impl MockChain {
    pub fn new() -> Rc<Self> {
        Rc::new(Self::default())
    }

    pub fn with_account(raw: &str, balance: u128) -> Rc<Self> {
        let chain = Self::new();
        chain.authorise(raw);
        chain.set_balance(raw, balance);
        chain
    }

    pub fn authorise(&self, raw: &str) {
        self.authorised.borrow_mut().insert(0, addr(raw));
    }

    pub fn set_accounts(&self, raws: &[&str]) {
        *self.authorised.borrow_mut() = raws.iter().map(|raw| addr(raw)).collect();
    }

    pub fn set_balance(&self, raw: &str, balance: u128) {
        self.balances.borrow_mut().insert(addr(raw), balance);
    }

    pub fn balance_of(&self, raw: &str) -> u128 {
        self.balances.borrow().get(&addr(raw)).copied().unwrap_or(0)
    }

    pub fn reject_connect(&self, reject: bool) {
        self.reject_connect.set(reject);
    }

    pub fn reject_send(&self, reject: bool) {
        self.reject_send.set(reject);
    }

    pub fn fail_reads(&self, fail: bool) {
        self.fail_reads.set(fail);
    }

    pub fn revert_at_send(&self, at_send: bool) {
        self.mine_reverts.set(!at_send);
    }

    pub fn receipt_delay(&self, polls: u32) {
        self.receipt_delay.set(polls);
    }

    pub fn flaky_receipts(&self, polls: u32) {
        self.flaky_receipts.set(polls);
    }

    pub fn hold_sends(&self) {
        *self.gate.borrow_mut() = Some(Rc::new(Notify::new()));
    }

    pub fn release(&self) {
        if let Some(gate) = self.gate.borrow_mut().take() {
            gate.notify_one();
        }
    }

    /// The next `eth_call` answers with the chain state at call time but only
    /// returns once the returned `Notify` fires.
    pub fn hold_next_read(&self) -> Rc<Notify> {
        let gate = Rc::new(Notify::new());
        *self.read_gate.borrow_mut() = Some(gate.clone());
        gate
    }

    /// `(from, function selector hex)` for every dispatched transaction.
    pub fn sends(&self) -> Vec<(Address, String)> {
        self.sends.borrow().clone()
    }

    fn insufficient(balance: u128, amount: u128) -> ProviderError {
        let mut data = selector("InsufficientBalance(uint256,uint256)").to_vec();
        data.extend_from_slice(&encode_uint(balance));
        data.extend_from_slice(&encode_uint(amount));
        ProviderError::Rpc {
            code: -32603,
            message: "Internal JSON-RPC error.".into(),
            data: Some(json!({
                "code": ProviderError::EXECUTION_REVERTED,
                "message": "execution reverted",
                "data": to_hex_prefixed(&data),
            })),
        }
    }

    /// Effect of `calldata` from `from`: the new balance, or the revert.
    fn execute(&self, from: &Address, calldata: &[u8]) -> Result<Option<u128>, ProviderError> {
        let balance = self.balances.borrow().get(from).copied().unwrap_or(0);
        let (head, args) = calldata.split_at(4.min(calldata.len()));
        let amount = || atm_abi::decode_uint(args).unwrap();

        if head == selector("getBalance()") {
            Ok(None)
        } else if head == selector("deposit(uint256)") {
            Ok(Some(balance + amount()))
        } else if head == selector("withdraw(uint256)") || head == selector("burn(uint256)") {
            let amount = amount();
            if amount > balance {
                Err(Self::insufficient(balance, amount))
            } else {
                Ok(Some(balance - amount))
            }
        } else {
            Err(ProviderError::Rpc {
                code: ProviderError::EXECUTION_REVERTED,
                message: "execution reverted".into(),
                data: None,
            })
        }
    }

    fn call(&self, params: &Value) -> Result<Value, ProviderError> {
        if self.fail_reads.get() {
            return Err(ProviderError::Transport("read timed out".into()));
        }
        let (from, calldata) = tx_fields(params);
        let balance = self.balances.borrow().get(&from).copied().unwrap_or(0);
        match self.execute(&from, &calldata)? {
            None => Ok(json!(to_hex_prefixed(&encode_uint(balance)))),
            Some(_) => Ok(json!("0x")),
        }
    }

    fn mine(&self, from: Address, calldata: Vec<u8>) -> Result<Value, ProviderError> {
        let outcome = self.execute(&from, &calldata);
        let succeeded = match outcome {
            Ok(Some(next)) => {
                self.balances.borrow_mut().insert(from.clone(), next);
                true
            }
            Ok(None) => true,
            Err(err) if !self.mine_reverts.get() => return Err(err),
            Err(_) => false,
        };

        let block = self.block.get() + 1;
        self.block.set(block);
        let hash = format!("0x{block:064x}");
        self.sends
            .borrow_mut()
            .push((from, hex_selector(&calldata)));
        self.receipts
            .borrow_mut()
            .insert(hash.clone(), Mined { block, succeeded });
        Ok(json!(hash))
    }

    fn receipt(&self, params: &Value) -> Result<Value, ProviderError> {
        let flaky = self.flaky_receipts.get();
        if flaky > 0 {
            self.flaky_receipts.set(flaky - 1);
            return Err(ProviderError::Transport("connection reset".into()));
        }
        let delay = self.receipt_delay.get();
        if delay > 0 {
            self.receipt_delay.set(delay - 1);
            return Ok(Value::Null);
        }

        let hash = params[0].as_str().unwrap_or_default();
        Ok(match self.receipts.borrow().get(hash) {
            Some(mined) => json!({
                "transactionHash": hash,
                "blockNumber": format!("0x{:x}", mined.block),
                "status": if mined.succeeded { "0x1" } else { "0x0" },
            }),
            None => Value::Null,
        })
    }
}

#[async_trait(?Send)]
impl Eip1193 for MockChain {
    async fn request(&self, method: &str, params: Value) -> Result<Value, ProviderError> {
        match method {
            "eth_chainId" => Ok(json!("0x7a69")),
            "eth_accounts" => Ok(json!(*self.authorised.borrow())),
            "eth_requestAccounts" => {
                if self.reject_connect.get() {
                    return Err(ProviderError::Rpc {
                        code: ProviderError::USER_REJECTED,
                        message: "User rejected the request.".into(),
                        data: None,
                    });
                }
                Ok(json!(*self.authorised.borrow()))
            }
            "eth_call" => {
                let answer = self.call(&params);
                let gate = self.read_gate.borrow_mut().take();
                if let Some(gate) = gate {
                    gate.notified().await;
                }
                answer
            }
            "eth_sendTransaction" => {
                let gate = self.gate.borrow().clone();
                if let Some(gate) = gate {
                    gate.notified().await;
                }
                if self.reject_send.get() {
                    return Err(ProviderError::Rpc {
                        code: ProviderError::USER_REJECTED,
                        message: "MetaMask Tx Signature: User denied transaction signature.".into(),
                        data: None,
                    });
                }
                let (from, calldata) = tx_fields(&params);
                self.mine(from, calldata)
            }
            "eth_getTransactionReceipt" => self.receipt(&params),
            other => Err(ProviderError::Rpc {
                code: -32601,
                message: format!("method {other} not supported"),
                data: None,
            }),
        }
    }

    async fn idle(&self, _interval: Duration) {
        tokio::task::yield_now().await;
    }
}

fn tx_fields(params: &Value) -> (Address, Vec<u8>) {
    let tx = &params[0];
    let from = addr(tx["from"].as_str().unwrap());
    let data = from_hex_prefixed(tx["data"].as_str().unwrap()).unwrap();
    (from, data)
}

fn hex_selector(calldata: &[u8]) -> String {
    to_hex_prefixed(&calldata[..4.min(calldata.len())])
}

pub struct MockSource(pub Option<Rc<MockChain>>);

#[async_trait(?Send)]
impl ProviderSource for MockSource {
    async fn detect(&self) -> Option<Rc<dyn Eip1193>> {
        self.0.clone().map(|chain| chain as Rc<dyn Eip1193>)
    }
}

pub fn config() -> ContractConfig {
    ContractConfig::assessment()
        .unwrap()
        .with_confirmation_poll(Duration::ZERO)
}

pub fn app_with(chain: Option<Rc<MockChain>>) -> Rc<AtmApp> {
    AtmApp::new(Rc::new(MockSource(chain)), config())
}
