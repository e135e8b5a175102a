//! Contract controller.
//!
//! States: `Unbound` → `Bound`. Every `bind` builds a fresh `ContractHandle`
//! stamped with a new generation. In-flight work keeps the handle it started
//! with; anything it wants to write back is dropped once the generation has
//! moved on, so a stale signer never leaks into later calls.
//!
//! A mutating call runs: record pending → send (wallet prompt) → mark balance
//! stale → wait for the receipt → clear pending → refresh the balance.
//!
//! At most one mutating call is pending per account. Balance reads take a
//! ticket when they start; a result only lands if no newer read has landed
//! and it started after the last confirmation for the bound account.

use atm_abi::InterfaceDescriptor;
use atm_api_types::{Address, OperationKind, OperationReceipt, PendingOperation, TxHash};
use atm_provider::{Eip1193, ProviderError, TxReceipt};
use chrono::Utc;
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::{BALANCE_FUNCTION, ContractConfig};
use crate::error::AtmError;

/// A provider together with the account it signs for.
#[derive(Clone)]
pub struct Signer {
    provider: Rc<dyn Eip1193>,
    account: Address,
}

impl Signer {
    pub fn new(provider: Rc<dyn Eip1193>, account: Address) -> Self {
        Self { provider, account }
    }

    pub fn account(&self) -> &Address {
        &self.account
    }

    pub fn provider(&self) -> &Rc<dyn Eip1193> {
        &self.provider
    }
}

#[derive(Clone)]
pub struct ContractHandle {
    address: Address,
    interface: Rc<InterfaceDescriptor>,
    signer: Signer,
    generation: u64,
}

impl ContractHandle {
    pub fn address(&self) -> &Address {
        &self.address
    }

    pub fn account(&self) -> &Address {
        self.signer.account()
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    async fn read_balance(&self) -> Result<u128, AtmError> {
        let calldata = self
            .interface
            .encode_call(BALANCE_FUNCTION, &[])
            .map_err(|err| AtmError::Read(err.to_string()))?;
        let output = self
            .signer
            .provider
            .call(&self.signer.account, &self.address, &calldata, None)
            .await
            .map_err(|err| AtmError::Read(err.to_string()))?;
        self.interface
            .decode_uint_output(BALANCE_FUNCTION, &output)
            .map_err(|err| AtmError::Read(err.to_string()))
    }

    fn calldata(&self, kind: OperationKind, amount: u128) -> Result<Vec<u8>, AtmError> {
        self.interface
            .encode_call(kind.function_name(), &[amount])
            .map_err(|err| AtmError::Interface(format!("cannot encode {kind}: {err}")))
    }

    async fn send(&self, calldata: &[u8]) -> Result<TxHash, ProviderError> {
        self.signer
            .provider
            .send_transaction(&self.signer.account, &self.address, calldata)
            .await
    }

    /// Polls until the transaction is included. There is no deadline: a
    /// dispatched transaction ends in success, revert, or keeps waiting.
    async fn wait_for_receipt(&self, hash: &TxHash, poll: Duration) -> TxReceipt {
        let provider = &self.signer.provider;
        loop {
            match provider.transaction_receipt(hash).await {
                Ok(Some(receipt)) => return receipt,
                Ok(None) => debug!(tx = %hash, "transaction not yet included"),
                Err(err) => warn!(tx = %hash, "receipt poll failed, still waiting: {}", err),
            }
            provider.idle(poll).await;
        }
    }

    /// Re-run a mined-but-reverted call to recover its reason.
    async fn replay_revert_reason(&self, calldata: &[u8], block: Option<u64>) -> String {
        let replay = self
            .signer
            .provider
            .call(&self.signer.account, &self.address, calldata, block)
            .await;
        match replay {
            Err(err) if err.is_revert() => match AtmError::from_submit(&err, &self.interface) {
                AtmError::RevertedOnChain { reason } => reason,
                other => other.to_string(),
            },
            _ => "transaction reverted".to_owned(),
        }
    }
}

/// Mirror of the on-chain balance. `value` is unset until the first read;
/// `stale` is raised once a mutating call is dispatched and cleared by the next
/// read that follows its confirmation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BalanceView {
    pub value: Option<u128>,
    pub stale: bool,
}

#[derive(Default)]
struct ControllerState {
    handle: Option<ContractHandle>,
    generation: u64,
    balance: BalanceView,
    /// In-flight mutating calls keyed by signing account. Entries outlive
    /// `unbind` and rebinds; they belong to the transaction, not the handle.
    pending: HashMap<Address, PendingOperation>,
    /// Last ticket handed out to a balance read.
    read_seq: u64,
    /// Ticket of the newest read whose result was applied.
    applied_read: u64,
    /// Reads with a ticket at or below this started before the latest
    /// confirmation for the bound account.
    read_floor: u64,
}

impl ControllerState {
    fn is_bound_to(&self, account: &Address) -> bool {
        self.handle
            .as_ref()
            .is_some_and(|handle| handle.account() == account)
    }

    fn current_pending(&self) -> Option<&PendingOperation> {
        let handle = self.handle.as_ref()?;
        self.pending.get(handle.account())
    }

    fn dispatched_for_bound_account(&self) -> bool {
        self.current_pending()
            .is_some_and(|operation| operation.tx_hash.is_some())
    }
}

pub struct ContractController {
    config: ContractConfig,
    state: RefCell<ControllerState>,
    listener: RefCell<Option<Rc<dyn Fn()>>>,
}

impl ContractController {
    pub fn new(config: ContractConfig) -> Self {
        Self {
            config,
            state: RefCell::default(),
            listener: RefCell::new(None),
        }
    }

    pub fn config(&self) -> &ContractConfig {
        &self.config
    }

    /// Called after every observable state change.
    pub fn set_listener(&self, listener: impl Fn() + 'static) {
        *self.listener.borrow_mut() = Some(Rc::new(listener));
    }

    pub fn is_bound(&self) -> bool {
        self.state.borrow().handle.is_some()
    }

    pub fn account(&self) -> Option<Address> {
        self.state
            .borrow()
            .handle
            .as_ref()
            .map(|handle| handle.account().clone())
    }

    pub fn handle(&self) -> Option<ContractHandle> {
        self.state.borrow().handle.clone()
    }

    pub fn balance(&self) -> BalanceView {
        self.state.borrow().balance
    }

    /// The in-flight call of the bound account, if any.
    pub fn pending(&self) -> Option<PendingOperation> {
        self.state.borrow().current_pending().cloned()
    }

    /// Build a handle for `(provider, account)`, replacing any previous one.
    /// Purely local; no network traffic.
    pub fn bind(&self, provider: Rc<dyn Eip1193>, account: Address) {
        {
            let mut state = self.state.borrow_mut();
            state.generation += 1;
            info!(
                account = %account,
                contract = %self.config.address,
                generation = state.generation,
                "contract bound"
            );
            state.handle = Some(ContractHandle {
                address: self.config.address.clone(),
                interface: self.config.interface.clone(),
                signer: Signer::new(provider, account),
                generation: state.generation,
            });
            state.balance = BalanceView::default();
        }
        self.changed();
    }

    pub fn unbind(&self) {
        {
            let mut state = self.state.borrow_mut();
            if state.handle.is_none() {
                return;
            }
            state.generation += 1;
            state.handle = None;
            state.balance = BalanceView::default();
            info!("contract unbound");
        }
        self.changed();
    }

    /// Read-only `getBalance()`. May run while a submit is pending; the result
    /// is discarded if the binding changed while the read was in flight.
    ///
    /// A read overtaken by a newer one, or by a confirmation, leaves the view
    /// alone and returns the balance currently shown.
    pub async fn read_balance(&self) -> Result<u128, AtmError> {
        let (handle, ticket) = {
            let mut state = self.state.borrow_mut();
            let handle = state.handle.clone().ok_or(AtmError::NotBound)?;
            state.read_seq += 1;
            (handle, state.read_seq)
        };
        let value = handle.read_balance().await?;

        {
            let mut state = self.state.borrow_mut();
            if state.generation != handle.generation {
                debug!("dropping balance read from a replaced binding");
                return Err(AtmError::Read("account changed during balance read".to_owned()));
            }
            if ticket <= state.applied_read || ticket <= state.read_floor {
                debug!(ticket, applied = state.applied_read, "dropping superseded balance read");
                return Ok(state.balance.value.unwrap_or(value));
            }
            let stale = state.dispatched_for_bound_account();
            state.balance = BalanceView {
                value: Some(value),
                stale,
            };
            state.applied_read = ticket;
        }
        self.changed();
        Ok(value)
    }

    /// Submit a mutating call and wait for its confirmation.
    ///
    /// `amount <= 0` is a no-op returning `Ok(None)`. A confirmed call is
    /// reported even when the follow-up balance read fails; the balance then
    /// stays stale.
    pub async fn submit(
        &self,
        kind: OperationKind,
        amount: i128,
    ) -> Result<Option<OperationReceipt>, AtmError> {
        let amount = match u128::try_from(amount) {
            Ok(amount) if amount > 0 => amount,
            _ => {
                debug!(%kind, amount, "ignoring non-positive amount");
                return Ok(None);
            }
        };

        let (handle, operation) = {
            let mut state = self.state.borrow_mut();
            let handle = state.handle.clone().ok_or(AtmError::NotBound)?;
            if state.pending.contains_key(handle.account()) {
                return Err(AtmError::OperationInProgress);
            }
            let operation = PendingOperation {
                id: Uuid::new_v4(),
                kind,
                amount,
                submitted_at: Utc::now(),
                tx_hash: None,
            };
            state
                .pending
                .insert(handle.account().clone(), operation.clone());
            (handle, operation)
        };
        let guard = PendingGuard {
            controller: self,
            account: handle.account().clone(),
            id: operation.id,
        };
        self.changed();

        info!(%kind, amount, account = %handle.account(), "submitting operation");
        let calldata = handle.calldata(kind, amount)?;
        let tx_hash = handle.send(&calldata).await.map_err(|err| {
            let err = AtmError::from_submit(&err, &handle.interface);
            warn!(%kind, amount, "operation not dispatched: {}", err);
            err
        })?;

        let previously_stale = {
            let mut state = self.state.borrow_mut();
            if let Some(pending) = state
                .pending
                .get_mut(handle.account())
                .filter(|pending| pending.id == operation.id)
            {
                pending.tx_hash = Some(tx_hash.clone());
            }
            let previous = state.balance.stale;
            if state.is_bound_to(handle.account()) {
                state.balance.stale = true;
            }
            previous
        };
        self.changed();

        let receipt = handle
            .wait_for_receipt(&tx_hash, self.config.confirmation_poll)
            .await;
        if !receipt.succeeded {
            let reason = handle
                .replay_revert_reason(&calldata, receipt.block_number)
                .await;
            {
                let mut state = self.state.borrow_mut();
                if state.generation == handle.generation {
                    state.balance.stale = previously_stale;
                } else if state.is_bound_to(handle.account()) {
                    // rebound mid-flight; its reads already saw the unchanged chain
                    state.balance.stale = false;
                }
            }
            warn!(tx = %tx_hash, "operation reverted on chain: {}", reason);
            return Err(AtmError::RevertedOnChain { reason });
        }

        info!(tx = %tx_hash, block = ?receipt.block_number, %kind, amount, "operation confirmed");
        {
            let mut state = self.state.borrow_mut();
            if state.is_bound_to(handle.account()) {
                state.read_floor = state.read_seq;
            }
        }
        drop(guard);

        let balance_refreshed = match self.read_balance().await {
            Ok(_) => true,
            Err(err) => {
                warn!(tx = %tx_hash, "balance refresh after confirmation failed: {}", err);
                false
            }
        };

        Ok(Some(OperationReceipt {
            operation_id: operation.id,
            kind,
            amount,
            tx_hash,
            block_number: receipt.block_number,
            balance_refreshed,
        }))
    }

    fn changed(&self) {
        let listener = self.listener.borrow().clone();
        if let Some(listener) = listener {
            listener();
        }
    }
}

/// Clears the pending record on every exit path of `submit`.
struct PendingGuard<'a> {
    controller: &'a ContractController,
    account: Address,
    id: Uuid,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        let cleared = {
            let mut state = self.controller.state.borrow_mut();
            if state
                .pending
                .get(&self.account)
                .is_some_and(|pending| pending.id == self.id)
            {
                state.pending.remove(&self.account);
                true
            } else {
                false
            }
        };
        if cleared {
            self.controller.changed();
        }
    }
}
