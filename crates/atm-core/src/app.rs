//! Wires the wallet session to the contract controller and exposes one
//! observable snapshot to the view layer.

use atm_api_types::{AtmSnapshot, OperationKind, OperationReceipt};
use atm_provider::{ProviderSource, WalletEvent};
use std::cell::RefCell;
use std::rc::Rc;
use tracing::{debug, warn};

use crate::config::ContractConfig;
use crate::controller::ContractController;
use crate::error::AtmError;
use crate::session::{SessionChange, WalletSession};

type Observer = Rc<dyn Fn(&AtmSnapshot)>;

pub struct AtmApp {
    source: Rc<dyn ProviderSource>,
    session: WalletSession,
    controller: ContractController,
    last_error: RefCell<Option<AtmError>>,
    observers: RefCell<Vec<Observer>>,
}

impl AtmApp {
    pub fn new(source: Rc<dyn ProviderSource>, config: ContractConfig) -> Rc<Self> {
        let app = Rc::new(Self {
            source,
            session: WalletSession::new(),
            controller: ContractController::new(config),
            last_error: RefCell::new(None),
            observers: RefCell::new(Vec::new()),
        });

        let weak = Rc::downgrade(&app);
        app.controller.set_listener(move || {
            if let Some(app) = weak.upgrade() {
                app.notify();
            }
        });
        app
    }

    pub fn session(&self) -> &WalletSession {
        &self.session
    }

    pub fn controller(&self) -> &ContractController {
        &self.controller
    }

    pub fn subscribe(&self, observer: impl Fn(&AtmSnapshot) + 'static) {
        self.observers.borrow_mut().push(Rc::new(observer));
    }

    pub fn last_error(&self) -> Option<AtmError> {
        self.last_error.borrow().clone()
    }

    pub fn snapshot(&self) -> AtmSnapshot {
        let state = self.session.state();
        let balance = self.controller.balance();
        let last_error = self.last_error.borrow();
        AtmSnapshot {
            provider_present: self.session.provider_present(),
            session: state.status(),
            account: state.account().cloned(),
            balance: balance.value,
            balance_stale: balance.stale,
            pending: self.controller.pending(),
            last_error: last_error.as_ref().map(AtmError::kind),
            last_error_message: last_error.as_ref().map(ToString::to_string),
        }
    }

    /// Page load: detect the wallet, adopt an already-authorised account
    /// without prompting, read the balance. A missing wallet is not an error
    /// here; it only shows up as `provider_present == false`.
    pub async fn init(&self) -> Result<(), AtmError> {
        let result = self.adopt_existing().await;
        self.settle(result)
    }

    /// The "connect wallet" action.
    pub async fn connect(&self) -> Result<(), AtmError> {
        let result = self.prompt_connection().await;
        self.settle(result)
    }

    pub async fn refresh(&self) -> Result<u128, AtmError> {
        let result = self.controller.read_balance().await;
        self.settle(result)
    }

    pub async fn deposit(&self, amount: i128) -> Result<Option<OperationReceipt>, AtmError> {
        self.submit(OperationKind::Deposit, amount).await
    }

    pub async fn withdraw(&self, amount: i128) -> Result<Option<OperationReceipt>, AtmError> {
        self.submit(OperationKind::Withdraw, amount).await
    }

    pub async fn burn(&self, amount: i128) -> Result<Option<OperationReceipt>, AtmError> {
        self.submit(OperationKind::Burn, amount).await
    }

    pub async fn submit(
        &self,
        kind: OperationKind,
        amount: i128,
    ) -> Result<Option<OperationReceipt>, AtmError> {
        match self.controller.submit(kind, amount).await {
            // no-op amounts leave everything untouched, including the last error
            Ok(None) => Ok(None),
            result => self.settle(result),
        }
    }

    /// Apply a pushed wallet notification. Errors are recorded but never
    /// clear a previous one.
    pub async fn handle_wallet_event(&self, event: WalletEvent) -> Result<(), AtmError> {
        debug!(?event, "wallet event");
        let change = self.session.apply(event);
        let result = self.follow(change).await;
        if let Err(err) = &result {
            self.record(err);
        }
        self.notify();
        result
    }

    /// Polling stand-in for `accountsChanged` where the provider cannot push.
    pub async fn poll_accounts(&self) -> Result<(), AtmError> {
        let Some(provider) = self.session.provider() else {
            return Ok(());
        };
        let accounts = match provider.accounts().await {
            Ok(accounts) => accounts,
            Err(err) => {
                debug!("account poll failed: {}", err);
                return Err(AtmError::from_wallet(&err));
            }
        };
        if self.session.account().as_ref() == accounts.first() {
            return Ok(());
        }
        self.handle_wallet_event(WalletEvent::AccountsChanged(accounts))
            .await
    }

    async fn adopt_existing(&self) -> Result<(), AtmError> {
        if !self.session.detect_provider(self.source.as_ref()).await {
            return Ok(());
        }
        let change = self.session.query_existing_accounts().await?;
        self.follow(change).await
    }

    async fn prompt_connection(&self) -> Result<(), AtmError> {
        if !self.session.detect_provider(self.source.as_ref()).await {
            return Err(AtmError::NoProvider);
        }
        let change = self.session.request_connection().await?;
        self.follow(change).await
    }

    async fn follow(&self, change: Option<SessionChange>) -> Result<(), AtmError> {
        match change {
            Some(SessionChange::Connected { provider, account }) => {
                self.controller.bind(provider, account);
                self.controller.read_balance().await.map(|_| ())
            }
            Some(SessionChange::Disconnected) => {
                self.controller.unbind();
                Ok(())
            }
            None => Ok(()),
        }
    }

    fn settle<T>(&self, result: Result<T, AtmError>) -> Result<T, AtmError> {
        match &result {
            Ok(_) => {
                self.last_error.replace(None);
            }
            Err(err) => self.record(err),
        }
        self.notify();
        result
    }

    fn record(&self, err: &AtmError) {
        warn!(kind = ?err.kind(), "{}", err);
        self.last_error.replace(Some(err.clone()));
    }

    fn notify(&self) {
        let observers = self.observers.borrow().clone();
        if observers.is_empty() {
            return;
        }
        let snapshot = self.snapshot();
        for observer in observers {
            observer(&snapshot);
        }
    }
}
