//! Wallet session state machine.
//!
//! States: `NoProvider` → `ProviderDetected` → `Disconnected` → `Connected`.
//! The provider handle is set once and never replaced. Account changes, from
//! explicit connection or from wallet notifications, all go through `adopt`,
//! which reports a `SessionChange` whenever the signing identity moves.

use atm_api_types::{Address, SessionStatus};
use atm_provider::{Eip1193, ProviderSource, WalletEvent};
use std::cell::{OnceCell, RefCell};
use std::fmt;
use std::rc::Rc;
use tracing::{debug, info, warn};

use crate::error::AtmError;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum SessionState {
    #[default]
    NoProvider,
    ProviderDetected,
    Disconnected,
    Connected(Address),
}

impl SessionState {
    pub fn status(&self) -> SessionStatus {
        match self {
            SessionState::NoProvider => SessionStatus::NoProvider,
            SessionState::ProviderDetected => SessionStatus::ProviderDetected,
            SessionState::Disconnected => SessionStatus::Disconnected,
            SessionState::Connected(_) => SessionStatus::Connected,
        }
    }

    pub fn account(&self) -> Option<&Address> {
        match self {
            SessionState::Connected(account) => Some(account),
            _ => None,
        }
    }
}

/// A change of signing identity the contract controller must follow.
#[derive(Clone)]
pub enum SessionChange {
    Connected {
        provider: Rc<dyn Eip1193>,
        account: Address,
    },
    Disconnected,
}

impl fmt::Debug for SessionChange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionChange::Connected { account, .. } => {
                f.debug_struct("Connected").field("account", account).finish()
            }
            SessionChange::Disconnected => f.write_str("Disconnected"),
        }
    }
}

#[derive(Default)]
pub struct WalletSession {
    provider: OnceCell<Rc<dyn Eip1193>>,
    state: RefCell<SessionState>,
}

impl WalletSession {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> SessionState {
        self.state.borrow().clone()
    }

    pub fn provider(&self) -> Option<Rc<dyn Eip1193>> {
        self.provider.get().cloned()
    }

    pub fn provider_present(&self) -> bool {
        self.provider.get().is_some()
    }

    pub fn account(&self) -> Option<Address> {
        self.state.borrow().account().cloned()
    }

    /// Probe the environment for an injected provider. Retrying is allowed;
    /// once a provider is found it is kept for the life of the session.
    pub async fn detect_provider(&self, source: &dyn ProviderSource) -> bool {
        if self.provider_present() {
            return true;
        }

        let Some(provider) = source.detect().await else {
            debug!("no wallet provider found");
            return false;
        };

        // a concurrent detection may already have stored one
        if self.provider.set(provider).is_ok() {
            info!("wallet provider detected");
            let mut state = self.state.borrow_mut();
            if *state == SessionState::NoProvider {
                *state = SessionState::ProviderDetected;
            }
        }
        true
    }

    /// Already-authorised accounts, without prompting the user.
    pub async fn query_existing_accounts(&self) -> Result<Option<SessionChange>, AtmError> {
        let provider = self.provider().ok_or(AtmError::NoProvider)?;
        let accounts = provider
            .accounts()
            .await
            .map_err(|err| AtmError::from_wallet(&err))?;
        Ok(self.adopt(accounts))
    }

    /// Prompt the user to authorise an account. A rejection is reported and
    /// never retried.
    pub async fn request_connection(&self) -> Result<Option<SessionChange>, AtmError> {
        let provider = self.provider().ok_or(AtmError::NoProvider)?;
        match provider.request_accounts().await {
            Ok(accounts) => Ok(self.adopt(accounts)),
            Err(err) => {
                let err = AtmError::from_wallet(&err);
                if err == AtmError::RejectedByUser {
                    info!("wallet connection rejected by user");
                    let mut state = self.state.borrow_mut();
                    if *state == SessionState::ProviderDetected {
                        *state = SessionState::Disconnected;
                    }
                }
                Err(err)
            }
        }
    }

    /// Transition on a wallet notification.
    pub fn apply(&self, event: WalletEvent) -> Option<SessionChange> {
        if !self.provider_present() {
            warn!("ignoring wallet event without a provider: {:?}", event);
            return None;
        }
        match event {
            WalletEvent::AccountsChanged(accounts) => self.adopt(accounts),
            WalletEvent::Disconnected => self.adopt(Vec::new()),
        }
    }

    fn adopt(&self, accounts: Vec<Address>) -> Option<SessionChange> {
        let provider = self.provider()?;
        let next = match accounts.into_iter().next() {
            Some(account) => SessionState::Connected(account),
            None => SessionState::Disconnected,
        };

        let previous = {
            let mut state = self.state.borrow_mut();
            if *state == next {
                return None;
            }
            std::mem::replace(&mut *state, next.clone())
        };

        match next {
            SessionState::Connected(account) => {
                info!(account = %account, "wallet account connected");
                Some(SessionChange::Connected { provider, account })
            }
            _ if previous.account().is_some() => {
                info!("wallet account disconnected");
                Some(SessionChange::Disconnected)
            }
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use atm_provider::ProviderError;
    use serde_json::{Value, json};
    use std::cell::Cell;
    use std::time::Duration;

    #[derive(Default)]
    struct Stub {
        authorised: RefCell<Vec<&'static str>>,
        reject_prompt: Cell<bool>,
    }

    #[async_trait(?Send)]
    impl Eip1193 for Stub {
        async fn request(&self, method: &str, _params: Value) -> Result<Value, ProviderError> {
            match method {
                "eth_accounts" => Ok(json!(*self.authorised.borrow())),
                "eth_requestAccounts" if self.reject_prompt.get() => Err(ProviderError::Rpc {
                    code: ProviderError::USER_REJECTED,
                    message: "User rejected the request.".into(),
                    data: None,
                }),
                "eth_requestAccounts" => {
                    self.authorised.borrow_mut().push(ALICE);
                    Ok(json!(*self.authorised.borrow()))
                }
                other => Err(ProviderError::Transport(format!("unexpected {other}"))),
            }
        }

        async fn idle(&self, _interval: Duration) {}
    }

    struct Source(Option<Rc<Stub>>);

    #[async_trait(?Send)]
    impl ProviderSource for Source {
        async fn detect(&self) -> Option<Rc<dyn Eip1193>> {
            self.0.clone().map(|stub| stub as Rc<dyn Eip1193>)
        }
    }

    const ALICE: &str = "0xabababababababababababababababababababab";
    const BOB: &str = "0xbcbcbcbcbcbcbcbcbcbcbcbcbcbcbcbcbcbcbcbc";

    fn addr(raw: &str) -> Address {
        Address::parse(raw).unwrap()
    }

    #[tokio::test]
    async fn without_provider_connection_reports_no_provider() {
        let session = WalletSession::new();
        assert!(!session.detect_provider(&Source(None)).await);
        assert_eq!(session.state(), SessionState::NoProvider);
        assert_eq!(session.request_connection().await.unwrap_err(), AtmError::NoProvider);
        assert_eq!(session.query_existing_accounts().await.unwrap_err(), AtmError::NoProvider);
    }

    #[tokio::test]
    async fn provider_is_detected_once_and_kept() {
        let session = WalletSession::new();
        let source = Source(Some(Rc::new(Stub::default())));
        assert!(session.detect_provider(&source).await);
        let first = session.provider().unwrap();
        assert!(session.detect_provider(&Source(Some(Rc::new(Stub::default())))).await);
        assert!(Rc::ptr_eq(&first, &session.provider().unwrap()));
        assert_eq!(session.state(), SessionState::ProviderDetected);
    }

    #[tokio::test]
    async fn existing_accounts_connect_without_prompt() {
        let stub = Rc::new(Stub::default());
        let session = WalletSession::new();
        session.detect_provider(&Source(Some(stub.clone()))).await;

        assert!(session.query_existing_accounts().await.unwrap().is_none());
        assert_eq!(session.state(), SessionState::Disconnected);

        stub.authorised.borrow_mut().push(BOB);
        let change = session.query_existing_accounts().await.unwrap();
        assert!(matches!(change, Some(SessionChange::Connected { account, .. }) if account == addr(BOB)));
        assert_eq!(session.account(), Some(addr(BOB)));
    }

    #[tokio::test]
    async fn rejected_prompt_leaves_session_disconnected() {
        let stub = Rc::new(Stub::default());
        stub.reject_prompt.set(true);
        let session = WalletSession::new();
        session.detect_provider(&Source(Some(stub.clone()))).await;

        assert_eq!(session.request_connection().await.unwrap_err(), AtmError::RejectedByUser);
        assert_eq!(session.state(), SessionState::Disconnected);

        stub.reject_prompt.set(false);
        let change = session.request_connection().await.unwrap();
        assert!(matches!(change, Some(SessionChange::Connected { .. })));
        assert_eq!(session.state().status(), SessionStatus::Connected);
    }

    #[tokio::test]
    async fn account_notifications_drive_transitions() {
        let session = WalletSession::new();
        session
            .detect_provider(&Source(Some(Rc::new(Stub::default()))))
            .await;

        let change = session.apply(WalletEvent::AccountsChanged(vec![addr(ALICE)]));
        assert!(matches!(change, Some(SessionChange::Connected { .. })));
        assert!(session
            .apply(WalletEvent::AccountsChanged(vec![addr(ALICE)]))
            .is_none());

        let change = session.apply(WalletEvent::AccountsChanged(vec![addr(BOB), addr(ALICE)]));
        assert!(matches!(change, Some(SessionChange::Connected { account, .. }) if account == addr(BOB)));

        let change = session.apply(WalletEvent::Disconnected);
        assert!(matches!(change, Some(SessionChange::Disconnected)));
        assert_eq!(session.state(), SessionState::Disconnected);
        assert!(session.apply(WalletEvent::AccountsChanged(Vec::new())).is_none());
    }

    #[test]
    fn events_without_provider_are_ignored() {
        let session = WalletSession::new();
        assert!(session
            .apply(WalletEvent::AccountsChanged(vec![addr(ALICE)]))
            .is_none());
        assert_eq!(session.state(), SessionState::NoProvider);
    }
}
