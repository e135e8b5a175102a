//! Wallet session and ATM contract controller.
//!
//! Everything here is single-threaded: state lives in `RefCell`s shared
//! through `Rc`, and no borrow is held across an `.await`.

pub mod app;
pub mod config;
pub mod controller;
pub mod error;
pub mod session;

pub use app::AtmApp;
pub use config::ContractConfig;
pub use controller::{BalanceView, ContractController, ContractHandle, Signer};
pub use error::AtmError;
pub use session::{SessionChange, SessionState, WalletSession};
