use atm_abi::InterfaceDescriptor;
use atm_api_types::ErrorKind;
use atm_provider::ProviderError;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AtmError {
    #[error("no wallet provider detected; install a browser wallet such as MetaMask")]
    NoProvider,
    #[error("request rejected in the wallet")]
    RejectedByUser,
    #[error("transaction reverted: {reason}")]
    RevertedOnChain { reason: String },
    #[error("network error: {0}")]
    Network(String),
    #[error("contract is not bound; connect a wallet first")]
    NotBound,
    #[error("another operation is still pending")]
    OperationInProgress,
    #[error("balance read failed: {0}")]
    Read(String),
    #[error("contract interface cannot encode the call: {0}")]
    Interface(String),
}

impl AtmError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            AtmError::NoProvider => ErrorKind::NoProvider,
            AtmError::RejectedByUser => ErrorKind::RejectedByUser,
            AtmError::RevertedOnChain { .. } => ErrorKind::RevertedOnChain,
            AtmError::Network(_) => ErrorKind::NetworkError,
            AtmError::NotBound => ErrorKind::NotBound,
            AtmError::OperationInProgress => ErrorKind::OperationInProgress,
            AtmError::Read(_) => ErrorKind::ReadError,
            AtmError::Interface(_) => ErrorKind::InterfaceError,
        }
    }

    /// Re-invoking the same call with the same inputs is safe.
    pub fn is_retryable(&self) -> bool {
        matches!(self, AtmError::Network(_) | AtmError::Read(_))
    }

    /// Classify a failed mutating call. Revert payloads are decoded against the
    /// contract interface and surfaced verbatim.
    pub(crate) fn from_submit(err: &ProviderError, interface: &InterfaceDescriptor) -> Self {
        if err.is_user_rejection() {
            return AtmError::RejectedByUser;
        }
        if err.is_revert() {
            let reason = err
                .revert_data()
                .and_then(|data| interface.decode_revert(&data))
                .unwrap_or_else(|| err.message());
            return AtmError::RevertedOnChain { reason };
        }
        AtmError::Network(err.to_string())
    }

    pub(crate) fn from_wallet(err: &ProviderError) -> Self {
        if err.is_user_rejection() {
            AtmError::RejectedByUser
        } else {
            AtmError::Network(err.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ContractConfig;
    use serde_json::json;

    fn interface() -> std::rc::Rc<InterfaceDescriptor> {
        ContractConfig::assessment().unwrap().interface
    }

    #[test]
    fn only_network_and_read_are_retryable() {
        assert!(AtmError::Network("timeout".into()).is_retryable());
        assert!(AtmError::Read("timeout".into()).is_retryable());
        assert!(!AtmError::RejectedByUser.is_retryable());
        assert!(!AtmError::RevertedOnChain { reason: "x".into() }.is_retryable());
        assert!(!AtmError::OperationInProgress.is_retryable());
        assert!(!AtmError::NotBound.is_retryable());
        assert!(!AtmError::NoProvider.is_retryable());
        assert!(!AtmError::Interface("tuple".into()).is_retryable());
    }

    #[test]
    fn user_rejection_wins_over_everything() {
        let err = ProviderError::Rpc {
            code: ProviderError::USER_REJECTED,
            message: "User rejected the request.".into(),
            data: None,
        };
        assert_eq!(AtmError::from_submit(&err, &interface()), AtmError::RejectedByUser);
        assert_eq!(AtmError::from_wallet(&err), AtmError::RejectedByUser);
    }

    #[test]
    fn revert_reason_is_decoded_from_custom_error() {
        let mut data = atm_abi::selector("InsufficientBalance(uint256,uint256)").to_vec();
        data.extend_from_slice(&atm_abi::encode_uint(140));
        data.extend_from_slice(&atm_abi::encode_uint(500));
        let err = ProviderError::Rpc {
            code: -32603,
            message: "Internal JSON-RPC error.".into(),
            data: Some(json!({ "data": atm_abi::to_hex_prefixed(&data) })),
        };

        assert_eq!(
            AtmError::from_submit(&err, &interface()),
            AtmError::RevertedOnChain {
                reason: "InsufficientBalance(balance: 140, withdrawAmount: 500)".into()
            }
        );
    }

    #[test]
    fn revert_without_data_keeps_the_wallet_message() {
        let err = ProviderError::Rpc {
            code: ProviderError::EXECUTION_REVERTED,
            message: "execution reverted".into(),
            data: None,
        };
        assert_eq!(
            AtmError::from_submit(&err, &interface()),
            AtmError::RevertedOnChain { reason: "execution reverted".into() }
        );
    }

    #[test]
    fn transport_failures_are_network_errors() {
        let err = ProviderError::Transport("connection refused".into());
        assert_eq!(AtmError::from_submit(&err, &interface()).kind(), ErrorKind::NetworkError);
        assert_eq!(AtmError::from_wallet(&err).kind(), ErrorKind::NetworkError);
    }
}
