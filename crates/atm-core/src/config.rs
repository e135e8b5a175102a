use anyhow::{Context, Result};
use atm_abi::InterfaceDescriptor;
use atm_api_types::Address;
use std::rc::Rc;
use std::time::Duration;

/// First deployment address on a fresh Hardhat node.
pub const DEFAULT_CONTRACT_ADDRESS: &str = "0x5FbDB2315678afecb367f032d93F642f64180aa3";
pub const DEFAULT_CONFIRMATION_POLL: Duration = Duration::from_millis(1000);

pub const BALANCE_FUNCTION: &str = "getBalance";
const REQUIRED_FUNCTIONS: [&str; 4] = [BALANCE_FUNCTION, "deposit", "withdraw", "burn"];
const MUTATING_FUNCTIONS: [&str; 3] = ["deposit", "withdraw", "burn"];

const ASSESSMENT_ARTIFACT: &str = include_str!("../artifacts/Assessment.json");

/// Fixed contract identity the controller binds signers to.
#[derive(Debug, Clone)]
pub struct ContractConfig {
    pub address: Address,
    pub interface: Rc<InterfaceDescriptor>,
    pub confirmation_poll: Duration,
}

impl ContractConfig {
    pub fn new(address: Address, interface: InterfaceDescriptor) -> Result<Self> {
        interface
            .require_functions(&REQUIRED_FUNCTIONS)
            .context("contract interface is missing an ATM function")?;
        interface
            .encode_call(BALANCE_FUNCTION, &[])
            .with_context(|| format!("{BALANCE_FUNCTION} must take no arguments"))?;
        for name in MUTATING_FUNCTIONS {
            interface
                .encode_call(name, &[1])
                .with_context(|| format!("{name} must take a single uint argument"))?;
        }
        Ok(Self {
            address,
            interface: Rc::new(interface),
            confirmation_poll: DEFAULT_CONFIRMATION_POLL,
        })
    }

    /// The bundled `Assessment` artifact at its default local address.
    pub fn assessment() -> Result<Self> {
        let address = Address::parse(DEFAULT_CONTRACT_ADDRESS)?;
        let interface = InterfaceDescriptor::from_artifact_json(ASSESSMENT_ARTIFACT)
            .context("bundled Assessment artifact")?;
        Self::new(address, interface)
    }

    /// `assessment()` with `ATM_CONTRACT_ADDRESS` and `ATM_CONFIRMATION_POLL_MS`
    /// overrides.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::assessment()?;

        if let Ok(raw) = std::env::var("ATM_CONTRACT_ADDRESS") {
            config.address = Address::parse(&raw)
                .with_context(|| format!("ATM_CONTRACT_ADDRESS={raw}"))?;
        }
        if let Ok(raw) = std::env::var("ATM_CONFIRMATION_POLL_MS") {
            let millis: u64 = raw
                .trim()
                .parse()
                .with_context(|| format!("ATM_CONFIRMATION_POLL_MS={raw}"))?;
            config.confirmation_poll = Duration::from_millis(millis);
        }

        Ok(config)
    }

    pub fn with_confirmation_poll(mut self, interval: Duration) -> Self {
        self.confirmation_poll = interval;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bundled_artifact_has_every_atm_function() {
        let config = ContractConfig::assessment().unwrap();
        assert_eq!(config.address.as_str(), "0x5fbdb2315678afecb367f032d93f642f64180aa3");
        assert_eq!(config.interface.contract_name(), "Assessment");
        assert!(config.interface.function(BALANCE_FUNCTION).unwrap().is_view());
    }

    #[test]
    fn interface_without_burn_is_rejected() {
        let abi = r#"[
            { "type": "function", "name": "getBalance", "inputs": [], "outputs": [{ "type": "uint256" }], "stateMutability": "view" },
            { "type": "function", "name": "deposit", "inputs": [{ "type": "uint256" }], "outputs": [] },
            { "type": "function", "name": "withdraw", "inputs": [{ "type": "uint256" }], "outputs": [] }
        ]"#;
        let interface = InterfaceDescriptor::from_artifact_json(abi).unwrap();
        let address = Address::parse(DEFAULT_CONTRACT_ADDRESS).unwrap();
        assert!(ContractConfig::new(address, interface).is_err());
    }

    #[test]
    fn interface_with_unencodable_argument_is_rejected() {
        let abi = r#"[
            { "type": "function", "name": "getBalance", "inputs": [], "outputs": [{ "type": "uint256" }], "stateMutability": "view" },
            { "type": "function", "name": "deposit", "inputs": [{ "type": "uint256" }], "outputs": [] },
            { "type": "function", "name": "withdraw", "inputs": [{ "type": "uint256" }], "outputs": [] },
            { "type": "function", "name": "burn", "inputs": [{ "type": "string" }], "outputs": [] }
        ]"#;
        let interface = InterfaceDescriptor::from_artifact_json(abi).unwrap();
        let address = Address::parse(DEFAULT_CONTRACT_ADDRESS).unwrap();
        let err = ContractConfig::new(address, interface).unwrap_err();
        assert!(format!("{err:#}").contains("burn"));
    }
}
