//! Contract interface descriptor and the small slice of the Solidity ABI the
//! ATM contract needs: `uint` arguments, a `uint` return, and revert payloads.
//!
//! The descriptor is read from a compiled Hardhat artifact and otherwise
//! treated as an opaque schema.

use serde::Deserialize;
use serde_json::Value;
use sha3::{Digest, Keccak256};
use std::collections::HashMap;

pub const WORD: usize = 32;

const ERROR_STRING_SELECTOR: [u8; 4] = [0x08, 0xc3, 0x79, 0xa0];
const PANIC_SELECTOR: [u8; 4] = [0x4e, 0x48, 0x7b, 0x71];

#[derive(Debug, thiserror::Error)]
pub enum AbiError {
    #[error("invalid contract artifact: {0}")]
    Artifact(#[from] serde_json::Error),
    #[error("interface has no function `{0}`")]
    MissingFunction(String),
    #[error("function `{function}` takes {expected} arguments, got {got}")]
    ArgumentCount {
        function: String,
        expected: usize,
        got: usize,
    },
    #[error("function `{function}` uses unsupported type `{ty}`")]
    UnsupportedType { function: String, ty: String },
    #[error("invalid hex: {0}")]
    Hex(#[from] hex::FromHexError),
    #[error("return data too short: {0} bytes")]
    Truncated(usize),
    #[error("value does not fit in 128 bits")]
    Overflow,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Param {
    #[serde(default)]
    pub name: String,
    #[serde(rename = "type")]
    pub ty: String,
}

impl Param {
    fn is_uint(&self) -> bool {
        self.ty.starts_with("uint")
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Function {
    pub name: String,
    #[serde(default)]
    pub inputs: Vec<Param>,
    #[serde(default)]
    pub outputs: Vec<Param>,
    #[serde(default, rename = "stateMutability")]
    pub state_mutability: String,
}

impl Function {
    pub fn signature(&self) -> String {
        canonical_signature(&self.name, &self.inputs)
    }

    pub fn selector(&self) -> [u8; 4] {
        selector(&self.signature())
    }

    pub fn is_view(&self) -> bool {
        matches!(self.state_mutability.as_str(), "view" | "pure")
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CustomError {
    pub name: String,
    #[serde(default)]
    pub inputs: Vec<Param>,
}

impl CustomError {
    pub fn signature(&self) -> String {
        canonical_signature(&self.name, &self.inputs)
    }
}

#[derive(Debug, Deserialize)]
struct Artifact {
    #[serde(rename = "contractName", default)]
    contract_name: String,
    abi: Vec<Value>,
}

/// Function and error tables of one contract.
#[derive(Debug, Clone)]
pub struct InterfaceDescriptor {
    contract_name: String,
    functions: HashMap<String, Function>,
    errors: HashMap<[u8; 4], CustomError>,
}

impl InterfaceDescriptor {
    /// Accepts a full Hardhat artifact (`{ "contractName", "abi", .. }`) or a
    /// bare ABI array.
    pub fn from_artifact_json(json: &str) -> Result<Self, AbiError> {
        let raw: Value = serde_json::from_str(json)?;
        match raw {
            Value::Array(items) => Self::from_abi("", items),
            other => {
                let artifact: Artifact = serde_json::from_value(other)?;
                Self::from_abi(&artifact.contract_name, artifact.abi)
            }
        }
    }

    pub fn from_abi(contract_name: &str, items: Vec<Value>) -> Result<Self, AbiError> {
        let mut functions = HashMap::new();
        let mut errors = HashMap::new();

        for item in items {
            match item.get("type").and_then(Value::as_str) {
                Some("function") => {
                    let function: Function = serde_json::from_value(item)?;
                    functions.insert(function.name.clone(), function);
                }
                Some("error") => {
                    let error: CustomError = serde_json::from_value(item)?;
                    errors.insert(selector(&error.signature()), error);
                }
                // events, constructor, receive and fallback carry nothing we call
                _ => {}
            }
        }

        Ok(Self {
            contract_name: contract_name.to_owned(),
            functions,
            errors,
        })
    }

    pub fn contract_name(&self) -> &str {
        &self.contract_name
    }

    pub fn function(&self, name: &str) -> Result<&Function, AbiError> {
        self.functions
            .get(name)
            .ok_or_else(|| AbiError::MissingFunction(name.to_owned()))
    }

    pub fn require_functions(&self, names: &[&str]) -> Result<(), AbiError> {
        for name in names {
            self.function(name)?;
        }
        Ok(())
    }

    /// Calldata for `name(args..)`. Only unsigned integer parameters are supported.
    pub fn encode_call(&self, name: &str, args: &[u128]) -> Result<Vec<u8>, AbiError> {
        let function = self.function(name)?;
        if function.inputs.len() != args.len() {
            return Err(AbiError::ArgumentCount {
                function: name.to_owned(),
                expected: function.inputs.len(),
                got: args.len(),
            });
        }
        if let Some(param) = function.inputs.iter().find(|p| !p.is_uint()) {
            return Err(AbiError::UnsupportedType {
                function: name.to_owned(),
                ty: param.ty.clone(),
            });
        }

        let mut data = Vec::with_capacity(4 + WORD * args.len());
        data.extend_from_slice(&function.selector());
        for arg in args {
            data.extend_from_slice(&encode_uint(*arg));
        }
        Ok(data)
    }

    /// Decode the first return value of `name`, which must be an unsigned integer.
    pub fn decode_uint_output(&self, name: &str, data: &[u8]) -> Result<u128, AbiError> {
        let function = self.function(name)?;
        match function.outputs.first() {
            Some(param) if param.is_uint() => {}
            Some(param) => {
                return Err(AbiError::UnsupportedType {
                    function: name.to_owned(),
                    ty: param.ty.clone(),
                });
            }
            None => {
                return Err(AbiError::UnsupportedType {
                    function: name.to_owned(),
                    ty: "()".to_owned(),
                });
            }
        }
        if data.len() < WORD {
            return Err(AbiError::Truncated(data.len()));
        }
        decode_uint(&data[..WORD])
    }

    /// Human-readable reason for revert data: `Error(string)`, `Panic(uint256)`
    /// or one of the contract's custom errors. Returns `None` for empty data.
    pub fn decode_revert(&self, data: &[u8]) -> Option<String> {
        if data.len() < 4 {
            return None;
        }
        let (head, body) = data.split_at(4);
        let head: [u8; 4] = [head[0], head[1], head[2], head[3]];

        if head == ERROR_STRING_SELECTOR {
            return decode_string(body).or_else(|| Some("malformed Error(string)".to_owned()));
        }
        if head == PANIC_SELECTOR {
            let code = body.get(..WORD).and_then(|word| decode_uint(word).ok());
            return Some(match code {
                Some(code) => format!("panic code 0x{code:02x}"),
                None => "panic".to_owned(),
            });
        }
        if let Some(error) = self.errors.get(&head) {
            let fields: Vec<String> = error
                .inputs
                .iter()
                .enumerate()
                .map(|(index, param)| {
                    let word = body.get(index * WORD..(index + 1) * WORD);
                    let value = match word {
                        Some(word) if param.is_uint() => decode_uint(word)
                            .map(|v| v.to_string())
                            .unwrap_or_else(|_| to_hex_prefixed(word)),
                        Some(word) => to_hex_prefixed(word),
                        None => "?".to_owned(),
                    };
                    if param.name.is_empty() {
                        value
                    } else {
                        format!("{}: {}", param.name, value)
                    }
                })
                .collect();
            return Some(format!("{}({})", error.name, fields.join(", ")));
        }

        Some(format!("unrecognised revert {}", to_hex_prefixed(data)))
    }
}

fn canonical_signature(name: &str, inputs: &[Param]) -> String {
    let types: Vec<&str> = inputs.iter().map(|p| p.ty.as_str()).collect();
    format!("{}({})", name, types.join(","))
}

pub fn keccak256(data: &[u8]) -> [u8; 32] {
    let mut out = [0_u8; 32];
    out.copy_from_slice(&Keccak256::digest(data));
    out
}

pub fn selector(signature: &str) -> [u8; 4] {
    let hash = keccak256(signature.as_bytes());
    [hash[0], hash[1], hash[2], hash[3]]
}

pub fn encode_uint(value: u128) -> [u8; WORD] {
    let mut word = [0_u8; WORD];
    word[16..].copy_from_slice(&value.to_be_bytes());
    word
}

pub fn decode_uint(word: &[u8]) -> Result<u128, AbiError> {
    if word.len() != WORD {
        return Err(AbiError::Truncated(word.len()));
    }
    if word[..16].iter().any(|byte| *byte != 0) {
        return Err(AbiError::Overflow);
    }
    let mut low = [0_u8; 16];
    low.copy_from_slice(&word[16..]);
    Ok(u128::from_be_bytes(low))
}

fn decode_string(body: &[u8]) -> Option<String> {
    let offset = usize::try_from(decode_uint(body.get(..WORD)?).ok()?).ok()?;
    let len_end = offset.checked_add(WORD)?;
    let len = usize::try_from(decode_uint(body.get(offset..len_end)?).ok()?).ok()?;
    let bytes = body.get(len_end..len_end.checked_add(len)?)?;
    Some(String::from_utf8_lossy(bytes).into_owned())
}

pub fn to_hex_prefixed(bytes: &[u8]) -> String {
    format!("0x{}", hex::encode(bytes))
}

pub fn from_hex_prefixed(input: &str) -> Result<Vec<u8>, AbiError> {
    let digits = input.strip_prefix("0x").unwrap_or(input);
    Ok(hex::decode(digits)?)
}
