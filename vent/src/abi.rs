use std::collections::HashMap;

use ethers::abi::{Event as AbiEvent, EventParam, ParamType};
use ethers::types::H256;
use serde::Deserialize;

use crate::spec::{collect, SpecError, SpecSource};

/// 32-byte hash identifying an event schema; matches the first topic of
/// non-anonymous logs. Anonymous events use the zero id.
pub type EventId = H256;

/// Declarative form of one ABI event schema.
#[derive(Clone, Debug, Deserialize)]
pub struct EventDecl {
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(rename = "Anonymous", default)]
    pub anonymous: bool,
    #[serde(rename = "Inputs")]
    pub inputs: Vec<InputDecl>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct InputDecl {
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(rename = "EVMType")]
    pub evm_type: String,
    #[serde(rename = "Indexed", default)]
    pub indexed: bool,
}

impl EventDecl {
    /// Resolves the declaration into the codec's event form, validating every
    /// input type against the supported lattice.
    pub fn to_abi_event(&self) -> Result<AbiEvent, SpecError> {
        if self.name.is_empty() {
            return Err(SpecError::MissingEventName);
        }
        if self.inputs.is_empty() {
            return Err(SpecError::NoEventInputs(self.name.clone()));
        }

        let mut inputs = Vec::with_capacity(self.inputs.len());
        for input in &self.inputs {
            inputs.push(EventParam {
                name: input.name.clone(),
                kind: parse_evm_type(&input.evm_type)?,
                indexed: input.indexed,
            });
        }

        Ok(AbiEvent {
            name: self.name.clone(),
            inputs,
            anonymous: self.anonymous,
        })
    }

    pub fn event_id(&self) -> Result<EventId, SpecError> {
        if self.anonymous {
            return Ok(EventId::zero());
        }

        Ok(self.to_abi_event()?.signature())
    }
}

/// Resolved ABI specification keyed by event id, consulted once per log.
#[derive(Debug, Default)]
pub struct AbiIndex {
    events: HashMap<EventId, AbiEvent>,
}

impl AbiIndex {
    pub fn load(source: &SpecSource) -> Result<AbiIndex, SpecError> {
        let declarations: Vec<EventDecl> = collect(source)?;
        Self::from_declarations(&declarations)
    }

    pub fn from_declarations(declarations: &[EventDecl]) -> Result<AbiIndex, SpecError> {
        let mut events = HashMap::new();

        for declaration in declarations {
            let id = declaration.event_id()?;
            let event = declaration.to_abi_event()?;

            if events.insert(id, event).is_some() {
                return Err(SpecError::DuplicateEventId(declaration.name.clone()));
            }
        }

        Ok(AbiIndex { events })
    }

    pub fn get(&self, id: &EventId) -> Option<&AbiEvent> {
        self.events.get(id)
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

/// Parses an EVM type string, restricted to the types the engine can project.
/// Bare `int`/`uint` canonicalize to their 256-bit forms.
pub fn parse_evm_type(evm_type: &str) -> Result<ParamType, SpecError> {
    let unmapped = || SpecError::UnmappedEvmType(evm_type.to_string());
    let trimmed = evm_type.trim();

    if let Some(inner) = trimmed.strip_suffix("[]") {
        return Ok(ParamType::Array(Box::new(parse_evm_type(inner)?)));
    }
    if let Some(open) = trimmed.strip_suffix(']').and_then(|rest| rest.rfind('[')) {
        let size: usize = trimmed[open + 1..trimmed.len() - 1].parse().map_err(|_| unmapped())?;
        return Ok(ParamType::FixedArray(
            Box::new(parse_evm_type(&trimmed[..open])?),
            size,
        ));
    }

    match trimmed {
        "address" => Ok(ParamType::Address),
        "bool" => Ok(ParamType::Bool),
        "string" => Ok(ParamType::String),
        "bytes" => Ok(ParamType::Bytes),
        "int" => Ok(ParamType::Int(256)),
        "uint" => Ok(ParamType::Uint(256)),
        _ => {
            if let Some(size) = trimmed.strip_prefix("bytes") {
                let size: usize = size.parse().map_err(|_| unmapped())?;
                if (1..=32).contains(&size) {
                    return Ok(ParamType::FixedBytes(size));
                }
            } else if let Some(bits) = trimmed.strip_prefix("uint") {
                let bits: usize = bits.parse().map_err(|_| unmapped())?;
                if bits % 8 == 0 && (8..=256).contains(&bits) {
                    return Ok(ParamType::Uint(bits));
                }
            } else if let Some(bits) = trimmed.strip_prefix("int") {
                let bits: usize = bits.parse().map_err(|_| unmapped())?;
                if bits % 8 == 0 && (8..=256).contains(&bits) {
                    return Ok(ParamType::Int(bits));
                }
            }

            Err(unmapped())
        }
    }
}
