//! Chain identifiers
//!
//! Every per-chain registry in the engine is keyed by a `Chain`, a pair of
//! chain type and numeric chain id.

use borsh::{BorshDeserialize, BorshSerialize};
use serde::{Deserialize, Serialize};

/// Supported chain families
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, BorshSerialize, BorshDeserialize,
)]
pub enum ChainType {
    Evm,
}

impl ChainType {
    pub fn as_u8(&self) -> u8 {
        match self {
            ChainType::Evm => 0,
        }
    }

    pub fn from_u8(byte: u8) -> Option<Self> {
        match byte {
            0 => Some(ChainType::Evm),
            _ => None,
        }
    }
}

/// A chain identity: `(chainType, chainId)`
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, BorshSerialize, BorshDeserialize,
)]
pub struct Chain {
    pub chain_type: ChainType,
    pub id: u64,
}

impl Chain {
    pub fn evm(id: u64) -> Self {
        Self {
            chain_type: ChainType::Evm,
            id,
        }
    }

    /// Persisted key segment for this chain (`"<type>:<id>"`)
    pub fn key(&self) -> String {
        format!("{}:{}", self.chain_type.as_u8(), self.id)
    }
}

impl std::fmt::Display for Chain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.key())
    }
}
