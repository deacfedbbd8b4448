//! Token identities
//!
//! Every asset in the pool is keyed by its token hash, a Poseidon digest of
//! the token type tag, contract address, and sub-identifier.

use alloy_primitives::{Address, U256};
use ark_bn254::Fr;
use borsh::{BorshDeserialize, BorshSerialize};
use serde::{Deserialize, Serialize};
use std::io;

use crate::bytes::{address_to_fr, fr_to_bytes, u256_to_fr};
use crate::poseidon::poseidon3;

/// An asset spendable inside the pool
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TokenData {
    Erc20(Address),
    Erc721(Address, U256),
    Erc1155(Address, U256),
}

impl TokenData {
    fn tag(&self) -> u8 {
        match self {
            TokenData::Erc20(_) => 0,
            TokenData::Erc721(..) => 1,
            TokenData::Erc1155(..) => 2,
        }
    }

    pub fn address(&self) -> Address {
        match self {
            TokenData::Erc20(addr) | TokenData::Erc721(addr, _) | TokenData::Erc1155(addr, _) => {
                *addr
            }
        }
    }

    pub fn sub_id(&self) -> U256 {
        match self {
            TokenData::Erc20(_) => U256::ZERO,
            TokenData::Erc721(_, id) | TokenData::Erc1155(_, id) => *id,
        }
    }

    /// `Poseidon(tag, address, subId)`, the key of all per-token storage
    pub fn token_hash(&self) -> Fr {
        poseidon3(
            Fr::from(self.tag() as u64),
            address_to_fr(&self.address()),
            u256_to_fr(&self.sub_id()),
        )
    }

    pub fn token_hash_bytes(&self) -> [u8; 32] {
        fr_to_bytes(&self.token_hash())
    }
}

impl BorshSerialize for TokenData {
    fn serialize<W: io::Write>(&self, writer: &mut W) -> io::Result<()> {
        BorshSerialize::serialize(&self.tag(), writer)?;
        let mut addr = [0u8; 20];
        addr.copy_from_slice(self.address().as_slice());
        BorshSerialize::serialize(&addr, writer)?;
        BorshSerialize::serialize(&self.sub_id().to_be_bytes::<32>(), writer)
    }
}

impl BorshDeserialize for TokenData {
    fn deserialize_reader<R: io::Read>(reader: &mut R) -> io::Result<Self> {
        let tag = u8::deserialize_reader(reader)?;
        let addr = <[u8; 20]>::deserialize_reader(reader)?;
        let sub_id = <[u8; 32]>::deserialize_reader(reader)?;
        let address = Address::from_slice(&addr);
        let sub_id = U256::from_be_bytes(sub_id);
        match tag {
            0 => Ok(TokenData::Erc20(address)),
            1 => Ok(TokenData::Erc721(address, sub_id)),
            2 => Ok(TokenData::Erc1155(address, sub_id)),
            other => Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("unknown token tag {other}"),
            )),
        }
    }
}
