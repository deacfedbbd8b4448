//! Shielded address encoding
//!
//! A shielded address is a bech32m string with human-readable part `0zk`
//! over the payload `(masterPublicKey: 32 || viewingPublicKey: 32 ||
//! chainType: 1 || chainId: varint)`. The chain-type byte `0xff` marks an
//! address valid on any chain.

use ark_bn254::Fr;
use bech32::{FromBase32, ToBase32, Variant};
use serde::{Deserialize, Serialize};

use crate::bytes::{fr_from_bytes, fr_to_bytes};
use crate::chain::{Chain, ChainType};
use crate::error::{EngineError, EngineResult};

/// Human-readable part of shielded addresses
pub const ADDRESS_HRP: &str = "0zk";

const ANY_CHAIN_TYPE: u8 = 0xff;

/// The public material a shielded address carries
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddressData {
    #[serde(with = "fr_hex")]
    pub master_public_key: Fr,
    pub viewing_public_key: [u8; 32],
    /// `None` encodes an address usable on any chain
    pub chain: Option<Chain>,
}

mod fr_hex {
    use super::*;
    use serde::{Deserializer, Serializer};

    pub fn serialize<S: Serializer>(fr: &Fr, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&crate::bytes::fr_to_hex(fr))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Fr, D::Error> {
        let s = String::deserialize(d)?;
        let bytes = crate::bytes::hex_to_fixed::<32>(&s).map_err(serde::de::Error::custom)?;
        Ok(fr_from_bytes(&bytes))
    }
}

/// Encode address material as a `0zk1…` string
pub fn encode_address(data: &AddressData) -> String {
    let mut payload = Vec::with_capacity(72);
    payload.extend_from_slice(&fr_to_bytes(&data.master_public_key));
    payload.extend_from_slice(&data.viewing_public_key);
    match data.chain {
        Some(chain) => {
            payload.push(chain.chain_type.as_u8());
            write_varint(&mut payload, chain.id);
        }
        None => payload.push(ANY_CHAIN_TYPE),
    }

    bech32::encode(ADDRESS_HRP, payload.to_base32(), Variant::Bech32m)
        .expect("hrp is valid lowercase ascii")
}

/// Decode a `0zk1…` string back into address material
pub fn decode_address(address: &str) -> EngineResult<AddressData> {
    let (hrp, data, variant) = bech32::decode(address)
        .map_err(|e| EngineError::AddressDecode(format!("bech32: {e}")))?;
    if hrp != ADDRESS_HRP {
        return Err(EngineError::AddressDecode(format!("unexpected prefix {hrp}")));
    }
    if variant != Variant::Bech32m {
        return Err(EngineError::AddressDecode("not bech32m".into()));
    }
    let payload = Vec::<u8>::from_base32(&data)
        .map_err(|e| EngineError::AddressDecode(format!("base32: {e}")))?;
    if payload.len() < 65 {
        return Err(EngineError::AddressDecode("payload too short".into()));
    }

    let mut mpk = [0u8; 32];
    mpk.copy_from_slice(&payload[..32]);
    let mut viewing_public_key = [0u8; 32];
    viewing_public_key.copy_from_slice(&payload[32..64]);

    let chain = match payload[64] {
        ANY_CHAIN_TYPE => None,
        byte => {
            let chain_type = ChainType::from_u8(byte)
                .ok_or_else(|| EngineError::AddressDecode(format!("unknown chain type {byte}")))?;
            let id = read_varint(&payload[65..])?;
            Some(Chain { chain_type, id })
        }
    };

    Ok(AddressData {
        master_public_key: fr_from_bytes(&mpk),
        viewing_public_key,
        chain,
    })
}

fn write_varint(out: &mut Vec<u8>, mut value: u64) {
    loop {
        let byte = (value & 0x7f) as u8;
        value >>= 7;
        if value == 0 {
            out.push(byte);
            return;
        }
        out.push(byte | 0x80);
    }
}

fn read_varint(bytes: &[u8]) -> EngineResult<u64> {
    let mut value = 0u64;
    let mut shift = 0u32;
    for byte in bytes {
        if shift >= 64 {
            return Err(EngineError::AddressDecode("chain id varint overflow".into()));
        }
        value |= u64::from(byte & 0x7f) << shift;
        if byte & 0x80 == 0 {
            return Ok(value);
        }
        shift += 7;
    }
    Err(EngineError::AddressDecode("truncated chain id varint".into()))
}
