//! Fixed-width byte and hex conversions
//!
//! All hex encoding in the engine is big-endian with a fixed width per field.

use alloy_primitives::{Address, U256};
use ark_bn254::Fr;
use ark_ff::{BigInteger, PrimeField};

use crate::error::{EngineError, EngineResult};

/// Byte widths of wire-format fields
pub mod byte_length {
    pub const UINT_256: usize = 32;
    pub const UINT_128: usize = 16;
    pub const ADDRESS: usize = 20;
}

/// Strip an optional `0x` prefix
pub fn strip_0x(s: &str) -> &str {
    s.strip_prefix("0x").unwrap_or(s)
}

/// Parse hex into exactly `N` bytes, left-padding odd-length input with a zero nibble
pub fn hex_to_fixed<const N: usize>(s: &str) -> EngineResult<[u8; N]> {
    let s = strip_0x(s);
    let padded = if s.len() % 2 == 1 {
        format!("0{s}")
    } else {
        s.to_string()
    };
    let bytes = hex::decode(&padded)
        .map_err(|e| EngineError::InvalidNoteData(format!("bad hex: {e}")))?;
    if bytes.len() > N {
        return Err(EngineError::InvalidNoteData(format!(
            "hex too long: {} bytes for width {N}",
            bytes.len()
        )));
    }
    let mut out = [0u8; N];
    out[N - bytes.len()..].copy_from_slice(&bytes);
    Ok(out)
}

/// Parse a big-endian hex string into a u128
pub fn hex_to_u128(s: &str) -> EngineResult<u128> {
    let bytes = hex_to_fixed::<16>(s)?;
    Ok(u128::from_be_bytes(bytes))
}

/// Field element to 32 big-endian bytes
pub fn fr_to_bytes(fr: &Fr) -> [u8; 32] {
    let raw = fr.into_bigint().to_bytes_be();
    let mut out = [0u8; 32];
    out[32 - raw.len()..].copy_from_slice(&raw);
    out
}

/// 32 big-endian bytes to a field element (reduced mod p)
pub fn fr_from_bytes(bytes: &[u8; 32]) -> Fr {
    Fr::from_be_bytes_mod_order(bytes)
}

/// Field element as fixed-width hex
pub fn fr_to_hex(fr: &Fr) -> String {
    hex::encode(fr_to_bytes(fr))
}

pub fn fr_from_u128(value: u128) -> Fr {
    Fr::from(value)
}

/// Field element back to a u128, failing if it exceeds 128 bits
pub fn fr_to_u128(fr: &Fr) -> EngineResult<u128> {
    let bytes = fr_to_bytes(fr);
    if bytes[..16].iter().any(|b| *b != 0) {
        return Err(EngineError::ValueOverflow("field element exceeds 128 bits"));
    }
    let mut low = [0u8; 16];
    low.copy_from_slice(&bytes[16..]);
    Ok(u128::from_be_bytes(low))
}

/// Widen a 20-byte address into a field element
pub fn address_to_fr(addr: &Address) -> Fr {
    let mut bytes = [0u8; 32];
    bytes[12..].copy_from_slice(addr.as_slice());
    Fr::from_be_bytes_mod_order(&bytes)
}

/// Truncate a field element to its low 20 bytes as an address
pub fn fr_to_address(fr: &Fr) -> Address {
    let bytes = fr_to_bytes(fr);
    Address::from_slice(&bytes[12..])
}

/// Reduce a 256-bit integer into the field
pub fn u256_to_fr(value: &U256) -> Fr {
    Fr::from_be_bytes_mod_order(&value.to_be_bytes::<32>())
}

/// 16-byte random to a field element
pub fn random_to_fr(random: &[u8; 16]) -> Fr {
    let mut bytes = [0u8; 32];
    bytes[16..].copy_from_slice(random);
    Fr::from_be_bytes_mod_order(&bytes)
}
