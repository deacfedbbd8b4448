//! Key derivation for shielded-pool wallets
//!
//! Implements the wallet key hierarchy:
//! - spending key: master secret scalar, participates in nullifiers
//! - viewing key: Baby Jubjub scalar authorizing note decryption (ECDH)
//! - nullifying key: `Poseidon(viewingKey)`
//! - master public key: `Poseidon(spendPub.x, spendPub.y, nullifyingKey)`,
//!   the value note public keys are derived from
//!
//! Keys derive from a mnemonic phrase plus account index through an
//! HMAC-SHA512 hardened-child expansion.

use ark_bn254::Fr;
use ark_ec::{CurveGroup, Group};
use ark_ed_on_bn254::{EdwardsAffine, EdwardsProjective, Fr as JubjubScalar};
use ark_ff::PrimeField;
use ark_serialize::{CanonicalDeserialize, CanonicalSerialize};
use hmac::{Hmac, Mac};
use rand::RngCore;
use sha2::Sha512;

use crate::poseidon::{poseidon1, poseidon3};

type HmacSha512 = Hmac<Sha512>;

const SEED_DOMAIN: &[u8] = b"railgun-engine/wallet/seed";
const SPENDING_BRANCH: &[u8] = b"spending";
const VIEWING_BRANCH: &[u8] = b"viewing";

/// The full key material of one wallet account
#[derive(Clone)]
pub struct WalletKeys {
    spending_key: Fr,
    viewing_key: JubjubScalar,
    /// Baby Jubjub spending public key coordinates
    pub spending_public_key: (Fr, Fr),
    /// Compressed Baby Jubjub viewing public key
    pub viewing_public_key: [u8; 32],
    /// `Poseidon(viewingKey)`
    pub nullifying_key: Fr,
    /// `Poseidon(spendPub.x, spendPub.y, nullifyingKey)`
    pub master_public_key: Fr,
}

impl WalletKeys {
    /// Derive the account at `index` from a mnemonic phrase
    pub fn from_mnemonic(mnemonic: &str, index: u32) -> Self {
        let root = hmac_expand(SEED_DOMAIN, &[mnemonic.as_bytes()]);

        // Hardened child: key material never leaks sibling accounts.
        let hardened = index | 0x8000_0000;
        let child = hmac_expand(
            &root[32..],
            &[&root[..32], &hardened.to_be_bytes()],
        );

        let spend_raw = hmac_expand(&child[32..], &[SPENDING_BRANCH, &child[..32]]);
        let view_raw = hmac_expand(&child[32..], &[VIEWING_BRANCH, &child[..32]]);

        let spending_key = Fr::from_be_bytes_mod_order(&spend_raw[..32]);
        let viewing_key = JubjubScalar::from_be_bytes_mod_order(&view_raw[..32]);

        Self::from_private_keys(spending_key, viewing_key)
    }

    /// Assemble the public halves from raw private scalars
    pub fn from_private_keys(spending_key: Fr, viewing_key: JubjubScalar) -> Self {
        let spend_scalar =
            JubjubScalar::from_be_bytes_mod_order(&crate::bytes::fr_to_bytes(&spending_key));
        let spend_point = (EdwardsProjective::generator() * spend_scalar).into_affine();
        let spending_public_key = (spend_point.x, spend_point.y);

        let viewing_public_key = viewing_public(&viewing_key);
        let nullifying_key = poseidon1(jubjub_scalar_to_fr(&viewing_key));
        let master_public_key =
            poseidon3(spending_public_key.0, spending_public_key.1, nullifying_key);

        Self {
            spending_key,
            viewing_key,
            spending_public_key,
            viewing_public_key,
            nullifying_key,
            master_public_key,
        }
    }

    pub fn spending_key(&self) -> Fr {
        self.spending_key
    }

    pub fn viewing_key(&self) -> JubjubScalar {
        self.viewing_key
    }
}

/// Compressed public key for a viewing scalar
pub fn viewing_public(scalar: &JubjubScalar) -> [u8; 32] {
    let point = (EdwardsProjective::generator() * *scalar).into_affine();
    compress_point(&point)
}

/// ECDH: `scalar * point`, compressed. `None` when the peer bytes are not a
/// valid curve point.
pub fn shared_secret(scalar: &JubjubScalar, peer: &[u8; 32]) -> Option<[u8; 32]> {
    let point = EdwardsAffine::deserialize_compressed(&peer[..]).ok()?;
    let shared = (EdwardsProjective::from(point) * *scalar).into_affine();
    Some(compress_point(&shared))
}

/// Fresh ephemeral keypair for envelope encryption
pub fn ephemeral_keypair<R: RngCore>(rng: &mut R) -> (JubjubScalar, [u8; 32]) {
    let mut raw = [0u8; 32];
    rng.fill_bytes(&mut raw);
    let scalar = JubjubScalar::from_be_bytes_mod_order(&raw);
    let public = viewing_public(&scalar);
    (scalar, public)
}

fn compress_point(point: &EdwardsAffine) -> [u8; 32] {
    let mut buf = Vec::with_capacity(32);
    point
        .serialize_compressed(&mut buf)
        .expect("serialization into a Vec cannot fail");
    let mut out = [0u8; 32];
    out.copy_from_slice(&buf);
    out
}

fn jubjub_scalar_to_fr(scalar: &JubjubScalar) -> Fr {
    use ark_ff::BigInteger;
    let raw = scalar.into_bigint().to_bytes_be();
    let mut bytes = [0u8; 32];
    bytes[32 - raw.len()..].copy_from_slice(&raw);
    Fr::from_be_bytes_mod_order(&bytes)
}

/// HMAC-SHA512 expansion step shared by every derivation branch
fn hmac_expand(key: &[u8], parts: &[&[u8]]) -> [u8; 64] {
    let mut mac = HmacSha512::new_from_slice(key).expect("hmac accepts any key length");
    for part in parts {
        mac.update(part);
    }
    let digest = mac.finalize().into_bytes();
    let mut out = [0u8; 64];
    out.copy_from_slice(&digest);
    out
}
