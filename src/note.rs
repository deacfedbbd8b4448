//! Note model and crypto envelope
//!
//! A note is the pool's unit of value: a note public key, a token hash, and
//! a 128-bit value, committed on-chain as `Poseidon(npk, tokenHash, value)`.
//! Notes travel encrypted: the sender runs ECDH on Baby Jubjub against the
//! receiver's viewing public key and seals the plaintext with AES-256-GCM.
//!
//! The three note shapes (shield, transact, unshield) share commitment math
//! and dispatch through [`NoteVariant`].

use alloy_primitives::Address;
use ark_bn254::Fr;
use ark_ed_on_bn254::Fr as JubjubScalar;
use rand::RngCore;
use sha2::{Digest, Sha256};

use crate::address::AddressData;
use crate::bytes::{address_to_fr, fr_from_bytes, fr_to_bytes, random_to_fr};
use crate::error::{EngineError, EngineResult};
use crate::keys::{ephemeral_keypair, shared_secret};
use crate::memo::MemoField;
use crate::poseidon::{poseidon2, poseidon3};
use crate::token::TokenData;

const NOTE_KEY_DOMAIN: &[u8] = b"railgun-engine/note/key";
const NOTE_IV_DOMAIN: &[u8] = b"railgun-engine/note/iv";
const SENDER_KEY_DOMAIN: &[u8] = b"railgun-engine/sender/key";
const SENDER_IV_DOMAIN: &[u8] = b"railgun-engine/sender/iv";
const ANNOTATION_KEY_DOMAIN: &[u8] = b"railgun-engine/annotation/key";

/// Minimum note plaintext: random(16) + value(16) + tokenHash(32) + memo(34)
const NOTE_PLAINTEXT_MIN: usize = 98;

/// A shielded note held or produced by a wallet
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Note {
    /// `Poseidon(masterPublicKey, random)`
    pub npk: Fr,
    pub token_hash: Fr,
    pub value: u128,
    pub random: [u8; 16],
    pub memo: MemoField,
}

impl Note {
    /// Build an output note addressed to `recipient`
    pub fn transfer_to<R: RngCore>(
        recipient: &AddressData,
        token_hash: Fr,
        value: u128,
        memo: MemoField,
        rng: &mut R,
    ) -> Self {
        let mut random = [0u8; 16];
        rng.fill_bytes(&mut random);
        let npk = poseidon2(recipient.master_public_key, random_to_fr(&random));
        Self {
            npk,
            token_hash,
            value,
            random,
            memo,
        }
    }

    /// `Poseidon(npk, tokenHash, value)`
    pub fn commitment(&self) -> Fr {
        poseidon3(self.npk, self.token_hash, Fr::from(self.value))
    }

    pub fn commitment_bytes(&self) -> [u8; 32] {
        fr_to_bytes(&self.commitment())
    }

    /// `Poseidon(spendingPrivateKey, leafIndex)`
    pub fn nullifier(spending_key: Fr, leaf_index: u64) -> Fr {
        poseidon2(spending_key, Fr::from(leaf_index))
    }

    /// Seal this note toward a receiver viewing public key
    pub fn encrypt<R: RngCore>(
        &self,
        receiver_viewing_public_key: &[u8; 32],
        rng: &mut R,
    ) -> EngineResult<NoteCiphertext> {
        let (esk, ephemeral_pub) = ephemeral_keypair(rng);
        let shared = shared_secret(&esk, receiver_viewing_public_key)
            .ok_or(EngineError::DecryptionFailed)?;

        let mut plaintext =
            Vec::with_capacity(NOTE_PLAINTEXT_MIN + self.memo.text.as_ref().map_or(0, |t| t.len()));
        plaintext.extend_from_slice(&self.random);
        plaintext.extend_from_slice(&self.value.to_be_bytes());
        plaintext.extend_from_slice(&fr_to_bytes(&self.token_hash));
        plaintext.extend_from_slice(&self.memo.to_bytes());

        let ciphertext = aead::seal(
            &derive_key(NOTE_KEY_DOMAIN, &shared),
            &derive_nonce(NOTE_IV_DOMAIN, &shared),
            &plaintext,
        );
        Ok(NoteCiphertext {
            ephemeral_pub,
            ciphertext,
        })
    }

    /// Attempt decryption with a viewing key. `None` means the note is not
    /// addressed to this wallet; failures are silent by design of the scan.
    pub fn decrypt(
        ciphertext: &NoteCiphertext,
        viewing_key: &JubjubScalar,
        master_public_key: Fr,
    ) -> Option<Self> {
        let shared = shared_secret(viewing_key, &ciphertext.ephemeral_pub)?;
        let plaintext = aead::open(
            &derive_key(NOTE_KEY_DOMAIN, &shared),
            &derive_nonce(NOTE_IV_DOMAIN, &shared),
            &ciphertext.ciphertext,
        )?;
        if plaintext.len() < NOTE_PLAINTEXT_MIN {
            return None;
        }

        let mut random = [0u8; 16];
        random.copy_from_slice(&plaintext[..16]);
        let mut value_bytes = [0u8; 16];
        value_bytes.copy_from_slice(&plaintext[16..32]);
        let mut token_bytes = [0u8; 32];
        token_bytes.copy_from_slice(&plaintext[32..64]);
        let memo = MemoField::from_bytes(&plaintext[64..]).ok()?;

        Some(Self {
            npk: poseidon2(master_public_key, random_to_fr(&random)),
            token_hash: fr_from_bytes(&token_bytes),
            value: u128::from_be_bytes(value_bytes),
            random,
            memo,
        })
    }
}

/// Encrypted note as published on-chain
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NoteCiphertext {
    pub ephemeral_pub: [u8; 32],
    pub ciphertext: Vec<u8>,
}

/// Preimage the shielder submits alongside its deposit
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ShieldPreimage {
    pub npk: [u8; 32],
    pub token: TokenData,
    pub value: u128,
}

/// Ciphertext sealing the shield random toward the receiver
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ShieldCiphertext {
    /// Ephemeral shield public key
    pub shield_key: [u8; 32],
    pub encrypted_random: Vec<u8>,
}

/// A note created by shielding public funds into the pool
#[derive(Clone, Debug)]
pub struct ShieldNote {
    pub note: Note,
    pub preimage: ShieldPreimage,
    pub ciphertext: ShieldCiphertext,
}

impl ShieldNote {
    /// Shield `value` of `token` toward `recipient`, sealing the random with
    /// a fresh ephemeral shield key
    pub fn new<R: RngCore>(
        recipient: &AddressData,
        token: TokenData,
        value: u128,
        rng: &mut R,
    ) -> EngineResult<Self> {
        let mut random = [0u8; 16];
        rng.fill_bytes(&mut random);
        let npk = poseidon2(recipient.master_public_key, random_to_fr(&random));

        let (shield_priv, shield_key) = ephemeral_keypair(rng);
        let shared = shared_secret(&shield_priv, &recipient.viewing_public_key)
            .ok_or(EngineError::DecryptionFailed)?;
        let encrypted_random = aead::seal(
            &derive_key(NOTE_KEY_DOMAIN, &shared),
            &derive_nonce(NOTE_IV_DOMAIN, &shared),
            &random,
        );

        let note = Note {
            npk,
            token_hash: token.token_hash(),
            value,
            random,
            memo: MemoField::hidden_sender(crate::memo::OutputType::Transfer),
        };
        Ok(Self {
            note,
            preimage: ShieldPreimage {
                npk: fr_to_bytes(&npk),
                token,
                value,
            },
            ciphertext: ShieldCiphertext {
                shield_key,
                encrypted_random,
            },
        })
    }

    /// Receiver side: recover the shield random, or `None` if not ours
    pub fn decrypt_random(
        ciphertext: &ShieldCiphertext,
        viewing_key: &JubjubScalar,
    ) -> Option<[u8; 16]> {
        let shared = shared_secret(viewing_key, &ciphertext.shield_key)?;
        let plaintext = aead::open(
            &derive_key(NOTE_KEY_DOMAIN, &shared),
            &derive_nonce(NOTE_IV_DOMAIN, &shared),
            &ciphertext.encrypted_random,
        )?;
        plaintext.try_into().ok()
    }
}

/// A withdrawal from the pool to a public address
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UnshieldNote {
    pub to: Address,
    pub token: TokenData,
    pub value: u128,
}

impl UnshieldNote {
    /// The recipient address widened to a field element stands in for npk
    pub fn npk(&self) -> Fr {
        address_to_fr(&self.to)
    }

    pub fn commitment(&self) -> Fr {
        poseidon3(self.npk(), self.token.token_hash(), Fr::from(self.value))
    }
}

/// Tagged note variant; common operations dispatch by tag
#[derive(Clone, Debug)]
pub enum NoteVariant {
    Shield(ShieldNote),
    Transact(Note),
    Unshield(UnshieldNote),
}

impl NoteVariant {
    pub fn commitment(&self) -> Fr {
        match self {
            NoteVariant::Shield(n) => n.note.commitment(),
            NoteVariant::Transact(n) => n.commitment(),
            NoteVariant::Unshield(n) => n.commitment(),
        }
    }

    pub fn token_hash(&self) -> Fr {
        match self {
            NoteVariant::Shield(n) => n.note.token_hash,
            NoteVariant::Transact(n) => n.token_hash,
            NoteVariant::Unshield(n) => n.token.token_hash(),
        }
    }

    pub fn value(&self) -> u128 {
        match self {
            NoteVariant::Shield(n) => n.note.value,
            NoteVariant::Transact(n) => n.value,
            NoteVariant::Unshield(n) => n.value,
        }
    }
}

/// Seal the sender's address material under a key derived from the note's
/// sender random. Receivers holding the decrypted memo can unseal it; with
/// `MEMO_SENDER_RANDOM_NULL` no ciphertext is produced at all.
pub fn seal_sender_identity(sender: &AddressData, sender_random: &[u8; 15]) -> Vec<u8> {
    let mut plaintext = Vec::with_capacity(64);
    plaintext.extend_from_slice(&fr_to_bytes(&sender.master_public_key));
    plaintext.extend_from_slice(&sender.viewing_public_key);
    aead::seal(
        &derive_key(SENDER_KEY_DOMAIN, sender_random),
        &derive_nonce(SENDER_IV_DOMAIN, sender_random),
        &plaintext,
    )
}

/// Recover `(masterPublicKey, viewingPublicKey)` of the sender
pub fn open_sender_identity(ciphertext: &[u8], sender_random: &[u8; 15]) -> Option<(Fr, [u8; 32])> {
    let plaintext = aead::open(
        &derive_key(SENDER_KEY_DOMAIN, sender_random),
        &derive_nonce(SENDER_IV_DOMAIN, sender_random),
        ciphertext,
    )?;
    if plaintext.len() != 64 {
        return None;
    }
    let mut mpk = [0u8; 32];
    mpk.copy_from_slice(&plaintext[..32]);
    let mut viewing = [0u8; 32];
    viewing.copy_from_slice(&plaintext[32..]);
    Some((fr_from_bytes(&mpk), viewing))
}

/// Seal an outgoing-note annotation readable only by the sender's own
/// viewing key. A random nonce is prepended since the key is static.
pub fn seal_annotation<R: RngCore>(
    viewing_key: &JubjubScalar,
    plaintext: &[u8],
    rng: &mut R,
) -> Vec<u8> {
    let key = annotation_key(viewing_key);
    let mut nonce = [0u8; 12];
    rng.fill_bytes(&mut nonce);
    let mut out = nonce.to_vec();
    out.extend_from_slice(&aead::seal(&key, &nonce, plaintext));
    out
}

/// Open an annotation previously sealed by this wallet
pub fn open_annotation(viewing_key: &JubjubScalar, ciphertext: &[u8]) -> Option<Vec<u8>> {
    if ciphertext.len() < 12 {
        return None;
    }
    let key = annotation_key(viewing_key);
    let mut nonce = [0u8; 12];
    nonce.copy_from_slice(&ciphertext[..12]);
    aead::open(&key, &nonce, &ciphertext[12..])
}

fn annotation_key(viewing_key: &JubjubScalar) -> [u8; 32] {
    use ark_ff::{BigInteger, PrimeField};
    derive_key(ANNOTATION_KEY_DOMAIN, &viewing_key.into_bigint().to_bytes_be())
}

fn derive_key(domain: &[u8], material: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(domain);
    hasher.update(material);
    hasher.finalize().into()
}

fn derive_nonce(domain: &[u8], material: &[u8]) -> [u8; 12] {
    let mut hasher = Sha256::new();
    hasher.update(domain);
    hasher.update(material);
    let digest = hasher.finalize();
    let mut nonce = [0u8; 12];
    nonce.copy_from_slice(&digest[..12]);
    nonce
}

pub(crate) mod aead {
    use aes_gcm::aead::{Aead, KeyInit};
    use aes_gcm::{Aes256Gcm, Nonce};

    pub fn seal(key: &[u8; 32], nonce: &[u8; 12], plaintext: &[u8]) -> Vec<u8> {
        let cipher = Aes256Gcm::new_from_slice(key).expect("32-byte key");
        cipher
            .encrypt(Nonce::from_slice(nonce), plaintext)
            .expect("aes-gcm encryption is infallible for in-memory buffers")
    }

    pub fn open(key: &[u8; 32], nonce: &[u8; 12], ciphertext: &[u8]) -> Option<Vec<u8>> {
        let cipher = Aes256Gcm::new_from_slice(key).expect("32-byte key");
        cipher.decrypt(Nonce::from_slice(nonce), ciphertext).ok()
    }
}
