//! Wallet: note scanning, TXO tracking, and balance derivation
//!
//! A wallet walks newly committed leaves through its tree-reader capability,
//! tries its viewing key against every ciphertext, and persists the notes it
//! owns as TXOs. Spends arrive indirectly: observed nullifiers are matched
//! against owned TXOs and flip them to spent exactly once. Balances are
//! always derived on demand from unspent TXOs.
//!
//! Wallet secrets live encrypted at rest; the encryption key unlocks them at
//! load time and is never stored.

use ark_bn254::Fr;
use borsh::{BorshDeserialize, BorshSerialize};
use rand::RngCore;
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use crate::address::{encode_address, AddressData};
use crate::bytes::{fr_from_bytes, fr_to_bytes};
use crate::chain::Chain;
use crate::database::{keyspace, BatchOp, Database};
use crate::error::{EngineError, EngineResult};
use crate::events::{self, CommitmentCiphertext, StoredCommitment};
use crate::history::TransactionHistoryEntry;
use crate::keys::WalletKeys;
use crate::memo::{MemoField, OutputType};
use crate::merkle_tree::TreeReader;
use crate::note::{self, Note, NoteCiphertext, ShieldNote};
use crate::poseidon::poseidon2;
use crate::solutions::TreeBalance;
use crate::token::TokenData;

/// Progress callback for long scans, called with `0.0..=1.0`
pub type ProgressCallback<'a> = &'a (dyn Fn(f64) + Send + Sync);

/// A transaction output known to this wallet
#[derive(Clone, Debug)]
pub struct Txo {
    pub tree_number: u32,
    pub leaf_index: u64,
    pub commitment: [u8; 32],
    pub note: Note,
    pub spent: bool,
    pub spend_txid: Option<[u8; 32]>,
    /// `(masterPublicKey || viewingPublicKey)` of the sender when revealed
    pub sender: Option<[u8; 64]>,
    pub block_number: u64,
    pub txid: [u8; 32],
}

#[derive(BorshSerialize, BorshDeserialize)]
struct TxoRecord {
    tree_number: u32,
    leaf_index: u64,
    commitment: [u8; 32],
    npk: [u8; 32],
    token_hash: [u8; 32],
    value: u128,
    random: [u8; 16],
    memo: Vec<u8>,
    spent: bool,
    spend_txid: Option<[u8; 32]>,
    sender: Option<[u8; 64]>,
    block_number: u64,
    txid: [u8; 32],
}

impl TxoRecord {
    fn from_txo(txo: &Txo) -> Self {
        Self {
            tree_number: txo.tree_number,
            leaf_index: txo.leaf_index,
            commitment: txo.commitment,
            npk: fr_to_bytes(&txo.note.npk),
            token_hash: fr_to_bytes(&txo.note.token_hash),
            value: txo.note.value,
            random: txo.note.random,
            memo: txo.note.memo.to_bytes(),
            spent: txo.spent,
            spend_txid: txo.spend_txid,
            sender: txo.sender,
            block_number: txo.block_number,
            txid: txo.txid,
        }
    }

    fn into_txo(self) -> EngineResult<Txo> {
        Ok(Txo {
            tree_number: self.tree_number,
            leaf_index: self.leaf_index,
            commitment: self.commitment,
            note: Note {
                npk: fr_from_bytes(&self.npk),
                token_hash: fr_from_bytes(&self.token_hash),
                value: self.value,
                random: self.random,
                memo: MemoField::from_bytes(&self.memo)?,
            },
            spent: self.spent,
            spend_txid: self.spend_txid,
            sender: self.sender,
            block_number: self.block_number,
            txid: self.txid,
        })
    }
}

/// An output this wallet sent, recovered from its own annotation
#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct SentNote {
    pub tree_number: u32,
    pub leaf_index: u64,
    pub commitment: [u8; 32],
    pub output_type: OutputType,
    pub value: u128,
    pub token_hash: [u8; 32],
    pub txid: [u8; 32],
    pub block_number: u64,
}

/// Per-chain scan bookkeeping
#[derive(Clone, Debug, Default, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct WalletDetails {
    pub tree_scanned_heights: Vec<u64>,
    pub creation_tree: Option<u32>,
    pub creation_tree_height: Option<u64>,
}

#[derive(BorshSerialize, BorshDeserialize)]
struct WalletMetaRecord {
    nonce: [u8; 12],
    ciphertext: Vec<u8>,
}

#[derive(BorshSerialize, BorshDeserialize)]
struct WalletSecrets {
    mnemonic: String,
    index: u32,
}

const WALLET_ID_DOMAIN: &[u8] = b"railgun-engine/wallet/id";

impl std::fmt::Debug for Wallet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Wallet").field("id", &self.id).finish()
    }
}

/// A loaded shielded wallet
pub struct Wallet {
    id: String,
    keys: WalletKeys,
    db: Arc<dyn Database>,
    readers: HashMap<Chain, Arc<dyn TreeReader>>,
}

impl Wallet {
    /// Create a wallet from a mnemonic and account index, persisting its
    /// secrets encrypted under `encryption_key`
    pub async fn create(
        db: Arc<dyn Database>,
        encryption_key: &[u8; 32],
        mnemonic: &str,
        index: u32,
    ) -> EngineResult<Self> {
        let keys = WalletKeys::from_mnemonic(mnemonic, index);
        let id = wallet_id(&keys, index);

        let secrets = WalletSecrets {
            mnemonic: mnemonic.to_string(),
            index,
        };
        let plaintext = borsh::to_vec(&secrets).expect("borsh encoding of wallet secrets");
        let mut nonce = [0u8; 12];
        rand::thread_rng().fill_bytes(&mut nonce);
        let record = WalletMetaRecord {
            nonce,
            ciphertext: note::aead::seal(encryption_key, &nonce, &plaintext),
        };
        db.put(
            &keyspace::wallet_meta(&id),
            &borsh::to_vec(&record).expect("borsh encoding of wallet meta"),
        )
        .await?;

        tracing::info!(wallet = %id, "wallet created");
        Ok(Self {
            id,
            keys,
            db,
            readers: HashMap::new(),
        })
    }

    /// Load an existing wallet, unlocking its secrets with `encryption_key`
    pub async fn load(
        db: Arc<dyn Database>,
        encryption_key: &[u8; 32],
        id: &str,
    ) -> EngineResult<Self> {
        let bytes = db
            .get(&keyspace::wallet_meta(id))
            .await?
            .ok_or_else(|| EngineError::StoreIo(format!("no wallet {id}")))?;
        let record = WalletMetaRecord::try_from_slice(&bytes)
            .map_err(|_| EngineError::WalletLocked)?;
        let plaintext = note::aead::open(encryption_key, &record.nonce, &record.ciphertext)
            .ok_or(EngineError::WalletLocked)?;
        let secrets =
            WalletSecrets::try_from_slice(&plaintext).map_err(|_| EngineError::WalletLocked)?;

        let keys = WalletKeys::from_mnemonic(&secrets.mnemonic, secrets.index);
        Ok(Self {
            id: id.to_string(),
            keys,
            db,
            readers: HashMap::new(),
        })
    }

    /// Remove a wallet and every record under it
    pub async fn delete(db: &dyn Database, id: &str) -> EngineResult<()> {
        let prefix = format!("wallet/{id}/").into_bytes();
        let ops = db
            .scan_prefix(&prefix)
            .await?
            .into_iter()
            .map(|(key, _)| BatchOp::Del { key })
            .collect();
        db.batch(ops).await
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn keys(&self) -> &WalletKeys {
        &self.keys
    }

    pub fn address_data(&self, chain: Option<Chain>) -> AddressData {
        AddressData {
            master_public_key: self.keys.master_public_key,
            viewing_public_key: self.keys.viewing_public_key,
            chain,
        }
    }

    /// The wallet's `0zk` address
    pub fn address(&self, chain: Option<Chain>) -> String {
        encode_address(&self.address_data(chain))
    }

    /// Install the tree-reader capability for a chain
    pub fn attach_chain(&mut self, chain: Chain, reader: Arc<dyn TreeReader>) {
        self.readers.insert(chain, reader);
    }

    pub(crate) fn reader(&self, chain: Chain) -> EngineResult<&Arc<dyn TreeReader>> {
        self.readers
            .get(&chain)
            .ok_or_else(|| EngineError::ChainNotLoaded(chain.key()))
    }

    /// Record which tree the wallet was created at, so rescans can skip
    /// earlier history
    pub async fn set_creation_info(
        &self,
        chain: Chain,
        tree: u32,
        height: u64,
    ) -> EngineResult<()> {
        let mut details = self.details(chain).await?;
        details.creation_tree = Some(tree);
        details.creation_tree_height = Some(height);
        self.put_details(chain, &details).await
    }

    /// Walk new leaves, decrypt what is ours, then cross-reference observed
    /// nullifiers. Safe to re-run at any time; a run with no new events
    /// leaves persisted state untouched.
    pub async fn scan_balances(
        &self,
        chain: Chain,
        progress: Option<ProgressCallback<'_>>,
    ) -> EngineResult<()> {
        let reader = self.reader(chain)?.clone();
        let mut details = self.details(chain).await?;
        let tree_count = reader.tree_count().await;
        while details.tree_scanned_heights.len() < tree_count {
            details.tree_scanned_heights.push(0);
        }

        let mut total = 0u64;
        for tree in 0..tree_count {
            let next = reader.next_index(tree as u32).await;
            total += next.saturating_sub(details.tree_scanned_heights[tree]);
        }

        let mut scanned = 0u64;
        let mut details_changed = false;
        for tree in 0..tree_count {
            let next = reader.next_index(tree as u32).await;
            let start = details.tree_scanned_heights[tree];
            for index in start..next {
                if let Some(stored) = reader.commitment(tree as u32, index).await? {
                    self.process_commitment(chain, tree as u32, index, &stored)
                        .await?;
                }
                scanned += 1;
                if let Some(cb) = progress {
                    cb(scanned as f64 / total as f64);
                }
            }
            if next > start {
                details.tree_scanned_heights[tree] = next;
                details_changed = true;
            }
        }
        if details_changed {
            self.put_details(chain, &details).await?;
        }
        if total == 0 {
            if let Some(cb) = progress {
                cb(1.0);
            }
        }

        self.mark_newly_spent(chain).await?;
        tracing::debug!(wallet = %self.id, chain = %chain, scanned, "balance scan complete");
        Ok(())
    }

    /// Drop all scanned TXOs and heights, keeping creation info
    pub async fn clear_scanned_balances(&self, chain: Chain) -> EngineResult<()> {
        let chain_key = chain.key();
        let mut ops: Vec<BatchOp> = Vec::new();
        for prefix in [
            keyspace::wallet_txo_prefix(&self.id, &chain_key),
            keyspace::wallet_sent_prefix(&self.id, &chain_key),
        ] {
            for (key, _) in self.db.scan_prefix(&prefix).await? {
                ops.push(BatchOp::Del { key });
            }
        }
        self.db.batch(ops).await?;

        let old = self.details(chain).await?;
        let details = WalletDetails {
            tree_scanned_heights: Vec::new(),
            creation_tree: old.creation_tree,
            creation_tree_height: old.creation_tree_height,
        };
        self.put_details(chain, &details).await
    }

    /// Rebuild wallet state from scratch
    pub async fn full_rescan_balances(
        &self,
        chain: Chain,
        progress: Option<ProgressCallback<'_>>,
    ) -> EngineResult<()> {
        self.clear_scanned_balances(chain).await?;
        self.scan_balances(chain, progress).await
    }

    /// All TXOs known to this wallet on a chain
    pub async fn txos(&self, chain: Chain) -> EngineResult<Vec<Txo>> {
        let prefix = keyspace::wallet_txo_prefix(&self.id, &chain.key());
        let mut txos = Vec::new();
        for (_, value) in self.db.scan_prefix(&prefix).await? {
            if let Ok(record) = TxoRecord::try_from_slice(&value) {
                txos.push(record.into_txo()?);
            }
        }
        Ok(txos)
    }

    /// Outgoing notes recovered from this wallet's annotations
    pub async fn sent_notes(&self, chain: Chain) -> EngineResult<Vec<SentNote>> {
        let prefix = keyspace::wallet_sent_prefix(&self.id, &chain.key());
        Ok(self
            .db
            .scan_prefix(&prefix)
            .await?
            .iter()
            .filter_map(|(_, v)| SentNote::try_from_slice(v).ok())
            .collect())
    }

    /// Unspent balance per token hash
    pub async fn balances(&self, chain: Chain) -> EngineResult<HashMap<[u8; 32], u128>> {
        let mut balances: HashMap<[u8; 32], u128> = HashMap::new();
        for txo in self.txos(chain).await? {
            if txo.spent {
                continue;
            }
            *balances
                .entry(fr_to_bytes(&txo.note.token_hash))
                .or_default() += txo.note.value;
        }
        Ok(balances)
    }

    /// Unspent balance of one token
    pub async fn balance(&self, chain: Chain, token: &TokenData) -> EngineResult<u128> {
        Ok(self
            .balances(chain)
            .await?
            .get(&token.token_hash_bytes())
            .copied()
            .unwrap_or(0))
    }

    /// Unspent UTXOs per token, split per tree; input to the solver
    pub async fn balances_by_tree(
        &self,
        chain: Chain,
    ) -> EngineResult<HashMap<[u8; 32], BTreeMap<u32, TreeBalance>>> {
        let mut map: HashMap<[u8; 32], BTreeMap<u32, TreeBalance>> = HashMap::new();
        for txo in self.txos(chain).await? {
            if txo.spent {
                continue;
            }
            let entry = map
                .entry(fr_to_bytes(&txo.note.token_hash))
                .or_default()
                .entry(txo.tree_number)
                .or_default();
            entry.balance += txo.note.value;
            entry.utxos.push(txo);
        }
        Ok(map)
    }

    /// Formatted per-transaction history
    pub async fn transaction_history(
        &self,
        chain: Chain,
    ) -> EngineResult<Vec<TransactionHistoryEntry>> {
        crate::history::derive_history(self, chain, self.db.as_ref()).await
    }

    async fn details(&self, chain: Chain) -> EngineResult<WalletDetails> {
        let key = keyspace::wallet_details(&self.id, &chain.key());
        match self.db.get(&key).await? {
            Some(bytes) => Ok(WalletDetails::try_from_slice(&bytes)
                .map_err(|e| EngineError::StoreIo(format!("corrupt wallet details: {e}")))?),
            None => Ok(WalletDetails::default()),
        }
    }

    async fn put_details(&self, chain: Chain, details: &WalletDetails) -> EngineResult<()> {
        self.db
            .put(
                &keyspace::wallet_details(&self.id, &chain.key()),
                &borsh::to_vec(details).expect("borsh encoding of wallet details"),
            )
            .await
    }

    /// Try to claim one commitment as ours (and/or as sent by us)
    async fn process_commitment(
        &self,
        chain: Chain,
        tree: u32,
        index: u64,
        stored: &StoredCommitment,
    ) -> EngineResult<()> {
        match &stored.ciphertext {
            CommitmentCiphertext::Shield {
                npk,
                token,
                value,
                shield_key,
                encrypted_random,
                fee: _,
            } => {
                let ciphertext = crate::note::ShieldCiphertext {
                    shield_key: *shield_key,
                    encrypted_random: encrypted_random.clone(),
                };
                let Some(random) = ShieldNote::decrypt_random(&ciphertext, &self.keys.viewing_key())
                else {
                    return Ok(());
                };
                let expected_npk =
                    poseidon2(self.keys.master_public_key, crate::bytes::random_to_fr(&random));
                if fr_to_bytes(&expected_npk) != *npk {
                    return Ok(());
                }
                let note = Note {
                    npk: expected_npk,
                    token_hash: token.token_hash(),
                    value: *value,
                    random,
                    memo: MemoField::hidden_sender(OutputType::Transfer),
                };
                if note.commitment_bytes() != stored.hash {
                    tracing::warn!(tree, index, "shield note commitment mismatch, dropping");
                    return Ok(());
                }
                self.put_txo(chain, tree, index, stored, note, None).await?;
            }
            CommitmentCiphertext::Transact {
                ephemeral_pub,
                ciphertext,
                sender_ciphertext,
                annotation,
            } => {
                // Sender side: our own annotation proves we authored this output.
                if let Some(plain) = note::open_annotation(&self.keys.viewing_key(), annotation) {
                    if let Some(sent) = parse_annotation(&plain) {
                        let record = SentNote {
                            tree_number: tree,
                            leaf_index: index,
                            commitment: stored.hash,
                            output_type: sent.0,
                            value: sent.1,
                            token_hash: sent.2,
                            txid: stored.txid,
                            block_number: stored.block_number,
                        };
                        self.db
                            .put(
                                &keyspace::wallet_sent(&self.id, &chain.key(), tree, index),
                                &borsh::to_vec(&record).expect("borsh encoding of sent note"),
                            )
                            .await?;
                    }
                }

                // Receiver side.
                let wire = NoteCiphertext {
                    ephemeral_pub: *ephemeral_pub,
                    ciphertext: ciphertext.clone(),
                };
                let Some(note) = Note::decrypt(
                    &wire,
                    &self.keys.viewing_key(),
                    self.keys.master_public_key,
                ) else {
                    return Ok(());
                };
                if note.commitment_bytes() != stored.hash {
                    tracing::warn!(tree, index, "decrypted note commitment mismatch, dropping");
                    return Ok(());
                }
                let sender = if !note.memo.hides_sender() && !sender_ciphertext.is_empty() {
                    note::open_sender_identity(sender_ciphertext, &note.memo.sender_random).map(
                        |(mpk, viewing)| {
                            let mut raw = [0u8; 64];
                            raw[..32].copy_from_slice(&fr_to_bytes(&mpk));
                            raw[32..].copy_from_slice(&viewing);
                            raw
                        },
                    )
                } else {
                    None
                };
                self.put_txo(chain, tree, index, stored, note, sender).await?;
            }
        }
        Ok(())
    }

    async fn put_txo(
        &self,
        chain: Chain,
        tree: u32,
        index: u64,
        stored: &StoredCommitment,
        note: Note,
        sender: Option<[u8; 64]>,
    ) -> EngineResult<()> {
        let txo = Txo {
            tree_number: tree,
            leaf_index: index,
            commitment: stored.hash,
            note,
            spent: false,
            spend_txid: None,
            sender,
            block_number: stored.block_number,
            txid: stored.txid,
        };
        tracing::info!(
            wallet = %self.id,
            tree,
            index,
            value = txo.note.value,
            "note decrypted"
        );
        self.db
            .put(
                &keyspace::wallet_txo(&self.id, &chain.key(), tree, index),
                &borsh::to_vec(&TxoRecord::from_txo(&txo)).expect("borsh encoding of txo"),
            )
            .await
    }

    /// Mark TXOs whose nullifier the chain has seen; monotonic, never unset
    async fn mark_newly_spent(&self, chain: Chain) -> EngineResult<()> {
        for txo in self.txos(chain).await? {
            if txo.spent {
                continue;
            }
            let nullifier =
                fr_to_bytes(&Note::nullifier(self.keys.spending_key(), txo.leaf_index));
            let Some(record) =
                events::nullifier_record(self.db.as_ref(), chain, &nullifier).await?
            else {
                continue;
            };
            let mut updated = txo.clone();
            updated.spent = true;
            updated.spend_txid = Some(record.txid);
            self.db
                .put(
                    &keyspace::wallet_txo(&self.id, &chain.key(), txo.tree_number, txo.leaf_index),
                    &borsh::to_vec(&TxoRecord::from_txo(&updated))
                        .expect("borsh encoding of txo"),
                )
                .await?;
            tracing::info!(
                wallet = %self.id,
                tree = txo.tree_number,
                index = txo.leaf_index,
                "txo spent"
            );
        }
        Ok(())
    }
}

fn wallet_id(keys: &WalletKeys, index: u32) -> String {
    let mut hasher = Sha256::new();
    hasher.update(WALLET_ID_DOMAIN);
    hasher.update(fr_to_bytes(&keys.master_public_key));
    hasher.update(index.to_be_bytes());
    hex::encode(&hasher.finalize()[..16])
}

/// Annotation plaintext: `outputType(1) || value(16) || tokenHash(32)`
pub(crate) fn encode_annotation(output_type: OutputType, value: u128, token_hash: &Fr) -> Vec<u8> {
    let mut out = Vec::with_capacity(49);
    out.push(output_type.as_u8());
    out.extend_from_slice(&value.to_be_bytes());
    out.extend_from_slice(&fr_to_bytes(token_hash));
    out
}

fn parse_annotation(plain: &[u8]) -> Option<(OutputType, u128, [u8; 32])> {
    if plain.len() != 49 {
        return None;
    }
    let output_type = OutputType::from_u8(plain[0])?;
    let mut value = [0u8; 16];
    value.copy_from_slice(&plain[1..17]);
    let mut token_hash = [0u8; 32];
    token_hash.copy_from_slice(&plain[17..]);
    Some((output_type, u128::from_be_bytes(value), token_hash))
}
