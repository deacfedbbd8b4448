//! On-chain event normalization
//!
//! Shield, transact, unshield, and nullifier events arrive from the contract
//! adapter or the quick-sync backfill in one normalized shape. Commitments
//! feed the merkle forest; nullifiers and unshields persist directly to the
//! store for wallets to cross-reference during scans.

use alloy_primitives::Address;
use async_trait::async_trait;
use borsh::{BorshDeserialize, BorshSerialize};
use serde::{Deserialize, Serialize};

use crate::chain::Chain;
use crate::database::{keyspace, BatchOp, Database};
use crate::error::EngineResult;
use crate::token::TokenData;

/// Ciphertext material attached to a commitment, by origin
#[derive(
    Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize, Serialize, Deserialize,
)]
pub enum CommitmentCiphertext {
    /// Shield deposits publish their preimage in clear plus the sealed random
    Shield {
        npk: [u8; 32],
        token: TokenData,
        value: u128,
        shield_key: [u8; 32],
        encrypted_random: Vec<u8>,
        /// Contract-side shield fee already deducted from `value`
        fee: Option<u128>,
    },
    /// Transact outputs publish the full encrypted note
    Transact {
        ephemeral_pub: [u8; 32],
        ciphertext: Vec<u8>,
        /// Sender identity sealed under the note's sender random; empty when hidden
        sender_ciphertext: Vec<u8>,
        /// Outgoing annotation readable only by the sender's viewing key
        annotation: Vec<u8>,
    },
}

/// A commitment as mirrored from chain, persisted alongside its leaf
#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct StoredCommitment {
    pub hash: [u8; 32],
    pub ciphertext: CommitmentCiphertext,
    pub txid: [u8; 32],
    pub block_number: u64,
}

/// A batch of commitments appended at a known tree position
#[derive(Clone, Debug)]
pub struct CommitmentBatchEvent {
    pub tree_number: u32,
    pub start_index: u64,
    pub commitments: Vec<StoredCommitment>,
}

/// Nullifiers revealed by a spend
#[derive(Clone, Debug)]
pub struct NullifierSeenEvent {
    pub nullifiers: Vec<[u8; 32]>,
    pub txid: [u8; 32],
    pub block_number: u64,
}

/// A withdrawal to a public recipient
#[derive(Clone, Debug)]
pub struct UnshieldSeenEvent {
    pub txid: [u8; 32],
    pub token: TokenData,
    pub to: Address,
    /// Net amount received by the recipient; authoritative, never re-derived
    pub value: u128,
    pub fee: u128,
    pub block_number: u64,
}

/// Persisted record for an observed nullifier
#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct NullifierRecord {
    pub txid: [u8; 32],
    pub block_number: u64,
}

/// Persisted record for an observed unshield
#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct UnshieldRecord {
    pub txid: [u8; 32],
    pub token: TokenData,
    pub to: [u8; 20],
    pub value: u128,
    pub fee: u128,
    pub block_number: u64,
}

/// Everything a backfill returns for a block range
#[derive(Clone, Debug, Default)]
pub struct QuickSyncData {
    pub commitment_batches: Vec<CommitmentBatchEvent>,
    pub nullifiers: Vec<NullifierSeenEvent>,
    pub unshields: Vec<UnshieldSeenEvent>,
}

impl QuickSyncData {
    pub fn is_empty(&self) -> bool {
        self.commitment_batches.is_empty() && self.nullifiers.is_empty() && self.unshields.is_empty()
    }
}

/// Injected backfill capability ("quick sync")
#[async_trait]
pub trait QuickSync: Send + Sync {
    async fn fetch(&self, chain: Chain, start_block: u64) -> EngineResult<QuickSyncData>;
}

/// Persist an observed nullifier batch
pub async fn ingest_nullifiers(
    db: &dyn Database,
    chain: Chain,
    event: &NullifierSeenEvent,
) -> EngineResult<()> {
    let chain_key = chain.key();
    let record = borsh::to_vec(&NullifierRecord {
        txid: event.txid,
        block_number: event.block_number,
    })
    .expect("borsh encoding of fixed-width record");

    let ops = event
        .nullifiers
        .iter()
        .map(|nullifier| BatchOp::Put {
            key: keyspace::nullifier(&chain_key, &hex::encode(nullifier)),
            value: record.clone(),
        })
        .collect();
    db.batch(ops).await
}

/// Persist an observed unshield for history derivation
pub async fn ingest_unshield(
    db: &dyn Database,
    chain: Chain,
    event: &UnshieldSeenEvent,
) -> EngineResult<()> {
    let chain_key = chain.key();
    let mut to = [0u8; 20];
    to.copy_from_slice(event.to.as_slice());
    let record = UnshieldRecord {
        txid: event.txid,
        token: event.token.clone(),
        to,
        value: event.value,
        fee: event.fee,
        block_number: event.block_number,
    };
    db.put(
        &keyspace::unshield(
            &chain_key,
            &hex::encode(event.txid),
            &hex::encode(event.token.token_hash_bytes()),
        ),
        &borsh::to_vec(&record).expect("borsh encoding of unshield record"),
    )
    .await
}

/// Look up a nullifier's record, if the chain has seen it
pub async fn nullifier_record(
    db: &dyn Database,
    chain: Chain,
    nullifier: &[u8; 32],
) -> EngineResult<Option<NullifierRecord>> {
    let key = keyspace::nullifier(&chain.key(), &hex::encode(nullifier));
    match db.get(&key).await? {
        Some(bytes) => Ok(NullifierRecord::try_from_slice(&bytes).ok()),
        None => Ok(None),
    }
}

/// All unshield records persisted for a chain
pub async fn unshield_records(db: &dyn Database, chain: Chain) -> EngineResult<Vec<UnshieldRecord>> {
    let pairs = db
        .scan_prefix(&keyspace::unshield_prefix(&chain.key()))
        .await?;
    Ok(pairs
        .iter()
        .filter_map(|(_, v)| UnshieldRecord::try_from_slice(v).ok())
        .collect())
}
