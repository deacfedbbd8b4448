//! Transaction history derivation
//!
//! Groups a wallet's TXOs, sent-note annotations, spends, and unshield
//! records by originating transaction and partitions each transaction's
//! amounts into receive, transfer, relayer-fee, change, and unshield buckets.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};

use crate::address::{encode_address, AddressData};
use crate::bytes::fr_from_bytes;
use crate::chain::Chain;
use crate::database::Database;
use crate::error::EngineResult;
use crate::events::{unshield_records, UnshieldRecord};
use crate::memo::OutputType;
use crate::wallet::{SentNote, Txo, Wallet};

/// One amount line in a history entry
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenAmount {
    pub token_hash: [u8; 32],
    pub amount: u128,
    /// Sender's shielded address, when the sender chose to reveal it
    pub sender_address: Option<String>,
    pub memo_text: Option<String>,
}

/// One transaction as this wallet saw it
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct TransactionHistoryEntry {
    pub txid: [u8; 32],
    pub block_number: u64,
    /// Incoming notes from others (never our own change)
    pub receive_token_amounts: Vec<TokenAmount>,
    /// Outgoing non-fee non-change notes we sent
    pub transfer_token_amounts: Vec<TokenAmount>,
    /// At most one relayer-fee note per transaction
    pub relayer_fee_token_amount: Option<TokenAmount>,
    /// Notes that came back to us as change
    pub change_token_amounts: Vec<TokenAmount>,
    /// Withdrawals to public recipients
    pub unshield_token_amounts: Vec<TokenAmount>,
}

#[derive(Default)]
struct TxBucket<'a> {
    received: Vec<&'a Txo>,
    sent: Vec<&'a SentNote>,
    spent_inputs: Vec<&'a Txo>,
    unshields: Vec<&'a UnshieldRecord>,
}

/// Derive the formatted history for one wallet on one chain
pub async fn derive_history(
    wallet: &Wallet,
    chain: Chain,
    db: &dyn Database,
) -> EngineResult<Vec<TransactionHistoryEntry>> {
    let txos = wallet.txos(chain).await?;
    let sent = wallet.sent_notes(chain).await?;
    let unshields = unshield_records(db, chain).await?;

    let mut buckets: BTreeMap<[u8; 32], TxBucket<'_>> = BTreeMap::new();
    for txo in &txos {
        buckets.entry(txo.txid).or_default().received.push(txo);
        if let Some(spend_txid) = txo.spend_txid {
            buckets.entry(spend_txid).or_default().spent_inputs.push(txo);
        }
    }
    for note in &sent {
        buckets.entry(note.txid).or_default().sent.push(note);
    }
    // Unshields only attach to transactions this wallet participated in.
    for record in &unshields {
        if let Some(bucket) = buckets.get_mut(&record.txid) {
            bucket.unshields.push(record);
        }
    }

    let mut entries: Vec<TransactionHistoryEntry> = buckets
        .into_iter()
        .map(|(txid, bucket)| build_entry(chain, txid, bucket))
        .collect();
    entries.sort_by_key(|e| (e.block_number, e.txid));
    Ok(entries)
}

fn build_entry(chain: Chain, txid: [u8; 32], bucket: TxBucket<'_>) -> TransactionHistoryEntry {
    let own_commitments: HashSet<[u8; 32]> =
        bucket.received.iter().map(|t| t.commitment).collect();

    let mut entry = TransactionHistoryEntry {
        txid,
        ..TransactionHistoryEntry::default()
    };

    for txo in &bucket.received {
        entry.block_number = entry.block_number.max(txo.block_number);
        let amount = TokenAmount {
            token_hash: crate::bytes::fr_to_bytes(&txo.note.token_hash),
            amount: txo.note.value,
            sender_address: txo.sender.map(|raw| sender_address(chain, &raw)),
            memo_text: txo.note.memo.text.clone(),
        };
        match txo.note.memo.output_type {
            OutputType::Change => entry.change_token_amounts.push(amount),
            OutputType::Transfer | OutputType::RelayerFee => {
                entry.receive_token_amounts.push(amount)
            }
        }
    }

    // A note we annotated but also received back is our own change; it is
    // already accounted for above and never a transfer.
    for note in &bucket.sent {
        if own_commitments.contains(&note.commitment) {
            continue;
        }
        entry.block_number = entry.block_number.max(note.block_number);
        let amount = TokenAmount {
            token_hash: note.token_hash,
            amount: note.value,
            sender_address: None,
            memo_text: None,
        };
        match note.output_type {
            OutputType::Transfer => entry.transfer_token_amounts.push(amount),
            OutputType::RelayerFee => {
                if entry.relayer_fee_token_amount.is_none() {
                    entry.relayer_fee_token_amount = Some(amount);
                }
            }
            OutputType::Change => {}
        }
    }

    for record in &bucket.unshields {
        entry.block_number = entry.block_number.max(record.block_number);
        entry.unshield_token_amounts.push(TokenAmount {
            token_hash: record.token.token_hash_bytes(),
            amount: record.value,
            sender_address: None,
            memo_text: None,
        });
    }

    for txo in &bucket.spent_inputs {
        entry.block_number = entry.block_number.max(txo.block_number);
    }

    // A receive identical in token and amount to a change record in the same
    // transaction is the change seen twice; keep the change record.
    entry.receive_token_amounts.retain(|receive| {
        !entry
            .change_token_amounts
            .iter()
            .any(|change| change.token_hash == receive.token_hash && change.amount == receive.amount)
    });

    entry
}

fn sender_address(chain: Chain, raw: &[u8; 64]) -> String {
    let mut mpk = [0u8; 32];
    mpk.copy_from_slice(&raw[..32]);
    let mut viewing = [0u8; 32];
    viewing.copy_from_slice(&raw[32..]);
    encode_address(&AddressData {
        master_public_key: fr_from_bytes(&mpk),
        viewing_public_key: viewing,
        chain: Some(chain),
    })
}
