//! End-to-end engine scenarios against an in-memory store, a mock contract
//! adapter, and a mock prover.

use alloy_primitives::{Address, U256};
use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::sync::Arc;

use railgun_engine::bytes::hex_to_u128;
use railgun_engine::prover::{ProofWitness, PublicInputs};
use railgun_engine::{
    Chain, CommitmentBatchEvent, CommitmentCiphertext, Engine, EngineCapabilities, EngineError,
    EngineResult, MemoryDatabase, NullifierSeenEvent, OutputType, QuickSyncData,
    SerializedTransaction, ShieldNote, SmartWalletContract, StoredCommitment, TokenData,
    TransactionBatch, TransactionOutput, TreeReader, UnshieldData, UnshieldSeenEvent,
};

const MNEMONIC_1: &str = "test test test test test test test test test test test junk";
const MNEMONIC_2: &str = "junk test test test test test test test test test test test";
const ENCRYPTION_KEY: [u8; 32] = [0x55u8; 32];

/// Contract-side shield and unshield fee: 0.25%
fn fee_of(gross: u128) -> u128 {
    gross * 25 / 10_000
}

struct TestContract {
    accept_roots: bool,
}

#[async_trait]
impl SmartWalletContract for TestContract {
    async fn tree_number(&self) -> EngineResult<u32> {
        Ok(0)
    }

    async fn merkle_root(&self, _tree: u32) -> EngineResult<[u8; 32]> {
        Ok([0u8; 32])
    }

    async fn validate_merkle_root(&self, _tree: u32, _root: [u8; 32]) -> EngineResult<bool> {
        Ok(self.accept_roots)
    }

    async fn latest_block(&self) -> EngineResult<u64> {
        Ok(0)
    }

    async fn commitment_events(
        &self,
        _from_block: u64,
        _to_block: u64,
    ) -> EngineResult<Vec<CommitmentBatchEvent>> {
        Ok(Vec::new())
    }

    async fn nullifier_events(
        &self,
        _from_block: u64,
        _to_block: u64,
    ) -> EngineResult<Vec<NullifierSeenEvent>> {
        Ok(Vec::new())
    }

    async fn unshield_events(
        &self,
        _from_block: u64,
        _to_block: u64,
    ) -> EngineResult<Vec<UnshieldSeenEvent>> {
        Ok(Vec::new())
    }
}

struct TestArtifacts;

#[async_trait]
impl railgun_engine::ArtifactGetter for TestArtifacts {
    async fn get_artifacts(
        &self,
        id: railgun_engine::ArtifactId,
    ) -> EngineResult<railgun_engine::Artifacts> {
        let valid_inputs = matches!(id.nullifiers, 1 | 2 | 8);
        let valid_outputs = matches!(id.outputs, 2 | 3);
        if !valid_inputs || !valid_outputs {
            return Err(EngineError::ArtifactUnavailable {
                nullifiers: id.nullifiers,
                outputs: id.outputs,
            });
        }
        Ok(railgun_engine::Artifacts {
            vkey: b"vkey".to_vec(),
            wasm: b"wasm".to_vec(),
            zkey: b"zkey".to_vec(),
        })
    }
}

struct TestProver;

#[async_trait]
impl railgun_engine::Prover for TestProver {
    async fn prove(
        &self,
        _artifact: railgun_engine::ArtifactId,
        public_inputs: &PublicInputs,
        _witness: &ProofWitness,
    ) -> EngineResult<railgun_engine::SnarkProof> {
        // Deterministic stand-in proof bound to the public inputs.
        let mut hasher = Sha256::new();
        hasher.update(railgun_engine::bytes::fr_to_bytes(&public_inputs.merkle_root));
        hasher.update(railgun_engine::bytes::fr_to_bytes(
            &public_inputs.bound_params_hash,
        ));
        for nullifier in &public_inputs.nullifiers {
            hasher.update(railgun_engine::bytes::fr_to_bytes(nullifier));
        }
        let digest: [u8; 32] = hasher.finalize().into();
        let limb = U256::from_be_bytes(digest);
        Ok(railgun_engine::SnarkProof {
            a: [limb, limb],
            b: [[limb, limb], [limb, limb]],
            c: [limb, limb],
        })
    }
}

async fn setup() -> (Engine, Chain) {
    let mut engine = Engine::new(EngineCapabilities {
        db: Arc::new(MemoryDatabase::new()),
        artifact_getter: Arc::new(TestArtifacts),
        quick_sync: None,
    });
    let chain = Chain::evm(1);
    engine
        .load_network(chain, Arc::new(TestContract { accept_roots: true }), 0)
        .await
        .unwrap();
    (engine, chain)
}

fn txid(byte: u8) -> [u8; 32] {
    [byte; 32]
}

fn erc20() -> TokenData {
    TokenData::Erc20(Address::from_slice(&[0xaau8; 20]))
}

/// Build a shield commitment event carrying the post-fee value verbatim
fn shield_event(
    start_index: u64,
    shields: &[(&ShieldNote, Option<u128>)],
    txid: [u8; 32],
    block: u64,
) -> CommitmentBatchEvent {
    let commitments = shields
        .iter()
        .map(|(shield, fee)| StoredCommitment {
            hash: shield.note.commitment_bytes(),
            ciphertext: CommitmentCiphertext::Shield {
                npk: shield.preimage.npk,
                token: shield.preimage.token.clone(),
                value: shield.preimage.value,
                shield_key: shield.ciphertext.shield_key,
                encrypted_random: shield.ciphertext.encrypted_random.clone(),
                fee: *fee,
            },
            txid,
            block_number: block,
        })
        .collect();
    CommitmentBatchEvent {
        tree_number: 0,
        start_index,
        commitments,
    }
}

/// Shield post-fee `value` of `token` toward a wallet and ingest the event
async fn shield_to_wallet(
    engine: &Engine,
    chain: Chain,
    wallet_id: &str,
    token: TokenData,
    value: u128,
    fee: Option<u128>,
    txid_byte: u8,
    block: u64,
) {
    let address = engine.wallet(wallet_id).unwrap().address_data(Some(chain));
    let mut rng = rand::thread_rng();
    let shield = ShieldNote::new(&address, token, value, &mut rng).unwrap();

    let start_index = {
        let forest = engine.forest(chain).unwrap();
        let next = forest.read().await.next_index(0);
        next
    };
    engine
        .ingest(
            chain,
            QuickSyncData {
                commitment_batches: vec![shield_event(
                    start_index,
                    &[(&shield, fee)],
                    txid(txid_byte),
                    block,
                )],
                nullifiers: Vec::new(),
                unshields: Vec::new(),
            },
        )
        .await
        .unwrap();
}

/// Submit proved transactions as one on-chain transaction: tree leaves for
/// ciphertext-bearing commitments, nullifier events, and unshield events
/// with the contract-side fee applied.
async fn submit_transactions(
    engine: &Engine,
    chain: Chain,
    transactions: &[SerializedTransaction],
    txid: [u8; 32],
    block: u64,
) {
    let mut data = QuickSyncData::default();
    let forest = engine.forest(chain).unwrap();
    let mut next = forest.read().await.next_index(0);

    for tx in transactions {
        let leaves: Vec<StoredCommitment> = tx
            .commitments
            .iter()
            .zip(tx.ciphertexts.iter())
            .map(|(hash, ciphertext)| StoredCommitment {
                hash: *hash,
                ciphertext: ciphertext.clone(),
                txid,
                block_number: block,
            })
            .collect();
        let count = leaves.len() as u64;
        data.commitment_batches.push(CommitmentBatchEvent {
            tree_number: 0,
            start_index: next,
            commitments: leaves,
        });
        next += count;

        data.nullifiers.push(NullifierSeenEvent {
            nullifiers: tx.nullifiers.clone(),
            txid,
            block_number: block,
        });

        if let Some(preimage) = &tx.unshield_preimage {
            let fee = fee_of(preimage.value);
            data.unshields.push(UnshieldSeenEvent {
                txid,
                token: preimage.token.clone(),
                to: preimage.to,
                value: preimage.value - fee,
                fee,
                block_number: block,
            });
        }
    }
    engine.ingest(chain, data).await.unwrap();
}

async fn scan_all(engine: &Engine, chain: Chain, wallet_ids: &[&str]) {
    for id in wallet_ids {
        engine
            .wallet(id)
            .unwrap()
            .scan_balances(chain, None)
            .await
            .unwrap();
    }
}

#[tokio::test]
async fn scenario_shield_then_balance() {
    let (mut engine, chain) = setup().await;
    let wallet_id = engine
        .create_wallet(&ENCRYPTION_KEY, MNEMONIC_1, 0)
        .await
        .unwrap();

    let value = hex_to_u128("9138822709a9fc231cba6").unwrap();
    shield_to_wallet(&engine, chain, &wallet_id, erc20(), value, None, 1, 10).await;
    scan_all(&engine, chain, &[&wallet_id]).await;

    let wallet = engine.wallet(&wallet_id).unwrap();
    assert_eq!(wallet.balance(chain, &erc20()).await.unwrap(), value);

    // The commitment landed at (tree 0, index 0) and proves against the root.
    let proof = engine.tree_reader(chain).unwrap().proof(0, 0).await.unwrap();
    assert!(proof.verify());
}

#[tokio::test]
async fn scenario_shield_unshield_history() {
    let (mut engine, chain) = setup().await;
    let wallet1 = engine
        .create_wallet(&ENCRYPTION_KEY, MNEMONIC_1, 0)
        .await
        .unwrap();
    let wallet2 = engine
        .create_wallet(&ENCRYPTION_KEY, MNEMONIC_2, 0)
        .await
        .unwrap();

    // Shield 110000e18 gross; the contract takes 0.25%, the event carries
    // the post-fee value, and the engine treats it as authoritative.
    let gross = 110_000u128 * 10u128.pow(18);
    let shielded = gross - fee_of(gross);
    assert_eq!(shielded, 109_725u128 * 10u128.pow(18));
    shield_to_wallet(
        &engine,
        chain,
        &wallet1,
        erc20(),
        shielded,
        Some(fee_of(gross)),
        1,
        10,
    )
    .await;
    scan_all(&engine, chain, &[&wallet1, &wallet2]).await;

    // Unshield 300e18 plus a 1-unit relayer fee to wallet2.
    let unshield_gross = 300u128 * 10u128.pow(18);
    let wallet2_address = engine.wallet(&wallet2).unwrap().address_data(Some(chain));
    let mut batch = TransactionBatch::new(chain, 0);
    batch.add_output(TransactionOutput {
        recipient: wallet2_address,
        token: erc20(),
        value: 1,
        output_type: OutputType::RelayerFee,
        show_sender: false,
        memo_text: None,
        wallet_source: None,
    });
    batch
        .add_unshield(UnshieldData {
            to: Address::from_slice(&[0xeeu8; 20]),
            token: erc20(),
            value: unshield_gross,
        })
        .unwrap();

    let transactions = batch
        .generate_transactions(
            &TestProver,
            &TestArtifacts,
            engine.wallet(&wallet1).unwrap(),
            None,
        )
        .await
        .unwrap();
    assert_eq!(transactions.len(), 1);
    // Fee output + change + unshield: the three-output rule.
    assert_eq!(transactions[0].commitments.len(), 3);

    submit_transactions(&engine, chain, &transactions, txid(2), 20).await;
    scan_all(&engine, chain, &[&wallet1, &wallet2]).await;

    let w1 = engine.wallet(&wallet1).unwrap();
    let w2 = engine.wallet(&wallet2).unwrap();
    assert_eq!(
        w1.balance(chain, &erc20()).await.unwrap(),
        109_424_999_999_999_999_999_999u128
    );
    assert_eq!(w2.balance(chain, &erc20()).await.unwrap(), 1);

    let history = w1.transaction_history(chain).await.unwrap();
    assert_eq!(history.len(), 2);

    // Entry 1: the shield, a plain receive.
    let entry1 = &history[0];
    assert_eq!(entry1.receive_token_amounts.len(), 1);
    assert_eq!(entry1.receive_token_amounts[0].amount, shielded);
    assert!(entry1.change_token_amounts.is_empty());
    assert!(entry1.unshield_token_amounts.is_empty());

    // Entry 2: relayer fee + change + unshield, and no duplicate receive.
    let entry2 = &history[1];
    assert!(entry2.receive_token_amounts.is_empty());
    let fee_amount = entry2.relayer_fee_token_amount.as_ref().unwrap();
    assert_eq!(fee_amount.amount, 1);
    assert_eq!(entry2.change_token_amounts.len(), 1);
    assert_eq!(entry2.unshield_token_amounts.len(), 1);
    assert_eq!(
        entry2.unshield_token_amounts[0].amount,
        unshield_gross - fee_of(unshield_gross)
    );
}

#[tokio::test]
async fn scenario_transfer_with_memo_dual_history() {
    let (mut engine, chain) = setup().await;
    let wallet1 = engine
        .create_wallet(&ENCRYPTION_KEY, MNEMONIC_1, 0)
        .await
        .unwrap();
    let wallet2 = engine
        .create_wallet(&ENCRYPTION_KEY, MNEMONIC_2, 0)
        .await
        .unwrap();

    let gross = 110_000u128 * 10u128.pow(18);
    let shielded = gross - fee_of(gross);
    shield_to_wallet(
        &engine,
        chain,
        &wallet1,
        erc20(),
        shielded,
        Some(fee_of(gross)),
        1,
        10,
    )
    .await;
    scan_all(&engine, chain, &[&wallet1, &wallet2]).await;

    let wallet1_address = engine.wallet(&wallet1).unwrap().address(Some(chain));
    let wallet2_address = engine.wallet(&wallet2).unwrap().address_data(Some(chain));

    let mut batch = TransactionBatch::new(chain, 0);
    batch.add_output(TransactionOutput {
        recipient: wallet2_address.clone(),
        token: erc20(),
        value: 10,
        output_type: OutputType::Transfer,
        show_sender: true,
        memo_text: Some("memo text".into()),
        wallet_source: None,
    });
    batch.add_output(TransactionOutput {
        recipient: wallet2_address,
        token: erc20(),
        value: 1,
        output_type: OutputType::RelayerFee,
        show_sender: false,
        memo_text: None,
        wallet_source: None,
    });

    let transactions = batch
        .generate_transactions(
            &TestProver,
            &TestArtifacts,
            engine.wallet(&wallet1).unwrap(),
            None,
        )
        .await
        .unwrap();
    submit_transactions(&engine, chain, &transactions, txid(2), 20).await;
    scan_all(&engine, chain, &[&wallet1, &wallet2]).await;

    let w1 = engine.wallet(&wallet1).unwrap();
    let w2 = engine.wallet(&wallet2).unwrap();
    assert_eq!(
        w1.balance(chain, &erc20()).await.unwrap(),
        109_724_999_999_999_999_999_989u128
    );
    assert_eq!(w2.balance(chain, &erc20()).await.unwrap(), 11);

    // Wallet 2 sees one receive with two entries: the memo'd transfer with
    // the sender revealed, and the fee with the sender hidden.
    let history = w2.transaction_history(chain).await.unwrap();
    assert_eq!(history.len(), 1);
    let entry = &history[0];
    assert_eq!(entry.receive_token_amounts.len(), 2);

    let transfer = entry
        .receive_token_amounts
        .iter()
        .find(|a| a.amount == 10)
        .unwrap();
    assert_eq!(transfer.sender_address.as_deref(), Some(wallet1_address.as_str()));
    assert_eq!(transfer.memo_text.as_deref(), Some("memo text"));

    let fee = entry
        .receive_token_amounts
        .iter()
        .find(|a| a.amount == 1)
        .unwrap();
    assert!(fee.sender_address.is_none());
}

#[tokio::test]
async fn scenario_nft_shield_transfer_unshield() {
    let (mut engine, chain) = setup().await;
    let wallet1 = engine
        .create_wallet(&ENCRYPTION_KEY, MNEMONIC_1, 0)
        .await
        .unwrap();
    let wallet2 = engine
        .create_wallet(&ENCRYPTION_KEY, MNEMONIC_2, 0)
        .await
        .unwrap();

    let nft = |id: u64| TokenData::Erc721(Address::from_slice(&[0xbbu8; 20]), U256::from(id));

    // Three shields in three transactions: both NFTs plus fee funds.
    shield_to_wallet(&engine, chain, &wallet1, nft(0), 1, None, 1, 10).await;
    shield_to_wallet(&engine, chain, &wallet1, nft(1), 1, None, 2, 11).await;
    shield_to_wallet(&engine, chain, &wallet1, erc20(), 10, None, 3, 12).await;
    scan_all(&engine, chain, &[&wallet1, &wallet2]).await;

    let wallet2_address = engine.wallet(&wallet2).unwrap().address_data(Some(chain));
    let etherswallet = Address::from_slice(&[0xe7u8; 20]);

    let mut batch = TransactionBatch::new(chain, 0);
    batch.add_output(TransactionOutput {
        recipient: wallet2_address.clone(),
        token: nft(1),
        value: 1,
        output_type: OutputType::Transfer,
        show_sender: true,
        memo_text: None,
        wallet_source: None,
    });
    batch.add_output(TransactionOutput {
        recipient: wallet2_address,
        token: erc20(),
        value: 1,
        output_type: OutputType::RelayerFee,
        show_sender: false,
        memo_text: None,
        wallet_source: None,
    });
    batch
        .add_unshield(UnshieldData {
            to: etherswallet,
            token: nft(0),
            value: 1,
        })
        .unwrap();

    let transactions = batch
        .generate_transactions(
            &TestProver,
            &TestArtifacts,
            engine.wallet(&wallet1).unwrap(),
            None,
        )
        .await
        .unwrap();
    // One group per token.
    assert_eq!(transactions.len(), 3);

    submit_transactions(&engine, chain, &transactions, txid(9), 20).await;
    scan_all(&engine, chain, &[&wallet1, &wallet2]).await;

    let w1 = engine.wallet(&wallet1).unwrap();
    let w2 = engine.wallet(&wallet2).unwrap();
    assert_eq!(w1.balance(chain, &nft(0)).await.unwrap(), 0);
    assert_eq!(w1.balance(chain, &nft(1)).await.unwrap(), 0);
    assert_eq!(w2.balance(chain, &nft(1)).await.unwrap(), 1);

    // Three shields plus one complex transact.
    let history = w1.transaction_history(chain).await.unwrap();
    assert_eq!(history.len(), 4);
    let transact = &history[3];
    assert_eq!(transact.unshield_token_amounts.len(), 1);
    assert!(transact.relayer_fee_token_amount.is_some());
}

#[tokio::test]
async fn scenario_last_synced_block_roundtrip() {
    let (engine, _) = setup().await;
    let chain = Chain::evm(10010);

    assert_eq!(engine.get_last_synced_block(chain).await.unwrap(), None);
    engine.set_last_synced_block(100, chain).await.unwrap();
    assert_eq!(engine.get_last_synced_block(chain).await.unwrap(), Some(100));
    engine.set_last_synced_block(100_000, chain).await.unwrap();
    assert_eq!(
        engine.get_last_synced_block(chain).await.unwrap(),
        Some(100_000)
    );
}

#[tokio::test]
async fn scenario_root_rejection_rolls_back() {
    let mut engine = Engine::new(EngineCapabilities {
        db: Arc::new(MemoryDatabase::new()),
        artifact_getter: Arc::new(TestArtifacts),
        quick_sync: None,
    });
    let chain = Chain::evm(1);
    engine
        .load_network(chain, Arc::new(TestContract { accept_roots: false }), 0)
        .await
        .unwrap();
    let wallet_id = engine
        .create_wallet(&ENCRYPTION_KEY, MNEMONIC_1, 0)
        .await
        .unwrap();

    let address = engine.wallet(&wallet_id).unwrap().address_data(Some(chain));
    let mut rng = rand::thread_rng();
    let shield = ShieldNote::new(&address, erc20(), 1000, &mut rng).unwrap();
    let result = engine
        .ingest(
            chain,
            QuickSyncData {
                commitment_batches: vec![shield_event(0, &[(&shield, None)], txid(1), 10)],
                nullifiers: Vec::new(),
                unshields: Vec::new(),
            },
        )
        .await;
    assert!(matches!(
        result,
        Err(EngineError::RootValidationFailed { tree: 0 })
    ));

    // Rollback is observable: no leaf in the batch is present.
    let reader = engine.tree_reader(chain).unwrap();
    assert!(matches!(
        reader.proof(0, 0).await,
        Err(EngineError::LeafNotPresent { tree: 0, index: 0 })
    ));
}

#[tokio::test]
async fn scan_is_idempotent_without_new_events() {
    let (mut engine, chain) = setup().await;
    let wallet_id = engine
        .create_wallet(&ENCRYPTION_KEY, MNEMONIC_1, 0)
        .await
        .unwrap();
    shield_to_wallet(&engine, chain, &wallet_id, erc20(), 5000, None, 1, 10).await;
    scan_all(&engine, chain, &[&wallet_id]).await;

    async fn snapshot(
        engine: &Engine,
        chain: Chain,
        wallet_id: &str,
    ) -> Vec<(u32, u64, bool, u128)> {
        let wallet = engine.wallet(wallet_id).unwrap();
        wallet
            .txos(chain)
            .await
            .unwrap()
            .iter()
            .map(|t| (t.tree_number, t.leaf_index, t.spent, t.note.value))
            .collect()
    }

    let before = snapshot(&engine, chain, &wallet_id).await;
    scan_all(&engine, chain, &[&wallet_id]).await;
    let after = snapshot(&engine, chain, &wallet_id).await;
    assert_eq!(before, after);
}

#[tokio::test]
async fn full_rescan_preserves_balances() {
    let (mut engine, chain) = setup().await;
    let wallet_id = engine
        .create_wallet(&ENCRYPTION_KEY, MNEMONIC_1, 0)
        .await
        .unwrap();
    shield_to_wallet(&engine, chain, &wallet_id, erc20(), 7777, None, 1, 10).await;
    scan_all(&engine, chain, &[&wallet_id]).await;

    let wallet = engine.wallet(&wallet_id).unwrap();
    assert_eq!(wallet.balance(chain, &erc20()).await.unwrap(), 7777);

    wallet.full_rescan_balances(chain, None).await.unwrap();
    assert_eq!(wallet.balance(chain, &erc20()).await.unwrap(), 7777);

    wallet.clear_scanned_balances(chain).await.unwrap();
    assert_eq!(wallet.balance(chain, &erc20()).await.unwrap(), 0);
    wallet.scan_balances(chain, None).await.unwrap();
    assert_eq!(wallet.balance(chain, &erc20()).await.unwrap(), 7777);
}

#[tokio::test]
async fn insufficient_balance_cites_amounts() {
    let (mut engine, chain) = setup().await;
    let wallet1 = engine
        .create_wallet(&ENCRYPTION_KEY, MNEMONIC_1, 0)
        .await
        .unwrap();
    let wallet2 = engine
        .create_wallet(&ENCRYPTION_KEY, MNEMONIC_2, 0)
        .await
        .unwrap();
    shield_to_wallet(&engine, chain, &wallet1, erc20(), 100, None, 1, 10).await;
    scan_all(&engine, chain, &[&wallet1]).await;

    let recipient = engine.wallet(&wallet2).unwrap().address_data(Some(chain));
    let mut batch = TransactionBatch::new(chain, 0);
    batch.add_output(TransactionOutput {
        recipient,
        token: erc20(),
        value: 500,
        output_type: OutputType::Transfer,
        show_sender: false,
        memo_text: None,
        wallet_source: None,
    });

    let err = batch
        .generate_transactions(
            &TestProver,
            &TestArtifacts,
            engine.wallet(&wallet1).unwrap(),
            None,
        )
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        EngineError::InsufficientBalance {
            required: 500,
            available: 100
        }
    ));
}

#[tokio::test]
async fn progress_reaches_completion() {
    let (mut engine, chain) = setup().await;
    let wallet1 = engine
        .create_wallet(&ENCRYPTION_KEY, MNEMONIC_1, 0)
        .await
        .unwrap();
    let wallet2 = engine
        .create_wallet(&ENCRYPTION_KEY, MNEMONIC_2, 0)
        .await
        .unwrap();
    shield_to_wallet(&engine, chain, &wallet1, erc20(), 1000, None, 1, 10).await;
    scan_all(&engine, chain, &[&wallet1]).await;

    let recipient = engine.wallet(&wallet2).unwrap().address_data(Some(chain));
    let mut batch = TransactionBatch::new(chain, 0);
    batch.add_output(TransactionOutput {
        recipient,
        token: erc20(),
        value: 10,
        output_type: OutputType::Transfer,
        show_sender: false,
        memo_text: None,
        wallet_source: None,
    });

    let seen = std::sync::Mutex::new(Vec::new());
    let callback = |p: f64| seen.lock().unwrap().push(p);
    batch
        .generate_transactions(
            &TestProver,
            &TestArtifacts,
            engine.wallet(&wallet1).unwrap(),
            Some(&callback),
        )
        .await
        .unwrap();

    let progress = seen.into_inner().unwrap();
    assert_eq!(progress.first().copied(), Some(0.0));
    assert_eq!(progress.last().copied(), Some(1.0));
}
