//! Transaction batching and proving
//!
//! A [`TransactionBatch`] collects outputs and unshield requests across
//! tokens, runs the solutions engine per token, and turns every spending
//! solution group into one proved transaction: nullifiers, output
//! commitments, merkle paths, bound parameters, and sealed ciphertexts, fed
//! through the injected prover.

use alloy_primitives::Address;
use ark_bn254::Fr;
use ark_ff::PrimeField;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use crate::address::AddressData;
use crate::bytes::fr_to_bytes;
use crate::chain::Chain;
use crate::error::{EngineError, EngineResult};
use crate::events::CommitmentCiphertext;
use crate::memo::{MemoField, OutputType, MEMO_SENDER_RANDOM_NULL};
use crate::merkle_tree::TreeReader;
use crate::note::{
    seal_annotation, seal_sender_identity, Note, UnshieldNote,
};
use crate::poseidon::poseidon;
use crate::prover::{ArtifactGetter, ArtifactId, ProofWitness, Prover, PublicInputs, SnarkProof};
use crate::solutions::{create_spending_solution_groups, SpendingSolutionGroup};
use crate::token::TokenData;
use crate::wallet::{encode_annotation, ProgressCallback, Wallet};

/// A requested withdrawal to a public address
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnshieldData {
    pub to: Address,
    pub token: TokenData,
    pub value: u128,
}

/// Optional binding to an external composing contract
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdaptId {
    pub contract: Address,
    pub parameters: [u8; 32],
}

impl Default for AdaptId {
    fn default() -> Self {
        Self {
            contract: Address::ZERO,
            parameters: [0u8; 32],
        }
    }
}

/// A requested shielded output
#[derive(Clone, Debug)]
pub struct TransactionOutput {
    pub recipient: AddressData,
    pub token: TokenData,
    pub value: u128,
    pub output_type: OutputType,
    /// Reveal this wallet's address to the recipient
    pub show_sender: bool,
    pub memo_text: Option<String>,
    pub wallet_source: Option<String>,
}

/// Parameters bound into the proof, committing the transaction to its
/// context
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoundParams {
    pub tree_number: u32,
    pub min_gas_price: u128,
    /// 0 = no unshield, 1 = unshield present
    pub unshield: u8,
    pub chain_id: u64,
    pub adapt_contract: [u8; 20],
    pub adapt_parameters: [u8; 32],
}

impl BoundParams {
    pub fn hash(&self) -> Fr {
        let mut contract = [0u8; 32];
        contract[12..].copy_from_slice(&self.adapt_contract);
        poseidon(&[
            Fr::from(self.tree_number as u64),
            Fr::from(self.min_gas_price),
            Fr::from(self.unshield as u64),
            Fr::from(self.chain_id),
            Fr::from_be_bytes_mod_order(&contract),
            Fr::from_be_bytes_mod_order(&self.adapt_parameters),
        ])
    }
}

/// Unshield preimage published alongside the proof
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnshieldPreimage {
    pub to: Address,
    pub token: TokenData,
    pub value: u128,
}

/// One proved transaction, ready for submission by the host
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SerializedTransaction {
    pub proof: SnarkProof,
    pub merkle_root: [u8; 32],
    pub nullifiers: Vec<[u8; 32]>,
    pub commitments: Vec<[u8; 32]>,
    pub bound_params: BoundParams,
    /// Ciphertext per shielded output commitment, in commitment order
    pub ciphertexts: Vec<CommitmentCiphertext>,
    pub unshield_preimage: Option<UnshieldPreimage>,
}

/// Collects outputs and unshields, then proves them group by group
pub struct TransactionBatch {
    chain: Chain,
    overall_batch_min_gas_price: u128,
    outputs: Vec<TransactionOutput>,
    unshields: HashMap<[u8; 32], UnshieldData>,
    adapt_id: Option<AdaptId>,
}

impl TransactionBatch {
    pub fn new(chain: Chain, overall_batch_min_gas_price: u128) -> Self {
        Self {
            chain,
            overall_batch_min_gas_price,
            outputs: Vec::new(),
            unshields: HashMap::new(),
            adapt_id: None,
        }
    }

    pub fn add_output(&mut self, output: TransactionOutput) {
        self.outputs.push(output);
    }

    /// At most one unshield per token; zero-value unshields are invalid
    pub fn add_unshield(&mut self, data: UnshieldData) -> EngineResult<()> {
        if data.value == 0 {
            return Err(EngineError::InvalidNoteData("zero-value unshield".into()));
        }
        let token_hash = data.token.token_hash_bytes();
        if self.unshields.contains_key(&token_hash) {
            return Err(EngineError::DuplicateUnshield(hex::encode(token_hash)));
        }
        self.unshields.insert(token_hash, data);
        Ok(())
    }

    pub fn set_adapt_id(&mut self, adapt_id: AdaptId) {
        self.adapt_id = Some(adapt_id);
    }

    /// Solve, assemble, and prove every group in the batch.
    ///
    /// The first failing token aborts the whole batch; partial results are
    /// never returned. Progress is the average completion across groups.
    pub async fn generate_transactions(
        &self,
        prover: &dyn Prover,
        artifact_getter: &dyn ArtifactGetter,
        wallet: &Wallet,
        progress: Option<ProgressCallback<'_>>,
    ) -> EngineResult<Vec<SerializedTransaction>> {
        let reader = wallet.reader(self.chain)?.clone();
        let balances = wallet.balances_by_tree(self.chain).await?;

        // Group requested outputs and unshields per token, deterministically.
        let mut per_token: BTreeMap<[u8; 32], (TokenData, Vec<usize>)> = BTreeMap::new();
        for (index, output) in self.outputs.iter().enumerate() {
            per_token
                .entry(output.token.token_hash_bytes())
                .or_insert_with(|| (output.token.clone(), Vec::new()))
                .1
                .push(index);
        }
        for (token_hash, unshield) in &self.unshields {
            per_token
                .entry(*token_hash)
                .or_insert_with(|| (unshield.token.clone(), Vec::new()));
        }

        let mut planned: Vec<(TokenData, Vec<usize>, SpendingSolutionGroup)> = Vec::new();
        for (token_hash, (token, output_indices)) in &per_token {
            let tree_balances = balances.get(token_hash).cloned().unwrap_or_default();
            let output_values: Vec<u128> = output_indices
                .iter()
                .map(|i| self.outputs[*i].value)
                .collect();
            let unshield_value = self
                .unshields
                .get(token_hash)
                .map(|u| u.value)
                .unwrap_or(0);

            let groups =
                create_spending_solution_groups(&tree_balances, &output_values, unshield_value)
                    .map_err(|err| {
                        tracing::warn!(token = %hex::encode(token_hash), %err, "solver failed");
                        err
                    })?;
            for group in groups {
                planned.push((token.clone(), output_indices.clone(), group));
            }
        }

        let total = planned.len();
        if let Some(cb) = progress {
            cb(0.0);
        }
        let mut transactions = Vec::with_capacity(total);
        for (done, (token, output_indices, group)) in planned.into_iter().enumerate() {
            let tx = self
                .prove_group(prover, artifact_getter, wallet, &reader, &token, &output_indices, group)
                .await?;
            transactions.push(tx);
            if let Some(cb) = progress {
                cb((done + 1) as f64 / total as f64);
            }
        }
        Ok(transactions)
    }

    #[allow(clippy::too_many_arguments)]
    async fn prove_group(
        &self,
        prover: &dyn Prover,
        artifact_getter: &dyn ArtifactGetter,
        wallet: &Wallet,
        reader: &Arc<dyn TreeReader>,
        token: &TokenData,
        output_indices: &[usize],
        group: SpendingSolutionGroup,
    ) -> EngineResult<SerializedTransaction> {
        let keys = wallet.keys();
        let token_hash = token.token_hash();
        let self_address = wallet.address_data(Some(self.chain));

        // Nullifiers and inclusion paths for every input.
        let mut nullifiers = Vec::with_capacity(group.utxos.len());
        let mut merkle_paths = Vec::with_capacity(group.utxos.len());
        let mut leaf_indices = Vec::with_capacity(group.utxos.len());
        let mut input_notes = Vec::with_capacity(group.utxos.len());
        for utxo in &group.utxos {
            if utxo.note.token_hash != token_hash {
                return Err(EngineError::TokenMismatch(format!(
                    "utxo at ({}, {}) has a different token",
                    utxo.tree_number, utxo.leaf_index
                )));
            }
            nullifiers.push(Note::nullifier(keys.spending_key(), utxo.leaf_index));
            merkle_paths.push(reader.proof(group.spending_tree, utxo.leaf_index).await?);
            leaf_indices.push(utxo.leaf_index);
            input_notes.push(utxo.note.clone());
        }
        let merkle_root = merkle_paths
            .first()
            .map(|p| p.root)
            .ok_or_else(|| EngineError::InvalidNoteData("group with no inputs".into()))?;

        let unshield = self.unshields.get(&fr_to_bytes(&token_hash)).and_then(|u| {
            (group.unshield_value > 0).then(|| UnshieldNote {
                to: u.to,
                token: u.token.clone(),
                value: group.unshield_value,
            })
        });

        // Build and seal every output note inside one scope so the rng never
        // lives across a suspension point.
        let (output_notes, commitments, ciphertexts, encrypted_randoms) = {
            let mut rng = rand::thread_rng();

            // Regular output notes for this group's slices, plus the change note.
            let mut output_notes: Vec<(Note, AddressData, bool)> = Vec::new();
            for (local_index, value) in &group.output_values {
                let request = &self.outputs[output_indices[*local_index]];
                let sender_random = if request.show_sender {
                    let mut random = [0u8; 15];
                    rng.fill_bytes(&mut random);
                    random
                } else {
                    MEMO_SENDER_RANDOM_NULL
                };
                let memo = MemoField {
                    output_type: request.output_type,
                    sender_random,
                    wallet_source: request.wallet_source.clone(),
                    text: request.memo_text.clone(),
                };
                let note = Note::transfer_to(&request.recipient, token_hash, *value, memo, &mut rng);
                output_notes.push((note, request.recipient.clone(), request.show_sender));
            }
            let change_note = Note::transfer_to(
                &self_address,
                token_hash,
                group.change_value(),
                MemoField::hidden_sender(OutputType::Change),
                &mut rng,
            );
            output_notes.push((change_note, self_address.clone(), false));

            // Seal every shielded output toward its receiver and annotate it
            // for ourselves so sent history survives a rescan.
            let mut commitments = Vec::with_capacity(output_notes.len() + 1);
            let mut ciphertexts = Vec::with_capacity(output_notes.len());
            let mut encrypted_randoms = Vec::with_capacity(output_notes.len());
            for (note, recipient, show_sender) in &output_notes {
                commitments.push(note.commitment());
                let sealed = note.encrypt(&recipient.viewing_public_key, &mut rng)?;
                let sender_ciphertext = if *show_sender {
                    seal_sender_identity(&self_address, &note.memo.sender_random)
                } else {
                    Vec::new()
                };
                let annotation = seal_annotation(
                    &keys.viewing_key(),
                    &encode_annotation(note.memo.output_type, note.value, &note.token_hash),
                    &mut rng,
                );
                encrypted_randoms.push(sealed.ciphertext.clone());
                ciphertexts.push(CommitmentCiphertext::Transact {
                    ephemeral_pub: sealed.ephemeral_pub,
                    ciphertext: sealed.ciphertext,
                    sender_ciphertext,
                    annotation,
                });
            }
            if let Some(unshield_note) = &unshield {
                commitments.push(unshield_note.commitment());
            }
            (output_notes, commitments, ciphertexts, encrypted_randoms)
        };
        let output_count = output_notes.len() + unshield.iter().len();
        debug_assert!(output_count == 2 || output_count == 3);

        let adapt = self.adapt_id.clone().unwrap_or_default();
        let mut adapt_contract = [0u8; 20];
        adapt_contract.copy_from_slice(adapt.contract.as_slice());
        let bound_params = BoundParams {
            tree_number: group.spending_tree,
            min_gas_price: self.overall_batch_min_gas_price,
            unshield: u8::from(unshield.is_some()),
            chain_id: self.chain.id,
            adapt_contract,
            adapt_parameters: adapt.parameters,
        };

        let public_inputs = PublicInputs {
            merkle_root,
            bound_params_hash: bound_params.hash(),
            nullifiers: nullifiers.clone(),
            commitments_out: commitments.clone(),
        };
        let witness = ProofWitness {
            spending_key: keys.spending_key(),
            nullifying_key: keys.nullifying_key,
            input_notes,
            leaf_indices,
            merkle_paths,
            output_notes: output_notes.iter().map(|(n, _, _)| n.clone()).collect(),
            unshield: unshield.clone(),
            encrypted_randoms,
        };

        let artifact = ArtifactId {
            nullifiers: nullifiers.len(),
            outputs: output_count,
        };
        artifact_getter.get_artifacts(artifact).await?;
        let proof = prover.prove(artifact, &public_inputs, &witness).await?;
        tracing::info!(
            tree = group.spending_tree,
            inputs = nullifiers.len(),
            outputs = output_count,
            "spending group proved"
        );

        Ok(SerializedTransaction {
            proof,
            merkle_root: fr_to_bytes(&merkle_root),
            nullifiers: nullifiers.iter().map(fr_to_bytes).collect(),
            commitments: commitments.iter().map(fr_to_bytes).collect(),
            bound_params,
            ciphertexts,
            unshield_preimage: unshield.map(|u| UnshieldPreimage {
                to: u.to,
                token: u.token,
                value: u.value,
            }),
        })
    }
}
