//! Prover and proving-artifact capabilities
//!
//! The engine assembles circuit inputs and drives an injected prover; it
//! never implements the SNARK itself. Artifacts are addressed by circuit
//! shape: the nullifier count and output count of one spending group.

use alloy_primitives::U256;
use ark_bn254::Fr;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::EngineResult;
use crate::merkle_tree::MerkleProof;
use crate::note::{Note, UnshieldNote};

/// Circuit shape identifier: `(nullifierCount, outputCount)`
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ArtifactId {
    pub nullifiers: usize,
    pub outputs: usize,
}

impl std::fmt::Display for ArtifactId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}", self.nullifiers, self.outputs)
    }
}

/// Proving artifacts fetched for one circuit shape
#[derive(Clone, Debug)]
pub struct Artifacts {
    pub vkey: Vec<u8>,
    pub wasm: Vec<u8>,
    pub zkey: Vec<u8>,
}

/// Injected artifact fetcher
#[async_trait]
pub trait ArtifactGetter: Send + Sync {
    async fn get_artifacts(&self, id: ArtifactId) -> EngineResult<Artifacts>;
}

/// Groth16 proof as submitted on-chain
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnarkProof {
    pub a: [U256; 2],
    pub b: [[U256; 2]; 2],
    pub c: [U256; 2],
}

/// Public inputs of one spending-group proof
#[derive(Clone, Debug)]
pub struct PublicInputs {
    pub merkle_root: Fr,
    pub bound_params_hash: Fr,
    pub nullifiers: Vec<Fr>,
    pub commitments_out: Vec<Fr>,
}

/// Private witness of one spending-group proof
#[derive(Clone, Debug)]
pub struct ProofWitness {
    pub spending_key: Fr,
    pub nullifying_key: Fr,
    pub input_notes: Vec<Note>,
    pub leaf_indices: Vec<u64>,
    pub merkle_paths: Vec<MerkleProof>,
    pub output_notes: Vec<Note>,
    pub unshield: Option<UnshieldNote>,
    /// Sealed randomness toward each receiver, one per output
    pub encrypted_randoms: Vec<Vec<u8>>,
}

/// Injected SNARK prover
#[async_trait]
pub trait Prover: Send + Sync {
    async fn prove(
        &self,
        artifact: ArtifactId,
        public_inputs: &PublicInputs,
        witness: &ProofWitness,
    ) -> EngineResult<SnarkProof>;
}
