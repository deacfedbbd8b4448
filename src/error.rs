//! Error types for the shielded-pool engine

use thiserror::Error;

/// Errors surfaced by the engine core
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("insufficient balance: required {required}, available {available}")]
    InsufficientBalance { required: u128, available: u128 },

    #[error("balance spread across too many UTXOs; consolidate before retrying")]
    ConsolidateBalanceRequired,

    #[error("duplicate unshield for token {0}")]
    DuplicateUnshield(String),

    #[error("token mismatch: {0}")]
    TokenMismatch(String),

    #[error("merkle root rejected by validator for tree {tree}")]
    RootValidationFailed { tree: u32 },

    #[error("conflicting queued leaf at tree {tree} index {index}")]
    ConflictingLeaf { tree: u32, index: u64 },

    #[error("no leaf at tree {tree} index {index}")]
    LeafNotPresent { tree: u32, index: u64 },

    #[error("invalid shielded address: {0}")]
    AddressDecode(String),

    #[error("note decryption failed")]
    DecryptionFailed,

    #[error("wallet is locked: wrong or missing encryption key")]
    WalletLocked,

    #[error("no proving artifacts for {nullifiers} nullifiers x {outputs} outputs")]
    ArtifactUnavailable { nullifiers: usize, outputs: usize },

    #[error("prover failed: {0}")]
    ProverFailed(String),

    #[error("store i/o: {0}")]
    StoreIo(String),

    #[error("chain not loaded: {0}")]
    ChainNotLoaded(String),

    #[error("value overflow in {0}")]
    ValueOverflow(&'static str),

    #[error("invalid note data: {0}")]
    InvalidNoteData(String),
}

pub type EngineResult<T> = Result<T, EngineError>;
