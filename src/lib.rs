//! Privacy-preserving transaction engine for EVM shielded pools
//!
//! The engine mirrors an on-chain Poseidon commitment Merkle forest, decrypts
//! notes addressed to wallet viewing keys, derives balances and transaction
//! history, selects UTXOs under the circuit's arity constraints, and drives
//! an injected SNARK prover to build spend transactions.
//!
//! Everything external (the key-value store, the contract adapter, the
//! prover, proving artifacts, quick-sync backfill) is injected as a
//! capability; the engine holds no process-wide state.

pub mod address;
pub mod bytes;
pub mod chain;
pub mod contract;
pub mod database;
pub mod engine;
pub mod error;
pub mod events;
pub mod history;
pub mod keys;
pub mod memo;
pub mod merkle_tree;
pub mod note;
pub mod poseidon;
pub mod prover;
pub mod solutions;
pub mod token;
pub mod transaction;
pub mod wallet;

// Re-exports for convenience
pub use address::{decode_address, encode_address, AddressData};
pub use chain::{Chain, ChainType};
pub use contract::SmartWalletContract;
pub use database::{BatchOp, Database, MemoryDatabase};
pub use engine::{Engine, EngineCapabilities};
pub use error::{EngineError, EngineResult};
pub use events::{
    CommitmentBatchEvent, CommitmentCiphertext, NullifierSeenEvent, QuickSync, QuickSyncData,
    StoredCommitment, UnshieldSeenEvent,
};
pub use history::{TokenAmount, TransactionHistoryEntry};
pub use keys::WalletKeys;
pub use memo::{MemoField, OutputType, MEMO_SENDER_RANDOM_NULL};
pub use merkle_tree::{
    AcceptAllRootValidator, MerkleForest, MerkleProof, RootValidator, TreeReader, TREE_DEPTH,
    TREE_MAX_LEAVES,
};
pub use note::{Note, NoteCiphertext, NoteVariant, ShieldNote, UnshieldNote};
pub use prover::{ArtifactGetter, ArtifactId, Artifacts, Prover, SnarkProof};
pub use solutions::{SpendingSolutionGroup, TreeBalance};
pub use token::TokenData;
pub use transaction::{
    AdaptId, BoundParams, SerializedTransaction, TransactionBatch, TransactionOutput, UnshieldData,
};
pub use wallet::{Txo, Wallet, WalletDetails};
