//! Smart-contract adapter interface
//!
//! The engine never talks JSON-RPC itself; the host supplies an adapter over
//! the pool contract and the engine consumes it through this trait.

use async_trait::async_trait;
use std::sync::Arc;

use ark_bn254::Fr;

use crate::bytes::fr_to_bytes;
use crate::error::EngineResult;
use crate::events::{CommitmentBatchEvent, NullifierSeenEvent, UnshieldSeenEvent};
use crate::merkle_tree::RootValidator;

/// Adapter over the on-chain shielded-pool contract
#[async_trait]
pub trait SmartWalletContract: Send + Sync {
    /// Currently active tree number
    async fn tree_number(&self) -> EngineResult<u32>;

    /// Current root of a tree
    async fn merkle_root(&self, tree: u32) -> EngineResult<[u8; 32]>;

    /// Whether the contract accepts `root` for `tree`
    async fn validate_merkle_root(&self, tree: u32, root: [u8; 32]) -> EngineResult<bool>;

    /// Latest block the provider has seen
    async fn latest_block(&self) -> EngineResult<u64>;

    async fn commitment_events(
        &self,
        from_block: u64,
        to_block: u64,
    ) -> EngineResult<Vec<CommitmentBatchEvent>>;

    async fn nullifier_events(
        &self,
        from_block: u64,
        to_block: u64,
    ) -> EngineResult<Vec<NullifierSeenEvent>>;

    async fn unshield_events(
        &self,
        from_block: u64,
        to_block: u64,
    ) -> EngineResult<Vec<UnshieldSeenEvent>>;
}

/// Root validator backed by the contract's own root acceptance check
pub struct ContractRootValidator {
    contract: Arc<dyn SmartWalletContract>,
}

impl ContractRootValidator {
    pub fn new(contract: Arc<dyn SmartWalletContract>) -> Self {
        Self { contract }
    }
}

#[async_trait]
impl RootValidator for ContractRootValidator {
    async fn validate_root(&self, tree: u32, root: Fr) -> EngineResult<bool> {
        self.contract
            .validate_merkle_root(tree, fr_to_bytes(&root))
            .await
    }
}
