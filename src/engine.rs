//! Engine facade
//!
//! Owns the per-chain registries (merkle forests, contract adapters), the
//! loaded wallets, and the last-synced-block checkpoints. All external
//! capabilities arrive injected at construction; the engine never reaches
//! for process-wide state.

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::chain::Chain;
use crate::contract::{ContractRootValidator, SmartWalletContract};
use crate::database::{keyspace, Database};
use crate::error::{EngineError, EngineResult};
use crate::events::{self, QuickSync, QuickSyncData};
use crate::merkle_tree::{ForestReader, MerkleForest, TreeReader};
use crate::prover::ArtifactGetter;
use crate::wallet::Wallet;

/// Injected capabilities the engine runs on
pub struct EngineCapabilities {
    pub db: Arc<dyn Database>,
    pub artifact_getter: Arc<dyn ArtifactGetter>,
    pub quick_sync: Option<Arc<dyn QuickSync>>,
}

/// The top-level engine
pub struct Engine {
    db: Arc<dyn Database>,
    artifact_getter: Arc<dyn ArtifactGetter>,
    quick_sync: Option<Arc<dyn QuickSync>>,
    forests: HashMap<Chain, Arc<RwLock<MerkleForest>>>,
    contracts: HashMap<Chain, Arc<dyn SmartWalletContract>>,
    wallets: HashMap<String, Wallet>,
}

impl Engine {
    pub fn new(capabilities: EngineCapabilities) -> Self {
        Self {
            db: capabilities.db,
            artifact_getter: capabilities.artifact_getter,
            quick_sync: capabilities.quick_sync,
            forests: HashMap::new(),
            contracts: HashMap::new(),
            wallets: HashMap::new(),
        }
    }

    pub fn artifact_getter(&self) -> Arc<dyn ArtifactGetter> {
        self.artifact_getter.clone()
    }

    /// Load (or resume) a chain: restore its forest, register the contract
    /// adapter, backfill via quick sync, then ingest contract events up to
    /// the latest block.
    pub async fn load_network(
        &mut self,
        chain: Chain,
        contract: Arc<dyn SmartWalletContract>,
        deployment_block: u64,
    ) -> EngineResult<()> {
        let validator = Arc::new(ContractRootValidator::new(contract.clone()));
        let forest = MerkleForest::load(chain, self.db.clone(), validator).await?;
        let forest = Arc::new(RwLock::new(forest));

        self.forests.insert(chain, forest.clone());
        self.contracts.insert(chain, contract);

        let reader: Arc<dyn TreeReader> = Arc::new(ForestReader::new(forest));
        for wallet in self.wallets.values_mut() {
            wallet.attach_chain(chain, reader.clone());
        }

        tracing::info!(%chain, deployment_block, "network loaded");
        self.sync_chain(chain, deployment_block).await
    }

    /// Pull new events from the injected backfill and the contract adapter,
    /// ingest them, advance the checkpoint, then rescan loaded wallets.
    pub async fn scan_history(&mut self, chain: Chain) -> EngineResult<()> {
        self.sync_chain(chain, 0).await
    }

    async fn sync_chain(&mut self, chain: Chain, deployment_block: u64) -> EngineResult<()> {
        let contract = self
            .contracts
            .get(&chain)
            .ok_or_else(|| EngineError::ChainNotLoaded(chain.key()))?
            .clone();

        let start_block = match self.get_last_synced_block(chain).await? {
            Some(block) => block + 1,
            None => deployment_block,
        };

        if let Some(quick_sync) = &self.quick_sync {
            let data = quick_sync.fetch(chain, start_block).await?;
            if !data.is_empty() {
                tracing::info!(%chain, start_block, "quick sync backfill ingested");
            }
            self.ingest(chain, data).await?;
        }

        let latest = contract.latest_block().await?;
        if latest >= start_block {
            let data = QuickSyncData {
                commitment_batches: contract.commitment_events(start_block, latest).await?,
                nullifiers: contract.nullifier_events(start_block, latest).await?,
                unshields: contract.unshield_events(start_block, latest).await?,
            };
            self.ingest(chain, data).await?;
            self.set_last_synced_block(latest, chain).await?;
        }

        for wallet in self.wallets.values() {
            wallet.scan_balances(chain, None).await?;
        }
        Ok(())
    }

    /// Feed normalized events into the forest and the store
    pub async fn ingest(&self, chain: Chain, data: QuickSyncData) -> EngineResult<()> {
        let forest = self.forest(chain)?;
        {
            let mut forest = forest.write().await;
            for batch in data.commitment_batches {
                forest.queue_leaves(batch.tree_number, batch.start_index, batch.commitments)?;
            }
            forest.update_trees().await?;
        }
        for event in &data.nullifiers {
            events::ingest_nullifiers(self.db.as_ref(), chain, event).await?;
        }
        for event in &data.unshields {
            events::ingest_unshield(self.db.as_ref(), chain, event).await?;
        }
        Ok(())
    }

    /// Create a wallet and register it with every loaded chain
    pub async fn create_wallet(
        &mut self,
        encryption_key: &[u8; 32],
        mnemonic: &str,
        index: u32,
    ) -> EngineResult<String> {
        let mut wallet = Wallet::create(self.db.clone(), encryption_key, mnemonic, index).await?;
        for (chain, forest) in &self.forests {
            let reader: Arc<dyn TreeReader> = Arc::new(ForestReader::new(forest.clone()));
            wallet.attach_chain(*chain, reader);
            let forest = forest.read().await;
            let tree = (forest.tree_count() - 1) as u32;
            let height = forest.next_index(tree);
            wallet.set_creation_info(*chain, tree, height).await?;
        }
        let id = wallet.id().to_string();
        self.wallets.insert(id.clone(), wallet);
        Ok(id)
    }

    /// Load an existing wallet by id, unlocking it with the encryption key
    pub async fn load_wallet(&mut self, encryption_key: &[u8; 32], id: &str) -> EngineResult<()> {
        let mut wallet = Wallet::load(self.db.clone(), encryption_key, id).await?;
        for (chain, forest) in &self.forests {
            let reader: Arc<dyn TreeReader> = Arc::new(ForestReader::new(forest.clone()));
            wallet.attach_chain(*chain, reader);
        }
        self.wallets.insert(id.to_string(), wallet);
        Ok(())
    }

    pub fn wallet(&self, id: &str) -> Option<&Wallet> {
        self.wallets.get(id)
    }

    /// Drop a wallet from memory; its persisted state stays
    pub fn unload_wallet(&mut self, id: &str) {
        self.wallets.remove(id);
    }

    /// Remove a wallet and everything it persisted
    pub async fn delete_wallet(&mut self, id: &str) -> EngineResult<()> {
        self.wallets.remove(id);
        Wallet::delete(self.db.as_ref(), id).await
    }

    pub fn forest(&self, chain: Chain) -> EngineResult<Arc<RwLock<MerkleForest>>> {
        self.forests
            .get(&chain)
            .cloned()
            .ok_or_else(|| EngineError::ChainNotLoaded(chain.key()))
    }

    pub fn tree_reader(&self, chain: Chain) -> EngineResult<Arc<dyn TreeReader>> {
        Ok(Arc::new(ForestReader::new(self.forest(chain)?)))
    }

    /// Persisted sync checkpoint; `None` when the chain has never synced
    pub async fn get_last_synced_block(&self, chain: Chain) -> EngineResult<Option<u64>> {
        let key = keyspace::last_synced_block(&chain.key());
        Ok(self.db.get(&key).await?.and_then(|bytes| {
            let raw: [u8; 8] = bytes.try_into().ok()?;
            Some(u64::from_be_bytes(raw))
        }))
    }

    pub async fn set_last_synced_block(&self, block: u64, chain: Chain) -> EngineResult<()> {
        self.db
            .put(
                &keyspace::last_synced_block(&chain.key()),
                &block.to_be_bytes(),
            )
            .await
    }
}
