//! Poseidon commitment Merkle forest
//!
//! Mirrors the pool's on-chain commitment tree per chain: an ordered sequence
//! of append-only trees of depth 16, hashed with `Poseidon(left, right)` and
//! zero-valued empty leaves. Leaves arrive out of order from event ingestion,
//! so insertion is queued: `queue_leaves` buffers, `update_trees` flushes the
//! contiguous prefix, recomputes affected nodes bottom-up, and asks the
//! injected root validator to accept the new root before anything persists.
//! A rejected root rolls the whole batch back.
//!
//! Nodes are immutable once written; a full tree seals and the forest
//! continues in a fresh tree.

use ark_bn254::Fr;
use ark_ff::Zero;
use async_trait::async_trait;
use borsh::{BorshDeserialize, BorshSerialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, OnceLock};
use tokio::sync::RwLock;

use crate::bytes::{fr_from_bytes, fr_to_bytes};
use crate::chain::Chain;
use crate::database::{keyspace, BatchOp, Database};
use crate::error::{EngineError, EngineResult};
use crate::events::StoredCommitment;
use crate::poseidon::hash_left_right;

/// Depth of each tree in the forest
pub const TREE_DEPTH: usize = 16;

/// Leaves per tree before rollover
pub const TREE_MAX_LEAVES: u64 = 1 << TREE_DEPTH;

/// Roots of empty subtrees, one per level
fn zero_hashes() -> &'static [Fr; TREE_DEPTH + 1] {
    static ZEROS: OnceLock<[Fr; TREE_DEPTH + 1]> = OnceLock::new();
    ZEROS.get_or_init(|| {
        let mut zeros = [Fr::zero(); TREE_DEPTH + 1];
        for level in 1..=TREE_DEPTH {
            zeros[level] = hash_left_right(zeros[level - 1], zeros[level - 1]);
        }
        zeros
    })
}

/// Accepts or rejects a freshly computed root, usually against the contract
#[async_trait]
pub trait RootValidator: Send + Sync {
    async fn validate_root(&self, tree: u32, root: Fr) -> EngineResult<bool>;
}

/// Validator that accepts every root; for tests and trusted backfills
pub struct AcceptAllRootValidator;

#[async_trait]
impl RootValidator for AcceptAllRootValidator {
    async fn validate_root(&self, _tree: u32, _root: Fr) -> EngineResult<bool> {
        Ok(true)
    }
}

/// Inclusion proof for one leaf
#[derive(Clone, Debug)]
pub struct MerkleProof {
    pub leaf: Fr,
    /// Sibling per level, leaf upward
    pub elements: Vec<Fr>,
    /// Bit `l` set means the path node at level `l` is a right child
    pub indices: u64,
    pub root: Fr,
}

impl MerkleProof {
    /// Recompute the root from the leaf and path
    pub fn verify(&self) -> bool {
        let mut current = self.leaf;
        for (level, sibling) in self.elements.iter().enumerate() {
            current = if (self.indices >> level) & 1 == 1 {
                hash_left_right(*sibling, current)
            } else {
                hash_left_right(current, *sibling)
            };
        }
        current == self.root
    }
}

#[derive(BorshSerialize, BorshDeserialize)]
struct TreeMeta {
    next_index: u64,
    root: [u8; 32],
    historical_roots: Vec<[u8; 32]>,
}

struct TreeState {
    next_index: u64,
    root: Fr,
    nodes: HashMap<(u8, u64), Fr>,
    historical_roots: HashSet<[u8; 32]>,
}

impl TreeState {
    fn empty() -> Self {
        Self {
            next_index: 0,
            root: zero_hashes()[TREE_DEPTH],
            nodes: HashMap::new(),
            historical_roots: HashSet::new(),
        }
    }

    fn node(&self, level: u8, index: u64) -> Fr {
        self.nodes
            .get(&(level, index))
            .copied()
            .unwrap_or(zero_hashes()[level as usize])
    }

    /// Node keys a write of `count` leaves at `start` touches
    fn affected_keys(start: u64, count: u64) -> Vec<(u8, u64)> {
        let mut keys = Vec::new();
        let mut lo = start;
        let mut hi = start + count - 1;
        for idx in lo..=hi {
            keys.push((0, idx));
        }
        for level in 1..=TREE_DEPTH as u8 {
            lo /= 2;
            hi /= 2;
            for idx in lo..=hi {
                keys.push((level, idx));
            }
        }
        keys
    }

    /// Write leaves and recompute internal nodes bottom-up
    fn apply(&mut self, start: u64, hashes: &[Fr]) {
        for (i, hash) in hashes.iter().enumerate() {
            self.nodes.insert((0, start + i as u64), *hash);
        }
        let mut lo = start;
        let mut hi = start + hashes.len() as u64 - 1;
        for level in 1..=TREE_DEPTH as u8 {
            lo /= 2;
            hi /= 2;
            for idx in lo..=hi {
                let left = self.node(level - 1, 2 * idx);
                let right = self.node(level - 1, 2 * idx + 1);
                self.nodes.insert((level, idx), hash_left_right(left, right));
            }
        }
        self.next_index = start + hashes.len() as u64;
        self.root = self.node(TREE_DEPTH as u8, 0);
    }
}

/// The per-chain commitment forest
pub struct MerkleForest {
    chain: Chain,
    db: Arc<dyn Database>,
    validator: Arc<dyn RootValidator>,
    trees: Vec<TreeState>,
    pending: HashMap<u32, BTreeMap<u64, StoredCommitment>>,
}

impl MerkleForest {
    pub fn new(chain: Chain, db: Arc<dyn Database>, validator: Arc<dyn RootValidator>) -> Self {
        Self {
            chain,
            db,
            validator,
            trees: vec![TreeState::empty()],
            pending: HashMap::new(),
        }
    }

    /// Resume a forest from its persisted nodes and meta
    pub async fn load(
        chain: Chain,
        db: Arc<dyn Database>,
        validator: Arc<dyn RootValidator>,
    ) -> EngineResult<Self> {
        let mut forest = Self::new(chain, db.clone(), validator);
        let prefix = keyspace::merkle_chain_prefix(&chain.key());
        let pairs = db.scan_prefix(&prefix).await?;

        for (key, value) in pairs {
            let Ok(key_str) = std::str::from_utf8(&key) else {
                continue;
            };
            let segments: Vec<&str> = key_str.split('/').collect();
            // merkle/<chain>/<tree>/meta | merkle/<chain>/<tree>/node/<level>/<index>
            let Some(tree) = segments
                .get(2)
                .and_then(|s| u32::from_str_radix(s, 16).ok())
            else {
                continue;
            };
            forest.ensure_tree(tree);
            match segments.get(3) {
                Some(&"meta") => {
                    let meta = TreeMeta::try_from_slice(&value)
                        .map_err(|e| EngineError::StoreIo(format!("corrupt tree meta: {e}")))?;
                    let state = &mut forest.trees[tree as usize];
                    state.next_index = meta.next_index;
                    state.root = fr_from_bytes(&meta.root);
                    state.historical_roots = meta.historical_roots.into_iter().collect();
                }
                Some(&"node") => {
                    let (Some(level), Some(index)) = (
                        segments.get(4).and_then(|s| u8::from_str_radix(s, 16).ok()),
                        segments.get(5).and_then(|s| u64::from_str_radix(s, 16).ok()),
                    ) else {
                        continue;
                    };
                    if value.len() == 32 {
                        let mut bytes = [0u8; 32];
                        bytes.copy_from_slice(&value);
                        forest.trees[tree as usize]
                            .nodes
                            .insert((level, index), fr_from_bytes(&bytes));
                    }
                }
                _ => {}
            }
        }
        Ok(forest)
    }

    pub fn chain(&self) -> Chain {
        self.chain
    }

    pub fn tree_count(&self) -> usize {
        self.trees.len()
    }

    pub fn next_index(&self, tree: u32) -> u64 {
        self.trees
            .get(tree as usize)
            .map(|t| t.next_index)
            .unwrap_or(0)
    }

    pub fn root(&self, tree: u32) -> Fr {
        self.trees
            .get(tree as usize)
            .map(|t| t.root)
            .unwrap_or(zero_hashes()[TREE_DEPTH])
    }

    pub fn has_historical_root(&self, tree: u32, root: &[u8; 32]) -> bool {
        self.trees
            .get(tree as usize)
            .map(|t| t.historical_roots.contains(root))
            .unwrap_or(false)
    }

    fn ensure_tree(&mut self, tree: u32) {
        while self.trees.len() <= tree as usize {
            self.trees.push(TreeState::empty());
        }
    }

    fn pending_len(&self, tree: u32) -> u64 {
        self.pending.get(&tree).map(|p| p.len() as u64).unwrap_or(0)
    }

    /// Buffer leaves for later flushing. Leaves below the tree's `next_index`
    /// are dropped silently (rescans are idempotent); a re-queued index must
    /// match the buffered record byte-for-byte.
    pub fn queue_leaves(
        &mut self,
        tree: u32,
        start_index: u64,
        commitments: Vec<StoredCommitment>,
    ) -> EngineResult<()> {
        self.ensure_tree(tree);
        let next_index = self.trees[tree as usize].next_index;
        let queue = self.pending.entry(tree).or_default();

        for (offset, commitment) in commitments.into_iter().enumerate() {
            if commitment.hash == [0u8; 32] {
                return Err(EngineError::InvalidNoteData(
                    "zero commitment hash rejected".into(),
                ));
            }
            let index = start_index + offset as u64;
            if index < next_index {
                continue;
            }
            if let Some(existing) = queue.get(&index) {
                if existing != &commitment {
                    return Err(EngineError::ConflictingLeaf { tree, index });
                }
                continue;
            }
            queue.insert(index, commitment);
        }
        Ok(())
    }

    /// Flush every tree whose queued leaves close a contiguous prefix at its
    /// `next_index`. Each flushed batch validates its root before persisting;
    /// rejection rolls the batch back and discards the tree's queue.
    pub async fn update_trees(&mut self) -> EngineResult<()> {
        let mut tree_numbers: Vec<u32> = self.pending.keys().copied().collect();
        tree_numbers.sort_unstable();
        for tree in tree_numbers {
            self.flush_tree(tree).await?;
        }
        Ok(())
    }

    async fn flush_tree(&mut self, tree: u32) -> EngineResult<()> {
        loop {
            let next_index = self.trees[tree as usize].next_index;
            let Some(queue) = self.pending.get_mut(&tree) else {
                return Ok(());
            };

            let stale: Vec<u64> = queue.range(..next_index).map(|(k, _)| *k).collect();
            for index in stale {
                queue.remove(&index);
            }

            let capacity_left = TREE_MAX_LEAVES - next_index;
            let mut run = Vec::new();
            let mut cursor = next_index;
            while (run.len() as u64) < capacity_left {
                match queue.get(&cursor) {
                    Some(commitment) => run.push(commitment.clone()),
                    None => break,
                }
                cursor += 1;
            }
            if run.is_empty() {
                if queue.is_empty() {
                    self.pending.remove(&tree);
                }
                return Ok(());
            }

            self.write_batch(tree, next_index, &run).await?;

            let queue = self.pending.entry(tree).or_default();
            for index in next_index..next_index + run.len() as u64 {
                queue.remove(&index);
            }
        }
    }

    async fn write_batch(
        &mut self,
        tree: u32,
        start: u64,
        run: &[StoredCommitment],
    ) -> EngineResult<()> {
        let hashes: Vec<Fr> = run.iter().map(|c| fr_from_bytes(&c.hash)).collect();

        // Snapshot everything this write touches so a rejected root can be
        // rolled back without a store round-trip.
        let affected = TreeState::affected_keys(start, run.len() as u64);
        let state = &mut self.trees[tree as usize];
        let old_nodes: Vec<((u8, u64), Option<Fr>)> = affected
            .iter()
            .map(|key| (*key, state.nodes.get(key).copied()))
            .collect();
        let old_root = state.root;
        let old_next = state.next_index;

        state.apply(start, &hashes);
        let new_root = state.root;

        if !self.validator.validate_root(tree, new_root).await? {
            let state = &mut self.trees[tree as usize];
            for (key, value) in old_nodes {
                match value {
                    Some(v) => state.nodes.insert(key, v),
                    None => state.nodes.remove(&key),
                };
            }
            state.root = old_root;
            state.next_index = old_next;
            self.pending.remove(&tree);
            tracing::warn!(tree, start, count = run.len(), "merkle root rejected, batch rolled back");
            return Err(EngineError::RootValidationFailed { tree });
        }

        let state = &mut self.trees[tree as usize];
        state.historical_roots.insert(fr_to_bytes(&new_root));

        // Leaves, internal nodes, commitments, and meta flush in one batch so
        // the persisted root always matches the persisted nodes.
        let chain_key = self.chain.key();
        let mut ops: Vec<BatchOp> = affected
            .iter()
            .map(|(level, index)| BatchOp::Put {
                key: keyspace::merkle_node(&chain_key, tree, *level, *index),
                value: fr_to_bytes(&state.node(*level, *index)).to_vec(),
            })
            .collect();
        for (offset, commitment) in run.iter().enumerate() {
            ops.push(BatchOp::Put {
                key: keyspace::merkle_commitment(&chain_key, tree, start + offset as u64),
                value: borsh::to_vec(commitment).expect("borsh encoding of commitment record"),
            });
        }
        let meta = TreeMeta {
            next_index: state.next_index,
            root: fr_to_bytes(&state.root),
            historical_roots: state.historical_roots.iter().copied().collect(),
        };
        ops.push(BatchOp::Put {
            key: keyspace::merkle_meta(&chain_key, tree),
            value: borsh::to_vec(&meta).expect("borsh encoding of tree meta"),
        });
        self.db.batch(ops).await?;

        tracing::debug!(tree, start, count = run.len(), "merkle batch committed");
        Ok(())
    }

    /// Append at the forest's growing edge, sealing full trees and rolling
    /// over into the next tree as needed.
    pub async fn append_leaves(&mut self, commitments: Vec<StoredCommitment>) -> EngineResult<()> {
        let mut tree = (self.trees.len() - 1) as u32;
        let mut position = self.trees[tree as usize].next_index + self.pending_len(tree);

        let mut remaining = commitments;
        while !remaining.is_empty() {
            if position >= TREE_MAX_LEAVES {
                tree += 1;
                self.ensure_tree(tree);
                position = self.trees[tree as usize].next_index + self.pending_len(tree);
                continue;
            }
            let space = (TREE_MAX_LEAVES - position) as usize;
            let take = remaining.len().min(space);
            let chunk: Vec<StoredCommitment> = remaining.drain(..take).collect();
            self.queue_leaves(tree, position, chunk)?;
            position += take as u64;
        }
        self.update_trees().await
    }

    /// Inclusion proof for a committed leaf
    pub fn get_proof(&self, tree: u32, index: u64) -> EngineResult<MerkleProof> {
        let state = self
            .trees
            .get(tree as usize)
            .filter(|t| index < t.next_index)
            .ok_or(EngineError::LeafNotPresent { tree, index })?;

        let elements = (0..TREE_DEPTH as u8)
            .map(|level| state.node(level, (index >> level) ^ 1))
            .collect();
        Ok(MerkleProof {
            leaf: state.node(0, index),
            elements,
            indices: index,
            root: state.root,
        })
    }

    /// Read back a committed leaf's stored record
    pub async fn stored_commitment(
        &self,
        tree: u32,
        index: u64,
    ) -> EngineResult<Option<StoredCommitment>> {
        let key = keyspace::merkle_commitment(&self.chain.key(), tree, index);
        match self.db.get(&key).await? {
            Some(bytes) => Ok(StoredCommitment::try_from_slice(&bytes).ok()),
            None => Ok(None),
        }
    }
}

/// Narrow read capability wallets hold on the forest
#[async_trait]
pub trait TreeReader: Send + Sync {
    async fn tree_count(&self) -> usize;
    async fn next_index(&self, tree: u32) -> u64;
    async fn commitment(&self, tree: u32, index: u64) -> EngineResult<Option<StoredCommitment>>;
    async fn proof(&self, tree: u32, index: u64) -> EngineResult<MerkleProof>;
}

/// Shared-forest implementation of [`TreeReader`]
#[derive(Clone)]
pub struct ForestReader {
    forest: Arc<RwLock<MerkleForest>>,
}

impl ForestReader {
    pub fn new(forest: Arc<RwLock<MerkleForest>>) -> Self {
        Self { forest }
    }
}

#[async_trait]
impl TreeReader for ForestReader {
    async fn tree_count(&self) -> usize {
        self.forest.read().await.tree_count()
    }

    async fn next_index(&self, tree: u32) -> u64 {
        self.forest.read().await.next_index(tree)
    }

    async fn commitment(&self, tree: u32, index: u64) -> EngineResult<Option<StoredCommitment>> {
        self.forest.read().await.stored_commitment(tree, index).await
    }

    async fn proof(&self, tree: u32, index: u64) -> EngineResult<MerkleProof> {
        self.forest.read().await.get_proof(tree, index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::MemoryDatabase;
    use crate::events::CommitmentCiphertext;

    fn commitment(byte: u8) -> StoredCommitment {
        StoredCommitment {
            hash: {
                let mut h = [0u8; 32];
                h[31] = byte;
                h
            },
            ciphertext: CommitmentCiphertext::Transact {
                ephemeral_pub: [0u8; 32],
                ciphertext: vec![byte],
                sender_ciphertext: Vec::new(),
                annotation: Vec::new(),
            },
            txid: [byte; 32],
            block_number: byte as u64,
        }
    }

    fn forest() -> MerkleForest {
        MerkleForest::new(
            Chain::evm(1),
            Arc::new(MemoryDatabase::new()),
            Arc::new(AcceptAllRootValidator),
        )
    }

    struct RejectAll;
    #[async_trait]
    impl RootValidator for RejectAll {
        async fn validate_root(&self, _tree: u32, _root: Fr) -> EngineResult<bool> {
            Ok(false)
        }
    }

    #[tokio::test]
    async fn test_queue_and_update_commits_prefix() {
        let mut forest = forest();
        forest
            .queue_leaves(0, 0, vec![commitment(1), commitment(2)])
            .unwrap();
        forest.update_trees().await.unwrap();
        assert_eq!(forest.next_index(0), 2);
    }

    #[tokio::test]
    async fn test_gap_is_buffered_until_prefix_closes() {
        let mut forest = forest();
        forest.queue_leaves(0, 2, vec![commitment(3)]).unwrap();
        forest.update_trees().await.unwrap();
        assert_eq!(forest.next_index(0), 0);

        forest
            .queue_leaves(0, 0, vec![commitment(1), commitment(2)])
            .unwrap();
        forest.update_trees().await.unwrap();
        assert_eq!(forest.next_index(0), 3);
    }

    #[tokio::test]
    async fn test_stale_leaves_dropped_silently() {
        let mut forest = forest();
        forest.queue_leaves(0, 0, vec![commitment(1)]).unwrap();
        forest.update_trees().await.unwrap();

        // Rescan delivers the same leaf again.
        forest.queue_leaves(0, 0, vec![commitment(9)]).unwrap();
        forest.update_trees().await.unwrap();
        assert_eq!(forest.next_index(0), 1);
        let proof = forest.get_proof(0, 0).unwrap();
        assert_eq!(proof.leaf, fr_from_bytes(&commitment(1).hash));
    }

    #[tokio::test]
    async fn test_conflicting_queued_leaf_rejected() {
        let mut forest = forest();
        forest.queue_leaves(0, 5, vec![commitment(1)]).unwrap();
        let err = forest.queue_leaves(0, 5, vec![commitment(2)]).unwrap_err();
        assert!(matches!(
            err,
            EngineError::ConflictingLeaf { tree: 0, index: 5 }
        ));
        // Identical duplicate is fine.
        forest.queue_leaves(0, 5, vec![commitment(1)]).unwrap();
    }

    #[tokio::test]
    async fn test_zero_commitment_rejected() {
        let mut forest = forest();
        let mut zero = commitment(1);
        zero.hash = [0u8; 32];
        assert!(forest.queue_leaves(0, 0, vec![zero]).is_err());
    }

    #[tokio::test]
    async fn test_proof_verifies_and_missing_leaf_errors() {
        let mut forest = forest();
        let leaves: Vec<StoredCommitment> = (1..=5).map(commitment).collect();
        forest.queue_leaves(0, 0, leaves).unwrap();
        forest.update_trees().await.unwrap();

        for index in 0..5 {
            let proof = forest.get_proof(0, index).unwrap();
            assert!(proof.verify(), "proof at index {index} failed");
            assert_eq!(proof.root, forest.root(0));
        }
        assert!(matches!(
            forest.get_proof(0, 5),
            Err(EngineError::LeafNotPresent { tree: 0, index: 5 })
        ));
    }

    #[tokio::test]
    async fn test_root_rejection_rolls_back() {
        let mut forest = MerkleForest::new(
            Chain::evm(1),
            Arc::new(MemoryDatabase::new()),
            Arc::new(RejectAll),
        );
        forest
            .queue_leaves(0, 0, vec![commitment(1), commitment(2)])
            .unwrap();
        let err = forest.update_trees().await.unwrap_err();
        assert!(matches!(err, EngineError::RootValidationFailed { tree: 0 }));

        assert_eq!(forest.next_index(0), 0);
        assert!(matches!(
            forest.get_proof(0, 0),
            Err(EngineError::LeafNotPresent { .. })
        ));
        assert_eq!(forest.root(0), zero_hashes()[TREE_DEPTH]);
    }

    #[tokio::test]
    async fn test_historical_roots_accumulate() {
        let mut forest = forest();
        forest.queue_leaves(0, 0, vec![commitment(1)]).unwrap();
        forest.update_trees().await.unwrap();
        let first_root = fr_to_bytes(&forest.root(0));

        forest.queue_leaves(0, 1, vec![commitment(2)]).unwrap();
        forest.update_trees().await.unwrap();
        let second_root = fr_to_bytes(&forest.root(0));

        assert!(forest.has_historical_root(0, &first_root));
        assert!(forest.has_historical_root(0, &second_root));
        assert_ne!(first_root, second_root);
    }

    #[tokio::test]
    async fn test_persistence_roundtrip() {
        let db = Arc::new(MemoryDatabase::new());
        let chain = Chain::evm(1);
        let root_before;
        {
            let mut forest =
                MerkleForest::new(chain, db.clone(), Arc::new(AcceptAllRootValidator));
            forest
                .queue_leaves(0, 0, (1..=4).map(commitment).collect())
                .unwrap();
            forest.update_trees().await.unwrap();
            root_before = forest.root(0);
        }

        let forest = MerkleForest::load(chain, db, Arc::new(AcceptAllRootValidator))
            .await
            .unwrap();
        assert_eq!(forest.next_index(0), 4);
        assert_eq!(forest.root(0), root_before);
        let proof = forest.get_proof(0, 2).unwrap();
        assert!(proof.verify());
        let stored = forest.stored_commitment(0, 2).await.unwrap().unwrap();
        assert_eq!(stored, commitment(3));
    }

    #[tokio::test]
    async fn test_rollover_at_capacity() {
        let mut forest = forest();
        // Fast-forward the first tree to one leaf short of capacity.
        {
            let state = &mut forest.trees[0];
            state.next_index = TREE_MAX_LEAVES - 1;
        }
        forest
            .append_leaves(vec![commitment(1), commitment(2), commitment(3)])
            .await
            .unwrap();

        assert_eq!(forest.tree_count(), 2);
        assert_eq!(forest.next_index(0), TREE_MAX_LEAVES);
        assert_eq!(forest.next_index(1), 2);
        assert!(forest.get_proof(1, 1).unwrap().verify());
    }
}
