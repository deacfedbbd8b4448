//! Key-value store capability
//!
//! The engine owns its store exclusively for its lifetime and reaches it only
//! through the [`Database`] trait, so hosts can plug in any disk-backed
//! implementation. Writes that must stay consistent (tree leaves, nodes, and
//! meta) always go through `batch`. [`MemoryDatabase`] ships with the crate
//! for tests and ephemeral hosts.

use async_trait::async_trait;
use std::collections::BTreeMap;
use tokio::sync::RwLock;

use crate::error::EngineResult;

/// One operation inside an atomic batch
#[derive(Clone, Debug)]
pub enum BatchOp {
    Put { key: Vec<u8>, value: Vec<u8> },
    Del { key: Vec<u8> },
}

/// External key-value store
#[async_trait]
pub trait Database: Send + Sync {
    async fn get(&self, key: &[u8]) -> EngineResult<Option<Vec<u8>>>;
    async fn put(&self, key: &[u8], value: &[u8]) -> EngineResult<()>;
    async fn del(&self, key: &[u8]) -> EngineResult<()>;
    /// Apply all operations atomically, fsync'd before returning
    async fn batch(&self, ops: Vec<BatchOp>) -> EngineResult<()>;
    /// All `(key, value)` pairs under a prefix, in key order
    async fn scan_prefix(&self, prefix: &[u8]) -> EngineResult<Vec<(Vec<u8>, Vec<u8>)>>;
}

/// In-memory store backed by an ordered map
#[derive(Default)]
pub struct MemoryDatabase {
    inner: RwLock<BTreeMap<Vec<u8>, Vec<u8>>>,
}

impl MemoryDatabase {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Database for MemoryDatabase {
    async fn get(&self, key: &[u8]) -> EngineResult<Option<Vec<u8>>> {
        Ok(self.inner.read().await.get(key).cloned())
    }

    async fn put(&self, key: &[u8], value: &[u8]) -> EngineResult<()> {
        self.inner.write().await.insert(key.to_vec(), value.to_vec());
        Ok(())
    }

    async fn del(&self, key: &[u8]) -> EngineResult<()> {
        self.inner.write().await.remove(key);
        Ok(())
    }

    async fn batch(&self, ops: Vec<BatchOp>) -> EngineResult<()> {
        let mut map = self.inner.write().await;
        for op in ops {
            match op {
                BatchOp::Put { key, value } => {
                    map.insert(key, value);
                }
                BatchOp::Del { key } => {
                    map.remove(&key);
                }
            }
        }
        Ok(())
    }

    async fn scan_prefix(&self, prefix: &[u8]) -> EngineResult<Vec<(Vec<u8>, Vec<u8>)>> {
        let map = self.inner.read().await;
        Ok(map
            .range(prefix.to_vec()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }
}

/// Namespaced key builders for everything the engine persists
pub mod keyspace {
    pub fn merkle_node(chain_key: &str, tree: u32, level: u8, index: u64) -> Vec<u8> {
        format!("merkle/{chain_key}/{tree:04x}/node/{level:02x}/{index:08x}").into_bytes()
    }

    pub fn merkle_meta(chain_key: &str, tree: u32) -> Vec<u8> {
        format!("merkle/{chain_key}/{tree:04x}/meta").into_bytes()
    }

    pub fn merkle_commitment(chain_key: &str, tree: u32, index: u64) -> Vec<u8> {
        format!("merkle/{chain_key}/{tree:04x}/commitment/{index:08x}").into_bytes()
    }

    pub fn merkle_chain_prefix(chain_key: &str) -> Vec<u8> {
        format!("merkle/{chain_key}/").into_bytes()
    }

    pub fn wallet_meta(wallet_id: &str) -> Vec<u8> {
        format!("wallet/{wallet_id}/meta").into_bytes()
    }

    pub fn wallet_details(wallet_id: &str, chain_key: &str) -> Vec<u8> {
        format!("wallet/{wallet_id}/details/{chain_key}").into_bytes()
    }

    pub fn wallet_txo(wallet_id: &str, chain_key: &str, tree: u32, index: u64) -> Vec<u8> {
        format!("wallet/{wallet_id}/txo/{chain_key}/{tree:04x}/{index:08x}").into_bytes()
    }

    pub fn wallet_txo_prefix(wallet_id: &str, chain_key: &str) -> Vec<u8> {
        format!("wallet/{wallet_id}/txo/{chain_key}/").into_bytes()
    }

    pub fn wallet_sent(wallet_id: &str, chain_key: &str, tree: u32, index: u64) -> Vec<u8> {
        format!("wallet/{wallet_id}/sent/{chain_key}/{tree:04x}/{index:08x}").into_bytes()
    }

    pub fn wallet_sent_prefix(wallet_id: &str, chain_key: &str) -> Vec<u8> {
        format!("wallet/{wallet_id}/sent/{chain_key}/").into_bytes()
    }

    pub fn last_synced_block(chain_key: &str) -> Vec<u8> {
        format!("engine/lastSyncedBlock/{chain_key}").into_bytes()
    }

    pub fn nullifier(chain_key: &str, nullifier_hex: &str) -> Vec<u8> {
        format!("nullifiers/{chain_key}/{nullifier_hex}").into_bytes()
    }

    pub fn unshield(chain_key: &str, txid_hex: &str, token_hash_hex: &str) -> Vec<u8> {
        format!("unshields/{chain_key}/{txid_hex}/{token_hash_hex}").into_bytes()
    }

    pub fn unshield_prefix(chain_key: &str) -> Vec<u8> {
        format!("unshields/{chain_key}/").into_bytes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_get_put_del() {
        let db = MemoryDatabase::new();
        assert!(db.get(b"a").await.unwrap().is_none());
        db.put(b"a", b"1").await.unwrap();
        assert_eq!(db.get(b"a").await.unwrap(), Some(b"1".to_vec()));
        db.del(b"a").await.unwrap();
        assert!(db.get(b"a").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_scan_prefix_ordered() {
        let db = MemoryDatabase::new();
        db.put(b"x/2", b"b").await.unwrap();
        db.put(b"x/1", b"a").await.unwrap();
        db.put(b"y/1", b"c").await.unwrap();

        let pairs = db.scan_prefix(b"x/").await.unwrap();
        assert_eq!(pairs.len(), 2);
        assert_eq!(pairs[0].0, b"x/1".to_vec());
        assert_eq!(pairs[1].0, b"x/2".to_vec());
    }

    #[tokio::test]
    async fn test_batch_applies_all() {
        let db = MemoryDatabase::new();
        db.put(b"gone", b"x").await.unwrap();
        db.batch(vec![
            BatchOp::Put {
                key: b"k1".to_vec(),
                value: b"v1".to_vec(),
            },
            BatchOp::Del {
                key: b"gone".to_vec(),
            },
        ])
        .await
        .unwrap();
        assert_eq!(db.get(b"k1").await.unwrap(), Some(b"v1".to_vec()));
        assert!(db.get(b"gone").await.unwrap().is_none());
    }
}
