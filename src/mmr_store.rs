//! 模块：内存指纹库 + MMR 审计日志
//!
//! **职责**: `FingerprintStore` 的参考实现。按 `Fingerprint::store_key()`
//! (`媒体类型:规范化方法:主哈希`) 存放核验记录；每次 upsert 都把记录的 blake3 摘要追加进一棵 Merkle Mountain Range，
//! 审计方拿到 Root 和某个位置的 Proof，就能确认该条记录从未被改写。
//!
//! 生产环境的持久化由外部协作方负责，这里只保证语义：
//! - upsert 幂等：同 key 覆盖，`first_verified_at` 取较早者
//! - 审计日志只追加，不修改

use async_trait::async_trait;
use ckb_merkle_mountain_range::{util::MemStore, Merge, MerkleProof, MMR};
use std::collections::HashMap;
use tokio::sync::Mutex;

use crate::evidence::{Fingerprint, VerificationRecord};
use crate::search::{FingerprintStore, StoreError};

/// 合并策略：父节点 = blake3(左 || 右)
///
/// 所有节点 (叶子和树枝) 都是 32 字节。Root 不变，根据抗碰撞性，
/// 下面每一片叶子就都没变；审计的全部安全性建立在这一步上。
pub struct MergeBlake3;

impl Merge for MergeBlake3 {
    type Item = [u8; 32];

    fn merge(lhs: &Self::Item, rhs: &Self::Item) -> ckb_merkle_mountain_range::Result<Self::Item> {
        let mut hasher = blake3::Hasher::new();
        hasher.update(lhs);
        hasher.update(rhs);
        Ok(*hasher.finalize().as_bytes())
    }
}

pub type AuditProof = MerkleProof<[u8; 32], MergeBlake3>;

/// 审计日志里的一条：叶子在 MMR 中的位置 + 叶子哈希
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuditEntry {
    pub pos: u64,
    pub leaf: [u8; 32],
}

#[derive(Default)]
struct AuditLog {
    /// **[⚠️ 持久化]**: `MemStore` 纯内存，进程退出即丢失。
    /// 落盘需要一个实现 `ckb_merkle_mountain_range::MMRStore` 的 KV 包装。
    store: MemStore<[u8; 32]>,

    /// MMR 节点总数 (不是叶子数)
    ///
    /// MMR 靠它做位运算定位山峰；每次打开 `MMR` 视图都必须传入最新值，
    /// 丢了它，store 里的哈希就没法解读。
    mmr_size: u64,

    entries: Vec<AuditEntry>,
}

impl AuditLog {
    fn append(&mut self, record: &VerificationRecord) -> anyhow::Result<AuditEntry> {
        // 结构体 → Value → bytes，对象键按字典序输出
        let payload = serde_json::to_vec(&serde_json::to_value(record)?)?;
        let leaf = *blake3::hash(&payload).as_bytes();

        // `MMR` 只是一个带写缓冲的视图：push 产生的新节点 (叶子 + 合并出的树枝)
        // 先留在缓冲里，commit 之后才写进 store。
        // 不 commit 的话 mmr_size 照样前进，但 store 里缺节点，
        // 后续的 get_root / gen_proof 会读到空洞。
        let mut mmr = MMR::<[u8; 32], MergeBlake3, _>::new(self.mmr_size, &self.store);
        let pos = mmr
            .push(leaf)
            .map_err(|e| anyhow::anyhow!("MMR append error: {}", e))?;
        // 先取 size 再 commit：commit 消费视图
        let mmr_size = mmr.mmr_size();
        mmr.commit()
            .map_err(|e| anyhow::anyhow!("MMR commit error: {}", e))?;

        self.mmr_size = mmr_size;
        let entry = AuditEntry { pos, leaf };
        self.entries.push(entry);
        Ok(entry)
    }

    fn root(&self) -> anyhow::Result<Option<[u8; 32]>> {
        if self.mmr_size == 0 {
            return Ok(None);
        }
        let mmr = MMR::<[u8; 32], MergeBlake3, _>::new(self.mmr_size, &self.store);
        mmr.get_root()
            .map(Some)
            .map_err(|e| anyhow::anyhow!("MMR get_root error: {}", e))
    }

    fn proof(&self, pos: u64) -> anyhow::Result<AuditProof> {
        let mmr = MMR::<[u8; 32], MergeBlake3, _>::new(self.mmr_size, &self.store);
        mmr.gen_proof(vec![pos])
            .map_err(|e| anyhow::anyhow!("MMR gen_proof error: {}", e))
    }
}

#[derive(Default)]
struct Inner {
    records: HashMap<String, VerificationRecord>,
    audit: AuditLog,
}

#[derive(Default)]
pub struct MemoryFingerprintStore {
    inner: Mutex<Inner>,
}

impl MemoryFingerprintStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.inner.lock().await.records.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// 目前的 MMR Root；还没有任何记录时为 `None`
    pub async fn audit_root(&self) -> Result<Option<[u8; 32]>, StoreError> {
        let inner = self.inner.lock().await;
        inner.audit.root().map_err(|e| StoreError::Backend(e.to_string()))
    }

    /// 按追加顺序列出审计条目
    pub async fn audit_entries(&self) -> Vec<AuditEntry> {
        self.inner.lock().await.audit.entries.clone()
    }

    pub async fn audit_proof(&self, pos: u64) -> Result<AuditProof, StoreError> {
        let inner = self.inner.lock().await;
        if !inner.audit.entries.iter().any(|e| e.pos == pos) {
            return Err(StoreError::Backend(format!("no audit leaf at position {}", pos)));
        }
        inner.audit.proof(pos).map_err(|e| StoreError::Backend(e.to_string()))
    }
}

/// 审计方用 Root + Proof 独立校验某条叶子
pub fn verify_audit_proof(root: [u8; 32], entry: AuditEntry, proof: AuditProof) -> bool {
    proof.verify(root, vec![(entry.pos, entry.leaf)]).unwrap_or(false)
}

#[async_trait]
impl FingerprintStore for MemoryFingerprintStore {
    async fn lookup(&self, fingerprint: &Fingerprint) -> Result<Option<VerificationRecord>, StoreError> {
        let inner = self.inner.lock().await;
        Ok(inner.records.get(&fingerprint.store_key()).cloned())
    }

    async fn upsert(&self, mut record: VerificationRecord) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().await;

        if let Some(existing) = inner.records.get(&record.fingerprint_key) {
            record.first_verified_at = record.first_verified_at.min(existing.first_verified_at);
        }

        let entry = inner
            .audit
            .append(&record)
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        tracing::debug!(key = %record.fingerprint_key, pos = entry.pos, "记录写入审计日志");

        inner.records.insert(record.fingerprint_key.clone(), record);
        Ok(())
    }
}
