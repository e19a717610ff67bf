//! 模块：混合检索编排 (Hybrid Search Orchestrator)
//!
//! **职责**: 内部指纹库永远先查；是否继续查外部反向图片引擎、查哪几家，
//! 由订阅档位决定。
//!
//! | tier | 触发外部检索的条件 |
//! |---|---|
//! | free | `always_search_external && !internal_found` |
//! | pro | `always_search_external \|\| !internal_found` |
//! | enterprise | 总是 |
//!
//! free 档的条件比 pro 更严格，这是有意的付费门槛，保持原样。
//!
//! 反向图片检索只对图片、且上层给了可访问的 `asset_ref` 时才有意义；
//! 音视频或没有引用的图片记为 `not_applicable`，不算上游故障。
//!
//! 外部检索失败不会中断决策：错误被收成 `{error: "external_search_failed", message}`，
//! 推荐语照常生成。
//!
//! 外部检索的总预算是 `timeout × 引擎数`。单个引擎的超时由适配器自己负责，
//! 外层预算只兜底挂死的适配器，不能比“每个引擎都刚好按时返回”更紧。

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use crate::evidence::{
    Fingerprint, MediaKind, Recommendation, SearchEngine, SearchStrategyDecision, Tier,
    VerificationRecord,
};

// ==========================================
// 1. 协作方端口
// ==========================================

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Fingerprint store unavailable: {0}")]
    Unavailable(String),

    #[error("Fingerprint store error: {0}")]
    Backend(String),
}

/// 外部指纹库：按指纹做幂等的读 / upsert
#[async_trait]
pub trait FingerprintStore: Send + Sync {
    async fn lookup(&self, fingerprint: &Fingerprint) -> Result<Option<VerificationRecord>, StoreError>;
    async fn upsert(&self, record: VerificationRecord) -> Result<(), StoreError>;
}

#[derive(Debug, Error)]
pub enum SearchError {
    #[error("no image reference available for reverse search")]
    NoAssetReference,

    #[error("all engines failed: {0}")]
    AllEnginesFailed(String),

    #[error("search timed out after {0}s")]
    Timeout(u64),

    #[error("{0}")]
    Other(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchQuery {
    pub primary_hash: String,
    pub perceptual: Option<String>,
    /// 可公开访问的图片 URL 或路径，由上层提供
    pub asset_ref: Option<String>,
    pub engines: Vec<SearchEngine>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExternalMatch {
    pub title: Option<String>,
    pub link: String,
    pub source: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineResult {
    pub engine: SearchEngine,
    pub matches: Vec<ExternalMatch>,
    /// 单个引擎失败不影响其他引擎
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExternalSearchResults {
    pub engines: Vec<EngineResult>,
    pub total_external_matches: usize,
}

impl ExternalSearchResults {
    pub fn from_engines(engines: Vec<EngineResult>) -> Self {
        let total_external_matches = engines.iter().map(|e| e.matches.len()).sum();
        Self {
            engines,
            total_external_matches,
        }
    }
}

#[async_trait]
pub trait ExternalSearch: Send + Sync {
    async fn search(&self, query: &SearchQuery) -> Result<ExternalSearchResults, SearchError>;
}

// ==========================================
// 2. 编排结果
// ==========================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ExternalOutcome {
    /// 档位条件不满足
    Skipped,
    /// 档位允许，但没有配置外部检索适配器
    NotConfigured,
    /// 档位允许，但这份素材没法做反向图片检索 (非图片 / 没有 asset_ref)
    NotApplicable { reason: String },
    Completed(ExternalSearchResults),
    Failed { error: String, message: String },
}

impl ExternalOutcome {
    pub fn match_count(&self) -> usize {
        match self {
            ExternalOutcome::Completed(results) => results.total_external_matches,
            _ => 0,
        }
    }

    pub fn attempted(&self) -> bool {
        matches!(self, ExternalOutcome::Completed(_) | ExternalOutcome::Failed { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HybridSearchOutcome {
    pub internal: Option<VerificationRecord>,
    pub internal_error: Option<String>,
    pub external: ExternalOutcome,
    pub decision: SearchStrategyDecision,
}

impl HybridSearchOutcome {
    pub fn internal_found(&self) -> bool {
        self.internal.is_some()
    }
}

// ==========================================
// 3. 决策表 (纯函数)
// ==========================================

pub fn should_search_external(tier: Tier, always_search_external: bool, internal_found: bool) -> bool {
    match tier {
        Tier::Free => always_search_external && !internal_found,
        Tier::Pro => always_search_external || !internal_found,
        Tier::Enterprise => true,
    }
}

pub fn engines_for(tier: Tier) -> Vec<SearchEngine> {
    match tier {
        Tier::Free => vec![SearchEngine::GoogleLens],
        Tier::Pro => vec![
            SearchEngine::GoogleLens,
            SearchEngine::BingImages,
            SearchEngine::YandexImages,
        ],
        Tier::Enterprise => vec![
            SearchEngine::GoogleLens,
            SearchEngine::BingImages,
            SearchEngine::YandexImages,
            SearchEngine::TinEye,
        ],
    }
}

/// 先到先得：内部命中 > 外部命中 > 首次核验
pub fn recommend(internal_found: bool, external_matches: usize) -> Recommendation {
    if internal_found {
        Recommendation::PreviouslyVerified
    } else if external_matches > 0 {
        Recommendation::FoundOnline
    } else {
        Recommendation::AppearsOriginal
    }
}

/// 反向图片检索的前提不满足时给出原因
pub fn reverse_search_blocker(kind: MediaKind, asset_ref: Option<&str>) -> Option<&'static str> {
    if kind != MediaKind::Image {
        Some("reverse image search only applies to images")
    } else if asset_ref.map_or(true, |r| r.trim().is_empty()) {
        Some("no public asset reference for reverse image search")
    } else {
        None
    }
}

// ==========================================
// 4. 编排器
// ==========================================

pub struct HybridSearchOrchestrator {
    store: Arc<dyn FingerprintStore>,
    external: Option<Arc<dyn ExternalSearch>>,
    timeout: Duration,
}

impl HybridSearchOrchestrator {
    pub fn new(
        store: Arc<dyn FingerprintStore>,
        external: Option<Arc<dyn ExternalSearch>>,
        timeout: Duration,
    ) -> Self {
        Self {
            store,
            external,
            timeout,
        }
    }

    pub async fn decide(
        &self,
        fingerprint: &Fingerprint,
        tier: Tier,
        always_search_external: bool,
        asset_ref: Option<&str>,
    ) -> HybridSearchOutcome {
        // 内部检索必跑；库不可用时按“未命中”处理
        let (internal, internal_error) = match self.store.lookup(fingerprint).await {
            Ok(record) => (record, None),
            Err(e) => {
                tracing::warn!(error = %e, "内部指纹库查询失败，按未命中处理");
                (None, Some(e.to_string()))
            }
        };
        let internal_found = internal.is_some();

        let eligible = should_search_external(tier, always_search_external, internal_found);
        let engines = if eligible { engines_for(tier) } else { Vec::new() };
        let not_applicable = if eligible {
            reverse_search_blocker(fingerprint.media_kind, asset_ref)
        } else {
            None
        };

        let external = match (&self.external, eligible, not_applicable) {
            (_, false, _) => ExternalOutcome::Skipped,
            (_, true, Some(reason)) => {
                tracing::warn!(reason, "素材不适用反向图片检索，跳过外部检索");
                ExternalOutcome::NotApplicable {
                    reason: reason.to_string(),
                }
            }
            (None, true, None) => ExternalOutcome::NotConfigured,
            (Some(adapter), true, None) => {
                let query = SearchQuery {
                    primary_hash: fingerprint.primary_hash.clone(),
                    perceptual: fingerprint.perceptual.clone(),
                    asset_ref: asset_ref.map(str::to_string),
                    engines: engines.clone(),
                };
                self.run_external(adapter.as_ref(), &query).await
            }
        };

        let recommendation = recommend(internal_found, external.match_count());
        tracing::info!(
            ?tier,
            internal_found,
            external_searched = external.attempted(),
            external_matches = external.match_count(),
            "🔍 检索策略已决定"
        );

        HybridSearchOutcome {
            decision: SearchStrategyDecision {
                tier,
                internal_searched: true,
                external_searched: external.attempted(),
                engines: if external.attempted() { engines } else { Vec::new() },
                recommendation,
                recommendation_text: recommendation.as_str().to_string(),
            },
            internal,
            internal_error,
            external,
        }
    }

    /// 外部检索的总预算
    pub fn external_budget(&self, engines: usize) -> Duration {
        self.timeout * engines.max(1) as u32
    }

    async fn run_external(&self, adapter: &dyn ExternalSearch, query: &SearchQuery) -> ExternalOutcome {
        let budget = self.external_budget(query.engines.len());
        let result = match tokio::time::timeout(budget, adapter.search(query)).await {
            Ok(result) => result,
            Err(_) => Err(SearchError::Timeout(budget.as_secs())),
        };

        match result {
            Ok(results) => ExternalOutcome::Completed(results),
            Err(e) => {
                tracing::warn!(error = %e, "外部检索失败，继续决策");
                ExternalOutcome::Failed {
                    error: "external_search_failed".to_string(),
                    message: e.to_string(),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::evidence::DerivedMetadata;
    use chrono::Utc;

    struct FixedStore(Option<VerificationRecord>);

    #[async_trait]
    impl FingerprintStore for FixedStore {
        async fn lookup(&self, _fp: &Fingerprint) -> Result<Option<VerificationRecord>, StoreError> {
            Ok(self.0.clone())
        }
        async fn upsert(&self, _record: VerificationRecord) -> Result<(), StoreError> {
            Ok(())
        }
    }

    struct BrokenStore;

    #[async_trait]
    impl FingerprintStore for BrokenStore {
        async fn lookup(&self, _fp: &Fingerprint) -> Result<Option<VerificationRecord>, StoreError> {
            Err(StoreError::Unavailable("connection refused".into()))
        }
        async fn upsert(&self, _record: VerificationRecord) -> Result<(), StoreError> {
            Err(StoreError::Unavailable("connection refused".into()))
        }
    }

    /// 每个引擎返回 n 条匹配
    struct CannedSearch {
        per_engine: usize,
        fail: bool,
    }

    #[async_trait]
    impl ExternalSearch for CannedSearch {
        async fn search(&self, query: &SearchQuery) -> Result<ExternalSearchResults, SearchError> {
            if self.fail {
                return Err(SearchError::Other("quota exceeded".into()));
            }
            Ok(ExternalSearchResults::from_engines(
                query
                    .engines
                    .iter()
                    .map(|engine| EngineResult {
                        engine: *engine,
                        matches: (0..self.per_engine)
                            .map(|i| ExternalMatch {
                                title: None,
                                link: format!("https://example.com/{}", i),
                                source: None,
                            })
                            .collect(),
                        error: None,
                    })
                    .collect(),
            ))
        }
    }

    fn fingerprint() -> Fingerprint {
        Fingerprint {
            algorithm: "sha256+gradient_phash".into(),
            primary_hash: "ab".repeat(32),
            perceptual: Some("phash".into()),
            media_kind: MediaKind::Image,
            canonicalization: "raw_bytes".into(),
            perceptual_robust: true,
            metadata: DerivedMetadata::default(),
        }
    }

    fn record() -> VerificationRecord {
        VerificationRecord {
            fingerprint_key: fingerprint().store_key(),
            media_kind: MediaKind::Image,
            first_verified_at: Utc::now(),
            last_verified_at: Utc::now(),
            verification_count: 1,
            last_percentage: 72,
            captured_at: None,
        }
    }

    fn orchestrator(found: bool, search: Option<CannedSearch>) -> HybridSearchOrchestrator {
        HybridSearchOrchestrator::new(
            Arc::new(FixedStore(found.then(record))),
            search.map(|s| Arc::new(s) as Arc<dyn ExternalSearch>),
            Duration::from_secs(5),
        )
    }

    #[test]
    fn decision_table_holds_for_every_combination() {
        for internal_found in [false, true] {
            for always in [false, true] {
                assert_eq!(
                    should_search_external(Tier::Free, always, internal_found),
                    always && !internal_found
                );
                assert_eq!(
                    should_search_external(Tier::Pro, always, internal_found),
                    always || !internal_found
                );
                assert!(should_search_external(Tier::Enterprise, always, internal_found));
            }
        }
    }

    #[test]
    fn only_enterprise_gets_the_exhaustive_engine() {
        assert_eq!(engines_for(Tier::Free), vec![SearchEngine::GoogleLens]);
        assert!(!engines_for(Tier::Pro).contains(&SearchEngine::TinEye));
        assert!(engines_for(Tier::Enterprise).contains(&SearchEngine::TinEye));
    }

    #[test]
    fn recommendation_precedence() {
        assert_eq!(recommend(true, 4), Recommendation::PreviouslyVerified);
        assert_eq!(recommend(false, 4), Recommendation::FoundOnline);
        assert_eq!(recommend(false, 0), Recommendation::AppearsOriginal);
    }

    #[tokio::test]
    async fn free_tier_without_flag_stays_internal() {
        let outcome = orchestrator(false, Some(CannedSearch { per_engine: 2, fail: false }))
            .decide(&fingerprint(), Tier::Free, false, Some("https://cdn/x.jpg"))
            .await;
        assert!(outcome.decision.internal_searched);
        assert!(!outcome.decision.external_searched);
        assert_eq!(outcome.external, ExternalOutcome::Skipped);
        assert_eq!(outcome.decision.recommendation, Recommendation::AppearsOriginal);
    }

    #[tokio::test]
    async fn pro_tier_searches_when_not_found_internally() {
        let outcome = orchestrator(false, Some(CannedSearch { per_engine: 2, fail: false }))
            .decide(&fingerprint(), Tier::Pro, false, Some("https://cdn/x.jpg"))
            .await;
        assert!(outcome.decision.external_searched);
        assert_eq!(outcome.decision.engines.len(), 3);
        assert_eq!(outcome.external.match_count(), 6);
        assert_eq!(outcome.decision.recommendation, Recommendation::FoundOnline);
    }

    #[tokio::test]
    async fn internal_match_wins_over_external_matches() {
        let outcome = orchestrator(true, Some(CannedSearch { per_engine: 1, fail: false }))
            .decide(&fingerprint(), Tier::Enterprise, false, Some("https://cdn/x.jpg"))
            .await;
        assert!(outcome.internal_found());
        assert_eq!(outcome.external.match_count(), 4);
        assert_eq!(outcome.decision.recommendation, Recommendation::PreviouslyVerified);
    }

    #[tokio::test]
    async fn external_failure_is_captured_not_raised() {
        let outcome = orchestrator(false, Some(CannedSearch { per_engine: 0, fail: true }))
            .decide(&fingerprint(), Tier::Enterprise, true, Some("https://cdn/x.jpg"))
            .await;
        match &outcome.external {
            ExternalOutcome::Failed { error, message } => {
                assert_eq!(error, "external_search_failed");
                assert!(message.contains("quota"));
            }
            other => panic!("unexpected outcome: {:?}", other),
        }
        assert!(outcome.decision.external_searched);
        assert_eq!(outcome.decision.recommendation, Recommendation::AppearsOriginal);
        assert!(!outcome.decision.recommendation_text.is_empty());
    }

    #[tokio::test]
    async fn missing_adapter_is_not_configured() {
        let outcome = orchestrator(false, None)
            .decide(&fingerprint(), Tier::Enterprise, false, Some("https://cdn/x.jpg"))
            .await;
        assert_eq!(outcome.external, ExternalOutcome::NotConfigured);
        assert!(!outcome.decision.external_searched);
    }

    #[tokio::test]
    async fn broken_store_counts_as_not_found() {
        let orchestrator = HybridSearchOrchestrator::new(
            Arc::new(BrokenStore),
            None,
            Duration::from_secs(1),
        );
        let outcome = orchestrator
            .decide(&fingerprint(), Tier::Free, false, None)
            .await;
        assert!(!outcome.internal_found());
        assert!(outcome.internal_error.is_some());
        assert!(outcome.decision.internal_searched);
    }

    #[tokio::test]
    async fn audio_and_unreferenced_images_are_not_applicable() {
        let orchestrator = orchestrator(false, Some(CannedSearch { per_engine: 2, fail: false }));

        let mut audio = fingerprint();
        audio.media_kind = MediaKind::Audio;
        let outcome = orchestrator
            .decide(&audio, Tier::Enterprise, false, Some("https://cdn/x.mp3"))
            .await;
        assert!(matches!(outcome.external, ExternalOutcome::NotApplicable { .. }));
        assert!(!outcome.decision.external_searched);
        assert!(outcome.decision.engines.is_empty());

        let outcome = orchestrator
            .decide(&fingerprint(), Tier::Pro, false, None)
            .await;
        match &outcome.external {
            ExternalOutcome::NotApplicable { reason } => assert!(reason.contains("asset reference")),
            other => panic!("unexpected outcome: {:?}", other),
        }
        assert_eq!(outcome.decision.recommendation, Recommendation::AppearsOriginal);
    }

    /// 按引擎串行应答，每个引擎都在单次超时之内
    struct SlowSearch {
        per_engine: Duration,
    }

    #[async_trait]
    impl ExternalSearch for SlowSearch {
        async fn search(&self, query: &SearchQuery) -> Result<ExternalSearchResults, SearchError> {
            let mut engines = Vec::new();
            for engine in &query.engines {
                tokio::time::sleep(self.per_engine).await;
                engines.push(EngineResult {
                    engine: *engine,
                    matches: Vec::new(),
                    error: None,
                });
            }
            Ok(ExternalSearchResults::from_engines(engines))
        }
    }

    #[tokio::test]
    async fn slow_engines_within_their_own_timeout_complete() {
        let orchestrator = HybridSearchOrchestrator::new(
            Arc::new(FixedStore(None)),
            Some(Arc::new(SlowSearch {
                per_engine: Duration::from_millis(120),
            })),
            Duration::from_millis(200),
        );
        assert_eq!(orchestrator.external_budget(3), Duration::from_millis(600));

        let outcome = orchestrator
            .decide(&fingerprint(), Tier::Pro, false, Some("https://cdn/x.jpg"))
            .await;
        match &outcome.external {
            ExternalOutcome::Completed(results) => {
                assert_eq!(results.engines.len(), 3);
                assert!(results.engines.iter().all(|e| e.error.is_none()));
            }
            other => panic!("unexpected outcome: {:?}", other),
        }
    }
}
