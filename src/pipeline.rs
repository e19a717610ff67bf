//! 模块：核验流水线 (Verifier)
//!
//! ```text
//! 资产 → 规范化指纹 (+ 视频流信息) ─┬─ 内部库 + 外部检索决策 ─┐
//!                                   ├─ 天气一致性             ├─→ 人像修正 → 评分 → 入库 → 签名
//!                                   └─ 帧率一致性 (仅视频)   ─┘
//! ```
//!
//! 只有指纹阶段的 `InvalidAsset` 会让整次核验失败。
//! 入库和签名失败只记日志，不改变裁决。

use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use std::sync::Arc;

use crate::clients::{SerpApiClient, WeatherApiClient};
use crate::config::{
    Config, FrameRateThresholds, PortraitThresholds, ScoringThresholds, WeatherThresholds,
};
use crate::error::Result;
use crate::evidence::{
    capture_time, ConfidenceResult, Fingerprint, MediaKind, MetadataFields, Tier,
    VerificationRecord,
};
use crate::fingerprint::{CanonicalizeContext, ContentCanonicalizer};
use crate::forensics::{
    FrameRateConsistencyChecker, FrameRateOutcome, GeoPoint, PortraitAdjustment,
    PortraitModeAdjuster, WeatherCheck, WeatherConsistencyChecker, WeatherProvider,
};
use crate::probe::{FfmpegProbe, MediaProbe};
use crate::scoring::{ConfidenceScoringEngine, VerificationBundle};
use crate::search::{ExternalSearch, FingerprintStore, HybridSearchOrchestrator, HybridSearchOutcome};
use crate::signer::{SignedVerdict, VerdictSigner};

/// 一次核验的输入；元数据字段由上游 (EXIF 解析) 提供
#[derive(Debug, Clone)]
pub struct VerificationRequest {
    pub kind: MediaKind,
    pub bytes: Vec<u8>,
    pub context: CanonicalizeContext,
    pub metadata: MetadataFields,
    /// 为空时从 GPS 标签取
    pub location: Option<GeoPoint>,
    /// 为空时从 DateTimeOriginal 等标签取
    pub captured_at: Option<DateTime<Utc>>,
    /// 图像识别给出的场景标签，天气对照用
    pub scene_labels: Vec<String>,
    /// 外部 AI 生成检测器的 0-100 分
    pub ai_score: Option<f64>,
    /// 反向图片检索用的公开 URL
    pub asset_ref: Option<String>,
    /// 为空时用 Verifier 的默认档位
    pub tier: Option<Tier>,
}

impl VerificationRequest {
    pub fn new(kind: MediaKind, bytes: Vec<u8>) -> Self {
        Self {
            kind,
            bytes,
            context: CanonicalizeContext::default(),
            metadata: MetadataFields::new(),
            location: None,
            captured_at: None,
            scene_labels: Vec::new(),
            ai_score: None,
            asset_ref: None,
            tier: None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct VerificationReport {
    pub fingerprint: Fingerprint,
    pub search: HybridSearchOutcome,
    pub weather: WeatherCheck,
    pub frame_rate: Option<FrameRateOutcome>,
    pub portrait: Option<PortraitAdjustment>,
    pub result: ConfidenceResult,
    pub signed: Option<SignedVerdict>,
}

pub struct Verifier {
    canonicalizer: ContentCanonicalizer,
    search: HybridSearchOrchestrator,
    store: Arc<dyn FingerprintStore>,
    weather: WeatherConsistencyChecker,
    frame_rate: Option<FrameRateConsistencyChecker>,
    portrait: PortraitModeAdjuster,
    scoring: ConfidenceScoringEngine,
    signer: Option<VerdictSigner>,
    tier: Tier,
    always_search_external: bool,
}

impl Verifier {
    pub fn builder(store: Arc<dyn FingerprintStore>) -> VerifierBuilder {
        VerifierBuilder::new(store)
    }

    /// 按环境配置接上真实的探针和 HTTP 客户端；没有 key 的服务保持关闭
    pub fn from_config(config: &Config, store: Arc<dyn FingerprintStore>) -> Result<Self> {
        let mut builder = Self::builder(store)
            .probe(Arc::new(FfmpegProbe::new(config.probe_timeout)))
            .tier(config.tier)
            .always_search_external(config.always_search_external)
            .timeout(config.http_timeout);

        if let Some(key) = &config.weather_api_key {
            match WeatherApiClient::new(&config.weather_base_url, key, config.http_timeout) {
                Ok(client) => builder = builder.weather_provider(Arc::new(client)),
                Err(e) => tracing::warn!(error = %e, "天气客户端初始化失败，天气检查关闭"),
            }
        }
        if let Some(key) = &config.search_api_key {
            match SerpApiClient::new(&config.search_base_url, key, config.http_timeout) {
                Ok(client) => builder = builder.external_search(Arc::new(client)),
                Err(e) => tracing::warn!(error = %e, "检索客户端初始化失败，只做内部检索"),
            }
        }
        if let Some(path) = &config.key_path {
            builder = builder.signer(VerdictSigner::load_or_generate(path)?);
        }

        builder.build()
    }

    pub async fn verify(&self, request: VerificationRequest) -> Result<VerificationReport> {
        let canonical = self
            .canonicalizer
            .canonicalize_detailed(request.kind, &request.bytes, &request.context)
            .await?;
        let fingerprint = canonical.fingerprint;
        tracing::info!(
            kind = request.kind.as_str(),
            key = %fingerprint.store_key(),
            robust = fingerprint.perceptual_robust,
            "指纹计算完成"
        );

        let captured_at = request.captured_at.or_else(|| capture_time(&request.metadata));
        let location = request.location.or_else(|| GeoPoint::from_metadata(&request.metadata));
        let capture_date: Option<NaiveDate> = captured_at.map(|at| at.date_naive());
        let tier = request.tier.unwrap_or(self.tier);

        // 帧率只看规范化阶段已经探测到的流信息，视频不会被第二次解码
        let frame_rate = match (&self.frame_rate, &canonical.video_stream) {
            (Some(checker), Some(stream)) => Some(checker.assess(stream)),
            _ => None,
        };

        let (search, weather) = tokio::join!(
            self.search.decide(
                &fingerprint,
                tier,
                self.always_search_external,
                request.asset_ref.as_deref(),
            ),
            self.weather.check(location, capture_date, &request.scene_labels),
        );

        let portrait = request.ai_score.map(|ai_score| {
            let detection = self.portrait.detect(&request.metadata);
            self.portrait.adjust(ai_score, &detection)
        });

        let evaluated_at = Utc::now();
        let bundle = VerificationBundle {
            media_kind: request.kind,
            metadata: request.metadata,
            captured_at,
            evaluated_at,
            search: Some(search.clone()),
            weather: Some(weather.clone()),
            frame_rate: frame_rate.clone(),
            ai_score: request.ai_score,
            portrait: portrait.clone(),
        };
        let result = self.scoring.calculate(&bundle);

        self.record(&fingerprint, &search, &result, captured_at, evaluated_at)
            .await;

        let signed = self.signer.as_ref().and_then(|signer| {
            signer
                .sign(&fingerprint, &result)
                .map_err(|e| tracing::warn!(error = %e, "裁决签名失败"))
                .ok()
        });

        Ok(VerificationReport {
            fingerprint,
            search,
            weather,
            frame_rate,
            portrait,
            result,
            signed,
        })
    }

    async fn record(
        &self,
        fingerprint: &Fingerprint,
        search: &HybridSearchOutcome,
        result: &ConfidenceResult,
        captured_at: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) {
        let prior = search.internal.as_ref();
        let record = VerificationRecord {
            fingerprint_key: fingerprint.store_key(),
            media_kind: fingerprint.media_kind,
            first_verified_at: prior.map(|r| r.first_verified_at).unwrap_or(now),
            last_verified_at: now,
            verification_count: prior.map(|r| r.verification_count + 1).unwrap_or(1),
            last_percentage: result.percentage,
            captured_at: captured_at.or_else(|| prior.and_then(|r| r.captured_at)),
        };

        if let Err(e) = self.store.upsert(record).await {
            tracing::warn!(error = %e, key = %fingerprint.store_key(), "核验记录写入失败");
        }
    }
}

pub struct VerifierBuilder {
    store: Arc<dyn FingerprintStore>,
    probe: Option<Arc<dyn MediaProbe>>,
    weather_provider: Option<Arc<dyn WeatherProvider>>,
    external_search: Option<Arc<dyn ExternalSearch>>,
    signer: Option<VerdictSigner>,
    tier: Tier,
    always_search_external: bool,
    timeout: std::time::Duration,
    frame_rate_thresholds: FrameRateThresholds,
    portrait_thresholds: PortraitThresholds,
    weather_thresholds: WeatherThresholds,
    scoring_thresholds: ScoringThresholds,
}

impl VerifierBuilder {
    fn new(store: Arc<dyn FingerprintStore>) -> Self {
        Self {
            store,
            probe: None,
            weather_provider: None,
            external_search: None,
            signer: None,
            tier: Tier::Free,
            always_search_external: false,
            timeout: std::time::Duration::from_secs(10),
            frame_rate_thresholds: FrameRateThresholds::default(),
            portrait_thresholds: PortraitThresholds::default(),
            weather_thresholds: WeatherThresholds::default(),
            scoring_thresholds: ScoringThresholds::default(),
        }
    }

    pub fn probe(mut self, probe: Arc<dyn MediaProbe>) -> Self {
        self.probe = Some(probe);
        self
    }

    pub fn weather_provider(mut self, provider: Arc<dyn WeatherProvider>) -> Self {
        self.weather_provider = Some(provider);
        self
    }

    pub fn external_search(mut self, search: Arc<dyn ExternalSearch>) -> Self {
        self.external_search = Some(search);
        self
    }

    pub fn signer(mut self, signer: VerdictSigner) -> Self {
        self.signer = Some(signer);
        self
    }

    pub fn tier(mut self, tier: Tier) -> Self {
        self.tier = tier;
        self
    }

    pub fn always_search_external(mut self, always: bool) -> Self {
        self.always_search_external = always;
        self
    }

    /// 天气和外部检索的超时
    pub fn timeout(mut self, timeout: std::time::Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn frame_rate_thresholds(mut self, thresholds: FrameRateThresholds) -> Self {
        self.frame_rate_thresholds = thresholds;
        self
    }

    pub fn portrait_thresholds(mut self, thresholds: PortraitThresholds) -> Self {
        self.portrait_thresholds = thresholds;
        self
    }

    pub fn weather_thresholds(mut self, thresholds: WeatherThresholds) -> Self {
        self.weather_thresholds = thresholds;
        self
    }

    pub fn scoring_thresholds(mut self, thresholds: ScoringThresholds) -> Self {
        self.scoring_thresholds = thresholds;
        self
    }

    pub fn build(self) -> Result<Verifier> {
        let scoring = ConfidenceScoringEngine::new(self.scoring_thresholds)?;
        let frame_rate = self
            .probe
            .clone()
            .map(|probe| FrameRateConsistencyChecker::new(probe, self.frame_rate_thresholds));

        Ok(Verifier {
            canonicalizer: ContentCanonicalizer::new(self.probe),
            search: HybridSearchOrchestrator::new(self.store.clone(), self.external_search, self.timeout),
            store: self.store,
            weather: WeatherConsistencyChecker::new(
                self.weather_provider,
                self.timeout,
                self.weather_thresholds,
            ),
            frame_rate,
            portrait: PortraitModeAdjuster::new(self.portrait_thresholds),
            scoring,
            signer: self.signer,
            tier: self.tier,
            always_search_external: self.always_search_external,
        })
    }
}
