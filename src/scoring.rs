//! 模块：置信度评分引擎 (Confidence Scoring Engine)
//!
//! 四个因子各自独立打分，满分默认都是 25：
//!
//! | 因子 | 子信号 |
//! |---|---|
//! | metadata_quality | Make 5 / Model 5 / 拍摄时间 5 / GPS 5 / 曝光参数 5 |
//! | external_verification | 天气 10 / 检索 15 |
//! | forensic_analysis | AI 可能性 15 (非视频 25) / 帧率 10 (仅视频) |
//! | temporal_trust | 拍摄时间 10 / 历史记录 15 |
//!
//! 不可用的子信号得 0 分但保留满分，所以证据越少百分比越低。
//! 篡改检测独立于加权求和，只参与等级选择。
//!
//! `calculate` 是纯函数：同样的输入永远得到同样的结果。

use chrono::{DateTime, Utc};
use serde_json::{json, Value};

use crate::config::ScoringThresholds;
use crate::error::{Result, VerifyError};
use crate::evidence::{
    capture_time, metadata_field, ConfidenceLevel, ConfidenceResult, FactorScore, ForensicSignal,
    MediaKind, MetadataFields, ModificationCheck,
};
use crate::forensics::{FrameRateOutcome, PortraitAdjustment, WeatherCheck};
use crate::search::{ExternalOutcome, HybridSearchOutcome};

pub const METADATA_QUALITY: &str = "metadata_quality";
pub const EXTERNAL_VERIFICATION: &str = "external_verification";
pub const FORENSIC_ANALYSIS: &str = "forensic_analysis";
pub const TEMPORAL_TRUST: &str = "temporal_trust";

/// 子信号满分按 25 分制给出，再按因子权重缩放
const NOMINAL_FACTOR_MAX: f64 = 25.0;

/// 与历史记录的拍摄时间相差超过该秒数视为不一致
const CAPTURE_DRIFT_TOLERANCE_SECS: i64 = 60;

/// (关键字, 软件名)，匹配 Software / CreatorTool 等字段 (小写)
const EDITING_SOFTWARE: &[(&str, &str)] = &[
    ("photoshop", "Adobe Photoshop"),
    ("lightroom", "Adobe Lightroom"),
    ("gimp", "GIMP"),
    ("affinity", "Affinity Photo"),
    ("pixelmator", "Pixelmator"),
    ("snapseed", "Snapseed"),
    ("facetune", "Facetune"),
    ("picsart", "PicsArt"),
    ("canva", "Canva"),
    ("premiere", "Adobe Premiere"),
    ("after effects", "Adobe After Effects"),
    ("final cut", "Final Cut Pro"),
    ("davinci", "DaVinci Resolve"),
    ("capcut", "CapCut"),
];

const SOFTWARE_FIELDS: &[&str] = &["Software", "CreatorTool", "ProcessingSoftware", "HistorySoftwareAgent"];

// ==========================================
// 1. 输入
// ==========================================

/// 一次核验收集到的全部信号；缺失的用 `None` 表示
#[derive(Debug, Clone)]
pub struct VerificationBundle {
    pub media_kind: MediaKind,
    pub metadata: MetadataFields,
    /// 上层解析好的拍摄时间；为空时从元数据里取
    pub captured_at: Option<DateTime<Utc>>,
    /// 评分时刻，判断“未来时间”用
    pub evaluated_at: DateTime<Utc>,
    pub search: Option<HybridSearchOutcome>,
    pub weather: Option<WeatherCheck>,
    pub frame_rate: Option<FrameRateOutcome>,
    /// 外部 AI 检测器给出的 0-100 分
    pub ai_score: Option<f64>,
    pub portrait: Option<PortraitAdjustment>,
}

impl VerificationBundle {
    pub fn new(media_kind: MediaKind, evaluated_at: DateTime<Utc>) -> Self {
        Self {
            media_kind,
            metadata: MetadataFields::new(),
            captured_at: None,
            evaluated_at,
            search: None,
            weather: None,
            frame_rate: None,
            ai_score: None,
            portrait: None,
        }
    }

    fn capture_time(&self) -> Option<DateTime<Utc>> {
        self.captured_at.or_else(|| capture_time(&self.metadata))
    }

    /// 人像修正后的分数优先
    fn effective_ai_score(&self) -> Option<f64> {
        self.portrait
            .as_ref()
            .map(|p| p.adjusted_ai_score)
            .or(self.ai_score)
    }
}

// ==========================================
// 2. 子信号
// ==========================================

struct Component {
    signal: ForensicSignal,
    available: bool,
}

impl Component {
    fn available(name: &str, score: f64, max: f64, details: Value, warnings: Vec<String>) -> Self {
        Self {
            signal: ForensicSignal::new(name, score, max, details, warnings),
            available: true,
        }
    }

    fn unavailable(name: &str, max: f64, reason: &str, warnings: Vec<String>) -> Self {
        Self {
            signal: ForensicSignal::new(name, 0.0, max, json!({ "reason": reason }), warnings),
            available: false,
        }
    }

    fn from_signal(signal: ForensicSignal) -> Self {
        let available = signal.details["available"].as_bool().unwrap_or(false);
        Self { signal, available }
    }
}

struct FactorEvaluation {
    signal: ForensicSignal,
    available: usize,
    total: usize,
}

fn combine(name: &str, components: Vec<Component>) -> FactorEvaluation {
    let score: f64 = components.iter().map(|c| c.signal.score).sum();
    let max: f64 = components.iter().map(|c| c.signal.max).sum();
    let available = components.iter().filter(|c| c.available).count();
    let total = components.len();

    let warnings: Vec<String> = components
        .iter()
        .flat_map(|c| c.signal.warnings.iter().cloned())
        .collect();
    let details: Vec<Value> = components
        .iter()
        .map(|c| {
            json!({
                "name": c.signal.name,
                "score": c.signal.score,
                "max": c.signal.max,
                "available": c.available,
                "details": c.signal.details,
            })
        })
        .collect();

    FactorEvaluation {
        signal: ForensicSignal::new(name, score, max, json!({ "components": details }), warnings),
        available,
        total,
    }
}

// ==========================================
// 3. 引擎
// ==========================================

pub struct ConfidenceScoringEngine {
    thresholds: ScoringThresholds,
}

impl ConfidenceScoringEngine {
    /// 权重之和为 0 时无法给出百分比，直接拒绝
    pub fn new(thresholds: ScoringThresholds) -> Result<Self> {
        let total = thresholds.weights.total();
        if total.is_nan() || total <= 0.0 {
            return Err(VerifyError::ScorerMisconfigured(format!(
                "factor weights sum to {}",
                total
            )));
        }
        Ok(Self { thresholds })
    }

    pub fn calculate(&self, bundle: &VerificationBundle) -> ConfidenceResult {
        let weights = self.thresholds.weights;
        let evaluations = [
            metadata_quality(bundle, weights.metadata_quality / NOMINAL_FACTOR_MAX),
            external_verification(bundle, weights.external_verification / NOMINAL_FACTOR_MAX),
            forensic_analysis(bundle, weights.forensic_analysis / NOMINAL_FACTOR_MAX),
            temporal_trust(bundle, weights.temporal_trust / NOMINAL_FACTOR_MAX),
        ];

        let available: usize = evaluations.iter().map(|e| e.available).sum();
        let total: usize = evaluations.iter().map(|e| e.total).sum();
        let coverage = if total == 0 {
            0.0
        } else {
            available as f64 / total as f64
        };

        let modification = detect_modification(&bundle.metadata, bundle.frame_rate.as_ref());
        let factors: Vec<ForensicSignal> = evaluations.into_iter().map(|e| e.signal).collect();

        let result = self.aggregate(factors, &modification, coverage);
        tracing::info!(
            media_kind = bundle.media_kind.as_str(),
            percentage = result.percentage,
            level = %result.level.name,
            coverage = result.coverage,
            is_modified = result.is_modified,
            "置信度评分完成"
        );
        result
    }

    /// 因子求和 → 百分比 → 等级，并生成警告与建议
    pub fn aggregate(
        &self,
        factors: Vec<ForensicSignal>,
        modification: &ModificationCheck,
        coverage: f64,
    ) -> ConfidenceResult {
        let score: f64 = factors.iter().map(|f| f.score).sum();
        let max_score: f64 = factors.iter().map(|f| f.max).sum();
        let percentage = percent(score, max_score);

        let mut warnings: Vec<String> = Vec::new();
        let mut recommendations: Vec<String> = Vec::new();

        if max_score <= 0.0 {
            tracing::error!(factors = factors.len(), "因子满分之和为 0，百分比按 0 处理");
            warnings.push("No scoring factors carried any weight; confidence defaults to 0%.".to_string());
        }

        for factor in &factors {
            warnings.extend(factor.warnings.iter().cloned());
        }

        for factor in &factors {
            if factor.max > 0.0 && factor.score < factor.max * self.thresholds.weak_factor_fraction {
                let (warning, recommendation) = weak_factor_advice(&factor.name);
                warnings.push(warning);
                recommendations.push(recommendation);
            }
        }

        if modification.detected {
            warnings.push(format!("Modification detected: {}", modification.details.join("; ")));
            recommendations.push(
                "Request the unedited original file from the source before relying on this content."
                    .to_string(),
            );
        }

        if coverage < self.thresholds.minimal_coverage {
            warnings.push(format!(
                "Minimal evidence coverage: only {:.0}% of verification signals were available, so this score reflects reduced coverage.",
                coverage * 100.0
            ));
            recommendations.push(
                "Configure additional verification services (weather, reverse image search) and supply original metadata to improve coverage."
                    .to_string(),
            );
        }

        dedup_in_order(&mut warnings);
        dedup_in_order(&mut recommendations);
        if recommendations.is_empty() {
            recommendations.push("No further action required; the available evidence is consistent.".to_string());
        }

        let factors = factors
            .into_iter()
            .map(|f| FactorScore {
                percentage: percent(f.score, f.max),
                name: f.name,
                score: f.score,
                max: f.max,
                details: f.details,
            })
            .collect();

        ConfidenceResult {
            score,
            max_score,
            percentage,
            level: self.level_for(percentage, modification.detected),
            is_modified: modification.detected,
            modification_details: modification.details.clone(),
            factors,
            warnings,
            recommendations,
            coverage,
        }
    }

    /// 先按百分比分档，检测到篡改时 high / medium 降为 modified
    pub fn level_for(&self, percentage: u32, modified: bool) -> ConfidenceLevel {
        let t = &self.thresholds;
        let bucket = if percentage >= t.high_percentage {
            "high"
        } else if percentage >= t.medium_percentage {
            "medium"
        } else if percentage >= t.low_percentage {
            "low"
        } else {
            "very_low"
        };
        let name = if modified && matches!(bucket, "high" | "medium") {
            "modified"
        } else {
            bucket
        };
        level(name)
    }
}

fn percent(score: f64, max: f64) -> u32 {
    if max <= 0.0 {
        return 0;
    }
    ((100.0 * score / max).round().clamp(0.0, 100.0)) as u32
}

fn dedup_in_order(items: &mut Vec<String>) {
    let mut seen = std::collections::HashSet::new();
    items.retain(|item| seen.insert(item.clone()));
}

/// (name, label, color, icon, message)
const LEVELS: &[(&str, &str, &str, &str, &str)] = &[
    (
        "high",
        "High Confidence",
        "#16a34a",
        "✅",
        "Strong, consistent evidence that this content is authentic.",
    ),
    (
        "medium",
        "Medium Confidence",
        "#ca8a04",
        "🟡",
        "Mostly consistent evidence; some signals could not be confirmed.",
    ),
    (
        "low",
        "Low Confidence",
        "#ea580c",
        "⚠️",
        "Limited or conflicting evidence; treat this content with caution.",
    ),
    (
        "very_low",
        "Very Low Confidence",
        "#dc2626",
        "❌",
        "Insufficient evidence to establish authenticity.",
    ),
    (
        "modified",
        "Modified Content",
        "#9333ea",
        "✏️",
        "Evidence of editing was found; this content may not be in its original form.",
    ),
];

fn level(name: &str) -> ConfidenceLevel {
    let (name, label, color, icon, message) = LEVELS
        .iter()
        .copied()
        .find(|(n, ..)| *n == name)
        .unwrap_or(LEVELS[3]);
    ConfidenceLevel {
        name: name.to_string(),
        label: label.to_string(),
        color: color.to_string(),
        icon: icon.to_string(),
        message: message.to_string(),
    }
}

fn weak_factor_advice(name: &str) -> (String, String) {
    let (warning, recommendation) = match name {
        METADATA_QUALITY => (
            "Limited camera metadata: provenance cannot be corroborated from EXIF.",
            "Provide the original file straight from the capture device with its metadata intact.",
        ),
        EXTERNAL_VERIFICATION => (
            "External sources could not corroborate this content.",
            "Enable weather and reverse image verification, or supply the capture location and date.",
        ),
        FORENSIC_ANALYSIS => (
            "Forensic analysis found weak or missing authenticity signals.",
            "Run a dedicated AI-generation and manipulation analysis before relying on this content.",
        ),
        TEMPORAL_TRUST => (
            "The capture time could not be established or is inconsistent.",
            "Supply the original capture date, or compare against earlier published copies.",
        ),
        other => {
            return (
                format!("Factor {} scored below its expected range.", other),
                format!("Review the {} evidence manually.", other),
            )
        }
    };
    (warning.to_string(), recommendation.to_string())
}

// ==========================================
// 4. 因子
// ==========================================

fn metadata_quality(bundle: &VerificationBundle, scale: f64) -> FactorEvaluation {
    let metadata = &bundle.metadata;
    let slot = 5.0 * scale;
    let max = 5.0 * slot;

    let component = if metadata.is_empty() {
        Component::unavailable("exif_fields", max, "no metadata supplied", Vec::new())
    } else {
        let has_any = |names: &[&str]| names.iter().any(|n| metadata_field(metadata, n).is_some());
        let checks = [
            ("camera_make", has_any(&["Make"])),
            ("camera_model", has_any(&["Model"])),
            ("capture_time", capture_time(metadata).is_some()),
            (
                "gps",
                has_any(&["GPSLatitude"]) && has_any(&["GPSLongitude"]),
            ),
            (
                "exposure",
                has_any(&["FNumber", "ExposureTime", "ISO", "ISOSpeedRatings", "FocalLength"]),
            ),
        ];
        let present: Vec<&str> = checks.iter().filter(|(_, ok)| *ok).map(|(n, _)| *n).collect();
        let missing: Vec<&str> = checks.iter().filter(|(_, ok)| !*ok).map(|(n, _)| *n).collect();

        Component::available(
            "exif_fields",
            present.len() as f64 * slot,
            max,
            json!({ "present": present, "missing": missing }),
            Vec::new(),
        )
    };

    combine(METADATA_QUALITY, vec![component])
}

fn external_verification(bundle: &VerificationBundle, scale: f64) -> FactorEvaluation {
    let weather_max = 10.0 * scale;
    let weather = match &bundle.weather {
        Some(check) => Component::from_signal(check.to_signal(weather_max)),
        None => Component::unavailable("weather_consistency", weather_max, "not run", Vec::new()),
    };

    combine(
        EXTERNAL_VERIFICATION,
        vec![weather, search_component(bundle.search.as_ref(), 15.0 * scale)],
    )
}

fn search_component(search: Option<&HybridSearchOutcome>, max: f64) -> Component {
    const NAME: &str = "content_search";
    let Some(outcome) = search else {
        return Component::unavailable(NAME, max, "not run", Vec::new());
    };
    let details = json!({
        "decision": outcome.decision,
        "external": outcome.external,
    });

    if outcome.internal_found() {
        return Component::available(NAME, max, max, details, Vec::new());
    }

    match &outcome.external {
        ExternalOutcome::Completed(results) if results.total_external_matches == 0 => {
            Component::available(NAME, max, max, details, Vec::new())
        }
        ExternalOutcome::Completed(results) => Component::available(
            NAME,
            max * 3.0 / 15.0,
            max,
            details,
            vec![format!(
                "Found {} matching copies online; this may not be the original.",
                results.total_external_matches
            )],
        ),
        ExternalOutcome::Failed { message, .. } => Component::unavailable(
            NAME,
            max,
            "external search failed",
            vec![format!("External search unavailable: {}", message)],
        ),
        ExternalOutcome::NotApplicable { reason } => match &outcome.internal_error {
            Some(error) => Component::unavailable(
                NAME,
                max,
                "fingerprint store unavailable",
                vec![format!("Fingerprint store unavailable: {}", error)],
            ),
            None => Component::available(
                NAME,
                max * 8.0 / 15.0,
                max,
                details,
                vec![format!("External search skipped: {}", reason)],
            ),
        },
        ExternalOutcome::Skipped | ExternalOutcome::NotConfigured => match &outcome.internal_error {
            Some(error) => Component::unavailable(
                NAME,
                max,
                "fingerprint store unavailable",
                vec![format!("Fingerprint store unavailable: {}", error)],
            ),
            None => Component::available(NAME, max * 8.0 / 15.0, max, details, Vec::new()),
        },
    }
}

fn forensic_analysis(bundle: &VerificationBundle, scale: f64) -> FactorEvaluation {
    let is_video = bundle.media_kind == MediaKind::Video;
    let ai_max = if is_video { 15.0 } else { 25.0 } * scale;

    let ai = match bundle.effective_ai_score() {
        Some(ai_score) => {
            let ai_score = ai_score.clamp(0.0, 100.0);
            let (portrait, warnings) = match &bundle.portrait {
                Some(adjustment) => {
                    let signal = adjustment.to_signal();
                    (signal.details, signal.warnings)
                }
                None => (Value::Null, Vec::new()),
            };
            Component::available(
                "ai_likelihood",
                (ai_max * (100.0 - ai_score) / 100.0).round(),
                ai_max,
                json!({ "ai_score": ai_score, "portrait": portrait }),
                warnings,
            )
        }
        None => Component::unavailable("ai_likelihood", ai_max, "no AI detector score supplied", Vec::new()),
    };

    let mut components = vec![ai];
    if is_video {
        let fr_max = 10.0 * scale;
        components.push(match &bundle.frame_rate {
            Some(outcome) => Component::from_signal(outcome.to_signal(fr_max)),
            None => Component::unavailable("frame_rate_consistency", fr_max, "not run", Vec::new()),
        });
    }

    combine(FORENSIC_ANALYSIS, components)
}

fn temporal_trust(bundle: &VerificationBundle, scale: f64) -> FactorEvaluation {
    let capture_max = 10.0 * scale;
    let captured_at = bundle.capture_time();

    let capture = match captured_at {
        None => Component::unavailable("capture_time", capture_max, "no capture timestamp", Vec::new()),
        Some(at) if at > bundle.evaluated_at => Component::available(
            "capture_time",
            0.0,
            capture_max,
            json!({ "captured_at": at }),
            vec![format!("Capture date {} is in the future.", at.to_rfc3339())],
        ),
        Some(at) => Component::available(
            "capture_time",
            capture_max,
            capture_max,
            json!({ "captured_at": at }),
            Vec::new(),
        ),
    };

    let history_max = 15.0 * scale;
    let history = match &bundle.search {
        None => Component::unavailable("verification_history", history_max, "not run", Vec::new()),
        Some(outcome) if outcome.internal_error.is_some() => Component::unavailable(
            "verification_history",
            history_max,
            "fingerprint store unavailable",
            Vec::new(),
        ),
        Some(outcome) => match &outcome.internal {
            None => Component::available(
                "verification_history",
                history_max * 5.0 / 15.0,
                history_max,
                json!({ "first_sighting": true }),
                Vec::new(),
            ),
            Some(record) => {
                let drifted = match (record.captured_at, captured_at) {
                    (Some(before), Some(now)) => {
                        (before - now).num_seconds().abs() > CAPTURE_DRIFT_TOLERANCE_SECS
                    }
                    _ => false,
                };
                let warnings = if drifted {
                    vec!["Capture date differs from the previously verified record.".to_string()]
                } else {
                    Vec::new()
                };
                Component::available(
                    "verification_history",
                    if drifted { 0.0 } else { history_max },
                    history_max,
                    json!({
                        "first_verified_at": record.first_verified_at,
                        "verification_count": record.verification_count,
                        "capture_drift": drifted,
                    }),
                    warnings,
                )
            }
        },
    };

    combine(TEMPORAL_TRUST, vec![capture, history])
}

// ==========================================
// 5. 篡改检测
// ==========================================

/// 独立于加权求和：编辑软件痕迹 + 视频拼接特征
pub fn detect_modification(
    metadata: &MetadataFields,
    frame_rate: Option<&FrameRateOutcome>,
) -> ModificationCheck {
    let mut details = Vec::new();

    for field in SOFTWARE_FIELDS {
        let Some(value) = metadata_field(metadata, field) else {
            continue;
        };
        let lowered = value.to_lowercase();
        if let Some((_, label)) = EDITING_SOFTWARE.iter().find(|(needle, _)| lowered.contains(needle)) {
            details.push(format!("Edited with {} ({}: {})", label, field, value));
        }
    }

    if let Some(report) = frame_rate.and_then(FrameRateOutcome::report) {
        if report.mixed_frame_rate {
            details.push(format!(
                "Mixed frame rates ({} fps declared, {} fps average) suggest spliced footage",
                report.declared_fps, report.average_fps
            ));
        } else if report.severe_variance {
            details.push(format!(
                "Frame rate variance of {}% indicates re-encoding or editing",
                report.variance_percent
            ));
        }
    }

    ModificationCheck {
        detected: !details.is_empty(),
        details,
    }
}
