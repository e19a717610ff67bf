use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

// ==========================================
// 1. 媒体类型 & 订阅档位
// ==========================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Image,
    Video,
    Audio,
}

impl MediaKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MediaKind::Image => "image",
            MediaKind::Video => "video",
            MediaKind::Audio => "audio",
        }
    }
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MediaKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "image" => Ok(MediaKind::Image),
            "video" => Ok(MediaKind::Video),
            "audio" => Ok(MediaKind::Audio),
            other => Err(format!("unknown media kind: {}", other)),
        }
    }
}

/// 订阅档位，决定能调用哪些外部检索引擎
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    Free,
    Pro,
    Enterprise,
}

impl FromStr for Tier {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "free" => Ok(Tier::Free),
            "pro" => Ok(Tier::Pro),
            "enterprise" => Ok(Tier::Enterprise),
            other => Err(format!("unknown tier: {}", other)),
        }
    }
}

/// EXIF / 容器元数据，字段名沿用 EXIF 标签名 (Make、Model、LensModel ...)
pub type MetadataFields = BTreeMap<String, String>;

/// 按 EXIF 标签名取值，大小写不敏感，空值视为缺失
pub fn metadata_field<'a>(metadata: &'a MetadataFields, name: &str) -> Option<&'a str> {
    metadata
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(name))
        .map(|(_, v)| v.as_str())
        .filter(|v| !v.trim().is_empty())
}

/// EXIF 时间 `2024:06:01 14:03:22`，也接受 RFC 3339；不带时区的按 UTC 处理
pub fn parse_exif_datetime(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
        return Some(parsed.with_timezone(&Utc));
    }
    ["%Y:%m:%d %H:%M:%S", "%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
        .map(|naive| Utc.from_utc_datetime(&naive))
}

/// 原始拍摄时间：DateTimeOriginal > CreateDate > DateTime
pub fn capture_time(metadata: &MetadataFields) -> Option<DateTime<Utc>> {
    ["DateTimeOriginal", "CreateDate", "DateTime"]
        .iter()
        .find_map(|name| metadata_field(metadata, name).and_then(parse_exif_datetime))
}

// ==========================================
// 2. 内容指纹 (Fingerprint)
// ==========================================

/// 规范化过程中顺带拿到的元数据，按媒体类型选填
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DerivedMetadata {
    pub duration: Option<f64>,
    pub sample_rate: Option<u32>,
    pub channels: Option<u32>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    /// 仅在回退路径下根据扩展名推断
    pub inferred_mime: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fingerprint {
    // 算法标签，例如 "sha256+gradient_phash"
    // 作用：裁决可解释。同一份内容用不同算法得到的指纹不能混比。
    pub algorithm: String,

    // 主哈希 (Hex)
    // 只对规范化之后的字节计算，永远不会对容器相关的原始字节重算
    // (回退路径除外，那时 canonicalization = "none"，调用方能看出来)。
    pub primary_hash: String,

    // 感知描述符 (pHash / Chromaprint / 帧哈希序列)
    // 工具缺失时为 None：部分指纹依然有效。
    pub perceptual: Option<String>,

    pub media_kind: MediaKind,

    // 规范化方法标签，例如 "mono_16khz_s16le"
    pub canonicalization: String,

    // false 表示走了回退路径，没有转码鲁棒性
    pub perceptual_robust: bool,

    pub metadata: DerivedMetadata,
}

impl Fingerprint {
    /// 指纹库的主键：`<媒体类型>:<规范化方法>:<主哈希>`
    ///
    /// 不含 `algorithm`：音频的算法标签会随 Chromaprint 是否成功而变化，
    /// 而主哈希只由规范化方法和规范字节决定。同一份规范字节必须落到同一个键上，
    /// 否则 fpcalc 一次超时就会让“已核验过”的素材查不到历史记录。
    /// 回退路径的 canonicalization 是 "none"，不会和规范化后的哈希撞键。
    pub fn store_key(&self) -> String {
        format!("{}:{}:{}", self.media_kind, self.canonicalization, self.primary_hash)
    }
}

// ==========================================
// 3. 取证信号 & 评分结果
// ==========================================

/// 单个取证信号，生成后不再修改
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForensicSignal {
    pub name: String,
    pub score: f64,
    pub max: f64,
    pub details: serde_json::Value,
    pub warnings: Vec<String>,
}

impl ForensicSignal {
    /// score 会被夹到 [0, max]
    pub fn new(
        name: impl Into<String>,
        score: f64,
        max: f64,
        details: serde_json::Value,
        warnings: Vec<String>,
    ) -> Self {
        let max = max.max(0.0);
        Self {
            name: name.into(),
            score: score.clamp(0.0, max),
            max,
            details,
            warnings,
        }
    }
}

/// 结果里每个因子的展示形式
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FactorScore {
    pub name: String,
    pub score: f64,
    pub max: f64,
    pub percentage: u32,
    pub details: serde_json::Value,
}

/// 独立的篡改检测结果，不参与加权求和
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModificationCheck {
    pub detected: bool,
    pub details: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfidenceLevel {
    pub name: String,
    pub label: String,
    pub color: String,
    pub icon: String,
    pub message: String,
}

/// 最终裁决。每次核验新建，构造后不可变，核心层不负责持久化。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfidenceResult {
    pub score: f64,
    pub max_score: f64,
    pub percentage: u32,
    pub level: ConfidenceLevel,
    pub is_modified: bool,
    pub modification_details: Vec<String>,
    pub factors: Vec<FactorScore>,
    pub warnings: Vec<String>,
    pub recommendations: Vec<String>,
    /// 可用子信号占比 (0.0 - 1.0)
    pub coverage: f64,
}

// ==========================================
// 4. 检索策略
// ==========================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchEngine {
    /// 基础引擎，所有档位可用
    GoogleLens,
    BingImages,
    YandexImages,
    /// 穷举式反向图片检索，仅 enterprise
    TinEye,
}

impl SearchEngine {
    pub fn as_str(&self) -> &'static str {
        match self {
            SearchEngine::GoogleLens => "google_lens",
            SearchEngine::BingImages => "bing_images",
            SearchEngine::YandexImages => "yandex_images",
            SearchEngine::TinEye => "tineye",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Recommendation {
    PreviouslyVerified,
    FoundOnline,
    AppearsOriginal,
}

impl Recommendation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Recommendation::PreviouslyVerified => {
                "This content was previously verified in our records."
            }
            Recommendation::FoundOnline => {
                "Similar content was found online; this may not be the original."
            }
            Recommendation::AppearsOriginal => {
                "This content appears original; this is its first verification."
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchStrategyDecision {
    pub tier: Tier,
    /// 恒为 true
    pub internal_searched: bool,
    pub external_searched: bool,
    pub engines: Vec<SearchEngine>,
    pub recommendation: Recommendation,
    pub recommendation_text: String,
}

// ==========================================
// 5. 指纹库记录 (由外部存储持有)
// ==========================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerificationRecord {
    pub fingerprint_key: String,
    pub media_kind: MediaKind,
    pub first_verified_at: DateTime<Utc>,
    pub last_verified_at: DateTime<Utc>,
    pub verification_count: u32,
    pub last_percentage: u32,
    pub captured_at: Option<DateTime<Utc>>,
}
