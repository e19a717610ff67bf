use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::error::{Result, VerifyError};
use crate::evidence::Tier;

pub const DEFAULT_WEATHER_BASE_URL: &str = "https://api.weatherapi.com/v1";
pub const DEFAULT_SEARCH_BASE_URL: &str = "https://serpapi.com";

#[derive(Debug, Clone)]
pub struct Config {
    /// 未配置时天气一致性检查直接关闭 (enabled=false)
    pub weather_api_key: Option<String>,
    pub weather_base_url: String,
    /// 未配置时只做内部检索
    pub search_api_key: Option<String>,
    pub search_base_url: String,
    pub http_timeout: Duration,
    pub probe_timeout: Duration,
    pub tier: Tier,
    pub always_search_external: bool,
    /// 裁决签名私钥；为空则不签名
    pub key_path: Option<PathBuf>,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            weather_api_key: non_empty("YJ_WEATHER_API_KEY"),
            weather_base_url: env::var("YJ_WEATHER_BASE_URL")
                .unwrap_or_else(|_| DEFAULT_WEATHER_BASE_URL.to_string()),
            search_api_key: non_empty("YJ_SEARCH_API_KEY"),
            search_base_url: env::var("YJ_SEARCH_BASE_URL")
                .unwrap_or_else(|_| DEFAULT_SEARCH_BASE_URL.to_string()),
            http_timeout: Duration::from_secs(parse_or("YJ_HTTP_TIMEOUT_SECS", 10)?),
            probe_timeout: Duration::from_secs(parse_or("YJ_PROBE_TIMEOUT_SECS", 60)?),
            tier: parse_or("YJ_TIER", Tier::Free)?,
            always_search_external: parse_or("YJ_ALWAYS_SEARCH_EXTERNAL", false)?,
            key_path: non_empty("YJ_KEY_PATH").map(PathBuf::from),
        })
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            weather_api_key: None,
            weather_base_url: DEFAULT_WEATHER_BASE_URL.to_string(),
            search_api_key: None,
            search_base_url: DEFAULT_SEARCH_BASE_URL.to_string(),
            http_timeout: Duration::from_secs(10),
            probe_timeout: Duration::from_secs(60),
            tier: Tier::Free,
            always_search_external: false,
            key_path: None,
        }
    }
}

fn non_empty(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn parse_or<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|e| VerifyError::Config(format!("{} 无法解析 ({}): {}", key, raw, e))),
        Err(_) => Ok(default),
    }
}

// ==========================================
// 各组件的阈值常量
// ==========================================
// 阈值不写死在控制流里，由构造函数注入，测试可以随意替换。

/// 帧率一致性阈值
#[derive(Debug, Clone, Copy)]
pub struct FrameRateThresholds {
    /// variance 低于该值视为一致 (2%)
    pub consistent_variance: f64,
    /// variance 高于该值给出强警告 (10%)
    pub severe_variance: f64,
    /// 30/24 混剪特征
    pub mixed_declared_fps: f64,
    pub mixed_average_fps: f64,
    pub mixed_tolerance: f64,
}

impl Default for FrameRateThresholds {
    fn default() -> Self {
        Self {
            consistent_variance: 0.02,
            severe_variance: 0.10,
            mixed_declared_fps: 30.0,
            mixed_average_fps: 24.0,
            mixed_tolerance: 0.1,
        }
    }
}

/// 人像模式判定与 AI 分数修正
#[derive(Debug, Clone, Copy)]
pub struct PortraitThresholds {
    pub detection_threshold: u32,
    pub max_confidence: u32,
    /// confidence=100 时 AI 分数最多扣减的点数
    pub max_reduction: f64,
}

impl Default for PortraitThresholds {
    fn default() -> Self {
        Self {
            detection_threshold: 40,
            max_confidence: 100,
            max_reduction: 30.0,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct WeatherThresholds {
    /// 降水量达到该值 (mm) 即视为雨天
    pub rain_precipitation_mm: f64,
}

impl Default for WeatherThresholds {
    fn default() -> Self {
        Self {
            rain_precipitation_mm: 1.0,
        }
    }
}

/// 置信度评分阈值
#[derive(Debug, Clone, Copy)]
pub struct ScoringThresholds {
    /// 因子得分低于满分的该比例时给出警告和建议
    pub weak_factor_fraction: f64,
    /// 可用信号占比低于该值时提示证据覆盖不足
    pub minimal_coverage: f64,
    pub high_percentage: u32,
    pub medium_percentage: u32,
    pub low_percentage: u32,
    pub weights: FactorWeights,
}

impl Default for ScoringThresholds {
    fn default() -> Self {
        Self {
            weak_factor_fraction: 0.5,
            minimal_coverage: 0.5,
            high_percentage: 80,
            medium_percentage: 60,
            low_percentage: 40,
            weights: FactorWeights::default(),
        }
    }
}

/// 四个因子的满分；子信号按 `weight / 25` 等比缩放
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FactorWeights {
    pub metadata_quality: f64,
    pub external_verification: f64,
    pub forensic_analysis: f64,
    pub temporal_trust: f64,
}

impl FactorWeights {
    pub fn total(&self) -> f64 {
        self.metadata_quality + self.external_verification + self.forensic_analysis + self.temporal_trust
    }
}

impl Default for FactorWeights {
    fn default() -> Self {
        Self {
            metadata_quality: 25.0,
            external_verification: 25.0,
            forensic_analysis: 25.0,
            temporal_trust: 25.0,
        }
    }
}
