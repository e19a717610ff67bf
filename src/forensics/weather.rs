//! 天气一致性检查
//!
//! 拍摄地点 + 拍摄日期 → 历史天气，再与图像场景标签对照：
//! 画面阳光明媚、当天却在下雨 (或反过来)，就是一条取证线索。
//!
//! 任何上游失败都只产生警告 + 未验证状态，绝不向评分器抛错。

use async_trait::async_trait;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use crate::config::WeatherThresholds;
use crate::evidence::{metadata_field, ForensicSignal, MetadataFields};

pub const SIGNAL_NAME: &str = "weather_consistency";

const SUNNY_SCENE_TOKENS: &[&str] = &["sun", "clear", "sky", "daylight", "shadow"];
const RAINY_SCENE_TOKENS: &[&str] = &["rain", "storm", "cloud", "overcast", "umbrella", "puddle", "wet"];
const SUNNY_CONDITION_TOKENS: &[&str] = &["sunny", "clear"];
const RAINY_CONDITION_TOKENS: &[&str] = &["rain", "drizzle", "shower", "storm", "thunder", "sleet"];

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub latitude: f64,
    pub longitude: f64,
}

impl GeoPoint {
    /// 从十进制 GPS 标签取坐标；`GPSLatitudeRef = S` / `GPSLongitudeRef = W` 取负
    pub fn from_metadata(metadata: &MetadataFields) -> Option<Self> {
        let latitude = signed_coordinate(metadata, "GPSLatitude", "GPSLatitudeRef", 'S')?;
        let longitude = signed_coordinate(metadata, "GPSLongitude", "GPSLongitudeRef", 'W')?;
        ((-90.0..=90.0).contains(&latitude) && (-180.0..=180.0).contains(&longitude)).then_some(Self {
            latitude,
            longitude,
        })
    }
}

fn signed_coordinate(metadata: &MetadataFields, field: &str, ref_field: &str, negative: char) -> Option<f64> {
    let raw = metadata_field(metadata, field)?.trim();
    // 兼容 "48.8584 N" 这种带方位后缀的写法
    let (number, suffix) = match raw.chars().last() {
        Some(c) if c.is_ascii_alphabetic() => (raw[..raw.len() - 1].trim(), Some(c)),
        _ => (raw, None),
    };
    let value: f64 = number.parse().ok()?;
    let hemisphere = suffix.or_else(|| metadata_field(metadata, ref_field).and_then(|r| r.trim().chars().next()));
    match hemisphere {
        Some(c) if c.eq_ignore_ascii_case(&negative) => Some(-value.abs()),
        _ => Some(value),
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeatherObservation {
    pub condition: String,
    pub avgtemp_c: f64,
    pub precipitation_mm: f64,
}

/// 上游错误，按 HTTP 状态归类
#[derive(Debug, Error)]
pub enum WeatherError {
    /// 坐标或日期非法 (400)
    #[error("Invalid weather request: {0}")]
    InvalidRequest(String),

    /// 凭据失效 (401/403)
    #[error("Weather API authentication failed: {0}")]
    Auth(String),

    /// 其他一切：超时、5xx、解析失败
    #[error("Weather API error: {0}")]
    Api(String),
}

impl WeatherError {
    pub fn kind(&self) -> &'static str {
        match self {
            WeatherError::InvalidRequest(_) => "invalid_request",
            WeatherError::Auth(_) => "auth_error",
            WeatherError::Api(_) => "api_error",
        }
    }
}

#[async_trait]
pub trait WeatherProvider: Send + Sync {
    async fn historical(
        &self,
        location: GeoPoint,
        date: NaiveDate,
    ) -> Result<WeatherObservation, WeatherError>;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeatherDetails {
    pub location: GeoPoint,
    pub date: NaiveDate,
    pub condition: String,
    pub avgtemp_c: f64,
    pub precipitation_mm: f64,
    pub is_sunny: bool,
    pub is_rainy: bool,
    pub image_looks_sunny: bool,
    pub image_looks_rainy: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeatherCheck {
    pub enabled: bool,
    pub verified: bool,
    pub details: Option<WeatherDetails>,
    pub warnings: Vec<String>,
    /// invalid_request / auth_error / api_error
    pub error_kind: Option<String>,
}

impl WeatherCheck {
    fn disabled(reason: &str) -> Self {
        Self {
            enabled: false,
            verified: false,
            details: None,
            warnings: vec![reason.to_string()],
            error_kind: None,
        }
    }

    pub fn to_signal(&self, max: f64) -> ForensicSignal {
        ForensicSignal::new(
            SIGNAL_NAME,
            if self.verified { max } else { 0.0 },
            max,
            serde_json::json!({
                "available": self.enabled && self.error_kind.is_none(),
                "enabled": self.enabled,
                "verified": self.verified,
                "error_kind": self.error_kind,
                "details": self.details,
            }),
            self.warnings.clone(),
        )
    }

    /// 真正查到了天气却对不上
    pub fn is_inconsistent(&self) -> bool {
        self.enabled && self.error_kind.is_none() && self.details.is_some() && !self.verified
    }
}

pub struct WeatherConsistencyChecker {
    provider: Option<Arc<dyn WeatherProvider>>,
    timeout: Duration,
    thresholds: WeatherThresholds,
}

impl WeatherConsistencyChecker {
    pub fn new(
        provider: Option<Arc<dyn WeatherProvider>>,
        timeout: Duration,
        thresholds: WeatherThresholds,
    ) -> Self {
        Self {
            provider,
            timeout,
            thresholds,
        }
    }

    pub async fn check(
        &self,
        location: Option<GeoPoint>,
        date: Option<NaiveDate>,
        scene_labels: &[String],
    ) -> WeatherCheck {
        let Some(provider) = &self.provider else {
            return WeatherCheck::disabled("Weather verification is not configured");
        };
        let (Some(location), Some(date)) = (location, date) else {
            return WeatherCheck::disabled(
                "Weather verification skipped: capture location or date missing",
            );
        };

        let observation = match tokio::time::timeout(self.timeout, provider.historical(location, date)).await {
            Ok(Ok(observation)) => observation,
            Ok(Err(e)) => return upstream_failure(e),
            Err(_) => {
                return upstream_failure(WeatherError::Api(format!(
                    "timed out after {}s",
                    self.timeout.as_secs()
                )))
            }
        };

        compare(location, date, observation, scene_labels, &self.thresholds)
    }
}

fn upstream_failure(error: WeatherError) -> WeatherCheck {
    tracing::warn!(kind = error.kind(), error = %error, "天气查询失败");
    WeatherCheck {
        enabled: true,
        verified: false,
        details: None,
        warnings: vec![format!("Weather verification unavailable: {}", error)],
        error_kind: Some(error.kind().to_string()),
    }
}

/// 纯函数：历史天气与场景标签对照
pub fn compare(
    location: GeoPoint,
    date: NaiveDate,
    observation: WeatherObservation,
    scene_labels: &[String],
    thresholds: &WeatherThresholds,
) -> WeatherCheck {
    let condition = observation.condition.to_lowercase();
    let is_rainy = contains_any(&condition, RAINY_CONDITION_TOKENS)
        || observation.precipitation_mm >= thresholds.rain_precipitation_mm;
    let is_sunny = contains_any(&condition, SUNNY_CONDITION_TOKENS) && !is_rainy;

    // 逐个标签归类：同一个标签里雨天词优先 ("cloudy sky" 算阴雨)；
    // 不同标签之间两种线索互不抵消，"sunny sky" 不会因为另有 "clouds" 而失效
    let labels: Vec<String> = scene_labels.iter().map(|l| l.to_lowercase()).collect();
    let image_looks_rainy = labels.iter().any(|l| contains_any(l, RAINY_SCENE_TOKENS));
    let image_looks_sunny = labels
        .iter()
        .any(|l| contains_any(l, SUNNY_SCENE_TOKENS) && !contains_any(l, RAINY_SCENE_TOKENS));

    let mut warnings = Vec::new();
    if image_looks_sunny && is_rainy {
        warnings.push(format!(
            "Weather inconsistency: image appears sunny but records show {} ({} mm precipitation)",
            observation.condition, observation.precipitation_mm
        ));
    } else if image_looks_rainy && !image_looks_sunny && is_sunny {
        // 晴天里出现云只是弱线索，只有画面完全没有晴天迹象才算矛盾
        warnings.push(format!(
            "Weather inconsistency: image appears rainy but records show {}",
            observation.condition
        ));
    }
    let verified = warnings.is_empty();

    WeatherCheck {
        enabled: true,
        verified,
        details: Some(WeatherDetails {
            location,
            date,
            condition: observation.condition,
            avgtemp_c: observation.avgtemp_c,
            precipitation_mm: observation.precipitation_mm,
            is_sunny,
            is_rainy,
            image_looks_sunny,
            image_looks_rainy,
        }),
        warnings,
        error_kind: None,
    }
}

fn contains_any(haystack: &str, needles: &[&str]) -> bool {
    needles.iter().any(|n| haystack.contains(n))
}
