//! 帧率一致性检查
//!
//! 声明帧率与平均帧率偏差过大，往往意味着剪辑、拼接或重新封装。
//! 30fps 容器里跑着 24fps 的平均帧率，是混剪素材的典型特征。

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;

use crate::config::FrameRateThresholds;
use crate::evidence::ForensicSignal;
use crate::probe::{MediaProbe, VideoStreamInfo};

pub const SIGNAL_NAME: &str = "frame_rate_consistency";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrameRateReport {
    pub declared_fps: f64,
    pub average_fps: f64,
    pub actual_fps: Option<f64>,
    pub total_frames: Option<u64>,
    pub duration_seconds: Option<f64>,
    pub is_consistent: bool,
    pub variance_percent: f64,
    pub severe_variance: bool,
    pub mixed_frame_rate: bool,
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FrameRateOutcome {
    Analyzed(FrameRateReport),
    Unavailable { error: String },
}

impl FrameRateOutcome {
    pub fn report(&self) -> Option<&FrameRateReport> {
        match self {
            FrameRateOutcome::Analyzed(report) => Some(report),
            FrameRateOutcome::Unavailable { .. } => None,
        }
    }

    /// 一致 → 满分；不一致或不可用 → 0
    pub fn to_signal(&self, max: f64) -> ForensicSignal {
        match self {
            FrameRateOutcome::Analyzed(report) => ForensicSignal::new(
                SIGNAL_NAME,
                if report.is_consistent { max } else { 0.0 },
                max,
                serde_json::json!({ "available": true, "report": report }),
                report.warnings.clone(),
            ),
            FrameRateOutcome::Unavailable { error } => ForensicSignal::new(
                SIGNAL_NAME,
                0.0,
                max,
                serde_json::json!({ "available": false, "error": error }),
                vec![format!("Frame rate analysis unavailable: {}", error)],
            ),
        }
    }
}

pub struct FrameRateConsistencyChecker {
    probe: Arc<dyn MediaProbe>,
    thresholds: FrameRateThresholds,
}

impl FrameRateConsistencyChecker {
    pub fn new(probe: Arc<dyn MediaProbe>, thresholds: FrameRateThresholds) -> Self {
        Self { probe, thresholds }
    }

    pub async fn analyze(&self, video: &Path) -> FrameRateOutcome {
        match self.probe.probe_video(video).await {
            Ok(info) => evaluate(&info, &self.thresholds),
            Err(e) => {
                tracing::warn!(error = %e, path = %video.display(), "帧率分析跳过");
                FrameRateOutcome::Unavailable {
                    error: e.to_string(),
                }
            }
        }
    }

    /// 复用已经探测到的流信息 (规范化阶段拿到的)，不再调用探针
    pub fn assess(&self, stream: &std::result::Result<VideoStreamInfo, String>) -> FrameRateOutcome {
        match stream {
            Ok(info) => evaluate(info, &self.thresholds),
            Err(error) => {
                tracing::warn!(error = %error, "帧率分析跳过");
                FrameRateOutcome::Unavailable {
                    error: error.clone(),
                }
            }
        }
    }
}

/// 纯函数部分：阈值比较用原始值，四舍五入只用于输出
pub fn evaluate(info: &VideoStreamInfo, thresholds: &FrameRateThresholds) -> FrameRateOutcome {
    let Some(declared) = parse_rational(&info.declared_frame_rate).filter(|fps| *fps > 0.0) else {
        return FrameRateOutcome::Unavailable {
            error: format!("declared frame rate unavailable ({})", info.declared_frame_rate),
        };
    };
    let Some(average) = parse_rational(&info.average_frame_rate).filter(|fps| *fps > 0.0) else {
        return FrameRateOutcome::Unavailable {
            error: format!("average frame rate unavailable ({})", info.average_frame_rate),
        };
    };

    let actual = match (info.frame_count, info.duration) {
        (Some(frames), Some(duration)) if duration > 0.0 => Some(frames as f64 / duration),
        _ => None,
    };

    let variance = (declared - average).abs() / declared;
    let mut is_consistent = variance < thresholds.consistent_variance;
    let mut warnings = Vec::new();

    if !is_consistent {
        warnings.push(format!(
            "Frame rate inconsistency: declared {:.2} fps vs average {:.2} fps ({:.2}% variance)",
            declared,
            average,
            variance * 100.0
        ));
    }
    let severe = variance > thresholds.severe_variance;
    if severe {
        warnings.push(format!(
            "Severe frame rate variance ({:.2}%) suggests editing or splicing",
            variance * 100.0
        ));
    }

    let mixed = (declared - thresholds.mixed_declared_fps).abs() <= thresholds.mixed_tolerance
        && (average - thresholds.mixed_average_fps).abs() <= thresholds.mixed_tolerance;
    if mixed {
        is_consistent = false;
        warnings.push(
            "Mixed 30/24 fps content detected: footage may be spliced from different sources"
                .to_string(),
        );
    }

    FrameRateOutcome::Analyzed(FrameRateReport {
        declared_fps: round2(declared),
        average_fps: round2(average),
        actual_fps: actual.map(round2),
        total_frames: info.frame_count,
        duration_seconds: info.duration.map(round2),
        is_consistent,
        variance_percent: round2(variance * 100.0),
        severe_variance: severe,
        mixed_frame_rate: mixed,
        warnings,
    })
}

/// "30000/1001" / "25" → fps；分母为 0 返回 None
pub fn parse_rational(raw: &str) -> Option<f64> {
    let raw = raw.trim();
    match raw.split_once('/') {
        Some((num, den)) => {
            let num: f64 = num.trim().parse().ok()?;
            let den: f64 = den.trim().parse().ok()?;
            (den != 0.0).then(|| num / den)
        }
        None => raw.parse().ok(),
    }
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
