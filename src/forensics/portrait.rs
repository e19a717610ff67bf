//! 人像模式修正 (Portrait Mode Adjuster)
//!
//! **问题**: 手机人像模式会用算法虚化背景，AI 生成检测器经常把这种
//! “假景深”误判为合成痕迹。
//!
//! **做法**: 用一张声明式线索表给元数据打分，每条线索是 (判定条件, 分值, 指示说明)，
//! 统一求和、封顶；达到阈值即认定为人像模式，然后按置信度折减 AI 分数。
//! 原始 AI 分数始终保留，折减只是附加信息。

use serde::{Deserialize, Serialize};

use super::frame_rate::parse_rational;
use crate::config::PortraitThresholds;
use crate::evidence::{metadata_field as field, ForensicSignal, MetadataFields};

pub const SIGNAL_NAME: &str = "portrait_mode";

const PHONE_MAKERS: &[&str] = &[
    "apple", "google", "samsung", "huawei", "xiaomi", "oneplus", "oppo", "vivo", "honor",
];

/// 常见手机长焦 (双摄人像) 焦距组合：(实际焦距 mm, 35mm 等效焦距)
const TELEPHOTO_FOCAL_PAIRS: &[(f64, f64)] = &[
    (6.0, 52.0),
    (6.0, 56.0),
    (6.1, 52.0),
    (7.5, 65.0),
    (9.0, 77.0),
];

const FLAG_OFF_VALUES: &[&str] = &["", "0", "1", "off", "none", "no", "false"];

/// 线索的判定条件
enum Cue {
    /// 某些字段的文本包含关键字，可限定厂商
    FieldContains {
        make: Option<&'static str>,
        fields: &'static [&'static str],
        needles: &'static [&'static str],
    },
    /// 字段值精确匹配 (EXIF 枚举)
    FieldEquals {
        fields: &'static [&'static str],
        values: &'static [&'static str],
    },
    /// 包围曝光 / 多重曝光这类开关字段被置位
    FlagSet { fields: &'static [&'static str] },
    TelephotoFocalPair,
    /// 手机 + 大光圈
    WideAperturePhone { max_f_number: f64 },
}

/// 线索之间的关系
#[derive(Clone, Copy, PartialEq, Eq)]
enum CueRole {
    /// 厂商专属标签
    Vendor,
    /// 与厂商线索读同一个字段的通用关键字：任一厂商线索命中时不再计分，
    /// 同一个 EXIF 字段只算一次
    VendorFallback,
    Independent,
}

struct PortraitCue {
    cue: Cue,
    role: CueRole,
    points: u32,
    indicator: &'static str,
}

const PORTRAIT_CUES: &[PortraitCue] = &[
    PortraitCue {
        cue: Cue::FieldContains {
            make: Some("apple"),
            fields: &["LensModel"],
            needles: &["portrait"],
        },
        role: CueRole::Vendor,
        points: 40,
        indicator: "Apple portrait lens mode in LensModel",
    },
    PortraitCue {
        cue: Cue::FieldContains {
            make: Some("google"),
            fields: &["Software", "ImageDescription", "UserComment"],
            needles: &["portrait", "lens blur"],
        },
        role: CueRole::Vendor,
        points: 35,
        indicator: "Google Portrait mode tag",
    },
    PortraitCue {
        cue: Cue::FieldContains {
            make: Some("samsung"),
            fields: &["Software", "ImageDescription", "UserComment"],
            needles: &["live focus", "portrait"],
        },
        role: CueRole::Vendor,
        points: 35,
        indicator: "Samsung Live Focus tag",
    },
    PortraitCue {
        cue: Cue::FieldContains {
            make: None,
            fields: &["Software"],
            needles: &["portrait", "bokeh", "depth"],
        },
        role: CueRole::VendorFallback,
        points: 20,
        indicator: "Portrait/depth keyword in Software tag",
    },
    PortraitCue {
        cue: Cue::FieldContains {
            make: None,
            fields: &["ImageDescription", "UserComment", "XPComment"],
            needles: &["portrait", "bokeh", "depth effect", "background blur"],
        },
        role: CueRole::Independent,
        points: 15,
        indicator: "Portrait keyword in description",
    },
    PortraitCue {
        cue: Cue::TelephotoFocalPair,
        role: CueRole::Independent,
        points: 15,
        indicator: "Dual-camera telephoto focal length",
    },
    PortraitCue {
        cue: Cue::FieldEquals {
            fields: &["SceneCaptureType"],
            values: &["2", "portrait"],
        },
        role: CueRole::Independent,
        points: 20,
        indicator: "SceneCaptureType is Portrait",
    },
    PortraitCue {
        cue: Cue::FlagSet {
            fields: &["CompositeImage", "MultiExposure", "BracketMode", "AEBBracketValue"],
        },
        role: CueRole::Independent,
        points: 10,
        indicator: "Multi-exposure / bracketed capture",
    },
    PortraitCue {
        cue: Cue::WideAperturePhone { max_f_number: 2.0 },
        role: CueRole::Independent,
        points: 10,
        indicator: "Wide aperture on a phone camera",
    },
];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PortraitDetection {
    pub is_portrait_mode: bool,
    /// 0 - 100
    pub confidence: u32,
    pub indicators: Vec<String>,
    pub device: Option<String>,
    pub model: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PortraitAdjustment {
    pub original_ai_score: f64,
    pub adjusted_ai_score: f64,
    pub reduction: f64,
    pub applied: bool,
    pub detection: PortraitDetection,
    pub justification: String,
}

impl PortraitAdjustment {
    pub fn to_signal(&self) -> ForensicSignal {
        let warnings = if self.applied {
            vec![self.justification.clone()]
        } else {
            Vec::new()
        };
        ForensicSignal::new(
            SIGNAL_NAME,
            self.detection.confidence as f64,
            100.0,
            serde_json::json!({
                "is_portrait_mode": self.detection.is_portrait_mode,
                "indicators": self.detection.indicators,
                "original_ai_score": self.original_ai_score,
                "adjusted_ai_score": self.adjusted_ai_score,
                "reduction": self.reduction,
            }),
            warnings,
        )
    }
}

pub struct PortraitModeAdjuster {
    thresholds: PortraitThresholds,
}

impl PortraitModeAdjuster {
    pub fn new(thresholds: PortraitThresholds) -> Self {
        Self { thresholds }
    }

    pub fn detect(&self, metadata: &MetadataFields) -> PortraitDetection {
        let make = field(metadata, "Make").map(|m| m.to_lowercase());

        let mut points = 0u32;
        let mut indicators = Vec::new();
        let mut vendor_matched = false;
        // 厂商线索排在表的前面，先于 VendorFallback 判定
        for rule in PORTRAIT_CUES {
            if rule.role == CueRole::VendorFallback && vendor_matched {
                continue;
            }
            if matches(&rule.cue, metadata, make.as_deref()) {
                vendor_matched |= rule.role == CueRole::Vendor;
                points += rule.points;
                indicators.push(rule.indicator.to_string());
            }
        }

        let confidence = points.min(self.thresholds.max_confidence);
        PortraitDetection {
            is_portrait_mode: confidence >= self.thresholds.detection_threshold,
            confidence,
            indicators,
            device: field(metadata, "Make").map(str::to_string),
            model: field(metadata, "Model").map(str::to_string),
        }
    }

    pub fn adjust(&self, ai_score: f64, detection: &PortraitDetection) -> PortraitAdjustment {
        if !detection.is_portrait_mode {
            return PortraitAdjustment {
                original_ai_score: ai_score,
                adjusted_ai_score: ai_score,
                reduction: 0.0,
                applied: false,
                detection: detection.clone(),
                justification: "No portrait mode detected; AI score unchanged.".to_string(),
            };
        }

        let reduction =
            (self.thresholds.max_reduction * detection.confidence as f64 / 100.0).round();
        let adjusted = (ai_score - reduction).max(0.0);
        let device = [detection.device.as_deref(), detection.model.as_deref()]
            .into_iter()
            .flatten()
            .collect::<Vec<_>>()
            .join(" ");

        PortraitAdjustment {
            original_ai_score: ai_score,
            adjusted_ai_score: adjusted,
            reduction,
            applied: true,
            detection: detection.clone(),
            justification: format!(
                "Portrait mode detected{} ({}% confidence: {}); AI score reduced by {} points ({} → {}) to offset computational background blur.",
                if device.is_empty() { String::new() } else { format!(" on {}", device) },
                detection.confidence,
                detection.indicators.join(", "),
                reduction,
                ai_score,
                adjusted
            ),
        }
    }
}

impl Default for PortraitModeAdjuster {
    fn default() -> Self {
        Self::new(PortraitThresholds::default())
    }
}

fn matches(cue: &Cue, metadata: &MetadataFields, make: Option<&str>) -> bool {
    match cue {
        Cue::FieldContains {
            make: required,
            fields,
            needles,
        } => {
            if let Some(required) = required {
                if !make.is_some_and(|m| m.contains(required)) {
                    return false;
                }
            }
            fields.iter().filter_map(|f| field(metadata, f)).any(|value| {
                let value = value.to_lowercase();
                needles.iter().any(|n| value.contains(n))
            })
        }
        Cue::FieldEquals { fields, values } => fields
            .iter()
            .filter_map(|f| field(metadata, f))
            .any(|value| values.iter().any(|v| value.trim().eq_ignore_ascii_case(v))),
        Cue::FlagSet { fields } => fields
            .iter()
            .filter_map(|f| field(metadata, f))
            .any(|value| !FLAG_OFF_VALUES.contains(&value.trim().to_lowercase().as_str())),
        Cue::TelephotoFocalPair => {
            let focal = field(metadata, "FocalLength").and_then(parse_number);
            let equiv = field(metadata, "FocalLengthIn35mmFormat")
                .or_else(|| field(metadata, "FocalLengthIn35mmFilm"))
                .and_then(parse_number);
            match (focal, equiv) {
                (Some(focal), Some(equiv)) => TELEPHOTO_FOCAL_PAIRS
                    .iter()
                    .any(|(f, e)| (focal - f).abs() <= 0.3 && (equiv - e).abs() <= 2.0),
                _ => false,
            }
        }
        Cue::WideAperturePhone { max_f_number } => {
            let is_phone = make.is_some_and(|m| PHONE_MAKERS.iter().any(|p| m.contains(p)));
            is_phone
                && field(metadata, "FNumber")
                    .and_then(parse_number)
                    .is_some_and(|f| f > 0.0 && f <= *max_f_number)
        }
    }
}

/// "f/1.8" / "6 mm" / "18/10" → 数值
fn parse_number(raw: &str) -> Option<f64> {
    let token = raw.trim().trim_start_matches("f/").split_whitespace().next()?;
    let token = token.trim_end_matches("mm");
    parse_rational(token)
}
