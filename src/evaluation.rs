//! 离线评估：对一批已标注的核验结果计算准确率 / 精确率 / 召回率 / F1
//!
//! 目录下 `real_*.json` 是真实素材、`fake_*.json` 是伪造素材。
//! 两种结果格式都认：
//! - 旧版 API 结果：`video_analysis.analysis.aiPercentage ≥ 30`
//!   或 `ai_detection.likely_ai_generated == true` 判为合成；
//! - 本 crate 的 `VerificationReport`：`portrait.adjusted_ai_score ≥ 30`
//!   或 `result.is_modified == true` 判为合成，标签取 `result.level.name`。
//!
//! 所有比率都是百分数，分母为 0 时记 0。
//! 目录扫描是同步 IO，异步调用方应放到 `spawn_blocking` 里。

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::Result;

pub const AI_PERCENTAGE_THRESHOLD: f64 = 30.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Label {
    Real,
    Fake,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LabelledItem {
    pub file: String,
    pub ai_percentage: f64,
    /// 结果里的置信度标签，没有时为 "N/A"
    pub label: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassTotals {
    pub total: usize,
    pub correct: usize,
    pub incorrect: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EvaluationReport {
    pub real: ClassTotals,
    pub fake: ClassTotals,
    /// 伪造素材被识别出来
    pub true_positives: Vec<LabelledItem>,
    pub true_negatives: Vec<LabelledItem>,
    /// 真实素材被误判为伪造
    pub false_positives: Vec<LabelledItem>,
    pub false_negatives: Vec<LabelledItem>,
    pub skipped: Vec<String>,
}

impl EvaluationReport {
    pub fn total(&self) -> usize {
        self.real.total + self.fake.total
    }

    pub fn accuracy(&self) -> f64 {
        ratio(self.real.correct + self.fake.correct, self.total())
    }

    pub fn precision(&self) -> f64 {
        let tp = self.true_positives.len();
        ratio(tp, tp + self.false_positives.len())
    }

    pub fn recall(&self) -> f64 {
        let tp = self.true_positives.len();
        ratio(tp, tp + self.false_negatives.len())
    }

    pub fn f1(&self) -> f64 {
        let (p, r) = (self.precision(), self.recall());
        if p + r > 0.0 {
            2.0 * p * r / (p + r)
        } else {
            0.0
        }
    }

    pub fn false_positive_rate(&self) -> f64 {
        let fp = self.false_positives.len();
        ratio(fp, fp + self.true_negatives.len())
    }

    /// 归入一条结果
    pub fn record(&mut self, truth: Label, file: impl Into<String>, verdict: &serde_json::Value) {
        let flagged = is_flagged_synthetic(verdict);
        let item = LabelledItem {
            file: file.into(),
            ai_percentage: ai_percentage(verdict),
            label: verdict
                .pointer("/confidence/label")
                .or_else(|| verdict.pointer("/result/level/name"))
                .and_then(|v| v.as_str())
                .unwrap_or("N/A")
                .to_string(),
        };

        let (totals, bucket) = match (truth, flagged) {
            (Label::Real, false) => (&mut self.real, &mut self.true_negatives),
            (Label::Real, true) => (&mut self.real, &mut self.false_positives),
            (Label::Fake, true) => (&mut self.fake, &mut self.true_positives),
            (Label::Fake, false) => (&mut self.fake, &mut self.false_negatives),
        };
        totals.total += 1;
        if flagged == (truth == Label::Fake) {
            totals.correct += 1;
        } else {
            totals.incorrect += 1;
        }
        bucket.push(item);
    }

    pub fn summary(&self) -> serde_json::Value {
        serde_json::json!({
            "summary": {
                "total": self.total(),
                "accuracy": self.accuracy(),
                "real": self.real,
                "fake": self.fake,
            },
            "metrics": {
                "true_positives": self.true_positives.len(),
                "true_negatives": self.true_negatives.len(),
                "false_positives": self.false_positives.len(),
                "false_negatives": self.false_negatives.len(),
                "precision": self.precision(),
                "recall": self.recall(),
                "f1_score": self.f1(),
                "false_positive_rate": self.false_positive_rate(),
            },
            "details": {
                "true_positives": self.true_positives,
                "true_negatives": self.true_negatives,
                "false_positives": self.false_positives,
                "false_negatives": self.false_negatives,
                "skipped": self.skipped,
            },
        })
    }
}

fn ratio(numerator: usize, denominator: usize) -> f64 {
    if denominator == 0 {
        0.0
    } else {
        numerator as f64 / denominator as f64 * 100.0
    }
}

fn ai_percentage(verdict: &serde_json::Value) -> f64 {
    verdict
        .pointer("/video_analysis/analysis/aiPercentage")
        .or_else(|| verdict.pointer("/portrait/adjusted_ai_score"))
        .and_then(|v| v.as_f64())
        .unwrap_or(0.0)
}

fn flag(verdict: &serde_json::Value, pointer: &str) -> bool {
    verdict
        .pointer(pointer)
        .and_then(|v| v.as_bool())
        .unwrap_or(false)
}

pub fn is_flagged_synthetic(verdict: &serde_json::Value) -> bool {
    ai_percentage(verdict) >= AI_PERCENTAGE_THRESHOLD
        || flag(verdict, "/ai_detection/likely_ai_generated")
        || flag(verdict, "/result/is_modified")
}

fn label_for(file_name: &str) -> Option<Label> {
    if !file_name.ends_with(".json") {
        return None;
    }
    if file_name.starts_with("real_") {
        Some(Label::Real)
    } else if file_name.starts_with("fake_") {
        Some(Label::Fake)
    } else {
        None
    }
}

/// 扫描目录；读不了或解析失败的文件记入 `skipped`，不计入总数
pub fn evaluate_dir(dir: &Path) -> Result<EvaluationReport> {
    let mut files: Vec<(String, Label)> = std::fs::read_dir(dir)?
        .filter_map(|entry| entry.ok())
        .filter_map(|entry| {
            let name = entry.file_name().to_string_lossy().into_owned();
            label_for(&name).map(|label| (name, label))
        })
        .collect();
    files.sort();

    let mut report = EvaluationReport::default();
    for (name, label) in files {
        let parsed = std::fs::read(dir.join(&name))
            .map_err(|e| e.to_string())
            .and_then(|bytes| serde_json::from_slice::<serde_json::Value>(&bytes).map_err(|e| e.to_string()));
        match parsed {
            Ok(verdict) => report.record(label, name, &verdict),
            Err(e) => {
                tracing::warn!(file = %name, error = %e, "评估文件解析失败，跳过");
                report.skipped.push(name);
            }
        }
    }

    tracing::info!(
        total = report.total(),
        accuracy = report.accuracy(),
        f1 = report.f1(),
        "评估完成"
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn flags_by_percentage_or_detector() {
        assert!(is_flagged_synthetic(&json!({"video_analysis": {"analysis": {"aiPercentage": 30}}})));
        assert!(!is_flagged_synthetic(&json!({"video_analysis": {"analysis": {"aiPercentage": 29.9}}})));
        assert!(is_flagged_synthetic(&json!({"ai_detection": {"likely_ai_generated": true}})));
        assert!(!is_flagged_synthetic(&json!({})));
    }

    #[test]
    fn reads_verification_report_shape() {
        let flagged = json!({
            "portrait": {"original_ai_score": 70.0, "adjusted_ai_score": 58.0},
            "result": {"is_modified": false, "level": {"name": "low"}},
        });
        let spliced = json!({"result": {"is_modified": true, "level": {"name": "modified"}}});
        let clean = json!({
            "portrait": {"original_ai_score": 40.0, "adjusted_ai_score": 28.0},
            "result": {"is_modified": false, "level": {"name": "high"}},
        });
        assert!(is_flagged_synthetic(&flagged));
        assert!(is_flagged_synthetic(&spliced));
        assert!(!is_flagged_synthetic(&clean));

        let mut report = EvaluationReport::default();
        report.record(Label::Real, "real_clean.json", &clean);
        assert_eq!(report.true_negatives[0].label, "high");
        assert_eq!(report.true_negatives[0].ai_percentage, 28.0);
    }

    #[test]
    fn empty_report_has_zero_metrics() {
        let report = EvaluationReport::default();
        assert_eq!(report.accuracy(), 0.0);
        assert_eq!(report.precision(), 0.0);
        assert_eq!(report.recall(), 0.0);
        assert_eq!(report.f1(), 0.0);
    }

    #[test]
    fn evaluates_a_labelled_directory() {
        let dir = tempfile::tempdir().unwrap();
        let write = |name: &str, value: serde_json::Value| {
            std::fs::write(dir.path().join(name), value.to_string()).unwrap();
        };
        // 真实：1 正确，1 误报
        write("real_a.json", json!({"video_analysis": {"analysis": {"aiPercentage": 5}}, "confidence": {"label": "High Confidence"}}));
        write("real_b.json", json!({"ai_detection": {"likely_ai_generated": true}}));
        // 伪造：2 检出，1 漏检
        write("fake_a.json", json!({"video_analysis": {"analysis": {"aiPercentage": 80}}}));
        write("fake_b.json", json!({"ai_detection": {"likely_ai_generated": true}}));
        write("fake_c.json", json!({"video_analysis": {"analysis": {"aiPercentage": 10}}}));
        std::fs::write(dir.path().join("fake_broken.json"), "{").unwrap();
        write("notes.json", json!({}));

        let report = evaluate_dir(dir.path()).unwrap();
        assert_eq!(report.total(), 5);
        assert_eq!(report.real, ClassTotals { total: 2, correct: 1, incorrect: 1 });
        assert_eq!(report.fake, ClassTotals { total: 3, correct: 2, incorrect: 1 });
        assert_eq!(report.skipped, vec!["fake_broken.json".to_string()]);
        assert_eq!(report.true_negatives[0].label, "High Confidence");

        assert!((report.accuracy() - 60.0).abs() < 1e-9);
        // tp=2 fp=1 fn=1
        assert!((report.precision() - 200.0 / 3.0).abs() < 1e-9);
        assert!((report.recall() - 200.0 / 3.0).abs() < 1e-9);
        assert!((report.f1() - 200.0 / 3.0).abs() < 1e-9);
        assert!((report.false_positive_rate() - 50.0).abs() < 1e-9);
    }
}
